//! CLI command modules

pub mod invoke;
pub mod list;
pub mod serve;

pub use invoke::{execute_invoke_command, InvokeArgs};
pub use list::execute_list_command;
pub use serve::{execute_serve_command, ServeArgs};
