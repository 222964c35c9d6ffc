use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
use commands::{execute_invoke_command, execute_list_command, execute_serve_command, InvokeArgs, ServeArgs};

#[derive(Parser)]
#[command(name = "devshim")]
#[command(about = "Devshim - serve raw socket handlers as structured JSON endpoints")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the development server
    Serve(ServeCommandArgs),
    /// List resolvable handlers
    List(ListArgs),
    /// Run one request through a handler and print the result
    Invoke(InvokeCommandArgs),
}

#[derive(Args)]
pub struct ServeCommandArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "5328")]
    pub port: u16,
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Handler directory
    #[arg(short, long, default_value = "api")]
    pub dir: PathBuf,
    /// Entry point name excluded from resolution
    #[arg(long, default_value = "dev_server")]
    pub entry_point: String,
    /// Let handler log messages through
    #[arg(long)]
    pub handler_logs: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Handler directory
    #[arg(short, long, default_value = "api")]
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct InvokeCommandArgs {
    /// Handler name
    pub name: String,
    /// Request verb
    #[arg(short, long, default_value = "GET")]
    pub method: String,
    /// Request path (defaults to /api/<name>)
    #[arg(long)]
    pub path: Option<String>,
    /// Request body
    #[arg(short, long)]
    pub body: Option<String>,
    /// Request header as KEY:VALUE, repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,
    /// Handler directory
    #[arg(short, long, default_value = "api")]
    pub dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let serve_args = ServeArgs {
                port: args.port,
                host: args.host,
                dir: args.dir,
                entry_point: args.entry_point,
                handler_logs: args.handler_logs,
            };
            execute_serve_command(serve_args).await
        }
        Commands::List(args) => execute_list_command(&args.dir),
        Commands::Invoke(args) => {
            let invoke_args = InvokeArgs {
                name: args.name,
                method: args.method,
                path: args.path,
                body: args.body,
                headers: args.headers,
                dir: args.dir,
            };
            execute_invoke_command(invoke_args).await
        }
    }
}
