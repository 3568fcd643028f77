use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod terminal;

use commands::chat::{run_chat, run_restore, run_send};
use commands::config::run_config;
use commands::inspect::{run_parse, run_render};

#[derive(Parser)]
#[command(name = "wland-chat")]
#[command(about = "Terminal client for an n8n chat webhook", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Echo debug log lines to stderr.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Directory holding `.wland-chat/` (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply.
    Send(SendArgs),
    /// Interactive conversation on stdin; `/quit` leaves.
    Chat(SessionArgs),
    /// Extract the display message and directives from a webhook body.
    Parse(InputArg),
    /// Render message markdown to sanitized HTML.
    Render(InputArg),
    /// Consume the conversation saved before the last redirect.
    Restore,
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Args)]
struct SendArgs {
    text: String,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args, Clone)]
pub(crate) struct SessionArgs {
    /// URL reported as the embedding page.
    #[arg(long, default_value = "cli://wland-chat")]
    page_url: String,

    /// Visitor fingerprint; a temporary id is generated when absent.
    #[arg(long)]
    session_id: Option<String>,

    /// Accept the privacy notice without prompting.
    #[arg(long)]
    accept_consent: bool,
}

#[derive(Args)]
struct InputArg {
    /// File to read; `-` or nothing reads stdin.
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub(crate) enum ConfigCmd {
    Show,
    /// Write default project settings if none exist.
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let workspace = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Send(args) => {
            run_send(&workspace, &args.text, &args.session, cli.json, cli.verbose)
        }
        Commands::Chat(args) => run_chat(&workspace, &args, cli.json, cli.verbose),
        Commands::Parse(input) => run_parse(input.path.as_deref(), cli.json),
        Commands::Render(input) => run_render(input.path.as_deref(), cli.json),
        Commands::Restore => run_restore(&workspace, cli.json, cli.verbose),
        Commands::Config { command } => run_config(&workspace, command, cli.json),
    }
}
