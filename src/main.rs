use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use corvid_tools::LaunchOptions;

mod mcp;

#[derive(Parser)]
#[command(name = "corvid-tools")]
#[command(about = "Snapshot-driven browser automation over MCP")]
#[command(version)]
struct Cli {
    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Explicit Chrome/Chromium binary to launch
    #[arg(long, value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    // stdout carries the MCP transport; logs go to stderr.
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let launch = LaunchOptions {
        binary: cli.chrome,
        headless: !cli.headed,
        ..LaunchOptions::default()
    };

    mcp::run_server(launch).await
}
