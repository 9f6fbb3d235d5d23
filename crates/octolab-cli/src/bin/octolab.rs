use clap::Parser;
use octolab_cli::{Cli, commands, ui};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli).await {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
