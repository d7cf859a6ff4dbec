use clap::Parser;
use tracing_subscriber::EnvFilter;

use mortgage_planner::api::{Cli, Command, run_http_server, run_plan_command, run_sweep_command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = match cli.command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
            return;
        }
        Command::Plan(args) => tokio::task::spawn_blocking(move || run_plan_command(args)).await,
        Command::Sweep(args) => tokio::task::spawn_blocking(move || run_sweep_command(args)).await,
    };

    match output {
        Ok(Ok(json)) => println!("{json}"),
        Ok(Err(e)) => {
            eprintln!("Error: {}", e.message);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
