use std::path::PathBuf;

use clap::Parser;

use lowmesh_node::{run_scenario, NodeConfig};

#[derive(Parser)]
#[command(name = "lowmesh-node", about = "Simulated low-power mesh network")]
struct Cli {
    /// Path to the network and scenario description
    #[arg(short, long, default_value = "scenarios/chain.toml")]
    config: PathBuf,

    /// Override the scenario duration in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(duration_ms) = cli.duration_ms {
        config.scenario.duration_ms = duration_ms;
    }

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        lowmesh_node::logging::init_json(&config.logging.level);
    } else {
        lowmesh_node::logging::init(&config.logging.level);
    }

    let report = tokio::select! {
        result = run_scenario(&config) => match result {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("scenario failed: {e}");
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            return;
        }
    };

    println!("{:<12} {:>8} {:>8} {:>6}", "node", "short", "pan", "joined");
    for (name, status) in &report.nodes {
        println!(
            "{:<12} {:>8} {:>8} {:>6}",
            name,
            status.short.to_string(),
            status.pan_id.to_string(),
            status.joined
        );
    }
    println!();
    for event in &report.events {
        println!("{:>7}ms {:<12} {:?}", event.at_ms, event.node, event.event);
    }
}
