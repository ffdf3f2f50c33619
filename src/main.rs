use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use clap::Parser;

use log::{info, warn};

use oracle::{
    config::Config,
    ledger::HttpLedger,
    runner::DockerRunner,
    server,
    settlement::SettlementController,
    watcher,
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "Oracle node for the computation marketplace.")]
#[command(version = "1.0")]
#[command(about = "Watches the ledger for submitted computations, runs them \
                   inside provider sandboxes, and settles payment.",
          long_about = None)
]
struct Cli {
    /// The node config file on disk
    #[arg(short, long)]
    config_file: Option<String>,

    /// Override the block the event watcher starts from
    #[arg(long)]
    from_block: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cli = Cli::parse();
    info!("<-> Settlement oracle for the computation marketplace <->");

    let mut config = Config::load(
        cli.config_file.as_deref().unwrap_or("./oracle.toml")
    )?;
    if cli.from_block.is_some() {
        config.ledger.from_block = cli.from_block;
    }

    let ledger = Arc::new(HttpLedger::new(&config.ledger)?);
    let runner = Arc::new(DockerRunner::new(&config.runtime)?);
    let controller = Arc::new(SettlementController::new(
        ledger.clone(),
        runner,
        config.runtime.requester_public_key.clone(),
        &config.settlement,
    ));

    // the synchronous trigger
    let server_controller = controller.clone();
    let server_config = config.server.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve(server_controller, &server_config).await {
            warn!("Oracle server died: `{e:?}`");
        }
    });

    // the event trigger
    watcher::run(controller, ledger, &config.ledger).await
}
