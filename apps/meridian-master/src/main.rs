//! Meridian master process.

mod cli;
mod logging;
mod settings;

use anyhow::Context;
use api_gateway::{Master, MasterConfig, MasterDeps};
use clap::Parser;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    logging::init(args.log_json)?;

    let mut config = settings::load(args.config.as_deref())?;
    args.apply(&mut config);
    run(config).await
}

async fn run(config: MasterConfig) -> anyhow::Result<()> {
    let deps = MasterDeps::in_memory(&config).context("failed to wire in-memory storage")?;
    let master = Master::new(config, deps).context("failed to assemble the master")?;

    let api = master.run().await.context("failed to start the API server")?;
    let assets = master
        .run_asset_server()
        .await
        .context("failed to start the web console")?;
    let controllers = master
        .run_controllers()
        .context("failed to start the controllers")?;
    tracing::info!(
        api = %api.addr,
        assets = %assets.addr,
        controllers = controllers.len(),
        "Meridian master started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    tracing::info!("Shutting down");
    api.task.stop();
    assets.task.stop();
    master.supervisor().shutdown();
    Ok(())
}
