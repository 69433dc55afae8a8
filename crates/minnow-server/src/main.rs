mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use minnow_storage::disk::DiskStore;
use minnow_storage::{ErasureObjectLayer, ObjectLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, is_remote_endpoint};

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("minnow=info".parse()?);
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let endpoints = cli.disk_endpoints()?;
    let config = cli.object_layer_config()?;
    let layer = Arc::new(
        ErasureObjectLayer::from_endpoints(&endpoints, config)
            .await
            .context("failed to open the erasure set")?,
    );

    let exported: Vec<DiskStore> = if cli.export_disks {
        layer
            .set()
            .disks()
            .iter()
            .filter(|disk| !is_remote_endpoint(disk.endpoint()))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    for disk in &exported {
        info!(disk = disk.endpoint(), "exporting disk over storage rpc");
    }

    let object_layer: Arc<dyn ObjectLayer> = layer.clone();
    let app = minnow_s3_api::s3_router(object_layer, exported);

    let addr = cli.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, disks = endpoints.len(), "minnow server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    layer.close().await;
    info!("minnow server stopped");
    Ok(())
}
