use std::net::SocketAddr;
use std::sync::Arc;

use perpindex::api;
use perpindex::chain::{EventGateway, RpcClient, Topic};
use perpindex::config::Config;
use perpindex::db::init_db;
use perpindex::engine::{spawn_supervised, Projector};
use perpindex::reconcile::{Backfiller, Reconciler};
use perpindex::Repository;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));

    for asset in &config.assets_seed {
        if let Err(e) = repo.upsert_asset(asset).await {
            eprintln!("Failed to seed asset {}: {}", asset.asset_id, e);
            std::process::exit(1);
        }
    }

    let chain = Arc::new(RpcClient::new(
        config.chain_http_url.clone(),
        config.contract_address.clone(),
        config.rpc_conc,
    ));
    let projector = Arc::new(Projector::new(repo.clone()));
    let reconciler = Arc::new(Reconciler::new(
        chain.clone(),
        projector.clone(),
        config.rpc_conc,
        config.db_conc,
    ));
    let backfiller = Arc::new(Backfiller::new(
        chain,
        repo.clone(),
        reconciler.clone(),
        config.backfill_chunk_size,
        config.backfill_page_size,
    ));

    // One supervised consumer task per topic.
    let gateway = EventGateway::new(
        config.chain_ws_url.clone(),
        config.contract_address.clone(),
        config.watchdog,
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    for topic in Topic::ALL {
        spawn_supervised(
            gateway.clone(),
            topic,
            projector.clone(),
            Some(backfiller.clone()),
            shutdown_rx.clone(),
        );
    }

    // Close any gaps accumulated while the process was down.
    {
        let backfiller = backfiller.clone();
        tokio::spawn(async move {
            match backfiller.run().await {
                Ok(report) => tracing::info!(
                    targets = report.targets,
                    corrections = report.summary.corrections(),
                    failed_chunks = report.failed_chunks,
                    "startup backfill finished"
                ),
                Err(e) => tracing::warn!(error = %e, "startup backfill failed"),
            }
        });
    }

    // Create router
    let app = api::create_router(api::AppState { repo, reconciler });

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }

    drop(shutdown_tx);
}
