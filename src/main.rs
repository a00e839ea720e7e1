use std::net::SocketAddr;
use std::panic;
use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::constants::{EXECUTION_TIME_LIMIT, MAX_OUTPUT_BYTES, RATE_LIMIT_SWEEP_INTERVAL};
use crate::core::admission::AdmissionController;
use crate::core::language::LanguageRegistry;
use crate::core::pipeline::executing::ExecutionPipeline;
use crate::core::pool::{WorkerPool, worker_count};
use crate::core::queue::{JobQueue, QueueOptions};
use crate::http::services::{AppState, router};
use crate::native::sandbox::NativeSandbox;
use crate::native::workspace::WorkspaceManager;

mod config;
mod constants;
mod core;
mod http;
mod native;


#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    set_panic_hook();

    let config = Config::load()?;
    let cpu_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let concurrency = worker_count(cpu_cores);

    let languages = Arc::new(LanguageRegistry::from_toolchains(
        &config.toolchains,
        &config.languages,
    ));
    let workspaces = WorkspaceManager::new(&config.workspace_root)?;
    tracing::info!("Job workspaces in {}", workspaces.root().display());
    let sandbox = Arc::new(NativeSandbox::new(&config.toolchains.shell, MAX_OUTPUT_BYTES));
    let pipeline = Arc::new(ExecutionPipeline::new(
        workspaces,
        languages.clone(),
        sandbox,
        EXECUTION_TIME_LIMIT,
    ));

    let queue = JobQueue::new(QueueOptions::default());
    let pool = WorkerPool::spawn(queue.clone(), pipeline, concurrency);

    let admission = Arc::new(AdmissionController::new(languages.clone()));
    let sweeper = admission.clone().spawn_sweeper(RATE_LIMIT_SWEEP_INTERVAL);

    let state = AppState {
        admission,
        queue: queue.clone(),
        languages: languages.languages().iter().map(|l| l.to_string()).collect(),
        concurrency: pool.concurrency(),
        cpu_cores,
        started_at: Instant::now(),
    };

    let addr = format!("{}:{}", config.address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "HTTP server listening on {} with {} workers on {} cores",
        addr,
        concurrency,
        cpu_cores
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutting down, draining queued jobs");
    queue.close();
    pool.join().await;
    sweeper.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
