use std::sync::Arc;

use browser_mcp_relay::{
    build_app,
    config::Config,
    content_fetcher::ReqwestFetcher,
    domain::tools::FallbackTools,
    executor::{spawn_executor, ExecutorProcess},
    logging,
    mcp::server::{Relay, RelaySettings},
    AppState,
};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let fetcher = Arc::new(ReqwestFetcher::new(config.fetch_timeout)?);
    let relay = Arc::new(Relay::new(
        FallbackTools::new(fetcher),
        RelaySettings {
            version_policy: config.version_policy,
            forward_timeout: config.forward_timeout,
        },
    ));

    let executor = match &config.executor_command {
        Some(command) => match spawn_executor(Arc::clone(&relay), command).await {
            Ok(process) => Some(process),
            Err(err) => {
                warn!(error = %err, "tool executor unavailable, serving built-in tools");
                None
            }
        },
        None => {
            info!("no tool executor configured, serving built-in tools");
            None
        }
    };

    let app = build_app(AppState::new(relay));
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown(executor))
        .await?;
    Ok(())
}

async fn shutdown(executor: Option<ExecutorProcess>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received");
    if let Some(executor) = executor {
        executor.terminate();
    }
}
