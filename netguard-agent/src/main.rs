use std::sync::Arc;

use clap::Parser;
use netguard_agent::config::{Cli, Commands};
use netguard_agent::metrics::Metrics;
use netguard_agent::{Error, Result, agent, http};
use prometheus_client::registry::Registry;
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_subscriber();
    match cli.command {
        Commands::Agent(agent_args) => {
            let cancel = tokio_util::sync::CancellationToken::new();
            let ready = tokio_util::sync::CancellationToken::new();

            let mut registry = Registry::with_prefix("netguard");
            let metrics = Metrics::default().register(&mut registry);

            let mut metrics_handle = tokio::spawn(http::serve_metrics(
                agent_args.metrics_address,
                Arc::new(registry),
                ready.child_token(),
                cancel.child_token(),
            ));
            let mut agent_handle = tokio::spawn(agent::start(
                agent_args,
                metrics,
                ready,
                cancel.child_token(),
            ));
            let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });
            // watch for shutdown and errors
            let result = tokio::select! {
                h = &mut metrics_handle => exit("metrics", h),
                h = &mut agent_handle => exit("agent", h),
                _ = &mut shutdown_handle => {
                        cancel.cancel();
                        let (metrics, agent) = tokio::join!(metrics_handle, agent_handle);
                        if let Err(m) = metrics {
                            error!("metrics exited with error: {}", m.to_string());
                        }
                        match agent {
                            Ok(Err(e)) => error!("agent exited with error: {e}"),
                            Err(e) => error!("agent task failed to complete: {e}"),
                            Ok(Ok(_)) => {}
                        }
                        Ok(())
                    },
            };
            cancel.cancel();
            info!("Exiting...");
            result?;
        }
        Commands::Dump(dump_args) => agent::dump(dump_args)?,
    }
    Ok(())
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netguard_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
          info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

/// Logs how a task ended. A task that stops on its own is a failure of the
/// whole process, so its error is handed back to `main`.
fn exit(task: &str, out: Result<Result<()>, JoinError>) -> Result<()> {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}");
            Err(e)
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}");
            Err(Error::Task(e.to_string()))
        }
    }
}
