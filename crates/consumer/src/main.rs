//! `squish-consumer` — GPU-aware compression queue consumer daemon.
//!
//! Pulls job envelopes from the durable RabbitMQ queue one at a time,
//! gates execution on local GPU readiness, and acks/nacks each delivery
//! terminally. Startup failures (broker unreachable) exit non-zero for
//! the process supervisor to retry; per-message failures never stop the
//! loop.
//!
//! # Environment variables
//!
//! See [`squish_consumer::config::ConsumerConfig::from_env`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use squish_broker::{BrokerError, BrokerSession};
use squish_consumer::config::ConsumerConfig;
use squish_consumer::{AdmissionController, ImageEngine, JobLog};
use squish_gpu::{GpuMonitor, StatusSource};

/// What the consumer task yields when it finishes: the loop result plus
/// the session, handed back for teardown.
type ConsumerJoin = Result<(Result<(), BrokerError>, BrokerSession), tokio::task::JoinError>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "squish_consumer=debug,squish_broker=info,squish_gpu=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ConsumerConfig::from_env();
    tracing::info!(
        queue = %config.queue_name,
        prefetch = config.prefetch_count,
        "Starting compression queue consumer",
    );

    if let Err(e) = ensure_directories(&config).await {
        tracing::error!(error = %e, "Failed to create working directories");
        std::process::exit(1);
    }

    // One monitor instance for the process lifetime, handed to the
    // controller below. Readiness is local to this process: parallel
    // consumers sharing a physical GPU judge it independently.
    let monitor = Arc::new(GpuMonitor::new());
    monitor.check_availability().await;

    let mut session = BrokerSession::new(
        &config.rabbit_url,
        &config.queue_name,
        config.prefetch_count,
    );
    if let Err(e) = session.connect().await {
        tracing::error!(error = %e, "Failed to connect to RabbitMQ");
        std::process::exit(1);
    }

    if let Err(e) = session.start_consumer().await {
        tracing::error!(error = %e, "Failed to start queue consumer");
        std::process::exit(1);
    }
    tracing::info!("Queue consumer started, waiting for jobs");

    monitor.start(config.gpu_check_interval);

    let controller = Arc::new(AdmissionController::new(
        Arc::clone(&monitor) as Arc<dyn StatusSource>,
        Arc::new(ImageEngine::new(&config.output_dir)),
        JobLog::new(&config.log_dir),
        config.gpu_wait_timeout,
    ));

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let mut consumer_task = tokio::spawn(async move {
        let result = session.run(controller, &loop_cancel).await;
        (result, session)
    });

    let exit_code = tokio::select! {
        _ = shutdown_signal() => {
            monitor.stop();
            // Cancellation is observed between deliveries, so an
            // in-flight job finishes before the task returns.
            cancel.cancel();
            teardown((&mut consumer_task).await).await
        }
        joined = &mut consumer_task => {
            monitor.stop();
            teardown(joined).await
        }
    };

    tracing::info!("Queue consumer stopped");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Disconnect the session the consumer task handed back and map the loop
/// result to a process exit code.
async fn teardown(joined: ConsumerJoin) -> i32 {
    match joined {
        Ok((Ok(()), mut session)) => {
            session.disconnect().await;
            0
        }
        Ok((Err(e), mut session)) => {
            tracing::error!(error = %e, "Consumer loop ended with error");
            session.disconnect().await;
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "Consumer task panicked");
            1
        }
    }
}

async fn ensure_directories(config: &ConsumerConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&config.input_dir).await?;
    tokio::fs::create_dir_all(&config.output_dir).await?;
    tokio::fs::create_dir_all(&config.log_dir).await?;
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the daemon
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
