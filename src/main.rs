use std::sync::Arc;

use gauntlet::provider;
use gauntlet::run_outcome;
use gauntlet::run_owner;
use gauntlet::start_server;
use gauntlet::supervise;
use gauntlet::utils::file_io;
use gauntlet::BastionShell;
use gauntlet::CliLeasePool;
use gauntlet::FileSignalBoard;
use gauntlet::HarnessConfig;
use gauntlet::LeasePhase;
use gauntlet::OcClusterCtl;
use gauntlet::Phase;
use gauntlet::Result;
use gauntlet::Route53Dns;
use gauntlet::SetupPhase;
use gauntlet::SystemError;
use gauntlet::TeardownPhase;
use gauntlet::TestPhase;
use gauntlet::TokioProcessRunner;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = HarnessConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config)?;

    // Two-stage shutdown: the first signal stops the run, teardown keeps
    // gathering evidence; a second signal abandons the gathering too.
    let run_cancel = CancellationToken::new();
    let cleanup_cancel = CancellationToken::new();
    {
        let run_cancel = run_cancel.clone();
        let cleanup_cancel = cleanup_cancel.clone();
        tokio::spawn(async {
            if let Err(e) = graceful_shutdown(run_cancel, cleanup_cancel).await {
                error!("Failed to shutdown: {:?}", e);
            }
        });
    }

    let (metrics_tx, metrics_rx) = watch::channel(());
    if config.monitoring.prometheus_enabled {
        let port = config.monitoring.prometheus_port;
        tokio::spawn(start_server(port, metrics_rx));
    }

    let board = Arc::new(FileSignalBoard::new(config.signals.board_dir.clone()));
    board.ensure_dir().await?;

    // Processes started for teardown hang off the cleanup token so they
    // survive the first shutdown signal.
    let run_runner = Arc::new(TokioProcessRunner::new(run_cancel.clone()));
    let cleanup_runner = Arc::new(TokioProcessRunner::new(cleanup_cancel.clone()));

    let kubeconfig = config.artifacts.install_dir().join("auth/kubeconfig");
    let pool = Arc::new(CliLeasePool::new(run_runner.clone(), config.lease.clone()));
    let owner = run_owner(&config.cluster.cluster_name);
    info!("run starting; owner `{owner}`");

    let test_ctl = Arc::new(
        OcClusterCtl::new(run_runner.clone(), kubeconfig.clone())
            .with_probe_timeout(config.runbook.meltdown_probe_timeout()),
    );
    let shell = Arc::new(BastionShell::new(
        run_runner.clone(),
        test_ctl.clone(),
        kubeconfig.clone(),
        config.cluster.ssh_private_key_path(),
        provider::ssh_user(config.cluster.cluster_type).unwrap_or("core"),
        config.retry.ssh.clone(),
    ));
    let dns = Arc::new(Route53Dns::new(run_runner.clone()));
    let teardown_ctl = Arc::new(OcClusterCtl::new(cleanup_runner.clone(), kubeconfig));

    let phases: Vec<Arc<dyn Phase>> = vec![
        Arc::new(LeasePhase::new(pool, board.clone(), &config, owner)),
        Arc::new(SetupPhase::new(board.clone(), run_runner.clone(), config.clone())),
        Arc::new(TestPhase::new(
            board.clone(),
            run_runner,
            test_ctl,
            shell,
            dns,
            config.clone(),
        )),
        Arc::new(TeardownPhase::new(board, cleanup_runner, teardown_ctl, config)),
    ];

    let reports = supervise(phases, &run_cancel).await;
    let _ = metrics_tx.send(());

    run_outcome(reports)
}

async fn graceful_shutdown(
    run_cancel: CancellationToken,
    cleanup_cancel: CancellationToken,
) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(SystemError::Io)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(SystemError::Io)?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }
    run_cancel.cancel();
    info!("run cancelled; teardown keeps gathering. Signal again to abort that too.");

    tokio::select! {
        _ = sigint.recv() => {
            info!("second SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("second SIGTERM detected.");
        },
    }
    cleanup_cancel.cancel();
    info!("evidence gathering abandoned");
    Ok(())
}

fn init_observability(config: &HarnessConfig) -> Result<WorkerGuard> {
    let log_file = file_io::open_file_for_append(config.artifacts.root.join("gauntlet.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
