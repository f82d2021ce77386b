//! `forkswap` binary

use std::io::Write;

use forkswap_daemon::{cli, logging, run, Invocation};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let matches = cli::command().get_matches();
    let invocation = match Invocation::from_matches(&matches) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("forkswap: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = logging::init(invocation.log_format) {
        eprintln!("forkswap: {e:#}");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut stdout = std::io::stdout();
    let code = match run(invocation, shutdown_rx, &mut stdout).await {
        Ok(exit) => exit.code(),
        Err(e) => {
            eprintln!("forkswap: {e:#}");
            1
        }
    };
    let _ = stdout.flush();
    std::process::exit(code);
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, stopping after the current step"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, stopping after the current step"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received SIGINT, stopping after the current step"),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    }
}
