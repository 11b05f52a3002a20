use tokio_util::sync::CancellationToken;

/// Cancel `cancel` on the first SIGINT or SIGTERM. Returns early, without
/// cancelling, if `cancel` fires first.
pub async fn wait_for_signal(cancel: CancellationToken) {
    let name = tokio::select! {
        name = next_signal() => name,
        _ = cancel.cancelled() => return,
    };
    drip_info!(sys, signal = name, "received signal, stopping campaign");
    cancel.cancel();
}

#[cfg(unix)]
async fn next_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            drip_warn!(sys, error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn next_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        drip_warn!(sys, error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
