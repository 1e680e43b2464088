use std::fmt;

use tokio::signal;
use tracing::error;

/// Why the stdio loop stopped reading requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
    StdinClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "Ctrl+C",
            Self::Terminate => "SIGTERM",
            Self::StdinClosed => "stdin EOF",
        })
    }
}

/// Wait for a process signal that should stop the stdio loop.
///
/// Only covers Ctrl+C and SIGTERM; the loop itself reports
/// [`StopReason::StdinClosed`] when the client closes its end of the pipe.
/// If a handler cannot be installed the failure is logged and that branch
/// never completes, so the other signal and EOF still stop the loop.
pub async fn shutdown_signal() -> StopReason {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler, stdio loop ignores it: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler, stdio loop ignores it: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => StopReason::Interrupt,
        _ = terminate => StopReason::Terminate,
    }
}
