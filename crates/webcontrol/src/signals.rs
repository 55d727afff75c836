//! Signal handling for graceful shutdown.
//!
//! The host loop is synchronous, so signals are awaited on a dedicated
//! thread running a single-threaded runtime. The host polls the returned
//! flag between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Builder;
use tracing::info;

/// Termination signals the host reacts to.
///
/// * **Unix platforms**: SIGINT and SIGTERM
/// * **Windows**: Ctrl+C
struct ShutdownSignal {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Registers the handlers. Must run inside a runtime context.
    fn register() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn recv(self) {
        #[cfg(unix)]
        {
            let ShutdownSignal {
                mut sigint,
                mut sigterm,
            } = self;

            tokio::select! {
                _ = sigint.recv() => {
                    info!("📡 Received SIGINT");
                }
                _ = sigterm.recv() => {
                    info!("📡 Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let ShutdownSignal {} = self;
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("📡 Received Ctrl+C"),
                Err(e) => tracing::error!("Ctrl+C handler failed: {}", e),
            }
        }
    }
}

/// Installs the termination handlers.
///
/// # Returns
///
/// A flag that turns `true` once a termination signal has been received,
/// or an error if the handlers could not be registered.
pub fn install() -> anyhow::Result<Arc<AtomicBool>> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    let signal = {
        let _guard = runtime.enter();
        ShutdownSignal::register()?
    };

    let requested = Arc::new(AtomicBool::new(false));
    let flag = requested.clone();
    std::thread::Builder::new()
        .name("webcontrol-signals".to_string())
        .spawn(move || {
            runtime.block_on(signal.recv());
            flag.store(true, Ordering::SeqCst);
        })?;

    Ok(requested)
}
