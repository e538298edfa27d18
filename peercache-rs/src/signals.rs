//! Terminates a node once **CTRL+C** or **SIGHUP** is received.
//!
//! Termination is performed via [Registry::terminate](crate::registry::Registry::terminate).
//! This releases all groups of the node along with their cached values, lets the HTTP server
//! finish its pending peer requests before closing its socket and stops the tasks which watch
//! the config. Peers which still route keys to this node then fall back to their own loaders.
use std::sync::Arc;

use tokio::signal::unix::SignalKind;

use crate::registry::Registry;

/// Installs a signal handler which terminates the given registry.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(registry: Arc<Registry>) {
    crate::spawn!(async move {
        match await_termination_signal().await {
            Ok(signal) => {
                log::info!(
                    "Received {}. Releasing {} group(s) and shutting down...",
                    signal,
                    registry.group_names().len()
                );
                registry.terminate();
            }
            Err(error) => log::error!("Failed to install a handler for SIGHUP: {}", error),
        }
    });
}

/// Waits for the first termination signal and returns its name.
async fn await_termination_signal() -> std::io::Result<&'static str> {
    let mut sig_hup = tokio::signal::unix::signal(SignalKind::hangup())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok("CTRL-C"),
        _ = sig_hup.recv() => Ok("SIGHUP"),
    }
}

#[cfg(test)]
mod tests {
    use crate::group::LoaderFn;
    use crate::registry::Registry;
    use crate::testing::test_async;
    use std::time::Duration;

    #[test]
    fn sighup_terminates_the_registry() {
        test_async(async {
            let registry = Registry::new();
            let _ = registry.new_group(
                "scores",
                0,
                LoaderFn(|key: String| async move { Ok(key.into_bytes()) }),
            );
            crate::signals::install(registry.clone());

            // Give the handler a chance to be installed before sending the signal...
            tokio::time::sleep(Duration::from_millis(100)).await;
            let status = tokio::process::Command::new("kill")
                .arg("-HUP")
                .arg(std::process::id().to_string())
                .status()
                .await
                .unwrap();
            assert_eq!(status.success(), true);

            while registry.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(registry.group("scores").is_none(), true);
        });
    }
}
