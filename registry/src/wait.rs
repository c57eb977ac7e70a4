use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::Connector;
use crate::error::RegistryError;

/// Poll the registry until a connection succeeds or the budget runs out.
///
/// Connectivity failures are retried at `interval`; exhausting `budget`
/// yields `Timeout` (the wait gave up) rather than the last `Unreachable`
/// (one attempt was refused). Any other failure, such as a rejected
/// password, aborts immediately since retrying cannot fix it. Cancelling
/// `cancel` aborts the wait promptly with `Cancelled`.
pub async fn wait_ready<C: Connector>(
    connector: &C,
    host: &str,
    port: u16,
    password: Option<&str>,
    budget: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<C::Handle, RegistryError> {
    let deadline = Instant::now() + budget;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        attempt += 1;
        match connector.connect(host, port, password).await {
            Ok(handle) => {
                info!(
                    "registry at {}:{} ready after {} attempt(s)",
                    host, port, attempt
                );
                return Ok(handle);
            }
            Err(RegistryError::Unreachable { addr }) => {
                debug!("registry at {} not ready yet (attempt {})", addr, attempt);
            }
            Err(other) => return Err(other),
        }

        if Instant::now() + interval > deadline {
            return Err(RegistryError::Timeout(budget));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
