use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::RunnerError;

/// Polls `address` until it accepts TCP connections
///
/// Each attempt is bounded by `interval`; gives up with
/// [`RunnerError::Timeout`] once `deadline` has elapsed.
pub async fn wait_for_port(
    address: &str,
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<(), RunnerError> {
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        match timeout(interval, TcpStream::connect(address)).await {
            Ok(Ok(_)) => {
                debug!("{} is accepting connections", address);
                return Ok(());
            }
            Ok(Err(e)) => debug!("{} not reachable yet: {}", address, e),
            Err(_) => debug!("{} connect attempt timed out", address),
        }

        if started.elapsed() >= deadline {
            return Err(RunnerError::Timeout {
                address: address.to_string(),
                waited_secs: started.elapsed().as_secs(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            _ = sleep(interval) => {}
        }
    }
}
