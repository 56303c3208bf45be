use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ChannelControl;

/// Send a liveness request every `interval` until `stop` fires.
///
/// Without an interval there is nothing to do and the task returns at once.
/// A failed request is only logged; the peer may just be slow to answer.
pub async fn run_keepalive(
    control: Arc<dyn ChannelControl>,
    interval: Option<Duration>,
    stop: CancellationToken,
) {
    let Some(interval) = interval else {
        debug!("Keepalive disabled");
        return;
    };
    debug!("Keepalive every {:?}", interval);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            result = control.keepalive() => {
                if let Err(err) = result {
                    warn!("Keepalive request failed: {}", err);
                }
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
