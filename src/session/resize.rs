use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::terminal::{SizeSource, TermSize};
use super::ChannelControl;

pub const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll the local terminal size and forward every change to the remote pty.
pub async fn run_resize(
    control: Arc<dyn ChannelControl>,
    source: Arc<dyn SizeSource>,
    initial: TermSize,
    stop: CancellationToken,
) {
    let mut cached = initial;
    let mut ticker = tokio::time::interval(RESIZE_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let size = match source.size() {
            Ok(size) => size,
            Err(err) => {
                debug!("Reading terminal size failed: {}", err);
                continue;
            }
        };
        if size == cached {
            continue;
        }

        debug!(rows = size.rows, cols = size.cols, "Terminal resized");
        cached = size;
        if let Err(err) = control.window_change(size).await {
            warn!("Window change failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingControl {
        changes: Mutex<Vec<TermSize>>,
    }

    #[async_trait]
    impl ChannelControl for RecordingControl {
        async fn keepalive(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn window_change(&self, size: TermSize) -> Result<(), Error> {
            self.changes.lock().unwrap().push(size);
            Ok(())
        }
    }

    struct FakeTerminal {
        size: Mutex<io::Result<TermSize>>,
    }

    impl FakeTerminal {
        fn new(size: TermSize) -> Self {
            Self {
                size: Mutex::new(Ok(size)),
            }
        }

        fn set(&self, size: io::Result<TermSize>) {
            *self.size.lock().unwrap() = size;
        }
    }

    impl SizeSource for FakeTerminal {
        fn size(&self) -> io::Result<TermSize> {
            match &*self.size.lock().unwrap() {
                Ok(size) => Ok(*size),
                Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_notification_per_change() {
        let control = Arc::new(RecordingControl::default());
        let terminal = Arc::new(FakeTerminal::new(TermSize::new(24, 80)));
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_resize(
            control.clone(),
            terminal.clone(),
            TermSize::new(24, 80),
            stop.clone(),
        ));

        sleep(Duration::from_millis(500)).await;
        assert!(control.changes.lock().unwrap().is_empty());

        terminal.set(Ok(TermSize::new(30, 100)));
        sleep(Duration::from_secs(2)).await;

        stop.cancel();
        task.await.unwrap();
        assert_eq!(*control.changes.lock().unwrap(), vec![TermSize::new(30, 100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_are_skipped() {
        let control = Arc::new(RecordingControl::default());
        let terminal = Arc::new(FakeTerminal::new(TermSize::new(24, 80)));
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_resize(
            control.clone(),
            terminal.clone(),
            TermSize::new(24, 80),
            stop.clone(),
        ));

        terminal.set(Err(io::Error::new(io::ErrorKind::Other, "not a tty")));
        sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished());

        terminal.set(Ok(TermSize::new(40, 120)));
        sleep(Duration::from_millis(300)).await;

        stop.cancel();
        task.await.unwrap();
        assert_eq!(*control.changes.lock().unwrap(), vec![TermSize::new(40, 120)]);
    }
}
