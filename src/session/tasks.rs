use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A background task with its own stop signal.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    stop: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `task`, handing it the token it must watch on every iteration.
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let join = tokio::spawn(task(stop.clone()));
        Self { name, stop, join }
    }

    /// Signal the task and wait until it has exited.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(err) = self.join.await {
            warn!("{} task ended abnormally: {}", self.name, err);
        }
        debug!("{} task stopped", self.name);
    }
}

/// The tasks running alongside an interactive session.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    resize: Option<TaskHandle>,
    keepalive: Option<TaskHandle>,
    output: Option<TaskHandle>,
}

impl BackgroundTasks {
    pub fn new(
        resize: Option<TaskHandle>,
        keepalive: Option<TaskHandle>,
        output: Option<TaskHandle>,
    ) -> Self {
        Self {
            resize,
            keepalive,
            output,
        }
    }

    /// Stop resize, then keepalive, then the output drain. Each one has
    /// exited before the next is signalled.
    pub async fn shutdown(&mut self) {
        for task in [self.resize.take(), self.keepalive.take(), self.output.take()]
            .into_iter()
            .flatten()
        {
            task.stop().await;
        }
    }
}
