//! Interactive shell sessions over an authenticated connection.

mod keepalive;
mod resize;
mod stdio;
mod tasks;
pub mod terminal;

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::models::Endpoint;
use crate::ssh_service::Connection;
use keepalive::run_keepalive;
use resize::run_resize;
use stdio::{spawn_stdin_reader, OutputSink};
use tasks::{BackgroundTasks, TaskHandle};
use terminal::{LocalTerminal, RawModeGuard, SizeSource, TermSize};

const TTY_SPEED: u32 = 14400;
const RESIZE_QUEUE: usize = 8;

/// Operations the background tasks perform on a running session.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    async fn keepalive(&self) -> Result<(), Error>;
    async fn window_change(&self, size: TermSize) -> Result<(), Error>;
}

/// What happened on the remote side of an interactive channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    Closed,
}

/// The channel operations the foreground pump drives.
#[async_trait(?Send)]
pub trait ShellChannel {
    /// Next event from the remote side. Must be safe to drop while pending.
    async fn next_event(&mut self) -> ShellEvent;
    async fn send_data(&mut self, data: &[u8]) -> Result<(), Error>;
    async fn send_eof(&mut self) -> Result<(), Error>;
    async fn resize(&mut self, size: TermSize) -> Result<(), Error>;
}

/// The remote handles a session releases during teardown.
#[async_trait]
pub trait SessionResources: Send {
    async fn close_channel(&mut self);
    async fn close_connection(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticated,
    InteractiveReady,
    Running,
    Closing,
    Closed,
    Failed,
}

/// Open an interactive shell on `endpoint` and run it until the remote
/// side closes it. A normal remote exit is `Ok`.
///
/// `cancel` ends a running session early through the same teardown as a
/// remote exit.
pub async fn connect(endpoint: &Endpoint, cancel: CancellationToken) -> Result<(), Error> {
    SessionController::new(endpoint).run(cancel).await
}

struct SessionController<'a> {
    endpoint: &'a Endpoint,
    state: SessionState,
}

impl<'a> SessionController<'a> {
    fn new(endpoint: &'a Endpoint) -> Self {
        Self {
            endpoint,
            state: SessionState::Idle,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<(), Error> {
        self.transition(SessionState::Connecting);
        let connection = match Connection::open(self.endpoint).await {
            Ok(connection) => Arc::new(connection),
            Err(err) => {
                self.transition(SessionState::Failed);
                return Err(err);
            }
        };
        self.transition(SessionState::Authenticated);

        let (channel, terminal, size) = match open_interactive(&connection).await {
            Ok(parts) => parts,
            Err(err) => {
                self.transition(SessionState::Failed);
                if let Err(close_err) = connection.close().await {
                    debug!("Disconnect after failed setup: {}", close_err);
                }
                return Err(err);
            }
        };
        self.transition(SessionState::InteractiveReady);

        self.transition(SessionState::Running);
        let shell = channel.request_shell(false).await;
        let (tasks, channel, result) = match shell {
            Ok(()) => {
                let (tasks, channel) = self.run_shell(channel, &connection, size, cancel).await;
                (tasks, channel, Ok(()))
            }
            Err(err) => (
                BackgroundTasks::default(),
                channel,
                Err(Error::session("starting the shell", err)),
            ),
        };

        self.transition(SessionState::Closing);
        LiveSession::new(RemoteResources::new(channel, connection), Some(terminal), tasks)
            .close()
            .await;
        self.transition(SessionState::Closed);
        result
    }

    async fn run_shell(
        &self,
        channel: Channel<Msg>,
        connection: &Arc<Connection>,
        size: TermSize,
        cancel: CancellationToken,
    ) -> (BackgroundTasks, Channel<Msg>) {
        let (output, output_task) = OutputSink::for_endpoint(self.endpoint).await;
        let (resize_tx, resize_rx) = mpsc::channel(RESIZE_QUEUE);
        let control: Arc<dyn ChannelControl> = Arc::new(RemoteControl {
            connection: connection.clone(),
            resize: resize_tx,
        });

        let keepalive = {
            let control = control.clone();
            let interval = self.endpoint.options.keepalive_interval();
            TaskHandle::spawn("keepalive", move |stop| run_keepalive(control, interval, stop))
        };
        let resize = TaskHandle::spawn("resize", move |stop| {
            run_resize(control, Arc::new(LocalTerminal), size, stop)
        });

        let (channel, exit) = pump(channel, spawn_stdin_reader(), resize_rx, output, cancel).await;
        match exit {
            PumpExit::Closed {
                exit_status: Some(status),
            } => info!("Remote shell exited with status {}", status),
            PumpExit::Closed { exit_status: None } => info!("Remote shell closed the channel"),
            PumpExit::Cancelled => info!("Session cancelled"),
            PumpExit::Failed(message) => warn!("Session ended on I/O error: {}", message),
        }

        (
            BackgroundTasks::new(Some(resize), Some(keepalive), output_task),
            channel,
        )
    }
}

async fn open_interactive(
    connection: &Connection,
) -> Result<(Channel<Msg>, RawModeGuard, TermSize), Error> {
    let channel = connection.open_channel().await?;
    let terminal =
        RawModeGuard::enter().map_err(|err| Error::session("entering raw mode", err))?;
    let size = LocalTerminal
        .size()
        .map_err(|err| Error::session("reading the terminal size", err))?;

    let term = terminal::term_type();
    debug!("Requesting pty {} {}x{}", term, size.cols, size.rows);
    channel
        .request_pty(
            false,
            &term,
            u32::from(size.cols),
            u32::from(size.rows),
            0,
            0,
            &[
                (Pty::ECHO, 1),
                (Pty::TTY_OP_ISPEED, TTY_SPEED),
                (Pty::TTY_OP_OSPEED, TTY_SPEED),
            ],
        )
        .await
        .map_err(|err| Error::session("requesting a pseudo-terminal", err))?;

    Ok((channel, terminal, size))
}

#[async_trait(?Send)]
impl ShellChannel for Channel<Msg> {
    async fn next_event(&mut self) -> ShellEvent {
        loop {
            match self.wait().await {
                Some(ChannelMsg::Data { data }) => return ShellEvent::Stdout(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    return ShellEvent::Stderr(data.to_vec())
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return ShellEvent::ExitStatus(exit_status)
                }
                Some(ChannelMsg::Close) | None => return ShellEvent::Closed,
                Some(_) => {}
            }
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.data(data)
            .await
            .map_err(|err| Error::session("sending input", err))
    }

    async fn send_eof(&mut self) -> Result<(), Error> {
        self.eof()
            .await
            .map_err(|err| Error::session("sending EOF", err))
    }

    async fn resize(&mut self, size: TermSize) -> Result<(), Error> {
        self.window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
            .await
            .map_err(|err| Error::session("resizing the pty", err))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PumpExit {
    Closed { exit_status: Option<u32> },
    Cancelled,
    Failed(String),
}

/// Move bytes between the local streams and the channel until the channel
/// closes, an I/O error occurs or `cancel` fires.
async fn pump<C: ShellChannel>(
    mut channel: C,
    mut stdin: mpsc::Receiver<Vec<u8>>,
    mut resize: mpsc::Receiver<TermSize>,
    mut output: OutputSink,
    cancel: CancellationToken,
) -> (C, PumpExit) {
    let mut stderr = tokio::io::stderr();
    let mut exit_status = None;
    let mut stdin_open = true;

    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => break PumpExit::Cancelled,
            event = channel.next_event() => match event {
                ShellEvent::Stdout(data) => {
                    if let Err(err) = output.write(&data).await {
                        break PumpExit::Failed(err.to_string());
                    }
                }
                ShellEvent::Stderr(data) => {
                    let written = match stderr.write_all(&data).await {
                        Ok(()) => stderr.flush().await,
                        Err(err) => Err(err),
                    };
                    if let Err(err) = written {
                        debug!("Writing remote stderr failed: {}", err);
                    }
                }
                ShellEvent::ExitStatus(status) => exit_status = Some(status),
                ShellEvent::Closed => break PumpExit::Closed { exit_status },
            },
            chunk = stdin.recv(), if stdin_open => match chunk {
                Some(bytes) => {
                    if let Err(err) = channel.send_data(&bytes).await {
                        break PumpExit::Failed(err.to_string());
                    }
                }
                None => {
                    stdin_open = false;
                    if let Err(err) = channel.send_eof().await {
                        debug!("Sending EOF failed: {}", err);
                    }
                }
            },
            Some(size) = resize.recv() => {
                if let Err(err) = channel.resize(size).await {
                    warn!("Window change failed: {}", err);
                }
            }
        }
    };

    (channel, exit)
}

/// Keepalives go straight to the connection; window changes are queued for
/// the foreground pump, which owns the channel.
struct RemoteControl {
    connection: Arc<Connection>,
    resize: mpsc::Sender<TermSize>,
}

#[async_trait]
impl ChannelControl for RemoteControl {
    async fn keepalive(&self) -> Result<(), Error> {
        self.connection
            .keepalive()
            .await
            .map_err(|err| Error::session("sending keepalive", err))
    }

    async fn window_change(&self, size: TermSize) -> Result<(), Error> {
        self.resize
            .send(size)
            .await
            .map_err(|_| Error::session("resizing the pty", "session is closing"))
    }
}

struct RemoteResources {
    channel: Option<Channel<Msg>>,
    connection: Arc<Connection>,
}

impl RemoteResources {
    fn new(channel: Channel<Msg>, connection: Arc<Connection>) -> Self {
        Self {
            channel: Some(channel),
            connection,
        }
    }
}

#[async_trait]
impl SessionResources for RemoteResources {
    async fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close().await {
                debug!("Closing channel: {}", err);
            }
        }
    }

    async fn close_connection(&mut self) {
        match self.connection.close().await {
            Ok(()) => info!("Disconnected from {}", self.connection.address()),
            Err(err) => debug!("Disconnect from {}: {}", self.connection.address(), err),
        }
    }
}

/// A session past setup. `close` is the only way out and always runs the
/// same teardown: background tasks, channel, local terminal, connection.
pub struct LiveSession<R: SessionResources> {
    resources: R,
    terminal: Option<RawModeGuard>,
    tasks: BackgroundTasks,
}

impl<R: SessionResources> LiveSession<R> {
    pub fn new(resources: R, terminal: Option<RawModeGuard>, tasks: BackgroundTasks) -> Self {
        Self {
            resources,
            terminal,
            tasks,
        }
    }

    pub async fn close(mut self) {
        self.tasks.shutdown().await;
        self.resources.close_channel().await;
        if let Some(terminal) = self.terminal.take() {
            terminal.restore();
        }
        self.resources.close_connection().await;
    }
}
