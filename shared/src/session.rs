//! Connection session: handshake, heartbeat and response watchdog
//!
//! A [`Session`] wraps any byte stream and runs two background tasks:
//!
//! - a reader that decodes frames and forwards them, in arrival order, to the driver
//! - the driver, which owns the write half and both timers and is the only
//!   place where the session state changes
//!
//! The application talks to the driver through channels only: outbound
//! messages are queued with [`Session::send`] and inbound messages (including
//! locally synthesised errors with [`Status::Local`]) are pulled with
//! [`Session::recv`]. No timer or I/O failure ever escapes the driver as a
//! panic or error value; every failure is turned into an ERROR message first.
//!
//! The initiator (client) sends `SYN/QUERY`, expects `SYN/ACK` within
//! `max_ping`, then keeps the connection alive with `HELLO/UPDATE` whenever it
//! has been quiet for `hello_interval`. Every send arms the response watchdog,
//! every received message disarms it. The responder (server) answers the
//! handshake and keeps its watchdog permanently armed, resetting it whenever
//! anything arrives.

use crate::codec::{self, FrameError};
use crate::protocol::{CtrlType, ErrorType, InfoType, Message, Status, Subtype};
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle period after which a heartbeat is sent; `None` disables heartbeats
    pub hello_interval: Option<Duration>,
    /// Longest silence tolerated from the peer
    pub max_ping: Duration,
}

impl SessionConfig {
    pub fn initiator(hello_interval: Duration, max_ping: Duration) -> Self {
        Self {
            hello_interval: Some(hello_interval),
            max_ping,
        }
    }

    pub fn responder(max_ping: Duration) -> Self {
        Self {
            hello_interval: None,
            max_ping,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Closed,
    NoConnection,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("peer did not answer in time")]
    Timeout,
    #[error("no connection")]
    NoConnection,
}

impl From<FrameError> for SessionError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => SessionError::Io(e),
            other => SessionError::Handshake(other.to_string()),
        }
    }
}

enum Outbound {
    Message(Message),
    Close,
}

type Frame = Result<Message, FrameError>;

pub struct Session {
    tag: String,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    inbound_rx: mpsc::UnboundedReceiver<Message>,
    state_rx: watch::Receiver<SessionState>,
    driver: Option<JoinHandle<()>>,
}

impl Session {
    /// Opens a session as the initiator: sends `SYN/QUERY` and waits for `SYN/ACK`
    pub async fn connect<S>(
        stream: S,
        config: SessionConfig,
        tag: impl Into<String>,
    ) -> Result<Session, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let tag = tag.into();
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (state_tx, state_rx) = watch::channel(SessionState::Handshaking);

        codec::write_message(&mut writer, &Message::ctrl(CtrlType::Syn, Status::Query)).await?;
        debug!("[{}] SYN sent", tag);

        let answer = match timeout(config.max_ping, codec::read_message(&mut reader)).await {
            Ok(answer) => answer,
            Err(_) => {
                warn!("[{}] handshake timed out", tag);
                abandon_handshake(&state_tx, &mut writer).await;
                return Err(SessionError::Timeout);
            }
        };

        match answer {
            Ok(m) if m.is(Subtype::Ctrl(CtrlType::Syn), Status::Ack) => {}
            Ok(m) => {
                warn!("[{}] unexpected handshake answer {}", tag, m);
                abandon_handshake(&state_tx, &mut writer).await;
                return Err(SessionError::Handshake(format!("peer answered {}", m)));
            }
            Err(e) => {
                warn!("[{}] handshake failed: {}", tag, e);
                abandon_handshake(&state_tx, &mut writer).await;
                return Err(e.into());
            }
        }

        info!("[{}] session established", tag);
        Ok(Self::activate(
            Role::Initiator,
            config,
            tag,
            reader,
            writer,
            state_tx,
            state_rx,
        ))
    }

    /// Accepts a session as the responder: waits for `SYN/QUERY` and answers it
    pub async fn accept<S>(
        stream: S,
        config: SessionConfig,
        tag: impl Into<String>,
    ) -> Result<Session, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let tag = tag.into();
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (state_tx, state_rx) = watch::channel(SessionState::Handshaking);

        let first = match timeout(config.max_ping, codec::read_message(&mut reader)).await {
            Ok(first) => first,
            Err(_) => {
                warn!("[{}] no handshake within {:?}", tag, config.max_ping);
                let _ = codec::write_message(
                    &mut writer,
                    &Message::error(ErrorType::Timeout, Status::Update),
                )
                .await;
                abandon_handshake(&state_tx, &mut writer).await;
                return Err(SessionError::Timeout);
            }
        };

        let failure = match first {
            Ok(m) if m.is(Subtype::Ctrl(CtrlType::Syn), Status::Query) => None,
            Ok(m) => Some(format!("expected SYN, got {}", m)),
            Err(FrameError::ConnectionClosed) => {
                let _ = state_tx.send(SessionState::Closed);
                return Err(SessionError::Handshake(
                    "connection closed before handshake".to_string(),
                ));
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            warn!("[{}] rejecting handshake: {}", tag, reason);
            let _ = codec::write_message(&mut writer, &Message::ctrl(CtrlType::Syn, Status::Nack))
                .await;
            let _ = codec::write_message(
                &mut writer,
                &Message::error(ErrorType::WrongProtocol, Status::Update),
            )
            .await;
            abandon_handshake(&state_tx, &mut writer).await;
            return Err(SessionError::Handshake(reason));
        }

        codec::write_message(&mut writer, &Message::ctrl(CtrlType::Syn, Status::Ack)).await?;
        info!("[{}] session established", tag);

        Ok(Self::activate(
            Role::Responder,
            config,
            tag,
            reader,
            writer,
            state_tx,
            state_rx,
        ))
    }

    fn activate<S>(
        role: Role,
        config: SessionConfig,
        tag: String,
        reader: ReadHalf<S>,
        writer: WriteHalf<S>,
        state_tx: watch::Sender<SessionState>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Session
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(reader, frames_tx));
        let now = Instant::now();

        let driver = Driver {
            tag: tag.clone(),
            role,
            hello_at: config.hello_interval.map(|i| now + i),
            response_by: match role {
                Role::Initiator => None,
                Role::Responder => Some(now + config.max_ping),
            },
            config,
            writer,
            reader,
            frames: frames_rx,
            commands: outbound_rx,
            app_tx: inbound_tx,
            state_tx,
        };
        let _ = driver.state_tx.send(SessionState::Active);

        Session {
            tag,
            outbound_tx,
            inbound_rx,
            state_rx,
            driver: Some(tokio::spawn(driver.run())),
        }
    }

    /// Queues a message for the peer
    pub fn send(&self, message: Message) -> Result<(), SessionError> {
        if self.state() != SessionState::Active {
            return Err(SessionError::NoConnection);
        }
        self.outbound_tx
            .send(Outbound::Message(message))
            .map_err(|_| SessionError::NoConnection)
    }

    /// Next inbound message, or `None` once the session is closed and drained
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbound_rx.recv().await
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Runs the closing sequence and waits for it to finish.
    /// Calling it on a session that is already closed reports `NoConnection`.
    pub async fn disconnect(&mut self) -> DisconnectOutcome {
        let Some(driver) = self.driver.take() else {
            return DisconnectOutcome::NoConnection;
        };

        let already_closed = self.state() == SessionState::Closed;
        let _ = self.outbound_tx.send(Outbound::Close);
        if let Err(e) = driver.await {
            warn!("[{}] session driver failed: {}", self.tag, e);
        }

        if already_closed {
            DisconnectOutcome::NoConnection
        } else {
            DisconnectOutcome::Closed
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.driver.is_some() {
            let _ = self.outbound_tx.send(Outbound::Close);
        }
    }
}

async fn close_transport<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let _ = codec::write_message(writer, &Message::ctrl(CtrlType::Fin, Status::Update)).await;
    let _ = writer.shutdown().await;
}

/// Takes a session that never became active through CLOSING to CLOSED
async fn abandon_handshake<W>(state: &watch::Sender<SessionState>, writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let _ = state.send(SessionState::Closing);
    close_transport(writer).await;
    let _ = state.send(SessionState::Closed);
}

async fn read_loop<R>(mut reader: R, frames: mpsc::UnboundedSender<Frame>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = codec::read_message(&mut reader).await;
        let fatal = matches!(&frame, Err(e) if e.is_fatal());
        if frames.send(frame).is_err() || fatal {
            break;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Step {
    Continue,
    Close,
}

struct Driver<S> {
    tag: String,
    role: Role,
    config: SessionConfig,
    writer: WriteHalf<S>,
    reader: JoinHandle<()>,
    frames: mpsc::UnboundedReceiver<Frame>,
    commands: mpsc::UnboundedReceiver<Outbound>,
    app_tx: mpsc::UnboundedSender<Message>,
    state_tx: watch::Sender<SessionState>,
    hello_at: Option<Instant>,
    response_by: Option<Instant>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                biased;

                frame = self.frames.recv() => match frame {
                    Some(Ok(message)) => self.on_message(message),
                    Some(Err(e)) => self.on_frame_error(e).await,
                    None => {
                        self.forward(Message::local_error(
                            ErrorType::ClosedConnection,
                            "connection closed",
                        ));
                        Step::Close
                    }
                },

                command = self.commands.recv() => match command {
                    Some(Outbound::Message(message)) => self.transmit(message).await,
                    Some(Outbound::Close) | None => Step::Close,
                },

                _ = sleep_until_opt(self.response_by) => {
                    warn!("[{}] peer silent for {:?}", self.tag, self.config.max_ping);
                    let _ = codec::write_message(
                        &mut self.writer,
                        &Message::error(ErrorType::Timeout, Status::Update),
                    )
                    .await;
                    self.forward(Message::local_error(ErrorType::Timeout, "peer timed out"));
                    Step::Close
                }

                _ = sleep_until_opt(self.hello_at) => {
                    debug!("[{}] idle, sending HELLO", self.tag);
                    self.transmit(Message::info(InfoType::Hello, Status::Update)).await
                }
            };

            if let Step::Close = step {
                break;
            }
        }

        self.close().await;
    }

    fn on_message(&mut self, message: Message) -> Step {
        self.response_by = match self.role {
            Role::Initiator => None,
            Role::Responder => Some(Instant::now() + self.config.max_ping),
        };

        if message.is(Subtype::Info(InfoType::Hello), Status::Ack) {
            return Step::Continue;
        }

        debug!("[{}] <- {}", self.tag, message);
        self.forward(message);
        Step::Continue
    }

    async fn on_frame_error(&mut self, e: FrameError) -> Step {
        let error_type = e.error_type();
        if e.is_reportable() {
            let report = Message::error(error_type, Status::Update);
            if let Err(write_err) = codec::write_message(&mut self.writer, &report).await {
                debug!("[{}] cannot report {:?}: {}", self.tag, error_type, write_err);
            }
        }

        self.forward(Message::local_error(error_type, e.to_string()));

        if e.is_fatal() {
            warn!("[{}] closing after {}", self.tag, e);
            Step::Close
        } else {
            warn!("[{}] dropped bad frame: {}", self.tag, e);
            Step::Continue
        }
    }

    async fn transmit(&mut self, message: Message) -> Step {
        if let Err(e) = codec::write_message(&mut self.writer, &message).await {
            warn!("[{}] send failed: {}", self.tag, e);
            self.forward(Message::local_error(
                ErrorType::ClosedConnection,
                e.to_string(),
            ));
            return Step::Close;
        }
        debug!("[{}] -> {}", self.tag, message);

        if self.role == Role::Initiator {
            let now = Instant::now();
            self.hello_at = self.config.hello_interval.map(|i| now + i);
            if self.response_by.is_none() {
                self.response_by = Some(now + self.config.max_ping);
            }
        }
        Step::Continue
    }

    fn forward(&self, message: Message) {
        let _ = self.app_tx.send(message);
    }

    async fn close(mut self) {
        let _ = self.state_tx.send(SessionState::Closing);
        self.hello_at = None;
        self.response_by = None;

        close_transport(&mut self.writer).await;
        self.reader.abort();
        let _ = (&mut self.reader).await;

        let _ = self.state_tx.send(SessionState::Closed);
        info!("[{}] {} session closed", self.tag, self.role);
    }
}
