//! The per-connection dispatch loop.
//!
//! A connection runs two units of work. The reader waits for frames, bounded
//! by the connection deadline, and hands each frame over a bounded channel to
//! the dispatch task, which decodes it, calls the handler and writes any
//! reply. The deadline starts at the heartbeat window and is pushed out by
//! the session window whenever bytes arrive and after every dispatch, so the
//! heartbeat only governs a connection that never delivered anything.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use log::{debug, error, info, warn};
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{self, Instant};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::codec::{FrameCodec, FrameReader};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::server::Handler;

const HANDOFF_CAPACITY: usize = 4;
pub(crate) const TRANSIENT_BACKOFF: Duration = Duration::from_millis(5);

/// Addresses of the two ends of a connection, when the transport has them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Peer {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_addr {
            Some(addr) => write!(f, "{}", addr),
            None => f.write_str("<unknown peer>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for bytes.
    Idle,
    /// At least one frame has been received and not yet fully dispatched.
    Dispatching,
    Closed,
}

/// Connection state shared by the reader and the dispatch task.
///
/// Transitions are published on a watch channel so callers can follow the
/// connection through `Connection::watch_state`.
#[derive(Debug)]
struct Session {
    state: watch::Sender<State>,
    deadline: Instant,
    in_flight: usize,
    window: Duration,
}

impl Session {
    fn new(config: &Config) -> Session {
        let (state, _) = watch::channel(State::Idle);
        Session {
            state,
            deadline: Instant::now() + config.heartbeat,
            in_flight: 0,
            window: config.session,
        }
    }

    fn state(&self) -> State {
        *self.state.borrow()
    }

    fn set_state(&self, state: State) {
        if self.state() != state {
            self.state.send_replace(state);
        }
    }

    /// Bytes arrived, possibly only part of a frame.
    fn touch(&mut self) {
        self.deadline = Instant::now() + self.window;
    }

    fn received(&mut self) {
        self.in_flight += 1;
        self.set_state(State::Dispatching);
        self.touch();
    }

    fn dispatched(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.touch();
        if self.in_flight == 0 && self.state() == State::Dispatching {
            self.set_state(State::Idle);
        }
    }

    /// Called when the reader's wait reaches the deadline it last saw.
    /// Returns true when the connection has to be closed.
    fn expire(&mut self) -> bool {
        match self.state() {
            State::Closed => true,
            State::Dispatching => {
                // processing is not bounded by the window
                self.touch();
                false
            }
            State::Idle if Instant::now() < self.deadline => false,
            State::Idle => {
                self.set_state(State::Closed);
                true
            }
        }
    }
}

pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

type Writer<T> = Arc<Mutex<FramedWrite<WriteHalf<T>, FrameCodec>>>;

/// One transport stream bound to the dispatch loop.
pub struct Connection<T> {
    reader: FrameReader<ReadHalf<T>>,
    writer: Writer<T>,
    session: Arc<Mutex<Session>>,
    state: watch::Receiver<State>,
    peer: Peer,
    max_packet_size: usize,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: T, peer: Peer, config: &Config) -> Connection<T> {
        let (read_half, write_half) = io::split(stream);
        let max_packet_size = config.frame_limit();
        let session = Session::new(config);
        let state = session.state.subscribe();
        Connection {
            reader: FrameReader::new(read_half, max_packet_size),
            writer: Arc::new(Mutex::new(FramedWrite::new(
                write_half,
                FrameCodec::new(max_packet_size),
            ))),
            session: Arc::new(Mutex::new(session)),
            state,
            peer,
            max_packet_size,
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Follows the connection's state; the last value seen after `run`
    /// returns is `State::Closed`.
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    /// Runs the connection until it closes.
    ///
    /// Returns `Ok(())` when the peer closes the stream or the connection
    /// stays silent past its deadline, and the error otherwise.
    pub async fn run<H: Handler>(self, handler: Arc<H>) -> Result<()> {
        let Connection {
            reader,
            writer,
            session,
            peer,
            max_packet_size,
            ..
        } = self;

        info!("serving {}", peer);

        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let cancel = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch(
            rx,
            handler,
            peer,
            writer.clone(),
            session.clone(),
            cancel.clone(),
            max_packet_size,
        ));

        let read_result = read_loop(reader, tx, &session, &peer, &cancel).await;
        if read_result.is_err() {
            cancel.cancel();
        }

        let dispatch_result = match dispatcher.await {
            Ok(result) => result,
            Err(e) => Err(Error::Dispatch(e.to_string())),
        };

        session.lock().await.set_state(State::Closed);
        if let Err(e) = writer.lock().await.get_mut().shutdown().await {
            debug!("shutdown of {} failed: {}", peer, e);
        }
        info!("closed {}", peer);

        read_result.and(dispatch_result)
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    tx: mpsc::Sender<BytesMut>,
    session: &Mutex<Session>,
    peer: &Peer,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        match reader.buffered_frame() {
            Ok(Some(frame)) => {
                session.lock().await.received();
                if tx.send(frame).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!("unreadable frame from {}: {}", peer, e);
                return Err(e.into());
            }
        }

        let deadline = session.lock().await.deadline;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(()),

            read = reader.fill() => match read {
                Ok(0) => {
                    debug!("{} closed the stream", peer);
                    return Ok(());
                }
                Ok(_) => session.lock().await.touch(),
                Err(e) if is_transient(&e) => {
                    debug!("transient read error from {}: {}", peer, e);
                    time::sleep(TRANSIENT_BACKOFF).await;
                }
                Err(e) => {
                    error!("read from {} failed: {}", peer, e);
                    return Err(e.into());
                }
            },

            _ = time::sleep_until(deadline) => {
                if session.lock().await.expire() {
                    info!("{} idle past its deadline", peer);
                    return Ok(());
                }
            }
        }
    }
}

async fn dispatch<H: Handler, T: AsyncWrite>(
    mut rx: mpsc::Receiver<BytesMut>,
    handler: Arc<H>,
    peer: Peer,
    writer: Writer<T>,
    session: Arc<Mutex<Session>>,
    cancel: CancellationToken,
    max_packet_size: usize,
) -> Result<()> {
    // wakes the reader if this task ends first, including by panic
    let _cancel_on_exit = cancel.clone().drop_guard();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        let result = dispatch_frame(&frame, handler.as_ref(), &peer, &writer, max_packet_size).await;
        session.lock().await.dispatched();
        if let Err(e) = result {
            error!("write to {} failed: {}", peer, e);
            return Err(e.into());
        }
    }
}

async fn dispatch_frame<H: Handler, T: AsyncWrite>(
    frame: &[u8],
    handler: &H,
    peer: &Peer,
    writer: &Writer<T>,
    max_packet_size: usize,
) -> io::Result<()> {
    let request = match Message::decode(frame) {
        Ok(request) => request,
        Err(e) => {
            warn!("dropping malformed message from {}: {}", peer, e);
            return Ok(());
        }
    };

    debug!(
        "{} {:?} {} id {} from {}",
        request.code, request.message_type, request.path_string(), request.message_id, peer
    );

    let Some(reply) = handler.handle(peer, request) else {
        return Ok(());
    };

    let bytes = match reply.encode() {
        Ok(bytes) if bytes.len() <= max_packet_size => Bytes::from(bytes),
        Ok(bytes) => {
            warn!("dropping reply of {} bytes to {}: over the packet limit", bytes.len(), peer);
            return Ok(());
        }
        Err(e) => {
            warn!("dropping unencodable reply to {}: {}", peer, e);
            return Ok(());
        }
    };

    let mut writer = writer.lock().await;
    write_frame(&mut writer, bytes).await
}

/// Writes one frame, retrying transient failures without writing any byte twice.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut FramedWrite<W, FrameCodec>,
    frame: Bytes,
) -> io::Result<()> {
    // a failed feed has not buffered the frame, so it can be fed again
    loop {
        match writer.feed(frame.clone()).await {
            Ok(()) => break,
            Err(e) if is_transient(&e) => time::sleep(TRANSIENT_BACKOFF).await,
            Err(e) => return Err(e),
        }
    }
    // a failed flush keeps the unwritten bytes buffered
    loop {
        match writer.flush().await {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => time::sleep(TRANSIENT_BACKOFF).await,
            Err(e) => return Err(e),
        }
    }
}
