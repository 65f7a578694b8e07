//! One client connection: handshake, steady-state reads and the output path.
//!
//! Every connection runs two tasks. The reader task drives the state machine
//! (greeting → challenge → login → account resolution → player attach →
//! steady loop) and owns the inbound cursor. The writer task owns the write
//! half and sends queued frames one at a time, in queue order.
//!
//! All other mutable state sits behind a single [`std::sync::Mutex`] that is
//! never held across an `.await` and never taken while another lock is held.
//! Transitions that need other components (session detach, roster removal)
//! are handed off after the lock is released, so `close()` can be called from
//! anywhere, including handlers running on the reader task.

use crate::attach::{self, AttachOutcome, AttachRequest};
use crate::config::OversizePolicy;
use crate::context::ServerContext;
use crate::error::LoginRejection;
use crate::handlers::HandlerContext;
use crate::handshake::{self, Challenge, ProtocolViolation};
use crate::lifecycle::WorldState;
use crate::pool::PooledBuffer;
use crate::session::SessionHandle;
use crate::writer;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use shared::xtea::XteaKey;
use shared::{
    client_opcode, ChecksumMode, IncomingMessage, OutgoingBuffer, GREETING_READ_LEN, MAX_BODY_LEN,
    MAX_LOGIN_BODY_LEN, MAX_OUTGOING_PAYLOAD,
};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub type ConnectionId = u64;

/// Opcodes still honoured while the attached character is dead or removed.
const INACTIVE_ALLOWED: [u8; 2] = [client_opcode::LOGOUT, client_opcode::PING_BACK];

/// Why the reader task stopped.
enum Halt {
    /// Socket error or end of stream.
    Transport(io::Error),
    /// Watchdog expiry or a collaborator that went away.
    Abort(&'static str),
    Violation(ProtocolViolation),
    Rejected(LoginRejection),
    /// The connection was closed by someone else, or closed itself gracefully.
    Closed,
    /// An out-of-bounds frame length under [`OversizePolicy::Drop`].
    Stalled,
}

impl From<ProtocolViolation> for Halt {
    fn from(violation: ProtocolViolation) -> Self {
        Halt::Violation(violation)
    }
}

impl From<LoginRejection> for Halt {
    fn from(rejection: LoginRejection) -> Self {
        Halt::Rejected(rejection)
    }
}

#[derive(Debug, Default)]
pub struct ConnectionStats {
    frames_queued: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ConnectionStats {
    /// Frames handed to the writer task.
    pub fn frames_queued(&self) -> u64 {
        self.frames_queued.load(Ordering::Relaxed)
    }

    /// Frames fully written to the socket.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

struct Inner {
    /// Partially filled buffer not yet queued.
    current: Option<PooledBuffer>,
    /// Sealed frames waiting for the writer; the front one is in flight.
    queue: VecDeque<Bytes>,
    key: Option<XteaKey>,
    checksum_mode: ChecksumMode,
    send_sequence: u32,
    challenge: Option<Challenge>,
    session: Option<SessionHandle>,
    disconnected: bool,
}

pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    inner: Mutex<Inner>,
    /// Mirrors `Inner::disconnected` for lock-free checks.
    disconnected: AtomicBool,
    writable: Notify,
    shutdown: CancellationToken,
    stats: ConnectionStats,
    context: Arc<ServerContext>,
}

impl Connection {
    /// Creates a connection over `stream` and starts its reader and writer tasks.
    pub fn spawn<S>(stream: S, peer: SocketAddr, context: Arc<ServerContext>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Self::new(peer, context);
        let (reader, writer) = tokio::io::split(stream);
        connection.start_writer(writer);
        tokio::spawn(Arc::clone(&connection).read_loop(reader));
        connection
    }

    pub(crate) fn new(peer: SocketAddr, context: Arc<ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            id: context.next_connection_id(),
            peer,
            inner: Mutex::new(Inner {
                current: None,
                queue: VecDeque::new(),
                key: None,
                checksum_mode: ChecksumMode::default(),
                send_sequence: 0,
                challenge: None,
                session: None,
                disconnected: false,
            }),
            disconnected: AtomicBool::new(false),
            writable: Notify::new(),
            shutdown: context.shutdown.child_token(),
            stats: ConnectionStats::default(),
            context,
        })
    }

    pub(crate) fn start_writer<W>(self: &Arc<Self>, writer: W)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        tokio::spawn(Arc::clone(self).write_loop(writer));
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.lock().session.clone()
    }

    pub fn checksum_mode(&self) -> ChecksumMode {
        self.lock().checksum_mode
    }

    /// Frames queued but not yet fully written.
    pub fn pending_frames(&self) -> usize {
        self.lock().queue.len()
    }

    /// Payload bytes in the current, not yet queued buffer.
    pub fn pending_bytes(&self) -> usize {
        self.lock().current.as_ref().map_or(0, |buffer| buffer.len())
    }

    /// Completes when the transport has been shut down.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Records the attached session. Refused once closing has started, since
    /// `close()` has already taken whatever it was going to detach.
    pub(crate) fn set_session(&self, session: SessionHandle) -> bool {
        let mut inner = self.lock();
        if inner.disconnected {
            return false;
        }
        inner.session = Some(session);
        true
    }

    pub(crate) fn install_key(&self, key: XteaKey, mode: ChecksumMode) {
        let mut inner = self.lock();
        inner.key = Some(key);
        inner.checksum_mode = mode;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- output path ----

    /// Appends one serialized message to the current buffer.
    ///
    /// A buffer that cannot take the message is queued first and a fresh one
    /// started. Returns `false` when the connection is closed or the message
    /// can never fit in a frame.
    pub fn enqueue(&self, bytes: &[u8]) -> bool {
        if bytes.len() > MAX_OUTGOING_PAYLOAD {
            warn!(
                "Connection {}: dropping {} byte message larger than a frame",
                self.id,
                bytes.len()
            );
            return false;
        }

        let mut inner = self.lock();
        if inner.disconnected {
            return false;
        }

        if inner.current.as_ref().map_or(false, |buffer| !buffer.fits(bytes.len())) {
            self.finalize_current(&mut inner);
        }

        let pool = &self.context.pool;
        inner.current.get_or_insert_with(|| pool.acquire()).append(bytes)
    }

    /// Seals `buffer` and queues it behind anything already pending.
    pub fn enqueue_buffer(&self, mut buffer: PooledBuffer) -> bool {
        let mut inner = self.lock();
        if inner.disconnected || buffer.is_empty() {
            return false;
        }
        self.finalize_current(&mut inner);
        let frame = Self::seal(&mut inner, &mut buffer);
        self.push_frame(&mut inner, frame);
        true
    }

    /// Queues the current buffer if it holds anything.
    pub fn flush(&self) -> bool {
        let mut inner = self.lock();
        if inner.disconnected {
            return false;
        }
        self.finalize_current(&mut inner)
    }

    fn finalize_current(&self, inner: &mut Inner) -> bool {
        let Some(mut buffer) = inner.current.take() else {
            return false;
        };
        if buffer.is_empty() {
            return false;
        }
        let frame = Self::seal(inner, &mut buffer);
        self.push_frame(inner, frame);
        true
    }

    /// Plain before the key exists, encrypted afterwards.
    fn seal(inner: &mut Inner, buffer: &mut OutgoingBuffer) -> Bytes {
        match inner.key.as_ref() {
            Some(key) => {
                inner.send_sequence = inner.send_sequence.wrapping_add(1);
                buffer.seal_encrypted(key, inner.checksum_mode, inner.send_sequence)
            }
            None => buffer.seal_plain(),
        }
    }

    fn push_frame(&self, inner: &mut Inner, frame: Bytes) {
        let was_idle = inner.queue.is_empty();
        inner.queue.push_back(frame);
        self.stats.frames_queued.fetch_add(1, Ordering::Relaxed);
        if was_idle {
            self.writable.notify_one();
        }
    }

    // ---- closing ----

    /// Stops reading, lets queued frames drain, then shuts the transport down.
    ///
    /// Idempotent. The session back-reference is detached on the game task.
    pub fn close(&self) {
        let session = {
            let mut inner = self.lock();
            if inner.disconnected {
                return;
            }
            self.finalize_current(&mut inner);
            inner.disconnected = true;
            self.disconnected.store(true, Ordering::Release);
            inner.session.take()
        };

        self.writable.notify_one();
        self.context.flush.remove(self.id);

        if let Some(session) = session {
            let id = self.id;
            self.context.dispatcher.add_task(move |game| {
                game.sessions.detach(session.id(), id);
            });
        }
    }

    /// Sends `reason` as a login error, then closes.
    pub fn close_with(&self, reason: &str) {
        if self.is_disconnected() {
            return;
        }
        self.enqueue(&writer::login_error(reason));
        self.close();
    }

    /// Closes and shuts the transport down without waiting for queued frames.
    pub fn close_and_shutdown(&self) {
        self.close();
        self.shutdown.cancel();
    }

    // ---- writer task ----

    async fn write_loop<W>(self: Arc<Self>, mut writer: W)
    where
        W: AsyncWrite + Unpin,
    {
        let write_timeout = self.context.config.write_timeout();

        loop {
            let next = {
                let inner = self.lock();
                match inner.queue.front() {
                    Some(frame) => Some(frame.clone()),
                    None if inner.disconnected => break,
                    None => None,
                }
            };

            let Some(frame) = next else {
                tokio::select! {
                    _ = self.writable.notified() => {}
                    _ = self.shutdown.cancelled() => break,
                }
                continue;
            };

            let result = tokio::select! {
                result = timeout(write_timeout, writer.write_all(&frame)) => result,
                _ = self.shutdown.cancelled() => break,
            };

            match result {
                Ok(Ok(())) => {
                    self.lock().queue.pop_front();
                    self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    debug!("Connection {} write failed: {}", self.id, e);
                    self.close_and_shutdown();
                    break;
                }
                Err(_) => {
                    debug!("Connection {} write timed out", self.id);
                    self.close_and_shutdown();
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
        self.shutdown.cancel();
        trace!("Connection {} writer finished", self.id);
    }

    // ---- reader task ----

    async fn read_loop<R>(self: Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        debug!("Connection {} accepted from {}", self.id, self.peer);

        let halt = tokio::select! {
            halt = self.drive(&mut reader) => halt,
            _ = self.shutdown.cancelled() => Halt::Closed,
        };
        self.finish(halt).await;
    }

    /// Turns the reason the reader stopped into the matching close.
    async fn finish(&self, halt: Halt) {
        match halt {
            Halt::Transport(e) => {
                debug!("Connection {} from {}: {}", self.id, self.peer, e);
                self.close_and_shutdown();
            }
            Halt::Abort(reason) => {
                debug!("Connection {} from {} aborted: {}", self.id, self.peer, reason);
                self.close_and_shutdown();
            }
            Halt::Violation(violation) => {
                debug!("Connection {} from {}: {}", self.id, self.peer, violation);
                self.close_and_shutdown();
            }
            Halt::Rejected(rejection) => {
                let reason = rejection.to_string();
                info!("Login from {} rejected: {}", self.peer, reason.replace('\n', " "));
                self.close_with(&reason);
            }
            Halt::Closed => self.close(),
            Halt::Stalled => {
                // Nothing reads the socket while stalled, so a peer FIN goes
                // unnoticed until the watchdog fires.
                trace!(
                    "Connection {} stopped reading, closing in {:?}",
                    self.id,
                    self.context.config.read_timeout()
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.context.config.read_timeout()) => {}
                    _ = self.shutdown.cancelled() => {}
                }
                self.close_and_shutdown();
            }
        }
    }

    async fn drive<R>(self: &Arc<Self>, reader: &mut R) -> Halt
    where
        R: AsyncRead + Unpin,
    {
        let mut msg = IncomingMessage::new();
        if let Err(halt) = self.handshake(reader, &mut msg).await {
            return halt;
        }
        self.steady(reader, &mut msg).await
    }

    fn ensure_open(&self) -> Result<(), Halt> {
        if self.is_disconnected() {
            Err(Halt::Closed)
        } else {
            Ok(())
        }
    }

    async fn handshake<R>(self: &Arc<Self>, reader: &mut R, msg: &mut IncomingMessage) -> Result<(), Halt>
    where
        R: AsyncRead + Unpin,
    {
        let config = Arc::clone(&self.context.config);

        // Greeting: one read, no watchdog.
        let n = reader
            .read(&mut msg.body_region_mut()[..GREETING_READ_LEN])
            .await
            .map_err(Halt::Transport)?;
        if n == 0 {
            return Err(Halt::Transport(io::ErrorKind::UnexpectedEof.into()));
        }
        self.ensure_open()?;
        let world_name = handshake::read_greeting(msg, n)?;
        trace!("Connection {} greeted world {:?}", self.id, world_name);

        let challenge = Challenge::generate();
        self.lock().challenge = Some(challenge);
        self.enqueue(&writer::challenge(challenge.timestamp, challenge.random_number));
        self.flush();

        msg.reset();
        read_exact_within(reader, msg.header_mut(), None, "login header").await?;
        self.ensure_open()?;
        let len = msg.header_len();
        if len == 0 || usize::from(len) > MAX_LOGIN_BODY_LEN {
            return Err(ProtocolViolation::LoginLength(len).into());
        }
        msg.truncate(usize::from(len));
        read_exact_within(reader, msg.body_mut(), Some(config.login_timeout()), "login body").await?;
        self.ensure_open()?;

        let prelude = handshake::read_prelude(msg, &self.context.rsa)?;
        self.install_key(prelude.key, config.checksum.mode_for(prelude.os, prelude.version));
        if config.checksum.is_extended_client(prelude.os) {
            self.enqueue(&writer::extended_opcode_announcement());
        }

        if !config.accepts_version(prelude.version) {
            return Err(LoginRejection::UnsupportedVersion(config.version_label()).into());
        }

        let credentials = handshake::read_credentials(msg, prelude.os)?;
        let issued = self.lock().challenge.take();
        if issued != Some(credentials.challenge) {
            return Err(ProtocolViolation::ChallengeMismatch.into());
        }

        match self.context.lifecycle.get() {
            WorldState::Startup => return Err(LoginRejection::StartingUp.into()),
            WorldState::Maintain => return Err(LoginRejection::Maintenance.into()),
            _ => {}
        }

        let store = Arc::clone(&self.context.store);
        let ip = self.peer.ip();
        if let Some(ban) = store.ip_ban(ip).await {
            return Err(LoginRejection::ip_banned(&ban).into());
        }

        let record = store
            .resolve_session(&credentials.session_token, &credentials.character_name)
            .await
            .filter(|record| record.account_id != 0)
            .ok_or(LoginRejection::InvalidCredentials)?;
        if !record.authorized_ip.is_loopback() && record.authorized_ip != ip {
            return Err(LoginRejection::SessionIpMismatch.into());
        }

        let request = AttachRequest {
            connection: Arc::clone(self),
            account_id: record.account_id,
            character_id: record.character_id,
            os: prelude.os,
            character: store.load_character(record.character_id).await,
            namelocked: store.is_namelocked(record.character_id).await,
            account_ban: store.account_ban(record.account_id).await,
        };

        match attach::request_attach(&self.context.dispatcher, request).await {
            Some(AttachOutcome::Attached(session)) => {
                info!(
                    "{} logged in from {} (session {})",
                    credentials.character_name,
                    self.peer,
                    session.id()
                );
            }
            Some(AttachOutcome::WaitingList { slot, retry_seconds }) => {
                info!(
                    "{} is at place {} on the waiting list",
                    credentials.character_name, slot
                );
                self.enqueue(&writer::waiting_list(slot, retry_seconds));
                self.close();
                return Err(Halt::Closed);
            }
            Some(AttachOutcome::Rejected(rejection)) => return Err(rejection.into()),
            Some(AttachOutcome::Abandoned) => return Err(Halt::Closed),
            None => return Err(Halt::Abort("game dispatcher stopped")),
        }

        self.ensure_open()?;
        self.enqueue(&writer::enter_world());
        self.flush();
        self.context.flush.add(self);
        Ok(())
    }

    async fn steady<R>(self: &Arc<Self>, reader: &mut R, msg: &mut IncomingMessage) -> Halt
    where
        R: AsyncRead + Unpin,
    {
        let read_timeout = self.context.config.read_timeout();

        loop {
            msg.reset();
            if let Err(halt) = read_exact_within(reader, msg.header_mut(), Some(read_timeout), "frame header").await {
                return halt;
            }
            if self.is_disconnected() {
                return Halt::Closed;
            }

            let len = msg.header_len();
            if len == 0 || usize::from(len) > MAX_BODY_LEN {
                return match self.context.config.oversize_frame_policy {
                    OversizePolicy::Drop => Halt::Stalled,
                    OversizePolicy::Close => ProtocolViolation::FrameLength(len).into(),
                };
            }

            msg.truncate(usize::from(len));
            if let Err(halt) = read_exact_within(reader, msg.body_mut(), Some(read_timeout), "frame body").await {
                return halt;
            }
            if self.is_disconnected() {
                return Halt::Closed;
            }

            if let ControlFlow::Break(halt) = self.handle_frame(msg) {
                return halt;
            }
        }
    }

    /// Processes one steady-state frame. Malformed frames are dropped.
    fn handle_frame(self: &Arc<Self>, msg: &mut IncomingMessage) -> ControlFlow<Halt> {
        let checksum = msg.get::<u32>();
        let (key, mode, session) = {
            let inner = self.lock();
            (inner.key.clone(), inner.checksum_mode, inner.session.clone())
        };

        if checksum == 0 && mode.requires_nonzero() {
            trace!("Connection {}: dropped frame with zero checksum", self.id);
            return ControlFlow::Continue(());
        }

        let Some(key) = key else {
            return ControlFlow::Continue(());
        };
        if !msg.decrypt(&key) {
            trace!("Connection {}: dropped undecryptable frame of {} bytes", self.id, msg.len());
            return ControlFlow::Continue(());
        }

        let opcode = msg.get::<u8>();

        let Some(session) = session else {
            if opcode == client_opcode::DISCONNECT {
                self.close();
                return ControlFlow::Break(Halt::Closed);
            }
            return ControlFlow::Continue(());
        };

        if session.is_inactive() {
            if opcode == client_opcode::DISCONNECT {
                self.close();
                return ControlFlow::Break(Halt::Closed);
            }
            if !INACTIVE_ALLOWED.contains(&opcode) {
                trace!("Connection {}: ignored opcode {:#04x} from inactive session", self.id, opcode);
                return ControlFlow::Continue(());
            }
        }

        let ctx = HandlerContext {
            connection: self,
            session: &session,
            dispatcher: &self.context.dispatcher,
        };
        if !self.context.handlers.dispatch(opcode, msg, &ctx) {
            trace!("Connection {}: no handler for opcode {:#04x}", self.id, opcode);
        }

        if self.is_disconnected() {
            ControlFlow::Break(Halt::Closed)
        } else {
            ControlFlow::Continue(())
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

async fn read_exact_within<R>(
    reader: &mut R,
    buf: &mut [u8],
    limit: Option<Duration>,
    phase: &'static str,
) -> Result<(), Halt>
where
    R: AsyncRead + Unpin,
{
    let result = match limit {
        Some(limit) => timeout(limit, reader.read_exact(buf))
            .await
            .map_err(|_| Halt::Abort(phase))?,
        None => reader.read_exact(buf).await,
    };
    result.map(|_| ()).map_err(Halt::Transport)
}
