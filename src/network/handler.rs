//! The connection state machine.
//!
//! A [`NetworkHandler`] owns one transport for its whole life:
//! 1. Connect through the [`Connector`]
//! 2. Spawn the writer task and the read loop
//! 3. Log in and register through the [`SsoProcessor`](crate::auth::SsoProcessor)
//! 4. Serve requests and forward pushes until closed
//!
//! It is single-use. Once `Closed`, the [`Selector`](super::Selector)
//! replaces it with a new one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::heartbeat;
use super::transport::{BoxedStream, Connector};
use super::{CancelToken, ConnectionContext, ConnectionState};
use crate::auth::PacketChannel;
use crate::codec::Packet;
use crate::error::{AuthError, Result, WireError};
use crate::protocol::{CommandId, EncryptionMode, FrameBuffer, IncomingPacket, OutgoingPacket, SequenceAllocator};
use crate::writer::{spawn_writer_task, WriterHandle};
use crate::BoxFuture;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub(super) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct PendingRequest {
    command: CommandId,
    reply: oneshot::Sender<Result<IncomingPacket>>,
}

pub(super) struct Inner {
    ctx: Arc<ConnectionContext>,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    sequence: SequenceAllocator,
    pending: Mutex<HashMap<u32, PendingRequest>>,
    writer: Mutex<Option<WriterHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancelToken,
    started: AtomicBool,
}

/// One connection to the server.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct NetworkHandler {
    inner: Arc<Inner>,
}

impl NetworkHandler {
    pub fn new(ctx: Arc<ConnectionContext>, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Initialized);
        let cancel = ctx.cancel.child();
        Self {
            inner: Arc::new(Inner {
                ctx,
                connector,
                state,
                sequence: SequenceAllocator::new(),
                pending: Mutex::new(HashMap::new()),
                writer: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                cancel,
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.inner.ctx
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().is_closed()
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Drive the handler from `Initialized` to `Ok`.
    ///
    /// Only the first call does the work; later calls wait for it to
    /// settle. Any failure closes the handler.
    pub async fn resume_connection(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return self.settled().await;
        }
        if !self.inner.transition(ConnectionState::Connecting) {
            return Err(self.inner.closed_error());
        }

        let mut abandoned = AbandonGuard {
            inner: &self.inner,
            armed: true,
        };
        let result = tokio::select! {
            r = self.establish() => r,
            _ = self.inner.cancel.cancelled() => Err(WireError::Cancelled),
        };
        abandoned.armed = false;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.close(Some(e));
                Err(self.inner.closed_error())
            }
        }
    }

    async fn settled(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let ok = rx
            .wait_for(|s| s.is_ok() || s.is_closed())
            .await
            .map(|s| s.is_ok())
            .unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(self.inner.closed_error())
        }
    }

    async fn establish(&self) -> Result<()> {
        let inner = &self.inner;
        let config = &inner.ctx.config;

        let stream = inner.connector.connect().await?;
        let (reader, writer) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(writer, config.writer.clone());
        *lock(&inner.writer) = Some(writer);
        inner.track(tokio::spawn(read_loop(
            Arc::downgrade(inner),
            reader,
            inner.cancel.clone(),
            config.max_frame_size,
        )));
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            let outcome = match writer_task.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(e) => WireError::ConnectionClosed(format!("writer task failed: {}", e)),
            };
            if let Some(inner) = weak.upgrade() {
                inner.close(Some(outcome));
            }
        });

        if !inner.transition(ConnectionState::LoadingSession {
            started_at: Instant::now(),
        }) {
            return Err(inner.closed_error());
        }

        let channel = LoginChannel(inner);
        inner.ctx.processor.login(&channel).await?;
        inner.ctx.processor.register_online(&channel).await?;

        if !inner.transition(ConnectionState::Ok) {
            return Err(inner.closed_error());
        }
        if config.heartbeat_enabled {
            for job in heartbeat::jobs(config) {
                inner.track(heartbeat::spawn(
                    Arc::downgrade(inner),
                    job,
                    config.heartbeat_timeout,
                    inner.cancel.clone(),
                ));
            }
        }
        Ok(())
    }

    fn ensure_ok(&self) -> Result<()> {
        if self.inner.state.borrow().is_ok() {
            Ok(())
        } else {
            Err(WireError::NotConnected)
        }
    }

    /// Send `payload` under the session key and wait for the reply.
    pub async fn send_and_expect(&self, command: &str, payload: Bytes) -> Result<Packet> {
        let timeout = self.inner.ctx.config.request_timeout;
        self.send_and_expect_as(command, EncryptionMode::SessionKey, payload, timeout)
            .await
    }

    /// [`send_and_expect`](Self::send_and_expect) with an explicit mode
    /// and timeout.
    ///
    /// A timeout fails only this request; the connection stays up.
    pub async fn send_and_expect_as(
        &self,
        command: &str,
        mode: EncryptionMode,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Packet> {
        self.ensure_ok()?;
        let reply = self.inner.roundtrip(command, mode, payload, timeout).await?;
        let packet = self.inner.ctx.codecs.decode(&reply)?;
        if packet.return_code != 0 {
            return Err(WireError::ServerCode {
                command: command.to_string(),
                code: packet.return_code,
            });
        }
        Ok(packet)
    }

    /// Send without waiting for a reply.
    pub async fn post(&self, command: &str, payload: Bytes) -> Result<()> {
        self.ensure_ok()?;
        let seq = self.inner.next_sequence()?;
        self.inner
            .send_frame(command, EncryptionMode::SessionKey, seq, payload)
            .await
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.inner.close(None);
    }

    /// Close with a cause visible to state observers.
    pub fn close_with(&self, cause: WireError) {
        self.inner.close(Some(cause));
    }
}

impl fmt::Debug for NetworkHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkHandler")
            .field("uin", &self.inner.ctx.uin())
            .field("state", &self.inner.state.borrow().name())
            .finish()
    }
}

impl Inner {
    fn uin(&self) -> i64 {
        self.ctx.uin()
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let to = next.name();
        let mut from = "";
        let changed = self.state.send_if_modified(|s| {
            if s.can_transition_to(&next) {
                from = s.name();
                *s = next;
                true
            } else {
                false
            }
        });
        if changed {
            info!(uin = self.uin(), from, to, "connection state changed");
        }
        changed
    }

    fn track(&self, task: JoinHandle<()>) {
        if self.state.borrow().is_closed() {
            task.abort();
        } else {
            lock(&self.tasks).push(task);
        }
    }

    fn closed_error(&self) -> WireError {
        match self.state.borrow().cause() {
            Some(cause) => WireError::Shared(cause.clone()),
            None => WireError::ConnectionClosed("handler closed".into()),
        }
    }

    pub(super) fn close(&self, cause: Option<WireError>) {
        let cause = cause.map(Arc::new);
        let closed = ConnectionState::Closed {
            cause: cause.clone(),
        };
        let mut from = "";
        let changed = self.state.send_if_modified(|s| {
            if s.is_closed() {
                return false;
            }
            from = s.name();
            *s = closed;
            true
        });
        if !changed {
            return;
        }

        match &cause {
            Some(c) if c.is_recoverable() => warn!(uin = self.uin(), from, cause = %c, "connection closed"),
            Some(c) if !matches!(**c, WireError::Cancelled) => {
                error!(uin = self.uin(), from, cause = %c, "connection closed")
            }
            _ => info!(uin = self.uin(), from, "connection closed"),
        }

        self.cancel.cancel();
        // dropping the last handle lets the writer flush and shut down
        lock(&self.writer).take();

        let reason = cause
            .as_ref()
            .map_or_else(|| "handler closed".to_string(), |c| c.to_string());
        let pending: Vec<_> = lock(&self.pending).drain().collect();
        for (_, request) in pending {
            let _ = request
                .reply
                .send(Err(WireError::ConnectionClosed(reason.clone())));
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    fn next_sequence(&self) -> Result<u32> {
        let pending = lock(&self.pending);
        self.sequence
            .allocate(|id| pending.contains_key(&id))
            .ok_or_else(|| WireError::Protocol("no free sequence id".into()))
    }

    async fn send_frame(&self, command: &str, mode: EncryptionMode, seq: u32, payload: Bytes) -> Result<()> {
        let key = self.ctx.keys.key_for(mode);
        let packet = OutgoingPacket::new(command, seq, mode, payload).with_sender(self.uin().to_string());
        let frame = self.ctx.layout.encode(&packet, key.as_ref())?;
        let writer = lock(&self.writer).clone().ok_or(WireError::NotConnected)?;
        writer.send(frame).await
    }

    pub(super) async fn roundtrip(
        &self,
        command: &str,
        mode: EncryptionMode,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<IncomingPacket> {
        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut pending = lock(&self.pending);
            let seq = self
                .sequence
                .allocate(|id| pending.contains_key(&id))
                .ok_or_else(|| WireError::Protocol("no free sequence id".into()))?;
            pending.insert(
                seq,
                PendingRequest {
                    command: CommandId::from(command),
                    reply: tx,
                },
            );
            seq
        };
        let _guard = PendingGuard { inner: self, seq };

        self.send_frame(command, mode, seq, payload).await?;
        debug!(command, seq, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WireError::ConnectionClosed("request abandoned".into())),
            Err(_) => {
                warn!(command, seq, "request timed out");
                Err(WireError::Timeout {
                    command: command.to_string(),
                    sequence_id: seq,
                })
            }
        }
    }

    /// Handle one complete frame. Errors are fatal to the connection.
    fn on_frame(&self, raw: Bytes) -> Result<()> {
        let frame = self.ctx.layout.split(raw)?;
        let seq = frame.sequence_id();
        let key = self.ctx.keys.key_for(frame.encryption());
        let incoming = match self.ctx.layout.open(frame, key.as_ref()) {
            Ok(p) => p,
            Err(WireError::Crypto(e)) if self.state.borrow().is_pending() => {
                // while logging in, a reply sealed with the wrong key fails the handshake
                match lock(&self.pending).remove(&seq) {
                    Some(request) => {
                        warn!(seq, command = %request.command, error = %e, "handshake reply cannot be opened");
                        let _ = request.reply.send(Err(AuthError::Handshake(e).into()));
                    }
                    None => warn!(seq, error = %e, "dropping undecodable frame"),
                }
                return Ok(());
            }
            Err(e) => {
                warn!(seq, error = %e, "dropping undecodable frame");
                return Ok(());
            }
        };
        if incoming.is_session_expired() {
            return Err(WireError::SessionExpired);
        }

        let waiter = {
            let mut pending = lock(&self.pending);
            match pending.get(&seq) {
                Some(p) if p.command == incoming.command => pending.remove(&seq),
                _ => None,
            }
        };
        match waiter {
            Some(request) => {
                debug!(command = %incoming.command, seq, "response received");
                let _ = request.reply.send(Ok(incoming));
            }
            None => self.dispatch_notice(incoming),
        }
        Ok(())
    }

    fn dispatch_notice(&self, incoming: IncomingPacket) {
        match self.ctx.codecs.decode(&incoming) {
            Ok(packet) => {
                debug!(command = %packet.command, seq = packet.sequence_id, "push received");
                self.ctx.notices.offer(packet);
            }
            Err(e) => warn!(command = %incoming.command, error = %e, "dropping undecodable push"),
        }
    }
}

/// Closes a handler whose establishing future was dropped mid-attempt, so
/// it never lingers in a pending state.
struct AbandonGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.close(Some(WireError::Cancelled));
        }
    }
}

/// Drops a pending entry whose caller went away.
struct PendingGuard<'a> {
    inner: &'a Inner,
    seq: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.inner.pending);
        if pending
            .get(&self.seq)
            .map_or(false, |p| p.reply.is_closed())
        {
            pending.remove(&self.seq);
        }
    }
}

async fn read_loop(
    handle: Weak<Inner>,
    mut reader: ReadHalf<BoxedStream>,
    cancel: CancelToken,
    max_frame_size: usize,
) {
    let mut frames = FrameBuffer::with_max_frame(max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(inner) = handle.upgrade() {
                    inner.close(Some(WireError::Cancelled));
                }
                return;
            }
            r = reader.read(&mut buf) => r,
        };
        let Some(inner) = handle.upgrade() else {
            return;
        };

        let n = match read {
            Ok(0) => {
                inner.close(Some(WireError::ConnectionClosed(
                    "server closed the connection".into(),
                )));
                return;
            }
            Ok(n) => n,
            Err(e) => {
                inner.close(Some(WireError::Io(e)));
                return;
            }
        };
        let complete = match frames.push(&buf[..n]) {
            Ok(f) => f,
            Err(e) => {
                inner.close(Some(e));
                return;
            }
        };
        for frame in complete {
            if let Err(e) = inner.on_frame(frame) {
                inner.close(Some(e));
                return;
            }
        }
    }
}

/// Login-time request path: works before `Ok` and turns non-zero return
/// codes into errors.
struct LoginChannel<'a>(&'a Inner);

impl PacketChannel for LoginChannel<'_> {
    fn request(
        &self,
        command: &'static str,
        mode: EncryptionMode,
        payload: Bytes,
    ) -> BoxFuture<'_, Result<IncomingPacket>> {
        Box::pin(async move {
            let timeout = self.0.ctx.config.request_timeout;
            let reply = self.0.roundtrip(command, mode, payload, timeout).await?;
            if !reply.is_ok() {
                return Err(WireError::ServerCode {
                    command: command.to_string(),
                    code: reply.return_code,
                });
            }
            Ok(reply)
        })
    }

    fn post(&self, command: &'static str, mode: EncryptionMode, payload: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let seq = self.0.next_sequence()?;
            self.0.send_frame(command, mode, seq, payload).await
        })
    }
}

impl NetworkHandler {
    /// Report offline and close.
    pub async fn logout(&self) -> Result<()> {
        self.ensure_ok()?;
        let result = self
            .inner
            .ctx
            .processor
            .logout(&LoginChannel(&self.inner))
            .await;
        self.close();
        result
    }
}
