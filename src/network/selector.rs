//! Reconnection supervisor.
//!
//! The [`Selector`] holds at most one live [`NetworkHandler`]. When the
//! handler closes, the next caller builds a replacement, waiting out the
//! backoff first. Callers that arrive while an attempt is running wait for
//! that attempt and share its outcome instead of starting their own.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::transport::Connector;
use super::{ConnectionContext, NetworkHandler};
use crate::codec::Packet;
use crate::error::{Result, WireError};

/// Builds a fresh handler for each connection attempt.
pub trait HandlerFactory: Send + Sync {
    fn create(&self) -> NetworkHandler;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> NetworkHandler + Send + Sync,
{
    fn create(&self) -> NetworkHandler {
        self()
    }
}

#[derive(Default)]
struct Slot {
    handler: Option<NetworkHandler>,
    last_error: Option<Arc<WireError>>,
}

/// Stable front for a bot's connection.
pub struct Selector {
    ctx: Arc<ConnectionContext>,
    factory: Box<dyn HandlerFactory>,
    slot: Mutex<Slot>,
    /// Completed attempts, for joining an in-flight one.
    generation: AtomicU64,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl Selector {
    /// Selector whose handlers connect through `connector`.
    pub fn new(ctx: Arc<ConnectionContext>, connector: Arc<dyn Connector>) -> Self {
        let factory_ctx = ctx.clone();
        Self::with_factory(ctx, move || NetworkHandler::new(factory_ctx.clone(), connector.clone()))
    }

    pub fn with_factory(ctx: Arc<ConnectionContext>, factory: impl HandlerFactory + 'static) -> Self {
        Self {
            ctx,
            factory: Box::new(factory),
            slot: Mutex::new(Slot::default()),
            generation: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.ctx
    }

    /// Consecutive failed attempts since the last `Ok`.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Handlers created so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The handler currently held, live or not.
    pub async fn current(&self) -> Option<NetworkHandler> {
        self.slot.lock().await.handler.clone()
    }

    /// Return the live handler, or make one connection attempt.
    ///
    /// The attempt is preceded by the backoff delay for the current
    /// failure count. Fails with [`WireError::RetriesExhausted`] once the
    /// configured limit is reached and with [`WireError::Cancelled`] once
    /// the bot is closed.
    pub async fn get_current_instance_or_create(&self) -> Result<NetworkHandler> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if let Some(handler) = &slot.handler {
            if handler.state().is_ok() {
                return Ok(handler.clone());
            }
            // only the slot holder drives an attempt, so anything short of
            // `Ok` here was left behind by a caller that went away
            handler.close();
        }
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(e) = &slot.last_error {
                return Err(WireError::Shared(e.clone()));
            }
        }
        if self.ctx.cancel.is_cancelled() {
            return Err(WireError::Cancelled);
        }

        let failures = self.failures();
        let limit = self.ctx.config.reconnection_retry_times;
        if failures >= limit {
            warn!(uin = self.ctx.uin(), failures, "reconnection retries exhausted");
            return Err(WireError::RetriesExhausted(failures));
        }

        let delay = self.ctx.config.backoff.delay_for(failures);
        if !delay.is_zero() {
            info!(uin = self.ctx.uin(), failures, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(WireError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let handler = self.factory.create();
        slot.handler = Some(handler.clone());
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(uin = self.ctx.uin(), attempt, "connection attempt");

        let result = handler.resume_connection().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        match result {
            Ok(()) => {
                self.failures.store(0, Ordering::Release);
                slot.last_error = None;
                Ok(handler)
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(uin = self.ctx.uin(), attempt, failures, error = %e, "connection attempt failed");
                let shared = share(e);
                slot.last_error = Some(shared.clone());
                Err(WireError::Shared(shared))
            }
        }
    }

    /// Keep attempting until a handler is `Ok` or the failure is not one
    /// a reconnection can cure.
    pub async fn resume_instance(&self) -> Result<NetworkHandler> {
        loop {
            match self.get_current_instance_or_create().await {
                Ok(handler) => return Ok(handler),
                Err(e) if e.is_recoverable() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// [`NetworkHandler::send_and_expect`] on whichever handler is live,
    /// resent on a fresh one if the connection drops underneath it.
    pub async fn send_and_expect(&self, command: &str, payload: Bytes) -> Result<Packet> {
        let attempts = self.ctx.config.request_attempts.max(1);
        let mut attempt = 1;
        loop {
            let handler = self.resume_instance().await?;
            match handler.send_and_expect(command, payload.clone()).await {
                Err(e) if is_resendable(&e) && attempt < attempts => {
                    warn!(command, attempt, error = %e, "resending request");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// [`NetworkHandler::post`] on whichever handler is live.
    pub async fn post(&self, command: &str, payload: Bytes) -> Result<()> {
        let attempts = self.ctx.config.request_attempts.max(1);
        let mut attempt = 1;
        loop {
            let handler = self.resume_instance().await?;
            match handler.post(command, payload.clone()).await {
                Err(e) if is_resendable(&e) && attempt < attempts => attempt += 1,
                result => return result,
            }
        }
    }

    /// Close the bot: cancel every connection and stop reconnecting.
    pub async fn close(&self) {
        self.ctx.cancel.cancel();
        if let Some(handler) = self.slot.lock().await.handler.take() {
            handler.close();
        }
    }
}

fn share(e: WireError) -> Arc<WireError> {
    match e {
        WireError::Shared(inner) => inner,
        other => Arc::new(other),
    }
}

fn is_resendable(e: &WireError) -> bool {
    match e {
        WireError::Timeout { .. } | WireError::NotConnected | WireError::ConnectionClosed(_) => true,
        WireError::Shared(inner) => is_resendable(inner),
        _ => false,
    }
}
