//! Notice pipeline: unsolicited server pushes.
//!
//! The read loop hands each decoded push to a bounded queue and moves on;
//! a separate worker drains the queue into a [`NoticeSink`] in arrival
//! order. When the queue is full the push is dropped and counted, so a
//! slow consumer never stalls the connection.
//!
//! # Example
//!
//! ```ignore
//! let router = NoticeRouter::new()
//!     .on("OnlinePush.ReqPush", |packet| async move {
//!         println!("push: {:?}", packet.raw());
//!         Ok(())
//!     })
//!     .otherwise(|packet| async move {
//!         tracing::debug!(command = %packet.command, "ignored");
//!         Ok(())
//!     });
//!
//! let worker = receiver.spawn(router, cancel.clone());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::CancelToken;
use crate::codec::Packet;
use crate::error::Result;
use crate::protocol::CommandId;
use crate::BoxFuture;

/// Consumer of pushed packets.
pub trait NoticeSink: Send + Sync + 'static {
    fn deliver(&self, packet: Packet) -> BoxFuture<'static, Result<()>>;
}

/// Adapts an async closure into a [`NoticeSink`].
pub struct FnSink<F, Fut>
where
    F: Fn(Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnSink<F, Fut>
where
    F: Fn(Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> NoticeSink for FnSink<F, Fut>
where
    F: Fn(Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn deliver(&self, packet: Packet) -> BoxFuture<'static, Result<()>> {
        Box::pin((self.f)(packet))
    }
}

impl<S: NoticeSink + ?Sized> NoticeSink for Arc<S> {
    fn deliver(&self, packet: Packet) -> BoxFuture<'static, Result<()>> {
        (**self).deliver(packet)
    }
}

/// Routes pushes to a sink per command.
#[derive(Default)]
pub struct NoticeRouter {
    routes: HashMap<CommandId, Box<dyn NoticeSink>>,
    fallback: Option<Box<dyn NoticeSink>>,
}

impl NoticeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle pushes of `command` with `f`.
    pub fn on<F, Fut>(self, command: impl Into<CommandId>, f: F) -> Self
    where
        F: Fn(Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_sink(command, FnSink::new(f))
    }

    pub fn on_sink(mut self, command: impl Into<CommandId>, sink: impl NoticeSink) -> Self {
        self.routes.insert(command.into(), Box::new(sink));
        self
    }

    /// Handle pushes no route matches.
    pub fn otherwise<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.fallback = Some(Box::new(FnSink::new(f)));
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl NoticeSink for NoticeRouter {
    fn deliver(&self, packet: Packet) -> BoxFuture<'static, Result<()>> {
        match self.routes.get(&packet.command).or(self.fallback.as_ref()) {
            Some(sink) => sink.deliver(packet),
            None => {
                debug!(command = %packet.command, "no route for notice");
                Box::pin(async { Ok(()) })
            }
        }
    }
}

/// Create the bounded queue between read loops and the notice worker.
pub fn notice_channel(capacity: usize) -> (NoticeSender, NoticeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        NoticeSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        NoticeReceiver { rx },
    )
}

/// Producer side, shared by every handler of one bot.
#[derive(Debug, Clone)]
pub struct NoticeSender {
    tx: mpsc::Sender<Packet>,
    dropped: Arc<AtomicU64>,
}

impl NoticeSender {
    /// Queue without waiting. Returns false if the push was dropped.
    pub fn offer(&self, packet: Packet) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(packet)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(command = %packet.command, dropped, "notice queue full, dropping push");
                false
            }
            Err(TrySendError::Closed(packet)) => {
                debug!(command = %packet.command, "notice worker gone, dropping push");
                false
            }
        }
    }

    /// Pushes dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct NoticeReceiver {
    rx: mpsc::Receiver<Packet>,
}

impl NoticeReceiver {
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Drain into `sink` on a task until `cancel` fires or every sender is
    /// gone. Packets are delivered one at a time, in order.
    pub fn spawn(mut self, sink: impl NoticeSink, cancel: CancelToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let packet = tokio::select! {
                    _ = cancel.cancelled() => break,
                    p = self.rx.recv() => match p {
                        Some(p) => p,
                        None => break,
                    },
                };
                let command = packet.command.clone();
                if let Err(e) = sink.deliver(packet).await {
                    warn!(%command, error = %e, "notice handler failed");
                }
            }
            debug!("notice worker stopped");
        })
    }
}
