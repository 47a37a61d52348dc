//! Hierarchical cancellation.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::BoxFuture;

struct Node {
    fired: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

/// A cloneable cancellation signal.
///
/// Cancelling a token cancels every child made from it; cancelling a child
/// leaves the parent alone. The session owner holds the root, each
/// connection gets a child.
#[derive(Clone)]
pub struct CancelToken {
    node: Arc<Node>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelToken>) -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            node: Arc::new(Node { fired, parent }),
        }
    }

    /// A token cancelled together with `self`.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    pub fn cancel(&self) {
        self.node.fired.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.node.fired.borrow() || self.node.parent.as_ref().map_or(false, |p| p.is_cancelled())
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut own = self.node.fired.subscribe();
            match &self.node.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = fired(&mut own) => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => fired(&mut own).await,
            }
        })
    }
}

async fn fired(rx: &mut watch::Receiver<bool>) {
    // the sender lives as long as the token, so this only ends on `true`
    let _ = rx.wait_for(|c| *c).await;
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
