//! Connection lifecycle.
//!
//! ## Layers
//!
//! - [`Connector`]: opens a byte stream ([`TcpConnector`] in production)
//! - [`NetworkHandler`]: one connection, from connect through login to
//!   close; single use
//! - [`Selector`]: keeps a live handler around, replacing closed ones with
//!   backoff
//!
//! Unsolicited pushes leave the read loop through a bounded queue and reach
//! the application via a [`NoticeSink`] running on its own task.
//!
//! ## Example
//!
//! ```ignore
//! let (ctx, notices) = ConnectionContext::builder(config, account).build();
//! notices.spawn(NoticeRouter::new().otherwise(on_push), ctx.cancel.clone());
//!
//! let selector = Selector::new(ctx, Arc::new(TcpConnector::new(servers)));
//! let reply = selector.send_and_expect("OidbSvc.0x5eb_22", payload).await?;
//! ```

mod cancel;
mod context;
#[cfg(test)]
mod fake;
mod handler;
mod heartbeat;
mod notice;
mod selector;
mod state;
mod transport;

pub use cancel::CancelToken;
pub use context::{ConnectionContext, ContextBuilder};
pub use handler::NetworkHandler;
pub use heartbeat::CMD_STAT_HEARTBEAT;
pub use notice::{notice_channel, FnSink, NoticeReceiver, NoticeRouter, NoticeSender, NoticeSink};
pub use selector::{HandlerFactory, Selector};
pub use state::ConnectionState;
pub use transport::{AsyncStream, BoxedStream, Connector, TcpConnector, DEFAULT_CONNECT_TIMEOUT};
