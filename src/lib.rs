//! # sso-wire
//!
//! Protocol engine for an SSO-style mobile IM client.
//!
//! The crate turns a TCP stream into a logged-in, self-healing session:
//! frames are TEA-sealed and length prefixed, payloads are Tars structs,
//! and the login handshake negotiates keys over ECDH before walking the
//! server through captcha, SMS and device-lock challenges.
//!
//! ## Architecture
//!
//! - **Codec**: [`tars`] (tagged binary values), [`crypto`] (TEA, MD5,
//!   x25519) and [`protocol`] (SSO frame layout)
//! - **Login**: [`auth::SsoProcessor`] drives the handshake over whatever
//!   connection is loading
//! - **Connection**: [`network::NetworkHandler`] owns one transport;
//!   [`network::Selector`] replaces it when it dies
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sso_wire::auth::BotAccount;
//! use sso_wire::network::{ConnectionContext, Selector, TcpConnector};
//! use sso_wire::BotConfiguration;
//!
//! #[tokio::main]
//! async fn main() -> sso_wire::Result<()> {
//!     let account = BotAccount::with_password(12345678, "secret");
//!     let (ctx, _notices) = ConnectionContext::builder(BotConfiguration::default(), account).build();
//!     let selector = Selector::new(ctx, Arc::new(TcpConnector::new(["msfwifi.3g.qq.com:8080"])));
//!
//!     let handler = selector.resume_instance().await?;
//!     println!("online: {:?}", handler.state());
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod network;
pub mod protocol;
pub mod tars;
pub mod writer;

pub use config::{BackoffPolicy, BotConfiguration, DeviceInfo};
pub use error::{AuthError, CryptoError, Result, TarsError, WireError};
pub use network::{ConnectionContext, ConnectionState, NetworkHandler, Selector};

/// Boxed future used at the crate's trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
