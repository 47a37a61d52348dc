//! Per-bot shared context.

use std::fmt;
use std::sync::Arc;

use crate::auth::{BotAccount, KeyRing, LoginSolver, SecretsStore, SessionKeyMaterial, SsoProcessor};
use crate::codec::CodecRegistry;
use crate::config::BotConfiguration;
use crate::protocol::{SsoLayout, WireLayout};

use super::notice::{notice_channel, NoticeReceiver, NoticeSender};
use super::CancelToken;

/// Everything a connection needs, built once per bot and shared by every
/// handler the selector creates.
pub struct ConnectionContext {
    pub config: Arc<BotConfiguration>,
    pub account: Arc<BotAccount>,
    pub keys: Arc<KeyRing>,
    pub processor: Arc<SsoProcessor>,
    pub codecs: Arc<CodecRegistry>,
    pub layout: Arc<dyn WireLayout>,
    pub notices: NoticeSender,
    /// Root token; cancelling it ends every connection of this bot.
    pub cancel: CancelToken,
}

impl ConnectionContext {
    pub fn builder(config: BotConfiguration, account: BotAccount) -> ContextBuilder {
        ContextBuilder::new(config, account)
    }

    pub fn uin(&self) -> i64 {
        self.account.uin()
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("uin", &self.account.uin())
            .field("layout", &self.layout.name())
            .field("codecs", &self.codecs.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionContext`].
pub struct ContextBuilder {
    config: BotConfiguration,
    account: BotAccount,
    keys: Option<SessionKeyMaterial>,
    solver: Option<Arc<dyn LoginSolver>>,
    store: Option<Arc<dyn SecretsStore>>,
    codecs: CodecRegistry,
    layout: Arc<dyn WireLayout>,
    cancel: CancelToken,
}

impl ContextBuilder {
    pub fn new(config: BotConfiguration, account: BotAccount) -> Self {
        Self {
            config,
            account,
            keys: None,
            solver: None,
            store: None,
            codecs: CodecRegistry::new(),
            layout: Arc::new(SsoLayout),
            cancel: CancelToken::new(),
        }
    }

    /// Start from existing key material instead of a fresh key pair.
    pub fn key_material(mut self, material: SessionKeyMaterial) -> Self {
        self.keys = Some(material);
        self
    }

    pub fn solver(mut self, solver: Arc<dyn LoginSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn secrets_store(mut self, store: Arc<dyn SecretsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn layout(mut self, layout: impl WireLayout + 'static) -> Self {
        self.layout = Arc::new(layout);
        self
    }

    /// Tie the bot to an existing cancellation tree.
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the context and the receiving end of its notice queue.
    pub fn build(self) -> (Arc<ConnectionContext>, NoticeReceiver) {
        let config = Arc::new(self.config);
        let account = Arc::new(self.account);
        let keys = Arc::new(KeyRing::new(self.keys.unwrap_or_default()));

        let mut processor = SsoProcessor::new(config.clone(), account.clone(), keys.clone());
        if let Some(solver) = self.solver {
            processor = processor.with_solver(solver);
        }
        if let Some(store) = self.store {
            processor = processor.with_secrets_store(store);
        }

        let (notices, receiver) = notice_channel(config.notice_queue_capacity);
        let context = ConnectionContext {
            config,
            account,
            keys,
            processor: Arc::new(processor),
            codecs: Arc::new(self.codecs),
            layout: self.layout,
            notices,
            cancel: self.cancel,
        };
        (Arc::new(context), receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_shares_keyring() {
        let mut config = BotConfiguration::default();
        config.notice_queue_capacity = 4;
        let (ctx, _rx) = ConnectionContext::builder(config, BotAccount::with_password(42, "pw")).build();

        assert_eq!(ctx.uin(), 42);
        assert!(Arc::ptr_eq(&ctx.keys, ctx.processor.keys()));
        assert_eq!(ctx.layout.name(), "sso");
        assert!(!ctx.cancel.is_cancelled());
    }

    #[test]
    fn test_seeded_key_material() {
        let material = SessionKeyMaterial::new();
        let public = material.client_public_key();
        let (ctx, _rx) = ConnectionContext::builder(BotConfiguration::default(), BotAccount::with_qr_code(1))
            .key_material(material)
            .build();
        assert_eq!(ctx.keys.current().client_public_key(), public);
    }
}
