//! In-memory SSO server used by the network tests.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::transport::{BoxedStream, Connector};
use crate::auth::packets::{
    KeyExchange, LoginReply, SvcReqRegister, SvcRespRegister, CMD_EXCHANGE_EMP, CMD_EXCHANGE_KEY,
    CMD_LOGIN, CMD_REGISTER,
};
use crate::crypto::{EcdhKeyPair, Key};
use crate::error::{Result, WireError};
use crate::protocol::{
    EncryptionMode, FrameBuffer, IncomingPacket, OutgoingPacket, SsoLayout, WireLayout,
};
use crate::tars::{self, UniPacket};
use crate::BoxFuture;

pub(crate) const SESSION_KEY: Key = [0x5a; 16];

/// What the server does in answer to one request.
pub(crate) enum Out {
    Reply { code: i32, payload: Bytes },
    Push { command: &'static str, seq: u32, payload: Bytes },
    Raw(Vec<u8>),
    Hangup,
}

pub(crate) type Script = dyn Fn(&IncomingPacket) -> Option<Vec<Out>> + Send + Sync;

/// Server-side key state, kept across connections like a real server
/// remembers the session.
pub(crate) struct ServerKeys {
    ecdh: EcdhKeyPair,
    share: Mutex<Option<Key>>,
}

impl ServerKeys {
    fn new() -> Self {
        Self {
            ecdh: EcdhKeyPair::generate(),
            share: Mutex::new(None),
        }
    }

    fn key_for(&self, mode: EncryptionMode) -> Option<Key> {
        match mode {
            EncryptionMode::None => None,
            EncryptionMode::ShareKey => *self.share.lock().unwrap(),
            EncryptionMode::SessionKey => Some(SESSION_KEY),
        }
    }
}

fn standard_reply(keys: &ServerKeys, req: &IncomingPacket) -> Result<Bytes> {
    Ok(match req.command.to_string().as_str() {
        CMD_EXCHANGE_KEY => {
            let offer: KeyExchange = tars::from_bytes(&req.payload)?;
            *keys.share.lock().unwrap() = Some(keys.ecdh.shared_secret(&offer.public_key)?);
            tars::to_bytes(&KeyExchange {
                public_key: Bytes::copy_from_slice(&keys.ecdh.public_key()),
            })
        }
        CMD_LOGIN | CMD_EXCHANGE_EMP => tars::to_bytes(&LoginReply {
            session_key: Bytes::copy_from_slice(&SESSION_KEY),
            session_ticket: Bytes::from_static(b"ticket"),
            expires_in: 3600,
            ..Default::default()
        }),
        CMD_REGISTER => {
            let req: SvcReqRegister = UniPacket::decode(&req.payload)?.record(SvcReqRegister::FUNC)?;
            UniPacket::new(SvcReqRegister::SERVANT, SvcRespRegister::FUNC, 0)
                .with_record(
                    SvcRespRegister::FUNC,
                    &SvcRespRegister {
                        uin: req.uin,
                        ..Default::default()
                    },
                )
                .encode()
        }
        _ => Bytes::new(),
    })
}

async fn serve(
    mut stream: DuplexStream,
    keys: Arc<ServerKeys>,
    script: Arc<Script>,
    received: Arc<Mutex<Vec<String>>>,
) -> Result<()> {
    let layout = SsoLayout;
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for raw in frames.push(&buf[..n])? {
            let frame = layout.split(raw)?;
            let key = keys.key_for(frame.encryption());
            let req = layout.open(frame, key.as_ref())?;
            received.lock().unwrap().push(req.command.to_string());

            let actions = match script(&req) {
                Some(actions) => actions,
                None => vec![Out::Reply {
                    code: 0,
                    payload: standard_reply(&keys, &req)?,
                }],
            };
            for action in actions {
                let bytes = match action {
                    Out::Reply { code, payload } => {
                        let reply = OutgoingPacket::new(req.command.clone(), req.sequence_id, req.encryption, payload)
                            .with_return_code(code);
                        let key = keys.key_for(req.encryption);
                        layout.encode(&reply, key.as_ref())?.to_vec()
                    }
                    Out::Push { command, seq, payload } => {
                        let push = OutgoingPacket::new(command, seq, EncryptionMode::SessionKey, payload);
                        layout.encode(&push, Some(&SESSION_KEY))?.to_vec()
                    }
                    Out::Raw(bytes) => bytes,
                    Out::Hangup => return Ok(()),
                };
                stream.write_all(&bytes).await?;
            }
        }
    }
}

/// Connector that fails its first `fail_first` attempts, then serves each
/// connection from an in-memory [`serve`] task.
pub(crate) struct FakeConnector {
    pub attempts: AtomicU32,
    fail_first: u32,
    keys: Arc<ServerKeys>,
    script: Arc<Script>,
    pub received: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub(crate) fn new(script: impl Fn(&IncomingPacket) -> Option<Vec<Out>> + Send + Sync + 'static) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            fail_first: 0,
            keys: Arc::new(ServerKeys::new()),
            script: Arc::new(script),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn standard() -> Self {
        Self::new(|_| None)
    }

    pub(crate) fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let result = if attempt <= self.fail_first {
            Err(WireError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)))
        } else {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let keys = self.keys.clone();
            let script = self.script.clone();
            let received = self.received.clone();
            tokio::spawn(async move {
                if let Err(e) = serve(server, keys, script, received).await {
                    tracing::debug!(error = %e, "fake server stopped");
                }
            });
            Ok(Box::new(client) as BoxedStream)
        };
        Box::pin(async move { result })
    }
}
