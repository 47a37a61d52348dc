//! Integration tests for sso-wire.
//!
//! These drive the public API against an in-memory server that speaks the
//! SSO layout over `tokio::io::duplex`.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use sso_wire::auth::packets::{
    sub, KeyExchange, LoginReply, LoginRequest, SvcReqRegister, SvcRespRegister, CMD_EXCHANGE_EMP,
    CMD_EXCHANGE_KEY, CMD_LOGIN, CMD_REGISTER,
};
use sso_wire::auth::{AuthEvent, BotAccount, ChallengeKind, LoginSolver};
use sso_wire::codec::Packet;
use sso_wire::crypto::{tea, EcdhKeyPair, Key};
use sso_wire::network::{BoxedStream, Connector, NoticeRouter};
use sso_wire::protocol::{EncryptionMode, FrameBuffer, IncomingPacket, OutgoingPacket, SsoLayout, WireLayout};
use sso_wire::tars::{self, TaggedValue, TarsFields, UniPacket};
use sso_wire::{BotConfiguration, BoxFuture, ConnectionContext, ConnectionState, NetworkHandler, Selector, WireError};

const SESSION_KEY: Key = *b"session-key-16b!";

/// What the server sends back for one request.
enum Action {
    Reply(Bytes),
    Push(&'static str, Bytes),
    Hangup,
}

type Hook = dyn Fn(&IncomingPacket, &LoginRequest) -> Option<Vec<Action>> + Send + Sync;

struct Server {
    ecdh: EcdhKeyPair,
    share: Mutex<Option<Key>>,
    log: Mutex<Vec<String>>,
    hook: Box<Hook>,
}

impl Server {
    fn new(hook: impl Fn(&IncomingPacket, &LoginRequest) -> Option<Vec<Action>> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            ecdh: EcdhKeyPair::generate(),
            share: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            hook: Box::new(hook),
        })
    }

    fn plain() -> Arc<Self> {
        Self::new(|_, _| None)
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn key(&self, mode: EncryptionMode) -> Option<Key> {
        match mode {
            EncryptionMode::None => None,
            EncryptionMode::ShareKey => *self.share.lock().unwrap(),
            EncryptionMode::SessionKey => Some(SESSION_KEY),
        }
    }

    fn default_reply(&self, req: &IncomingPacket) -> Bytes {
        match req.command.to_string().as_str() {
            CMD_EXCHANGE_KEY => {
                let offer: KeyExchange = tars::from_bytes(&req.payload).unwrap();
                *self.share.lock().unwrap() = Some(self.ecdh.shared_secret(&offer.public_key).unwrap());
                tars::to_bytes(&KeyExchange {
                    public_key: Bytes::copy_from_slice(&self.ecdh.public_key()),
                })
            }
            CMD_LOGIN | CMD_EXCHANGE_EMP => granted(),
            CMD_REGISTER => {
                let req: SvcReqRegister = UniPacket::decode(&req.payload)
                    .unwrap()
                    .record(SvcReqRegister::FUNC)
                    .unwrap();
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
            _ => req.payload.clone(),
        }
    }

    async fn serve(self: Arc<Self>, mut stream: DuplexStream) {
        let mut frames = FrameBuffer::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for raw in frames.push(&buf[..n]).unwrap() {
                let frame = SsoLayout.split(raw).unwrap();
                let key = self.key(frame.encryption());
                let req = SsoLayout.open(frame, key.as_ref()).unwrap();
                self.log.lock().unwrap().push(req.command.to_string());

                let login = match req.command.to_string().as_str() {
                    CMD_LOGIN | CMD_EXCHANGE_EMP => tars::from_bytes(&req.payload).unwrap(),
                    _ => LoginRequest::default(),
                };
                let actions = (self.hook)(&req, &login).unwrap_or_else(|| vec![Action::Reply(self.default_reply(&req))]);
                for action in actions {
                    let packet = match action {
                        Action::Reply(payload) => {
                            OutgoingPacket::new(req.command.clone(), req.sequence_id, req.encryption, payload)
                        }
                        Action::Push(command, payload) => {
                            OutgoingPacket::new(command, req.sequence_id, EncryptionMode::SessionKey, payload)
                        }
                        Action::Hangup => return,
                    };
                    let key = self.key(packet.encryption);
                    let frame = SsoLayout.encode(&packet, key.as_ref()).unwrap();
                    if stream.write_all(&frame.to_vec()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn granted() -> Bytes {
    tars::to_bytes(&LoginReply {
        session_key: Bytes::copy_from_slice(&SESSION_KEY),
        session_ticket: Bytes::from_static(b"ticket"),
        expires_in: 3600,
        ..Default::default()
    })
}

/// Refuses the first `refuse` connections, then serves from `server`.
struct MemoryConnector {
    server: Arc<Server>,
    refuse: u32,
    attempts: AtomicU32,
}

impl MemoryConnector {
    fn new(server: Arc<Server>) -> Arc<Self> {
        Self::refusing(server, 0)
    }

    fn refusing(server: Arc<Server>, refuse: u32) -> Arc<Self> {
        Arc::new(Self {
            server,
            refuse,
            attempts: AtomicU32::new(0),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'_, sso_wire::Result<BoxedStream>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            if attempt <= self.refuse {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
            }
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(self.server.clone().serve(server));
            Ok(Box::new(client) as BoxedStream)
        })
    }
}

fn config() -> BotConfiguration {
    let mut config = BotConfiguration::default();
    config.heartbeat_enabled = false;
    config.backoff.initial = Duration::from_millis(200);
    config
}

fn context() -> (Arc<ConnectionContext>, sso_wire::network::NoticeReceiver) {
    ConnectionContext::builder(config(), BotAccount::with_password(20002, "hunter2")).build()
}

/// Tagged struct `{1: "abc", 2: 42}` survives an encode/decode cycle.
#[test]
fn test_tagged_struct_roundtrip() {
    let mut fields = TarsFields::new();
    fields.insert(1, TaggedValue::from("abc"));
    fields.insert(2, TaggedValue::Int(42));

    let bytes = tars::encode_fields(&fields);
    assert_eq!(tars::decode_fields(&bytes).unwrap(), fields);
}

/// An 11-byte plaintext comes back unchanged under a 16-byte key.
#[test]
fn test_cipher_roundtrip_odd_length() {
    let key: Key = *b"0123456789abcdef";
    let plaintext = b"hello world";
    assert_eq!(plaintext.len(), 11);

    let sealed = tea::encrypt(&key, plaintext);
    assert_eq!(sealed.len() % 8, 0);
    assert_eq!(tea::decrypt(&key, &sealed).unwrap(), plaintext);
}

/// A connector that errors at once leaves the handler closed; the selector
/// tries again only after the backoff.
#[tokio::test(start_paused = true)]
async fn test_failed_connect_then_backoff_retry() {
    let connector = MemoryConnector::refusing(Server::plain(), 1);
    let (ctx, _notices) = context();
    let selector = Selector::new(ctx, connector.clone());

    let err = selector.get_current_instance_or_create().await.unwrap_err();
    assert!(err.is_recoverable());
    let failed = selector.current().await.unwrap();
    assert!(matches!(failed.state(), ConnectionState::Closed { cause: Some(_) }));
    assert_eq!(connector.attempts(), 1);

    let start = tokio::time::Instant::now();
    let handler = selector.get_current_instance_or_create().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(handler.state().is_ok());
    assert_eq!(connector.attempts(), 2);
}

/// A push that overtakes the response is delivered to the notice pipeline
/// while the request still completes with its own reply.
#[tokio::test]
async fn test_response_overtaken_by_push() {
    let server = Server::new(|req, _| {
        (req.command.to_string() == "Demo.Query").then(|| {
            vec![
                Action::Push("OnlinePush.ReqPush", Bytes::from_static(b"unrelated")),
                Action::Reply(Bytes::from_static(b"answer")),
            ]
        })
    });
    let (ctx, notices) = context();
    let (pushed_tx, mut pushed_rx) = tokio::sync::mpsc::unbounded_channel();
    notices.spawn(
        NoticeRouter::new().on("OnlinePush.ReqPush", move |packet: Packet| {
            let tx = pushed_tx.clone();
            async move {
                let _ = tx.send(packet);
                Ok(())
            }
        }),
        ctx.cancel.clone(),
    );

    let handler = NetworkHandler::new(ctx, MemoryConnector::new(server));
    handler.resume_connection().await.unwrap();

    let reply = handler.send_and_expect("Demo.Query", Bytes::new()).await.unwrap();
    assert_eq!(reply.raw().unwrap().as_ref(), b"answer");

    let push = tokio::time::timeout(Duration::from_secs(1), pushed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(push.raw().unwrap().as_ref(), b"unrelated");
    assert_eq!(push.sequence_id, reply.sequence_id);
}

struct CaptchaSolver;

impl LoginSolver for CaptchaSolver {
    fn solve_picture_captcha(&self, _uin: i64, image: Bytes) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { (image.as_ref() == b"png").then(|| "abcd".to_string()) })
    }
}

#[tokio::test]
async fn test_login_through_captcha() {
    let server = Server::new(|req, login| {
        if req.command.to_string() != CMD_LOGIN {
            return None;
        }
        let reply = match login.sub_command {
            sub::PASSWORD => tars::to_bytes(&LoginReply {
                result: 2,
                captcha_image: Bytes::from_static(b"png"),
                captcha_sign: Bytes::from_static(b"sign"),
                ..Default::default()
            }),
            sub::CAPTCHA_SUBMIT if login.ticket.as_ref() == b"abcd" && login.captcha_sign.as_ref() == b"sign" => {
                granted()
            }
            _ => tars::to_bytes(&LoginReply {
                result: 1,
                message: "bad captcha".into(),
                ..Default::default()
            }),
        };
        Some(vec![Action::Reply(reply)])
    });
    let (ctx, _notices) = ConnectionContext::builder(config(), BotAccount::with_password(20002, "hunter2"))
        .solver(Arc::new(CaptchaSolver))
        .build();
    let mut events = ctx.processor.subscribe();

    let handler = NetworkHandler::new(ctx.clone(), MemoryConnector::new(server.clone()));
    handler.resume_connection().await.unwrap();

    assert_eq!(
        server.log(),
        vec![CMD_EXCHANGE_KEY, CMD_LOGIN, CMD_LOGIN, CMD_REGISTER]
    );
    assert_eq!(ctx.keys.key_for(EncryptionMode::SessionKey), Some(SESSION_KEY));
    assert!(matches!(
        events.recv().await.unwrap(),
        AuthEvent::ChallengeIssued {
            kind: ChallengeKind::PictureCaptcha,
            ..
        }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        AuthEvent::Succeeded { fast: false, .. }
    ));
}

#[tokio::test]
async fn test_wrong_password_is_final() {
    let server = Server::new(|req, _| {
        (req.command.to_string() == CMD_LOGIN).then(|| {
            vec![Action::Reply(tars::to_bytes(&LoginReply {
                result: 1,
                message: "wrong password".into(),
                ..Default::default()
            }))]
        })
    });
    let connector = MemoryConnector::new(server);
    let (ctx, _notices) = context();
    let selector = Selector::new(ctx, connector.clone());

    let err = selector.resume_instance().await.unwrap_err();
    assert!(err.is_auth());
    assert!(!err.is_recoverable());
    assert_eq!(connector.attempts(), 1);
}

/// After the server drops the connection, the next request goes out on a
/// new one that logs in with the stored ticket.
#[tokio::test]
async fn test_reconnect_uses_ticket_login() {
    let server = Server::new(|req, _| (req.command.to_string() == "Demo.Bye").then(|| vec![Action::Hangup]));
    let connector = MemoryConnector::new(server.clone());
    let (ctx, _notices) = context();
    let mut events = ctx.processor.subscribe();
    let selector = Selector::new(ctx, connector.clone());

    let first = selector.resume_instance().await.unwrap();
    selector.post("Demo.Bye", Bytes::new()).await.unwrap();
    let mut states = first.subscribe_state();
    tokio::time::timeout(Duration::from_secs(1), states.wait_for(|s| s.is_closed()))
        .await
        .unwrap()
        .unwrap();

    let reply = selector
        .send_and_expect("Demo.Echo", Bytes::from_static(b"again"))
        .await
        .unwrap();
    assert_eq!(reply.raw().unwrap().as_ref(), b"again");
    assert_eq!(connector.attempts(), 2);
    assert_eq!(
        server.log(),
        vec![
            CMD_EXCHANGE_KEY,
            CMD_LOGIN,
            CMD_REGISTER,
            "Demo.Bye",
            CMD_EXCHANGE_EMP,
            CMD_REGISTER,
            "Demo.Echo",
        ]
    );

    assert!(matches!(events.recv().await.unwrap(), AuthEvent::Succeeded { fast: false, .. }));
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::Succeeded { fast: true, .. }));
}

#[tokio::test]
async fn test_closed_bot_stops_reconnecting() {
    let connector = MemoryConnector::new(Server::plain());
    let (ctx, _notices) = context();
    let selector = Selector::new(ctx, connector.clone());

    let handler = selector.resume_instance().await.unwrap();
    selector.close().await;
    assert!(handler.is_closed());
    assert!(matches!(
        selector.send_and_expect("Demo.Echo", Bytes::new()).await,
        Err(WireError::Cancelled)
    ));
    assert_eq!(connector.attempts(), 1);
}
