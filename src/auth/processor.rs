//! The SSO login sequence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::packets::{
    status, sub, KeyExchange, LoginReply, LoginRequest, SvcReqRegister, SvcRespRegister,
    CMD_EXCHANGE_EMP, CMD_EXCHANGE_KEY, CMD_LOGIN, CMD_REGISTER,
};
use super::qrcode::QrLogin;
use super::{
    AuthEvent, AuthMethod, BotAccount, ChallengeKind, KeyRing, LoginResponse, LoginSolver,
    PacketChannel, SecretsStore, SessionGrant, SessionKeyMaterial,
};
use crate::config::BotConfiguration;
use crate::error::{AuthError, Result, WireError};
use crate::protocol::EncryptionMode;
use crate::tars::{self, UniPacket};

const EVENT_CAPACITY: usize = 64;

/// Runs the login handshake for one account.
///
/// The processor is the only writer of the account's [`KeyRing`]. Each
/// successful step swaps in a new [`SessionKeyMaterial`]; frames sealed
/// concurrently keep using the snapshot they started with.
pub struct SsoProcessor {
    config: Arc<BotConfiguration>,
    account: Arc<BotAccount>,
    keys: Arc<KeyRing>,
    solver: Option<Arc<dyn LoginSolver>>,
    store: Option<Arc<dyn SecretsStore>>,
    events: broadcast::Sender<AuthEvent>,
    restored: AtomicBool,
    full_logins: AtomicU32,
}

fn declined(kind: ChallengeKind) -> AuthError {
    AuthError::UnsupportedChallenge(format!("{} declined", kind))
}

impl SsoProcessor {
    pub fn new(config: Arc<BotConfiguration>, account: Arc<BotAccount>, keys: Arc<KeyRing>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            account,
            keys,
            solver: None,
            store: None,
            events,
            restored: AtomicBool::new(false),
            full_logins: AtomicU32::new(0),
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn LoginSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_secrets_store(mut self, store: Arc<dyn SecretsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn account(&self) -> &BotAccount {
        &self.account
    }

    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    fn emit(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Log in over `channel`.
    ///
    /// Tries the stored ticket first when one is valid, then falls back to
    /// the account's credential. Challenges are answered through the
    /// solver, each kind at most `challenge_retries` times.
    pub async fn login(&self, channel: &dyn PacketChannel) -> Result<()> {
        self.restore_once().await;
        let uin = self.account.uin();
        match self.login_inner(channel).await {
            Ok(fast) => {
                info!(uin, fast, "login succeeded");
                self.emit(AuthEvent::Succeeded { uin, fast });
                Ok(())
            }
            Err(e) => {
                warn!(uin, error = %e, "login failed");
                self.emit(AuthEvent::failed(uin, &e));
                Err(e)
            }
        }
    }

    async fn login_inner(&self, channel: &dyn PacketChannel) -> Result<bool> {
        self.ensure_share_key(channel).await?;

        let material = self.keys.current();
        if material.has_valid_ticket(SystemTime::now()) {
            match self.fast_login(channel, &material).await {
                Ok(()) => return Ok(true),
                Err(WireError::Cancelled) => return Err(WireError::Cancelled),
                Err(e) => {
                    warn!(uin = self.account.uin(), error = %e, "fast login failed, falling back to full login");
                    self.keys.replace(self.keys.current().without_session());
                }
            }
        }

        let first = self.full_logins.fetch_add(1, Ordering::AcqRel) == 0;
        let request = match self.account.resolve(first).await? {
            AuthMethod::PasswordMd5(hash) => LoginRequest {
                password_md5: Bytes::copy_from_slice(&hash),
                ..self.base_request(sub::PASSWORD, self.account.uin())?
            },
            AuthMethod::QrCode => {
                let solver = self.solver.clone().ok_or(AuthError::NoSolver)?;
                self.emit(AuthEvent::ChallengeIssued {
                    uin: self.account.uin(),
                    kind: ChallengeKind::QrCode,
                });
                let confirmed = QrLogin {
                    channel,
                    solver: solver.as_ref(),
                    uin: self.account.uin(),
                    app_id: self.config.device.app_id,
                    guid: self.config.device.guid()?,
                    interval: self.config.qr_poll_interval,
                    timeout: self.config.qr_timeout,
                }
                .run()
                .await?;
                LoginRequest {
                    ticket: confirmed.login_sig,
                    ..self.base_request(sub::QR_SIGNATURE, confirmed.uin)?
                }
            }
        };
        self.drive(channel, request).await?;
        Ok(false)
    }

    async fn ensure_share_key(&self, channel: &dyn PacketChannel) -> Result<()> {
        let current = self.keys.current();
        if current.has_share_key() {
            debug!("share key already negotiated");
            return Ok(());
        }
        let offer = KeyExchange {
            public_key: Bytes::copy_from_slice(&current.client_public_key()),
        };
        let reply = channel
            .request(CMD_EXCHANGE_KEY, EncryptionMode::None, tars::to_bytes(&offer))
            .await?;
        let answer: KeyExchange = tars::from_bytes(&reply.payload)?;
        let next = current
            .with_server_key(&answer.public_key)
            .map_err(AuthError::Handshake)?;
        self.keys.replace(next);
        debug!("share key negotiated");
        Ok(())
    }

    async fn fast_login(&self, channel: &dyn PacketChannel, material: &SessionKeyMaterial) -> Result<()> {
        let request = LoginRequest {
            ticket: material.session_ticket().clone(),
            ..self.base_request(sub::TICKET, self.account.uin())?
        };
        let reply = self.submit(channel, CMD_EXCHANGE_EMP, &request).await?;
        match LoginResponse::from_reply(reply) {
            LoginResponse::Success(grant) => {
                self.install(grant).await;
                Ok(())
            }
            other => Err(other
                .into_error()
                .unwrap_or_else(|| AuthError::Unexpected("ticket login asked for a challenge".into()))
                .into()),
        }
    }

    fn base_request(&self, sub_command: i32, uin: i64) -> Result<LoginRequest> {
        let device = &self.config.device;
        Ok(LoginRequest {
            sub_command,
            uin,
            guid: Bytes::copy_from_slice(&device.guid()?),
            app_id: device.app_id,
            sub_app_id: device.sub_app_id,
            imei: device.imei.clone(),
            model: device.model.clone(),
            os_version: device.os_version.clone(),
            apk_version: device.apk_version.clone(),
            allow_slider: self.solver.as_ref().map_or(false, |s| s.supports_slider()),
            ..Default::default()
        })
    }

    /// Follow-up step keeping the identity fields of `request`.
    fn step(request: &LoginRequest, sub_command: i32) -> LoginRequest {
        LoginRequest {
            sub_command,
            ticket: Bytes::new(),
            captcha_sign: Bytes::new(),
            ..request.clone()
        }
    }

    async fn submit(
        &self,
        channel: &dyn PacketChannel,
        command: &'static str,
        request: &LoginRequest,
    ) -> Result<LoginReply> {
        debug!(command, sub_command = request.sub_command, "login step");
        let reply = channel
            .request(command, EncryptionMode::ShareKey, tars::to_bytes(request))
            .await?;
        Ok(tars::from_bytes(&reply.payload)?)
    }

    fn challenge(
        &self,
        answered: &mut HashMap<ChallengeKind, u32>,
        kind: ChallengeKind,
    ) -> Result<Arc<dyn LoginSolver>> {
        let solver = self.solver.clone().ok_or(AuthError::NoSolver)?;
        let count = answered.entry(kind).or_insert(0);
        *count += 1;
        if *count > self.config.challenge_retries {
            return Err(AuthError::ChallengeRetriesExhausted(kind.name()).into());
        }
        let uin = self.account.uin();
        info!(uin, %kind, attempt = *count, "login challenge");
        self.emit(AuthEvent::ChallengeIssued { uin, kind });
        Ok(solver)
    }

    async fn drive(&self, channel: &dyn PacketChannel, mut request: LoginRequest) -> Result<()> {
        let uin = request.uin;
        let mut answered = HashMap::new();
        let mut slider_refused = false;
        let mut reply = self.submit(channel, CMD_LOGIN, &request).await?;

        loop {
            let next = match LoginResponse::from_reply(reply) {
                LoginResponse::Success(grant) => {
                    self.install(grant).await;
                    return Ok(());
                }
                LoginResponse::PictureCaptcha { sign, image } => {
                    let kind = ChallengeKind::PictureCaptcha;
                    let solver = self.challenge(&mut answered, kind)?;
                    let answer = solver
                        .solve_picture_captcha(uin, image)
                        .await
                        .ok_or_else(|| declined(kind))?;
                    LoginRequest {
                        ticket: Bytes::from(answer),
                        captcha_sign: sign,
                        ..Self::step(&request, sub::CAPTCHA_SUBMIT)
                    }
                }
                LoginResponse::SliderCaptcha { url } => {
                    let kind = ChallengeKind::SliderCaptcha;
                    if self.solver.as_ref().map_or(false, |s| s.supports_slider()) {
                        let solver = self.challenge(&mut answered, kind)?;
                        let ticket = solver
                            .solve_slider_captcha(uin, url)
                            .await
                            .ok_or_else(|| declined(kind))?;
                        LoginRequest {
                            ticket: Bytes::from(ticket),
                            ..Self::step(&request, sub::CAPTCHA_SUBMIT)
                        }
                    } else if !slider_refused {
                        slider_refused = true;
                        warn!(uin, "slider captcha not supported, retrying without it");
                        request.allow_slider = false;
                        request.clone()
                    } else {
                        return Err(AuthError::UnsupportedChallenge(kind.name().into()).into());
                    }
                }
                LoginResponse::UnsafeDevice { url } => {
                    let kind = ChallengeKind::UnsafeDevice;
                    let solver = self.challenge(&mut answered, kind)?;
                    if !solver.confirm_unsafe_device(uin, url).await {
                        return Err(declined(kind).into());
                    }
                    request.clone()
                }
                LoginResponse::DeviceLock { url } => {
                    let kind = ChallengeKind::DeviceLock;
                    let solver = self.challenge(&mut answered, kind)?;
                    if !solver.confirm_device_lock(uin, url).await {
                        return Err(declined(kind).into());
                    }
                    Self::step(&request, sub::DEVICE_LOCK)
                }
                LoginResponse::SmsRequired { phone } => {
                    let kind = ChallengeKind::Sms;
                    let solver = self.challenge(&mut answered, kind)?;
                    self.submit(channel, CMD_LOGIN, &Self::step(&request, sub::SMS_REQUEST))
                        .await?;
                    let code = solver.solve_sms(uin, phone).await.ok_or_else(|| declined(kind))?;
                    LoginRequest {
                        ticket: Bytes::from(code),
                        ..Self::step(&request, sub::SMS_SUBMIT)
                    }
                }
                terminal => {
                    return Err(terminal
                        .into_error()
                        .unwrap_or_else(|| AuthError::Unexpected("unhandled login reply".into()))
                        .into())
                }
            };
            reply = self.submit(channel, CMD_LOGIN, &next).await?;
        }
    }

    async fn install(&self, grant: SessionGrant) {
        let uin = self.account.uin();
        let next = self.keys.current().with_session(&grant, SystemTime::now());
        let blob = self.store.as_ref().map(|_| next.export(uin));
        self.keys.replace(next);

        if let (Some(store), Some(blob)) = (&self.store, blob) {
            let saved = match blob {
                Ok(blob) => store.save(uin, blob).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                warn!(uin, error = %e, "could not save session secrets");
            }
        }
    }

    async fn restore_once(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if self.restored.swap(true, Ordering::AcqRel) {
            return;
        }
        let uin = self.account.uin();
        match store.load(uin).await {
            Ok(Some(blob)) => match SessionKeyMaterial::import(&blob, uin) {
                Ok(material) => {
                    debug!(uin, version = material.version(), "session secrets restored");
                    self.keys.replace(material);
                }
                Err(e) => warn!(uin, error = %e, "stored session secrets unusable"),
            },
            Ok(None) => {}
            Err(e) => warn!(uin, error = %e, "could not load session secrets"),
        }
    }

    fn register_payload(&self, bid: i64, status: i32) -> Result<Bytes> {
        let device = &self.config.device;
        let request = SvcReqRegister {
            uin: self.account.uin(),
            bid,
            status,
            kick_other: false,
            guid: Bytes::copy_from_slice(&device.guid()?),
            os_version: device.os_version.clone(),
            model: device.model.clone(),
        };
        Ok(UniPacket::new(SvcReqRegister::SERVANT, SvcReqRegister::FUNC, 0)
            .with_record(SvcReqRegister::FUNC, &request)
            .encode())
    }

    /// Report the client online. Must succeed before the connection is
    /// usable.
    pub async fn register_online(&self, channel: &dyn PacketChannel) -> Result<SvcRespRegister> {
        let payload = self.register_payload(status::BID_ONLINE, status::ONLINE)?;
        let reply = channel
            .request(CMD_REGISTER, EncryptionMode::SessionKey, payload)
            .await?;
        let resp: SvcRespRegister = UniPacket::decode(&reply.payload)?.record(SvcRespRegister::FUNC)?;
        if resp.reply_code != 0 {
            return Err(WireError::ServerCode {
                command: CMD_REGISTER.to_string(),
                code: resp.reply_code,
            });
        }
        info!(uin = self.account.uin(), "registered online");
        Ok(resp)
    }

    /// Report the client offline and forget the session. No reply is
    /// awaited.
    pub async fn logout(&self, channel: &dyn PacketChannel) -> Result<()> {
        let payload = self.register_payload(status::BID_OFFLINE, status::OFFLINE)?;
        let sent = channel
            .post(CMD_REGISTER, EncryptionMode::SessionKey, payload)
            .await;
        self.keys.replace(self.keys.current().without_session());
        info!(uin = self.account.uin(), "logged out");
        sent
    }
}
