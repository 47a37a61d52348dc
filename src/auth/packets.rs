//! Tars records exchanged during login, registration and QR polling.

use bytes::Bytes;

use crate::error::TarsError;
use crate::tars::{FieldKind, FieldSpec, Fields, TarsStruct, TarsWriter};

pub const CMD_EXCHANGE_KEY: &str = "wtlogin.exchange_key";
pub const CMD_LOGIN: &str = "wtlogin.login";
pub const CMD_EXCHANGE_EMP: &str = "wtlogin.exchange_emp";
pub const CMD_TRANS_EMP: &str = "wtlogin.trans_emp";
pub const CMD_REGISTER: &str = "StatSvc.register";
pub const CMD_HEARTBEAT: &str = "Heartbeat.Alive";

/// `wtlogin.login` sub-commands.
pub mod sub {
    pub const PASSWORD: i32 = 9;
    pub const CAPTCHA_SUBMIT: i32 = 2;
    pub const DEVICE_LOCK: i32 = 20;
    pub const SMS_SUBMIT: i32 = 7;
    pub const SMS_REQUEST: i32 = 8;
    pub const TICKET: i32 = 10;
    pub const QR_SIGNATURE: i32 = 15;

    pub const QR_FETCH: i32 = 0x31;
    pub const QR_POLL: i32 = 0x12;
}

type Result<T> = std::result::Result<T, TarsError>;

/// Public key swap for the share key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyExchange {
    pub public_key: Bytes,
}

impl TarsStruct for KeyExchange {
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::required(0, "public_key", FieldKind::Bytes)];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_bytes(0, &self.public_key);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            public_key: f.bytes(0)?,
        })
    }
}

/// One `wtlogin.login` step.
///
/// `ticket` carries whatever the sub-command submits: the captcha answer,
/// the SMS code, the stored session ticket or the QR login signature.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoginRequest {
    pub sub_command: i32,
    pub uin: i64,
    pub password_md5: Bytes,
    pub guid: Bytes,
    pub app_id: u32,
    pub sub_app_id: u32,
    pub imei: String,
    pub model: String,
    pub os_version: String,
    pub apk_version: String,
    pub ticket: Bytes,
    pub captcha_sign: Bytes,
    pub allow_slider: bool,
}

impl TarsStruct for LoginRequest {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(0, "sub_command", FieldKind::Integer),
        FieldSpec::required(1, "uin", FieldKind::Integer),
        FieldSpec::optional(2, "password_md5", FieldKind::Bytes),
        FieldSpec::optional(3, "guid", FieldKind::Bytes),
        FieldSpec::optional(4, "app_id", FieldKind::Integer),
        FieldSpec::optional(5, "sub_app_id", FieldKind::Integer),
        FieldSpec::optional(6, "imei", FieldKind::String),
        FieldSpec::optional(7, "model", FieldKind::String),
        FieldSpec::optional(8, "os_version", FieldKind::String),
        FieldSpec::optional(9, "apk_version", FieldKind::String),
        FieldSpec::optional(10, "ticket", FieldKind::Bytes),
        FieldSpec::optional(11, "captcha_sign", FieldKind::Bytes),
        FieldSpec::optional(12, "allow_slider", FieldKind::Integer),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i32(0, self.sub_command);
        w.write_i64(1, self.uin);
        w.write_bytes(2, &self.password_md5);
        w.write_bytes(3, &self.guid);
        w.write_i64(4, self.app_id as i64);
        w.write_i64(5, self.sub_app_id as i64);
        w.write_string(6, &self.imei);
        w.write_string(7, &self.model);
        w.write_string(8, &self.os_version);
        w.write_string(9, &self.apk_version);
        w.write_bytes(10, &self.ticket);
        w.write_bytes(11, &self.captcha_sign);
        w.write_bool(12, self.allow_slider);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            sub_command: f.i32(0)?,
            uin: f.i64(1)?,
            password_md5: f.bytes(2)?,
            guid: f.bytes(3)?,
            app_id: f.u32(4)?,
            sub_app_id: f.u32(5)?,
            imei: f.string(6)?,
            model: f.string(7)?,
            os_version: f.string(8)?,
            apk_version: f.string(9)?,
            ticket: f.bytes(10)?,
            captcha_sign: f.bytes(11)?,
            allow_slider: f.bool(12)?,
        })
    }
}

/// Server answer to any `wtlogin.login` step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoginReply {
    pub result: i32,
    pub message: String,
    pub session_key: Bytes,
    pub session_ticket: Bytes,
    /// Ticket lifetime in seconds.
    pub expires_in: i64,
    pub url: String,
    pub captcha_image: Bytes,
    pub captcha_sign: Bytes,
    pub phone: String,
}

impl TarsStruct for LoginReply {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(0, "result", FieldKind::Integer),
        FieldSpec::optional(1, "message", FieldKind::String),
        FieldSpec::optional(2, "session_key", FieldKind::Bytes),
        FieldSpec::optional(3, "session_ticket", FieldKind::Bytes),
        FieldSpec::optional(4, "expires_in", FieldKind::Integer),
        FieldSpec::optional(5, "url", FieldKind::String),
        FieldSpec::optional(6, "captcha_image", FieldKind::Bytes),
        FieldSpec::optional(7, "captcha_sign", FieldKind::Bytes),
        FieldSpec::optional(8, "phone", FieldKind::String),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i32(0, self.result);
        w.write_string(1, &self.message);
        w.write_bytes(2, &self.session_key);
        w.write_bytes(3, &self.session_ticket);
        w.write_i64(4, self.expires_in);
        w.write_string(5, &self.url);
        w.write_bytes(6, &self.captcha_image);
        w.write_bytes(7, &self.captcha_sign);
        w.write_string(8, &self.phone);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            result: f.i32(0)?,
            message: f.string(1)?,
            session_key: f.bytes(2)?,
            session_ticket: f.bytes(3)?,
            expires_in: f.i64(4)?,
            url: f.string(5)?,
            captcha_image: f.bytes(6)?,
            captcha_sign: f.bytes(7)?,
            phone: f.string(8)?,
        })
    }
}

/// `wtlogin.trans_emp` request: fetch a QR code or poll its state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QrCodeRequest {
    pub sub_command: i32,
    pub app_id: u32,
    pub qr_sig: Bytes,
    pub guid: Bytes,
}

impl TarsStruct for QrCodeRequest {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(0, "sub_command", FieldKind::Integer),
        FieldSpec::optional(1, "app_id", FieldKind::Integer),
        FieldSpec::optional(2, "qr_sig", FieldKind::Bytes),
        FieldSpec::optional(3, "guid", FieldKind::Bytes),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i32(0, self.sub_command);
        w.write_i64(1, self.app_id as i64);
        w.write_bytes(2, &self.qr_sig);
        w.write_bytes(3, &self.guid);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            sub_command: f.i32(0)?,
            app_id: f.u32(1)?,
            qr_sig: f.bytes(2)?,
            guid: f.bytes(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QrCodeReply {
    pub state: i32,
    pub qr_sig: Bytes,
    pub image: Bytes,
    pub uin: i64,
    pub login_sig: Bytes,
}

impl TarsStruct for QrCodeReply {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(0, "state", FieldKind::Integer),
        FieldSpec::optional(1, "qr_sig", FieldKind::Bytes),
        FieldSpec::optional(2, "image", FieldKind::Bytes),
        FieldSpec::optional(3, "uin", FieldKind::Integer),
        FieldSpec::optional(4, "login_sig", FieldKind::Bytes),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i32(0, self.state);
        w.write_bytes(1, &self.qr_sig);
        w.write_bytes(2, &self.image);
        w.write_i64(3, self.uin);
        w.write_bytes(4, &self.login_sig);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            state: f.i32(0)?,
            qr_sig: f.bytes(1)?,
            image: f.bytes(2)?,
            uin: f.i64(3)?,
            login_sig: f.bytes(4)?,
        })
    }
}

/// Online status reported by `StatSvc.register`.
pub mod status {
    pub const ONLINE: i32 = 11;
    pub const OFFLINE: i32 = 21;

    pub const BID_ONLINE: i64 = 7;
    pub const BID_OFFLINE: i64 = 0;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SvcReqRegister {
    pub uin: i64,
    pub bid: i64,
    pub status: i32,
    pub kick_other: bool,
    pub guid: Bytes,
    pub os_version: String,
    pub model: String,
}

impl SvcReqRegister {
    /// Servant and function names of the envelope.
    pub const SERVANT: &'static str = "PushService";
    pub const FUNC: &'static str = "SvcReqRegister";
}

impl TarsStruct for SvcReqRegister {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(0, "uin", FieldKind::Integer),
        FieldSpec::required(1, "bid", FieldKind::Integer),
        FieldSpec::optional(2, "status", FieldKind::Integer),
        FieldSpec::optional(3, "kick_other", FieldKind::Integer),
        FieldSpec::optional(4, "guid", FieldKind::Bytes),
        FieldSpec::optional(5, "os_version", FieldKind::String),
        FieldSpec::optional(6, "model", FieldKind::String),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i64(0, self.uin);
        w.write_i64(1, self.bid);
        w.write_i32(2, self.status);
        w.write_bool(3, self.kick_other);
        w.write_bytes(4, &self.guid);
        w.write_string(5, &self.os_version);
        w.write_string(6, &self.model);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            uin: f.i64(0)?,
            bid: f.i64(1)?,
            status: f.i32(2)?,
            kick_other: f.bool(3)?,
            guid: f.bytes(4)?,
            os_version: f.string(5)?,
            model: f.string(6)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SvcRespRegister {
    pub uin: i64,
    pub bid: i64,
    pub reply_code: i32,
    pub result: String,
    pub server_time: i64,
}

impl SvcRespRegister {
    pub const FUNC: &'static str = "SvcRespRegister";
}

impl TarsStruct for SvcRespRegister {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(0, "uin", FieldKind::Integer),
        FieldSpec::optional(1, "bid", FieldKind::Integer),
        FieldSpec::required(2, "reply_code", FieldKind::Integer),
        FieldSpec::optional(3, "result", FieldKind::String),
        FieldSpec::optional(4, "server_time", FieldKind::Integer),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i64(0, self.uin);
        w.write_i64(1, self.bid);
        w.write_i32(2, self.reply_code);
        w.write_string(3, &self.result);
        w.write_i64(4, self.server_time);
    }

    fn from_fields(f: Fields) -> Result<Self> {
        Ok(Self {
            uin: f.i64(0)?,
            bid: f.i64(1)?,
            reply_code: f.i32(2)?,
            result: f.string(3)?,
            server_time: f.i64(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tars::{self, UniPacket};

    #[test]
    fn test_login_request_roundtrip() {
        let req = LoginRequest {
            sub_command: sub::PASSWORD,
            uin: 123_456_789,
            password_md5: Bytes::from_static(&[1; 16]),
            guid: Bytes::from_static(&[2; 16]),
            app_id: 16,
            sub_app_id: 537_066_738,
            imei: "86".into(),
            allow_slider: true,
            ..Default::default()
        };
        assert_eq!(tars::from_bytes::<LoginRequest>(&tars::to_bytes(&req)).unwrap(), req);
    }

    #[test]
    fn test_login_reply_minimal() {
        // A bare `{0: 1}` still decodes; everything else defaults.
        let reply = tars::from_bytes::<LoginReply>(&[0x00, 0x01]).unwrap();
        assert_eq!(reply.result, 1);
        assert!(reply.message.is_empty());
        assert!(reply.captcha_image.is_empty());
    }

    #[test]
    fn test_register_in_envelope() {
        let req = SvcReqRegister {
            uin: 10001,
            bid: status::BID_ONLINE,
            status: status::ONLINE,
            ..Default::default()
        };
        let uni = UniPacket::new(SvcReqRegister::SERVANT, SvcReqRegister::FUNC, 1)
            .with_record(SvcReqRegister::FUNC, &req);
        let back = UniPacket::decode(&uni.encode()).unwrap();
        assert_eq!(back.record::<SvcReqRegister>(SvcReqRegister::FUNC).unwrap(), req);
    }

    #[test]
    fn test_qr_reply_roundtrip() {
        let reply = QrCodeReply {
            state: 48,
            qr_sig: Bytes::from_static(b"sig"),
            ..Default::default()
        };
        assert_eq!(tars::from_bytes::<QrCodeReply>(&tars::to_bytes(&reply)).unwrap(), reply);
    }
}
