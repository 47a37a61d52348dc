//! QR code login: fetch a code, then poll until the phone confirms.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info};

use super::packets::{sub, QrCodeReply, QrCodeRequest, CMD_TRANS_EMP};
use super::{LoginSolver, PacketChannel};
use crate::crypto::Key;
use crate::error::{AuthError, Result};
use crate::protocol::EncryptionMode;
use crate::tars;

/// Server-reported state of a QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrCodeState {
    WaitingForScan,
    WaitingForConfirm,
    Confirmed,
    Cancelled,
    Timeout,
    Unknown(i32),
}

impl QrCodeState {
    pub fn from_code(code: i32) -> Self {
        match code {
            48 => QrCodeState::WaitingForScan,
            53 => QrCodeState::WaitingForConfirm,
            0 => QrCodeState::Confirmed,
            54 => QrCodeState::Cancelled,
            17 => QrCodeState::Timeout,
            other => QrCodeState::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            QrCodeState::WaitingForScan => 48,
            QrCodeState::WaitingForConfirm => 53,
            QrCodeState::Confirmed => 0,
            QrCodeState::Cancelled => 54,
            QrCodeState::Timeout => 17,
            QrCodeState::Unknown(c) => c,
        }
    }
}

/// Result of a confirmed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct QrConfirmation {
    pub uin: i64,
    pub login_sig: Bytes,
}

pub(crate) struct QrLogin<'a> {
    pub channel: &'a dyn PacketChannel,
    pub solver: &'a dyn LoginSolver,
    pub uin: i64,
    pub app_id: u32,
    pub guid: Key,
    pub interval: Duration,
    pub timeout: Duration,
}

impl QrLogin<'_> {
    async fn call(&self, request: QrCodeRequest) -> Result<QrCodeReply> {
        let reply = self
            .channel
            .request(CMD_TRANS_EMP, EncryptionMode::ShareKey, tars::to_bytes(&request))
            .await?;
        Ok(tars::from_bytes(&reply.payload)?)
    }

    pub(crate) async fn run(&self) -> Result<QrConfirmation> {
        let fetched = self
            .call(QrCodeRequest {
                sub_command: sub::QR_FETCH,
                app_id: self.app_id,
                guid: Bytes::copy_from_slice(&self.guid),
                ..Default::default()
            })
            .await?;
        info!(uin = self.uin, "QR code fetched, waiting for scan");
        self.solver.show_qr_code(self.uin, fetched.image).await;

        let deadline = Instant::now() + self.timeout;
        let mut last = QrCodeState::WaitingForScan;
        loop {
            tokio::time::sleep(self.interval).await;
            if Instant::now() >= deadline {
                return Err(AuthError::QrCodeTimeout.into());
            }

            let polled = self
                .call(QrCodeRequest {
                    sub_command: sub::QR_POLL,
                    app_id: self.app_id,
                    qr_sig: fetched.qr_sig.clone(),
                    ..Default::default()
                })
                .await?;
            let state = QrCodeState::from_code(polled.state);
            if state != last {
                debug!(uin = self.uin, ?state, "QR code state changed");
                self.solver.qr_state_changed(self.uin, state).await;
                last = state;
            }

            match state {
                QrCodeState::WaitingForScan | QrCodeState::WaitingForConfirm => continue,
                QrCodeState::Confirmed => {
                    return Ok(QrConfirmation {
                        uin: polled.uin,
                        login_sig: polled.login_sig,
                    })
                }
                QrCodeState::Cancelled => return Err(AuthError::QrCodeCancelled.into()),
                QrCodeState::Timeout => return Err(AuthError::QrCodeTimeout.into()),
                QrCodeState::Unknown(code) => {
                    return Err(AuthError::Unexpected(format!("QR code state {}", code)).into())
                }
            }
        }
    }
}
