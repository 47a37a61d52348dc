//! Keep-alive loops run by an `Ok` handler.

use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handler::Inner;
use super::CancelToken;
use crate::auth::packets::CMD_HEARTBEAT;
use crate::config::BotConfiguration;
use crate::error::WireError;
use crate::protocol::EncryptionMode;

/// Session statistics ping, sent under the session key.
pub const CMD_STAT_HEARTBEAT: &str = "StatSvc.SimpleGet";

/// One periodic probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Job {
    pub command: &'static str,
    pub mode: EncryptionMode,
    pub period: Duration,
}

pub(super) fn jobs(config: &BotConfiguration) -> Vec<Job> {
    vec![
        Job {
            command: CMD_HEARTBEAT,
            mode: EncryptionMode::None,
            period: config.heartbeat_period,
        },
        Job {
            command: CMD_STAT_HEARTBEAT,
            mode: EncryptionMode::SessionKey,
            period: config.stat_heartbeat_period,
        },
    ]
}

/// Run `job` until cancelled. A probe that times out or comes back with a
/// non-zero code closes the handler.
pub(super) fn spawn(handle: Weak<Inner>, job: Job, timeout: Duration, cancel: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(job.period) => {}
            }
            let Some(inner) = handle.upgrade() else {
                return;
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                r = inner.roundtrip(job.command, job.mode, Bytes::new(), timeout) => r,
            };
            match outcome {
                Ok(reply) if reply.is_ok() => debug!(command = job.command, "heartbeat ok"),
                Ok(reply) => {
                    warn!(command = job.command, code = reply.return_code, "heartbeat rejected");
                    inner.close(Some(WireError::HeartbeatFailed));
                    return;
                }
                Err(e) => {
                    warn!(command = job.command, error = %e, "heartbeat failed");
                    inner.close(Some(WireError::HeartbeatFailed));
                    return;
                }
            }
        }
    })
}
