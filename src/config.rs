//! Engine configuration.
//!
//! Everything tunable lives in [`BotConfiguration`]. It is plain serde data
//! so the session owner can load it from whatever store it uses; the engine
//! only reads it. Durations are written as integer milliseconds.

use std::io::Read;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{md5, Key};
use crate::error::{Result, WireError};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;

/// `#[serde(with = "millis")]` for `Duration` fields.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Exponential backoff between reconnection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "millis", rename = "initial_ms")]
    pub initial: Duration,
    #[serde(with = "millis", rename = "max_ms")]
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// No failures means no delay; the first retry waits `initial`, each
    /// further one `multiplier` times longer, capped at `max`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(failures.saturating_sub(1).min(64) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Device fingerprint reported during login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub imei: String,
    pub android_id: String,
    pub mac_address: String,
    /// Hex-encoded 16-byte guid. Derived when absent.
    pub guid: Option<String>,
    pub brand: String,
    pub model: String,
    pub os_version: String,
    pub app_id: u32,
    pub sub_app_id: u32,
    pub apk_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            imei: "468356291846738".into(),
            android_id: "sso.wire.default".into(),
            mac_address: "02:00:00:00:00:00".into(),
            guid: None,
            brand: "sso-wire".into(),
            model: "sso-wire".into(),
            os_version: "10".into(),
            app_id: 16,
            sub_app_id: 537_066_738,
            apk_version: "8.8.88".into(),
        }
    }
}

impl DeviceInfo {
    /// A fresh random fingerprint.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let imei: String = (0..15).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect();
        let android_id = hex::encode(rng.gen::<[u8; 8]>());
        let mac: Vec<String> = rng.gen::<[u8; 6]>().iter().map(|b| format!("{:02X}", b)).collect();
        Self {
            imei,
            android_id,
            mac_address: mac.join(":"),
            ..Self::default()
        }
    }

    /// The 16-byte device guid: the configured one, or
    /// `md5(android_id ‖ mac_address)`.
    pub fn guid(&self) -> Result<Key> {
        match &self.guid {
            Some(text) => {
                let raw = hex::decode(text)
                    .map_err(|e| WireError::Protocol(format!("device guid: {}", e)))?;
                Key::try_from(raw.as_slice()).map_err(|_| {
                    WireError::Protocol(format!("device guid must be 16 bytes, got {}", raw.len()))
                })
            }
            None => {
                let mut seed = self.android_id.clone().into_bytes();
                seed.extend_from_slice(self.mac_address.as_bytes());
                Ok(md5(&seed))
            }
        }
    }
}

/// Top-level configuration for one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfiguration {
    pub device: DeviceInfo,

    #[serde(with = "millis", rename = "heartbeat_period_ms")]
    pub heartbeat_period: Duration,
    #[serde(with = "millis", rename = "heartbeat_timeout_ms")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "millis", rename = "stat_heartbeat_period_ms")]
    pub stat_heartbeat_period: Duration,
    pub heartbeat_enabled: bool,

    #[serde(with = "millis", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// Sends per request before giving up with a timeout.
    pub request_attempts: u32,

    /// Consecutive failed reconnections before the selector gives up.
    pub reconnection_retry_times: u32,
    pub backoff: BackoffPolicy,

    /// Answers the solver may give to one challenge kind.
    pub challenge_retries: u32,
    #[serde(with = "millis", rename = "qr_poll_interval_ms")]
    pub qr_poll_interval: Duration,
    #[serde(with = "millis", rename = "qr_timeout_ms")]
    pub qr_timeout: Duration,

    pub notice_queue_capacity: usize,
    pub max_frame_size: usize,
    pub writer: WriterConfig,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            device: DeviceInfo::default(),
            heartbeat_period: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(5),
            stat_heartbeat_period: Duration::from_secs(300),
            heartbeat_enabled: true,
            request_timeout: Duration::from_secs(5),
            request_attempts: 2,
            reconnection_retry_times: u32::MAX,
            backoff: BackoffPolicy::default(),
            challenge_retries: 3,
            qr_poll_interval: Duration::from_secs(1),
            qr_timeout: Duration::from_secs(120),
            notice_queue_capacity: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl BotConfiguration {
    /// Parse from JSON; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfiguration::default();
        assert_eq!(config.heartbeat_period, Duration::from_secs(60));
        assert_eq!(config.request_attempts, 2);
        assert_eq!(config.reconnection_retry_times, u32::MAX);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BotConfiguration::from_json(
            r#"{"request_timeout_ms": 1500, "backoff": {"initial_ms": 10}, "device": {"model": "x"}}"#,
        )
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.backoff.initial, Duration::from_millis(10));
        assert_eq!(config.backoff.max, Duration::from_secs(60));
        assert_eq!(config.device.model, "x");
        assert_eq!(config.challenge_retries, 3);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = BotConfiguration::default();
        config.qr_timeout = Duration::from_millis(777);
        let back = BotConfiguration::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_reader() {
        let config = BotConfiguration::from_reader(&b"{\"heartbeat_enabled\": false}"[..]).unwrap();
        assert!(!config.heartbeat_enabled);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            BotConfiguration::from_json("{\"request_attempts\": \"two\"}"),
            Err(WireError::Json(_))
        ));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_guid_derived_and_explicit() {
        let device = DeviceInfo::default();
        let derived = device.guid().unwrap();
        assert_eq!(derived, md5(b"sso.wire.default02:00:00:00:00:00"));

        let explicit = DeviceInfo {
            guid: Some("00112233445566778899aabbccddeeff".into()),
            ..DeviceInfo::default()
        };
        assert_eq!(explicit.guid().unwrap()[15], 0xff);

        let bad = DeviceInfo {
            guid: Some("0011".into()),
            ..DeviceInfo::default()
        };
        assert!(bad.guid().is_err());
    }

    #[test]
    fn test_random_device() {
        let a = DeviceInfo::random();
        let b = DeviceInfo::random();
        assert_eq!(a.imei.len(), 15);
        assert_eq!(a.mac_address.len(), 17);
        assert_ne!(a.android_id, b.android_id);
    }
}
