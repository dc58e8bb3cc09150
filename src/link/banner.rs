//! # Reset Banner
//!
//! After the host sends `HELLO\n` the vehicle answers with one text line
//! describing why it last restarted, then switches to binary telemetry:
//!
//! ```text
//! RST:BROWNOUT,BOOT:3,PEND:1      first connection after a reset
//! RST:OK,BOOT:NA,PEND:0           nothing new since the last report
//! ```
//!
//! [`BannerReader`] collects bytes until the newline; whatever follows the
//! newline is telemetry and is handed back to the caller. [`ResetReport`]
//! parses the line.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

use crate::error::{GroundError, Result};

/// Longest banner line accepted before giving up on it
pub const MAX_BANNER_LEN: usize = 128;

/// Reason code reported when there was no new reset
pub const REASON_OK: &str = "OK";

const RESET_EXPLANATIONS: &[(&str, &str)] = &[
    ("POWERON", "Power cycled. Likely switch toggled or intermittent power/regulator/connector."),
    ("BROWNOUT", "3.3V rail dipped below brown-out threshold (~2.9-3.0 V). Check power/loads/wiring."),
    ("SW_RESET", "Software restart (esp_restart was called)."),
    ("WDT", "Watchdog timeout. A task or loop blocked too long."),
    ("TASK_WDT", "Task watchdog timeout. A specific task stalled."),
    ("INT_WDT", "Interrupt watchdog timeout."),
    ("PANIC", "Crash/exception (Guru Meditation). Check serial logs/backtrace."),
    ("EXT_PIN", "External reset pin toggled (EN/RST)."),
    ("DEEPSLEEP", "Woke up from deep sleep."),
    ("SDIO", "Reset via SDIO (rare)."),
    (REASON_OK, "Normal reconnect (no new reset)."),
];

/// Explanation for a reset reason code
///
/// # Examples
///
/// ```
/// use quad_ground::link::banner::explain_reset;
///
/// assert_eq!(explain_reset("WDT"), "Watchdog timeout. A task or loop blocked too long.");
/// assert_eq!(explain_reset("SOMETHING_NEW"), "Unrecognised reset reason.");
/// ```
pub fn explain_reset(reason: &str) -> &'static str {
    RESET_EXPLANATIONS
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(reason))
        .map(|(_, text)| *text)
        .unwrap_or("Unrecognised reset reason.")
}

/// Parsed reset banner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    raw: String,
    fields: BTreeMap<String, String>,
}

impl ResetReport {
    /// Parse a banner line of comma-separated `KEY:VALUE` tokens
    ///
    /// # Errors
    ///
    /// Returns `Banner` if the line is empty, a token is not `KEY:VALUE`
    /// with an alphanumeric key, or there is no `RST` token.
    pub fn parse(line: &str) -> Result<Self> {
        let raw = line.trim();
        if raw.is_empty() {
            return Err(GroundError::Banner("empty line".to_string()));
        }

        let mut fields = BTreeMap::new();
        for token in raw.split(',') {
            let (key, value) = token
                .split_once(':')
                .ok_or_else(|| GroundError::Banner(format!("token '{}' is not KEY:VALUE", token)))?;
            let key = key.trim();

            let key_ok = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !key_ok {
                return Err(GroundError::Banner(format!("invalid key '{}'", key)));
            }

            fields.insert(key.to_ascii_uppercase(), value.trim().to_string());
        }

        if !fields.contains_key("RST") {
            return Err(GroundError::Banner("missing RST field".to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            fields,
        })
    }

    /// The line as received, trimmed
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Reset reason code (`BROWNOUT`, `OK`, ...)
    pub fn reason(&self) -> &str {
        self.get("RST").unwrap_or(REASON_OK)
    }

    /// Boots since power-on; `None` when reported as `NA` or missing
    pub fn boot_count(&self) -> Option<u32> {
        self.get("BOOT").and_then(|value| value.parse().ok())
    }

    /// First report of this reset since the vehicle booted
    pub fn pending(&self) -> bool {
        self.get("PEND") == Some("1")
    }

    /// The vehicle restarted since the previous report
    pub fn is_new_reset(&self) -> bool {
        !self.reason().eq_ignore_ascii_case(REASON_OK)
    }

    pub fn explain(&self) -> &'static str {
        explain_reset(self.reason())
    }
}

impl fmt::Display for ResetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reset reason {}", self.reason())?;
        if let Some(boot) = self.boot_count() {
            write!(f, " (boot #{})", boot)?;
        }
        write!(f, ": {}", self.explain())
    }
}

/// Progress of a [`BannerReader`] after absorbing bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BannerProgress {
    /// No newline yet
    Waiting,
    /// Line complete; `rest` are the bytes received after the newline
    Complete { line: String, rest: Vec<u8> },
    /// No newline within [`MAX_BANNER_LEN`]; `bytes` is everything buffered
    Overflow { bytes: Vec<u8> },
}

/// Collects the banner line within a deadline
#[derive(Debug)]
pub struct BannerReader {
    deadline: Instant,
    buf: Vec<u8>,
}

impl BannerReader {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            buf: Vec::with_capacity(MAX_BANNER_LEN),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Append received bytes and report whether the line is complete
    pub fn absorb(&mut self, data: &[u8]) -> BannerProgress {
        self.buf.extend_from_slice(data);

        if let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(newline + 1);
            let line = String::from_utf8_lossy(&self.buf[..newline]).trim().to_string();
            self.buf.clear();
            return BannerProgress::Complete { line, rest };
        }

        if self.buf.len() > MAX_BANNER_LEN {
            return BannerProgress::Overflow {
                bytes: std::mem::take(&mut self.buf),
            };
        }

        BannerProgress::Waiting
    }

    /// Give up waiting; returns the bytes buffered so far
    pub fn into_buffered(self) -> Vec<u8> {
        self.buf
    }
}
