//! PIX BR Code checksum codec.
//!
//! A BR Code is an EMV-QR text payload of concatenated `ID LEN VALUE` fields
//! terminated by a CRC field tagged `63`, length `04`. The CRC covers every
//! byte before its own value, including the `6304` tag and length. At least
//! one gateway has been observed returning payloads with a stale trailer, and
//! banks reject QR codes whose CRC does not check out, so every PIX payload
//! handed to an end user goes through [`add_crc`] first.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::Environment;

const CRC_POLYNOMIAL: u16 = 0x1021;
const CRC_TAG_LEN: &str = "6304";
const FORMAT_PREFIX: &str = "000201";
// Heuristic floor for a plausible BR Code; this is not a full EMV parser.
const MIN_CODE_LEN: usize = 100;

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final XOR.
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn format_crc(crc: u16) -> String {
    format!("{:04X}", crc)
}

/// Structured result of [`validate`]. Never an error: malformed input shows up
/// as `format_valid == false`.
#[derive(Debug, Clone, Serialize)]
pub struct CrcReport {
    pub format_valid: bool,
    pub crc_valid: bool,
    pub crc_received: Option<String>,
    pub crc_calculated: Option<String>,
}

/// Checks a full BR Code: prefix/length heuristics plus the CRC trailer.
pub fn validate(code: &str) -> CrcReport {
    let format_valid = code.starts_with(FORMAT_PREFIX) && code.len() >= MIN_CODE_LEN;

    if code.len() < 8 || !code.is_ascii() {
        return CrcReport {
            format_valid,
            crc_valid: false,
            crc_received: None,
            crc_calculated: None,
        };
    }

    let split = code.len() - 4;
    let received = &code[split..];
    let calculated = format_crc(crc16_ccitt_false(code[..split].as_bytes()));
    let crc_valid = received.to_ascii_uppercase() == calculated;

    CrcReport {
        format_valid,
        crc_valid,
        crc_received: Some(received.to_string()),
        crc_calculated: Some(calculated),
    }
}

fn has_crc_trailer(payload: &str) -> bool {
    payload.len() >= 8
        && payload.is_char_boundary(payload.len() - 8)
        && payload[payload.len() - 8..].starts_with(CRC_TAG_LEN)
        && payload[payload.len() - 4..]
            .chars()
            .all(|c| c.is_ascii_hexdigit())
}

/// Appends (or replaces) the `6304XXXX` trailer with a freshly computed CRC.
///
/// Idempotent: `add_crc(add_crc(x)) == add_crc(x)`. Payloads too short to
/// carry a CRC field are returned unchanged; callers detect that case through
/// [`validate`]'s `format_valid`.
pub fn add_crc(payload: &str) -> String {
    if payload.len() < FORMAT_PREFIX.len() || !payload.is_ascii() {
        return payload.to_string();
    }

    let base = if has_crc_trailer(payload) {
        &payload[..payload.len() - 8]
    } else if payload.ends_with(CRC_TAG_LEN) {
        &payload[..payload.len() - 4]
    } else {
        payload
    };

    let mut code = String::with_capacity(base.len() + 8);
    code.push_str(base);
    code.push_str(CRC_TAG_LEN);
    let crc = crc16_ccitt_false(code.as_bytes());
    code.push_str(&format_crc(crc));
    code
}

#[derive(Default)]
struct EnvCounters {
    checked: AtomicU64,
    corrected: AtomicU64,
}

impl EnvCounters {
    fn record(&self, corrected: bool) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        if corrected {
            self.corrected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> EnvSnapshot {
        let checked = self.checked.load(Ordering::Relaxed);
        let corrected = self.corrected.load(Ordering::Relaxed);
        let correction_ratio = if checked == 0 {
            0.0
        } else {
            corrected as f64 / checked as f64
        };
        EnvSnapshot {
            checked,
            corrected,
            correction_ratio,
        }
    }
}

/// Running tally of gateway payloads whose CRC needed fixing, split by
/// environment. Fed to support tooling for vendor escalation.
#[derive(Default)]
pub struct CorrectionStats {
    sandbox: EnvCounters,
    production: EnvCounters,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvSnapshot {
    pub checked: u64,
    pub corrected: u64,
    pub correction_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub sandbox: EnvSnapshot,
    pub production: EnvSnapshot,
}

impl CorrectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, environment: Environment, corrected: bool) {
        match environment {
            Environment::Sandbox => self.sandbox.record(corrected),
            Environment::Production => self.production.record(corrected),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sandbox: self.sandbox.snapshot(),
            production: self.production.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 137-char payload from the BCB static-code example family.
    const CODE: &str = "00020126580014BR.GOV.BCB.PIX0136123e4567-e12b-12d1-a456-4266554400005204000053039865802BR5913Fulano de Tal6008BRASILIA62070503***6304F01B";

    #[test]
    fn compute_is_deterministic() {
        let payload = &CODE[..CODE.len() - 4];
        let a = crc16_ccitt_false(payload.as_bytes());
        let b = crc16_ccitt_false(payload.as_bytes());
        assert_eq!(a, b);
        assert_eq!(format_crc(a), "F01B");
    }

    #[test]
    fn validate_accepts_known_vector() {
        let report = validate(CODE);
        assert!(report.format_valid);
        assert!(report.crc_valid);
        assert_eq!(report.crc_received.as_deref(), Some("F01B"));
        assert_eq!(report.crc_calculated.as_deref(), Some("F01B"));
    }

    #[test]
    fn validate_rejects_corrupted_trailer() {
        let mut corrupted = CODE[..CODE.len() - 4].to_string();
        corrupted.push_str("0000");
        let report = validate(&corrupted);
        assert!(report.format_valid);
        assert!(!report.crc_valid);
        assert_eq!(report.crc_received.as_deref(), Some("0000"));
        assert_ne!(report.crc_calculated.as_deref(), Some("0000"));
    }

    #[test]
    fn validate_flags_short_or_misprefixed_codes() {
        assert!(!validate("000201ABC").format_valid);
        let mut wrong_prefix = CODE.to_string();
        wrong_prefix.replace_range(0..6, "000301");
        assert!(!validate(&wrong_prefix).format_valid);
    }

    #[test]
    fn add_crc_appends_valid_trailer() {
        let bare = &CODE[..CODE.len() - 8];
        let fixed = add_crc(bare);
        assert_eq!(fixed, CODE);
        assert!(validate(&fixed).crc_valid);
    }

    #[test]
    fn add_crc_replaces_stale_trailer() {
        let mut stale = CODE[..CODE.len() - 4].to_string();
        stale.push_str("BEEF");
        assert_eq!(add_crc(&stale), CODE);
    }

    #[test]
    fn add_crc_is_idempotent() {
        let once = add_crc(CODE);
        let twice = add_crc(&once);
        assert_eq!(once, twice);
        assert_eq!(once, CODE);
    }

    #[test]
    fn add_crc_leaves_tiny_payloads_alone() {
        assert_eq!(add_crc("00"), "00");
        assert_eq!(add_crc(""), "");
    }

    #[test]
    fn stats_track_corrections_per_environment() {
        let stats = CorrectionStats::new();
        stats.record(Environment::Sandbox, true);
        stats.record(Environment::Sandbox, false);
        stats.record(Environment::Production, false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sandbox.checked, 2);
        assert_eq!(snapshot.sandbox.corrected, 1);
        assert!((snapshot.sandbox.correction_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.production.checked, 1);
        assert_eq!(snapshot.production.corrected, 0);
    }
}
