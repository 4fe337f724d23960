//! Connection state and quality classification.
//!
//! # State Derivation
//! ```text
//! !online                  → Offline
//! save_data                → Slow
//! effective type slow-2g/2g → Slow
//! effective type 3g        → Medium
//! 4g / other / absent      → Fast
//! ```

use serde::{Deserialize, Serialize};

/// Simplified connection quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// No signal observed yet.
    Unknown,
    Offline,
    Slow,
    Medium,
    Fast,
}

/// Snapshot of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub online: bool,
    pub quality: ConnectionQuality,
}

impl ConnectionState {
    /// Build a state from raw platform signals.
    pub fn from_signals(online: bool, info: Option<&NetworkInformation>) -> Self {
        Self {
            online,
            quality: classify_quality(online, info),
        }
    }
}

impl Default for ConnectionState {
    /// Optimistic default used before the first signal.
    fn default() -> Self {
        Self {
            online: true,
            quality: ConnectionQuality::Unknown,
        }
    }
}

/// Best-effort network details, mirroring what browsers expose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInformation {
    /// `slow-2g`, `2g`, `3g` or `4g`.
    pub effective_type: Option<String>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u64>,
    /// Data-saver preference.
    pub save_data: bool,
}

/// Derive a quality bucket from online flag and network details.
pub fn classify_quality(online: bool, info: Option<&NetworkInformation>) -> ConnectionQuality {
    if !online {
        return ConnectionQuality::Offline;
    }

    let Some(info) = info else {
        return ConnectionQuality::Fast;
    };

    if info.save_data {
        return ConnectionQuality::Slow;
    }

    match info.effective_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("slow-2g") | Some("2g") => ConnectionQuality::Slow,
        Some("3g") => ConnectionQuality::Medium,
        _ => ConnectionQuality::Fast,
    }
}

/// Map a measured round-trip time to an effective connection type.
///
/// Thresholds follow the Network Information API's table.
pub fn effective_type_from_rtt(rtt_ms: u64) -> &'static str {
    match rtt_ms {
        2000.. => "slow-2g",
        1400..=1999 => "2g",
        270..=1399 => "3g",
        _ => "4g",
    }
}
