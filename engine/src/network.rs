//! Network profile adaptation.
//!
//! Maps a device's connectivity class (and, on cellular links, its carrier)
//! to transport tuning. Every input, including unknown or missing values,
//! yields a usable profile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Connectivity class reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NetworkType {
    #[serde(rename = "wifi")]
    Wifi,
    #[serde(rename = "ethernet")]
    Ethernet,
    #[serde(rename = "5g")]
    FiveG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "slow-2g")]
    Slow2G,
    #[default]
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl NetworkType {
    /// Parse a loosely formatted label; anything unrecognised is `Unknown`.
    pub fn parse(label: Option<&str>) -> Self {
        label
            .and_then(|l| l.parse().ok())
            .unwrap_or(NetworkType::Unknown)
    }

    pub fn is_cellular(&self) -> bool {
        matches!(
            self,
            NetworkType::FiveG
                | NetworkType::FourG
                | NetworkType::ThreeG
                | NetworkType::TwoG
                | NetworkType::Slow2G
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Wifi => "wifi",
            NetworkType::Ethernet => "ethernet",
            NetworkType::FiveG => "5g",
            NetworkType::FourG => "4g",
            NetworkType::ThreeG => "3g",
            NetworkType::TwoG => "2g",
            NetworkType::Slow2G => "slow-2g",
            NetworkType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" | "wi-fi" => Ok(NetworkType::Wifi),
            "ethernet" | "wired" => Ok(NetworkType::Ethernet),
            "5g" => Ok(NetworkType::FiveG),
            "4g" | "lte" => Ok(NetworkType::FourG),
            "3g" => Ok(NetworkType::ThreeG),
            "2g" | "edge" => Ok(NetworkType::TwoG),
            "slow-2g" | "slow2g" => Ok(NetworkType::Slow2G),
            "unknown" | "" => Ok(NetworkType::Unknown),
            other => Err(format!("unknown network type: {}", other)),
        }
    }
}

/// Mobile carrier of a cellular device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MobileProvider {
    Grameenphone,
    Robi,
    Banglalink,
    Teletalk,
    #[serde(other)]
    Other,
}

impl MobileProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MobileProvider::Grameenphone => "grameenphone",
            MobileProvider::Robi => "robi",
            MobileProvider::Banglalink => "banglalink",
            MobileProvider::Teletalk => "teletalk",
            MobileProvider::Other => "other",
        }
    }

    /// Carriers whose links drop often enough to warrant an extra retry.
    fn is_unstable(&self) -> bool {
        matches!(self, MobileProvider::Teletalk | MobileProvider::Other)
    }
}

impl FromStr for MobileProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grameenphone" | "gp" => Ok(MobileProvider::Grameenphone),
            "robi" | "airtel" => Ok(MobileProvider::Robi),
            "banglalink" | "bl" => Ok(MobileProvider::Banglalink),
            "teletalk" => Ok(MobileProvider::Teletalk),
            "" => Err("empty provider".to_string()),
            _ => Ok(MobileProvider::Other),
        }
    }
}

/// Retry spacing for client-side resends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (1-based), capped at `max_ms`.
    pub fn delay_ms(&self, attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
        let attempt = attempt.max(1);
        let delay = match self {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(u64::from(attempt)),
            BackoffStrategy::Exponential => {
                base_ms.saturating_mul(1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX))
            }
        };
        delay.min(max_ms)
    }
}

/// Transport tuning for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Deflate level, 0 (off) to 9
    pub compression_level: u32,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_strategy: BackoffStrategy,
}

impl NetworkProfile {
    /// Middle-of-the-road settings for unknown connectivity.
    pub const fn balanced() -> Self {
        Self {
            compression_level: 6,
            batch_size: 20,
            batch_timeout_ms: 150,
            max_retries: 4,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn compresses(&self) -> bool {
        self.compression_level > 0
    }
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Pick the profile for a connectivity class and optional carrier.
pub fn profile_for(network: NetworkType, provider: Option<MobileProvider>) -> NetworkProfile {
    let mut profile = match network {
        NetworkType::Wifi | NetworkType::Ethernet => NetworkProfile {
            compression_level: 0,
            batch_size: 50,
            batch_timeout_ms: 50,
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Linear,
        },
        NetworkType::FiveG | NetworkType::FourG => NetworkProfile {
            compression_level: 3,
            batch_size: 30,
            batch_timeout_ms: 100,
            max_retries: 3,
            backoff_strategy: BackoffStrategy::Exponential,
        },
        NetworkType::ThreeG => NetworkProfile {
            compression_level: 6,
            batch_size: 10,
            batch_timeout_ms: 300,
            max_retries: 5,
            backoff_strategy: BackoffStrategy::Exponential,
        },
        NetworkType::TwoG | NetworkType::Slow2G => NetworkProfile {
            compression_level: 9,
            batch_size: 5,
            batch_timeout_ms: 800,
            max_retries: 7,
            backoff_strategy: BackoffStrategy::Exponential,
        },
        NetworkType::Unknown => NetworkProfile::balanced(),
    };

    if network.is_cellular() && provider.is_some_and(|p| p.is_unstable()) {
        profile.max_retries += 1;
    }

    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NetworkType; 8] = [
        NetworkType::Wifi,
        NetworkType::Ethernet,
        NetworkType::FiveG,
        NetworkType::FourG,
        NetworkType::ThreeG,
        NetworkType::TwoG,
        NetworkType::Slow2G,
        NetworkType::Unknown,
    ];

    #[test]
    fn every_network_type_has_valid_profile() {
        for network in ALL {
            for provider in [None, Some(MobileProvider::Grameenphone), Some(MobileProvider::Other)] {
                let profile = profile_for(network, provider);
                assert!(profile.compression_level <= 9, "{}", network);
                assert!(profile.batch_size > 0, "{}", network);
                assert!(profile.batch_timeout_ms > 0, "{}", network);
                assert!(profile.max_retries > 0, "{}", network);
            }
        }
    }

    #[test]
    fn unknown_falls_back_to_balanced() {
        assert_eq!(profile_for(NetworkType::Unknown, None), NetworkProfile::balanced());
        assert_eq!(NetworkType::parse(None), NetworkType::Unknown);
        assert_eq!(NetworkType::parse(Some("carrier-pigeon")), NetworkType::Unknown);
        assert_eq!(NetworkType::parse(Some("LTE")), NetworkType::FourG);
    }

    #[test]
    fn slower_links_compress_harder() {
        let wifi = profile_for(NetworkType::Wifi, None);
        let g4 = profile_for(NetworkType::FourG, None);
        let g2 = profile_for(NetworkType::TwoG, None);
        assert!(!wifi.compresses());
        assert!(wifi.compression_level < g4.compression_level);
        assert!(g4.compression_level < g2.compression_level);
        assert!(wifi.batch_size > g2.batch_size);
    }

    #[test]
    fn unstable_carrier_gets_extra_retry_on_cellular_only() {
        let base = profile_for(NetworkType::ThreeG, Some(MobileProvider::Grameenphone));
        let shaky = profile_for(NetworkType::ThreeG, Some(MobileProvider::Teletalk));
        assert_eq!(shaky.max_retries, base.max_retries + 1);

        let wifi = profile_for(NetworkType::Wifi, Some(MobileProvider::Teletalk));
        assert_eq!(wifi, profile_for(NetworkType::Wifi, None));
    }

    #[test]
    fn network_type_deserializes_unknown_labels() {
        let parsed: NetworkType = serde_json::from_str(r#""4g""#).unwrap();
        assert_eq!(parsed, NetworkType::FourG);
        let parsed: NetworkType = serde_json::from_str(r#""satellite""#).unwrap();
        assert_eq!(parsed, NetworkType::Unknown);
        let parsed: MobileProvider = serde_json::from_str(r#""vodafone""#).unwrap();
        assert_eq!(parsed, MobileProvider::Other);
    }

    #[test]
    fn backoff_delays() {
        assert_eq!(BackoffStrategy::Fixed.delay_ms(3, 100, 10_000), 100);
        assert_eq!(BackoffStrategy::Linear.delay_ms(3, 100, 10_000), 300);
        assert_eq!(BackoffStrategy::Exponential.delay_ms(1, 100, 10_000), 100);
        assert_eq!(BackoffStrategy::Exponential.delay_ms(4, 100, 10_000), 800);
        assert_eq!(BackoffStrategy::Exponential.delay_ms(80, 100, 10_000), 10_000);
    }

    #[test]
    fn profile_serializes_camel_case() {
        let json = serde_json::to_value(NetworkProfile::balanced()).unwrap();
        assert_eq!(json["compressionLevel"], 6);
        assert_eq!(json["batchTimeoutMs"], 150);
        assert_eq!(json["backoffStrategy"], "exponential");
    }
}
