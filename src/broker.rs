//! Broker link verification
//!
//! Two signals describe whether a broker connection is proven to work: the
//! legacy `CONNECTED` status (verified only once `last_success_at` is set) and
//! the canonical `VERIFIED`/`UNVERIFIED` flag. Neither is treated as the
//! source of truth; both are surfaced side by side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Legacy connection status reported by the broker integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyBrokerStatus {
    Connected,
    Disconnected,
    Error,
}

/// Canonical verification flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalVerification {
    Verified,
    Unverified,
}

/// Raw broker link telemetry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerLink {
    pub legacy_status: Option<LegacyBrokerStatus>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub canonical: Option<CanonicalVerification>,
}

/// Whether the two verification signals agree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAgreement {
    Agree,
    Conflict,
    /// At most one signal is present
    Unknown,
}

/// Both verification readings, unmerged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerVerification {
    pub legacy_verified: Option<bool>,
    pub canonical_verified: Option<bool>,
    pub agreement: SignalAgreement,
}

impl BrokerVerification {
    pub fn from_link(link: &BrokerLink) -> Self {
        let legacy_verified = link.legacy_status.map(|status| {
            status == LegacyBrokerStatus::Connected && link.last_success_at.is_some()
        });
        let canonical_verified = link
            .canonical
            .map(|c| c == CanonicalVerification::Verified);

        let agreement = match (legacy_verified, canonical_verified) {
            (Some(a), Some(b)) if a == b => SignalAgreement::Agree,
            (Some(_), Some(_)) => SignalAgreement::Conflict,
            _ => SignalAgreement::Unknown,
        };

        Self {
            legacy_verified,
            canonical_verified,
            agreement,
        }
    }

    /// At least one signal says verified and none says unverified
    pub fn is_verified(&self) -> bool {
        let readings = [self.legacy_verified, self.canonical_verified];
        readings.iter().any(|r| *r == Some(true)) && !readings.iter().any(|r| *r == Some(false))
    }

    /// Human-readable summary of both readings
    pub fn describe(&self) -> String {
        fn reading(value: Option<bool>) -> &'static str {
            match value {
                Some(true) => "verified",
                Some(false) => "unverified",
                None => "unknown",
            }
        }
        format!(
            "legacy={}, canonical={}",
            reading(self.legacy_verified),
            reading(self.canonical_verified)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(
        legacy: Option<LegacyBrokerStatus>,
        success: bool,
        canonical: Option<CanonicalVerification>,
    ) -> BrokerLink {
        BrokerLink {
            legacy_status: legacy,
            last_success_at: if success { Some(Utc::now()) } else { None },
            canonical,
        }
    }

    #[test]
    fn test_legacy_connected_requires_success() {
        let v = BrokerVerification::from_link(&link(
            Some(LegacyBrokerStatus::Connected),
            false,
            None,
        ));
        assert_eq!(v.legacy_verified, Some(false));
        assert!(!v.is_verified());

        let v = BrokerVerification::from_link(&link(
            Some(LegacyBrokerStatus::Connected),
            true,
            None,
        ));
        assert_eq!(v.legacy_verified, Some(true));
        assert_eq!(v.agreement, SignalAgreement::Unknown);
        assert!(v.is_verified());
    }

    #[test]
    fn test_conflict_is_not_verified() {
        let v = BrokerVerification::from_link(&link(
            Some(LegacyBrokerStatus::Connected),
            true,
            Some(CanonicalVerification::Unverified),
        ));
        assert_eq!(v.agreement, SignalAgreement::Conflict);
        assert!(!v.is_verified());
        assert_eq!(v.describe(), "legacy=verified, canonical=unverified");
    }

    #[test]
    fn test_no_signals() {
        let v = BrokerVerification::from_link(&BrokerLink::default());
        assert_eq!(v.agreement, SignalAgreement::Unknown);
        assert!(!v.is_verified());
    }
}
