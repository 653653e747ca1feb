use serde::{Deserialize, Serialize};

pub const DEFAULT_MEDIUM_THRESHOLD: f64 = 0.4;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.7;

/// Coarse risk bucket derived from a continuous return probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability cut points between risk buckets. The values follow the
/// scoring engine's documented convention and can be overridden from the
/// environment, so they are never hard-coded at call sites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: DEFAULT_MEDIUM_THRESHOLD,
            high: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl RiskThresholds {
    pub fn from_env() -> Self {
        fn parse_threshold(key: &str) -> Option<f64> {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|value| (0.0..=1.0).contains(value))
        }

        let medium =
            parse_threshold("RR_RISK_MEDIUM_THRESHOLD").unwrap_or(DEFAULT_MEDIUM_THRESHOLD);
        let high = parse_threshold("RR_RISK_HIGH_THRESHOLD").unwrap_or(DEFAULT_HIGH_THRESHOLD);

        if medium >= high {
            tracing::warn!(
                medium,
                high,
                "risk thresholds are not ordered; falling back to defaults"
            );
            return Self::default();
        }

        Self { medium, high }
    }

    pub fn bucket(&self, probability: f64) -> RiskLevel {
        if probability < self.medium {
            RiskLevel::Low
        } else if probability < self.high {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}
