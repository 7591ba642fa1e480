//! Confidence bucketing shared by decisions and audit trails.

use serde::{Deserialize, Serialize};

/// Five-level ordinal confidence bucket. Ordered `VeryLow < ... < VeryHigh`
/// via the derived `PartialOrd`/`Ord` (variant declaration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    /// Map a raw score in `[0, 1]` to a bucket using the thresholds from
    /// the original decision-audit-trail model: `<0.3`, `0.3-0.5`,
    /// `0.5-0.7`, `0.7-0.9`, `>0.9`.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::VeryLow
        } else if score < 0.5 {
            Self::Low
        } else if score < 0.7 {
            Self::Medium
        } else if score < 0.9 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Degrade by one bucket (floor at `VeryLow`). Used when a pipeline
    /// step times out or the overall pipeline is aborted.
    #[must_use]
    pub fn degrade_one(self) -> Self {
        match self {
            Self::VeryHigh => Self::High,
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::VeryLow => Self::VeryLow,
        }
    }

    #[must_use]
    pub fn is_low(self) -> bool {
        matches!(self, Self::VeryLow | Self::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_score_boundaries() {
        assert_eq!(Confidence::from_score(0.0), Confidence::VeryLow);
        assert_eq!(Confidence::from_score(0.29), Confidence::VeryLow);
        assert_eq!(Confidence::from_score(0.3), Confidence::Low);
        assert_eq!(Confidence::from_score(0.5), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.7), Confidence::High);
        assert_eq!(Confidence::from_score(0.9), Confidence::VeryHigh);
        assert_eq!(Confidence::from_score(1.0), Confidence::VeryHigh);
    }

    #[test]
    fn ordinal_ordering() {
        assert!(Confidence::VeryLow < Confidence::Low);
        assert!(Confidence::High < Confidence::VeryHigh);
    }

    #[test]
    fn degrade_floors_at_very_low() {
        assert_eq!(Confidence::VeryLow.degrade_one(), Confidence::VeryLow);
        assert_eq!(Confidence::VeryHigh.degrade_one(), Confidence::High);
    }
}
