//! Risk scoring.
//!
//! A pure function of the payment and its account context. Every factor is
//! looked up in [`RiskPolicy`] tiers, capped at the policy's per-factor
//! share, summed and clamped to `0..=100`. Internal errors never escape:
//! they produce the fallback score flagged as degraded.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountTier {
    /// Applies when the amount is strictly above this value.
    pub above: Decimal,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAgeTier {
    /// Applies when the account is younger than this many days.
    pub younger_than_days: u32,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VelocityTier {
    /// Applies when at least this many payments were created in the window.
    pub at_least: u32,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffHours {
    /// First off-hours hour (UTC, inclusive).
    pub start_hour: u8,
    /// Last off-hours hour (UTC, exclusive). May wrap past midnight.
    pub end_hour: u8,
    pub points: u32,
}

impl OffHours {
    fn contains(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Tiers and thresholds for risk scoring. Hot-reloadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskPolicy {
    /// Scores above this are blocked.
    pub block_above: u8,
    /// Scores above this (and not blocked) are flagged for review.
    pub review_above: u8,
    /// Ceiling for a single factor, as a share of 100.
    pub max_factor_share: Decimal,
    pub fallback_score: u8,
    pub velocity_window: Duration,
    pub amount_tiers: Vec<AmountTier>,
    pub account_age_tiers: Vec<AccountAgeTier>,
    pub velocity_tiers: Vec<VelocityTier>,
    pub missing_method_points: u32,
    pub off_hours: OffHours,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            block_above: 80,
            review_above: 60,
            max_factor_share: Decimal::new(4, 1),
            fallback_score: 50,
            velocity_window: Duration::from_secs(3600),
            amount_tiers: vec![
                AmountTier { above: Decimal::from(10_000), points: 40 },
                AmountTier { above: Decimal::from(5_000), points: 30 },
                AmountTier { above: Decimal::from(1_000), points: 20 },
                AmountTier { above: Decimal::from(250), points: 10 },
            ],
            account_age_tiers: vec![
                AccountAgeTier { younger_than_days: 1, points: 30 },
                AccountAgeTier { younger_than_days: 7, points: 20 },
                AccountAgeTier { younger_than_days: 30, points: 10 },
            ],
            velocity_tiers: vec![
                VelocityTier { at_least: 10, points: 30 },
                VelocityTier { at_least: 5, points: 20 },
                VelocityTier { at_least: 3, points: 10 },
            ],
            missing_method_points: 10,
            off_hours: OffHours {
                start_hour: 0,
                end_hour: 6,
                points: 10,
            },
        }
    }
}

/// Everything the scorer looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskInput {
    pub amount: Decimal,
    /// Negative when the account claims to be created in the future.
    pub account_age: time::Duration,
    pub has_payment_method: bool,
    pub hour_of_day: u8,
    pub recent_payments: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Approve,
    Review,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub score: u8,
    pub decision: RiskDecision,
    /// The score is the fallback, not a computed one.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("negative account age")]
    NegativeAccountAge,
    #[error("non-positive amount {0}")]
    NonPositiveAmount(Decimal),
    #[error("hour of day {0} out of range")]
    HourOutOfRange(u8),
    #[error("factor cap is not representable")]
    InvalidFactorCap,
}

impl RiskPolicy {
    pub fn decide(&self, score: u8) -> RiskDecision {
        if score > self.block_above {
            RiskDecision::Block
        } else if score > self.review_above {
            RiskDecision::Review
        } else {
            RiskDecision::Approve
        }
    }

    /// Score the input. Never fails; see [`RiskAssessment::degraded`].
    pub fn assess(&self, input: &RiskInput) -> RiskAssessment {
        match self.score(input) {
            Ok(score) => RiskAssessment {
                score,
                decision: self.decide(score),
                degraded: false,
            },
            Err(_) => self.fallback(),
        }
    }

    /// The assessment used when scoring cannot run at all.
    pub fn fallback(&self) -> RiskAssessment {
        let score = self.fallback_score.min(100);
        RiskAssessment {
            score,
            decision: self.decide(score),
            degraded: true,
        }
    }

    /// The raw computation behind [`assess`](Self::assess).
    pub fn score(&self, input: &RiskInput) -> Result<u8, ScoringError> {
        if input.account_age.is_negative() {
            return Err(ScoringError::NegativeAccountAge);
        }
        if input.amount <= Decimal::ZERO {
            return Err(ScoringError::NonPositiveAmount(input.amount));
        }
        if input.hour_of_day > 23 {
            return Err(ScoringError::HourOutOfRange(input.hour_of_day));
        }
        let cap = self
            .max_factor_share
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|c| c.floor().to_u32())
            .ok_or(ScoringError::InvalidFactorCap)?;

        let amount = self
            .amount_tiers
            .iter()
            .filter(|t| input.amount > t.above)
            .map(|t| t.points)
            .max()
            .unwrap_or(0);

        let age_days = u32::try_from(input.account_age.whole_days()).unwrap_or(u32::MAX);
        let age = self
            .account_age_tiers
            .iter()
            .filter(|t| age_days < t.younger_than_days)
            .map(|t| t.points)
            .max()
            .unwrap_or(0);

        let velocity = self
            .velocity_tiers
            .iter()
            .filter(|t| input.recent_payments >= t.at_least)
            .map(|t| t.points)
            .max()
            .unwrap_or(0);

        let missing_method = if input.has_payment_method {
            0
        } else {
            self.missing_method_points
        };

        let off_hours = if self.off_hours.contains(input.hour_of_day) {
            self.off_hours.points
        } else {
            0
        };

        let total: u32 = [amount, age, velocity, missing_method, off_hours]
            .into_iter()
            .map(|points| points.min(cap))
            .fold(0u32, u32::saturating_add);

        Ok(u8::try_from(total.min(100)).unwrap_or(100))
    }
}
