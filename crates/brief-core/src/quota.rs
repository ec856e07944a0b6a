use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Subscription tier controlling the lifetime session quota.
/// Tier values arrive from billing as open strings; anything this core
/// does not recognize resolves to the most restrictive policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    /// Normalize a raw billing tag into a tier.
    ///
    /// `"premium"` is a legacy alias for `pro`. Unknown or malformed tags
    /// fall back to `free` — fail-safe, never fail-open.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "pro" | "premium" => Self::Pro,
            _ => Self::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static tier → session-limit mapping.
pub struct QuotaPolicy;

impl QuotaPolicy {
    pub const FREE_SESSION_LIMIT: i64 = 10;

    /// Lifetime session limit for a tier. Pro is effectively unbounded.
    pub fn session_limit(tier: Tier) -> i64 {
        match tier {
            Tier::Free => Self::FREE_SESSION_LIMIT,
            Tier::Pro => i64::MAX,
        }
    }
}

/// Normalized per-user usage state, as seen by the rate limiter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageProfile {
    pub user_id: UserId,
    pub tier: Tier,
    pub usage_count: i64,
}

/// Outcome of a quota check. Derived on every call, never persisted.
///
/// Denial is a first-class value rather than an error: running out of
/// sessions is an expected outcome, distinct from a storage failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
    pub tier: Tier,
    /// Fixed hint carried on every decision, allowed or denied.
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    /// Quota is lifetime-cumulative, not a rolling window; retrying before
    /// a plan change is not meaningful. Surfaced as a fixed hint.
    pub const RETRY_AFTER_SECS: u64 = 86_400;

    /// Compute the decision for a tier at a given usage count.
    pub fn evaluate(tier: Tier, usage_count: i64) -> Self {
        let limit = QuotaPolicy::session_limit(tier);
        Self {
            allowed: usage_count < limit,
            remaining: (limit - usage_count).max(0),
            limit,
            tier,
            retry_after_secs: Self::RETRY_AFTER_SECS,
        }
    }

    /// Conservative decision used when the usage lookup itself failed.
    /// Ambiguous storage state always biases toward denial.
    pub fn denied_conservative() -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit: 0,
            tier: Tier::Free,
            retry_after_secs: Self::RETRY_AFTER_SECS,
        }
    }
}
