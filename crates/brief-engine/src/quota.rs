use tracing::{instrument, warn};

use brief_core::ids::UserId;
use brief_core::quota::{QuotaPolicy, RateLimitDecision, Tier, UsageProfile};
use brief_store::usage::UsageRepo;
use brief_store::Database;

use crate::error::EngineError;

/// Tier-policy gate over the per-user usage counter.
///
/// `check` is advisory and side-effect free; `consume` is the authoritative
/// gate, backed by the store's conditional atomic increment.
pub struct RateLimiter {
    usage: UsageRepo,
}

impl RateLimiter {
    pub fn new(db: Database) -> Self {
        Self {
            usage: UsageRepo::new(db),
        }
    }

    /// Compute the current decision for a user without consuming quota.
    ///
    /// Any storage failure degrades to a conservative denial — ambiguous
    /// state never grants access. The underlying error is logged for
    /// operators, not surfaced.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn check(&self, user_id: &UserId) -> RateLimitDecision {
        match self.usage.get_or_create(user_id) {
            Ok(profile) => {
                let tier = Tier::from_tag(&profile.tier);
                RateLimitDecision::evaluate(tier, profile.usage_count)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "usage lookup failed, denying conservatively");
                RateLimitDecision::denied_conservative()
            }
        }
    }

    /// Atomically consume one unit of quota, returning the post-increment
    /// profile. Quota exhaustion is a decision value
    /// (`EngineError::QuotaExhausted`); storage failures propagate
    /// explicitly so callers can tell "try again" from "you're out".
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn consume(&self, user_id: &UserId) -> Result<UsageProfile, EngineError> {
        let profile = self.usage.get_or_create(user_id)?;
        let tier = Tier::from_tag(&profile.tier);
        let limit = QuotaPolicy::session_limit(tier);

        match self.usage.try_consume(user_id, limit)? {
            Some(row) => Ok(UsageProfile {
                user_id: row.user_id,
                tier,
                usage_count: row.usage_count,
            }),
            None => {
                let denied = RateLimitDecision::evaluate(tier, profile.usage_count.max(limit));
                Err(EngineError::QuotaExhausted(denied))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, RateLimiter) {
        let db = Database::in_memory().unwrap();
        (db.clone(), RateLimiter::new(db))
    }

    #[test]
    fn fresh_user_gets_full_free_quota() {
        let (_, limiter) = setup();
        let d = limiter.check(&UserId::new());
        assert!(d.allowed);
        assert_eq!(d.limit, 10);
        assert_eq!(d.remaining, 10);
        assert_eq!(d.tier, Tier::Free);
    }

    #[test]
    fn check_tracks_consumption() {
        let (_, limiter) = setup();
        let user = UserId::new();
        for consumed in 1..=10 {
            limiter.consume(&user).unwrap();
            let d = limiter.check(&user);
            assert_eq!(d.remaining, 10 - consumed);
            assert_eq!(d.allowed, consumed < 10);
        }
    }

    #[test]
    fn consume_past_limit_is_a_decision_not_an_error_blob() {
        let (_, limiter) = setup();
        let user = UserId::new();
        for _ in 0..10 {
            limiter.consume(&user).unwrap();
        }
        match limiter.consume(&user) {
            Err(EngineError::QuotaExhausted(d)) => {
                assert!(!d.allowed);
                assert_eq!(d.remaining, 0);
                assert_eq!(d.limit, 10);
            }
            other => panic!("expected QuotaExhausted, got {other:?}"),
        }
    }

    #[test]
    fn premium_alias_maps_to_pro_policy() {
        let (db, limiter) = setup();
        let user = UserId::new();
        UsageRepo::new(db).set_tier(&user, "premium").unwrap();

        let d = limiter.check(&user);
        assert_eq!(d.tier, Tier::Pro);
        assert_eq!(d.limit, i64::MAX);
    }

    #[test]
    fn unknown_tier_falls_back_to_free_policy() {
        let (db, limiter) = setup();
        let user = UserId::new();
        UsageRepo::new(db).set_tier(&user, "enterprise").unwrap();

        let d = limiter.check(&user);
        assert_eq!(d.tier, Tier::Free);
        assert_eq!(d.limit, 10);
    }

    #[test]
    fn pro_user_is_never_denied() {
        let (db, limiter) = setup();
        let user = UserId::new();
        UsageRepo::new(db).set_tier(&user, "pro").unwrap();

        for _ in 0..50 {
            limiter.consume(&user).unwrap();
        }
        assert!(limiter.check(&user).allowed);
    }

    #[test]
    fn check_fails_closed_on_storage_error() {
        let (db, limiter) = setup();
        // Break the storage layer underneath the limiter
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE usage_profiles")
                .map_err(|e| brief_store::StoreError::Database(e.to_string()))
        })
        .unwrap();

        let d = limiter.check(&UserId::new());
        assert_eq!(d, RateLimitDecision::denied_conservative());
    }

    #[test]
    fn consume_propagates_storage_errors_explicitly() {
        let (db, limiter) = setup();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE usage_profiles")
                .map_err(|e| brief_store::StoreError::Database(e.to_string()))
        })
        .unwrap();

        match limiter.consume(&UserId::new()) {
            Err(EngineError::Store(_)) => {}
            other => panic!("expected Store error, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_consume_never_overshoots_limit() {
        let (db, limiter) = setup();
        let user = UserId::new();
        for _ in 0..9 {
            limiter.consume(&user).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = RateLimiter::new(db.clone());
            let user = user.clone();
            handles.push(std::thread::spawn(move || limiter.consume(&user).is_ok()));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        let d = limiter.check(&user);
        assert_eq!(d.remaining, 0);
        assert!(!d.allowed);
    }
}
