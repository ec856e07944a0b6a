use chrono::Utc;
use tracing::instrument;

use brief_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Per-user quota counter row.
///
/// `tier` stays a raw billing tag at this layer; normalization into the
/// closed `Tier` enum happens in the rate limiter so an unrecognized tag
/// written by billing can still be read back and fail-safed.
#[derive(Clone, Debug)]
pub struct UsageProfileRow {
    pub user_id: UserId,
    pub tier: String,
    pub usage_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct UsageRepo {
    db: Database,
}

impl UsageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Read a user's usage profile, bootstrapping a free-tier row with
    /// zero usage on first touch.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn get_or_create(&self, user_id: &UserId) -> Result<UsageProfileRow, StoreError> {
        self.db.with_conn(|conn| {
            ensure_row(conn, user_id)?;
            select_profile(conn, user_id)
        })
    }

    /// Atomically consume one unit of quota if usage is still below `limit`.
    ///
    /// The check and the increment are a single conditional UPDATE, not an
    /// application-level read-modify-write; two overlapping calls can never
    /// both pass a check and push the counter past the limit. Returns the
    /// post-increment profile, or `None` when quota was already exhausted.
    #[instrument(skip(self), fields(user_id = %user_id, limit))]
    pub fn try_consume(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Option<UsageProfileRow>, StoreError> {
        self.db.with_conn(|conn| {
            ensure_row(conn, user_id)?;
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE usage_profiles
                 SET usage_count = usage_count + 1, updated_at = ?2
                 WHERE user_id = ?1 AND usage_count < ?3",
                rusqlite::params![user_id.as_str(), now, limit],
            )?;

            if changed == 0 {
                return Ok(None);
            }
            select_profile(conn, user_id).map(Some)
        })
    }

    /// Overwrite a user's tier tag. Billing-owned write path; the pipeline
    /// itself only ever reads tiers.
    #[instrument(skip(self), fields(user_id = %user_id, tier))]
    pub fn set_tier(&self, user_id: &UserId, tier: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            ensure_row(conn, user_id)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE usage_profiles SET tier = ?2, updated_at = ?3 WHERE user_id = ?1",
                rusqlite::params![user_id.as_str(), tier, now],
            )?;
            Ok(())
        })
    }
}

fn ensure_row(conn: &rusqlite::Connection, user_id: &UserId) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO usage_profiles (user_id, tier, usage_count, created_at, updated_at)
         VALUES (?1, 'free', 0, ?2, ?2)",
        rusqlite::params![user_id.as_str(), now],
    )?;
    Ok(())
}

fn select_profile(
    conn: &rusqlite::Connection,
    user_id: &UserId,
) -> Result<UsageProfileRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, tier, usage_count, created_at, updated_at
         FROM usage_profiles WHERE user_id = ?1",
    )?;
    let mut rows = stmt.query([user_id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(UsageProfileRow {
            user_id: UserId::from_raw(row_helpers::get::<String>(row, 0, "usage_profiles", "user_id")?),
            tier: row_helpers::get(row, 1, "usage_profiles", "tier")?,
            usage_count: row_helpers::get(row, 2, "usage_profiles", "usage_count")?,
            created_at: row_helpers::get(row, 3, "usage_profiles", "created_at")?,
            updated_at: row_helpers::get(row, 4, "usage_profiles", "updated_at")?,
        }),
        None => Err(StoreError::NotFound(format!("usage profile {user_id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> UsageRepo {
        UsageRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn bootstraps_free_profile_on_first_touch() {
        let repo = setup();
        let user = UserId::new();
        let profile = repo.get_or_create(&user).unwrap();
        assert_eq!(profile.tier, "free");
        assert_eq!(profile.usage_count, 0);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let repo = setup();
        let user = UserId::new();
        let a = repo.get_or_create(&user).unwrap();
        repo.try_consume(&user, 10).unwrap();
        let b = repo.get_or_create(&user).unwrap();
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(b.usage_count, 1);
    }

    #[test]
    fn try_consume_increments_below_limit() {
        let repo = setup();
        let user = UserId::new();
        for expected in 1..=10 {
            let profile = repo.try_consume(&user, 10).unwrap().unwrap();
            assert_eq!(profile.usage_count, expected);
        }
    }

    #[test]
    fn try_consume_stops_at_limit() {
        let repo = setup();
        let user = UserId::new();
        for _ in 0..10 {
            assert!(repo.try_consume(&user, 10).unwrap().is_some());
        }
        assert!(repo.try_consume(&user, 10).unwrap().is_none());

        // Counter never crosses the limit
        let profile = repo.get_or_create(&user).unwrap();
        assert_eq!(profile.usage_count, 10);
    }

    #[test]
    fn concurrent_consume_admits_exactly_one_at_last_slot() {
        let db = Database::in_memory().unwrap();
        let user = UserId::new();

        // Start one below the limit
        let repo = UsageRepo::new(db.clone());
        for _ in 0..9 {
            repo.try_consume(&user, 10).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = UsageRepo::new(db.clone());
            let user = user.clone();
            handles.push(std::thread::spawn(move || {
                repo.try_consume(&user, 10).unwrap().is_some()
            }));
        }

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1, "exactly one racer takes the last slot");

        let profile = repo.get_or_create(&user).unwrap();
        assert_eq!(profile.usage_count, 10, "no lost or double updates");
    }

    #[test]
    fn set_tier_overwrites_tag() {
        let repo = setup();
        let user = UserId::new();
        repo.set_tier(&user, "pro").unwrap();
        assert_eq!(repo.get_or_create(&user).unwrap().tier, "pro");

        // Unknown tags are stored verbatim; normalization is not this layer's job
        repo.set_tier(&user, "enterprise").unwrap();
        assert_eq!(repo.get_or_create(&user).unwrap().tier, "enterprise");
    }
}
