use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use brief_core::conversation::{ConversationTurn, Domain, Role};
use brief_core::ids::{SessionId, TurnId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Session lifecycle state. `Generating` exists in the vocabulary but is
/// never written to disk: only the before (`questioning`) and after
/// (`completed`) snapshots of a synthesis are ever persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Questioning,
    Generating,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Questioning => write!(f, "questioning"),
            Self::Generating => write!(f, "generating"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "questioning" => Ok(Self::Questioning),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub user_id: UserId,
    pub domain: Domain,
    pub status: SessionStatus,
    pub brief: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnRow {
    pub id: TurnId,
    pub session_id: SessionId,
    pub sequence: i64,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

impl TurnRow {
    pub fn into_turn(self) -> ConversationTurn {
        ConversationTurn {
            role: self.role,
            content: self.content,
        }
    }
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session in the `questioning` state.
    #[instrument(skip(self), fields(user_id = %user_id, domain = %domain))]
    pub fn create(&self, user_id: &UserId, domain: Domain) -> Result<SessionRow, StoreError> {
        let id = SessionId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, domain, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'questioning', ?4, ?5)",
                rusqlite::params![id.as_str(), user_id.as_str(), domain.as_str(), now, now],
            )?;

            Ok(SessionRow {
                id: id.clone(),
                user_id: user_id.clone(),
                domain,
                status: SessionStatus::Questioning,
                brief: None,
                created_at: now.clone(),
                updated_at: now.clone(),
            })
        })
    }

    /// Get a session by ID.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, domain, status, brief, created_at, updated_at
                 FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// Ordered conversation history for a session (chronological).
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn turns(&self, id: &SessionId) -> Result<Vec<TurnRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, sequence, role, content, created_at
                 FROM turns WHERE session_id = ?1 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_turn(row)?);
            }
            Ok(results)
        })
    }

    /// Append a turn at the next sequence number.
    /// Sequence assignment and insert run under one connection lock, so
    /// arrival order is preserved.
    #[instrument(skip(self, turn), fields(session_id = %session_id, role = %turn.role))]
    pub fn append_turn(
        &self,
        session_id: &SessionId,
        turn: &ConversationTurn,
    ) -> Result<TurnRow, StoreError> {
        let id = TurnId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let sequence: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence) + 1, 0) FROM turns WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO turns (id, session_id, sequence, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    session_id.as_str(),
                    sequence,
                    turn.role.as_str(),
                    turn.content,
                    now,
                ],
            )?;

            Ok(TurnRow {
                id: id.clone(),
                session_id: session_id.clone(),
                sequence,
                role: turn.role,
                content: turn.content.clone(),
                created_at: now.clone(),
            })
        })
    }

    /// Persist the synthesized brief and move `questioning` → `completed`
    /// in one conditional update. No intermediate state is ever written.
    #[instrument(skip(self, brief), fields(session_id = %session_id))]
    pub fn complete(&self, session_id: &SessionId, brief: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET status = 'completed', brief = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'questioning'",
                rusqlite::params![session_id.as_str(), brief, now],
            )?;

            if changed == 1 {
                return Ok(());
            }

            // Distinguish a missing session from a wrong-state one
            let exists: bool = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE id = ?1",
                [session_id.as_str()],
                |row| row.get::<_, i64>(0).map(|n| n > 0),
            )?;
            if exists {
                Err(StoreError::Conflict(format!(
                    "session {session_id} is not in questioning state"
                )))
            } else {
                Err(StoreError::NotFound(format!("session {session_id}")))
            }
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let domain_str: String = row_helpers::get(row, 2, "sessions", "domain")?;
    let status_str: String = row_helpers::get(row, 3, "sessions", "status")?;

    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "sessions", "user_id")?),
        domain: row_helpers::parse_enum(&domain_str, "sessions", "domain")?,
        status: row_helpers::parse_enum(&status_str, "sessions", "status")?,
        brief: row_helpers::get_opt(row, 4, "sessions", "brief")?,
        created_at: row_helpers::get(row, 5, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 6, "sessions", "updated_at")?,
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<TurnRow, StoreError> {
    let role_str: String = row_helpers::get(row, 3, "turns", "role")?;

    Ok(TurnRow {
        id: TurnId::from_raw(row_helpers::get::<String>(row, 0, "turns", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "turns", "session_id")?),
        sequence: row_helpers::get(row, 2, "turns", "sequence")?,
        role: row_helpers::parse_enum(&role_str, "turns", "role")?,
        content: row_helpers::get(row, 4, "turns", "content")?,
        created_at: row_helpers::get(row, 5, "turns", "created_at")?,
    })
}
