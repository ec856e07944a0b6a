use serde::Serialize;
use tracing::{info, instrument};

use brief_core::conversation::{ConversationTurn, Domain};
use brief_core::ids::{SessionId, UserId};
use brief_core::quota::RateLimitDecision;
use brief_store::sessions::{SessionRepo, SessionRow, SessionStatus, TurnRow};
use brief_store::{Database, StoreError};

use crate::error::EngineError;
use crate::quota::RateLimiter;
use crate::synthesizer::BriefSynthesizer;
use crate::validate;

/// A session with its ordered history, as returned to callers.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub user_id: UserId,
    pub domain: Domain,
    pub status: SessionStatus,
    pub history: Vec<ConversationTurn>,
    pub brief: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionSnapshot {
    fn assemble(row: SessionRow, turns: Vec<TurnRow>) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            domain: row.domain,
            status: row.status,
            history: turns.into_iter().map(TurnRow::into_turn).collect(),
            brief: row.brief,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Session lifecycle: questioning → (generating) → completed.
///
/// Creation is quota-gated; the `generating` phase exists only as the
/// synchronous duration of the synthesis call, never as persisted state.
/// Deciding *when* enough context has been gathered is the caller's
/// policy — this service only exposes `generate_brief` as a capability.
pub struct SessionService {
    sessions: SessionRepo,
    limiter: RateLimiter,
    synthesizer: BriefSynthesizer,
}

impl SessionService {
    pub fn new(db: Database, synthesizer: BriefSynthesizer) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            limiter: RateLimiter::new(db),
            synthesizer,
        }
    }

    /// Advisory quota check; consumes nothing.
    pub fn check_rate_limit(&self, user_id: &UserId) -> RateLimitDecision {
        self.limiter.check(user_id)
    }

    /// The synthesizer this service generates briefs with, for callers
    /// that want one-shot synthesis outside any session.
    pub fn synthesizer(&self) -> &BriefSynthesizer {
        &self.synthesizer
    }

    /// Create a session in `questioning`, consuming one unit of quota
    /// atomically in the same logical step. On denial nothing is created
    /// and the decision is carried in the error.
    #[instrument(skip(self), fields(user_id = %user_id, domain = domain_tag))]
    pub fn create_session(
        &self,
        user_id: &UserId,
        domain_tag: &str,
    ) -> Result<SessionSnapshot, EngineError> {
        // Validate before consuming; a malformed request must not burn quota
        let domain = validate::parse_domain(domain_tag)?;
        let profile = self.limiter.consume(user_id)?;

        let row = self.sessions.create(user_id, domain)?;
        info!(
            session_id = %row.id,
            usage_count = profile.usage_count,
            tier = %profile.tier,
            "session created"
        );
        Ok(SessionSnapshot::assemble(row, Vec::new()))
    }

    pub fn get_session(&self, id: &SessionId) -> Result<SessionSnapshot, EngineError> {
        let row = self.get_row(id)?;
        let turns = self.sessions.turns(id)?;
        Ok(SessionSnapshot::assemble(row, turns))
    }

    /// Append one validated turn. Only permitted while `questioning`;
    /// on a validation failure the history is left untouched.
    #[instrument(skip(self, content), fields(session_id = %id, role = role_tag))]
    pub fn append_turn(
        &self,
        id: &SessionId,
        role_tag: &str,
        content: &str,
    ) -> Result<SessionSnapshot, EngineError> {
        let row = self.get_row(id)?;
        if row.status != SessionStatus::Questioning {
            return Err(EngineError::InvalidTransition {
                status: row.status,
                action: "append a turn",
            });
        }

        let index = self.sessions.turns(id)?.len();
        let turn = validate::parse_turn(index, role_tag, content)?;
        self.sessions.append_turn(id, &turn)?;
        self.get_session(id)
    }

    /// Move `questioning` → `completed` by synthesizing a brief from a
    /// snapshot of the history taken now; turns appended after this point
    /// are not included. On synthesis failure the session is untouched and
    /// still retryable.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn generate_brief(&self, id: &SessionId) -> Result<SessionSnapshot, EngineError> {
        let row = self.get_row(id)?;
        if row.status != SessionStatus::Questioning {
            return Err(EngineError::InvalidTransition {
                status: row.status,
                action: "generate a brief",
            });
        }

        let turns: Vec<ConversationTurn> = self
            .sessions
            .turns(id)?
            .into_iter()
            .map(TurnRow::into_turn)
            .collect();

        let synthesized = match self
            .synthesizer
            .synthesize_with_metadata(row.domain, &turns)
            .await
        {
            Ok(s) => s,
            // Turns are validated at append time; a validation failure on
            // stored history means an invariant was broken somewhere else.
            Err(EngineError::Validation(e)) => {
                return Err(EngineError::Internal(format!(
                    "stored history failed validation: {e}"
                )));
            }
            Err(e) => return Err(e),
        };

        match self.sessions.complete(id, &synthesized.brief) {
            Ok(()) => {}
            // Lost a race with another transition; report the state we find
            Err(StoreError::Conflict(_)) => {
                let row = self.get_row(id)?;
                return Err(EngineError::InvalidTransition {
                    status: row.status,
                    action: "generate a brief",
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            session_id = %id,
            duration_ms = synthesized.duration_ms,
            word_count = synthesized.word_count,
            "session completed"
        );
        self.get_session(id)
    }

    fn get_row(&self, id: &SessionId) -> Result<SessionRow, EngineError> {
        match self.sessions.get(id) {
            Ok(row) => Ok(row),
            Err(StoreError::NotFound(_)) => Err(EngineError::SessionNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ValidationError;
    use brief_core::conversation::Role;
    use brief_core::errors::GatewayError;
    use brief_llm::{MockGateway, MockReply};
    use std::sync::Arc;

    const BRIEF: &str = "## Core Goal\nLaunch a scheduling service for dog walkers.";

    fn service_with(gateway: MockGateway) -> (Arc<MockGateway>, SessionService) {
        let db = Database::in_memory().unwrap();
        let gateway = Arc::new(gateway);
        let synth = BriefSynthesizer::new(gateway.clone());
        (gateway, SessionService::new(db, synth))
    }

    #[test]
    fn free_tier_quota_scenario() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let user = UserId::new();

        // Burn nine of the ten free sessions
        for _ in 0..9 {
            service.create_session(&user, "business").unwrap();
        }

        let d = service.check_rate_limit(&user);
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
        assert_eq!(d.limit, 10);

        // Tenth succeeds, eleventh is denied with the decision attached
        service.create_session(&user, "business").unwrap();
        match service.create_session(&user, "business") {
            Err(EngineError::QuotaExhausted(d)) => {
                assert!(!d.allowed);
                assert_eq!(d.remaining, 0);
            }
            other => panic!("expected QuotaExhausted, got {other:?}"),
        }
    }

    #[test]
    fn bad_domain_burns_no_quota() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let user = UserId::new();

        let result = service.create_session(&user, "astrology");
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::UnknownDomain(_)))
        ));
        assert_eq!(service.check_rate_limit(&user).remaining, 10);
    }

    #[test]
    fn append_turn_builds_ordered_history() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let user = UserId::new();
        let session = service.create_session(&user, "product").unwrap();

        service.append_turn(&session.id, "user", "I want to start a business").unwrap();
        let after = service
            .append_turn(&session.id, "assistant", "What problem does it solve?")
            .unwrap();

        assert_eq!(after.history.len(), 2);
        assert_eq!(after.history[0].role, Role::User);
        assert_eq!(after.history[1].content, "What problem does it solve?");
        assert_eq!(after.status, SessionStatus::Questioning);
    }

    #[test]
    fn bad_role_rejected_and_history_unchanged() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let user = UserId::new();
        let session = service.create_session(&user, "business").unwrap();
        service.append_turn(&session.id, "user", "real turn").unwrap();

        let result = service.append_turn(&session.id, "bot", "x");
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::InvalidRole { index: 1, .. }))
        ));

        let snapshot = service.get_session(&session.id).unwrap();
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.status, SessionStatus::Questioning);
    }

    #[test]
    fn empty_content_rejected() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let user = UserId::new();
        let session = service.create_session(&user, "business").unwrap();

        let result = service.append_turn(&session.id, "user", "   ");
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::EmptyContent { index: 0 }))
        ));
    }

    #[tokio::test]
    async fn generate_brief_completes_session() {
        let (gateway, service) = service_with(MockGateway::new(vec![MockReply::text(BRIEF)]));
        let user = UserId::new();
        let session = service.create_session(&user, "business").unwrap();
        service
            .append_turn(&session.id, "user", "I want to start a business")
            .unwrap();

        let done = service.generate_brief(&session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.brief.as_deref(), Some(BRIEF));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_history_still_generates() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let user = UserId::new();
        let session = service.create_session(&user, "creative").unwrap();

        let done = service.generate_brief(&session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn synthesis_failure_leaves_session_retryable() {
        let (gateway, service) = service_with(MockGateway::new(vec![
            MockReply::Error(GatewayError::ServerError { status: 500, body: "boom".into() }),
            MockReply::text(BRIEF),
        ]));
        let user = UserId::new();
        let session = service.create_session(&user, "technical").unwrap();
        service.append_turn(&session.id, "user", "build a cache").unwrap();

        // First attempt fails; session stays questioning with history intact
        let result = service.generate_brief(&session.id).await;
        assert!(matches!(result, Err(EngineError::Synthesis(e)) if e.is_retryable()));

        let snapshot = service.get_session(&session.id).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Questioning);
        assert!(snapshot.brief.is_none());
        assert_eq!(snapshot.history.len(), 1);

        // Retry with the same input succeeds
        let done = service.generate_brief(&session.id).await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn completed_session_is_terminal() {
        let (gateway, service) = service_with(MockGateway::new(vec![MockReply::text(BRIEF)]));
        let user = UserId::new();
        let session = service.create_session(&user, "business").unwrap();
        service.generate_brief(&session.id).await.unwrap();

        let append = service.append_turn(&session.id, "user", "one more thing");
        assert!(matches!(
            append,
            Err(EngineError::InvalidTransition { status: SessionStatus::Completed, .. })
        ));

        let again = service.generate_brief(&session.id).await;
        assert!(matches!(
            again,
            Err(EngineError::InvalidTransition { status: SessionStatus::Completed, .. })
        ));
        assert_eq!(gateway.call_count(), 1, "no second model call");
    }

    #[tokio::test]
    async fn corrupt_stored_history_is_internal_not_validation() {
        let db = Database::in_memory().unwrap();
        let gateway = Arc::new(MockGateway::always(BRIEF));
        let service = SessionService::new(db.clone(), BriefSynthesizer::new(gateway.clone()));
        let user = UserId::new();
        let session = service.create_session(&user, "business").unwrap();

        // Slip an invalid turn past append-time validation
        SessionRepo::new(db)
            .append_turn(&session.id, &ConversationTurn::user("   "))
            .unwrap();

        let result = service.generate_brief(&session.id).await;
        assert!(matches!(result, Err(EngineError::Internal(_))));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_session_reports_not_found() {
        let (_, service) = service_with(MockGateway::always(BRIEF));
        let id = SessionId::from_raw("sess_missing");

        assert!(matches!(
            service.get_session(&id),
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(matches!(
            service.append_turn(&id, "user", "x"),
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(matches!(
            service.generate_brief(&id).await,
            Err(EngineError::SessionNotFound(_))
        ));
    }
}
