use brief_core::conversation::{ConversationTurn, Domain, Role};

/// Structural validation failures. Checked in a fixed order; the first
/// failure wins, so callers always see the earliest problem.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("domain must not be empty")]
    EmptyDomain,

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("history must be an array of turns")]
    HistoryNotAnArray,

    #[error("turn {index} is not an object with role and content")]
    MalformedTurn { index: usize },

    #[error("turn {index} has invalid role: {role}")]
    InvalidRole { index: usize, role: String },

    #[error("turn {index} has empty content")]
    EmptyContent { index: usize },
}

/// Parse a domain tag. Empty fails before unknown, per the rule order.
pub fn parse_domain(tag: &str) -> Result<Domain, ValidationError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ValidationError::EmptyDomain);
    }
    tag.parse()
        .map_err(|_| ValidationError::UnknownDomain(tag.to_string()))
}

/// Validate a single turn arriving at position `index`.
/// Role must be exactly `user` or `assistant`; content must be non-empty
/// after trimming. The original (untrimmed) content is preserved.
pub fn parse_turn(index: usize, role: &str, content: &str) -> Result<ConversationTurn, ValidationError> {
    let role = role.parse().map_err(|_| ValidationError::InvalidRole {
        index,
        role: role.to_string(),
    })?;
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent { index });
    }
    Ok(ConversationTurn {
        role,
        content: content.to_string(),
    })
}

/// Validate a raw conversation payload against the full rule set:
/// domain in the closed set, history an array, every role recognized,
/// every content non-empty. An empty history is valid — only malformed
/// elements are rejected, never the empty collection.
///
/// Rules apply across the whole history in that order: shape and role
/// problems in any turn are reported before any content problem.
pub fn validate(
    domain_tag: &str,
    history: &serde_json::Value,
) -> Result<(Domain, Vec<ConversationTurn>), ValidationError> {
    let domain = parse_domain(domain_tag)?;

    let items = history
        .as_array()
        .ok_or(ValidationError::HistoryNotAnArray)?;

    let mut raw = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let role = item
            .get("role")
            .and_then(|v| v.as_str())
            .ok_or(ValidationError::MalformedTurn { index })?;
        let content = item
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or(ValidationError::MalformedTurn { index })?;
        let role: Role = role.parse().map_err(|_| ValidationError::InvalidRole {
            index,
            role: role.to_string(),
        })?;
        raw.push((role, content));
    }

    let mut turns = Vec::with_capacity(raw.len());
    for (index, (role, content)) in raw.into_iter().enumerate() {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyContent { index });
        }
        turns.push(ConversationTurn {
            role,
            content: content.to_string(),
        });
    }

    Ok((domain, turns))
}

/// Re-check an already-typed history. Used by the synthesizer as a cheap
/// guard before any model call is attempted.
pub fn check_turns(turns: &[ConversationTurn]) -> Result<(), ValidationError> {
    for (index, turn) in turns.iter().enumerate() {
        if turn.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent { index });
        }
    }
    Ok(())
}
