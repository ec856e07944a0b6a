use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument};

use brief_core::conversation::{ConversationTurn, Domain};
use brief_core::errors::GatewayError;
use brief_core::gateway::TextGateway;

use crate::error::EngineError;
use crate::prompt;
use crate::validate;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// A synthesized brief plus the metadata computed alongside it.
#[derive(Clone, Debug, Serialize)]
pub struct SynthesizedBrief {
    pub brief: String,
    pub duration_ms: u64,
    pub word_count: usize,
}

/// Orchestrates validate → build prompt → model call → brief + metadata.
///
/// Holds a ready gateway; credential verification happened at gateway
/// construction, so a configuration problem surfaces before any request
/// is ever attempted.
pub struct BriefSynthesizer {
    gateway: Arc<dyn TextGateway>,
    deadline: Duration,
}

impl BriefSynthesizer {
    pub fn new(gateway: Arc<dyn TextGateway>) -> Self {
        Self::with_deadline(gateway, DEFAULT_DEADLINE)
    }

    pub fn with_deadline(gateway: Arc<dyn TextGateway>, deadline: Duration) -> Self {
        Self { gateway, deadline }
    }

    /// Synthesize a brief from a raw (untyped) conversation payload,
    /// running the full validation rule set first.
    pub async fn synthesize_raw(
        &self,
        domain_tag: &str,
        history: &serde_json::Value,
    ) -> Result<SynthesizedBrief, EngineError> {
        let (domain, turns) = validate::validate(domain_tag, history)?;
        self.synthesize_with_metadata(domain, &turns).await
    }

    /// Synthesize a brief, discarding the metadata.
    pub async fn synthesize(
        &self,
        domain: Domain,
        turns: &[ConversationTurn],
    ) -> Result<String, EngineError> {
        Ok(self.synthesize_with_metadata(domain, turns).await?.brief)
    }

    #[instrument(skip(self, turns), fields(domain = %domain, turn_count = turns.len(), model = %self.gateway.model()))]
    pub async fn synthesize_with_metadata(
        &self,
        domain: Domain,
        turns: &[ConversationTurn],
    ) -> Result<SynthesizedBrief, EngineError> {
        validate::check_turns(turns)?;
        let prompt = prompt::build(domain, turns);

        let started = Instant::now();
        let brief = match tokio::time::timeout(self.deadline, self.gateway.invoke(&prompt)).await {
            Ok(result) => result.map_err(EngineError::Synthesis)?,
            Err(_) => {
                return Err(EngineError::Synthesis(GatewayError::Timeout(self.deadline)));
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if brief.trim().is_empty() {
            return Err(EngineError::Synthesis(GatewayError::MalformedResponse(
                "model returned an empty brief".to_string(),
            )));
        }

        let word_count = brief.split_whitespace().count();
        info!(duration_ms, word_count, "brief synthesized");

        Ok(SynthesizedBrief {
            brief,
            duration_ms,
            word_count,
        })
    }
}
