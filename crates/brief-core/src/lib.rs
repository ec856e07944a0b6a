pub mod conversation;
pub mod errors;
pub mod gateway;
pub mod ids;
pub mod quota;

pub use conversation::{ConversationTurn, Domain, Role};
pub use errors::GatewayError;
pub use gateway::TextGateway;
pub use quota::{QuotaPolicy, RateLimitDecision, Tier, UsageProfile};
