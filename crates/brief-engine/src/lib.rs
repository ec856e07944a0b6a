pub mod error;
pub mod prompt;
pub mod quota;
pub mod sessions;
pub mod synthesizer;
pub mod validate;

pub use error::EngineError;
pub use quota::RateLimiter;
pub use sessions::{SessionService, SessionSnapshot};
pub use synthesizer::{BriefSynthesizer, SynthesizedBrief};
pub use validate::ValidationError;
