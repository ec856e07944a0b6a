pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicGateway;
pub use mock::{MockGateway, MockReply};
