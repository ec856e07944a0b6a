use async_trait::async_trait;

use crate::errors::GatewayError;

/// Opaque call-and-response boundary to a hosted language model.
///
/// The core owns no retry or backoff policy behind this seam; an
/// implementation is free to layer its own resilience.
#[async_trait]
pub trait TextGateway: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Send a fully-built prompt, return the model's text.
    async fn invoke(&self, prompt: &str) -> Result<String, GatewayError>;
}
