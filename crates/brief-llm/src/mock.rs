use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use brief_core::errors::GatewayError;
use brief_core::gateway::TextGateway;

/// Pre-programmed reply for deterministic testing without API calls.
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Return an error from the invoke() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

/// Mock gateway that returns pre-programmed replies in sequence and
/// counts invocations, so tests can assert a call never happened.
pub struct MockGateway {
    replies: Mutex<VecDeque<MockReply>>,
    call_count: AtomicUsize,
}

impl MockGateway {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Convenience: a gateway that answers every call with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(
            std::iter::repeat_with(|| MockReply::Text(text.clone()))
                .take(64)
                .collect(),
        )
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TextGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn invoke(&self, _prompt: &str) -> Result<String, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let reply = self.replies.lock().pop_front().ok_or_else(|| {
            GatewayError::InvalidRequest(format!("MockGateway: no reply configured for call {idx}"))
        })?;

        let mut current = reply;
        loop {
            match current {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delayed(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_reply() {
        let mock = MockGateway::new(vec![MockReply::text("hello world")]);
        let out = mock.invoke("prompt").await.unwrap();
        assert_eq!(out, "hello world");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn error_reply() {
        let mock = MockGateway::new(vec![MockReply::Error(GatewayError::AuthenticationFailed(
            "bad".into(),
        ))]);
        let result = mock.invoke("prompt").await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn sequential_replies() {
        let mock = MockGateway::new(vec![MockReply::text("first"), MockReply::text("second")]);
        assert_eq!(mock.invoke("p").await.unwrap(), "first");
        assert_eq!(mock.invoke("p").await.unwrap(), "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_replies() {
        let mock = MockGateway::new(vec![MockReply::text("only one")]);
        let _ = mock.invoke("p").await;
        let result = mock.invoke("p").await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn delayed_reply() {
        tokio::time::pause();
        let mock = MockGateway::new(vec![MockReply::delayed(
            Duration::from_secs(3),
            MockReply::text("after delay"),
        )]);

        let handle = tokio::spawn(async move { mock.invoke("p").await });
        tokio::time::advance(Duration::from_secs(4)).await;
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out, "after delay");
    }

    #[test]
    fn gateway_properties() {
        let mock = MockGateway::new(vec![]);
        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.model(), "mock-model");
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn always_answers_repeatedly() {
        let mock = MockGateway::always("same brief");
        for _ in 0..5 {
            assert_eq!(mock.invoke("p").await.unwrap(), "same brief");
        }
    }
}
