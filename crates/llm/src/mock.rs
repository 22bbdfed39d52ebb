//! In-process mock provider: serves queued canned responses, then a
//! fixed fallback. Used by tests and offline dry-run demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use rf_domain::{Error, Result};

use crate::traits::{CompletionProvider, CompletionRequest, CompletionResponse, Usage};

pub struct MockProvider {
    id: String,
    queued: Mutex<VecDeque<Result<String>>>,
    fallback: Option<String>,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queued: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Always answer with the same text once the queue is drained.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Queue the next response in FIFO order.
    pub fn push_response(&self, text: impl Into<String>) {
        self.queued.lock().push_back(Ok(text.into()));
    }

    /// Queue a provider error.
    pub fn push_error(&self, message: impl Into<String>) {
        let id = self.id.clone();
        self.queued.lock().push_back(Err(Error::Provider {
            provider: id,
            message: message.into(),
        }));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queued.lock().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(err)) => return Err(err),
            None => match &self.fallback {
                Some(text) => text.clone(),
                None => {
                    return Err(Error::Provider {
                        provider: self.id.clone(),
                        message: "mock provider has no queued response".into(),
                    })
                }
            },
        };
        // Rough token accounting: 1 token per 4 chars, like the real thing
        // close enough for budget tests.
        let usage = Usage {
            input_tokens: (req.prompt.len() / 4) as u32,
            output_tokens: (text.len() / 4) as u32,
        };
        Ok(CompletionResponse {
            text,
            usage,
            model: "mock".into(),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_queued_then_fallback() {
        let mock = MockProvider::new("m").with_fallback("fallback");
        mock.push_response("first");

        let req = CompletionRequest { prompt: "hello".into(), ..Default::default() };
        let a = mock.complete(req.clone()).await.unwrap();
        assert_eq!(a.text, "first");

        let b = mock.complete(req).await.unwrap();
        assert_eq!(b.text, "fallback");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn queued_errors_surface() {
        let mock = MockProvider::new("m");
        mock.push_error("boom");
        let err = mock
            .complete(CompletionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
