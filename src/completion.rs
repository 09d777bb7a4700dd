//! Prompt assembly and the retrying request cycle against a [`LanguageModel`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CompletionError, ModelError};
use crate::models::{LanguageModel, ModelRequest};
use crate::session::Message;

/// Bounded fixed-delay retry. `max_retries` counts total attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    /// At least one request is always made.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

/// Decides which backend failures mean "temporarily unavailable, try again".
#[derive(Debug, Clone, PartialEq)]
pub struct TransientClassifier {
    pub statuses: Vec<u16>,
    pub markers: Vec<String>,
}

impl Default for TransientClassifier {
    fn default() -> Self {
        Self {
            statuses: vec![503],
            markers: vec!["UNAVAILABLE".into(), "503".into()],
        }
    }
}

impl TransientClassifier {
    pub fn is_transient(&self, err: &ModelError) -> bool {
        match err {
            ModelError::Status { code, status, message } => {
                self.statuses.contains(code)
                    || status.as_deref().is_some_and(|s| self.has_marker(s))
                    || self.has_marker(message)
            }
            ModelError::Transport(msg) => self.has_marker(msg),
            ModelError::MissingCredential | ModelError::InvalidPayload(_) => false,
        }
    }

    fn has_marker(&self, text: &str) -> bool {
        self.markers.iter().any(|m| !m.is_empty() && text.contains(m.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    /// The attempt that just failed, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,
    pub wait: Duration,
    pub reason: String,
}

pub trait RetryObserver: Send + Sync {
    fn retrying(&self, notice: &RetryNotice);
}

/// Flattens a conversation into `"<Role>: <content>"` lines.
pub fn build_prompt(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct CompletionClient {
    model: Arc<dyn LanguageModel>,
    classifier: TransientClassifier,
    cancel: CancellationToken,
}

impl CompletionClient {
    pub fn new(model: Arc<dyn LanguageModel>, classifier: TransientClassifier) -> Self {
        Self {
            model,
            classifier,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token aborts in-flight requests and pending retry waits.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn generate<O>(
        &self,
        history: &[Message],
        model: &str,
        policy: &RetryPolicy,
        observer: &O,
    ) -> Result<String, CompletionError>
    where
        O: RetryObserver + ?Sized,
    {
        let prompt = build_prompt(history);
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, model, "requesting completion");
            let req = ModelRequest {
                model: model.to_string(),
                prompt: prompt.clone(),
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(CompletionError::Cancelled),
                r = self.model.generate(req) => r,
            };

            let err = match result {
                Ok(resp) => return Ok(resp.content.trim().to_string()),
                Err(err) => err,
            };

            if !self.classifier.is_transient(&err) {
                warn!(attempt, error = %err, "completion failed");
                return Err(CompletionError::Request(err));
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "endpoint still unavailable, giving up");
                return Err(CompletionError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let notice = RetryNotice {
                attempt,
                max_attempts,
                wait: policy.wait,
                reason: err.to_string(),
            };
            warn!(
                attempt,
                max_attempts,
                wait_ms = policy.wait.as_millis() as u64,
                error = %err,
                "endpoint busy, retrying"
            );
            observer.retrying(&notice);

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(CompletionError::Cancelled),
                _ = tokio::time::sleep(policy.wait) => {}
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::{RetryNotice, RetryObserver};
    use crate::error::ModelError;
    use crate::models::{LanguageModel, ModelRequest, ModelResponse};

    pub struct NoopObserver;

    impl RetryObserver for NoopObserver {
        fn retrying(&self, _notice: &RetryNotice) {}
    }

    /// Replays scripted results; once the script runs out it echoes the prompt.
    #[derive(Default)]
    pub struct ScriptedModel {
        script: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(script: Vec<Result<String, ModelError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(req.prompt.clone());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(r) => r.map(|content| ModelResponse {
                    content,
                    model: req.model,
                }),
                None => Ok(ModelResponse {
                    content: format!("echo {}", req.prompt),
                    model: req.model,
                }),
            }
        }
    }

    pub fn unavailable() -> ModelError {
        ModelError::Status {
            code: 503,
            status: Some("UNAVAILABLE".into()),
            message: "The model is overloaded. Please try again later.".into(),
        }
    }

    pub fn bad_key() -> ModelError {
        ModelError::Status {
            code: 400,
            status: Some("INVALID_ARGUMENT".into()),
            message: "API key not valid.".into(),
        }
    }
}
