use std::sync::Arc;

use tracing::info;

use crate::completion::{CompletionClient, RetryObserver};
use crate::error::CompletionError;
use crate::session::{ChatHistory, Message};
use crate::settings::{SessionSettings, SettingsLayers};

/// Outcome of one submission, kept tagged so front ends choose how to show failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Failed(CompletionError),
}

impl Reply {
    /// Text recorded in the history for this reply.
    pub fn render(&self) -> String {
        match self {
            Reply::Text(t) => t.clone(),
            Reply::Failed(e) => format!("⚠️ Error: {e}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Failed(_))
    }
}

impl From<Result<String, CompletionError>> for Reply {
    fn from(r: Result<String, CompletionError>) -> Self {
        match r {
            Ok(text) => Reply::Text(text),
            Err(e) => Reply::Failed(e),
        }
    }
}

/// Display-side hooks invoked while a submission runs.
pub trait DisplaySink: RetryObserver {
    fn composing(&self, _active: bool) {}
    fn render(&self, _history: &ChatHistory) {}
}

/// State of one live chat session. Created when the session starts, mutated
/// only through `submit`, dropped at session end unless saved to a store.
pub struct ChatController {
    client: CompletionClient,
    layers: Arc<SettingsLayers>,
    settings: SessionSettings,
    history: ChatHistory,
}

impl ChatController {
    pub fn new(
        client: CompletionClient,
        layers: Arc<SettingsLayers>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            client,
            layers,
            settings,
            history: ChatHistory::new(),
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SessionSettings {
        &mut self.settings
    }

    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.settings.system_prompt = prompt;
    }

    /// Messages to persist: the conversation without the system prompt.
    pub fn snapshot(&self) -> Vec<Message> {
        self.history.messages().to_vec()
    }

    /// Starts a fresh conversation, like reloading the chat page.
    pub fn clear(&mut self) {
        self.history = ChatHistory::new();
    }

    pub async fn submit(&mut self, user_text: &str, sink: &dyn DisplaySink) -> Option<Reply> {
        let text = user_text.trim();
        if text.is_empty() {
            return None;
        }
        self.history.push(Message::user(text));

        let eff = self.layers.resolve(&self.settings);
        let mut outgoing = Vec::with_capacity(self.history.len() + 1);
        if let Some(prompt) = &eff.system_prompt {
            outgoing.push(Message::system(prompt.clone()));
        }
        outgoing.extend_from_slice(self.history.messages());

        sink.composing(true);
        let reply: Reply = self
            .client
            .generate(&outgoing, &eff.model, &eff.retry, sink)
            .await
            .into();
        sink.composing(false);

        info!(
            model = %eff.model,
            turns = self.history.len(),
            error = reply.is_error(),
            "reply ready"
        );
        self.history.push(Message::assistant(reply.render()));
        sink.render(&self.history);
        Some(reply)
    }
}
