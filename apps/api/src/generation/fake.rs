//! Scripted text generator for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm_client::{CompletionRequest, LlmError, TextGenerator};

pub enum Script {
    Reply(String),
    Fail(u16, String),
    /// Never answers; only a deadline ends the call.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub system: String,
    pub prompt: String,
}

/// Replays scripted responses in order; an exhausted script replies with an
/// empty string.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replies<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|r| Script::Reply(r.into())).collect())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: request.model.to_string(),
            system: request.system.to_string(),
            prompt: request.prompt.to_string(),
        });
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Fail(status, message)) => Err(LlmError::Api { status, message }),
            Some(Script::Hang) => std::future::pending().await,
            None => Ok(String::new()),
        }
    }
}
