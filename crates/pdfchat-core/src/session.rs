//! Headless send/upload cycle
//!
//! Runs the same transitions as the TUI, but awaits each step in place.

use std::path::Path;
use std::sync::Arc;

use crate::gemini::GeminiClient;
use crate::pdf::{self, TextExtractor};
use crate::state::{Action, ChatMessage, Conversation};

pub struct Session {
    conversation: Conversation,
    client: GeminiClient,
    extractor: Arc<dyn TextExtractor>,
}

impl Session {
    pub fn new(client: GeminiClient, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            conversation: Conversation::new(),
            client,
            extractor,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub async fn upload(&mut self, path: &Path) {
        let file = pdf::file_label(path);
        self.conversation.dispatch(Action::UploadStarted { file: file.clone() });
        let Some(upload_id) = self.conversation.pending_upload() else {
            return;
        };

        let result = pdf::extract_file(self.extractor.clone(), path).await;
        self.conversation.dispatch(Action::UploadFinished { upload_id, file, result });
    }

    /// Send `message` and wait for the reply. Returns the assistant message, or
    /// `None` when the message was blank.
    pub async fn send(&mut self, message: &str) -> Option<&ChatMessage> {
        if message.trim().is_empty() {
            return None;
        }
        self.conversation.dispatch(Action::SetDraft(message.to_string()));
        let request = self.conversation.dispatch(Action::Submit)?;

        let result = self.client.generate(&request.contents).await;
        self.conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id,
            result,
        });
        self.conversation.messages().last()
    }
}
