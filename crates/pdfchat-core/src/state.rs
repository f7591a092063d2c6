//! UI-agnostic conversation state
//!
//! Everything the chat screen shows lives in [`Conversation`]. The only way to change
//! it is [`Conversation::dispatch`], so the TUI and the headless session go through
//! the same transitions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gemini::{Content, GeminiError, GenerateResponse};
use crate::pdf::{ExtractedDocument, PdfError};

/// Shown when the API answered but carried no text
pub const EMPTY_REPLY_MESSAGE: &str = "I'm sorry, I couldn't process that.";
/// Shown when the request itself failed
pub const FAILED_REPLY_MESSAGE: &str = "Something went wrong. Please try again.";

const PDF_CONTEXT_MARKER: &str = "[PDF CONTEXT]:";

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub role: ChatRole,
    pub content: String,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    Extracting {
        file: String,
    },
    Ready {
        file: String,
        pages: usize,
        chars: usize,
    },
    Failed {
        file: String,
        error: String,
    },
}

/// A generation request the caller should send
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub request_id: u64,
    pub contents: Vec<Content>,
}

#[derive(Debug)]
pub enum Action {
    SetDraft(String),
    /// Send the current draft
    Submit,
    ReplyReceived {
        request_id: u64,
        result: Result<GenerateResponse, GeminiError>,
    },
    /// Starts a new upload. Its id is then available from
    /// [`Conversation::pending_upload`], and any upload still running goes stale.
    UploadStarted {
        file: String,
    },
    UploadFinished {
        upload_id: u64,
        file: String,
        result: Result<ExtractedDocument, PdfError>,
    },
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    draft: String,
    awaiting_reply: bool,
    file_uploaded: bool,
    extracted_text: String,
    upload_status: UploadStatus,
    next_message_id: u64,
    next_request_id: u64,
    in_flight: Option<u64>,
    next_upload_id: u64,
    pending_upload: Option<u64>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn file_uploaded(&self) -> bool {
        self.file_uploaded
    }

    pub fn extracted_text(&self) -> &str {
        &self.extracted_text
    }

    pub fn upload_status(&self) -> &UploadStatus {
        &self.upload_status
    }

    /// Id of the upload whose result will be applied, if one is running
    pub fn pending_upload(&self) -> Option<u64> {
        self.pending_upload
    }

    fn can_submit(&self) -> bool {
        !self.awaiting_reply && !self.draft.trim().is_empty()
    }

    /// Apply an action. Returns the request to send when the action started one.
    pub fn dispatch(&mut self, action: Action) -> Option<GenerateRequest> {
        match action {
            Action::SetDraft(draft) => {
                self.draft = draft;
                None
            }
            Action::Submit => self.submit(),
            Action::ReplyReceived { request_id, result } => {
                self.receive_reply(request_id, result);
                None
            }
            Action::UploadStarted { file } => {
                self.next_upload_id += 1;
                self.pending_upload = Some(self.next_upload_id);
                self.upload_status = UploadStatus::Extracting { file };
                None
            }
            Action::UploadFinished { upload_id, file, result } => {
                self.finish_upload(upload_id, file, result);
                None
            }
        }
    }

    fn submit(&mut self) -> Option<GenerateRequest> {
        if !self.can_submit() {
            return None;
        }

        let draft = std::mem::take(&mut self.draft);
        self.push_message(ChatRole::User, draft.clone());
        self.awaiting_reply = true;

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.in_flight = Some(request_id);

        let contents = self.outgoing_history(&draft);
        debug!(request_id, turns = contents.len(), "submitted draft");
        Some(GenerateRequest { request_id, contents })
    }

    /// Visible history with the last turn carrying the hidden PDF text
    fn outgoing_history(&self, draft: &str) -> Vec<Content> {
        let mut contents: Vec<Content> = self
            .messages
            .iter()
            .map(|msg| Content::new(msg.role, msg.content.as_str()))
            .collect();

        if let Some(part) = contents.last_mut().and_then(|c| c.parts.first_mut()) {
            part.text = format!("{}\n\n{}\n{}", draft, PDF_CONTEXT_MARKER, self.extracted_text);
        }
        contents
    }

    fn receive_reply(&mut self, request_id: u64, result: Result<GenerateResponse, GeminiError>) {
        if self.in_flight != Some(request_id) {
            warn!(request_id, in_flight = ?self.in_flight, "dropping reply for stale request");
            return;
        }

        let content = match result {
            Ok(response) => response
                .first_text()
                .map(str::to_string)
                .unwrap_or_else(|| EMPTY_REPLY_MESSAGE.to_string()),
            Err(e) => {
                warn!(request_id, error = %e, "generation request failed");
                FAILED_REPLY_MESSAGE.to_string()
            }
        };

        self.push_message(ChatRole::Assistant, content);
        self.in_flight = None;
        self.awaiting_reply = false;
    }

    fn finish_upload(&mut self, upload_id: u64, file: String, result: Result<ExtractedDocument, PdfError>) {
        if self.pending_upload != Some(upload_id) {
            warn!(upload_id, file = %file, pending = ?self.pending_upload, "dropping result of superseded upload");
            return;
        }
        self.pending_upload = None;

        match result {
            Ok(doc) => {
                info!(file = %file, pages = doc.page_count, chars = doc.char_count(), "pdf uploaded");
                self.upload_status = UploadStatus::Ready {
                    file,
                    pages: doc.page_count,
                    chars: doc.char_count(),
                };
                self.extracted_text = doc.text;
                self.file_uploaded = true;
            }
            Err(e) => {
                warn!(file = %file, error = %e, "pdf extraction failed");
                self.upload_status = UploadStatus::Failed {
                    file,
                    error: e.to_string(),
                };
            }
        }
    }

    fn push_message(&mut self, role: ChatRole, content: String) {
        self.next_message_id += 1;
        self.messages.push(ChatMessage {
            id: self.next_message_id,
            role,
            content,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conversation_with_draft(draft: &str) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.dispatch(Action::SetDraft(draft.to_string()));
        conversation
    }

    fn response(body: serde_json::Value) -> Result<GenerateResponse, GeminiError> {
        Ok(serde_json::from_value(body).unwrap())
    }

    fn start_upload(conversation: &mut Conversation, file: &str) -> u64 {
        conversation.dispatch(Action::UploadStarted { file: file.to_string() });
        conversation.pending_upload().unwrap()
    }

    fn finished(upload_id: u64, file: &str, text: &str) -> Action {
        Action::UploadFinished {
            upload_id,
            file: file.to_string(),
            result: Ok(ExtractedDocument {
                text: text.to_string(),
                page_count: 1,
            }),
        }
    }

    fn upload(conversation: &mut Conversation, text: &str) {
        let upload_id = start_upload(conversation, "doc.pdf");
        conversation.dispatch(finished(upload_id, "doc.pdf", text));
    }

    #[test]
    fn submit_appends_user_message_and_awaits_reply() {
        let mut conversation = conversation_with_draft("Summarize this");

        let request = conversation.dispatch(Action::Submit).expect("request");

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, ChatRole::User);
        assert_eq!(conversation.messages()[0].content, "Summarize this");
        assert_eq!(conversation.draft(), "");
        assert!(conversation.awaiting_reply());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, "user");
        assert_eq!(request.contents[0].parts[0].text, "Summarize this\n\n[PDF CONTEXT]:\n");
    }

    #[test]
    fn blank_draft_is_ignored() {
        for draft in ["", "   ", "\n\t"] {
            let mut conversation = conversation_with_draft(draft);
            assert!(conversation.dispatch(Action::Submit).is_none());
            assert!(conversation.messages().is_empty());
            assert!(!conversation.awaiting_reply());
            assert_eq!(conversation.draft(), draft);
        }
    }

    #[test]
    fn submit_while_awaiting_is_ignored() {
        let mut conversation = conversation_with_draft("first");
        conversation.dispatch(Action::Submit).unwrap();

        conversation.dispatch(Action::SetDraft("second".to_string()));
        assert!(conversation.dispatch(Action::Submit).is_none());
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.draft(), "second");
    }

    #[test]
    fn successful_reply_is_appended() {
        let mut conversation = conversation_with_draft("hi");
        let request = conversation.dispatch(Action::Submit).unwrap();

        conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id,
            result: response(json!({"candidates": [{"content": {"parts": [{"text": "Hello"}]}}]})),
        });

        let last = conversation.messages().last().unwrap();
        assert_eq!(last.role, ChatRole::Assistant);
        assert_eq!(last.content, "Hello");
        assert!(!conversation.awaiting_reply());
    }

    #[test]
    fn reply_without_candidates_apologizes() {
        let mut conversation = conversation_with_draft("hi");
        let request = conversation.dispatch(Action::Submit).unwrap();

        conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id,
            result: response(json!({"promptFeedback": {}})),
        });

        assert_eq!(conversation.messages().last().unwrap().content, EMPTY_REPLY_MESSAGE);
    }

    #[test]
    fn failed_reply_uses_fallback_and_clears_flag() {
        let mut conversation = conversation_with_draft("hi");
        let request = conversation.dispatch(Action::Submit).unwrap();

        conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id,
            result: Err(GeminiError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
        });

        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[1].content, FAILED_REPLY_MESSAGE);
        assert!(!conversation.awaiting_reply());
    }

    #[test]
    fn stale_reply_is_dropped() {
        let mut conversation = conversation_with_draft("hi");
        let request = conversation.dispatch(Action::Submit).unwrap();

        conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id + 7,
            result: response(json!({"candidates": [{"content": {"parts": [{"text": "late"}]}}]})),
        });

        assert_eq!(conversation.messages().len(), 1);
        assert!(conversation.awaiting_reply());
    }

    #[test]
    fn history_maps_roles_and_only_rewrites_last_turn() {
        let mut conversation = conversation_with_draft("What is it about?");
        upload(&mut conversation, "Page one\n");
        let first = conversation.dispatch(Action::Submit).unwrap();
        conversation.dispatch(Action::ReplyReceived {
            request_id: first.request_id,
            result: response(json!({"candidates": [{"content": {"parts": [{"text": "Cats."}]}}]})),
        });

        conversation.dispatch(Action::SetDraft("Which cats?".to_string()));
        let second = conversation.dispatch(Action::Submit).unwrap();

        let roles: Vec<&str> = second.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(second.contents[0].parts[0].text, "What is it about?");
        assert_eq!(second.contents[1].parts[0].text, "Cats.");
        assert_eq!(second.contents[2].parts[0].text, "Which cats?\n\n[PDF CONTEXT]:\nPage one\n");
    }

    #[test]
    fn message_ids_increase() {
        let mut conversation = conversation_with_draft("one");
        let request = conversation.dispatch(Action::Submit).unwrap();
        conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id,
            result: response(json!({})),
        });

        let ids: Vec<u64> = conversation.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn upload_replaces_text_and_never_becomes_a_message() {
        let mut conversation = Conversation::new();
        upload(&mut conversation, "old\n");
        upload(&mut conversation, "new\n");

        assert!(conversation.file_uploaded());
        assert_eq!(conversation.extracted_text(), "new\n");
        assert!(conversation.messages().is_empty());
        assert_eq!(
            conversation.upload_status(),
            &UploadStatus::Ready {
                file: "doc.pdf".to_string(),
                pages: 1,
                chars: 4,
            }
        );
    }

    #[test]
    fn failed_upload_keeps_previous_text() {
        let mut conversation = Conversation::new();
        upload(&mut conversation, "kept\n");
        let upload_id = start_upload(&mut conversation, "broken.pdf");
        conversation.dispatch(Action::UploadFinished {
            upload_id,
            file: "broken.pdf".to_string(),
            result: Err(PdfError::Load("bad xref".to_string())),
        });

        assert!(conversation.file_uploaded());
        assert_eq!(conversation.extracted_text(), "kept\n");
        assert!(matches!(conversation.upload_status(), UploadStatus::Failed { file, .. } if file == "broken.pdf"));
    }

    #[test]
    fn superseded_upload_result_is_dropped() {
        let mut conversation = Conversation::new();
        let first = start_upload(&mut conversation, "a.pdf");
        let second = start_upload(&mut conversation, "b.pdf");

        conversation.dispatch(finished(second, "b.pdf", "B\n"));
        conversation.dispatch(finished(first, "a.pdf", "A\n"));

        assert_eq!(conversation.extracted_text(), "B\n");
        assert!(matches!(conversation.upload_status(), UploadStatus::Ready { file, .. } if file == "b.pdf"));
        assert_eq!(conversation.pending_upload(), None);
    }

    #[test]
    fn earlier_upload_finishing_first_keeps_waiting() {
        let mut conversation = Conversation::new();
        let first = start_upload(&mut conversation, "a.pdf");
        let second = start_upload(&mut conversation, "b.pdf");

        conversation.dispatch(finished(first, "a.pdf", "A\n"));
        assert!(!conversation.file_uploaded());
        assert_eq!(conversation.extracted_text(), "");
        assert!(matches!(conversation.upload_status(), UploadStatus::Extracting { file } if file == "b.pdf"));
        assert_eq!(conversation.pending_upload(), Some(second));
    }
}
