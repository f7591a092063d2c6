use std::path::{Path, PathBuf};
use std::sync::Arc;

use pdfchat_core::gemini::GenerateResponse;
use pdfchat_core::pdf;
use pdfchat_core::{
    Action, Conversation, ExtractedDocument, GeminiClient, GeminiError, PdfError, TextExtractor,
};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub conversation: Conversation,
    pub draft_cursor: usize, // cursor position in the draft, in chars

    // Chat view state
    pub chat_scroll: u16,
    pub follow_bottom: bool, // keep the newest message in view
    pub chat_area: Option<Rect>, // updated during render for mouse hit-testing

    // Upload prompt state
    pub show_upload_prompt: bool,
    pub upload_input: String,
    pub upload_cursor: usize,
    pub upload_error: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Collaborators
    pub client: GeminiClient,
    extractor: Arc<dyn TextExtractor>,
    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        client: GeminiClient,
        extractor: Arc<dyn TextExtractor>,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            conversation: Conversation::new(),
            draft_cursor: 0,

            chat_scroll: 0,
            follow_bottom: true,
            chat_area: None,

            show_upload_prompt: false,
            upload_input: String::new(),
            upload_cursor: 0,
            upload_error: None,

            animation_frame: 0,

            client,
            extractor,
            events,
        }
    }

    // Draft editing
    pub fn insert_char(&mut self, c: char) {
        let mut draft = self.conversation.draft().to_string();
        let byte_pos = char_to_byte_index(&draft, self.draft_cursor);
        draft.insert(byte_pos, c);
        self.conversation.dispatch(Action::SetDraft(draft));
        self.draft_cursor += 1;
    }

    pub fn delete_before_cursor(&mut self) {
        if self.draft_cursor > 0 {
            self.draft_cursor -= 1;
            self.remove_draft_char(self.draft_cursor);
        }
    }

    pub fn delete_at_cursor(&mut self) {
        if self.draft_cursor < self.draft_len() {
            self.remove_draft_char(self.draft_cursor);
        }
    }

    pub fn cursor_left(&mut self) {
        self.draft_cursor = self.draft_cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.draft_cursor = (self.draft_cursor + 1).min(self.draft_len());
    }

    pub fn cursor_home(&mut self) {
        self.draft_cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.draft_cursor = self.draft_len();
    }

    fn draft_len(&self) -> usize {
        self.conversation.draft().chars().count()
    }

    fn remove_draft_char(&mut self, char_idx: usize) {
        let mut draft = self.conversation.draft().to_string();
        let byte_pos = char_to_byte_index(&draft, char_idx);
        draft.remove(byte_pos);
        self.conversation.dispatch(Action::SetDraft(draft));
    }

    /// Send the draft and spawn the generation request
    pub fn send_draft(&mut self) {
        let Some(request) = self.conversation.dispatch(Action::Submit) else {
            return;
        };

        self.draft_cursor = 0;
        self.follow_bottom = true;

        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = client.generate(&request.contents).await;
            let _ = events.send(AppEvent::Reply {
                request_id: request.request_id,
                result,
            });
        });
    }

    pub fn apply_reply(&mut self, request_id: u64, result: Result<GenerateResponse, GeminiError>) {
        self.conversation.dispatch(Action::ReplyReceived { request_id, result });
        self.follow_bottom = true;
    }

    // Upload prompt
    pub fn open_upload_prompt(&mut self) {
        self.show_upload_prompt = true;
        self.upload_error = None;
        self.upload_cursor = self.upload_input.chars().count();
    }

    pub fn close_upload_prompt(&mut self) {
        self.show_upload_prompt = false;
        self.upload_error = None;
    }

    pub fn upload_insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.upload_input, self.upload_cursor);
        self.upload_input.insert(byte_pos, c);
        self.upload_cursor += 1;
        self.upload_error = None;
    }

    pub fn upload_backspace(&mut self) {
        if self.upload_cursor > 0 {
            self.upload_cursor -= 1;
            let byte_pos = char_to_byte_index(&self.upload_input, self.upload_cursor);
            self.upload_input.remove(byte_pos);
        }
    }

    /// Validate the typed path and start extraction. Leaves the prompt open with an
    /// error when the path is unusable.
    pub fn submit_upload_prompt(&mut self) {
        let path = expand_home(self.upload_input.trim());
        match validate_pdf_path(&path) {
            Ok(()) => {
                self.start_upload(path);
                self.close_upload_prompt();
            }
            Err(message) => self.upload_error = Some(message),
        }
    }

    pub fn start_upload(&mut self, path: PathBuf) {
        let file = pdf::file_label(&path);
        info!(path = %path.display(), "starting upload");
        self.conversation.dispatch(Action::UploadStarted { file: file.clone() });
        let Some(upload_id) = self.conversation.pending_upload() else {
            return;
        };

        let extractor = self.extractor.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = pdf::extract_file(extractor, &path).await;
            let _ = events.send(AppEvent::Upload { upload_id, file, result });
        });
    }

    pub fn apply_upload(
        &mut self,
        upload_id: u64,
        file: String,
        result: Result<ExtractedDocument, PdfError>,
    ) {
        self.conversation.dispatch(Action::UploadFinished { upload_id, file, result });
    }

    // Chat scrolling
    pub fn scroll_chat_down(&mut self, lines: u16) {
        // render clamps and re-enables follow when we hit the bottom
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_chat_top(&mut self) {
        self.follow_bottom = false;
        self.chat_scroll = 0;
    }

    pub fn scroll_chat_bottom(&mut self) {
        self.follow_bottom = true;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.conversation.awaiting_reply() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

fn expand_home(input: &str) -> PathBuf {
    match input.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(input)),
        None => PathBuf::from(input),
    }
}

fn validate_pdf_path(path: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("Enter a path to a PDF file".to_string());
    }
    let is_pdf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return Err("Only .pdf files can be uploaded".to_string());
    }
    if !path.is_file() {
        debug!(path = %path.display(), "upload path not found");
        return Err(format!("No such file: {}", path.display()));
    }
    Ok(())
}
