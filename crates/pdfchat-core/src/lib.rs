pub mod config;
pub mod gemini;
pub mod pdf;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use config::Config;
pub use gemini::{GeminiClient, GeminiError, GenerationConfig};
pub use pdf::{ExtractedDocument, LopdfExtractor, PdfError, TextExtractor};
pub use session::Session;
pub use state::{Action, ChatMessage, ChatRole, Conversation, GenerateRequest, UploadStatus};
