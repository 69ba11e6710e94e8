//! Upstream generator abstraction.
//!
//! The relay only needs one capability from a language model: open a
//! streaming session and hand back text fragments as they arrive. That is the
//! [`TextGenerator`] trait; [`GeminiClient`] is the production implementation.

mod error;
mod gemini;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use gemini::{GeminiClient, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Fixed instruction sent with every task. It asks the model to speak the
/// NDJSON event protocol that the client decodes.
pub const SYSTEM_INSTRUCTION: &str = "You are an expert AI software engineer. Your task is to solve a user's query for a hypothetical project.
You must output a stream of newline-delimited JSON objects. Do not output any text outside of these JSON objects. Each JSON object must be a valid 'StreamEvent'.
The stream must follow this sequence:
1.  A single 'status' event with the message 'Agent is thinking...'.
2.  A single 'architecture' event, providing a list of key files and directories for project context.
3.  A series of 'log' events, one for each step of your process. Each log event should be preceded by a 'status' event describing the step's title.
4.  A final 'status' event with the message 'Task completed' and 'completed: true'.";

/// Text fragments in the order the provider produced them.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// One streaming generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub user_prompt: String,
}

impl GenerationRequest {
    /// Build the request for a user's task query.
    pub fn for_task(query: &str) -> Self {
        Self {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            user_prompt: format!("Here is the task I need you to perform: '{}'", query),
        }
    }
}

/// A language model that can stream text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a streaming session.
    ///
    /// Implementations must report failures that happen before the first
    /// fragment (bad credential, HTTP error, unreachable host) as `Err` here,
    /// so callers can still answer with a proper error status. Failures after
    /// that surface as an `Err` item in the returned stream.
    async fn stream_text(&self, request: &GenerationRequest) -> Result<TextStream, LlmError>;
}
