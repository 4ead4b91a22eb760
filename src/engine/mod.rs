//! Answering engine abstraction.
//!
//! The engine is an external collaborator with a narrow contract: it takes
//! a question plus the prior turns of the conversation and returns an
//! answer string together with the ids of the catalog entities the answer
//! referenced. The referenced ids travel inside the reply value — there is
//! no side channel between answering and persistence.
//!
//! `AnswerEngine` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//! Enum dispatch avoids `dyn` trait objects and the `async-trait`
//! dependency; provider instances are shared immutable capabilities and
//! clone cheaply.

pub mod providers;

use std::collections::HashSet;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("malformed provider reply: {0}")]
    MalformedReply(String),
}

// ── Contract types ────────────────────────────────────────────────────────────

/// One prior question/answer pair handed to the engine as context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Input to [`AnswerEngine::answer`]: the new question and the conversation
/// so far, oldest turn first.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub question: String,
    pub context: Vec<Turn>,
}

/// Output of [`AnswerEngine::answer`].
///
/// `company_ids` / `risk_ids` carry the entity references the answer is
/// grounded on. The linker validates them against the catalog; claiming an
/// id that does not exist is allowed and results in the id being skipped.
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub answer: String,
    pub company_ids: HashSet<String>,
    pub risk_ids: HashSet<String>,
}

// ── Engine enum ───────────────────────────────────────────────────────────────

/// All available answering-engine backends.
#[derive(Debug, Clone)]
pub enum AnswerEngine {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl AnswerEngine {
    /// Answer `request.question` given the conversation context, returning
    /// the answer text and the referenced entity ids.
    pub async fn answer(&self, request: &EngineRequest) -> Result<EngineReply, ProviderError> {
        match self {
            AnswerEngine::Dummy(p) => p.answer(request),
            AnswerEngine::OpenAiCompatible(p) => p.answer(request).await,
        }
    }
}
