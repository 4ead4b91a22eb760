//! Caller-facing conversation API.
//!
//! Ties the answering engine to the conversation graph: one `submit_turn`
//! call resolves the conversation context, asks the engine, appends the
//! turn to the session chain, and links the referenced entities. The
//! engine's referenced ids arrive inside its reply value, so nothing about
//! a turn lives outside the call chain.

use tracing::info;

use crate::engine::{AnswerEngine, EngineRequest, Turn};
use crate::error::AppError;
use crate::graph::{ConversationGraph, MentionCount, Message, Session, SessionCount};

pub struct ConversationService {
    graph: ConversationGraph,
    engine: AnswerEngine,
    /// How many trailing turns are handed to the engine as context.
    context_turns: usize,
}

impl ConversationService {
    pub fn new(graph: ConversationGraph, engine: AnswerEngine, context_turns: usize) -> Self {
        Self { graph, engine, context_turns }
    }

    /// Create a fresh session with a generated id.
    pub fn start_session(&self) -> Result<Session, AppError> {
        let id = uuid::Uuid::now_v7().to_string();
        self.graph.ensure_session(&id)
    }

    /// Run one conversational turn: answer the question, persist it at the
    /// chain tail, and link the referenced entities.
    ///
    /// The question is validated before the engine is called. If the append
    /// fails, nothing of the turn is stored; `get_history` never sees a
    /// partially logged turn.
    pub async fn submit_turn(&self, session_id: &str, question: &str) -> Result<Message, AppError> {
        if question.trim().is_empty() {
            return Err(AppError::InvalidArgument("question must not be blank".into()));
        }

        let history = self.graph.reconstruct_session(session_id)?;
        let context: Vec<Turn> = history
            .iter()
            .rev()
            .take(self.context_turns)
            .rev()
            .map(|m| Turn { question: m.question.clone(), answer: m.answer.clone() })
            .collect();

        let reply = self
            .engine
            .answer(&EngineRequest { question: question.to_string(), context })
            .await
            .map_err(|e| AppError::Engine(e.to_string()))?;

        let message = self.graph.append_message(session_id, question, &reply.answer)?;
        self.graph
            .link_references(&message.id, &reply.company_ids, &reply.risk_ids)?;

        info!(
            %session_id,
            message_id = %message.id,
            seq = message.seq,
            companies = reply.company_ids.len(),
            risks = reply.risk_ids.len(),
            "turn recorded"
        );
        Ok(message)
    }

    /// The session's messages in chain order.
    pub fn get_history(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        self.graph.reconstruct_session(session_id)
    }

    // ── Analytics ─────────────────────────────────────────────────────────

    pub fn message_count_per_session(&self) -> Result<Vec<SessionCount>, AppError> {
        self.graph.message_count_per_session()
    }

    pub fn top_mentioned_companies(&self, limit: usize) -> Result<Vec<MentionCount>, AppError> {
        self.graph.top_mentioned_companies(limit)
    }

    pub fn top_mentioned_risk_factors(&self, limit: usize) -> Result<Vec<MentionCount>, AppError> {
        self.graph.top_mentioned_risk_factors(limit)
    }
}
