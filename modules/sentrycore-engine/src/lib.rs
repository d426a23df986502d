//! The SentryCore engine: fetch scheduling, ingest, embedding, matching,
//! decisioning, delivery coalescing and budget governance, driven by the
//! timer tick. Components are separable; the single binary co-locates them.

pub mod budget;
pub mod coalescer;
pub mod deps;
pub mod embed;
pub mod engine;
pub mod ingest;
pub mod judge;
pub mod matcher;
pub mod outbox;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod tick;

pub use budget::{BudgetGovernor, BudgetKind, Reservation, SYSTEM_USER};
pub use coalescer::Coalescer;
pub use deps::Deps;
pub use embed::EmbedWorker;
pub use engine::Engine;
pub use ingest::IngestCoordinator;
pub use judge::{
    BoundaryJudgeOutput, JudgeProvider, KeywordSuggestionOutput, LlmJudge, PushWorthinessOutput,
};
pub use matcher::MatchEngine;
pub use outbox::{EmailBackend, EmailSender, NoopBackend, SmtpBackend};
pub use pipeline::{build_pipeline, AgentState, DecisionEngine};
pub use render::EmailRenderer;
pub use scheduler::FetchScheduler;
