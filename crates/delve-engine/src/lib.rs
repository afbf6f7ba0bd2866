//! Research cycle orchestration: worker cohorts, batch lifecycle, critical
//! synthesis, artifact persistence and the knowledge commit.

pub mod analyst;
pub mod cycle;
pub mod distill;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod prompts;

pub use analyst::CriticalAnalyst;
pub use cycle::{recommit, CommitReport, CycleParams, CycleReport, ResearchCycle};
pub use distill::ConversationDistiller;
pub use error::EngineError;
pub use naming::EpisodeNamer;
pub use orchestrator::{BatchJob, BatchOrchestrator};
