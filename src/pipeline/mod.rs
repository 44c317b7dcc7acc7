mod locks;
mod orchestrator;
mod penalty;
mod state_machine;

pub use locks::{GradingGuard, GradingLocks};
pub use orchestrator::{GradingOrchestrator, GradingOutcome};
pub use penalty::{ordinal, penalty_feedback};
pub use state_machine::{Baseline, Decision, GradingState, ResubmissionStateMachine};
