//! Application services: run lifecycle, workers, verification and dispatch.

pub mod gates;
pub mod jury;
pub mod operations;
pub mod rate_limited_provider;
pub mod rate_limiter;
pub mod run_manager;
pub mod skills;
pub mod stage_executor;
pub mod verification;
pub mod worker;

pub use gates::{GateEvaluator, GateSummary, JuryEvaluation};
pub use jury::{expand_persona, sample_stratified, skeptic_floor, JuryPanel, JurySettings};
pub use operations::{EngineOperations, HealthReport, RescueReport};
pub use rate_limited_provider::{rate_limit_registry, ProviderRetryPolicy, RateLimitedProvider};
pub use rate_limiter::{RateLimitSettings, Remaining, Reservation, SlidingWindowRateLimiter};
pub use run_manager::{CreateRunRequest, RunManager, RunManagerSettings, RESCUE_REASON};
pub use skills::{Skill, SkillRegistry, GENERIC_SKILL, JURY_SKILL};
pub use stage_executor::{stage_program, ExecutorSettings, StageExecutor, StageOutcome};
pub use verification::{VerificationContext, VerificationEngine};
pub use worker::{generate_worker_id, RunRecorder, StageWorker, WorkerReport, WorkerSettings, WorkerState};
