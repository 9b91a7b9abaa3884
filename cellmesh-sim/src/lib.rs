//! Tick orchestration, admission filtering, and the session worker pool
//! that sit on top of [`cellmesh_world`] and [`cellmesh_scheduler`].

mod admission;
mod config;
mod orchestrator;
mod session;

pub use admission::{AdmissionFilter, AdmissionOptions};
pub use config::RuntimeConfig;
pub use orchestrator::TickOrchestrator;
pub use session::{NullSessionWorkload, SessionPool, SessionUpdateResult, SessionWorkload};
