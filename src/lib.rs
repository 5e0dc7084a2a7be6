//! Escalation triage for student questions the assistant could not answer
//! well: detection, risk scoring, and the advisor queue.

pub mod academic;
pub mod answer;
pub mod config;
pub mod detector;
pub mod error;
pub mod models;
pub mod report;
pub mod risk;
pub mod roster;
pub mod seed;
pub mod store;
pub mod triage;

pub use error::{Result, TriageError};
pub use triage::TriageService;
