//! Data models for the import service

pub mod import_job;
pub mod listen;

pub use import_job::{ImportJob, JobId, JobState, StateTransition};
pub use listen::{ListenEvent, ListenKey, Platform};
