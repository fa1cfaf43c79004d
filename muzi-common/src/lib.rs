//! # Muzi Common Library
//!
//! Shared code for the muzi services:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - Database pool setup and the `history` schema
//! - Import progress event types
//! - Timestamp conversion helpers
//! - SSE helpers for progress streams

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
