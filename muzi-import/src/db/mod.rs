//! Database access for muzi-import
//!
//! The pool and schema come from `muzi_common::db`; this module holds the
//! queries the import pipeline runs against `history`.

pub mod history;

pub use history::{count_for_user, fetch_window, insert_listens, StoredListen, INSERT_CHUNK_ROWS};
