//! Import progress event types
//!
//! A `ProgressUpdate` is the snapshot pushed to progress consumers (the web
//! front end's progress bar). The JSON field names are the ones the front
//! end already reads (`current_page`, `completed_pages`, `total_pages`,
//! `tracks_imported`, `status`, `error`), even though a unit may be a page
//! (LastFM) or a batch (Spotify export).

use serde::{Deserialize, Serialize};

/// Lifecycle status of an import, as seen by progress consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// Accepted, total unit count not known yet
    Pending,
    /// Units are being processed
    Running,
    /// All units processed
    Completed,
    /// Stopped by a fatal error (or cancellation)
    Error,
}

impl ImportStatus {
    /// Completed and Error end the stream
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Running => "running",
            ImportStatus::Completed => "completed",
            ImportStatus::Error => "error",
        }
    }
}

/// Snapshot of import progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Page number (LastFM) or batch number (export) that just finished
    #[serde(rename = "current_page")]
    pub current_unit: u32,
    /// Units processed so far
    #[serde(rename = "completed_pages")]
    pub completed_units: u32,
    /// Total units for this import
    #[serde(rename = "total_pages")]
    pub total_units: u32,
    /// Rows actually persisted so far (after duplicate removal)
    pub tracks_imported: u64,
    pub status: ImportStatus,
    /// Present only when `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressUpdate {
    /// Initial snapshot before the unit count is known
    pub fn pending() -> Self {
        Self {
            current_unit: 0,
            completed_units: 0,
            total_units: 0,
            tracks_imported: 0,
            status: ImportStatus::Pending,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completion percentage (0-100); 100 when there is nothing to do and
    /// the import finished
    pub fn percentage(&self) -> f64 {
        if self.total_units == 0 {
            return if self.status == ImportStatus::Completed { 100.0 } else { 0.0 };
        }
        (self.completed_units as f64 / self.total_units as f64) * 100.0
    }
}

impl Default for ProgressUpdate {
    fn default() -> Self {
        Self::pending()
    }
}
