//! Import pipeline services
//!
//! decode → (fetch scheduler) → validity filter → duplicate resolver →
//! bulk writer, with progress published per unit of work.

pub mod batch_processor;
pub mod bulk_writer;
pub mod duplicate_resolver;
pub mod fetch_scheduler;
pub mod import_error;
pub mod job_manager;
pub mod lastfm_importer;
pub mod progress_reporter;
pub mod spotify_importer;
pub mod validity_filter;

pub use batch_processor::{BatchOutcome, BatchProcessor};
pub use bulk_writer::BulkWriter;
pub use duplicate_resolver::{find_duplicates, DuplicateResolver, DuplicateSet};
pub use fetch_scheduler::{FetchScheduler, PageResult, PageStream};
pub use import_error::ImportError;
pub use job_manager::{JobHandle, JobManager, JobSummary};
pub use lastfm_importer::LastFmImporter;
pub use progress_reporter::ProgressReporter;
pub use spotify_importer::SpotifyImporter;
pub use validity_filter::ValidityFilter;
