//! Staged bulk import for Attrium.
//!
//! Importing is a two-step, human-in-the-loop process:
//!
//! 1. **Stash**: a CSV file is parsed and every row is staged as a
//!    `pending` [`StagedImportRecord`]. A malformed file stages nothing.
//! 2. **Hoard**: a reviewer selects staged rows; each is mapped onto its
//!    [`ImportResource`] and committed through the attribute stores.
//!    Committed rows disappear from staging; failed rows stay behind as
//!    `fail` with a note explaining why.
//!
//! [`AttriumConfig`] carries the process-wide settings (backend, actor,
//! import tuning, entity catalog).

mod config;
mod error;
mod locks;
mod parser;
mod pipeline;
mod resource;
mod staging;

pub use config::{AttriumConfig, AuditConfig, ImportConfig, StorageConfig};
pub use error::{ImportError, ImportResult};
pub use parser::{parse_csv, ParsedRow, ParsedTable, SourceRow};
pub use pipeline::{HoardSummary, ImportPipeline, StashReport};
pub use resource::{
    natural_key_value, CommitContext, CommitOutcome, DefinitionResource, EntityResource,
    ImportResource,
};
pub use staging::{
    ImportStagingStore, StagedFilter, StagedImportRecord, StagedStatus, UnknownStatus,
};
