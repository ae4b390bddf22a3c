//! Core type definitions for Attrium.
//!
//! This crate defines the small, storage-agnostic types shared by every
//! layer of the attribute engine:
//! - Attribute, staged-record and entity identifiers
//! - Audit entries with dirty-only before/after snapshots
//!
//! Attribute definitions, typed values and the type registry live in
//! `attrium-model`; persistence lives in `attrium-storage`.

mod audit;
mod ids;

pub use audit::{
    dirty_fields, watched_only, AuditAction, AuditEntry, AuditEntryId, Snapshot,
};
pub use ids::{AttributeId, EntityId, StagedRecordId};
