//! Stash and hoard.
//!
//! Stash parses a source file and stages every row as `pending`. Hoard
//! commits a reviewer's selection of staged rows, one row at a time, and
//! records per-row failures back into staging instead of aborting.

use crate::config::ImportConfig;
use crate::error::{ImportError, ImportResult};
use crate::locks::KeyedLocks;
use crate::parser::parse_csv;
use crate::resource::{
    natural_key_value, CommitContext, DefinitionResource, EntityResource, ImportResource,
};
use crate::staging::{ImportStagingStore, StagedImportRecord};
use attrium_storage::AttributeStores;
use attrium_types::StagedRecordId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Result of a stash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashReport {
    pub resource_type: String,
    /// Ids of the staged rows, in source order.
    pub staged: Vec<StagedRecordId>,
    /// Data rows found in the source.
    pub rows: usize,
    /// Set when the cancel flag stopped staging early. Rows already
    /// staged are kept.
    pub interrupted: bool,
}

/// Result of a hoard, every list in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoardSummary {
    pub committed: Vec<StagedRecordId>,
    /// Failed rows with the note appended to each.
    pub failed: Vec<(StagedRecordId, String)>,
    /// Selected ids with no staged row.
    pub missing: Vec<StagedRecordId>,
}

impl HoardSummary {
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.failed.is_empty() && self.missing.is_empty()
    }
}

enum RowOutcome {
    Committed,
    Failed(String),
    Missing,
}

pub struct ImportPipeline {
    stores: Arc<AttributeStores>,
    staging: Arc<ImportStagingStore>,
    resources: BTreeMap<String, Arc<dyn ImportResource>>,
    config: ImportConfig,
    key_locks: KeyedLocks<(String, String)>,
}

impl ImportPipeline {
    /// A pipeline with the definition resource and one entity resource
    /// per catalogued entity type.
    pub fn new(
        stores: Arc<AttributeStores>,
        staging: Arc<ImportStagingStore>,
        config: ImportConfig,
    ) -> Self {
        let kinds: Vec<_> = stores.catalog().kinds().cloned().collect();
        let mut pipeline = Self {
            stores,
            staging,
            resources: BTreeMap::new(),
            config,
            key_locks: KeyedLocks::new("natural key"),
        };
        for kind in kinds {
            if kind.name == DefinitionResource::RESOURCE_TYPE {
                warn!(
                    entity_type = %kind.name,
                    "entity type shadows the definition resource; skipped"
                );
                continue;
            }
            pipeline = pipeline.with_resource(EntityResource::new(kind));
        }
        pipeline.with_resource(DefinitionResource)
    }

    /// Registers a resource, replacing one with the same type.
    pub fn with_resource(mut self, resource: impl ImportResource + 'static) -> Self {
        self.resources
            .insert(resource.resource_type().to_string(), Arc::new(resource));
        self
    }

    pub fn stores(&self) -> &AttributeStores {
        &self.stores
    }

    pub fn staging(&self) -> &ImportStagingStore {
        &self.staging
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn resource(&self, resource_type: &str) -> ImportResult<Arc<dyn ImportResource>> {
        self.resources
            .get(resource_type)
            .cloned()
            .ok_or_else(|| {
                ImportError::SchemaMismatch(format!("unknown resource type {resource_type:?}"))
            })
    }

    // ── Stash ────────────────────────────────────────────────────

    pub fn stash_file(&self, path: &Path, resource_type: &str) -> ImportResult<StashReport> {
        self.resource(resource_type)?;
        let file = std::fs::File::open(path)
            .map_err(|e| ImportError::Parse(format!("cannot read {}: {e}", path.display())))?;
        self.stash_reader(file, resource_type)
    }

    pub fn stash_reader<R: Read>(
        &self,
        reader: R,
        resource_type: &str,
    ) -> ImportResult<StashReport> {
        self.stash_with_cancel(reader, resource_type, &AtomicBool::new(false))
    }

    /// Stashes a source, checking `cancel` between staging chunks.
    pub fn stash_with_cancel<R: Read>(
        &self,
        reader: R,
        resource_type: &str,
        cancel: &AtomicBool,
    ) -> ImportResult<StashReport> {
        let resource = self.resource(resource_type)?;
        let table = parse_csv(reader, self.config.delimiter_byte())?;
        if !table.headers.iter().any(|h| h == resource.natural_key()) {
            return Err(ImportError::Parse(format!(
                "missing natural key column {:?} for {resource_type}",
                resource.natural_key()
            )));
        }

        let rows = table.rows.len();
        let mut staged = Vec::with_capacity(rows);
        let mut interrupted = false;
        let mut remaining = table.rows.into_iter().peekable();
        while remaining.peek().is_some() {
            if cancel.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            let chunk: Vec<_> = remaining.by_ref().take(self.config.stage_chunk_size).collect();
            staged.extend(self.staging.stage_rows(resource_type, chunk)?);
        }

        if interrupted {
            warn!(resource_type, staged = staged.len(), rows, "stash interrupted");
        } else {
            info!(resource_type, staged = staged.len(), "stash complete");
        }
        Ok(StashReport {
            resource_type: resource_type.to_string(),
            staged,
            rows,
            interrupted,
        })
    }

    // ── Hoard ────────────────────────────────────────────────────

    /// Commits the selected staged rows.
    ///
    /// Each row succeeds or fails on its own. Rows sharing a natural key
    /// are applied in selection order, so the last one wins.
    pub fn hoard(&self, ids: &[StagedRecordId]) -> ImportResult<HoardSummary> {
        let mut seen = HashSet::new();
        let ids: Vec<StagedRecordId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Ok(HoardSummary::default());
        }

        let mut records: HashMap<StagedRecordId, StagedImportRecord> = HashMap::new();
        for id in &ids {
            if let Some(record) = self.staging.find(id)? {
                records.insert(*id, record);
            }
        }

        // Fillable fields are computed once per resource type.
        let mut fillable: HashMap<String, Result<Arc<BTreeSet<String>>, String>> = HashMap::new();
        for record in records.values() {
            if fillable.contains_key(&record.resource_type) {
                continue;
            }
            let fields = self
                .resource(&record.resource_type)
                .and_then(|r| r.fillable(&self.stores))
                .map(Arc::new)
                .map_err(|e| e.note());
            fillable.insert(record.resource_type.clone(), fields);
        }

        let groups = group_by_key(&ids, &records, |record| {
            self.resource(&record.resource_type)
                .ok()
                .and_then(|r| {
                    natural_key_value(r.as_ref(), &record.source_row)
                        .ok()
                        .map(str::to_string)
                })
        });

        let outcomes: Mutex<HashMap<StagedRecordId, RowOutcome>> = Mutex::new(HashMap::new());
        let run_group = |group: &[StagedRecordId]| -> ImportResult<()> {
            for id in group {
                let outcome = self.hoard_one(id, &fillable)?;
                outcomes
                    .lock()
                    .map_err(|e| ImportError::Lock(format!("hoard outcomes: {e}")))?
                    .insert(*id, outcome);
            }
            Ok(())
        };

        let workers = self.config.workers.min(groups.len()).max(1);
        if workers == 1 {
            for group in &groups {
                run_group(group)?;
            }
        } else {
            let next = AtomicUsize::new(0);
            let results: Vec<ImportResult<()>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|_| {
                        s.spawn(|| -> ImportResult<()> {
                            loop {
                                let index = next.fetch_add(1, Ordering::SeqCst);
                                let Some(group) = groups.get(index) else {
                                    return Ok(());
                                };
                                run_group(group)?;
                            }
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(ImportError::Lock("hoard worker panicked".to_string()))
                        })
                    })
                    .collect()
            });
            for result in results {
                result?;
            }
        }

        let mut outcomes = outcomes
            .into_inner()
            .map_err(|e| ImportError::Lock(format!("hoard outcomes: {e}")))?;
        let mut summary = HoardSummary::default();
        for id in ids {
            match outcomes.remove(&id) {
                Some(RowOutcome::Committed) => summary.committed.push(id),
                Some(RowOutcome::Failed(note)) => summary.failed.push((id, note)),
                Some(RowOutcome::Missing) | None => summary.missing.push(id),
            }
        }

        info!(
            committed = summary.committed.len(),
            failed = summary.failed.len(),
            missing = summary.missing.len(),
            "hoard complete"
        );
        Ok(summary)
    }

    /// Commits one staged row. Only bookkeeping failures (a lost lock, an
    /// unreadable staging record) are returned as errors.
    fn hoard_one(
        &self,
        id: &StagedRecordId,
        fillable: &HashMap<String, Result<Arc<BTreeSet<String>>, String>>,
    ) -> ImportResult<RowOutcome> {
        self.staging.with_record_lock(id, || -> ImportResult<RowOutcome> {
            // Re-read under the lock: a concurrent hoard may have committed it.
            let Some(record) = self.staging.find(id)? else {
                return Ok(RowOutcome::Missing);
            };

            let result = match fillable.get(&record.resource_type) {
                Some(Ok(fields)) => self.commit_record(&record, fields).map_err(|e| {
                    warn!(%id, row = record.row_number, error = %e, "row failed");
                    e.note()
                }),
                // Already a full note: the resource or its fields could not be resolved.
                Some(Err(note)) => Err(note.clone()),
                None => Err(ImportError::SchemaMismatch(format!(
                    "unknown resource type {:?}",
                    record.resource_type
                ))
                .note()),
            };

            // Another process sharing the backend may have settled the row
            // after it was read; the record lock only covers this process.
            let marked = match result {
                Ok(()) => self.staging.mark_success(id).map(|()| {
                    debug!(%id, row = record.row_number, "row committed");
                    RowOutcome::Committed
                }),
                Err(note) => self
                    .staging
                    .mark_failed(id, &note)
                    .map(|_| RowOutcome::Failed(note)),
            };
            match marked {
                Err(ImportError::NotFound(_)) => {
                    warn!(%id, "staged row removed during hoard");
                    Ok(RowOutcome::Missing)
                }
                other => other,
            }
        })?
    }

    fn commit_record(
        &self,
        record: &StagedImportRecord,
        fillable: &BTreeSet<String>,
    ) -> ImportResult<()> {
        let resource = self.resource(&record.resource_type)?;
        let row = record.source_row.retain_columns(fillable);
        let key = natural_key_value(resource.as_ref(), &row)?.to_string();
        let ctx = CommitContext {
            stores: &self.stores,
            list_separator: self.config.list_separator,
        };
        self.key_locks
            .with_lock(&(record.resource_type.clone(), key), || resource.commit(&ctx, &row))??;
        Ok(())
    }
}

/// Splits the selection into groups that must run sequentially: rows with
/// the same resource type and natural key share a group, in selection
/// order. Rows without a usable key run alone.
fn group_by_key(
    ids: &[StagedRecordId],
    records: &HashMap<StagedRecordId, StagedImportRecord>,
    key_of: impl Fn(&StagedImportRecord) -> Option<String>,
) -> Vec<Vec<StagedRecordId>> {
    let mut groups: Vec<Vec<StagedRecordId>> = Vec::new();
    let mut by_key: HashMap<(String, String), usize> = HashMap::new();
    for id in ids {
        let key = records
            .get(id)
            .and_then(|record| key_of(record).map(|k| (record.resource_type.clone(), k)));
        match key {
            Some(key) => match by_key.get(&key) {
                Some(&index) => groups[index].push(*id),
                None => {
                    by_key.insert(key, groups.len());
                    groups.push(vec![*id]);
                }
            },
            None => groups.push(vec![*id]),
        }
    }
    groups
}
