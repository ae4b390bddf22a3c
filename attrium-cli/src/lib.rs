//! Command handling for the `attrium` binary.
//!
//! [`Cli`] is the clap argument tree; [`run`] opens the configured stores
//! and executes one command, writing human-readable output to `out`.

use anyhow::{bail, Context, Result};
use attrium_import::{
    AttriumConfig, HoardSummary, ImportPipeline, ImportStagingStore, StagedFilter, StagedStatus,
};
use attrium_model::{AttributeDefinition, DefinitionSpec, RawValue, StoredValue};
use attrium_storage::{AttributeStores, TracingAuditLog, TypeMigration};
use attrium_types::{AttributeId, StagedRecordId};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "attrium")]
#[command(about = "Attribute definitions, typed values and staged CSV imports")]
pub struct Cli {
    /// Path to the TOML config file. Without one, an in-memory store is used.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered attribute types
    Types,
    /// Manage attribute definitions
    #[command(subcommand)]
    Definitions(DefinitionCommand),
    /// Read and write attribute values
    #[command(subcommand)]
    Values(ValueCommand),
    /// Inspect and delete entities
    #[command(subcommand)]
    Entities(EntityCommand),
    /// Stage rows from a CSV file and commit them
    #[command(subcommand)]
    Import(ImportCommand),
}

#[derive(Subcommand, Debug)]
pub enum DefinitionCommand {
    /// List definitions, optionally only those for one entity type
    List {
        #[arg(long)]
        entity: Option<String>,
    },
    /// List definition groups
    Groups,
    /// Print one definition as JSON
    Show { id: AttributeId },
    /// Create a definition from a JSON file
    Create {
        #[arg(long)]
        file: PathBuf,
    },
    /// Replace a definition's fields from a JSON file
    Update {
        id: AttributeId,
        #[arg(long)]
        file: PathBuf,
        /// How to treat stored values when the type changes
        #[arg(long, value_enum)]
        migrate: Option<Migration>,
    },
    /// Delete a definition. Refused while values exist unless forced.
    Delete {
        id: AttributeId,
        /// Delete the definition's stored values too
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ValueCommand {
    /// Print one attribute, or every attribute of the entity
    Get {
        entity_type: String,
        key: String,
        slug: Option<String>,
    },
    /// Set an attribute, creating the entity if needed. No values clears it.
    Set {
        entity_type: String,
        key: String,
        slug: String,
        values: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum EntityCommand {
    /// List registered entities of a type
    List { entity_type: String },
    /// Delete an entity and its values
    Delete { entity_type: String, key: String },
}

#[derive(Subcommand, Debug)]
pub enum ImportCommand {
    /// Parse a CSV file and stage every row as pending
    Stash {
        file: PathBuf,
        /// Resource the rows describe (`attribute` or an entity type)
        #[arg(short, long)]
        resource: String,
    },
    /// List staged rows
    List {
        #[arg(short, long)]
        resource: Option<String>,
        #[arg(short, long)]
        status: Option<StagedStatus>,
    },
    /// Commit staged rows
    Hoard {
        #[arg(required_unless_present = "all")]
        ids: Vec<StagedRecordId>,
        /// Select every staged row
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        /// With --all, only rows of this resource
        #[arg(short, long, requires = "all")]
        resource: Option<String>,
    },
    /// Drop a staged row without committing it
    Discard { id: StagedRecordId },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Coerce every stored value to the new type, or change nothing
    Recoerce,
    /// Drop the stored values
    Discard,
}

impl From<Migration> for TypeMigration {
    fn from(m: Migration) -> Self {
        match m {
            Migration::Recoerce => TypeMigration::Recoerce,
            Migration::Discard => TypeMigration::Discard,
        }
    }
}

/// Loads the config (or defaults), opens the stores and runs the command.
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AttriumConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AttriumConfig::default(),
    };
    let pipeline = open_pipeline(&config)?;
    execute(&cli.command, &pipeline, out)
}

pub fn open_pipeline(config: &AttriumConfig) -> Result<ImportPipeline> {
    let stores = config
        .open_stores(Arc::new(TracingAuditLog))
        .context("Failed to open attribute stores")?;
    let staging = ImportStagingStore::new(stores.backend());
    Ok(ImportPipeline::new(
        Arc::new(stores),
        Arc::new(staging),
        config.import.clone(),
    ))
}

pub fn execute(command: &Command, pipeline: &ImportPipeline, out: &mut dyn Write) -> Result<()> {
    let stores = pipeline.stores();
    match command {
        Command::Types => {
            for name in stores.registry().type_names() {
                writeln!(out, "{name}")?;
            }
        }
        Command::Definitions(cmd) => definitions(cmd, stores, out)?,
        Command::Values(cmd) => values(cmd, stores, out)?,
        Command::Entities(cmd) => entities(cmd, stores, out)?,
        Command::Import(cmd) => import(cmd, pipeline, out)?,
    }
    Ok(())
}

// ── Definitions ──────────────────────────────────────────────────

fn definitions(
    cmd: &DefinitionCommand,
    stores: &AttributeStores,
    out: &mut dyn Write,
) -> Result<()> {
    match cmd {
        DefinitionCommand::List { entity } => {
            let defs = match entity {
                Some(entity_type) => stores.definitions.find_by_entity_type(entity_type)?,
                None => stores.definitions.list()?,
            };
            for def in &defs {
                write_definition_line(out, def)?;
            }
        }
        DefinitionCommand::Groups => {
            for group in stores.definitions.list_groups()? {
                writeln!(out, "{group}")?;
            }
        }
        DefinitionCommand::Show { id } => {
            let def = stores.definitions.get(id)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&def)?)?;
        }
        DefinitionCommand::Create { file } => {
            let spec = read_spec(file)?;
            let def = stores.definitions.create(&spec)?;
            writeln!(out, "created {} {}", def.slug, def.id)?;
        }
        DefinitionCommand::Update { id, file, migrate } => {
            let spec = read_spec(file)?;
            let def = match migrate {
                Some(m) => stores
                    .definitions
                    .update_with_migration(id, &spec, (*m).into())?,
                None => stores.definitions.update(id, &spec)?,
            };
            writeln!(out, "updated {} {}", def.slug, def.id)?;
        }
        DefinitionCommand::Delete { id, force: false } => {
            stores.definitions.delete(id)?;
            writeln!(out, "deleted {id}")?;
        }
        DefinitionCommand::Delete { id, force: true } => {
            let removed = stores.definitions.force_delete(id)?;
            writeln!(out, "deleted {id} and {removed} values")?;
        }
    }
    Ok(())
}

fn write_definition_line(out: &mut dyn Write, def: &AttributeDefinition) -> Result<()> {
    let entities: Vec<&str> = def.entities.iter().map(String::as_str).collect();
    let mut flags = Vec::new();
    if def.is_required {
        flags.push("required");
    }
    if def.is_collection {
        flags.push("collection");
    }
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        def.slug,
        def.type_name,
        entities.join(","),
        flags.join(","),
        def.id
    )?;
    Ok(())
}

fn read_spec(path: &Path) -> Result<DefinitionSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid definition in {}", path.display()))
}

// ── Values ───────────────────────────────────────────────────────

fn values(cmd: &ValueCommand, stores: &AttributeStores, out: &mut dyn Write) -> Result<()> {
    match cmd {
        ValueCommand::Get {
            entity_type,
            key,
            slug,
        } => {
            let Some(entity) = stores.directory.find(entity_type, key)? else {
                bail!("no {entity_type} with key {key:?}");
            };
            match slug {
                Some(slug) => {
                    let def = definition_for(stores, entity_type, slug)?;
                    match stores.values.get(entity_type, &entity.entity_id, &def.id)? {
                        Some(value) => writeln!(out, "{}", display_value(&value))?,
                        None => writeln!(out, "(none)")?,
                    }
                }
                None => {
                    for (slug, value) in stores
                        .values
                        .values_for_entity(entity_type, &entity.entity_id)?
                    {
                        writeln!(out, "{slug}\t{}", display_value(&value))?;
                    }
                }
            }
        }
        ValueCommand::Set {
            entity_type,
            key,
            slug,
            values,
        } => {
            let def = definition_for(stores, entity_type, slug)?;
            let raw = match values.as_slice() {
                _ if def.is_collection => RawValue::Many(values.clone()),
                [] => RawValue::from(""),
                [one] => RawValue::from(one.as_str()),
                _ => bail!("{slug} is not a collection and takes one value"),
            };
            let upsert = stores.upsert_entity(entity_type, key, &[(def.id, raw)])?;
            debug!(entity_type, key, created = upsert.created, "set {slug}");
            if upsert.created {
                writeln!(out, "created {entity_type} {key}")?;
            }
            writeln!(out, "set {slug}")?;
        }
    }
    Ok(())
}

fn definition_for(
    stores: &AttributeStores,
    entity_type: &str,
    slug: &str,
) -> Result<AttributeDefinition> {
    match stores.definitions.find_by_slug(entity_type, slug)? {
        Some(def) => Ok(def),
        None => bail!("no attribute {slug:?} for {entity_type}"),
    }
}

fn display_value(value: &StoredValue) -> String {
    value
        .values()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Entities ─────────────────────────────────────────────────────

fn entities(cmd: &EntityCommand, stores: &AttributeStores, out: &mut dyn Write) -> Result<()> {
    match cmd {
        EntityCommand::List { entity_type } => {
            for record in stores.directory.list(entity_type)? {
                writeln!(out, "{}\t{}", record.natural_key, record.entity_id)?;
            }
        }
        EntityCommand::Delete { entity_type, key } => {
            if !stores.delete_entity(entity_type, key)? {
                bail!("no {entity_type} with key {key:?}");
            }
            writeln!(out, "deleted {entity_type} {key}")?;
        }
    }
    Ok(())
}

// ── Import ───────────────────────────────────────────────────────

fn import(cmd: &ImportCommand, pipeline: &ImportPipeline, out: &mut dyn Write) -> Result<()> {
    match cmd {
        ImportCommand::Stash { file, resource } => {
            let report = pipeline
                .stash_file(file, resource)
                .with_context(|| format!("Failed to stash {}", file.display()))?;
            writeln!(
                out,
                "staged {} of {} rows as {}",
                report.staged.len(),
                report.rows,
                report.resource_type
            )?;
            for id in &report.staged {
                writeln!(out, "{id}")?;
            }
        }
        ImportCommand::List { resource, status } => {
            let mut filter = StagedFilter::all();
            if let Some(resource) = resource {
                filter = filter.resource(resource.as_str());
            }
            if let Some(status) = status {
                filter = filter.status(*status);
            }
            for record in pipeline.staging().list(&filter)? {
                writeln!(
                    out,
                    "{}\t{}\t{}\trow {}",
                    record.id, record.resource_type, record.status, record.row_number
                )?;
                for line in record.notes.lines().filter(|l| !l.is_empty()) {
                    writeln!(out, "    {line}")?;
                }
            }
        }
        ImportCommand::Hoard { ids, all, resource } => {
            let selected = if *all {
                let mut filter = StagedFilter::all();
                if let Some(resource) = resource {
                    filter = filter.resource(resource.as_str());
                }
                pipeline
                    .staging()
                    .list(&filter)?
                    .into_iter()
                    .map(|record| record.id)
                    .collect()
            } else {
                ids.clone()
            };
            let summary = pipeline.hoard(&selected)?;
            write_summary(out, &summary)?;
        }
        ImportCommand::Discard { id } => {
            if !pipeline.staging().discard(id)? {
                bail!("no staged row {id}");
            }
            writeln!(out, "discarded {id}")?;
        }
    }
    Ok(())
}

fn write_summary(out: &mut dyn Write, summary: &HoardSummary) -> Result<()> {
    writeln!(
        out,
        "committed {}, failed {}, missing {}",
        summary.committed.len(),
        summary.failed.len(),
        summary.missing.len()
    )?;
    for (id, note) in &summary.failed {
        let reason = note.lines().next().unwrap_or_default();
        writeln!(out, "failed {id}: {reason}")?;
    }
    for id in &summary.missing {
        writeln!(out, "missing {id}")?;
    }
    Ok(())
}
