use attrium_cli::{run, Cli};
use clap::Parser;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use tempfile::TempDir;

/// A config backed by a SQLite file, so state survives between commands.
struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("attrium.toml");
        let db = dir.path().join("attrium.db");
        std::fs::write(
            &config,
            format!(
                "[storage]\npath = {:?}\n\n[audit]\nactor = \"cli-test\"\n\n\
                 [[entity_types]]\nname = \"product\"\nnatural_key = \"sku\"\n",
                db.display().to_string()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn write(&self, name: &str, contents: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    fn attrium(&self, args: &[&str]) -> anyhow::Result<String> {
        let config = self.config.display().to_string();
        let mut argv = vec!["attrium", "--config", config.as_str()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let mut out = Vec::new();
        run(&cli, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn ok(&self, args: &[&str]) -> String {
        self.attrium(args)
            .unwrap_or_else(|e| panic!("attrium {args:?} failed: {e:#}"))
    }

    /// Creates a definition and returns its id.
    fn define(&self, file: &str, json: &str) -> String {
        let path = self.write(file, json);
        let out = self.ok(&["definitions", "create", "--file", &path]);
        out.split_whitespace().nth(2).unwrap().to_string()
    }
}

const SIZE: &str = r#"{"name": {"en": "Size"}, "type": "integer", "entities": ["product"]}"#;
const TAGS: &str =
    r#"{"name": {"en": "Tags"}, "type": "text", "entities": ["product"], "is_collection": true}"#;

// ── Types and definitions ────────────────────────────────────────

#[test]
fn types_lists_builtins_in_order() {
    let ws = Workspace::new();
    assert_eq!(
        ws.ok(&["types"]),
        "boolean\ndate\ndatetime\ndecimal\ninteger\nselect\ntext\nvarchar\n"
    );
}

#[test]
fn created_definitions_persist_between_commands() {
    let ws = Workspace::new();
    let id = ws.define("size.json", SIZE);
    ws.define("tags.json", TAGS);

    let listed = ws.ok(&["definitions", "list", "--entity", "product"]);
    let lines: Vec<&str> = listed.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], format!("size\tinteger\tproduct\t\t{id}"));
    assert!(lines[1].starts_with("tags\ttext\tproduct\tcollection\t"));

    let shown = ws.ok(&["definitions", "show", &id]);
    let json: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(json["slug"], "size");
    assert_eq!(json["type"], "integer");
}

#[test]
fn duplicate_slug_is_reported() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);
    let path = ws.write("again.json", SIZE);
    let err = ws
        .attrium(&["definitions", "create", "--file", &path])
        .unwrap_err();
    assert!(format!("{err:#}").contains("size"), "{err:#}");
}

#[test]
fn invalid_definition_file_names_the_file() {
    let ws = Workspace::new();
    let path = ws.write("broken.json", "{ not json");
    let err = ws
        .attrium(&["definitions", "create", "--file", &path])
        .unwrap_err();
    assert!(err.to_string().contains("broken.json"), "{err:#}");
}

#[test]
fn delete_is_refused_while_values_exist_unless_forced() {
    let ws = Workspace::new();
    let id = ws.define("size.json", SIZE);
    ws.ok(&["values", "set", "product", "A-1", "size", "42"]);

    assert!(ws.attrium(&["definitions", "delete", &id]).is_err());
    assert_eq!(
        ws.ok(&["definitions", "delete", &id, "--force"]),
        format!("deleted {id} and 1 values\n")
    );
    assert_eq!(ws.ok(&["definitions", "list"]), "");
}

#[test]
fn type_change_needs_a_migration_once_values_exist() {
    let ws = Workspace::new();
    let id = ws.define("size.json", SIZE);
    ws.ok(&["values", "set", "product", "A-1", "size", "42"]);

    let as_text = ws.write(
        "size-text.json",
        r#"{"name": {"en": "Size"}, "type": "text", "entities": ["product"]}"#,
    );
    assert!(ws.attrium(&["definitions", "update", &id, "--file", &as_text]).is_err());

    ws.ok(&[
        "definitions", "update", &id, "--file", &as_text, "--migrate", "recoerce",
    ]);
    assert_eq!(ws.ok(&["values", "get", "product", "A-1", "size"]), "42\n");
}

// ── Values and entities ──────────────────────────────────────────

#[test]
fn set_creates_the_entity_and_get_reads_back() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);
    ws.define("tags.json", TAGS);

    assert_eq!(
        ws.ok(&["values", "set", "product", "A-1", "size", "42"]),
        "created product A-1\nset size\n"
    );
    assert_eq!(
        ws.ok(&["values", "set", "product", "A-1", "tags", "leather", "winter"]),
        "set tags\n"
    );

    assert_eq!(ws.ok(&["values", "get", "product", "A-1", "size"]), "42\n");
    assert_eq!(
        ws.ok(&["values", "get", "product", "A-1"]),
        "size\t42\ntags\tleather, winter\n"
    );
}

#[test]
fn set_without_values_clears() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);
    ws.ok(&["values", "set", "product", "A-1", "size", "42"]);
    ws.ok(&["values", "set", "product", "A-1", "size"]);
    assert_eq!(ws.ok(&["values", "get", "product", "A-1", "size"]), "(none)\n");
}

#[test]
fn set_rejects_bad_input() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);

    assert!(ws.attrium(&["values", "set", "product", "A-1", "size", "1", "2"]).is_err());
    assert!(ws.attrium(&["values", "set", "product", "A-1", "size", "big"]).is_err());
    assert!(ws.attrium(&["values", "set", "product", "A-1", "colour", "red"]).is_err());
    assert!(ws.attrium(&["values", "set", "customer", "C-1", "size", "1"]).is_err());
    // Nothing was written, so the entity was never registered.
    assert_eq!(ws.ok(&["entities", "list", "product"]), "");
}

#[test]
fn entity_delete_removes_values() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);
    ws.ok(&["values", "set", "product", "A-1", "size", "42"]);
    assert_eq!(ws.ok(&["entities", "list", "product"]).lines().count(), 1);

    assert_eq!(
        ws.ok(&["entities", "delete", "product", "A-1"]),
        "deleted product A-1\n"
    );
    assert_eq!(ws.ok(&["entities", "list", "product"]), "");
    assert!(ws.attrium(&["entities", "delete", "product", "A-1"]).is_err());
    assert!(ws.attrium(&["values", "get", "product", "A-1"]).is_err());
}

// ── Import ───────────────────────────────────────────────────────

#[test]
fn stash_then_hoard_all() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);
    let csv = ws.write("products.csv", "sku,size\nA-1,42\nA-2,big\n");

    let stashed = ws.ok(&["import", "stash", &csv, "--resource", "product"]);
    let lines: Vec<&str> = stashed.lines().collect();
    assert_eq!(lines[0], "staged 2 of 2 rows as product");
    assert_eq!(lines.len(), 3);
    let failing_id = lines[2];

    assert_eq!(ws.ok(&["import", "list", "--status", "pending"]).lines().count(), 2);

    let hoarded = ws.ok(&["import", "hoard", "--all"]);
    let lines: Vec<&str> = hoarded.lines().collect();
    assert_eq!(lines[0], "committed 1, failed 1, missing 0");
    assert!(lines[1].starts_with(&format!("failed {failing_id}: ")), "{hoarded}");

    assert_eq!(ws.ok(&["values", "get", "product", "A-1", "size"]), "42\n");
    let remaining = ws.ok(&["import", "list"]);
    assert!(remaining.starts_with(&format!("{failing_id}\tproduct\tfail\trow 2\n")), "{remaining}");
    assert!(remaining.contains("\n    "), "notes are listed: {remaining}");
}

#[test]
fn hoard_by_id_and_discard() {
    let ws = Workspace::new();
    ws.define("size.json", SIZE);
    let csv = ws.write("products.csv", "sku,size\nA-1,1\nA-2,2\n");
    let stashed = ws.ok(&["import", "stash", &csv, "-r", "product"]);
    let ids: Vec<&str> = stashed.lines().skip(1).collect();

    assert_eq!(
        ws.ok(&["import", "hoard", ids[0]]),
        "committed 1, failed 0, missing 0\n"
    );
    assert_eq!(ws.ok(&["import", "discard", ids[1]]), format!("discarded {}\n", ids[1]));
    assert_eq!(ws.ok(&["import", "list"]), "");
    assert_eq!(
        ws.ok(&["import", "hoard", ids[1]]),
        format!("committed 0, failed 0, missing 1\nmissing {}\n", ids[1])
    );
    assert!(ws.attrium(&["import", "discard", ids[1]]).is_err());
}

#[test]
fn definitions_can_be_imported() {
    let ws = Workspace::new();
    let csv = ws.write(
        "attributes.csv",
        "slug,name,type,entities,options\ncolour,Colour,select,product,red|green\n",
    );
    ws.ok(&["import", "stash", &csv, "--resource", "attribute"]);
    assert_eq!(
        ws.ok(&["import", "hoard", "--all", "--resource", "attribute"]),
        "committed 1, failed 0, missing 0\n"
    );
    ws.ok(&["values", "set", "product", "A-1", "colour", "red"]);
    assert!(ws.attrium(&["values", "set", "product", "A-1", "colour", "blue"]).is_err());
}

#[test]
fn malformed_csv_stages_nothing() {
    let ws = Workspace::new();
    let csv = ws.write("broken.csv", "sku,size\nA-1,1,extra\n");
    let err = ws
        .attrium(&["import", "stash", &csv, "--resource", "product"])
        .unwrap_err();
    assert!(format!("{err:#}").contains("broken.csv"), "{err:#}");
    assert_eq!(ws.ok(&["import", "list"]), "");
}

// ── Arguments and config ─────────────────────────────────────────

#[test]
fn hoard_needs_ids_or_all() {
    assert!(Cli::try_parse_from(["attrium", "import", "hoard"]).is_err());
    assert!(Cli::try_parse_from(["attrium", "import", "hoard", "--resource", "product"]).is_err());
    assert!(Cli::try_parse_from(["attrium", "import", "hoard", "not-a-uuid"]).is_err());
    assert!(Cli::try_parse_from(["attrium", "import", "hoard", "--all"]).is_ok());
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.toml").display().to_string();
    let cli = Cli::try_parse_from(["attrium", "--config", path.as_str(), "types"]).unwrap();
    let err = run(&cli, &mut Vec::new()).unwrap_err();
    assert!(err.to_string().contains("Failed to load config"), "{err:#}");
}

#[test]
fn without_config_runs_in_memory() {
    let cli = Cli::try_parse_from(["attrium", "-v", "definitions", "list"]).unwrap();
    assert!(cli.verbose);
    let mut out = Vec::new();
    run(&cli, &mut out).unwrap();
    assert!(out.is_empty());
}
