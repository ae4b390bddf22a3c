use attrium_import::{parse_csv, ImportError, SourceRow};
use pretty_assertions::assert_eq;

fn parse(input: &str) -> Result<attrium_import::ParsedTable, ImportError> {
    parse_csv(input.as_bytes(), b',')
}

fn parse_err(input: &str) -> String {
    match parse(input) {
        Err(ImportError::Parse(reason)) => reason,
        other => panic!("expected parse error, got {other:?}"),
    }
}

// ── Well-formed input ────────────────────────────────────────────

#[test]
fn headers_are_trimmed_and_rows_keep_order() {
    let table = parse(" sku , size,colour\nA-1,42,red\nA-2,43,\n").unwrap();

    assert_eq!(table.headers, vec!["sku", "size", "colour"]);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].row_number, 1);
    assert_eq!(table.rows[1].row_number, 2);

    let columns: Vec<&str> = table.rows[0].fields.columns().collect();
    assert_eq!(columns, vec!["sku", "size", "colour"]);
    assert_eq!(table.rows[1].fields.get("colour"), Some(""));
}

#[test]
fn quoted_cells_may_contain_delimiters() {
    let table = parse("sku,name\nA-1,\"Boot, leather\"\n").unwrap();
    assert_eq!(table.rows[0].fields.get("name"), Some("Boot, leather"));
}

#[test]
fn header_only_file_has_no_rows() {
    let table = parse("sku,size\n").unwrap();
    assert!(table.rows.is_empty());
}

#[test]
fn custom_delimiter() {
    let table = parse_csv("sku;size\nA;1\n".as_bytes(), b';').unwrap();
    assert_eq!(table.rows[0].fields.get("size"), Some("1"));
}

#[test]
fn byte_order_mark_is_stripped() {
    let table = parse("\u{feff}sku,size\nA,1\n").unwrap();
    assert_eq!(table.headers[0], "sku");
}

// ── Malformed input ──────────────────────────────────────────────

#[test]
fn empty_source_has_no_header() {
    assert!(parse_err("").contains("missing header"));
}

#[test]
fn empty_header_is_rejected() {
    assert!(parse_err("sku,,size\n1,2,3\n").contains("column 2"));
}

#[test]
fn duplicate_header_is_rejected() {
    assert!(parse_err("sku,size, size\n1,2,3\n").contains("duplicate header \"size\""));
}

#[test]
fn unequal_row_length_is_rejected() {
    let reason = parse_err("sku,size\nA,1\nB,2,3\n");
    assert!(reason.contains("3 fields, header has 2"), "{reason}");
}

// ── SourceRow ────────────────────────────────────────────────────

#[test]
fn source_row_retains_selected_columns_in_order() {
    let row: SourceRow = [("sku", "A"), ("junk", "x"), ("size", "1")].into_iter().collect();
    let keep = ["size".to_string(), "sku".to_string()].into_iter().collect();
    let filtered = row.retain_columns(&keep);
    assert_eq!(filtered.columns().collect::<Vec<_>>(), vec!["sku", "size"]);
}

#[test]
fn source_row_serializes_as_ordered_pairs() {
    let row: SourceRow = [("b", "2"), ("a", "1")].into_iter().collect();
    let json = serde_json::to_string(&row).unwrap();
    assert_eq!(json, r#"[["b","2"],["a","1"]]"#);
    let back: SourceRow = serde_json::from_str(&json).unwrap();
    assert_eq!(back, row);
}
