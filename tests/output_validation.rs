//! Output Validation Tests
//!
//! Validates the JSON the CLI prints: envelope shape, item encoding and
//! error codes. Uses `insta` inline snapshots to catch unintended changes.

#![cfg(feature = "sqlite")]

use dbdrive::config::DriveConfig;
use dbdrive::{
    open_drive, ChildItem, DbDriveError, DriveSettings, ErrorEnvelope, ErrorInfo, Item, Metadata,
    ObjectType, Provider, Record, SuccessEnvelope, Value,
};

// ============================================================================
// Envelope Snapshots
// ============================================================================

#[test]
fn test_success_envelope_snapshot() {
    let data = vec![ChildItem {
        path: "lite:\\main\\TABLE".to_string(),
        container: true,
        item: Item::ObjectType(ObjectType::Table),
    }];
    let envelope = SuccessEnvelope::new("sqlite", "children", data, Metadata::with_items(5, 1));

    let json = serde_json::to_string(&envelope).expect("Should serialize");
    insta::assert_snapshot!(json, @r#"{"ok":true,"provider":"sqlite","command":"children","data":[{"path":"lite:\\main\\TABLE","container":true,"kind":"object_type","item":"TABLE"}],"meta":{"execution_ms":5,"item_count":1}}"#);
}

#[test]
fn test_error_envelope_snapshot() {
    let err = DbDriveError::name_rejected("table", "ORDERS;DROP");
    let envelope = ErrorEnvelope::from_error("oracle", "get-item", &err);

    let json = serde_json::to_string(&envelope).expect("Should serialize");
    insta::assert_snapshot!(json, @r#"{"ok":false,"provider":"oracle","command":"get-item","error":{"code":"NAME_REJECTED","message":"Rejected table name 'ORDERS;DROP': only [A-Za-z0-9_] is allowed"}}"#);
}

#[test]
fn test_row_item_snapshot() {
    let row = ChildItem {
        path: "db:\\SALES\\TABLE\\ORDERS".to_string(),
        container: false,
        item: Item::Row(Record::from_pairs([("ID", Value::Int(7)), ("NOTE", Value::Null)])),
    };

    let json = serde_json::to_string(&row).expect("Should serialize");
    insta::assert_snapshot!(json, @r#"{"path":"db:\\SALES\\TABLE\\ORDERS","container":false,"kind":"row","item":{"ID":7,"NOTE":null}}"#);
}

#[test]
fn test_branch_errors_reported_in_meta() {
    let meta = Metadata::with_items(12, 4).with_errors(vec![ErrorInfo::new(
        "BACKEND_ERROR",
        "Backend error (oracle): ORA-01031: insufficient privileges",
    )]);
    let envelope = SuccessEnvelope::new("oracle", "children", serde_json::json!([]), meta);

    let json: serde_json::Value = serde_json::to_value(&envelope).expect("Should serialize");
    assert_eq!(json["meta"]["errors"][0]["code"], "BACKEND_ERROR");
    assert_eq!(json["meta"]["item_count"], 4);
}

// ============================================================================
// Structure Checks
// ============================================================================

#[test]
fn test_all_error_codes_are_upper_snake_case() {
    let errors = [
        DbDriveError::invalid_path("x", "y"),
        DbDriveError::PathTooDeep { path: "x".to_string(), segments: 5 },
        DbDriveError::name_rejected("schema", "a b"),
        DbDriveError::not_found("table", "T"),
        DbDriveError::backend("sqlite", "disk I/O error"),
        DbDriveError::connection_failed("refused"),
        DbDriveError::unsupported_provider("mssql"),
        DbDriveError::unsupported_parameter_type("p", "array"),
        DbDriveError::invalid_input("bad"),
        DbDriveError::capability_violation("write"),
        DbDriveError::config_error("missing"),
    ];

    for err in &errors {
        let code = err.error_code();
        assert!(
            code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
            "code {code} is not upper snake case"
        );
        let envelope = serde_json::to_value(ErrorEnvelope::from_error("", "test", err)).unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], code);
    }
}

#[test]
fn test_real_table_item_is_valid_json() {
    let path = std::env::temp_dir().join(format!("dbdrive_output_{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE prices (sku TEXT NOT NULL, amount DECIMAL(10,2));")
        .unwrap();

    let nav = open_drive(&DriveConfig {
        name: "lite".to_string(),
        provider: Provider::Sqlite,
        connection_string: path.to_string_lossy().into_owned(),
        settings: DriveSettings::default(),
    })
    .unwrap();

    let item = nav.get_item("lite:\\main\\TABLE\\prices").unwrap();
    let envelope = SuccessEnvelope::new("sqlite", "get-item", item, Metadata::new(1));
    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).expect("Should be valid JSON");

    let table = &json["data"];
    assert_eq!(table["kind"], "table");
    assert_eq!(table["item"]["table_name"], "prices");
    assert_eq!(table["item"]["provider"], "sqlite");
    assert!(table["item"].get("row_count").is_none());

    let columns = table["item"]["columns"].as_array().unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0]["column_name"], "sku");
    assert_eq!(columns[0]["nullable"], false);
    assert_eq!(columns[1]["precision"], 10);
    assert_eq!(columns[1]["scale"], 2);

    let _ = std::fs::remove_file(&path);
}
