//! Path grammar, classification and pure path algorithms
//!
//! A drive path has the shape
//! `<drive>:\<schema>\<objectType>\<objectName>[\<rowKey>]` where every
//! identifier segment passes [`crate::naming::is_valid_name`] and the object
//! type is `TABLE` or `VIEW` (case-insensitive).
//!
//! # Classification
//! | segments | [`PathType`] |
//! |---|---|
//! | 0 | `Database` |
//! | 1 | `Schema` |
//! | 2 | `ObjectType` |
//! | 3 | `Object` |
//! | 4 | `Row` |
//!
//! Classification never touches the database; existence is checked by the
//! navigation layer afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DbDriveError, Result};
use crate::naming::is_valid_name;

/// Canonical path separator
pub const PATH_SEPARATOR: char = '\\';

/// Alternate separator accepted by [`normalize_path`]
pub const ALT_SEPARATOR: char = '/';

/// Deepest supported path: schema, object type, object, row key
pub const MAX_SEGMENTS: usize = 4;

const DRIVE_MARKER: char = ':';

/// Category of relation exposed in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    Table,
    View,
}

impl ObjectType {
    /// Every known object type, in display order
    pub const ALL: [Self; 2] = [Self::Table, Self::View];

    /// Path segment literal
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = DbDriveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DbDriveError::invalid_path(s, format!("unknown object type '{s}'")))
    }
}

/// Kind of node a path designates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    Database,
    Schema,
    ObjectType,
    Object,
    Row,
    Invalid,
}

/// Shape of a classified path
///
/// Purely a function of the input string. Built fresh per lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDescriptor {
    pub path_type: PathType,
    pub schema_name: Option<String>,
    pub object_type: Option<ObjectType>,
    /// Object name followed by the row key, when present
    pub object_path: Vec<String>,
}

impl PathDescriptor {
    const fn empty(path_type: PathType) -> Self {
        Self { path_type, schema_name: None, object_type: None, object_path: Vec::new() }
    }

    /// Descriptor of the drive root
    #[must_use]
    pub const fn database() -> Self {
        Self::empty(PathType::Database)
    }

    /// Descriptor of an unclassifiable path
    #[must_use]
    pub const fn invalid() -> Self {
        Self::empty(PathType::Invalid)
    }

    /// Parse a path, reporting exactly why it does not fit the grammar
    ///
    /// An empty string is the drive root. Separators must already be
    /// canonical; see [`normalize_path`].
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_segments(path)?;
        if segments.is_empty() {
            return Ok(Self::database());
        }

        for (position, segment) in segments.iter().enumerate() {
            if !is_valid_name(segment) {
                return Err(DbDriveError::name_rejected(segment_kind(position), *segment));
            }
        }

        if segments.len() > MAX_SEGMENTS {
            return Err(DbDriveError::PathTooDeep { path: path.to_string(), segments: segments.len() });
        }

        let schema_name = Some(segments[0].to_string());
        if segments.len() == 1 {
            return Ok(Self { schema_name, ..Self::empty(PathType::Schema) });
        }

        let object_type = segments[1].parse::<ObjectType>().map_err(|_| {
            DbDriveError::invalid_path(path, format!("unknown object type '{}'", segments[1]))
        })?;

        let path_type = match segments.len() {
            2 => PathType::ObjectType,
            3 => PathType::Object,
            _ => PathType::Row,
        };

        Ok(Self {
            path_type,
            schema_name,
            object_type: Some(object_type),
            object_path: segments[2..].iter().map(|s| (*s).to_string()).collect(),
        })
    }

    /// Schema segment, if any
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    /// Object name (`objectPath[0]`), if any
    #[must_use]
    pub fn object_name(&self) -> Option<&str> {
        self.object_path.first().map(String::as_str)
    }

    /// Row key (`objectPath[1]`), if any
    #[must_use]
    pub fn row_key(&self) -> Option<&str> {
        self.object_path.get(1).map(String::as_str)
    }
}

/// Classify a path; `None` and `""` are the drive root
///
/// Every grammar or name failure folds into [`PathType::Invalid`]. Use
/// [`PathDescriptor::parse`] when the reason matters.
#[must_use]
pub fn classify(path: Option<&str>) -> PathDescriptor {
    match path {
        None => PathDescriptor::database(),
        Some(p) => PathDescriptor::parse(p).unwrap_or_else(|_| PathDescriptor::invalid()),
    }
}

/// Grammar check only, no I/O
#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    PathDescriptor::parse(path).is_ok()
}

pub(crate) const fn segment_kind(position: usize) -> &'static str {
    match position {
        0 => "schema",
        1 => "object type",
        2 => "object",
        _ => "row key",
    }
}

fn split_segments(path: &str) -> Result<Vec<&str>> {
    let rest = strip_drive_prefix(path)?;

    if rest.contains(ALT_SEPARATOR) {
        return Err(DbDriveError::invalid_path(
            path,
            format!("unexpected separator '{ALT_SEPARATOR}', expected '{PATH_SEPARATOR}'"),
        ));
    }

    let rest = rest.strip_prefix(PATH_SEPARATOR).unwrap_or(rest);
    let rest = rest.strip_suffix(PATH_SEPARATOR).unwrap_or(rest);
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let segments: Vec<&str> = rest.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DbDriveError::invalid_path(path, "empty path segment"));
    }
    Ok(segments)
}

fn strip_drive_prefix(path: &str) -> Result<&str> {
    let Some((drive, rest)) = path.split_once(DRIVE_MARKER) else {
        return Ok(path);
    };

    if !is_valid_name(drive) {
        return Err(DbDriveError::invalid_path(path, "malformed drive prefix"));
    }
    if rest.contains(DRIVE_MARKER) {
        return Err(DbDriveError::invalid_path(path, "more than one drive marker"));
    }
    if !rest.is_empty() && !rest.starts_with(PATH_SEPARATOR) {
        return Err(DbDriveError::invalid_path(
            path,
            format!("drive prefix must be followed by '{PATH_SEPARATOR}'"),
        ));
    }
    Ok(rest)
}

/// Drive name of a `name:\...` path, if present
#[must_use]
pub fn drive_name(path: &str) -> Option<&str> {
    path.split_once(DRIVE_MARKER).map(|(drive, _)| drive).filter(|d| is_valid_name(d))
}

/// Canonical form: alternate separators replaced, runs collapsed to one
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        let ch = if ch == ALT_SEPARATOR { PATH_SEPARATOR } else { ch };
        if ch == PATH_SEPARATOR && out.ends_with(PATH_SEPARATOR) {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Join two paths with exactly one separator
///
/// An empty side yields the other side unchanged.
#[must_use]
pub fn make_path(parent: &str, child: &str) -> String {
    let parent = normalize_path(parent);
    let child = normalize_path(child);

    if child.is_empty() {
        return parent;
    }
    if parent.is_empty() {
        return child;
    }

    format!(
        "{}{PATH_SEPARATOR}{}",
        parent.trim_end_matches(PATH_SEPARATOR),
        child.trim_start_matches(PATH_SEPARATOR)
    )
}

/// Parent of `path`, never descending below `root`
///
/// The root itself has the empty string as parent. With an empty `root`, the
/// parent of a single relative segment is empty.
#[must_use]
pub fn get_parent_path(path: &str, root: &str) -> String {
    let path = normalize_path(path);
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    let root = normalize_path(root);
    let root_trimmed = root.trim_end_matches(PATH_SEPARATOR);

    if trimmed.is_empty() {
        return String::new();
    }
    if !root_trimmed.is_empty() {
        if trimmed.eq_ignore_ascii_case(root_trimmed) {
            return String::new();
        }
        if !starts_with_segment(trimmed, root_trimmed) {
            return root;
        }
    }

    let parent = match trimmed.rfind(PATH_SEPARATOR) {
        Some(idx) => &trimmed[..idx],
        None if trimmed.ends_with(DRIVE_MARKER) => return String::new(),
        None => return root,
    };

    if !root_trimmed.is_empty() && parent.len() <= root_trimmed.len() {
        return root;
    }
    if parent.ends_with(DRIVE_MARKER) {
        return format!("{parent}{PATH_SEPARATOR}");
    }
    parent.to_string()
}

/// Express `path` relative to `base`
///
/// Paths outside `base` come back normalized but otherwise unchanged.
#[must_use]
pub fn normalize_relative_path(path: &str, base: &str) -> String {
    let path = normalize_path(path);
    let base = normalize_path(base);
    let base = base.trim_end_matches(PATH_SEPARATOR);

    if base.is_empty() {
        return path.trim_start_matches(PATH_SEPARATOR).to_string();
    }
    if path.trim_end_matches(PATH_SEPARATOR).eq_ignore_ascii_case(base) {
        return String::new();
    }
    if starts_with_segment(&path, base) {
        return path[base.len()..].trim_start_matches(PATH_SEPARATOR).to_string();
    }
    path
}

/// Leaf segment of a path; empty for a drive root
#[must_use]
pub fn child_name(path: &str) -> String {
    let path = normalize_path(path);
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    let leaf = trimmed.rsplit(PATH_SEPARATOR).next().unwrap_or_default();
    if leaf.ends_with(DRIVE_MARKER) {
        String::new()
    } else {
        leaf.to_string()
    }
}

fn starts_with_segment(path: &str, prefix: &str) -> bool {
    path.len() > prefix.len()
        && path.is_char_boundary(prefix.len())
        && path[..prefix.len()].eq_ignore_ascii_case(prefix)
        && (path[prefix.len()..].starts_with(PATH_SEPARATOR) || prefix.ends_with(DRIVE_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_and_none_are_database() {
        assert_eq!(classify(None).path_type, PathType::Database);
        assert_eq!(classify(Some("")).path_type, PathType::Database);
        assert_eq!(classify(Some("db:")).path_type, PathType::Database);
        assert_eq!(classify(Some("db:\\")).path_type, PathType::Database);
        assert_eq!(classify(Some("\\")).path_type, PathType::Database);
    }

    #[test]
    fn test_segment_count_table() {
        let cases = [
            ("SALES", PathType::Schema, 0),
            ("SALES\\TABLE", PathType::ObjectType, 0),
            ("SALES\\TABLE\\ORDERS", PathType::Object, 1),
            ("SALES\\VIEW\\V_ORDERS\\42", PathType::Row, 2),
        ];
        for (path, expected, object_len) in cases {
            let d = classify(Some(path));
            assert_eq!(d.path_type, expected, "{path}");
            assert_eq!(d.object_path.len(), object_len, "{path}");
            assert_eq!(d.schema(), Some("SALES"));
        }
    }

    #[test]
    fn test_example_object_path() {
        let d = PathDescriptor::parse("db:\\SALES\\TABLE\\ORDERS").unwrap();
        assert_eq!(
            d,
            PathDescriptor {
                path_type: PathType::Object,
                schema_name: Some("SALES".into()),
                object_type: Some(ObjectType::Table),
                object_path: vec!["ORDERS".into()],
            }
        );
        assert_eq!(d.object_name(), Some("ORDERS"));
        assert_eq!(d.row_key(), None);
    }

    #[test]
    fn test_object_type_is_case_insensitive() {
        let d = classify(Some("hr\\view"));
        assert_eq!(d.object_type, Some(ObjectType::View));
        let d = classify(Some("hr\\Table\\emp"));
        assert_eq!(d.object_type, Some(ObjectType::Table));
    }

    #[test]
    fn test_unknown_object_type_is_invalid() {
        assert_eq!(classify(Some("hr\\PROCEDURE")).path_type, PathType::Invalid);
        let err = PathDescriptor::parse("hr\\INDEX\\x").unwrap_err();
        assert!(matches!(err, DbDriveError::InvalidPath { .. }));
    }

    #[test]
    fn test_injection_attempt_is_name_rejected() {
        let err = PathDescriptor::parse("db:\\SALES;DROP\\TABLE\\X").unwrap_err();
        match err {
            DbDriveError::NameRejected { kind, name } => {
                assert_eq!(kind, "schema");
                assert_eq!(name, "SALES;DROP");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(classify(Some("db:\\SALES;DROP\\TABLE\\X")).path_type, PathType::Invalid);
    }

    #[test]
    fn test_too_deep_is_distinct() {
        let err = PathDescriptor::parse("S\\TABLE\\T\\1\\extra").unwrap_err();
        assert!(matches!(err, DbDriveError::PathTooDeep { segments: 5, .. }));
    }

    #[test]
    fn test_grammar_failures() {
        for bad in ["a/b", "a\\\\b", "db:SALES", "a:b:c", "bad drive:\\S"] {
            assert!(PathDescriptor::parse(bad).is_err(), "expected '{bad}' to fail");
        }
    }

    #[test]
    fn test_trailing_separator_is_tolerated() {
        let d = PathDescriptor::parse("S\\TABLE\\T\\").unwrap();
        assert_eq!(d.path_type, PathType::Object);
    }

    #[test]
    fn test_classify_is_separator_invariant_after_normalize() {
        let slashed = classify(Some(&normalize_path("a/b")));
        let canonical = classify(Some("a\\b"));
        assert_eq!(slashed.path_type, PathType::Invalid, "b is not an object type");
        assert_eq!(slashed, canonical);

        let slashed = classify(Some(&normalize_path("db://hr/table//emp")));
        assert_eq!(slashed, classify(Some("db:\\hr\\table\\emp")));
        assert_eq!(slashed.path_type, PathType::Object);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a//b/c"), "a\\b\\c");
        assert_eq!(normalize_path("db:\\\\S"), "db:\\S");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_make_path() {
        assert_eq!(make_path("db:\\", "SALES"), "db:\\SALES");
        assert_eq!(make_path("db:\\SALES\\", "\\TABLE"), "db:\\SALES\\TABLE");
        assert_eq!(make_path("", "SALES"), "SALES");
        assert_eq!(make_path("db:\\SALES", ""), "db:\\SALES");
        assert_eq!(make_path("a/b", "c"), "a\\b\\c");
    }

    #[test]
    fn test_make_path_is_associative() {
        for (a, b, c) in [("db:\\", "S", "TABLE"), ("x", "y", "z"), ("S", "VIEW", "V1")] {
            assert_eq!(make_path(&make_path(a, b), c), make_path(a, &make_path(b, c)));
        }
    }

    #[test]
    fn test_get_parent_path_with_root() {
        let root = "db:\\";
        assert_eq!(get_parent_path("db:\\S\\TABLE\\T", root), "db:\\S\\TABLE");
        assert_eq!(get_parent_path("db:\\S\\TABLE", root), "db:\\S");
        assert_eq!(get_parent_path("db:\\S", root), "db:\\");
        assert_eq!(get_parent_path("db:\\", root), "");
        assert_eq!(get_parent_path("db:", root), "");
        assert_eq!(get_parent_path("db:\\S\\", root), "db:\\");
    }

    #[test]
    fn test_get_parent_path_without_root() {
        assert_eq!(get_parent_path("S\\TABLE\\T", ""), "S\\TABLE");
        assert_eq!(get_parent_path("S", ""), "");
        assert_eq!(get_parent_path("db:\\S", ""), "db:\\");
        assert_eq!(get_parent_path("db:\\", ""), "");
        assert_eq!(get_parent_path("", ""), "");
    }

    #[test]
    fn test_get_parent_path_outside_root() {
        assert_eq!(get_parent_path("other:\\S", "db:\\"), "db:\\");
    }

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(normalize_relative_path("db:\\S\\TABLE", "db:\\"), "S\\TABLE");
        assert_eq!(normalize_relative_path("db:\\S\\TABLE", "db:\\S"), "TABLE");
        assert_eq!(normalize_relative_path("db:\\S", "db:\\S\\"), "");
        assert_eq!(normalize_relative_path("db:\\SALES2", "db:\\SALES"), "db:\\SALES2");
        assert_eq!(normalize_relative_path("\\S/TABLE", ""), "S\\TABLE");
    }

    #[test]
    fn test_child_name() {
        assert_eq!(child_name("db:\\S\\TABLE\\ORDERS"), "ORDERS");
        assert_eq!(child_name("db:\\S\\"), "S");
        assert_eq!(child_name("db:\\"), "");
        assert_eq!(child_name("S"), "S");
    }

    #[test]
    fn test_drive_name() {
        assert_eq!(drive_name("db:\\S"), Some("db"));
        assert_eq!(drive_name("S\\TABLE"), None);
        assert_eq!(drive_name("bad name:\\S"), None);
    }

    #[test]
    fn test_is_valid_path() {
        assert!(is_valid_path(""));
        assert!(is_valid_path("db:\\S\\VIEW\\V"));
        assert!(!is_valid_path("db:\\S\\VIEW\\V\\1\\2"));
        assert!(!is_valid_path("S\\x y"));
    }
}
