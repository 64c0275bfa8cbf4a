use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse a JSON-array TEXT column into a list of strings.
pub fn parse_string_list(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON list: {e}"),
    })
}

/// Escape LIKE special characters for safe pattern matching.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::ObservationKind;

    #[test]
    fn escape_like_special_chars() {
        assert_eq!(escape_like("hello"), "hello");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("foo_bar"), "foo\\_bar");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn parse_enum_success() {
        let kind: ObservationKind = parse_enum("bugfix", "observations", "kind").unwrap();
        assert_eq!(kind, ObservationKind::Bugfix);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<ObservationKind, _> = parse_enum("INVALID", "observations", "kind");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "observations", column: "kind", .. })
        ));
    }

    #[test]
    fn parse_string_list_success() {
        let list = parse_string_list(r#"["a", "b"]"#, "observations", "facts").unwrap();
        assert_eq!(list, vec!["a", "b"]);
    }

    #[test]
    fn parse_string_list_failure() {
        let result = parse_string_list("not json", "observations", "facts");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "observations", column: "facts", .. })
        ));
    }
}
