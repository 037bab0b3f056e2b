use super::DatabaseType;

/// Splits a raw patch script into individually executable statements under
/// the rules of the given database type.
///
/// Statements come back trimmed and non-empty, in script order. When the
/// dialect supports multi-statement execution the whole script is returned as
/// a single statement.
pub fn split_statements(script: &str, database_type: &DatabaseType) -> Vec<String> {
    split_with(
        script,
        database_type.supports_multiple_statements(),
        database_type.is_go_terminated(),
        &|buffer| database_type.is_stored_procedure_start(buffer),
    )
}

/// The statement-splitting lexer.
///
/// A single left-to-right character scan with three pieces of state: whether
/// the scanner is inside a quoted string, inside a line comment, and whether
/// the statement accumulated so far opens a stored procedure (re-evaluated
/// against the growing buffer at every terminator candidate).
///
/// * An unescaped `'` toggles the quoted-string state; the doubled `''`
///   escape toggles twice and nets out.
/// * A doubled `-` or `/` outside quotes and outside a procedure body starts
///   a line comment: the first marker character is removed from the buffer
///   and the rest of the line is discarded. Inside a procedure body the same
///   characters are kept, so embedded comments survive.
/// * `;` outside quotes ends a statement unless the buffer opens a stored
///   procedure, in which case the `;` is preserved and the procedure travels
///   as one statement.
/// * When `go_terminated` is set, a line holding only `GO` (any case) is an
///   additional terminator; the line boundaries are found by looking back
///   and ahead from the `G`.
/// * A non-blank trailing partial statement is emitted without a terminator.
pub fn split_with(
    script: &str,
    multi_statement_supported: bool,
    go_terminated: bool,
    is_procedure_start: &dyn Fn(&str) -> bool,
) -> Vec<String> {
    if multi_statement_supported {
        let whole = script.trim();
        return if whole.is_empty() {
            Vec::new()
        } else {
            vec![whole.to_string()]
        };
    }

    let chars: Vec<char> = script.chars().collect();
    let mut statements: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut in_quoted_string = false;
    let mut in_line_comment = false;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
                buffer.push('\n');
            }
            i += 1;
            continue;
        }

        if c == '\'' {
            let escaped = i > 0 && chars[i - 1] == '\\';
            if !escaped {
                in_quoted_string = !in_quoted_string;
            }
            buffer.push(c);
            i += 1;
            continue;
        }

        if !in_quoted_string {
            if (c == '-' || c == '/') && buffer.ends_with(c) && !is_procedure_start(&buffer) {
                buffer.pop();
                in_line_comment = true;
                i += 1;
                continue;
            }

            if c == ';' {
                if is_procedure_start(&buffer) {
                    buffer.push(c);
                } else {
                    flush(&mut buffer, &mut statements);
                }
                i += 1;
                continue;
            }

            if go_terminated && (c == 'g' || c == 'G') && !is_procedure_start(&buffer) {
                if let Some(line_end) = standalone_go_line(&chars, i) {
                    flush(&mut buffer, &mut statements);
                    i = line_end;
                    continue;
                }
            }
        }

        buffer.push(c);
        i += 1;
    }

    flush(&mut buffer, &mut statements);
    statements
}

fn flush(buffer: &mut String, statements: &mut Vec<String>) {
    let statement = buffer.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    buffer.clear();
}

/// Checks whether the `G` at `start` sits on a line containing only `GO`.
/// Returns the index just past the line's terminator when it does.
fn standalone_go_line(chars: &[char], start: usize) -> Option<usize> {
    // look back: only whitespace between the G and the previous line boundary
    let mut j = start;
    while j > 0 {
        let prev = chars[j - 1];
        if prev == '\n' {
            break;
        }
        if !prev.is_whitespace() {
            return None;
        }
        j -= 1;
    }

    // look ahead: an O, then only whitespace up to the next line boundary
    let o = chars.get(start + 1)?;
    if *o != 'o' && *o != 'O' {
        return None;
    }
    let mut k = start + 2;
    while k < chars.len() {
        let next = chars[k];
        if next == '\n' {
            return Some(k + 1);
        }
        if !next.is_whitespace() {
            return None;
        }
        k += 1;
    }
    Some(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_procedures(_: &str) -> bool {
        false
    }

    fn begin_procedures(buffer: &str) -> bool {
        buffer.trim_start().to_lowercase().starts_with("begin")
    }

    fn split_plain(script: &str) -> Vec<String> {
        split_with(script, false, false, &no_procedures)
    }

    // ==================== Basic Splitting ====================

    #[test]
    fn test_two_inserts_yield_two_statements() {
        let statements = split_plain("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO t VALUES (1)");
        assert_eq!(statements[1], "INSERT INTO t VALUES (2)");
    }

    #[test]
    fn test_multi_statement_supported_returns_whole_script() {
        let script = "INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);";
        let statements = split_with(script, true, false, &no_procedures);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0], script);
    }

    #[test]
    fn test_blank_script_yields_nothing() {
        assert!(split_plain("   \n\t  ").is_empty());
        assert!(split_with("  \n ", true, false, &no_procedures).is_empty());
    }

    #[test]
    fn test_trailing_partial_statement_is_emitted() {
        let statements = split_plain("UPDATE t SET x = 1;\nUPDATE t SET y = 2");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], "UPDATE t SET y = 2");
    }

    #[test]
    fn test_empty_statements_are_dropped() {
        let statements = split_plain("select 1;;;select 2;");
        assert_eq!(statements, vec!["select 1", "select 2"]);
    }

    // ==================== Quoted Strings ====================

    #[test]
    fn test_quoted_semicolon_does_not_split() {
        let statements = split_plain("insert into t values ('a;b');");
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("'a;b'"));
    }

    #[test]
    fn test_escaped_quote_does_not_toggle() {
        let statements = split_plain("insert into t values ('it\\'s;fine');");
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains(";fine"));
    }

    #[test]
    fn test_doubled_quote_escape_nets_out() {
        let statements = split_plain("insert into t values ('a''b'); select 1;");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("'a''b'"));
    }

    #[test]
    fn test_comment_markers_inside_quotes_are_kept() {
        let statements = split_plain("insert into t values ('a--b');");
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("a--b"));
    }

    // ==================== Line Comments ====================

    #[test]
    fn test_line_comments_are_discarded() {
        let statements = split_plain("select 1; -- comment\nselect 2;");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "select 1");
        assert_eq!(statements[1], "select 2");
        assert!(statements.iter().all(|s| !s.contains("-- comment")));
    }

    #[test]
    fn test_slash_slash_comments_are_discarded() {
        let statements = split_plain("select 1; // note\nselect 2;");
        assert_eq!(statements, vec!["select 1", "select 2"]);
    }

    #[test]
    fn test_comment_swallows_semicolon() {
        let statements = split_plain("select 1 -- trailing; not a split\n;");
        assert_eq!(statements, vec!["select 1"]);
    }

    #[test]
    fn test_single_dash_is_not_a_comment() {
        let statements = split_plain("select 1 - 2;");
        assert_eq!(statements, vec!["select 1 - 2"]);
    }

    // ==================== Stored Procedures ====================

    #[test]
    fn test_procedure_body_is_one_statement() {
        let script = "begin\n  update t set x = 1;\n  delete from u;\nend;";
        let statements = split_with(script, false, false, &begin_procedures);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].matches(';').count(), 3);
    }

    #[test]
    fn test_procedure_detection_ignores_leading_whitespace() {
        let script = "  \n  BEGIN\n  update t set x = 1;\nend;";
        let statements = split_with(script, false, false, &begin_procedures);
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_comments_inside_procedure_body_survive() {
        let script = "begin\n  -- keep me\n  update t set x = 1;\nend;";
        let statements = split_with(script, false, false, &begin_procedures);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("-- keep me"));
    }

    #[test]
    fn test_non_procedure_still_splits_with_predicate_installed() {
        let statements = split_with("select 1;\nselect 2;", false, false, &begin_procedures);
        assert_eq!(statements.len(), 2);
    }

    // ==================== GO Terminators ====================

    #[test]
    fn test_standalone_go_terminates() {
        let statements = split_with("SELECT 1\nGO\nSELECT 2\ngo\n", false, true, &no_procedures);
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_go_with_surrounding_spaces_terminates() {
        let statements = split_with("SELECT 1\n  GO  \nSELECT 2", false, true, &no_procedures);
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_consecutive_gos_drop_empty_statements() {
        let statements = split_with("SELECT 1\nGO\nGO\nGO\nSELECT 2", false, true, &no_procedures);
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_inline_go_is_not_a_terminator() {
        let statements = split_with("SELECT going FROM t\nGO", false, true, &no_procedures);
        assert_eq!(statements, vec!["SELECT going FROM t"]);
    }

    #[test]
    fn test_go_at_end_of_script_without_newline() {
        let statements = split_with("SELECT 1\nGO", false, true, &no_procedures);
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn test_semicolon_still_splits_when_go_terminated() {
        let statements = split_with("SELECT 1;\nSELECT 2\nGO", false, true, &no_procedures);
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }

    // ==================== Dialect Integration ====================

    #[test]
    fn test_split_statements_with_oracle_procedure() {
        let oracle = DatabaseType::new("oracle").unwrap();
        let script = "BEGIN\n  INSERT INTO t VALUES (1);\n  INSERT INTO t VALUES (2);\nEND;";
        let statements = split_statements(script, &oracle);
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_split_statements_with_sqlserver_passes_through() {
        let sqlserver = DatabaseType::new("sqlserver").unwrap();
        let script = "SELECT 1;\nSELECT 2;";
        let statements = split_statements(script, &sqlserver);
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_split_statements_with_postgres() {
        let postgres = DatabaseType::new("postgres").unwrap();
        let statements = split_statements("SELECT 1;\nSELECT 2;", &postgres);
        assert_eq!(statements.len(), 2);
    }
}
