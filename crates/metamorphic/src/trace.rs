//! Trace file format
//!
//! A trace is plain text, one operation per line:
//!
//! ```text
//! # seed: 42
//! txn_open 1 t1 # t1
//! mvcc_put engine a/0 hello t1 # ok
//! # restarting: mem-strict -> mem-buffered
//! restart # ok
//! ```
//!
//! Everything after the first `#` is the recorded output. Lines starting
//! with `#` are comments and are skipped on replay, as are blank lines.

use std::io::BufRead;

use crate::error::{MetaError, MetaResult};

/// One operation line of a trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    /// 1-based line number
    pub line: usize,
    /// Operation name
    pub name: String,
    /// Operand tokens
    pub args: Vec<String>,
    /// Recorded output, trimmed
    pub output: String,
}

/// Render an operation line
pub fn format_line(command: &str, output: &str) -> String {
    format!("{} # {}", command, output)
}

/// Render a comment line
pub fn format_comment(text: &str) -> String {
    format!("# {}", text)
}

/// Parse one line; `None` for comments and blank lines
pub fn parse_line(line: usize, text: &str) -> MetaResult<Option<TraceLine>> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }
    let (command, output) = text.split_once('#').ok_or_else(|| MetaError::Parse {
        line,
        message: "missing '#' before output".to_string(),
    })?;
    let mut tokens = command.split_whitespace().map(str::to_string);
    let name = tokens.next().ok_or_else(|| MetaError::Parse {
        line,
        message: "missing operation name".to_string(),
    })?;
    Ok(Some(TraceLine {
        line,
        name,
        args: tokens.collect(),
        output: output.trim().to_string(),
    }))
}

/// Parse every operation line of a trace
pub fn parse_trace<R: BufRead>(input: R) -> MetaResult<Vec<TraceLine>> {
    let mut lines = Vec::new();
    for (i, text) in input.lines().enumerate() {
        if let Some(line) = parse_line(i + 1, &text?)? {
            lines.push(line);
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation_line() {
        let line = parse_line(3, "mvcc_put engine a/0 hello t1 # ok").unwrap().unwrap();
        assert_eq!(line.line, 3);
        assert_eq!(line.name, "mvcc_put");
        assert_eq!(line.args, vec!["engine", "a/0", "hello", "t1"]);
        assert_eq!(line.output, "ok");
    }

    #[test]
    fn test_output_keeps_everything_after_first_hash() {
        let line = parse_line(1, "mvcc_get engine a/1 t1 # val = x, intent = false")
            .unwrap()
            .unwrap();
        assert_eq!(line.output, "val = x, intent = false");
        let line = parse_line(1, "restart # ok").unwrap().unwrap();
        assert!(line.args.is_empty());
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        assert_eq!(parse_line(1, "# restarting: a -> b").unwrap(), None);
        assert_eq!(parse_line(1, "   ").unwrap(), None);
    }

    #[test]
    fn test_malformed_lines_report_line_number() {
        let err = parse_line(7, "mvcc_put engine a/0").unwrap_err();
        assert_eq!(err.to_string(), "line 7: missing '#' before output");
        // A leading hash makes the whole line a comment
        assert_eq!(parse_line(8, " # ok").unwrap(), None);
    }

    #[test]
    fn test_parse_trace() {
        let text = "# seed: 1\ntxn_open 1 t1 # t1\n\nrestart # ok\n";
        let lines = parse_trace(text.as_bytes()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, 2);
        assert_eq!(lines[1].line, 4);
    }

    #[test]
    fn test_format_round_trip() {
        let text = format_line("iterator_seekge iter1 a/3", "key = a/3");
        let line = parse_line(1, &text).unwrap().unwrap();
        assert_eq!(line.name, "iterator_seekge");
        assert_eq!(line.output, "key = a/3");
        assert_eq!(format_comment("hi"), "# hi");
    }
}
