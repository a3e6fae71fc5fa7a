//! JSONL storage: one line per issue.

use lander_store::{StoreError, read_text, write_bytes_atomic};
use std::io::{BufRead, Write};
use std::path::Path;

use crate::issue::Issue;

pub fn read_issues(reader: impl BufRead) -> Result<Vec<Issue>, JsonlError> {
    let mut issues = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| JsonlError::Io(line_no + 1, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let issue: Issue = serde_json::from_str(trimmed)
            .map_err(|e| JsonlError::Parse(line_no + 1, e.to_string()))?;
        issues.push(issue);
    }
    Ok(issues)
}

pub fn write_issues(writer: &mut impl Write, issues: &[Issue]) -> Result<(), JsonlError> {
    for issue in issues {
        let line =
            serde_json::to_string(issue).map_err(|e| JsonlError::Serialize(e.to_string()))?;
        writeln!(writer, "{line}").map_err(|e| JsonlError::Io(0, e.to_string()))?;
    }
    Ok(())
}

/// Read issues from a JSONL file. A missing file is an empty issue memory.
pub fn read_issues_from_path(path: impl AsRef<Path>) -> Result<Vec<Issue>, JsonlError> {
    let path = path.as_ref();
    match read_text(path).map_err(JsonlError::from_store)? {
        Some(text) => read_issues(text.as_bytes()),
        None => Ok(Vec::new()),
    }
}

/// Replace the JSONL file atomically.
pub fn write_issues_to_path(path: impl AsRef<Path>, issues: &[Issue]) -> Result<(), JsonlError> {
    let mut buffer = Vec::new();
    write_issues(&mut buffer, issues)?;
    write_bytes_atomic(path.as_ref(), &buffer).map_err(JsonlError::from_store)
}

#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("line {0}: I/O error: {1}")]
    Io(usize, String),

    #[error("line {0}: parse error: {1}")]
    Parse(usize, String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupted substrate: {0}")]
    Corrupt(String),
}

impl JsonlError {
    fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(message) => JsonlError::Corrupt(message),
            other => JsonlError::Io(0, other.to_string()),
        }
    }
}
