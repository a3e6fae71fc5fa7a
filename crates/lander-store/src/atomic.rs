//! Replace-on-success writes and validated reads.

use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

/// Write `bytes` to a sibling temp file, fsync, then rename over `path`.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> Result<(), StoreError> {
        let mut file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(bytes)
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
        Ok(())
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let dir = File::open(parent).map_err(|e| StoreError::io(parent, e))?;
        dir.sync_all().map_err(|e| StoreError::io(parent, e))?;
    }

    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut text = serde_json::to_string_pretty(value).map_err(|e| StoreError::parse(path, e))?;
    text.push('\n');
    write_bytes_atomic(path, text.as_bytes())
}

/// Read a text document, rejecting NUL bytes and invalid UTF-8. `None` when
/// the file does not exist.
pub fn read_text(path: &Path) -> Result<Option<String>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    if bytes.contains(&0) {
        return Err(StoreError::Corrupt(format!(
            "{}: contains NUL byte(s)",
            path.display()
        )));
    }
    String::from_utf8(bytes).map(Some).map_err(|_| {
        StoreError::Corrupt(format!(
            "{}: contains non-UTF-8 byte sequence(s)",
            path.display()
        ))
    })
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempDir;

    #[test]
    fn replaces_existing_document_and_leaves_no_temp_files() {
        let dir = TempDir::new("atomic");
        let path = dir.path().join("nested").join("doc.json");

        write_json_atomic(&path, &serde_json::json!({"v": 1})).expect("first write");
        write_json_atomic(&path, &serde_json::json!({"v": 2})).expect("second write");

        let text = read_text(&path).expect("read").expect("exists");
        assert!(text.contains("\"v\": 2"));
        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn read_text_rejects_nul_payload() {
        let dir = TempDir::new("nul");
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{\"v\":1}\0").expect("fixture should write");
        match read_text(&path) {
            Err(StoreError::Corrupt(message)) => assert!(message.contains("NUL")),
            other => panic!("expected corrupt document error, got {other:?}"),
        }
    }

    #[test]
    fn read_text_of_missing_file_is_none() {
        let dir = TempDir::new("missing");
        assert!(read_text(&dir.path().join("nope")).expect("read").is_none());
    }
}
