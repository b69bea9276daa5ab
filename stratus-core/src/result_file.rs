//! Result files
//!
//! Read-only operations can write their result to a caller-specified path as
//! pretty-printed JSON.

use std::path::Path;

use serde::Serialize;

use crate::provider::ProviderError;

/// Serialize `result` as pretty JSON into `path`, creating parent directories
pub fn write_result_file<T: Serialize + ?Sized>(path: &Path, result: &T) -> Result<(), ProviderError> {
    let content = serde_json::to_string_pretty(result)
        .map_err(|e| ProviderError::io(format!("Failed to serialize result: {}", e)))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            ProviderError::io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    std::fs::write(path, content + "\n").map_err(|e| {
        ProviderError::io(format!("Failed to write result file {}: {}", path.display(), e))
    })?;

    log::debug!("wrote result file {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::provider::ErrorKind;
    use crate::resource::Value;

    #[test]
    fn writes_pretty_json_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/result.json");

        let mut result = HashMap::new();
        result.insert("vpc_id".to_string(), Value::from("vpc-123"));
        result.insert("enable_dns_support".to_string(), Value::Bool(true));

        write_result_file(&path, &result).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n  \""));
        let parsed: HashMap<String, Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = write_result_file(&blocker.join("result.json"), &vec![1, 2]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}
