//! Loading the greeting table from disk.

use facewatch_core::announce::GreetingBook;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum GreetingsError {
    #[error("Failed to read greetings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Greetings file {path} is not a JSON object of strings: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Builds the greeting book. Without a path only `template` is used.
///
/// The file is a flat JSON object mapping identity labels to the exact text
/// to speak for them.
pub fn load_greetings(path: Option<&Path>, template: &str) -> Result<GreetingBook, GreetingsError> {
    let Some(path) = path else {
        return Ok(GreetingBook::new(HashMap::new(), template));
    };

    let raw = std::fs::read_to_string(path).map_err(|source| GreetingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let greetings: HashMap<String, String> =
        serde_json::from_str(&raw).map_err(|source| GreetingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    info!(path = %path.display(), entries = greetings.len(), "Loaded greetings");
    Ok(GreetingBook::new(greetings, template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::Identity;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_without_file_uses_template_only() {
        let book = load_greetings(None, "Hello {name}").unwrap();
        assert!(book.is_empty());
        assert_eq!(
            book.message_for(&Identity::from("Sujith")).as_deref(),
            Some("Hello Sujith")
        );
    }

    #[test]
    fn test_loads_entries_from_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Unknown": " ", "G. Rexin": "Welcome, Doctor G. Rexin"}}"#
        )
        .unwrap();

        let book = load_greetings(Some(file.path()), "Congrats {name}").unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(
            book.message_for(&Identity::from("G. Rexin")).as_deref(),
            Some("Welcome, Doctor G. Rexin")
        );
        assert_eq!(book.message_for(&Identity::unknown()), None);
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_greetings(Some(path.as_path()), "Congrats {name}").unwrap_err();
        assert!(matches!(err, GreetingsError::Read { .. }));
    }

    #[test]
    fn test_non_string_values_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"Sujith": 3}}"#).unwrap();

        let err = load_greetings(Some(file.path()), "Congrats {name}").unwrap_err();
        assert!(matches!(err, GreetingsError::Parse { .. }));
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn test_bundled_greetings_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("greetings.json");
        let book = load_greetings(Some(path.as_path()), "Congrats {name}").unwrap();
        assert_eq!(
            book.message_for(&Identity::from("A. Samuvel")).as_deref(),
            Some("Congrats A. Saaamuyel")
        );
        assert_eq!(book.message_for(&Identity::unknown()), None);
    }
}
