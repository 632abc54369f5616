//! Loads every profile document from a directory into a raw table.

use std::collections::HashMap;
use std::path::Path;

use rt_domain::error::{Error, Result};

use crate::schema::RawProfile;

/// Read every `*.yaml` / `*.yml` file in `dir` into a table keyed by the
/// document's `name` field. Non-profile files are skipped; a duplicate
/// name is a configuration error.
pub fn load_all(dir: &Path) -> Result<HashMap<String, RawProfile>> {
    let mut table = HashMap::new();

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let raw: RawProfile = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("profile {}: {e}", path.display()))
        })?;
        if raw.name.is_empty() {
            return Err(Error::Config(format!(
                "profile {} has an empty name",
                path.display()
            )));
        }
        if table.contains_key(&raw.name) {
            return Err(Error::Config(format!(
                "duplicate profile name '{}' in {}",
                raw.name,
                path.display()
            )));
        }
        tracing::debug!(profile = %raw.name, path = %path.display(), "loaded profile");
        table.insert(raw.name.clone(), raw);
    }

    tracing::info!(profile_count = table.len(), dir = %dir.display(), "profiles loaded");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn loads_yaml_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "name: alpha\ntype: associate\n");
        write(dir.path(), "b.yml", "name: beta\n");
        write(dir.path(), "notes.txt", "not a profile");

        let table = load_all(dir.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.contains_key("alpha"));
        assert!(table.contains_key("beta"));
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "name: twin\n");
        write(dir.path(), "b.yaml", "name: twin\n");

        let err = load_all(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.yaml", "name: [unclosed");
        assert!(load_all(dir.path()).is_err());
    }

    #[test]
    fn empty_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let table = load_all(dir.path()).unwrap();
        assert!(table.is_empty());
    }
}
