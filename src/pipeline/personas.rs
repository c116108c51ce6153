use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::model::Persona;
use crate::util::{ensure_directory, sha256_file};

/// One persona file seen while loading.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaFile {
    pub filename: String,
    pub sha256: String,
    pub personas: Vec<String>,
    pub skipped_entries: usize,
    pub error: Option<String>,
}

/// Personas keyed by name.
///
/// Files are read in file-name order and entries within a file in sequence
/// order. When two entries share a name the one read last replaces the
/// earlier one; this is the intended policy, not an error.
#[derive(Debug, Clone, Default)]
pub struct PersonaStore {
    personas: BTreeMap<String, Persona>,
    files: Vec<PersonaFile>,
}

impl PersonaStore {
    /// Loads every `*.json` file in `persona_dir`. A missing directory is
    /// created and yields an empty store. Unreadable or malformed files are
    /// logged and skipped.
    pub fn load(persona_dir: &Path) -> Result<Self> {
        let mut store = Self::default();

        if !persona_dir.exists() {
            ensure_directory(persona_dir)?;
            warn!(path = %persona_dir.display(), "persona directory missing, created empty");
            return Ok(store);
        }

        for path in discover_persona_files(persona_dir)? {
            let file = store.load_file(&path);
            store.files.push(file);
        }

        info!(
            path = %persona_dir.display(),
            files = store.files.len(),
            personas = store.personas.len(),
            "loaded personas"
        );
        Ok(store)
    }

    #[cfg(test)]
    pub fn from_personas(personas: impl IntoIterator<Item = Persona>) -> Self {
        let mut store = Self::default();
        for persona in personas {
            store.insert(persona);
        }
        store
    }

    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn files(&self) -> &[PersonaFile] {
        &self.files
    }

    fn insert(&mut self, persona: Persona) {
        if self.personas.contains_key(&persona.name) {
            info!(persona = %persona.name, "persona redefined, last definition wins");
        }
        self.personas.insert(persona.name.clone(), persona);
    }

    fn load_file(&mut self, path: &Path) -> PersonaFile {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file = PersonaFile {
            filename,
            sha256: String::new(),
            personas: Vec::new(),
            skipped_entries: 0,
            error: None,
        };

        let parsed = sha256_file(path).and_then(|digest| {
            file.sha256 = digest;
            let raw = fs::read(path)
                .with_context(|| format!("failed to read persona file {}", path.display()))?;
            serde_json::from_slice::<Value>(&raw)
                .with_context(|| format!("failed to parse persona file {}", path.display()))
        });
        let data = match parsed {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "skipping persona file");
                file.error = Some(format!("{err:#}"));
                return file;
            }
        };

        let entries = match data {
            Value::Array(items) => items,
            other => vec![other],
        };
        for entry in &entries {
            match Persona::from_value(entry) {
                Some(persona) => {
                    file.personas.push(persona.name.clone());
                    self.insert(persona);
                }
                None => file.skipped_entries += 1,
            }
        }

        file
    }
}

fn discover_persona_files(persona_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    let entries = fs::read_dir(persona_dir)
        .with_context(|| format!("failed to read {}", persona_dir.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", persona_dir.display()))?;
        let path = entry.path();

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json && path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::PersonaStore;

    #[test]
    fn missing_directory_is_created_and_empty() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let persona_dir = dir.path().join("data").join("personas");

        let store = PersonaStore::load(&persona_dir).expect("missing dir should not fail");
        assert!(store.is_empty());
        assert!(persona_dir.is_dir());
    }

    #[test]
    fn list_and_object_files_are_both_indexed() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::write(
            dir.path().join("a_list.json"),
            r#"[{"name": "alice", "preferences": ["Drama"]}, {"no_name": true}, "text", {"name": "bob"}]"#,
        )
        .expect("list file should be written");
        fs::write(
            dir.path().join("b_single.json"),
            r#"{"name": "carol", "history": ["Heat"]}"#,
        )
        .expect("object file should be written");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("txt file should be written");

        let store = PersonaStore::load(dir.path()).expect("personas should load");
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["alice", "bob", "carol"]);
        assert_eq!(store.files().len(), 2);
        assert_eq!(store.files()[0].skipped_entries, 2);
        assert_eq!(store.files()[0].sha256.len(), 64);
    }

    #[test]
    fn later_file_wins_on_name_collision() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::write(
            dir.path().join("1.json"),
            r#"{"name": "dup", "preferences": ["Action"]}"#,
        )
        .expect("first file should be written");
        fs::write(
            dir.path().join("2.json"),
            r#"[{"name": "dup", "preferences": ["Drama"]}, {"name": "dup", "preferences": ["Comedy"]}]"#,
        )
        .expect("second file should be written");

        let store = PersonaStore::load(dir.path()).expect("personas should load");
        assert_eq!(store.len(), 1);
        let persona = store.get("dup").expect("dup should be present");
        assert!(persona.preferences.contains("Comedy"));
        assert_eq!(persona.preferences.len(), 1);
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::write(dir.path().join("broken.json"), "{ not json").expect("file should be written");
        fs::write(dir.path().join("ok.json"), r#"{"name": "ok"}"#).expect("file should be written");

        let store = PersonaStore::load(dir.path()).expect("broken file should not abort load");
        assert_eq!(store.len(), 1);
        assert!(store.files()[0].error.is_some());
    }
}
