use super::Incident;
use crate::errors::PersistenceError;
use crate::util::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One JSON document per incident, named `<incident_id>.json`.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the artifact for `incident_id`, or `None` if the id could escape the store.
    pub fn path_for(&self, incident_id: &str) -> Option<PathBuf> {
        is_valid_id(incident_id).then(|| self.dir.join(format!("{}.json", incident_id)))
    }

    /// Write `incident`, replacing any earlier artifact with the same id.
    ///
    /// The artifact is either fully present or absent; readers never see a partial file.
    pub fn save(&self, incident: &Incident) -> Result<PathBuf, PersistenceError> {
        let path = self
            .path_for(&incident.incident_id)
            .ok_or_else(|| PersistenceError::InvalidId {
                incident_id: incident.incident_id.clone(),
            })?;

        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let json =
            serde_json::to_vec_pretty(incident).map_err(|source| PersistenceError::Serialize {
                incident_id: incident.incident_id.clone(),
                source,
            })?;
        write_atomic(&path, &json).map_err(|source| PersistenceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Load a stored incident. Missing or unreadable artifacts are reported as absent.
    pub fn load(&self, incident_id: &str) -> Option<Incident> {
        let path = self.path_for(incident_id)?;
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(incident) => Some(incident),
            Err(err) => {
                warn!(artifact = %path.display(), "ignoring unreadable artifact: {}", err);
                None
            }
        }
    }

    /// Ids of all stored incidents, sorted.
    pub fn list(&self) -> Result<Vec<String>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| PersistenceError::Read {
            path: self.dir.clone(),
            source,
        })?;

        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|id| is_valid_id(id))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::sample_incident;
    use tempfile::TempDir;

    fn setup_store() -> (ArtifactStore, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = ArtifactStore::new(dir.path().join("artifacts"));
        (store, dir)
    }

    #[test]
    fn test_save_and_load() {
        let (store, _dir) = setup_store();
        let incident = sample_incident("inc-20250101T100000-abcd1234");
        let path = store.save(&incident).unwrap();
        assert!(path.ends_with("inc-20250101T100000-abcd1234.json"));
        assert_eq!(store.load(&incident.incident_id), Some(incident));
    }

    #[test]
    fn test_save_is_idempotent() {
        let (store, _dir) = setup_store();
        let incident = sample_incident("inc-1");

        let first = store.save(&incident).unwrap();
        let once = fs::read(&first).unwrap();
        let second = store.save(&incident).unwrap();
        let twice = fs::read(&second).unwrap();

        assert_eq!(first, second);
        assert_eq!(once, twice);
        assert_eq!(store.list().unwrap(), vec!["inc-1".to_string()]);
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_save_overwrites_same_id() {
        let (store, _dir) = setup_store();
        let mut incident = sample_incident("inc-1");
        store.save(&incident).unwrap();
        incident.verification_result = false;
        store.save(&incident).unwrap();
        assert!(!store.load("inc-1").unwrap().verification_result);
    }

    #[test]
    fn test_load_missing_is_none() {
        let (store, _dir) = setup_store();
        assert!(store.load("inc-missing").is_none());
    }

    #[test]
    fn test_partial_artifact_is_not_valid() {
        let (store, _dir) = setup_store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("inc-torn.json"), "{\"incident_id\": \"inc-to").unwrap();
        assert!(store.load("inc-torn").is_none());
    }

    #[test]
    fn test_ids_cannot_escape_store() {
        let (store, _dir) = setup_store();
        assert!(store.path_for("../etc/passwd").is_none());
        assert!(store.path_for(".hidden").is_none());
        assert!(store.load("../inc-1").is_none());
        assert!(store.save(&sample_incident("a/b")).is_err());
    }

    #[test]
    fn test_invalid_id_is_not_retryable() {
        let (store, dir) = setup_store();
        let err = store.save(&sample_incident("../escape")).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidId { ref incident_id } if incident_id == "../escape"));
        assert!(!err.is_transient());
        assert!(!dir.path().join("escape.json").exists());
    }

    #[test]
    fn test_list_sorted_and_skips_temp_files() {
        let (store, _dir) = setup_store();
        store.save(&sample_incident("inc-b")).unwrap();
        store.save(&sample_incident("inc-a")).unwrap();
        fs::write(store.dir().join(".inc-c.json.1-ab.tmp"), "{").unwrap();
        assert_eq!(
            store.list().unwrap(),
            vec!["inc-a".to_string(), "inc-b".to_string()]
        );
    }
}
