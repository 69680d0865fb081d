//! Durable per-project state.
//!
//! Each project persists as one JSON snapshot (`project.json`) holding all
//! four collections plus metadata. A commit serializes the whole state to
//! `project.json.tmp` and atomically renames it over the previous snapshot,
//! so a crash between commits never yields a torn cross-collection view:
//! a concurrent reader sees either the pre- or post-commit snapshot.
//!
//! Layout per project:
//!
//! ```text
//! <data_dir>/<project_id>/
//!   project.json              the authoritative snapshot
//!   interviews/INT_001.json   derived per-interview copies
//!   scripts/script_v1.json    derived per-script copies
//!   report.md                 last synthesized report, if any
//! ```
//!
//! The sidecar files are operator conveniences rewritten after the snapshot
//! rename; only `project.json` is read back.

use std::fs;
use std::path::{Path, PathBuf};

use eidetic_core::{ProjectState, StoreError};
use tracing::debug;

/// Filesystem-backed project store.
///
/// The store itself is stateless between calls; in-process serialization of
/// commits is the pipeline's per-project lock, not the store's concern.
pub struct ProjectStore {
    data_dir: PathBuf,
}

impl ProjectStore {
    /// Open (and create if needed) the store root.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id)
    }

    fn snapshot_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("project.json")
    }

    pub fn exists(&self, project_id: &str) -> bool {
        self.snapshot_path(project_id).is_file()
    }

    /// Create a fresh project. Fails if the id is taken.
    pub fn create(&self, project: &ProjectState) -> Result<(), StoreError> {
        if self.exists(&project.id) {
            return Err(StoreError::AlreadyExists(project.id.clone()));
        }
        let dir = self.project_dir(&project.id);
        fs::create_dir_all(dir.join("interviews"))?;
        fs::create_dir_all(dir.join("scripts"))?;
        self.save(project)
    }

    /// Load a consistent snapshot of the whole project.
    pub fn load(&self, project_id: &str) -> Result<ProjectState, StoreError> {
        let path = self.snapshot_path(project_id);
        if !path.is_file() {
            return Err(StoreError::NotFound(project_id.to_string()));
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Atomically commit the full project state.
    pub fn save(&self, project: &ProjectState) -> Result<(), StoreError> {
        let dir = self.project_dir(&project.id);
        fs::create_dir_all(&dir)?;

        let path = self.snapshot_path(&project.id);
        let tmp = dir.join("project.json.tmp");
        let text = serde_json::to_string_pretty(project)?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        debug!(project = %project.id, "snapshot committed");

        self.write_sidecars(project)?;
        Ok(())
    }

    /// Delete a project and everything it owns.
    pub fn delete(&self, project_id: &str) -> Result<(), StoreError> {
        let dir = self.project_dir(project_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(project_id.to_string()));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Ids of all stored projects, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.exists(&name) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Find the project bound to a voice-runtime agent id.
    pub fn find_by_agent(&self, agent_id: &str) -> Result<Option<ProjectState>, StoreError> {
        for id in self.list()? {
            let project = self.load(&id)?;
            if project.voice_agent_id.as_deref() == Some(agent_id) {
                return Ok(Some(project));
            }
        }
        Ok(None)
    }

    /// Persist the synthesized report next to the snapshot.
    pub fn save_report(&self, project_id: &str, report: &str) -> Result<PathBuf, StoreError> {
        let path = self.project_dir(project_id).join("report.md");
        fs::write(&path, report)?;
        Ok(path)
    }

    fn write_sidecars(&self, project: &ProjectState) -> Result<(), StoreError> {
        let dir = self.project_dir(&project.id);
        let interviews = dir.join("interviews");
        let scripts = dir.join("scripts");
        fs::create_dir_all(&interviews)?;
        fs::create_dir_all(&scripts)?;

        if let Some(interview) = project.interviews.last() {
            write_json(&interviews.join(format!("{}.json", interview.id)), interview)?;
        }
        if let Some(script) = project.scripts.last() {
            write_json(&scripts.join(format!("script_v{}.json", script.version)), script)?;
        }
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eidetic_core::Interview;
    use tempfile::tempdir;

    fn sample_project(id: &str) -> ProjectState {
        ProjectState::new(id, "What drives focus under deadline pressure?", vec![])
    }

    #[test]
    fn create_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let project = sample_project("demo");
        store.create(&project).unwrap();

        let loaded = store.load("demo").unwrap();
        assert_eq!(loaded.id, "demo");
        assert_eq!(loaded.research_question, project.research_question);
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        store.create(&sample_project("demo")).unwrap();
        let err = store.create(&sample_project("demo")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load("nope").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn delete_removes_everything() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        store.create(&sample_project("demo")).unwrap();
        store.delete("demo").unwrap();
        assert!(!store.exists("demo"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn no_tmp_file_survives_commit() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let mut project = sample_project("demo");
        store.create(&project).unwrap();
        project.seed_angles.push("time pressure".to_string());
        store.save(&project).unwrap();

        assert!(!dir.path().join("demo/project.json.tmp").exists());
        let loaded = store.load("demo").unwrap();
        assert_eq!(loaded.seed_angles, vec!["time pressure"]);
    }

    #[test]
    fn sidecars_written_for_latest_records() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let mut project = sample_project("demo");
        project.interviews.push(Interview {
            id: "INT_001".to_string(),
            conversation_id: "conv_1".to_string(),
            transcript: "User: hello".to_string(),
            language: None,
            script_version_used: Some(1),
            received_at: Utc::now(),
            analysis_error: None,
        });
        store.create(&project).unwrap();
        assert!(dir.path().join("demo/interviews/INT_001.json").is_file());
    }

    #[test]
    fn find_by_agent_matches_binding() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let mut project = sample_project("demo");
        project.voice_agent_id = Some("agent_42".to_string());
        store.create(&project).unwrap();
        store.create(&sample_project("other")).unwrap();

        let found = store.find_by_agent("agent_42").unwrap().unwrap();
        assert_eq!(found.id, "demo");
        assert!(store.find_by_agent("agent_unknown").unwrap().is_none());
    }
}
