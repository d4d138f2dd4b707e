use camino::{Utf8Path, Utf8PathBuf};
use patchloop_utils::atomic_write::write_file_atomic;
use patchloop_utils::error::StoreError;
use patchloop_utils::types::PlanId;
use std::fs;
use std::io::ErrorKind;

use crate::record::{PlanRecord, PlanSummary};

/// JSON file store keyed by plan id.
///
/// Every write is a full overwrite through [`write_file_atomic`], so readers
/// never observe a partial record.
#[derive(Debug, Clone)]
pub struct PlanStore {
    state_dir: Utf8PathBuf,
}

impl PlanStore {
    #[must_use]
    pub fn new(state_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    #[must_use]
    pub fn state_dir(&self) -> &Utf8Path {
        &self.state_dir
    }

    #[must_use]
    pub fn plans_dir(&self) -> Utf8PathBuf {
        self.state_dir.join("plans")
    }

    #[must_use]
    pub fn plan_path(&self, plan_id: &PlanId) -> Utf8PathBuf {
        self.plans_dir().join(format!("{plan_id}.json"))
    }

    /// Persist a new record. Fails if the id is already taken.
    pub fn create(&self, record: &PlanRecord) -> Result<PlanId, StoreError> {
        let path = self.plan_path(&record.plan_id);
        if path.exists() {
            return Err(StoreError::WriteFailed {
                path: path.to_string(),
                reason: "a plan with this id already exists".to_string(),
            });
        }
        self.save(record)?;
        tracing::info!(plan_id = %record.plan_id, "Created plan record");
        Ok(record.plan_id.clone())
    }

    pub fn load(&self, plan_id: &PlanId) -> Result<PlanRecord, StoreError> {
        let path = self.plan_path(plan_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    plan_id: plan_id.to_string(),
                });
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Full overwrite of the record
    pub fn save(&self, record: &PlanRecord) -> Result<(), StoreError> {
        self.ensure_layout()?;
        let path = self.plan_path(&record.plan_id);
        let mut json = serde_json::to_string_pretty(record).map_err(|e| StoreError::WriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        json.push('\n');
        write_file_atomic(&path, &json).map_err(|e| StoreError::WriteFailed {
            path: path.to_string(),
            reason: format!("{e:#}"),
        })?;
        tracing::debug!(plan_id = %record.plan_id, path = %path, "Saved plan record");
        Ok(())
    }

    #[must_use]
    pub fn exists(&self, plan_id: &PlanId) -> bool {
        self.plan_path(plan_id).is_file()
    }

    /// Summaries of every readable record, oldest first. Corrupted files are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<PlanSummary>, StoreError> {
        let dir = self.plans_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: dir.to_string(),
                    source,
                });
            }
        };

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Ok(plan_id) = PlanId::parse(stem) else {
                continue;
            };
            match self.load(&plan_id) {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => tracing::warn!(plan_id = %plan_id, error = %e, "Skipping unreadable plan"),
            }
        }
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.plan_id.cmp(&b.plan_id))
        });
        Ok(summaries)
    }

    fn ensure_layout(&self) -> Result<(), StoreError> {
        let plans = self.plans_dir();
        fs::create_dir_all(&plans).map_err(|e| StoreError::WriteFailed {
            path: plans.to_string(),
            reason: e.to_string(),
        })?;
        let ignore = self.state_dir.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, "*\n").map_err(|e| StoreError::WriteFailed {
                path: ignore.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchloop_utils::types::{PlanDocument, PlanStatus};
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> PlanStore {
        PlanStore::new(Utf8PathBuf::from_path_buf(temp.path().join(".patchloop")).unwrap())
    }

    fn record(objective: &str) -> PlanRecord {
        PlanRecord::new(
            PlanId::generate(),
            "make it better",
            PlanDocument {
                objective: objective.to_string(),
                ..PlanDocument::default()
            },
        )
    }

    #[test]
    fn test_create_load_save_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let mut rec = record("first");

        let id = store.create(&rec).unwrap();
        assert_eq!(store.load(&id).unwrap(), rec);

        rec.status = PlanStatus::Implemented;
        rec.implementation.final_patch = Some("diff --git a/x b/x\n".into());
        store.save(&rec).unwrap();
        store.save(&rec).unwrap();

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.status, PlanStatus::Implemented);
        assert_eq!(loaded, rec);
    }

    #[test]
    fn test_layout_and_gitignore() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let rec = record("x");
        store.create(&rec).unwrap();

        let path = store.plan_path(&rec.plan_id);
        assert!(path.ends_with(format!("plans/{}.json", rec.plan_id)));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \"plan_id\""), "pretty JSON expected");
        assert_eq!(
            fs::read_to_string(store.state_dir().join(".gitignore")).unwrap(),
            "*\n"
        );
    }

    #[test]
    fn test_load_unknown_plan_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = store(&temp)
            .load(&PlanId::parse("plan_deadbeef").unwrap())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { plan_id } if plan_id == "plan_deadbeef"));
    }

    #[test]
    fn test_create_refuses_existing_id() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let rec = record("x");
        store.create(&rec).unwrap();
        assert!(matches!(
            store.create(&rec),
            Err(StoreError::WriteFailed { .. })
        ));
    }

    #[test]
    fn test_corrupted_record_is_reported_and_skipped_by_list() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let good = record("good");
        store.create(&good).unwrap();
        fs::write(store.plans_dir().join("plan_0000beef.json"), "{not json").unwrap();

        let bad_id = PlanId::parse("plan_0000beef").unwrap();
        assert!(matches!(
            store.load(&bad_id),
            Err(StoreError::Corrupted { .. })
        ));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].plan_id, good.plan_id);
    }

    #[test]
    fn test_list_on_fresh_store_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(store(&temp).list().unwrap().is_empty());
    }
}
