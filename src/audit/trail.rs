use super::AuditEntry;
use crate::errors::AuditError;
use crate::signature::Signature;
use crate::util::write_atomic;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only ledger of governed actions, stored as one JSON array.
///
/// Writers serialize on an advisory lock held on a sibling `.lock` file and
/// replace the trail with an atomic rename, so concurrent agents never lose
/// each other's entries and a killed writer never corrupts earlier ones.
pub struct AuditTrail {
    path: PathBuf,
    lock_path: PathBuf,
}

/// What happened during an append.
#[derive(Debug, Clone, Default)]
pub struct AppendReport {
    /// Number of entries in the trail after the append.
    pub len: usize,
    /// Set when the existing trail was unreadable and a fresh one was started.
    pub recovered: Option<Recovery>,
}

#[derive(Debug, Clone)]
pub struct Recovery {
    pub reason: String,
    /// Where the unreadable trail was moved, if the move succeeded.
    pub quarantined: Option<PathBuf>,
}

impl std::fmt::Display for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.quarantined {
            Some(path) => write!(
                f,
                "started a fresh audit trail ({}); previous trail kept at {}",
                self.reason,
                path.display()
            ),
            None => write!(f, "started a fresh audit trail ({})", self.reason),
        }
    }
}

impl AuditTrail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry` to the end of the trail.
    ///
    /// An unreadable or malformed trail is moved aside and replaced by a fresh
    /// one; the returned report says so.
    pub fn append(&self, entry: &AuditEntry) -> Result<AppendReport, AuditError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| AuditError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Released when the handle drops
        let _lock = self.lock()?;

        let (mut entries, recovered) = match self.load() {
            Ok(entries) => (entries, None),
            Err(err) => {
                let quarantined = self.quarantine();
                let recovery = Recovery {
                    reason: err.to_string(),
                    quarantined,
                };
                warn!(trail = %self.path.display(), "{}", recovery);
                (Vec::new(), Some(recovery))
            }
        };

        entries.push(entry.clone());
        self.store(&entries)?;
        debug!(
            trail = %self.path.display(),
            len = entries.len(),
            status = %entry.status,
            "audit entry appended"
        );

        Ok(AppendReport {
            len: entries.len(),
            recovered,
        })
    }

    /// Every entry in append order. A missing trail is empty.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        self.load()
    }

    /// Entries recorded under `signature`, in append order.
    pub fn entries_for_signature(
        &self,
        signature: &Signature,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| e.thought_signature == *signature)
            .collect())
    }

    fn lock(&self) -> Result<File, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| AuditError::Lock {
                path: self.lock_path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| AuditError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        Ok(file)
    }

    fn load(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| AuditError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| AuditError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        let json = serde_json::to_vec_pretty(entries).map_err(AuditError::Serialize)?;
        write_atomic(&self.path, &json).map_err(|source| AuditError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn quarantine(&self) -> Option<PathBuf> {
        let mut name = self.path.file_name()?.to_os_string();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        let target = self.path.with_file_name(name);
        match fs::rename(&self.path, &target) {
            Ok(()) => Some(target),
            Err(err) => {
                warn!(trail = %self.path.display(), "could not move unreadable trail aside: {}", err);
                None
            }
        }
    }
}
