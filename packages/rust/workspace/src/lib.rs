//! File-backed registry of in-flight bulk jobs.
//!
//! Layout under the workspace root:
//!
//! ```text
//! jobs/{job-slug}-{hash}.json        one PendingJobRecord per job id
//! {scope}/posts-{uuid}.jsonl         chunk-source file referenced by a record
//! ```
//!
//! Every write goes to a temp file that is synced and renamed over the target,
//! so a crash never leaves a half-written record behind. The store assumes a
//! single writer and does no locking.

mod source;

pub use source::SourceEntry;

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use postscout_shared::{PendingJobRecord, PostScoutError, Result};

/// Directory holding the job records.
const JOBS_DIR: &str = "jobs";

/// Prefix of chunk-source file names.
const SOURCE_PREFIX: &str = "posts-";

/// Result of reading every record.
#[derive(Debug, Default)]
pub struct RegistryScan {
    /// Readable records, oldest first.
    pub records: Vec<PendingJobRecord>,
    /// One [`PostScoutError::StateEntry`] per unreadable record file.
    pub corrupt: Vec<PostScoutError>,
}

/// Durable job registry rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceStateStore {
    root: PathBuf,
}

impl WorkspaceStateStore {
    /// Open (and create if needed) a workspace at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let jobs = root.join(JOBS_DIR);
        fs::create_dir_all(&jobs).map_err(|e| PostScoutError::io(&jobs, e))?;
        Ok(Self { root })
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root.join(JOBS_DIR)
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        let digest = Sha256::digest(job_id.as_bytes());
        let hash: String = format!("{digest:x}").chars().take(12).collect();
        self.jobs_dir()
            .join(format!("{}-{hash}.json", slug(job_id)))
    }

    /// Directory holding the chunk-source files of `scope`.
    pub fn scope_dir(&self, scope: &str) -> PathBuf {
        self.root.join(slug(scope))
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Write `record`, replacing any record with the same job id.
    pub fn put(&self, record: &PendingJobRecord) -> Result<()> {
        let path = self.record_path(&record.job_id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| PostScoutError::State(format!("failed to encode record: {e}")))?;
        write_atomic(&path, &json)?;
        debug!(job_id = %record.job_id, path = %path.display(), "recorded pending job");
        Ok(())
    }

    /// Read one record. Missing records are `Ok(None)`.
    pub fn get(&self, job_id: &str) -> Result<Option<PendingJobRecord>> {
        let path = self.record_path(job_id);
        match fs::read(&path) {
            Ok(bytes) => decode_record(&path, &bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PostScoutError::io(&path, e)),
        }
    }

    /// Read every record. An unreadable record is reported in
    /// [`RegistryScan::corrupt`] without affecting the others.
    pub fn get_all(&self) -> Result<RegistryScan> {
        let dir = self.jobs_dir();
        let entries = fs::read_dir(&dir)
            .map_err(|e| PostScoutError::State(format!("cannot read {}: {e}", dir.display())))?;

        let mut scan = RegistryScan::default();
        for entry in entries {
            let entry = entry.map_err(|e| PostScoutError::io(&dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let decoded = fs::read(&path)
                .map_err(|e| corrupt_entry(&path, e.to_string()))
                .and_then(|bytes| decode_record(&path, &bytes));
            match decoded {
                Ok(record) => scan.records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable job record");
                    scan.corrupt.push(e);
                }
            }
        }

        scan.records
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(scan)
    }

    /// Delete the record for `job_id`. Returns whether one existed.
    pub fn remove(&self, job_id: &str) -> Result<bool> {
        let path = self.record_path(job_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(job_id = %job_id, "removed job record");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PostScoutError::io(&path, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Chunk-source files
    // -----------------------------------------------------------------------

    /// Write a new chunk-source file for `scope` and return its path.
    pub fn write_source(&self, scope: &str, entries: &[SourceEntry]) -> Result<PathBuf> {
        let dir = self.scope_dir(scope);
        fs::create_dir_all(&dir).map_err(|e| PostScoutError::io(&dir, e))?;

        let path = dir.join(format!("{SOURCE_PREFIX}{}.jsonl", uuid::Uuid::now_v7()));
        let bytes = source::encode(entries)?;
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), posts = entries.len(), "wrote chunk-source file");
        Ok(path)
    }

    /// Read a chunk-source file written by [`Self::write_source`].
    pub fn read_source(&self, path: &Path) -> Result<Vec<SourceEntry>> {
        let text = fs::read_to_string(path).map_err(|e| PostScoutError::io(path, e))?;
        source::decode(path, &text)
    }

    /// Delete a chunk-source file. A file that is already gone is not an error.
    pub fn delete_source(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PostScoutError::io(path, e)),
        }
    }

    /// Delete chunk-source files (and stray temp files) that no record
    /// references. Limited to `scope` when given, otherwise every scope.
    ///
    /// Nothing is deleted while any record is unreadable, since that record
    /// may reference one of the candidates.
    pub fn sweep_orphans(&self, scope: Option<&str>) -> Result<Vec<PathBuf>> {
        let scan = self.get_all()?;
        if !scan.corrupt.is_empty() {
            warn!(
                corrupt = scan.corrupt.len(),
                "skipping orphan sweep while job records are unreadable"
            );
            return Ok(Vec::new());
        }

        let referenced: HashSet<std::ffi::OsString> = scan
            .records
            .iter()
            .filter_map(|r| r.source_file.file_name().map(|n| n.to_os_string()))
            .collect();

        let dirs = match scope {
            Some(scope) => vec![self.scope_dir(scope)],
            None => self.all_scope_dirs()?,
        };

        let mut removed = Vec::new();
        for dir in dirs {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PostScoutError::io(&dir, e)),
            };

            for entry in entries {
                let entry = entry.map_err(|e| PostScoutError::io(&dir, e))?;
                let name = entry.file_name();
                let name_str = name.to_string_lossy();
                let is_source = name_str.starts_with(SOURCE_PREFIX) && name_str.ends_with(".jsonl");
                let is_temp = name_str.starts_with('.') && name_str.ends_with(".tmp");
                if !(is_source || is_temp) || referenced.contains(&name) {
                    continue;
                }

                let path = entry.path();
                self.delete_source(&path)?;
                info!(path = %path.display(), "removed orphaned workspace file");
                removed.push(path);
            }
        }

        Ok(removed)
    }

    fn all_scope_dirs(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root).map_err(|e| PostScoutError::io(&self.root, e))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PostScoutError::io(&self.root, e))?;
            let path = entry.path();
            if path.is_dir() && entry.file_name() != JOBS_DIR {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }
}

/// Filesystem-safe rendering of a job id or scope name.
fn slug(raw: &str) -> String {
    let slug: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if slug.is_empty() { "_".into() } else { slug }
}

fn corrupt_entry(path: &Path, message: String) -> PostScoutError {
    let job_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    PostScoutError::StateEntry {
        job_id,
        path: path.to_path_buf(),
        message,
    }
}

fn decode_record(path: &Path, bytes: &[u8]) -> Result<PendingJobRecord> {
    serde_json::from_slice(bytes).map_err(|e| corrupt_entry(path, e.to_string()))
}

/// Write `bytes` to a synced temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| PostScoutError::State(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&temp).map_err(|e| PostScoutError::io(&temp, e))?;
    file.write_all(bytes).map_err(|e| PostScoutError::io(&temp, e))?;
    file.sync_all().map_err(|e| PostScoutError::io(&temp, e))?;
    drop(file);

    fs::rename(&temp, path).map_err(|e| PostScoutError::io(path, e))
}
