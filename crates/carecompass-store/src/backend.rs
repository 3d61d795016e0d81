//! Persistence backends.

use crate::snapshot::{Mutation, Snapshot};
use crate::Result;
use async_trait::async_trait;
use carecompass_core::{BackendKind, ServerConfig};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Where the store's document lives between restarts.
///
/// `commit` is called under the store's writer gate with the mutation and
/// the document as it will look once the mutation is visible. A commit that
/// returns `Ok` must survive a crash.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logs and status output
    fn name(&self) -> &'static str;

    /// Load the current document, or an empty one if nothing was saved yet
    async fn load(&self) -> Result<Snapshot>;

    /// Persist a mutation
    async fn commit(&self, mutation: &Mutation, next: &Snapshot) -> Result<()>;
}

/// Build the backend selected in the config.
pub fn backend_for(config: &ServerConfig) -> Arc<dyn Backend> {
    match config.backend {
        BackendKind::JsonFile => Arc::new(JsonFileBackend::new(config.json_db_path())),
        BackendKind::Journal => Arc::new(JournalBackend::new(config.journal_path())),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Write `bytes` next to `path` and rename it into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

// ============================================================================
// JSON file
// ============================================================================

/// The whole document as one pretty-printed JSON file, rewritten on every
/// commit.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Backend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json_file"
    }

    async fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No database file yet, starting empty");
            return Ok(Snapshot::default());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Snapshot::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn commit(&self, mutation: &Mutation, next: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(next)?;
        write_atomic(&self.path, &json).await?;
        debug!(path = ?self.path, op = mutation.op(), "Saved database file");
        Ok(())
    }
}

// ============================================================================
// Journal
// ============================================================================

/// Default number of journal lines before the journal is compacted.
pub const DEFAULT_COMPACT_AFTER: usize = 10_000;

/// Append-only JSONL journal of mutations, fsynced per commit.
///
/// On load the journal is replayed from an empty document. A line that
/// fails to parse is skipped with a warning, which covers a torn write. Each
/// append starts on a fresh line even if an earlier write stopped midway.
/// Once the journal holds `compact_after` lines it is rewritten as a single
/// `import` of the current document.
pub struct JournalBackend {
    path: PathBuf,
    compact_after: usize,
    lines: AtomicUsize,
}

impl JournalBackend {
    pub fn new(path: PathBuf) -> Self {
        Self::with_compaction(path, DEFAULT_COMPACT_AFTER)
    }

    pub fn with_compaction(path: PathBuf, compact_after: usize) -> Self {
        Self {
            path,
            compact_after: compact_after.max(1),
            lines: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append_durable(&self, json: &str) -> Result<()> {
        ensure_parent(&self.path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = String::with_capacity(json.len() + 2);
        if ends_mid_line(&mut file).await? {
            warn!(path = ?self.path, "Journal ends in a partial entry, starting a new line");
            line.push('\n');
        }
        line.push_str(json);
        line.push('\n');

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn compact(&self, next: &Snapshot) -> Result<()> {
        let mutation = Mutation::Import {
            snapshot: Box::new(next.clone()),
        };
        let mut json = serde_json::to_string(&mutation)?;
        json.push('\n');
        write_atomic(&self.path, json.as_bytes()).await?;
        self.lines.store(1, Ordering::Relaxed);
        info!(path = ?self.path, "Compacted journal");
        Ok(())
    }
}

#[async_trait]
impl Backend for JournalBackend {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn load(&self) -> Result<Snapshot> {
        let mut db = Snapshot::default();
        if !self.path.exists() {
            self.lines.store(0, Ordering::Relaxed);
            return Ok(db);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut applied = 0usize;
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Mutation>(line) {
                Ok(mutation) => {
                    mutation.apply(&mut db);
                    applied += 1;
                }
                Err(e) => {
                    warn!(line = n + 1, error = %e, "Skipping malformed journal entry");
                }
            }
        }

        self.lines.store(applied, Ordering::Relaxed);
        debug!(path = ?self.path, entries = applied, "Replayed journal");
        Ok(db)
    }

    async fn commit(&self, mutation: &Mutation, next: &Snapshot) -> Result<()> {
        if self.lines.load(Ordering::Relaxed) >= self.compact_after {
            return self.compact(next).await;
        }

        let json = serde_json::to_string(mutation)?;
        self.append_durable(&json).await?;
        self.lines.fetch_add(1, Ordering::Relaxed);
        debug!(path = ?self.path, op = mutation.op(), "Appended journal entry");
        Ok(())
    }
}

/// Whether the file's last byte is something other than a newline.
async fn ends_mid_line(file: &mut tokio::fs::File) -> Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

// ============================================================================
// Memory
// ============================================================================

/// Keeps nothing beyond the process. `load` returns the seed document.
#[derive(Default)]
pub struct MemoryBackend {
    seed: Mutex<Snapshot>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: Snapshot) -> Self {
        Self {
            seed: Mutex::new(seed),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Snapshot> {
        Ok(self.seed.lock().clone())
    }

    async fn commit(&self, _mutation: &Mutation, _next: &Snapshot) -> Result<()> {
        Ok(())
    }
}

/// Backend that refuses every commit. Used to check that a failed write
/// leaves the store untouched.
#[cfg(test)]
pub(crate) struct FailingBackend;

#[cfg(test)]
#[async_trait]
impl Backend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn load(&self) -> Result<Snapshot> {
        Ok(Snapshot::default())
    }

    async fn commit(&self, _mutation: &Mutation, _next: &Snapshot) -> Result<()> {
        Err(crate::StoreError::Storage("disk full".to_string()))
    }
}
