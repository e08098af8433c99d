//! Persistence of evaluated mints: two disjoint append-only sets, one for
//! validated tokens and one for rejected ones, stored as flat JSON arrays.
//!
//! Every mutation loads prior state from disk, merges, and rewrites, so the
//! sets survive restarts and external edits. Missing or corrupted files are
//! treated as empty, never as fatal.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Append-only store for evaluated mint addresses.
pub struct TokenStore {
    validated_path: PathBuf,
    rejected_path: PathBuf,
    // Writes from concurrent workers must not interleave load-merge-rewrite
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(validated_path: impl Into<PathBuf>, rejected_path: impl Into<PathBuf>) -> Self {
        Self {
            validated_path: validated_path.into(),
            rejected_path: rejected_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Record one evaluated mint in the set matching its verdict. Returns
    /// true when the mint was newly added, false for an idempotent repeat
    /// (which leaves the file untouched).
    #[instrument(skip(self), fields(mint = %mint, passed))]
    pub async fn record(&self, mint: &str, passed: bool) -> Result<bool> {
        let (path, opposite) = if passed {
            (&self.validated_path, &self.rejected_path)
        } else {
            (&self.rejected_path, &self.validated_path)
        };

        let _guard = self.write_lock.lock().await;

        // The sets stay disjoint: a re-evaluated mint moves to the set
        // matching its latest verdict
        let mut other = load_set(opposite).await;
        if other.remove(mint) {
            write_set(opposite, &other).await?;
            debug!(path = %opposite.display(), "mint left the opposite verdict set");
        }

        let mut set = load_set(path).await;
        if !set.insert(mint.to_string()) {
            debug!(path = %path.display(), "mint already recorded");
            return Ok(false);
        }
        write_set(path, &set).await?;
        debug!(path = %path.display(), total = set.len(), "mint recorded");
        Ok(true)
    }

    /// Current validated set as persisted on disk.
    pub async fn validated(&self) -> BTreeSet<String> {
        load_set(&self.validated_path).await
    }

    /// Current rejected set as persisted on disk.
    pub async fn rejected(&self) -> BTreeSet<String> {
        load_set(&self.rejected_path).await
    }
}

async fn load_set(path: &Path) -> BTreeSet<String> {
    match tokio::fs::read(path).await {
        Ok(raw) => match serde_json::from_slice::<Vec<String>>(&raw) {
            Ok(entries) => entries.into_iter().collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupted token list, starting empty");
                BTreeSet::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable token list, starting empty");
            BTreeSet::new()
        }
    }
}

async fn write_set(path: &Path, set: &BTreeSet<String>) -> Result<()> {
    let entries: Vec<&String> = set.iter().collect();
    let raw = serde_json::to_vec_pretty(&entries).context("serializing token list")?;
    // Sibling temp file plus rename: an abort mid-write can never truncate
    // the previously persisted set
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, raw)
        .await
        .with_context(|| format!("writing token list {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing token list {}", path.display()))?;
    Ok(())
}
