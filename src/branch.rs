//! Copy-on-write branch overlay: dirty-block tracking over a parent branch,
//! tombstones, and commit/discard semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cas::{CasEngine, CasObjectType};
use crate::error::FsError;
use crate::time::now_ms;

/// A single branch-owned block: its content hash, size, and when it was
/// last touched. An empty `hash` marks a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: String,
    pub size: u64,
    pub is_owned: bool,
    pub modified_at_ms: Option<i64>,
}

impl BlockInfo {
    pub fn is_tombstone(&self) -> bool {
        self.hash.is_empty()
    }
}

/// Outcome of [`Branch::intercept_write`].
#[derive(Debug, Clone)]
pub struct InterceptResult {
    pub hash: String,
    pub bytes_written: u64,
    pub copied_from_parent: bool,
    pub previous_hash: Option<String>,
}

/// Outcome of [`Branch::commit`].
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub branch_id: String,
    pub path_count: usize,
    pub paths: Vec<String>,
    pub total_bytes: u64,
    pub committed_at_ms: i64,
}

/// A copy-on-write overlay over an optional parent branch.
pub struct Branch {
    pub branch_id: String,
    parent: Option<Arc<Branch>>,
    owned: RwLock<HashMap<String, BlockInfo>>,
    dirty: RwLock<HashSet<String>>,
    previous_hash: RwLock<HashMap<String, String>>,
    created_at_ms: i64,
    modified_at_ms: RwLock<i64>,
    cas: Arc<CasEngine>,
}

impl Branch {
    pub fn new(branch_id: impl Into<String>, parent: Option<Arc<Branch>>, cas: Arc<CasEngine>) -> Self {
        let now = now_ms();
        Self {
            branch_id: branch_id.into(),
            parent,
            owned: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashSet::new()),
            previous_hash: RwLock::new(HashMap::new()),
            created_at_ms: now,
            modified_at_ms: RwLock::new(now),
            cas,
        }
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub async fn modified_at_ms(&self) -> i64 {
        *self.modified_at_ms.read().await
    }

    async fn owned_block(&self, path: &str) -> Option<BlockInfo> {
        self.owned.read().await.get(path).cloned()
    }

    /// Resolve the content hash visible for `path` in this branch, walking
    /// the parent chain if this branch has no opinion. A tombstone short-
    /// circuits inheritance.
    pub fn resolve_hash<'a>(
        &'a self,
        path: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(info) = self.owned_block(path).await {
                if info.is_tombstone() {
                    return None;
                }
                return Some(info.hash);
            }
            match &self.parent {
                Some(parent) => parent.resolve_hash(path).await,
                None => None,
            }
        })
    }

    /// Intercept a write: record the new content as an owned block, copying
    /// visibility from the parent chain when this branch did not already own
    /// the path.
    pub async fn intercept_write(&self, path: &str, bytes: &[u8]) -> Result<InterceptResult, FsError> {
        let already_owned = self.owned_block(path).await.is_some();
        let previous_hash = if already_owned {
            None
        } else {
            self.parent_chain_hash(path).await
        };
        let copied_from_parent = previous_hash.is_some();

        let hash = self.cas.put(bytes, CasObjectType::Blob).await?;
        let now = now_ms();
        self.owned.write().await.insert(
            path.to_string(),
            BlockInfo { hash: hash.clone(), size: bytes.len() as u64, is_owned: true, modified_at_ms: Some(now) },
        );
        self.dirty.write().await.insert(path.to_string());
        if let Some(prev) = &previous_hash {
            self.previous_hash.write().await.insert(path.to_string(), prev.clone());
        }
        *self.modified_at_ms.write().await = now;

        Ok(InterceptResult { hash, bytes_written: bytes.len() as u64, copied_from_parent, previous_hash })
    }

    async fn parent_chain_hash(&self, path: &str) -> Option<String> {
        match &self.parent {
            Some(parent) => parent.resolve_hash(path).await,
            None => None,
        }
    }

    /// Read the bytes visible for `path`: owned blocks first, then the
    /// parent chain. A tombstone reads as nonexistent.
    pub async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, FsError> {
        match self.resolve_hash(path).await {
            Some(hash) => Ok(self.cas.get(&hash).await?.map(|obj| obj.bytes)),
            None => Ok(None),
        }
    }

    pub async fn mark_deleted(&self, path: &str) {
        let now = now_ms();
        self.owned.write().await.insert(
            path.to_string(),
            BlockInfo { hash: String::new(), size: 0, is_owned: true, modified_at_ms: Some(now) },
        );
        self.dirty.write().await.insert(path.to_string());
        *self.modified_at_ms.write().await = now;
    }

    pub async fn is_deleted(&self, path: &str) -> bool {
        self.owned_block(path).await.map(|b| b.is_tombstone()).unwrap_or(false)
    }

    /// Persist every dirty block and clear dirty tracking. A no-op commit on
    /// a clean handler returns `{path_count: 0, total_bytes: 0}`.
    pub async fn commit(&self) -> Result<CommitResult, FsError> {
        let dirty_paths: Vec<String> = self.dirty.read().await.iter().cloned().collect();
        let owned = self.owned.read().await;
        let mut total_bytes = 0u64;
        let mut paths = Vec::new();
        for p in &dirty_paths {
            if let Some(info) = owned.get(p) {
                total_bytes += info.size;
                paths.push(p.clone());
            }
        }
        drop(owned);

        self.dirty.write().await.clear();
        self.previous_hash.write().await.clear();
        let now = now_ms();
        *self.modified_at_ms.write().await = now;

        Ok(CommitResult {
            branch_id: self.branch_id.clone(),
            path_count: paths.len(),
            paths,
            total_bytes,
            committed_at_ms: now,
        })
    }

    /// Discard every owned block, restoring the parent's visibility.
    pub async fn discard_all(&self) {
        self.owned.write().await.clear();
        self.dirty.write().await.clear();
        self.previous_hash.write().await.clear();
    }

    pub async fn discard_path(&self, path: &str) {
        self.owned.write().await.remove(path);
        self.dirty.write().await.remove(path);
        self.previous_hash.write().await.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cas(dir: &std::path::Path) -> Arc<CasEngine> {
        Arc::new(CasEngine::new(dir, false, crate::cas::HashAlgo::Sha256))
    }

    #[tokio::test]
    async fn commit_on_clean_handler_is_a_no_op() {
        let dir = tempdir().unwrap();
        let branch = Branch::new("root", None, cas(dir.path()));
        let result = branch.commit().await.unwrap();
        assert_eq!(result.path_count, 0);
        assert_eq!(result.total_bytes, 0);
    }

    #[tokio::test]
    async fn child_inherits_parent_content_until_overwritten() {
        let dir = tempdir().unwrap();
        let cas_engine = cas(dir.path());
        let parent = Arc::new(Branch::new("parent", None, cas_engine.clone()));
        parent.intercept_write("/config.json", b"{\"v\":0}").await.unwrap();
        parent.commit().await.unwrap();

        let child = Branch::new("child", Some(parent.clone()), cas_engine);
        assert_eq!(child.read("/config.json").await.unwrap(), Some(b"{\"v\":0}".to_vec()));

        let result = child.intercept_write("/config.json", b"{\"v\":1}").await.unwrap();
        assert!(result.copied_from_parent);
        assert!(result.previous_hash.is_some());

        assert_eq!(child.read("/config.json").await.unwrap(), Some(b"{\"v\":1}".to_vec()));
        assert_eq!(parent.read("/config.json").await.unwrap(), Some(b"{\"v\":0}".to_vec()));
    }

    #[tokio::test]
    async fn tombstone_suppresses_parent_inheritance() {
        let dir = tempdir().unwrap();
        let cas_engine = cas(dir.path());
        let parent = Arc::new(Branch::new("parent", None, cas_engine.clone()));
        parent.intercept_write("/x", b"data").await.unwrap();

        let child = Branch::new("child", Some(parent), cas_engine);
        child.mark_deleted("/x").await;
        assert!(child.is_deleted("/x").await);
        assert_eq!(child.read("/x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn discard_path_restores_parent_visibility() {
        let dir = tempdir().unwrap();
        let cas_engine = cas(dir.path());
        let parent = Arc::new(Branch::new("parent", None, cas_engine.clone()));
        parent.intercept_write("/x", b"parent-data").await.unwrap();

        let child = Branch::new("child", Some(parent), cas_engine);
        child.intercept_write("/x", b"child-data").await.unwrap();
        child.discard_path("/x").await;

        assert_eq!(child.read("/x").await.unwrap(), Some(b"parent-data".to_vec()));
    }
}
