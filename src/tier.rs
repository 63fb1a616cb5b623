//! Size-based tier placement and promote/demote between hot/warm/cold
//! backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use crate::config::EngineConfig;
use crate::error::{FsError, FsErrorKind};
use crate::inode::Tier;

/// Narrow interface a tier's backing store must satisfy; the router
/// dispatches through this instead of a virtual-inheritance hierarchy.
#[async_trait]
pub trait TierBackend: Send + Sync {
    async fn get(&self, blob_id: &str) -> Result<Vec<u8>, FsError>;
    async fn put(&self, blob_id: &str, bytes: &[u8]) -> Result<(), FsError>;
    async fn delete(&self, blob_id: &str) -> Result<(), FsError>;
}

/// A tier backend rooted at a directory on the host filesystem, following
/// the same `tokio::fs` read/write/sync pattern the teacher's `ShadowFS`
/// uses for its own content access.
pub struct FsTierBackend {
    root: PathBuf,
}

impl FsTierBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, blob_id: &str) -> PathBuf {
        if blob_id.len() >= 2 {
            self.root.join(&blob_id[0..2]).join(&blob_id[2..])
        } else {
            self.root.join(blob_id)
        }
    }
}

#[async_trait]
impl TierBackend for FsTierBackend {
    async fn get(&self, blob_id: &str) -> Result<Vec<u8>, FsError> {
        let path = self.blob_path(blob_id);
        fs::read(&path).await.map_err(|e| FsError::from_io(&e, "read", blob_id))
    }

    async fn put(&self, blob_id: &str, bytes: &[u8]) -> Result<(), FsError> {
        let path = self.blob_path(blob_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| FsError::from_io(&e, "write", blob_id))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await.map_err(|e| FsError::from_io(&e, "write", blob_id))?;
        fs::rename(&tmp, &path).await.map_err(|e| FsError::from_io(&e, "write", blob_id))?;
        Ok(())
    }

    async fn delete(&self, blob_id: &str) -> Result<(), FsError> {
        let path = self.blob_path(blob_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::from_io(&e, "unlink", blob_id)),
        }
    }
}

fn rank(tier: Tier) -> u8 {
    match tier {
        Tier::Hot => 0,
        Tier::Warm => 1,
        Tier::Cold => 2,
    }
}

/// Size-based placement and tier-aware read/write, with a small in-memory
/// cache fronting recently-touched hot blobs.
pub struct TierRouter {
    hot: FsTierBackend,
    warm: FsTierBackend,
    cold: FsTierBackend,
    cache: moka::sync::Cache<String, Arc<Vec<u8>>>,
    hot_limit_bytes: u64,
    warm_limit_bytes: u64,
}

impl TierRouter {
    pub fn new(config: &EngineConfig, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            hot: FsTierBackend::new(base.join(&config.hot_root)),
            warm: FsTierBackend::new(base.join(&config.warm_root)),
            cold: FsTierBackend::new(base.join(&config.cold_root)),
            cache: moka::sync::Cache::new(1024),
            hot_limit_bytes: config.hot_limit_bytes,
            warm_limit_bytes: config.warm_limit_bytes,
        }
    }

    /// Placement policy on create: `size < hot_limit ⇒ hot; size < warm_limit ⇒ warm; else cold`.
    pub fn classify(&self, size: u64) -> Tier {
        if size < self.hot_limit_bytes {
            Tier::Hot
        } else if size < self.warm_limit_bytes {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }

    fn backend(&self, tier: Tier) -> &FsTierBackend {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Warm => &self.warm,
            Tier::Cold => &self.cold,
        }
    }

    pub async fn read(&self, blob_id: &str, tier: Tier) -> Result<Vec<u8>, FsError> {
        if tier == Tier::Hot {
            if let Some(cached) = self.cache.get(blob_id) {
                return Ok((*cached).clone());
            }
        }
        let bytes = self.backend(tier).get(blob_id).await?;
        if tier == Tier::Hot {
            self.cache.insert(blob_id.to_string(), Arc::new(bytes.clone()));
        }
        Ok(bytes)
    }

    pub async fn write(&self, blob_id: &str, tier: Tier, bytes: &[u8]) -> Result<(), FsError> {
        self.backend(tier).put(blob_id, bytes).await?;
        if tier == Tier::Hot {
            self.cache.insert(blob_id.to_string(), Arc::new(bytes.to_vec()));
        } else {
            self.cache.invalidate(blob_id);
        }
        Ok(())
    }

    /// Move a blob to a hotter tier. Transactional at blob granularity: the
    /// new-tier write must succeed before the old tier is deleted.
    pub async fn promote(&self, blob_id: &str, from: Tier, to: Tier) -> Result<(), FsError> {
        if rank(to) >= rank(from) {
            return Err(FsError::inval("promote", blob_id));
        }
        self.move_blob(blob_id, from, to).await
    }

    /// Move a blob to a colder tier. Transactional at blob granularity.
    pub async fn demote(&self, blob_id: &str, from: Tier, to: Tier) -> Result<(), FsError> {
        if rank(to) <= rank(from) {
            return Err(FsError::inval("demote", blob_id));
        }
        self.move_blob(blob_id, from, to).await
    }

    async fn move_blob(&self, blob_id: &str, from: Tier, to: Tier) -> Result<(), FsError> {
        let bytes = self.backend(from).get(blob_id).await?;
        self.write(blob_id, to, &bytes).await?;
        self.backend(from).delete(blob_id).await?;
        if from == Tier::Hot {
            self.cache.invalidate(blob_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classify_follows_thresholds() {
        let cfg = EngineConfig::default();
        let dir = tempdir().unwrap();
        let router = TierRouter::new(&cfg, dir.path());
        assert_eq!(router.classify(100), Tier::Hot);
        assert_eq!(router.classify(10 * 1024 * 1024), Tier::Warm);
        assert_eq!(router.classify(200 * 1024 * 1024), Tier::Cold);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_per_tier() {
        let cfg = EngineConfig::default();
        let dir = tempdir().unwrap();
        let router = TierRouter::new(&cfg, dir.path());
        router.write("abcd1234", Tier::Warm, b"payload").await.unwrap();
        let got = router.read("abcd1234", Tier::Warm).await.unwrap();
        assert_eq!(got, b"payload");
    }

    #[tokio::test]
    async fn promote_moves_content_and_removes_old_copy() {
        let cfg = EngineConfig::default();
        let dir = tempdir().unwrap();
        let router = TierRouter::new(&cfg, dir.path());
        router.write("ffeeaa00", Tier::Cold, b"cold data").await.unwrap();
        router.promote("ffeeaa00", Tier::Cold, Tier::Warm).await.unwrap();

        let got = router.read("ffeeaa00", Tier::Warm).await.unwrap();
        assert_eq!(got, b"cold data");
        assert!(router.backend(Tier::Cold).get("ffeeaa00").await.is_err());
    }

    #[tokio::test]
    async fn promote_to_colder_tier_is_inval() {
        let cfg = EngineConfig::default();
        let dir = tempdir().unwrap();
        let router = TierRouter::new(&cfg, dir.path());
        router.write("11223344", Tier::Hot, b"hot data").await.unwrap();
        let err = router.promote("11223344", Tier::Hot, Tier::Cold).await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::EInval);
    }

    #[tokio::test]
    async fn demote_to_hotter_tier_is_inval() {
        let cfg = EngineConfig::default();
        let dir = tempdir().unwrap();
        let router = TierRouter::new(&cfg, dir.path());
        router.write("55667788", Tier::Warm, b"warm data").await.unwrap();
        let err = router.demote("55667788", Tier::Warm, Tier::Hot).await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::EInval);
    }
}
