//! The capability facade: the single POSIX-shaped surface every caller goes
//! through, wiring the metadata store, resolver, tiers, CAS, extents, the VFS
//! shim, and the watch hub together into one coherent filesystem.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::cas::{CasEngine, CasObjectType, HashAlgo};
use crate::config::EngineConfig;
use crate::error::{FsError, FsErrorKind, FsResult};
use crate::extent::ExtentLayer;
use crate::inode::{BlobRef, EntryType, Inode, InodeId, Tier, ROOT_ID};
use crate::metadata::MetadataStore;
use crate::path;
use crate::resolver;
use crate::stream::{self, WriteFlag};
use crate::tier::TierRouter;
use crate::time::{normalize_to_ms, now_ms};
use crate::vfs_shim::VfsShim;
use crate::watcher::{WatchEventKind, WatchHub, Watcher};

fn require_absolute(path: &str, syscall: &'static str) -> FsResult<()> {
    if path::is_absolute(path) {
        Ok(())
    } else {
        Err(FsError::inval(syscall, path))
    }
}

/// A `stat`/`lstat` result: the subset of inode state callers are allowed to
/// see directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub ino: InodeId,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
    pub entry_type: EntryType,
    pub tier: Option<Tier>,
}

impl Stats {
    fn from_inode(id: InodeId, inode: &Inode) -> Self {
        Self {
            ino: id,
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            nlink: inode.nlink,
            atime_ms: inode.times.atime_ms,
            mtime_ms: inode.times.mtime_ms,
            ctime_ms: inode.times.ctime_ms,
            birthtime_ms: inode.times.birthtime_ms,
            entry_type: inode.entry_type,
            tier: inode.tier,
        }
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.entry_type == EntryType::Symlink
    }

    pub fn is_fifo(&self) -> bool {
        self.entry_type == EntryType::Fifo
    }

    pub fn is_socket(&self) -> bool {
        self.entry_type == EntryType::Socket
    }

    pub fn is_block_device(&self) -> bool {
        self.entry_type == EntryType::Block
    }

    pub fn is_character_device(&self) -> bool {
        self.entry_type == EntryType::Character
    }
}

/// One entry returned by [`FileSystem::readdir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub entry_type: EntryType,
    pub stats: Option<Stats>,
}

/// Options accepted by [`FileSystem::readdir`].
#[derive(Debug, Clone, Default)]
pub struct ReaddirOptions {
    /// Accepted for parity with the option of the same name elsewhere; every
    /// [`DirEntry`] already carries `entry_type` unconditionally, so this
    /// flag has no effect on what is returned.
    pub with_file_types: bool,
    pub recursive: bool,
    pub with_stats: bool,
    pub max_depth: Option<u32>,
}

/// Options accepted by [`FileSystem::read`] and [`FileSystem::create_read_stream`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub high_water_mark: Option<usize>,
    pub signal: Option<CancellationToken>,
}

/// Options accepted by [`FileSystem::write`], [`FileSystem::append`], and
/// [`FileSystem::create_write_stream`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub mode: Option<u32>,
    pub flag: WriteFlag,
    pub tier: Option<Tier>,
    pub start: Option<u64>,
    pub signal: Option<CancellationToken>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { mode: None, flag: WriteFlag::Write, tier: None, start: None, signal: None }
    }
}

/// A handle returned by [`FileSystem::open`]. Establishes create/truncate/
/// exclusive semantics up front; subsequent I/O still goes through the
/// path-based read/write/stream surface rather than a raw file descriptor.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub id: InodeId,
    pub path: String,
}

/// Flags accepted by [`FileSystem::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub create: bool,
    pub exclusive: bool,
    pub truncate: bool,
}

/// A write stream opened via [`FileSystem::create_write_stream`], carrying
/// the existing file content it will be finalized against on close.
pub struct WriteStreamHandle {
    path: String,
    inner: stream::WriteStream,
    existing: Option<Vec<u8>>,
    mode: Option<u32>,
    tier: Option<Tier>,
}

/// The virtual filesystem: a single struct aggregating every subsystem,
/// constructed once per engine instance and shared behind an `Arc` by callers
/// that need concurrent access.
pub struct FileSystem {
    metadata: MetadataStore,
    cas: Arc<CasEngine>,
    tier_router: TierRouter,
    extents: Arc<ExtentLayer>,
    vfs: VfsShim,
    watch_hub: WatchHub,
    config: EngineConfig,
}

impl FileSystem {
    pub fn new(config: EngineConfig, base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let now = now_ms();
        let root = Inode::new(ROOT_ID, EntryType::Directory, 0o755, 0, 0, now);
        let metadata = MetadataStore::new(root);
        let cas = Arc::new(CasEngine::new(base.join(&config.cas_root), config.cas_compression, HashAlgo::Sha256));
        let tier_router = TierRouter::new(&config, &base);
        let extents = Arc::new(ExtentLayer::new(&config, &base));
        let vfs = VfsShim::new(extents.clone(), config.vfs_lock_timeout_ms);
        Self { metadata, cas, tier_router, extents, vfs, watch_hub: WatchHub::new(), config }
    }

    pub fn vfs(&self) -> &VfsShim {
        &self.vfs
    }

    pub fn extents(&self) -> &ExtentLayer {
        &self.extents
    }

    pub fn cas(&self) -> &CasEngine {
        &self.cas
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn load_content(&self, inode: &Inode) -> FsResult<Vec<u8>> {
        match (&inode.blob_ref, inode.tier) {
            (Some(blob), Some(tier)) => self.tier_router.read(&blob.id, tier).await,
            _ => Ok(Vec::new()),
        }
    }

    async fn store_content(&self, bytes: &[u8], tier_override: Option<Tier>) -> FsResult<BlobRef> {
        let hash = self.cas.put(bytes, CasObjectType::Blob).await?;
        let tier = tier_override.unwrap_or_else(|| self.tier_router.classify(bytes.len() as u64));
        self.tier_router.write(&hash, tier, bytes).await?;
        Ok(BlobRef { id: hash.clone(), tier, size: bytes.len() as u64, checksum: hash })
    }

    async fn create_dir_entry(&self, path: &str, mode: u32) -> FsResult<()> {
        let now = now_ms();
        let id = self.metadata.alloc_id();
        let inode = Inode::new(id, EntryType::Directory, mode, 0, 0, now);
        self.metadata.put(path, id, inode).await;
        let (parent, _) = crate::path::split(path);
        self.metadata.update(&parent, |p| p.nlink += 1).await?;
        Ok(())
    }

    /// Remove a single path's directory entry, decrementing the parent's
    /// `nlink` when the removed entry was itself a directory.
    async fn remove_entry(&self, path: &str) -> FsResult<Inode> {
        let removed = self.metadata.remove(path).await?;
        if removed.is_dir() {
            let (parent, _) = crate::path::split(path);
            if self.metadata.has(&parent).await {
                let _ = self.metadata.update(&parent, |p| {
                    if p.nlink > 0 {
                        p.nlink -= 1;
                    }
                }).await;
            }
        }
        Ok(removed)
    }

    // ---- stat / metadata ------------------------------------------------

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn stat(&self, path: &str) -> FsResult<Stats> {
        require_absolute(path, "stat")?;
        let norm = crate::path::normalize(path);
        let resolved = resolver::resolve(&self.metadata, &norm.path, true, self.config.symlink_budget, "stat").await?;
        if norm.had_trailing_slash && !resolved.inode.is_dir() {
            return Err(FsError::not_dir("stat", norm.path));
        }
        let now = now_ms();
        let _ = self.metadata.update(&resolved.path, |i| i.touch_atime(now)).await;
        Ok(Stats::from_inode(resolved.id, &resolved.inode))
    }

    pub async fn lstat(&self, path: &str) -> FsResult<Stats> {
        require_absolute(path, "lstat")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, false, self.config.symlink_budget, "lstat").await?;
        Ok(Stats::from_inode(resolved.id, &resolved.inode))
    }

    pub async fn exists(&self, path: &str) -> bool {
        if !path::is_absolute(path) {
            return false;
        }
        self.stat(path).await.is_ok()
    }

    pub async fn access(&self, path: &str, mode: Option<u32>) -> FsResult<()> {
        require_absolute(path, "access")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, true, self.config.symlink_budget, "access").await?;
        if let Some(m) = mode {
            if resolved.inode.mode & m != m {
                return Err(FsError::new(FsErrorKind::EAccess).with_syscall("access").with_path(norm));
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.chmod_inner(path, mode, true, "chmod").await
    }

    pub async fn lchmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.chmod_inner(path, mode, false, "lchmod").await
    }

    async fn chmod_inner(&self, path: &str, mode: u32, follow: bool, syscall: &'static str) -> FsResult<()> {
        require_absolute(path, syscall)?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, follow, self.config.symlink_budget, syscall).await?;
        let now = now_ms();
        self.metadata
            .update(&resolved.path, |i| {
                i.mode = (i.mode & !0o7777) | (mode & 0o7777);
                i.touch_ctime(now);
            })
            .await?;
        self.watch_hub.emit(WatchEventKind::Change, &resolved.path);
        Ok(())
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.chown_inner(path, uid, gid, true, "chown").await
    }

    pub async fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.chown_inner(path, uid, gid, false, "lchown").await
    }

    async fn chown_inner(&self, path: &str, uid: u32, gid: u32, follow: bool, syscall: &'static str) -> FsResult<()> {
        require_absolute(path, syscall)?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, follow, self.config.symlink_budget, syscall).await?;
        let now = now_ms();
        self.metadata
            .update(&resolved.path, |i| {
                i.uid = uid;
                i.gid = gid;
                i.touch_ctime(now);
            })
            .await?;
        self.watch_hub.emit(WatchEventKind::Change, &resolved.path);
        Ok(())
    }

    pub async fn utimes(&self, path: &str, atime: i64, mtime: i64) -> FsResult<()> {
        self.utimes_inner(path, atime, mtime, true, "utimes").await
    }

    pub async fn lutimes(&self, path: &str, atime: i64, mtime: i64) -> FsResult<()> {
        self.utimes_inner(path, atime, mtime, false, "lutimes").await
    }

    async fn utimes_inner(
        &self,
        path: &str,
        atime: i64,
        mtime: i64,
        follow: bool,
        syscall: &'static str,
    ) -> FsResult<()> {
        require_absolute(path, syscall)?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, follow, self.config.symlink_budget, syscall).await?;
        let a = normalize_to_ms(atime);
        let m = normalize_to_ms(mtime);
        let now = now_ms();
        self.metadata
            .update(&resolved.path, |i| {
                i.times.atime_ms = a;
                i.times.mtime_ms = m;
                i.times.ctime_ms = now;
            })
            .await?;
        self.watch_hub.emit(WatchEventKind::Change, &resolved.path);
        Ok(())
    }

    // ---- symlinks / hard links ------------------------------------------

    pub async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        require_absolute(path, "symlink")?;
        let norm = crate::path::normalize(path).path;
        if self.metadata.has(&norm).await {
            return Err(FsError::exist("symlink", norm));
        }
        let (parent, _) = crate::path::split(&norm);
        let parent_inode = self.metadata.get(&parent).await.ok_or_else(|| FsError::no_ent("symlink", norm.clone()))?;
        if !parent_inode.is_dir() {
            return Err(FsError::not_dir("symlink", parent));
        }
        let now = now_ms();
        let id = self.metadata.alloc_id();
        let mut inode = Inode::new(id, EntryType::Symlink, 0o777, 0, 0, now);
        inode.size = target.len() as u64;
        inode.link_target = Some(target.to_string());
        self.metadata.put(&norm, id, inode).await;
        self.watch_hub.emit(WatchEventKind::Rename, &norm);
        Ok(())
    }

    pub async fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        require_absolute(existing, "link")?;
        require_absolute(new_path, "link")?;
        let new_norm = crate::path::normalize(new_path).path;
        if self.metadata.has(&new_norm).await {
            return Err(FsError::exist("link", new_norm));
        }
        let resolved = resolver::resolve(&self.metadata, existing, true, self.config.symlink_budget, "link").await?;
        if resolved.inode.is_dir() {
            return Err(FsError::new(FsErrorKind::EPerm).with_syscall("link").with_path(existing));
        }
        let (parent, _) = crate::path::split(&new_norm);
        let parent_inode =
            self.metadata.get(&parent).await.ok_or_else(|| FsError::no_ent("link", new_norm.clone()))?;
        if !parent_inode.is_dir() {
            return Err(FsError::not_dir("link", parent));
        }
        let now = now_ms();
        self.metadata
            .update(&resolved.path, |i| {
                i.nlink += 1;
                i.touch_ctime(now);
            })
            .await?;
        self.metadata.bind(&new_norm, resolved.id).await;
        self.watch_hub.emit(WatchEventKind::Rename, &new_norm);
        Ok(())
    }

    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        require_absolute(path, "readlink")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, false, self.config.symlink_budget, "readlink").await?;
        if !resolved.inode.is_symlink() {
            return Err(FsError::inval("readlink", norm));
        }
        Ok(resolved.inode.link_target.clone().unwrap_or_default())
    }

    pub async fn realpath(&self, path: &str) -> FsResult<String> {
        require_absolute(path, "realpath")?;
        let resolved = resolver::resolve(&self.metadata, path, true, self.config.symlink_budget, "realpath").await?;
        Ok(resolved.path)
    }

    // ---- directory tree ---------------------------------------------------

    /// Create a directory. In recursive mode, returns the first path segment
    /// that had to be created (or `None` if the directory already existed).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mkdir(&self, path: &str, recursive: bool, mode: u32) -> FsResult<Option<String>> {
        require_absolute(path, "mkdir")?;
        let norm = crate::path::normalize(path).path;
        if let Some(inode) = self.metadata.get(&norm).await {
            if inode.is_dir() {
                return if recursive { Ok(None) } else { Err(FsError::exist("mkdir", norm)) };
            }
            return Err(FsError::exist("mkdir", norm));
        }

        if !recursive {
            let (parent, _) = crate::path::split(&norm);
            let parent_inode =
                self.metadata.get(&parent).await.ok_or_else(|| FsError::no_ent("mkdir", norm.clone()))?;
            if !parent_inode.is_dir() {
                return Err(FsError::not_dir("mkdir", parent));
            }
            self.create_dir_entry(&norm, mode).await?;
            self.watch_hub.emit(WatchEventKind::Rename, &norm);
            return Ok(Some(norm));
        }

        let segments: Vec<&str> = norm.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = String::from("/");
        let mut first_created: Option<String> = None;
        for seg in segments {
            let next = crate::path::join(&current, seg);
            if !self.metadata.has(&next).await {
                self.create_dir_entry(&next, mode).await?;
                self.watch_hub.emit(WatchEventKind::Rename, &next);
                if first_created.is_none() {
                    first_created = Some(next.clone());
                }
            } else {
                let inode = self.metadata.get(&next).await.expect("just checked has()");
                if !inode.is_dir() {
                    return Err(FsError::not_dir("mkdir", next));
                }
            }
            current = next;
        }
        Ok(first_created)
    }

    pub async fn rmdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        require_absolute(path, "rmdir")?;
        let norm = crate::path::normalize(path).path;
        let inode = self.metadata.get(&norm).await.ok_or_else(|| FsError::no_ent("rmdir", norm.clone()))?;
        if !inode.is_dir() {
            return Err(FsError::not_dir("rmdir", norm));
        }
        if recursive {
            for descendant in self.metadata.descendants_of(&norm).await {
                self.remove_entry(&descendant).await?;
            }
            self.remove_entry(&norm).await?;
        } else {
            if !self.metadata.is_dir_empty(&norm).await {
                return Err(FsError::not_empty("rmdir", norm));
            }
            self.remove_entry(&norm).await?;
        }
        self.watch_hub.emit(WatchEventKind::Rename, &norm);
        Ok(())
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        require_absolute(path, "unlink")?;
        let norm = crate::path::normalize(path).path;
        let inode = self.metadata.get(&norm).await.ok_or_else(|| FsError::no_ent("unlink", norm.clone()))?;
        if inode.is_dir() {
            return Err(FsError::is_dir("unlink", norm));
        }
        self.remove_entry(&norm).await?;
        self.watch_hub.emit(WatchEventKind::Rename, &norm);
        Ok(())
    }

    /// Remove a path regardless of kind: directories recurse per `recursive`,
    /// everything else is unlinked.
    pub async fn rm(&self, path: &str, recursive: bool) -> FsResult<()> {
        require_absolute(path, "rm")?;
        let norm = crate::path::normalize(path).path;
        let inode = self.metadata.get(&norm).await.ok_or_else(|| FsError::no_ent("rm", norm.clone()))?;
        if inode.is_dir() {
            self.rmdir(&norm, recursive).await
        } else {
            self.unlink(&norm).await
        }
    }

    pub async fn readdir(&self, path: &str, opts: ReaddirOptions) -> FsResult<Vec<DirEntry>> {
        require_absolute(path, "readdir")?;
        let norm = crate::path::normalize(path).path;
        let dir_inode = self.metadata.get(&norm).await.ok_or_else(|| FsError::no_ent("readdir", norm.clone()))?;
        if !dir_inode.is_dir() {
            return Err(FsError::not_dir("readdir", norm));
        }
        let mut out = Vec::new();
        self.collect_dir(&norm, &opts, 0, &mut out).await?;
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn collect_dir<'a>(
        &'a self,
        dir: &'a str,
        opts: &'a ReaddirOptions,
        depth: u32,
        out: &'a mut Vec<DirEntry>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = FsResult<()>> + Send + 'a>> {
        Box::pin(async move {
            for (name, id) in self.metadata.children_of(dir).await {
                let inode = self.metadata.get_by_id(id).await.expect("child inode present");
                let child_path = crate::path::join(dir, &name);
                let is_dir = inode.is_dir();
                let stats = if opts.with_stats { Some(Stats::from_inode(id, &inode)) } else { None };
                out.push(DirEntry { name, path: child_path.clone(), entry_type: inode.entry_type, stats });
                if opts.recursive && is_dir {
                    let next_depth = depth + 1;
                    if opts.max_depth.map(|m| next_depth <= m).unwrap_or(true) {
                        self.collect_dir(&child_path, opts, next_depth, out).await?;
                    }
                }
            }
            Ok(())
        })
    }

    // ---- content: whole-buffer read/write -------------------------------

    #[tracing::instrument(level = "debug", skip(self, opts))]
    pub async fn read(&self, path: &str, opts: ReadOptions) -> FsResult<Vec<u8>> {
        require_absolute(path, "read")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, true, self.config.symlink_budget, "read").await?;
        if resolved.inode.is_dir() {
            return Err(FsError::is_dir("read", norm));
        }
        if opts.signal.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
            return Err(FsError::inval("read", norm));
        }
        let bytes = self.load_content(&resolved.inode).await?;
        let size = bytes.len() as u64;
        let start = opts.start.unwrap_or(0);
        let end = opts.end.map(|e| e.min(size.saturating_sub(1))).unwrap_or_else(|| size.saturating_sub(1));
        if size > 0 && start > end {
            return Err(FsError::inval("read", norm));
        }
        let now = now_ms();
        let _ = self.metadata.update(&resolved.path, |i| i.touch_atime(now)).await;
        if size == 0 {
            return Ok(Vec::new());
        }
        Ok(bytes[start as usize..=(end as usize)].to_vec())
    }

    #[tracing::instrument(level = "debug", skip(self, data, opts))]
    pub async fn write(&self, path: &str, data: &[u8], opts: WriteOptions) -> FsResult<u64> {
        require_absolute(path, "write")?;
        let norm = crate::path::normalize(path).path;
        if opts.signal.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
            return Err(FsError::inval("write", norm));
        }
        let (parent, _) = crate::path::split(&norm);
        if !self.metadata.has(&parent).await {
            return Err(FsError::no_ent("write", norm));
        }
        let existing = self.metadata.get(&norm).await;
        if let Some(inode) = &existing {
            if inode.is_dir() {
                return Err(FsError::is_dir("write", norm));
            }
        }
        if matches!(opts.flag, WriteFlag::ExclusiveWrite | WriteFlag::ExclusiveAppend) && existing.is_some() {
            return Err(FsError::exist("write", norm));
        }
        let existing_bytes = match &existing {
            Some(inode) => Some(self.load_content(inode).await?),
            None => None,
        };

        let mut write_stream = stream::WriteStream::new(opts.flag, opts.start, opts.signal.clone().unwrap_or_default());
        write_stream.open();
        write_stream.write(data)?;
        let finalized = write_stream.finalize(existing_bytes)?;

        let blob_ref = self.store_content(&finalized, opts.tier).await?;
        let now = now_ms();
        let id = match &existing {
            Some(inode) => inode.id,
            None => self.metadata.alloc_id(),
        };
        let mut inode =
            existing.unwrap_or_else(|| Inode::new(id, EntryType::Regular, opts.mode.unwrap_or(0o644), 0, 0, now));
        inode.size = blob_ref.size;
        inode.tier = Some(blob_ref.tier);
        inode.blob_ref = Some(blob_ref);
        inode.touch_mtime(now);
        self.metadata.put(&norm, id, inode).await;
        self.watch_hub.emit(WatchEventKind::Change, &norm);
        Ok(data.len() as u64)
    }

    pub async fn append(&self, path: &str, data: &[u8]) -> FsResult<u64> {
        self.write(path, data, WriteOptions { flag: WriteFlag::Append, ..Default::default() }).await
    }

    pub async fn copy_file(&self, src: &str, dest: &str) -> FsResult<()> {
        let bytes = self.read(src, ReadOptions::default()).await?;
        self.write(dest, &bytes, WriteOptions::default()).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn truncate(&self, path: &str, length: u64) -> FsResult<()> {
        require_absolute(path, "truncate")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, true, self.config.symlink_budget, "truncate").await?;
        if resolved.inode.is_dir() {
            return Err(FsError::is_dir("truncate", norm));
        }
        let mut bytes = self.load_content(&resolved.inode).await?;
        bytes.resize(length as usize, 0);
        let blob_ref = self.store_content(&bytes, None).await?;
        let now = now_ms();
        self.metadata
            .update(&resolved.path, |i| {
                i.size = blob_ref.size;
                i.tier = Some(blob_ref.tier);
                i.blob_ref = Some(blob_ref.clone());
                i.touch_mtime(now);
            })
            .await?;
        self.watch_hub.emit(WatchEventKind::Change, &resolved.path);
        Ok(())
    }

    // ---- rename -----------------------------------------------------------

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn rename(&self, src: &str, dest: &str, overwrite: bool) -> FsResult<()> {
        require_absolute(src, "rename")?;
        require_absolute(dest, "rename")?;
        let src_norm = crate::path::normalize(src).path;
        let dest_norm = crate::path::normalize(dest).path;
        if !self.metadata.has(&src_norm).await {
            return Err(FsError::no_ent("rename", src_norm));
        }
        if let Some(dest_inode) = self.metadata.get(&dest_norm).await {
            if dest_inode.is_dir() && !self.metadata.is_dir_empty(&dest_norm).await {
                return Err(FsError::not_empty("rename", dest_norm));
            }
            if !overwrite {
                return Err(FsError::exist("rename", src_norm.clone()).with_dest(dest_norm));
            }
        }
        self.metadata.rename(&src_norm, &dest_norm).await?;
        let now = now_ms();
        let _ = self.metadata.update(&dest_norm, |i| i.touch_ctime(now)).await;
        self.watch_hub.emit(WatchEventKind::Rename, &src_norm);
        self.watch_hub.emit(WatchEventKind::Rename, &dest_norm);
        Ok(())
    }

    // ---- streams ------------------------------------------------------

    pub async fn create_read_stream(&self, path: &str, opts: ReadOptions) -> FsResult<stream::ReadStream> {
        require_absolute(path, "createReadStream")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, true, self.config.symlink_budget, "createReadStream").await?;
        if resolved.inode.is_dir() {
            return Err(FsError::is_dir("createReadStream", norm));
        }
        let bytes = self.load_content(&resolved.inode).await?;
        let cancel = opts.signal.unwrap_or_default();
        let hwm = opts.high_water_mark.unwrap_or(self.config.default_high_water_mark);
        stream::ReadStream::new(bytes, opts.start, opts.end, Some(hwm), cancel)
    }

    pub async fn create_write_stream(&self, path: &str, opts: WriteOptions) -> FsResult<WriteStreamHandle> {
        require_absolute(path, "createWriteStream")?;
        let norm = crate::path::normalize(path).path;
        let (parent, _) = crate::path::split(&norm);
        if !self.metadata.has(&parent).await {
            return Err(FsError::no_ent("createWriteStream", norm));
        }
        let existing_inode = self.metadata.get(&norm).await;
        if let Some(inode) = &existing_inode {
            if inode.is_dir() {
                return Err(FsError::is_dir("createWriteStream", norm));
            }
        }
        if matches!(opts.flag, WriteFlag::ExclusiveWrite | WriteFlag::ExclusiveAppend) && existing_inode.is_some() {
            return Err(FsError::exist("createWriteStream", norm));
        }
        let existing_bytes = match &existing_inode {
            Some(inode) => Some(self.load_content(inode).await?),
            None => None,
        };
        let mut inner = stream::WriteStream::new(opts.flag, opts.start, opts.signal.unwrap_or_default());
        inner.open();
        Ok(WriteStreamHandle { path: norm, inner, existing: existing_bytes, mode: opts.mode, tier: opts.tier })
    }

    pub fn write_stream_write(&self, handle: &mut WriteStreamHandle, chunk: &[u8]) -> FsResult<()> {
        handle.inner.write(chunk)
    }

    pub fn write_stream_cancel(&self, handle: &mut WriteStreamHandle) {
        handle.inner.cancel();
    }

    /// Finalize a write stream against the content it was opened with, and
    /// persist the result exactly as [`FileSystem::write`] would.
    pub async fn write_stream_close(&self, handle: WriteStreamHandle) -> FsResult<Stats> {
        let WriteStreamHandle { path, inner, existing, mode, tier } = handle;
        let finalized = inner.finalize(existing)?;
        let blob_ref = self.store_content(&finalized, tier).await?;
        let now = now_ms();
        let existing_inode = self.metadata.get(&path).await;
        let id = match &existing_inode {
            Some(i) => i.id,
            None => self.metadata.alloc_id(),
        };
        let mut inode =
            existing_inode.unwrap_or_else(|| Inode::new(id, EntryType::Regular, mode.unwrap_or(0o644), 0, 0, now));
        inode.size = blob_ref.size;
        inode.tier = Some(blob_ref.tier);
        inode.blob_ref = Some(blob_ref);
        inode.touch_mtime(now);
        self.metadata.put(&path, id, inode.clone()).await;
        self.watch_hub.emit(WatchEventKind::Change, &path);
        Ok(Stats::from_inode(id, &inode))
    }

    // ---- open / tiers / watch ---------------------------------------------

    pub async fn open(&self, path: &str, flags: OpenFlags, mode: Option<u32>) -> FsResult<OpenFile> {
        require_absolute(path, "open")?;
        let norm = crate::path::normalize(path).path;
        let existing = self.metadata.get(&norm).await;
        if existing.is_some() && flags.create && flags.exclusive {
            return Err(FsError::exist("open", norm));
        }
        let id = match existing {
            Some(inode) => {
                if flags.truncate {
                    self.truncate(&norm, 0).await?;
                }
                inode.id
            }
            None => {
                if !flags.create {
                    return Err(FsError::no_ent("open", norm));
                }
                let (parent, _) = crate::path::split(&norm);
                let parent_inode =
                    self.metadata.get(&parent).await.ok_or_else(|| FsError::no_ent("open", norm.clone()))?;
                if !parent_inode.is_dir() {
                    return Err(FsError::not_dir("open", parent));
                }
                let now = now_ms();
                let id = self.metadata.alloc_id();
                let inode = Inode::new(id, EntryType::Regular, mode.unwrap_or(0o644), 0, 0, now);
                self.metadata.put(&norm, id, inode).await;
                self.watch_hub.emit(WatchEventKind::Rename, &norm);
                id
            }
        };
        Ok(OpenFile { id, path: norm })
    }

    pub fn watch(&self, path: &str, recursive: bool) -> Watcher {
        self.watch_hub.watch(path, recursive)
    }

    pub async fn promote(&self, path: &str, target: Tier) -> FsResult<()> {
        self.move_tier(path, target, true, "promote").await
    }

    pub async fn demote(&self, path: &str, target: Tier) -> FsResult<()> {
        self.move_tier(path, target, false, "demote").await
    }

    async fn move_tier(&self, path: &str, target: Tier, promoting: bool, syscall: &'static str) -> FsResult<()> {
        require_absolute(path, syscall)?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, true, self.config.symlink_budget, syscall).await?;
        let blob = resolved.inode.blob_ref.clone().ok_or_else(|| FsError::inval(syscall, norm.clone()))?;
        let current = resolved.inode.tier.ok_or_else(|| FsError::inval(syscall, norm.clone()))?;
        if promoting {
            self.tier_router.promote(&blob.id, current, target).await?;
        } else {
            self.tier_router.demote(&blob.id, current, target).await?;
        }
        self.metadata
            .update(&resolved.path, |i| {
                if let Some(b) = &mut i.blob_ref {
                    b.tier = target;
                }
                i.tier = Some(target);
            })
            .await?;
        Ok(())
    }

    pub async fn get_tier(&self, path: &str) -> FsResult<Tier> {
        require_absolute(path, "getTier")?;
        let norm = crate::path::normalize(path).path;
        let resolved = resolver::resolve(&self.metadata, &norm, true, self.config.symlink_budget, "getTier").await?;
        resolved.inode.tier.ok_or_else(|| FsError::inval("getTier", norm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fs_at(dir: &std::path::Path) -> FileSystem {
        crate::init_tracing();
        FileSystem::new(EngineConfig::default(), dir)
    }

    #[tokio::test]
    async fn mkdir_recursive_returns_first_created_segment() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.mkdir("/home/user", false, 0o755).await.unwrap_err(); // no /home yet
        fs.mkdir("/home", false, 0o755).await.unwrap();
        fs.mkdir("/home/user", false, 0o755).await.unwrap();

        let first = fs.mkdir("/home/user/a/b/c", true, 0o750).await.unwrap();
        assert_eq!(first, Some("/home/user/a".to_string()));
        assert!(fs.stat("/home/user/a/b/c").await.unwrap().is_directory());
        assert_eq!(fs.stat("/home/user/a/b/c").await.unwrap().mode, 0o750);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f.txt", b"hello world", WriteOptions::default()).await.unwrap();
        let bytes = fs.read("/f.txt", ReadOptions::default()).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn stat_and_lstat_agree_on_symlink_target_but_differ_in_type() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/real.txt", b"data", WriteOptions::default()).await.unwrap();
        fs.symlink("/real.txt", "/link.txt").await.unwrap();

        let lstat = fs.lstat("/link.txt").await.unwrap();
        assert!(lstat.is_symbolic_link());

        let stat = fs.stat("/link.txt").await.unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.size, 4);
    }

    #[tokio::test]
    async fn chmod_updates_permission_bits_and_touches_ctime_only() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f", b"x", WriteOptions::default()).await.unwrap();
        let before = fs.stat("/f").await.unwrap();
        fs.chmod("/f", 0o600).await.unwrap();
        let after = fs.stat("/f").await.unwrap();
        assert_eq!(after.mode, 0o600);
        assert_eq!(after.mtime_ms, before.mtime_ms);
    }

    #[tokio::test]
    async fn utimes_sets_atime_and_mtime_explicitly() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f", b"x", WriteOptions::default()).await.unwrap();
        fs.utimes("/f", 1_700_000_000, 1_700_000_000).await.unwrap();
        let stats = fs.stat("/f").await.unwrap();
        assert_eq!(stats.atime_ms, 1_700_000_000_000);
        assert_eq!(stats.mtime_ms, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn truncate_extends_with_zeros_then_shrinks() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f", b"abc", WriteOptions::default()).await.unwrap();
        fs.truncate("/f", 5).await.unwrap();
        assert_eq!(fs.read("/f", ReadOptions::default()).await.unwrap(), vec![b'a', b'b', b'c', 0, 0]);
        fs.truncate("/f", 1).await.unwrap();
        assert_eq!(fs.read("/f", ReadOptions::default()).await.unwrap(), vec![b'a']);
    }

    #[tokio::test]
    async fn rename_without_overwrite_rejects_existing_destination() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/a", b"1", WriteOptions::default()).await.unwrap();
        fs.write("/b", b"2", WriteOptions::default()).await.unwrap();
        let err = fs.rename("/a", "/b", false).await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::EExist);

        fs.rename("/a", "/b", true).await.unwrap();
        assert!(!fs.exists("/a").await);
        assert_eq!(fs.read("/b", ReadOptions::default()).await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn readdir_lists_direct_children_with_stats() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.mkdir("/d", false, 0o755).await.unwrap();
        fs.write("/d/a", b"1", WriteOptions::default()).await.unwrap();
        fs.write("/d/b", b"22", WriteOptions::default()).await.unwrap();

        let entries = fs.readdir("/d", ReaddirOptions { with_stats: true, ..Default::default() }).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "a" && e.stats.as_ref().unwrap().size == 1));
    }

    #[tokio::test]
    async fn promote_then_demote_round_trips_tier() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f", b"small", WriteOptions::default()).await.unwrap();
        assert_eq!(fs.get_tier("/f").await.unwrap(), Tier::Hot);

        fs.demote("/f", Tier::Cold).await.unwrap();
        assert_eq!(fs.get_tier("/f").await.unwrap(), Tier::Cold);
        assert_eq!(fs.read("/f", ReadOptions::default()).await.unwrap(), b"small");

        fs.promote("/f", Tier::Hot).await.unwrap();
        assert_eq!(fs.get_tier("/f").await.unwrap(), Tier::Hot);
    }

    #[tokio::test]
    async fn open_create_exclusive_conflicts_with_existing_file() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f", b"x", WriteOptions::default()).await.unwrap();
        let err = fs.open("/f", OpenFlags { create: true, exclusive: true, ..Default::default() }, None).await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::EExist);
    }

    #[tokio::test]
    async fn watch_observes_change_event_after_write() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/f", b"initial", WriteOptions::default()).await.unwrap();
        let mut watcher = fs.watch("/f", false);
        fs.write("/f", b"updated", WriteOptions::default()).await.unwrap();
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.path, "/f");
    }

    #[tokio::test]
    async fn write_stream_close_persists_finalized_content() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        let mut handle = fs.create_write_stream("/f", WriteOptions::default()).await.unwrap();
        fs.write_stream_write(&mut handle, b"hello ").unwrap();
        fs.write_stream_write(&mut handle, b"world").unwrap();
        let stats = fs.write_stream_close(handle).await.unwrap();
        assert_eq!(stats.size, 11);
        assert_eq!(fs.read("/f", ReadOptions::default()).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn rmdir_recursive_removes_subtree() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.mkdir("/d/sub", true, 0o755).await.unwrap();
        fs.write("/d/sub/f", b"x", WriteOptions::default()).await.unwrap();

        let err = fs.rmdir("/d", false).await.unwrap_err();
        assert_eq!(err.kind, FsErrorKind::ENotEmpty);

        fs.rmdir("/d", true).await.unwrap();
        assert!(!fs.exists("/d").await);
    }

    #[tokio::test]
    async fn link_creates_second_name_for_same_content() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path());
        fs.write("/a", b"shared", WriteOptions::default()).await.unwrap();
        fs.link("/a", "/b").await.unwrap();
        assert_eq!(fs.read("/b", ReadOptions::default()).await.unwrap(), b"shared");
        assert_eq!(fs.stat("/a").await.unwrap().nlink, 2);

        fs.unlink("/a").await.unwrap();
        assert_eq!(fs.read("/b", ReadOptions::default()).await.unwrap(), b"shared");
    }
}
