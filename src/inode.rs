//! The identity record for a filesystem object, and the handful of value
//! types it is built from.

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, stable-across-renames inode identifier.
pub type InodeId = u64;

/// Discriminates what kind of filesystem object an inode represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntryType {
    Regular,
    Directory,
    Symlink,
    Fifo,
    Socket,
    Block,
    Character,
}

/// Storage tier a regular file's content currently lives in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

/// Locates a blob's content: which tier, how big, and its content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub id: String,
    pub tier: Tier,
    pub size: u64,
    pub checksum: String,
}

/// Four POSIX timestamps, all in milliseconds since the Unix epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Timestamps {
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
}

/// The unit of identity for a filesystem object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Inode {
    pub id: InodeId,
    pub entry_type: EntryType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub times: Timestamps,
    pub link_target: Option<String>,
    pub blob_ref: Option<BlobRef>,
    pub tier: Option<Tier>,
}

impl Inode {
    /// Construct a new inode at the given timestamp (ms since epoch), honoring
    /// the invariant that a directory's starting `nlink` is 2 and every other
    /// kind starts at 1.
    pub fn new(id: InodeId, entry_type: EntryType, mode: u32, uid: u32, gid: u32, now_ms: i64) -> Self {
        let nlink = if entry_type == EntryType::Directory { 2 } else { 1 };
        Self {
            id,
            entry_type,
            mode,
            uid,
            gid,
            size: 0,
            nlink,
            times: Timestamps {
                atime_ms: now_ms,
                mtime_ms: now_ms,
                ctime_ms: now_ms,
                birthtime_ms: now_ms,
            },
            link_target: None,
            blob_ref: None,
            tier: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type == EntryType::Symlink
    }

    /// Touch `ctime` only, for `chmod`/`chown`-style metadata mutations.
    pub fn touch_ctime(&mut self, now_ms: i64) {
        self.times.ctime_ms = now_ms;
    }

    /// Touch `mtime` and `ctime`, for content mutations.
    pub fn touch_mtime(&mut self, now_ms: i64) {
        self.times.mtime_ms = now_ms;
        self.times.ctime_ms = now_ms;
    }

    /// Touch `atime` only, for reads under atime tracking.
    pub fn touch_atime(&mut self, now_ms: i64) {
        self.times.atime_ms = now_ms;
    }
}

/// Monotonic allocator for inode identifiers, starting above the root.
#[derive(Debug, Default)]
pub struct InodeIdAllocator {
    next: AtomicU64,
}

pub const ROOT_ID: InodeId = 1;

impl InodeIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(ROOT_ID + 1) }
    }

    pub fn alloc(&self) -> InodeId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
