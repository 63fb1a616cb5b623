//! Synchronous-looking SQLite-compatible VFS over the async extent layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::extent::ExtentLayer;

/// Interval between retries while a lock acquisition is blocked on a
/// conflicting reservation.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// SQLite integer status codes this shim can return.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SqliteStatus {
    Ok,
    IoErr,
    IoErrShortRead,
    IoErrWrite,
    IoErrTruncate,
    IoErrFsync,
    CantOpen,
    ReadOnly,
    Misuse,
    Busy,
    Locked,
}

impl SqliteStatus {
    pub fn code(self) -> i32 {
        match self {
            SqliteStatus::Ok => 0,
            SqliteStatus::IoErr => 10,
            SqliteStatus::IoErrShortRead => (10 | (2 << 8)),
            SqliteStatus::IoErrWrite => (10 | (3 << 8)),
            SqliteStatus::IoErrTruncate => (10 | (9 << 8)),
            SqliteStatus::IoErrFsync => (10 | (4 << 8)),
            SqliteStatus::CantOpen => 14,
            SqliteStatus::ReadOnly => 8,
            SqliteStatus::Misuse => 21,
            SqliteStatus::Busy => 5,
            SqliteStatus::Locked => 6,
        }
    }
}

/// SQLite lock levels, linearly ordered NONE < SHARED < RESERVED < PENDING < EXCLUSIVE.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockLevel {
    None = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

pub const SQLITE_OPEN_READONLY: u32 = 0x01;
pub const SQLITE_OPEN_READWRITE: u32 = 0x02;
pub const SQLITE_OPEN_CREATE: u32 = 0x04;
pub const SQLITE_OPEN_DELETEONCLOSE: u32 = 0x08;
pub const SQLITE_OPEN_EXCLUSIVE: u32 = 0x10;
pub const SQLITE_OPEN_MAIN_DB: u32 = 0x100;
pub const SQLITE_OPEN_MAIN_JOURNAL: u32 = 0x800;
pub const SQLITE_OPEN_WAL: u32 = 0x80000;

const DEVICE_ATOMIC_4K: u32 = 1 << 0;
const DEVICE_SAFE_APPEND: u32 = 1 << 1;
const DEVICE_SEQUENTIAL: u32 = 1 << 2;
const DEVICE_POWERSAFE_OVERWRITE: u32 = 1 << 3;

#[derive(Debug, Clone)]
struct VfsHandle {
    id: u64,
    file_id: u64,
    flags: u32,
    delete_on_close: bool,
    lock_level: LockLevel,
}

/// The synchronous-interface adapter letting a SQLite implementation use the
/// extent layer as its file store.
pub struct VfsShim {
    extents: Arc<ExtentLayer>,
    handles: RwLock<HashMap<u64, VfsHandle>>,
    next_handle: AtomicU64,
    deleted_files: RwLock<std::collections::HashSet<u64>>,
    lock_timeout: Duration,
}

impl VfsShim {
    /// `lock_timeout_ms` bounds how long [`VfsShim::x_lock`] retries a
    /// conflicting escalation before giving up with `BUSY`; pass
    /// `config.vfs_lock_timeout_ms`.
    pub fn new(extents: Arc<ExtentLayer>, lock_timeout_ms: u64) -> Self {
        Self {
            extents,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            deleted_files: RwLock::new(std::collections::HashSet::new()),
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        }
    }

    pub async fn x_open(&self, file_id: u64, flags: u32) -> (SqliteStatus, Option<u64>) {
        if flags & SQLITE_OPEN_READWRITE == 0 && flags & SQLITE_OPEN_READONLY == 0 {
            return (SqliteStatus::CantOpen, None);
        }
        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = VfsHandle {
            id: handle_id,
            file_id,
            flags,
            delete_on_close: flags & SQLITE_OPEN_DELETEONCLOSE != 0,
            lock_level: LockLevel::None,
        };
        self.handles.write().await.insert(handle_id, handle);
        (SqliteStatus::Ok, Some(handle_id))
    }

    pub async fn x_close(&self, handle_id: u64) -> SqliteStatus {
        let removed = self.handles.write().await.remove(&handle_id);
        match removed {
            Some(h) if h.delete_on_close => {
                self.deleted_files.write().await.insert(h.file_id);
                SqliteStatus::Ok
            }
            Some(_) => SqliteStatus::Ok,
            None => SqliteStatus::Misuse,
        }
    }

    /// Read `buf.len()` bytes starting at `offset`, iterating pages and
    /// zero-filling holes. A read whose end extends past the file's logical
    /// size returns `IOERR_SHORT_READ` after zero-filling the remainder.
    pub async fn x_read(&self, handle_id: u64, offset: u64, buf: &mut [u8]) -> SqliteStatus {
        let Some(h) = self.handles.read().await.get(&handle_id).cloned() else {
            return SqliteStatus::Misuse;
        };
        let page_size = self.extents.page_size() as u64;
        let file_size = self.extents.get_file_size(h.file_id).await;

        let mut filled = 0usize;
        let mut cur = offset;
        while filled < buf.len() {
            let page_number = cur / page_size;
            let offset_in_page = (cur % page_size) as usize;
            let page = match self.extents.read_page(h.file_id, page_number).await {
                Ok(p) => p,
                Err(_) => return SqliteStatus::IoErr,
            };
            let avail = page.len() - offset_in_page;
            let want = (buf.len() - filled).min(avail);
            buf[filled..filled + want].copy_from_slice(&page[offset_in_page..offset_in_page + want]);
            filled += want;
            cur += want as u64;
        }

        if offset + buf.len() as u64 > file_size {
            SqliteStatus::IoErrShortRead
        } else {
            SqliteStatus::Ok
        }
    }

    /// Write `data` at `offset`, performing per-page read-modify-write.
    pub async fn x_write(&self, handle_id: u64, offset: u64, data: &[u8]) -> SqliteStatus {
        let Some(h) = self.handles.read().await.get(&handle_id).cloned() else {
            return SqliteStatus::Misuse;
        };
        let page_size = self.extents.page_size() as u64;
        let mut written = 0usize;
        let mut cur = offset;
        while written < data.len() {
            let page_number = cur / page_size;
            let offset_in_page = (cur % page_size) as u32;
            let remaining_in_page = page_size - offset_in_page as u64;
            let take = (data.len() - written).min(remaining_in_page as usize);
            let chunk = &data[written..written + take];
            if self.extents.write_page(h.file_id, page_number, offset_in_page, chunk).await.is_err() {
                return SqliteStatus::IoErrWrite;
            }
            written += take;
            cur += take as u64;
        }
        let new_size = offset + data.len() as u64;
        let cur_size = self.extents.get_file_size(h.file_id).await;
        if new_size > cur_size {
            self.extents.set_file_size(h.file_id, new_size).await;
        }
        SqliteStatus::Ok
    }

    pub async fn x_truncate(&self, handle_id: u64, size: u64) -> SqliteStatus {
        let Some(h) = self.handles.read().await.get(&handle_id).cloned() else {
            return SqliteStatus::Misuse;
        };
        match self.extents.truncate(h.file_id, size).await {
            Ok(()) => SqliteStatus::Ok,
            Err(_) => SqliteStatus::IoErrTruncate,
        }
    }

    pub async fn x_sync(&self, handle_id: u64) -> SqliteStatus {
        if !self.handles.read().await.contains_key(&handle_id) {
            return SqliteStatus::Misuse;
        }
        match self.extents.flush().await {
            Ok(()) => SqliteStatus::Ok,
            Err(_) => SqliteStatus::IoErrFsync,
        }
    }

    pub async fn x_file_size(&self, handle_id: u64) -> (SqliteStatus, u64) {
        let Some(h) = self.handles.read().await.get(&handle_id).cloned() else {
            return (SqliteStatus::Misuse, 0);
        };
        (SqliteStatus::Ok, self.extents.get_file_size(h.file_id).await)
    }

    /// Escalate this handle's lock to `target`, transiting intermediate
    /// levels implicitly. Escalating past SHARED conflicts with another
    /// handle already holding RESERVED or higher on the same file; this
    /// retries the escalation until `lock_timeout` elapses before giving up
    /// with `BUSY`, the same wait-then-fail contract SQLite expects from a
    /// VFS lock.
    pub async fn x_lock(&self, handle_id: u64, target: LockLevel) -> SqliteStatus {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            {
                let mut handles = self.handles.write().await;
                let Some(this) = handles.get(&handle_id).cloned() else { return SqliteStatus::Misuse };
                if target as u8 <= this.lock_level as u8 {
                    return SqliteStatus::Ok;
                }
                let conflict = target >= LockLevel::Reserved
                    && handles.values().any(|other| {
                        other.id != handle_id && other.file_id == this.file_id && other.lock_level >= LockLevel::Reserved
                    });
                if !conflict {
                    if let Some(h) = handles.get_mut(&handle_id) {
                        h.lock_level = target;
                    }
                    return SqliteStatus::Ok;
                }
            }
            if Instant::now() >= deadline {
                return SqliteStatus::Busy;
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL.min(self.lock_timeout)).await;
        }
    }

    pub async fn x_unlock(&self, handle_id: u64, target: LockLevel) -> SqliteStatus {
        let mut handles = self.handles.write().await;
        let Some(h) = handles.get_mut(&handle_id) else { return SqliteStatus::Misuse };
        if target as u8 > h.lock_level as u8 {
            return SqliteStatus::Misuse;
        }
        h.lock_level = target;
        SqliteStatus::Ok
    }

    pub async fn x_check_reserved_lock(&self, handle_id: u64) -> (SqliteStatus, bool) {
        let handles = self.handles.read().await;
        let Some(this) = handles.get(&handle_id) else { return (SqliteStatus::Misuse, false) };
        let held = handles
            .values()
            .any(|other| other.id != handle_id && other.file_id == this.file_id && other.lock_level >= LockLevel::Reserved);
        (SqliteStatus::Ok, held)
    }

    pub fn x_sector_size(&self) -> u32 {
        self.extents.page_size()
    }

    pub fn x_device_characteristics(&self) -> u32 {
        DEVICE_ATOMIC_4K | DEVICE_SAFE_APPEND | DEVICE_SEQUENTIAL | DEVICE_POWERSAFE_OVERWRITE
    }

    pub async fn x_access(&self, file_id: u64) -> bool {
        !self.deleted_files.read().await.contains(&file_id)
    }

    pub async fn x_delete(&self, file_id: u64) -> SqliteStatus {
        self.deleted_files.write().await.insert(file_id);
        SqliteStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::tempdir;

    async fn shim(dir: &std::path::Path) -> VfsShim {
        let mut cfg = EngineConfig::default();
        cfg.page_size = 4096;
        // Zero timeout: conflict tests below expect an immediate BUSY, not a
        // multi-second retry loop.
        VfsShim::new(Arc::new(ExtentLayer::new(&cfg, dir)), 0)
    }

    #[tokio::test]
    async fn open_then_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let shim = shim(dir.path()).await;
        let (status, handle) = shim.x_open(1, SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE).await;
        assert_eq!(status, SqliteStatus::Ok);
        let handle = handle.unwrap();

        assert_eq!(shim.x_write(handle, 0, b"hello sqlite").await, SqliteStatus::Ok);
        let mut buf = vec![0u8; 12];
        assert_eq!(shim.x_read(handle, 0, &mut buf).await, SqliteStatus::Ok);
        assert_eq!(&buf, b"hello sqlite");
    }

    #[tokio::test]
    async fn page_straddling_read_concatenates_pages() {
        let dir = tempdir().unwrap();
        let shim = shim(dir.path()).await;
        let (_, handle) = shim.x_open(1, SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE).await;
        let handle = handle.unwrap();

        let payload = vec![0xABu8; 8192];
        shim.x_write(handle, 0, &payload).await;

        let mut buf = vec![0u8; 4000];
        let status = shim.x_read(handle, 5000, &mut buf).await;
        assert_eq!(status, SqliteStatus::Ok);
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[tokio::test]
    async fn short_read_past_eof_zero_fills_and_reports() {
        let dir = tempdir().unwrap();
        let shim = shim(dir.path()).await;
        let (_, handle) = shim.x_open(1, SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE).await;
        let handle = handle.unwrap();
        shim.x_write(handle, 0, b"short").await;

        let mut buf = vec![0xFFu8; 10];
        let status = shim.x_read(handle, 0, &mut buf).await;
        assert_eq!(status, SqliteStatus::IoErrShortRead);
        assert_eq!(&buf[0..5], b"short");
        assert_eq!(&buf[5..10], &[0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn lock_escalation_conflicts_return_busy() {
        let dir = tempdir().unwrap();
        let shim = shim(dir.path()).await;
        let (_, h1) = shim.x_open(1, SQLITE_OPEN_READWRITE).await;
        let (_, h2) = shim.x_open(1, SQLITE_OPEN_READWRITE).await;
        let h1 = h1.unwrap();
        let h2 = h2.unwrap();

        assert_eq!(shim.x_lock(h1, LockLevel::Reserved).await, SqliteStatus::Ok);
        assert_eq!(shim.x_lock(h2, LockLevel::Reserved).await, SqliteStatus::Busy);
    }

    #[tokio::test]
    async fn unlock_to_none_releases_reserved_conflict() {
        let dir = tempdir().unwrap();
        let shim = shim(dir.path()).await;
        let (_, h1) = shim.x_open(1, SQLITE_OPEN_READWRITE).await;
        let (_, h2) = shim.x_open(1, SQLITE_OPEN_READWRITE).await;
        let h1 = h1.unwrap();
        let h2 = h2.unwrap();

        shim.x_lock(h1, LockLevel::Exclusive).await;
        shim.x_unlock(h1, LockLevel::None).await;
        assert_eq!(shim.x_lock(h2, LockLevel::Reserved).await, SqliteStatus::Ok);
    }

    #[tokio::test]
    async fn lock_escalation_waits_out_a_released_conflict() {
        let dir = tempdir().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.page_size = 4096;
        let shim = Arc::new(VfsShim::new(Arc::new(ExtentLayer::new(&cfg, dir.path())), 500));
        let (_, h1) = shim.x_open(1, SQLITE_OPEN_READWRITE).await;
        let (_, h2) = shim.x_open(1, SQLITE_OPEN_READWRITE).await;
        let h1 = h1.unwrap();
        let h2 = h2.unwrap();

        shim.x_lock(h1, LockLevel::Reserved).await;

        let releaser = {
            let shim = shim.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                shim.x_unlock(h1, LockLevel::None).await;
            })
        };

        let status = shim.x_lock(h2, LockLevel::Reserved).await;
        releaser.await.unwrap();
        assert_eq!(status, SqliteStatus::Ok);
    }

    #[tokio::test]
    async fn device_characteristics_advertise_atomic_writes() {
        let dir = tempdir().unwrap();
        let shim = shim(dir.path()).await;
        let chars = shim.x_device_characteristics();
        assert_ne!(chars & DEVICE_ATOMIC_4K, 0);
    }
}
