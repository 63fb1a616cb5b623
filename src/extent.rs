//! Page-level read/write over extent-packed backend objects: the storage
//! layer underneath the SQLite-compatible VFS shim.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::SegQueue;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::error::FsError;

type PageKey = (u64, u64);

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    extent_id: u64,
    offset: u32,
    length: u32,
}

const EXTENT_RAW: u8 = 0;
const EXTENT_ZSTD: u8 = 1;

/// Page (4 KiB default) read-modify-write over extent (≤2 MiB default)
/// packed backend objects. Unwritten pages read as logical zero holes.
pub struct ExtentLayer {
    root: PathBuf,
    page_size: u32,
    pages_per_extent: u32,
    compression: bool,
    dirty_pages: RwLock<HashMap<PageKey, Vec<u8>>>,
    dirty_queue: SegQueue<PageKey>,
    index: RwLock<HashMap<PageKey, IndexEntry>>,
    file_sizes: RwLock<HashMap<u64, u64>>,
    next_extent_id: AtomicU64,
    flush_lock: Mutex<()>,
}

impl ExtentLayer {
    pub fn new(config: &EngineConfig, base: impl Into<PathBuf>) -> Self {
        Self {
            root: base.into().join(&config.extent_root),
            page_size: config.page_size,
            pages_per_extent: config.pages_per_extent,
            compression: config.cas_compression,
            dirty_pages: RwLock::new(HashMap::new()),
            dirty_queue: SegQueue::new(),
            index: RwLock::new(HashMap::new()),
            file_sizes: RwLock::new(HashMap::new()),
            next_extent_id: AtomicU64::new(1),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn pad_to_page(&self, mut bytes: Vec<u8>) -> Vec<u8> {
        bytes.resize(self.page_size as usize, 0);
        bytes
    }

    /// Return a full page's bytes: a dirty staged write, a flushed extent
    /// slice, or a zero-filled hole.
    pub async fn read_page(&self, file_id: u64, page_number: u64) -> Result<Vec<u8>, FsError> {
        let key = (file_id, page_number);
        if let Some(bytes) = self.dirty_pages.read().await.get(&key) {
            return Ok(self.pad_to_page(bytes.clone()));
        }
        let entry = *match self.index.read().await.get(&key) {
            Some(e) => e,
            None => return Ok(vec![0u8; self.page_size as usize]),
        };
        let path = self.root.join(format!("extents/{}", entry.extent_id));
        let raw = fs::read(&path).await.map_err(|e| FsError::from_io(&e, "read", path.display().to_string()))?;
        let payload = self.decode_extent(&raw)?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        Ok(self.pad_to_page(payload[start..end].to_vec()))
    }

    /// Read-modify-write `data` into a page at `offset_in_page`, staging the
    /// result as dirty. A full-page write (`offset_in_page == 0 && data.len()
    /// == page_size`) still goes through the same read-modify-write path,
    /// which is equivalent to a replace in that case.
    pub async fn write_page(
        &self,
        file_id: u64,
        page_number: u64,
        offset_in_page: u32,
        data: &[u8],
    ) -> Result<(), FsError> {
        let mut page = self.read_page(file_id, page_number).await?;
        let start = offset_in_page as usize;
        let end = start + data.len();
        if page.len() < end {
            page.resize(end, 0);
        }
        page[start..end].copy_from_slice(data);

        let key = (file_id, page_number);
        self.dirty_pages.write().await.insert(key, page);
        self.dirty_queue.push(key);

        let logical_end = page_number * self.page_size as u64 + end as u64;
        let mut sizes = self.file_sizes.write().await;
        let cur = sizes.entry(file_id).or_insert(0);
        if logical_end > *cur {
            *cur = logical_end;
        }
        drop(sizes);

        if self.dirty_queue.len() >= self.pages_per_extent as usize {
            self.flush().await?;
        }
        Ok(())
    }

    fn encode_extent(&self, packed: &[u8]) -> Result<Vec<u8>, FsError> {
        let (marker, payload) = if self.compression {
            let compressed = zstd::encode_all(packed, 0).map_err(|_| FsError::inval("flush", "extent"))?;
            (EXTENT_ZSTD, compressed)
        } else {
            (EXTENT_RAW, packed.to_vec())
        };
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(marker);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn decode_extent(&self, raw: &[u8]) -> Result<Vec<u8>, FsError> {
        if raw.is_empty() {
            return Err(FsError::inval("read", "extent"));
        }
        match raw[0] {
            EXTENT_RAW => Ok(raw[1..].to_vec()),
            EXTENT_ZSTD => zstd::decode_all(&raw[1..]).map_err(|_| FsError::inval("read", "extent")),
            _ => Err(FsError::inval("read", "extent")),
        }
    }

    /// Commit all dirty pages: pack them into a new extent object, update
    /// the `(fileId, pageNumber) -> (extentId, offset, length)` index.
    pub async fn flush(&self) -> Result<(), FsError> {
        let _guard = self.flush_lock.lock().await;

        let mut keys = Vec::new();
        while let Some(key) = self.dirty_queue.pop() {
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut dirty = self.dirty_pages.write().await;
        let mut packed = Vec::new();
        let mut entries = Vec::new();
        for key in &keys {
            let Some(bytes) = dirty.remove(key) else { continue };
            let offset = packed.len() as u32;
            packed.extend_from_slice(&bytes);
            entries.push((*key, IndexEntry { extent_id: 0, offset, length: bytes.len() as u32 }));
        }
        drop(dirty);

        if entries.is_empty() {
            return Ok(());
        }

        let extent_id = self.next_extent_id.fetch_add(1, Ordering::Relaxed);
        let dir = self.root.join("extents");
        fs::create_dir_all(&dir).await.map_err(|e| FsError::from_io(&e, "flush", dir.display().to_string()))?;
        let path = dir.join(extent_id.to_string());
        let encoded = self.encode_extent(&packed)?;
        fs::write(&path, &encoded).await.map_err(|e| FsError::from_io(&e, "flush", path.display().to_string()))?;

        let mut index = self.index.write().await;
        for (key, mut entry) in entries {
            entry.extent_id = extent_id;
            index.insert(key, entry);
        }
        Ok(())
    }

    /// Logically release pages beyond `ceil(size / page_size)` and update
    /// the authoritative logical size.
    pub async fn truncate(&self, file_id: u64, size: u64) -> Result<(), FsError> {
        let keep_pages = size.div_ceil(self.page_size as u64);
        self.index.write().await.retain(|&(fid, page), _| fid != file_id || page < keep_pages);
        self.dirty_pages.write().await.retain(|&(fid, page), _| fid != file_id || page < keep_pages);
        self.file_sizes.write().await.insert(file_id, size);
        Ok(())
    }

    pub async fn get_file_size(&self, file_id: u64) -> u64 {
        *self.file_sizes.read().await.get(&file_id).unwrap_or(&0)
    }

    pub async fn set_file_size(&self, file_id: u64, size: u64) {
        self.file_sizes.write().await.insert(file_id, size);
    }
}
