//! Content-addressable storage: hash-keyed, deduplicated, immutable objects.

use std::path::PathBuf;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::FsError;

/// Hash algorithm used to key a CAS object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    Sha1,
    Sha256,
}

/// What kind of content a CAS object holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CasObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl CasObjectType {
    fn marker(self) -> u8 {
        match self {
            CasObjectType::Blob => 0,
            CasObjectType::Tree => 1,
            CasObjectType::Commit => 2,
            CasObjectType::Tag => 3,
        }
    }

    fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0 => Some(CasObjectType::Blob),
            1 => Some(CasObjectType::Tree),
            2 => Some(CasObjectType::Commit),
            3 => Some(CasObjectType::Tag),
            _ => None,
        }
    }
}

/// A stored, content-addressed object.
#[derive(Debug, Clone, PartialEq)]
pub struct CasObject {
    pub hash: String,
    pub object_type: CasObjectType,
    pub bytes: Vec<u8>,
    pub created_at_ms: i64,
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    bytes_to_hex(&Sha1::digest(bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    bytes_to_hex(&Sha256::digest(bytes))
}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, FsError> {
    if hex.len() % 2 != 0 {
        return Err(FsError::inval("hexToBytes", hex));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| FsError::inval("hexToBytes", hex)))
        .collect()
}

/// `hash[0..2] + '/' + hash[2..]`.
pub fn hash_to_path(hash: &str) -> Result<String, FsError> {
    if hash.len() < 3 {
        return Err(FsError::inval("hashToPath", hash));
    }
    Ok(format!("{}/{}", &hash[0..2], &hash[2..]))
}

/// Inverse of [`hash_to_path`].
pub fn path_to_hash(path: &str) -> Result<String, FsError> {
    let mut parts = path.splitn(2, '/');
    let prefix = parts.next().ok_or_else(|| FsError::inval("pathToHash", path))?;
    let rest = parts.next().ok_or_else(|| FsError::inval("pathToHash", path))?;
    if prefix.len() != 2 {
        return Err(FsError::inval("pathToHash", path));
    }
    Ok(format!("{}{}", prefix, rest))
}

const COMPRESSION_RAW: u8 = 0;
const COMPRESSION_ZSTD: u8 = 1;

/// Content-addressable blob/tree/commit/tag store, two-level fanout on disk.
pub struct CasEngine {
    root: PathBuf,
    compression: bool,
    algo: HashAlgo,
}

impl CasEngine {
    pub fn new(root: impl Into<PathBuf>, compression: bool, algo: HashAlgo) -> Self {
        Self { root: root.into(), compression, algo }
    }

    fn hash_bytes(&self, bytes: &[u8]) -> String {
        match self.algo {
            HashAlgo::Sha1 => sha1_hex(bytes),
            HashAlgo::Sha256 => sha256_hex(bytes),
        }
    }

    fn object_path(&self, hash: &str) -> Result<PathBuf, FsError> {
        if hash.len() > 255 || self.root.as_os_str().len() + hash.len() > 4096 {
            return Err(FsError::new(crate::error::FsErrorKind::ENameTooLong).with_syscall("put").with_path(hash));
        }
        let rel = hash_to_path(hash)?;
        Ok(self.root.join(rel))
    }

    /// Store `bytes` under its content hash. Idempotent: re-putting identical
    /// bytes returns the same hash without rewriting storage.
    pub async fn put(&self, bytes: &[u8], object_type: CasObjectType) -> Result<String, FsError> {
        let hash = self.hash_bytes(bytes);
        let path = self.object_path(&hash)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| FsError::from_io(&e, "put", hash.clone()))?;
        }

        let (marker, payload) = if self.compression {
            let compressed =
                zstd::encode_all(bytes, 0).map_err(|_| FsError::inval("put", hash.clone()))?;
            (COMPRESSION_ZSTD, compressed)
        } else {
            (COMPRESSION_RAW, bytes.to_vec())
        };

        let now_ms = crate::time::now_ms();
        let mut header = Vec::with_capacity(10 + payload.len());
        header.push(object_type.marker());
        header.push(marker);
        header.extend_from_slice(&now_ms.to_le_bytes());
        header.extend_from_slice(&payload);

        let tmp_path = path.with_extension("tmp");
        let mut tmp = fs::File::create(&tmp_path).await.map_err(|e| FsError::from_io(&e, "put", hash.clone()))?;
        tmp.write_all(&header).await.map_err(|e| FsError::from_io(&e, "put", hash.clone()))?;
        tmp.sync_all().await.map_err(|e| FsError::from_io(&e, "put", hash.clone()))?;
        fs::rename(&tmp_path, &path).await.map_err(|e| FsError::from_io(&e, "put", hash.clone()))?;

        Ok(hash)
    }

    pub async fn has(&self, hash: &str) -> bool {
        match self.object_path(hash) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn get(&self, hash: &str) -> Result<Option<CasObject>, FsError> {
        let path = self.object_path(hash)?;
        let raw = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FsError::from_io(&e, "get", hash)),
        };
        if raw.len() < 10 {
            return Err(FsError::inval("get", hash));
        }
        let object_type = CasObjectType::from_marker(raw[0]).ok_or_else(|| FsError::inval("get", hash))?;
        let compression_marker = raw[1];
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&raw[2..10]);
        let created_at_ms = i64::from_le_bytes(ts_bytes);
        let payload = &raw[10..];
        let bytes = match compression_marker {
            COMPRESSION_RAW => payload.to_vec(),
            COMPRESSION_ZSTD => {
                zstd::decode_all(payload).map_err(|_| FsError::inval("get", hash))?
            }
            _ => return Err(FsError::inval("get", hash)),
        };
        Ok(Some(CasObject { hash: hash.to_string(), object_type, bytes, created_at_ms }))
    }

    pub async fn delete(&self, hash: &str) -> Result<(), FsError> {
        let path = self.object_path(hash)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::from_io(&e, "delete", hash)),
        }
    }
}
