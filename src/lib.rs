//! A virtual POSIX-compatible filesystem engine: a single in-process tree
//! backed by a hot/warm/cold tiered store, content-addressable storage,
//! copy-on-write branch overlays, and an extent/page block layer with a
//! SQLite-compatible VFS shim on top.

mod branch;
mod cancel;
mod cas;
mod config;
mod error;
mod extent;
mod facade;
mod inode;
mod metadata;
mod path;
mod resolver;
mod stream;
mod tier;
mod time;
mod vfs_shim;
mod watcher;

pub use branch::{Branch, BlockInfo, CommitResult, InterceptResult};
pub use cancel::CancellationToken;
pub use cas::{CasEngine, CasObject, CasObjectType, HashAlgo};
pub use config::EngineConfig;
pub use error::{FsError, FsErrorKind, FsResult};
pub use extent::ExtentLayer;
pub use facade::{
    DirEntry, FileSystem, OpenFile, OpenFlags, ReadOptions, ReaddirOptions, Stats, WriteOptions, WriteStreamHandle,
};
pub use inode::{BlobRef, EntryType, Inode, InodeId, Tier, Timestamps};
pub use stream::{ReadStream, WriteFlag, WriteStream, WriteStreamState};
pub use tier::TierRouter;
pub use vfs_shim::VfsShim;
pub use watcher::{WatchEvent, WatchEventKind, Watcher};

/// Install an `RUST_LOG`-driven `tracing-subscriber` `fmt` layer, the way a
/// host binary or test harness wires up observability for this engine.
/// Idempotent: only the first call across the process takes effect.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
