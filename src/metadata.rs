//! Entry map (path -> inode id) and inode table (id -> record), the ground
//! truth every other subsystem consults.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::FsError;
use crate::inode::{Inode, InodeId, InodeIdAllocator, ROOT_ID};
use crate::path;

struct Tables {
    entries: HashMap<String, InodeId>,
    inodes: HashMap<InodeId, Inode>,
}

/// The metadata/inode store: single source of truth for path -> inode and
/// inode id -> record, guaranteeing observers never see a torn state for any
/// single operation (the whole table is guarded by one lock, matching the
/// granularity the teacher's own `State` mutex uses).
pub struct MetadataStore {
    tables: RwLock<Tables>,
    allocator: InodeIdAllocator,
}

impl MetadataStore {
    pub fn new(root: Inode) -> Self {
        let mut entries = HashMap::new();
        let mut inodes = HashMap::new();
        entries.insert("/".to_string(), ROOT_ID);
        inodes.insert(ROOT_ID, root);
        Self { tables: RwLock::new(Tables { entries, inodes }), allocator: InodeIdAllocator::new() }
    }

    pub fn alloc_id(&self) -> InodeId {
        self.allocator.alloc()
    }

    pub async fn has(&self, path: &str) -> bool {
        self.tables.read().await.entries.contains_key(path)
    }

    pub async fn get(&self, path: &str) -> Option<Inode> {
        let tables = self.tables.read().await;
        let id = *tables.entries.get(path)?;
        tables.inodes.get(&id).cloned()
    }

    pub async fn get_id(&self, path: &str) -> Option<InodeId> {
        self.tables.read().await.entries.get(path).copied()
    }

    pub async fn get_by_id(&self, id: InodeId) -> Option<Inode> {
        self.tables.read().await.inodes.get(&id).cloned()
    }

    /// Bind `path` to an inode id and store/replace its record in one step.
    pub async fn put(&self, path: &str, id: InodeId, inode: Inode) {
        let mut tables = self.tables.write().await;
        tables.entries.insert(path.to_string(), id);
        tables.inodes.insert(id, inode);
    }

    /// Mutate an existing inode in place under the write lock, returning
    /// `ENOENT` if the path is not present.
    pub async fn update<F>(&self, path: &str, f: F) -> Result<Inode, FsError>
    where
        F: FnOnce(&mut Inode),
    {
        let mut tables = self.tables.write().await;
        let id = *tables.entries.get(path).ok_or_else(|| FsError::no_ent("update", path))?;
        let inode = tables.inodes.get_mut(&id).expect("entry without inode record");
        f(inode);
        Ok(inode.clone())
    }

    /// Remove a path's directory entry. Decrements `nlink` on the underlying
    /// inode; the caller is responsible for reaping the inode record once
    /// `nlink` reaches zero and no entry references it.
    pub async fn remove(&self, path: &str) -> Result<Inode, FsError> {
        let mut tables = self.tables.write().await;
        let id = tables.entries.remove(path).ok_or_else(|| FsError::no_ent("remove", path))?;
        let still_referenced = tables.entries.values().any(|&other| other == id);
        let inode = tables.inodes.get_mut(&id).expect("entry without inode record");
        if inode.nlink > 0 {
            inode.nlink -= 1;
        }
        let snapshot = inode.clone();
        if !still_referenced && snapshot.nlink == 0 {
            tables.inodes.remove(&id);
        }
        Ok(snapshot)
    }

    /// Atomically rebind `src` to `dest`'s key, in a single write-lock
    /// critical section so observers never see `dest` absent mid-rename.
    pub async fn rename(&self, src: &str, dest: &str) -> Result<(), FsError> {
        let mut tables = self.tables.write().await;
        let id = *tables.entries.get(src).ok_or_else(|| FsError::no_ent("rename", src))?;
        if let Some(&old_dest_id) = tables.entries.get(dest) {
            if old_dest_id != id {
                let still_referenced = {
                    let mut count = 0;
                    for (p, &v) in tables.entries.iter() {
                        if v == old_dest_id && p != dest {
                            count += 1;
                        }
                    }
                    count
                };
                if still_referenced == 0 {
                    tables.inodes.remove(&old_dest_id);
                }
            }
        }
        tables.entries.remove(src);
        tables.entries.insert(dest.to_string(), id);

        // Propagate the rename to every descendant path, matching the
        // teacher's `State::rename_entry` subtree-rewrite behavior.
        let prefix = format!("{}/", src.trim_end_matches('/'));
        let moved: Vec<(String, InodeId)> = tables
            .entries
            .iter()
            .filter(|(p, _)| p.starts_with(&prefix))
            .map(|(p, &v)| (p.clone(), v))
            .collect();
        for (old_child, child_id) in moved {
            tables.entries.remove(&old_child);
            let suffix = &old_child[prefix.len()..];
            let new_child = path::join(dest, suffix);
            tables.entries.insert(new_child, child_id);
        }
        Ok(())
    }

    /// Bind `path` to an already-existing inode id without touching the
    /// inode record itself — the primitive a hard link is built from.
    pub async fn bind(&self, path: &str, id: InodeId) {
        self.tables.write().await.entries.insert(path.to_string(), id);
    }

    /// Every path strictly under `dir` (not `dir` itself), deepest first, so
    /// a caller can remove a subtree bottom-up without orphaning entries.
    pub async fn descendants_of(&self, dir: &str) -> Vec<String> {
        let tables = self.tables.read().await;
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let mut out: Vec<String> = tables.entries.keys().filter(|p| p.starts_with(&prefix)).cloned().collect();
        out.sort_by(|a, b| b.matches('/').count().cmp(&a.matches('/').count()).then_with(|| b.cmp(a)));
        out
    }

    /// List the direct children of a directory path, as `(name, id)` pairs.
    pub async fn children_of(&self, dir: &str) -> Vec<(String, InodeId)> {
        let tables = self.tables.read().await;
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let mut out = Vec::new();
        for (p, &id) in tables.entries.iter() {
            if p == dir {
                continue;
            }
            if let Some(rest) = p.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    out.push((rest.to_string(), id));
                }
            }
        }
        out
    }

    pub async fn is_dir_empty(&self, dir: &str) -> bool {
        self.children_of(dir).await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::EntryType;

    fn root() -> Inode {
        Inode::new(ROOT_ID, EntryType::Directory, 0o755, 0, 0, 0)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MetadataStore::new(root());
        let id = store.alloc_id();
        let inode = Inode::new(id, EntryType::Regular, 0o644, 0, 0, 1);
        store.put("/a", id, inode.clone()).await;
        let got = store.get("/a").await.unwrap();
        assert_eq!(got.id, inode.id);
    }

    #[tokio::test]
    async fn remove_missing_path_is_no_ent() {
        let store = MetadataStore::new(root());
        let err = store.remove("/missing").await.unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::ENoEnt);
    }

    #[tokio::test]
    async fn rename_moves_descendants() {
        let store = MetadataStore::new(root());
        let dir_id = store.alloc_id();
        store.put("/a", dir_id, Inode::new(dir_id, EntryType::Directory, 0o755, 0, 0, 0)).await;
        let file_id = store.alloc_id();
        store.put("/a/f", file_id, Inode::new(file_id, EntryType::Regular, 0o644, 0, 0, 0)).await;

        store.rename("/a", "/b").await.unwrap();

        assert!(!store.has("/a").await);
        assert!(!store.has("/a/f").await);
        assert!(store.has("/b").await);
        assert!(store.has("/b/f").await);
    }

    #[tokio::test]
    async fn children_of_lists_only_direct_children() {
        let store = MetadataStore::new(root());
        let dir_id = store.alloc_id();
        store.put("/a", dir_id, Inode::new(dir_id, EntryType::Directory, 0o755, 0, 0, 0)).await;
        let f1 = store.alloc_id();
        store.put("/a/f1", f1, Inode::new(f1, EntryType::Regular, 0o644, 0, 0, 0)).await;
        let sub_id = store.alloc_id();
        store.put("/a/sub", sub_id, Inode::new(sub_id, EntryType::Directory, 0o755, 0, 0, 0)).await;
        let nested = store.alloc_id();
        store.put("/a/sub/nested", nested, Inode::new(nested, EntryType::Regular, 0o644, 0, 0, 0)).await;

        let mut children = store.children_of("/a").await;
        children.sort();
        assert_eq!(children.len(), 2);
        assert!(children.iter().any(|(n, _)| n == "f1"));
        assert!(children.iter().any(|(n, _)| n == "sub"));
    }
}
