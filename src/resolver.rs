//! Segment-wise path resolution with bounded symlink expansion.

use crate::error::FsError;
use crate::inode::{Inode, InodeId};
use crate::metadata::MetadataStore;
use crate::path;

/// Default cumulative symlink-expansion budget, used when a caller has no
/// [`crate::config::EngineConfig`] to hand (direct unit tests, mainly).
/// Production callers go through the facade, which passes
/// `config.symlink_budget` instead.
pub const MAX_SYMLINK_EXPANSIONS: u32 = 40;

/// The outcome of a successful resolution: the final normalized path, the
/// inode it names, and its id.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub path: String,
    pub id: InodeId,
    pub inode: Inode,
}

/// Walk `path` left to right through `store`, expanding symlinks as directed
/// by `follow_final_symlink`. `symlink_budget` is the cumulative number of
/// expansions allowed before ELOOP; callers with an `EngineConfig` pass
/// `config.symlink_budget`.
pub async fn resolve(
    store: &MetadataStore,
    path: &str,
    follow_final_symlink: bool,
    symlink_budget: u32,
    syscall: &'static str,
) -> Result<Resolved, FsError> {
    if !crate::path::is_absolute(path) {
        return Err(FsError::inval(syscall, path));
    }
    let mut budget = symlink_budget;
    resolve_inner(store, path, follow_final_symlink, &mut budget, syscall).await
}

fn resolve_inner<'a>(
    store: &'a MetadataStore,
    target: &'a str,
    follow_final_symlink: bool,
    budget: &'a mut u32,
    syscall: &'static str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Resolved, FsError>> + Send + 'a>> {
    Box::pin(async move {
        let normalized = path::normalize(target).path;
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();

        let mut current_path = String::from("/");
        let mut current = root_entry(store).await?;

        for (idx, seg) in segments.iter().enumerate() {
            let is_last = idx == segments.len() - 1;
            if !current.1.is_dir() {
                return Err(FsError::not_dir(syscall, current_path.clone()));
            }
            let child_path = path::join(&current_path, seg);
            let child = store
                .get(&child_path)
                .await
                .ok_or_else(|| FsError::no_ent(syscall, normalized.clone()))?;
            let child_id = store.get_id(&child_path).await.expect("entry just fetched");

            if child.is_symlink() && (!is_last || follow_final_symlink) {
                if *budget == 0 {
                    return Err(FsError::loop_(syscall, normalized.clone()));
                }
                *budget -= 1;
                let link_target = child.link_target.clone().unwrap_or_default();
                let expanded = if path::is_absolute(&link_target) {
                    link_target
                } else {
                    path::join(&current_path, &link_target)
                };
                let rest: Vec<&str> = segments[idx + 1..].to_vec();
                let remaining = if rest.is_empty() {
                    expanded
                } else {
                    format!("{}/{}", expanded.trim_end_matches('/'), rest.join("/"))
                };
                return resolve_inner(store, &remaining, follow_final_symlink, budget, syscall).await;
            }

            current_path = child_path;
            current = (child_id, child);
        }

        Ok(Resolved { path: current_path, id: current.0, inode: current.1 })
    })
}

async fn root_entry(store: &MetadataStore) -> Result<(InodeId, Inode), FsError> {
    let id = store.get_id("/").await.expect("root always present");
    let inode = store.get_by_id(id).await.expect("root always present");
    Ok((id, inode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::EntryType;

    fn mkdir(now: i64) -> Inode {
        Inode::new(0, EntryType::Directory, 0o755, 0, 0, now)
    }

    async fn new_store() -> MetadataStore {
        MetadataStore::new(Inode::new(crate::inode::ROOT_ID, EntryType::Directory, 0o755, 0, 0, 0))
    }

    #[tokio::test]
    async fn resolves_plain_nested_path() {
        let store = new_store().await;
        let dir_id = store.alloc_id();
        store.put("/a", dir_id, mkdir(0)).await;
        let file_id = store.alloc_id();
        store.put("/a/f", file_id, Inode::new(file_id, EntryType::Regular, 0o644, 0, 0, 0)).await;

        let resolved = resolve(&store, "/a/f", true, MAX_SYMLINK_EXPANSIONS, "stat").await.unwrap();
        assert_eq!(resolved.id, file_id);
    }

    #[tokio::test]
    async fn missing_path_is_no_ent() {
        let store = new_store().await;
        let err = resolve(&store, "/missing", true, MAX_SYMLINK_EXPANSIONS, "stat").await.unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::ENoEnt);
    }

    #[tokio::test]
    async fn relative_path_is_inval() {
        let store = new_store().await;
        let err = resolve(&store, "relative", true, MAX_SYMLINK_EXPANSIONS, "stat").await.unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::EInval);
    }

    #[tokio::test]
    async fn lstat_does_not_follow_final_symlink() {
        let store = new_store().await;
        let link_id = store.alloc_id();
        let mut link = Inode::new(link_id, EntryType::Symlink, 0o777, 0, 0, 0);
        link.link_target = Some("/missing-target".to_string());
        store.put("/l", link_id, link).await;

        let resolved = resolve(&store, "/l", false, MAX_SYMLINK_EXPANSIONS, "lstat").await.unwrap();
        assert!(resolved.inode.is_symlink());
    }

    #[tokio::test]
    async fn broken_symlink_following_is_no_ent() {
        let store = new_store().await;
        let link_id = store.alloc_id();
        let mut link = Inode::new(link_id, EntryType::Symlink, 0o777, 0, 0, 0);
        link.link_target = Some("/missing-target".to_string());
        store.put("/l", link_id, link).await;

        let err = resolve(&store, "/l", true, MAX_SYMLINK_EXPANSIONS, "stat").await.unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::ENoEnt);
    }

    #[tokio::test]
    async fn symlink_loop_is_eloop() {
        let store = new_store().await;
        let l1 = store.alloc_id();
        let mut link1 = Inode::new(l1, EntryType::Symlink, 0o777, 0, 0, 0);
        link1.link_target = Some("/loop2".to_string());
        store.put("/loop1", l1, link1).await;

        let l2 = store.alloc_id();
        let mut link2 = Inode::new(l2, EntryType::Symlink, 0o777, 0, 0, 0);
        link2.link_target = Some("/loop1".to_string());
        store.put("/loop2", l2, link2).await;

        let err = resolve(&store, "/loop1", true, MAX_SYMLINK_EXPANSIONS, "realpath").await.unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::ELoop);
    }

    #[tokio::test]
    async fn a_smaller_budget_trips_eloop_sooner() {
        let store = new_store().await;
        let l1 = store.alloc_id();
        let mut link1 = Inode::new(l1, EntryType::Symlink, 0o777, 0, 0, 0);
        link1.link_target = Some("/loop2".to_string());
        store.put("/loop1", l1, link1).await;

        let l2 = store.alloc_id();
        let mut link2 = Inode::new(l2, EntryType::Symlink, 0o777, 0, 0, 0);
        link2.link_target = Some("/loop1".to_string());
        store.put("/loop2", l2, link2).await;

        let err = resolve(&store, "/loop1", true, 2, "realpath").await.unwrap_err();
        assert_eq!(err.kind, crate::error::FsErrorKind::ELoop);
    }
}
