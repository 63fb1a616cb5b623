//! Path-subtree change notification. The facade notifies watchers directly
//! after each mutating operation commits; this is an in-engine event bus, not
//! an OS-level inotify feed (see the design notes in `SPEC_FULL.md` §4.11).

use tokio::sync::broadcast;

/// What happened to a watched path: a rename-class event (create, delete,
/// move) or a content/metadata change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    Rename,
    Change,
}

/// A single change notification, carrying the path it occurred at relative to
/// the watch root the listener subscribed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

const CHANNEL_CAPACITY: usize = 256;

/// Engine-internal fan-out hub: every mutating facade call that touches a
/// path pushes an event here, and every live [`Watcher`] whose subtree
/// contains that path receives it.
pub struct WatchHub {
    sender: broadcast::Sender<WatchEvent>,
}

impl WatchHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit an event for `path`. Best-effort: if no watcher is subscribed the
    /// send is dropped silently, matching the spec's "emitters fire after the
    /// mutation commits" guarantee without requiring a listener to exist.
    pub fn emit(&self, kind: WatchEventKind, path: &str) {
        let _ = self.sender.send(WatchEvent { kind, path: path.to_string() });
    }

    /// Subscribe a new watcher rooted at `path`. When `recursive` is false
    /// only direct events at exactly `path` are delivered; when true, events
    /// anywhere under the `path` subtree are delivered too.
    pub fn watch(&self, path: &str, recursive: bool) -> Watcher {
        Watcher {
            root: path.to_string(),
            recursive,
            receiver: self.sender.subscribe(),
            refd: true,
        }
    }
}

impl Default for WatchHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to a path subtree. `recv()` pulls the next event in
/// that subtree, cooperatively — there is no callback fan-out.
pub struct Watcher {
    root: String,
    recursive: bool,
    receiver: broadcast::Receiver<WatchEvent>,
    refd: bool,
}

impl Watcher {
    fn in_scope(&self, path: &str) -> bool {
        if path == self.root {
            return true;
        }
        if !self.recursive {
            return false;
        }
        let prefix = if self.root == "/" { "/".to_string() } else { format!("{}/", self.root) };
        path.starts_with(&prefix)
    }

    /// Wait for the next in-scope event. Returns `None` once the hub side has
    /// been dropped and the channel is exhausted.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.in_scope(&event.path) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn close(self) {}

    /// Prevents the watcher from keeping the host alive; a no-op bookkeeping
    /// flag here since this engine has no event-loop "alive" handle of its
    /// own, matching the capability surface's `ref/unref` pair.
    pub fn unref(&mut self) {
        self.refd = false;
    }

    pub fn ref_(&mut self) {
        self.refd = true;
    }

    pub fn is_ref(&self) -> bool {
        self.refd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_recursive_watch_only_sees_exact_path() {
        let hub = WatchHub::new();
        let mut watcher = hub.watch("/a", false);
        hub.emit(WatchEventKind::Change, "/a/b");
        hub.emit(WatchEventKind::Change, "/a");
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.path, "/a");
    }

    #[tokio::test]
    async fn recursive_watch_sees_subtree_events() {
        let hub = WatchHub::new();
        let mut watcher = hub.watch("/a", true);
        hub.emit(WatchEventKind::Rename, "/a/b/c");
        let event = watcher.recv().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Rename);
        assert_eq!(event.path, "/a/b/c");
    }

    #[tokio::test]
    async fn unref_does_not_prevent_delivery() {
        let hub = WatchHub::new();
        let mut watcher = hub.watch("/a", true);
        watcher.unref();
        hub.emit(WatchEventKind::Change, "/a");
        assert!(watcher.recv().await.is_some());
    }
}
