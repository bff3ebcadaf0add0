//! Node names heard on the mesh, persisted between runs.
use crate::relay::listener::NodeIdentity;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

/// Cached entries not heard from for this long are dropped on load.
pub const STALE_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedNodeInfo {
    pub node_id: u32,
    pub long_name: String,
    pub short_name: String,
    pub last_seen: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCache {
    pub nodes: HashMap<u32, CachedNodeInfo>,
    pub last_updated: DateTime<Utc>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Partial writes can leave leading NULs
        let cleaned = content.trim_start_matches('\0');
        Ok(serde_json::from_str(cleaned)?)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let base = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("node_cache.json");
        let tmp = dir.join(format!(".{}.tmp-{}", base, std::process::id()));
        std::fs::write(&tmp, content.as_bytes())
            .map_err(|e| anyhow!("Failed to write {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn update_node(&mut self, node_id: u32, long_name: String, short_name: String) {
        let now = Utc::now();
        self.nodes
            .entry(node_id)
            .and_modify(|n| {
                n.long_name = long_name.clone();
                n.short_name = short_name.clone();
                n.last_seen = now;
            })
            .or_insert(CachedNodeInfo {
                node_id,
                long_name,
                short_name,
                last_seen: now,
                first_seen: now,
            });
        self.last_updated = now;
    }

    pub fn remove_stale_nodes(&mut self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let before = self.nodes.len();
        self.nodes.retain(|_, node| node.last_seen > cutoff);
        before - self.nodes.len()
    }

    pub fn display_name(&self, node_id: u32) -> Option<String> {
        let node = self.nodes.get(&node_id)?;
        [&node.long_name, &node.short_name]
            .into_iter()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
            .map(str::to_string)
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Live view of the radio's identity and the node cache, shared between the
/// radio reader (writer side) and the listener (reader side).
pub struct NodeDirectory {
    /// 0 until the radio reports its node number.
    own_id: AtomicU32,
    cache: RwLock<NodeCache>,
    path: Option<PathBuf>,
}

impl NodeDirectory {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            own_id: AtomicU32::new(0),
            cache: RwLock::new(NodeCache::new()),
            path,
        }
    }

    /// Load the persisted cache if present, pruning stale nodes. Missing or
    /// corrupt files leave the directory empty.
    pub fn load(path: PathBuf) -> Self {
        let dir = Self::new(Some(path.clone()));
        if path.exists() {
            match NodeCache::load_from_file(&path) {
                Ok(mut cache) => {
                    let removed = cache.remove_stale_nodes(STALE_AFTER_DAYS);
                    debug!(
                        "Loaded {} cached nodes from {} ({} stale dropped)",
                        cache.nodes.len(),
                        path.display(),
                        removed
                    );
                    *dir.write() = cache;
                }
                Err(e) => warn!("Ignoring unreadable node cache {}: {}", path.display(), e),
            }
        }
        dir
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, NodeCache> {
        self.cache.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, NodeCache> {
        self.cache.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_own_node_id(&self, id: u32) {
        self.own_id.store(id, Ordering::SeqCst);
    }

    pub fn update_node(&self, node_id: u32, long_name: &str, short_name: &str) {
        self.write()
            .update_node(node_id, long_name.trim().to_string(), short_name.trim().to_string());
    }

    /// Drop nodes not heard from within the staleness window.
    pub fn prune_stale(&self) -> usize {
        self.write().remove_stale_nodes(STALE_AFTER_DAYS)
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(p) => self.read().save_to_file(p),
            None => Ok(()),
        }
    }
}

impl NodeIdentity for NodeDirectory {
    fn own_node_id(&self) -> Option<u32> {
        match self.own_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    fn display_name(&self, node_id: u32) -> Option<String> {
        self.read().display_name(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_name_preferred_then_short() {
        let mut c = NodeCache::new();
        c.update_node(1, "Alice Base".into(), "ALB".into());
        c.update_node(2, "  ".into(), "BOB".into());
        assert_eq!(c.display_name(1).as_deref(), Some("Alice Base"));
        assert_eq!(c.display_name(2).as_deref(), Some("BOB"));
        assert_eq!(c.display_name(3), None);
    }

    #[test]
    fn stale_nodes_are_pruned() {
        let mut c = NodeCache::new();
        c.update_node(1, "old".into(), "O".into());
        if let Some(n) = c.nodes.get_mut(&1) {
            n.last_seen = Utc::now() - chrono::Duration::days(30);
        }
        c.update_node(2, "new".into(), "N".into());
        assert_eq!(c.remove_stale_nodes(STALE_AFTER_DAYS), 1);
        assert!(c.nodes.contains_key(&2));
    }

    #[test]
    fn directory_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nodes.json");
        let d = NodeDirectory::new(Some(path.clone()));
        d.update_node(0x42, "Carol", "CRL");
        d.save().unwrap();

        let reloaded = NodeDirectory::load(path);
        assert_eq!(reloaded.display_name(0x42).as_deref(), Some("Carol"));
        assert_eq!(reloaded.own_node_id(), None);
        reloaded.set_own_node_id(7);
        assert_eq!(reloaded.own_node_id(), Some(7));
    }
}
