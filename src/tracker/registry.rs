//! In-process tracker registry
//!
//! Maps `ip:port` to the set of files a peer advertises. Registration
//! replaces a peer's entry wholesale, so a re-announce with a shorter list
//! drops files the peer no longer offers.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Announcement, PeerDirectory};
use crate::descriptor::ContentHash;
use crate::error::{Result, SwarmError};
use crate::types::PeerEndpoint;

/// One registered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub endpoint: PeerEndpoint,
    pub files: BTreeSet<String>,
    pub content_hashes: BTreeMap<String, ContentHash>,
    pub last_seen: DateTime<Utc>,
}

/// Tracker registry
///
/// Entries are keyed by `ip:port` in a sorted map, so query results come
/// back in a stable order.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    peers: RwLock<BTreeMap<String, PeerRecord>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a peer's advertised file set
    pub fn register<S: AsRef<str>>(&self, ip: &str, port: u16, file_names: &[S]) -> Result<()> {
        let announcement = Announcement::new(
            ip,
            port,
            file_names.iter().map(|f| f.as_ref().to_string()),
        );
        self.announce(&announcement)
    }

    /// Register a peer together with per-file content hashes
    pub fn announce(&self, announcement: &Announcement) -> Result<()> {
        self.upsert(announcement, Utc::now())
    }

    fn upsert(&self, announcement: &Announcement, seen: DateTime<Utc>) -> Result<()> {
        let record = build_record(announcement, seen)?;
        let key = record.endpoint.key();

        tracing::debug!(
            "Registered peer {} with {} file(s)",
            key,
            record.files.len()
        );
        self.peers.write().insert(key, record);
        Ok(())
    }

    /// Peers advertising `file_name`, in key order
    pub fn query_peers_for_file(&self, file_name: &str) -> Result<Vec<PeerEndpoint>> {
        if file_name.is_empty() {
            return Err(SwarmError::MissingParameter("fileName"));
        }

        Ok(self
            .peers
            .read()
            .values()
            .filter(|record| record.files.contains(file_name))
            .map(|record| record.endpoint.clone())
            .collect())
    }

    /// Number of registered peers
    pub fn count_peers(&self) -> usize {
        self.peers.read().len()
    }

    /// Drop a peer; returns whether it was registered
    pub fn unregister(&self, ip: &str, port: u16) -> bool {
        let key = PeerEndpoint::new(ip, port).key();
        let removed = self.peers.write().remove(&key).is_some();
        if removed {
            tracing::debug!("Unregistered peer {}", key);
        }
        removed
    }

    /// Content hash advertised for a file by the first peer (key order) that has one
    pub fn content_hash_for(&self, file_name: &str) -> Option<ContentHash> {
        self.peers
            .read()
            .values()
            .find_map(|record| record.content_hashes.get(file_name).cloned())
    }

    /// Every advertised file name, sorted and distinct
    pub fn files(&self) -> Vec<String> {
        let peers = self.peers.read();
        let names: BTreeSet<&String> = peers.values().flat_map(|r| r.files.iter()).collect();
        names.into_iter().cloned().collect()
    }

    /// Snapshot of a single peer's record
    pub fn peer(&self, ip: &str, port: u16) -> Option<PeerRecord> {
        self.peers.read().get(&PeerEndpoint::new(ip, port).key()).cloned()
    }

    /// Remove peers not seen since `cutoff`; returns how many were removed
    pub fn remove_inactive_peers(&self, cutoff: DateTime<Utc>) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, record| record.last_seen >= cutoff);
        let removed = before - peers.len();
        if removed > 0 {
            tracing::info!("Removed {} inactive peer(s)", removed);
        }
        removed
    }

    /// Remove every peer
    pub fn clear(&self) {
        self.peers.write().clear();
    }
}

fn build_record(announcement: &Announcement, seen: DateTime<Utc>) -> Result<PeerRecord> {
    if announcement.ip.is_empty() {
        return Err(SwarmError::InvalidRegistration("missing ip".to_string()));
    }
    if announcement.port == 0 {
        return Err(SwarmError::InvalidRegistration("missing port".to_string()));
    }
    if announcement.files.is_empty() {
        return Err(SwarmError::InvalidRegistration(
            "file list is empty".to_string(),
        ));
    }

    let mut files = BTreeSet::new();
    let mut content_hashes = BTreeMap::new();
    for file in &announcement.files {
        if file.name.is_empty() {
            return Err(SwarmError::InvalidRegistration(
                "file name is empty".to_string(),
            ));
        }
        files.insert(file.name.clone());
        if let Some(hash) = &file.content_hash {
            content_hashes.insert(file.name.clone(), hash.clone());
        }
    }

    Ok(PeerRecord {
        endpoint: PeerEndpoint::new(announcement.ip.clone(), announcement.port),
        files,
        content_hashes,
        last_seen: seen,
    })
}

#[async_trait]
impl PeerDirectory for TrackerRegistry {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        TrackerRegistry::announce(self, announcement)
    }

    async fn peers_for_file(&self, file_name: &str) -> Result<Vec<PeerEndpoint>> {
        self.query_peers_for_file(file_name)
    }

    async fn peer_count(&self) -> Result<usize> {
        Ok(self.count_peers())
    }

    async fn content_hash(&self, file_name: &str) -> Result<Option<ContentHash>> {
        Ok(self.content_hash_for(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::AnnouncedFile;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_register_and_query() {
        let registry = TrackerRegistry::new();
        registry.register("10.0.0.2", 7000, &["a.bin", "b.bin"]).unwrap();
        registry.register("10.0.0.1", 7000, &["a.bin"]).unwrap();

        let peers = registry.query_peers_for_file("a.bin").unwrap();
        assert_eq!(
            peers,
            vec![
                PeerEndpoint::new("10.0.0.1", 7000),
                PeerEndpoint::new("10.0.0.2", 7000)
            ]
        );
        assert_eq!(registry.query_peers_for_file("b.bin").unwrap().len(), 1);
        assert_eq!(registry.count_peers(), 2);
    }

    #[test]
    fn test_reregistration_replaces_wholesale() {
        let registry = TrackerRegistry::new();
        registry.register("10.0.0.1", 7000, &["a.bin", "b.bin"]).unwrap();
        registry.register("10.0.0.1", 7000, &["b.bin"]).unwrap();

        assert!(registry.query_peers_for_file("a.bin").unwrap().is_empty());
        assert_eq!(registry.query_peers_for_file("b.bin").unwrap().len(), 1);
        assert_eq!(registry.count_peers(), 1);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = TrackerRegistry::new();
        registry.register("10.0.0.1", 7000, &["a.bin"]).unwrap();
        let first = registry.query_peers_for_file("a.bin").unwrap();
        registry.register("10.0.0.1", 7000, &["a.bin"]).unwrap();
        assert_eq!(registry.query_peers_for_file("a.bin").unwrap(), first);
        assert_eq!(registry.count_peers(), 1);
    }

    #[test]
    fn test_invalid_registration_leaves_registry_unchanged() {
        let registry = TrackerRegistry::new();
        registry.register("10.0.0.1", 7000, &["a.bin"]).unwrap();

        let empty: [&str; 0] = [];
        let err = registry.register("10.0.0.1", 7000, &empty).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidRegistration(_)));
        assert!(registry.register("", 7000, &["a.bin"]).is_err());
        assert!(registry.register("10.0.0.1", 7000, &[""]).is_err());

        assert_eq!(registry.query_peers_for_file("a.bin").unwrap().len(), 1);
        assert_eq!(registry.count_peers(), 1);
    }

    #[test]
    fn test_query_edge_cases() {
        let registry = TrackerRegistry::new();
        assert!(registry.query_peers_for_file("x").unwrap().is_empty());
        assert_eq!(registry.count_peers(), 0);
        assert!(matches!(
            registry.query_peers_for_file(""),
            Err(SwarmError::MissingParameter("fileName"))
        ));
    }

    #[test]
    fn test_content_hashes_and_files() {
        let registry = TrackerRegistry::new();
        let hash = ContentHash::sha256_of(b"abc");
        let announcement = Announcement {
            ip: "10.0.0.1".to_string(),
            port: 7000,
            files: vec![
                AnnouncedFile::new("b.bin").with_hash(hash.clone()),
                AnnouncedFile::new("a.bin"),
            ],
        };
        registry.announce(&announcement).unwrap();
        registry.register("10.0.0.2", 7000, &["c.bin", "a.bin"]).unwrap();

        assert_eq!(registry.content_hash_for("b.bin"), Some(hash));
        assert_eq!(registry.content_hash_for("a.bin"), None);
        assert_eq!(registry.files(), vec!["a.bin", "b.bin", "c.bin"]);
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = TrackerRegistry::new();
        registry.register("10.0.0.1", 7000, &["a.bin"]).unwrap();
        registry.register("10.0.0.2", 7000, &["a.bin"]).unwrap();

        assert!(registry.unregister("10.0.0.1", 7000));
        assert!(!registry.unregister("10.0.0.1", 7000));
        assert_eq!(registry.count_peers(), 1);

        registry.clear();
        assert_eq!(registry.count_peers(), 0);
    }

    #[test]
    fn test_remove_inactive_peers() {
        let registry = TrackerRegistry::new();
        let now = Utc::now();
        registry
            .upsert(&Announcement::new("10.0.0.1", 7000, ["a.bin"]), now - Duration::hours(2))
            .unwrap();
        registry
            .upsert(&Announcement::new("10.0.0.2", 7000, ["a.bin"]), now)
            .unwrap();

        assert_eq!(registry.remove_inactive_peers(now - Duration::hours(1)), 1);
        assert_eq!(
            registry.query_peers_for_file("a.bin").unwrap(),
            vec![PeerEndpoint::new("10.0.0.2", 7000)]
        );
        assert!(registry.peer("10.0.0.2", 7000).is_some());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(TrackerRegistry::new());
        let handles: Vec<_> = (0..16u16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register("10.0.0.1", 7000 + i, &["shared.bin"])
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count_peers(), 16);
        assert_eq!(registry.query_peers_for_file("shared.bin").unwrap().len(), 16);
    }
}
