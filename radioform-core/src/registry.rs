//! Endpoint registry (C7): reads the control file the host writes, and
//! reconciles it once a second against the set of live virtual endpoints.
//!
//! A small finite-state per-uid record — not boolean sprawl — tracks
//! liveness, cached heartbeat, and cooldown expiry so that the control-file
//! flapping that would otherwise cause add/remove oscillation is absorbed
//! by a cooldown timestamp comparison rather than a timer task.

use crate::ring::{uid_to_filename, Ring};
use crate::time::now_ms;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const HEARTBEAT_FRESH_TIMEOUT_MS: u64 = 5_000;
pub const COOLDOWN_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalEntry {
    pub name: String,
    pub uid: String,
}

/// Parse `name|uid` lines; lines without `|` are ignored.
pub fn parse_control_file(contents: &str) -> Vec<PhysicalEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let (name, uid) = line.split_once('|')?;
            Some(PhysicalEntry { name: name.to_string(), uid: uid.to_string() })
        })
        .collect()
}

#[derive(Debug, Clone)]
struct LiveRecord {
    last_seen_heartbeat: u64,
    last_changed_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CooldownRecord {
    expires_at_ms: u64,
}

/// Reconciles live endpoints against a control file, one uid per ring.
pub struct EndpointRegistry {
    ring_dir: PathBuf,
    live: HashMap<String, LiveRecord>,
    cooldowns: HashMap<String, CooldownRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Create(String),
    Destroy(String),
}

impl EndpointRegistry {
    pub fn new(ring_dir: impl Into<PathBuf>) -> Self {
        Self { ring_dir: ring_dir.into(), live: HashMap::new(), cooldowns: HashMap::new() }
    }

    pub fn is_live(&self, uid: &str) -> bool {
        self.live.contains_key(uid)
    }

    fn is_in_cooldown(&self, uid: &str, now: u64) -> bool {
        self.cooldowns.get(uid).map(|c| now < c.expires_at_ms).unwrap_or(false)
    }

    fn ring_path(&self, uid: &str) -> PathBuf {
        self.ring_dir.join(uid_to_filename(uid))
    }

    /// Read `uid`'s ring header and compare `host_heartbeat` to the cached
    /// value; equality for longer than the timeout means stale. Missing ring
    /// files count as stale.
    fn refresh_heartbeat(&mut self, uid: &str, now: u64) -> bool {
        let path = self.ring_path(uid);
        if !path.exists() {
            return false;
        }
        let Ok(ring) = Ring::create_or_open(&path, 48000, 2, crate::ring::SampleFormat::F32, 40) else {
            return false;
        };
        let heartbeat = ring.consumer_heartbeat();

        let record = self.live.entry(uid.to_string()).or_insert(LiveRecord { last_seen_heartbeat: heartbeat, last_changed_ms: now });
        if heartbeat != record.last_seen_heartbeat {
            record.last_seen_heartbeat = heartbeat;
            record.last_changed_ms = now;
        }
        now.saturating_sub(record.last_changed_ms) < HEARTBEAT_FRESH_TIMEOUT_MS
    }

    /// One reconciliation pass: entries to create (fresh, not live, not in
    /// cooldown) and uids to destroy (live but absent or stale).
    pub fn reconcile(&mut self, entries: &[PhysicalEntry]) -> Vec<ReconcileAction> {
        let now = now_ms();
        let mut actions = Vec::new();
        let present: std::collections::HashSet<&str> = entries.iter().map(|e| e.uid.as_str()).collect();

        for entry in entries {
            if self.is_live(&entry.uid) {
                continue;
            }
            if self.is_in_cooldown(&entry.uid, now) {
                continue;
            }
            if self.refresh_heartbeat(&entry.uid, now) {
                actions.push(ReconcileAction::Create(entry.uid.clone()));
                debug!(uid = %entry.uid, "registry: creating endpoint");
            }
        }

        let candidates: Vec<String> = self.live.keys().cloned().collect();
        let mut stale_or_absent = Vec::new();
        for uid in candidates {
            let is_stale = !present.contains(uid.as_str()) || !self.refresh_heartbeat(&uid, now);
            if is_stale {
                stale_or_absent.push(uid);
            }
        }

        for uid in stale_or_absent {
            self.live.remove(&uid);
            self.cooldowns.insert(uid.clone(), CooldownRecord { expires_at_ms: now + COOLDOWN_MS });
            info!(uid = %uid, "registry: removing endpoint, cooldown started");
            actions.push(ReconcileAction::Destroy(uid));
        }

        for action in &actions {
            if let ReconcileAction::Create(uid) = action {
                self.live.entry(uid.clone()).or_insert(LiveRecord { last_seen_heartbeat: 0, last_changed_ms: now });
            }
        }

        actions
    }
}

/// Atomic control-file rewrite: write to a temp file in the same directory,
/// then rename, so readers never observe a partial write.
pub fn write_control_file(path: &Path, entries: &[PhysicalEntry]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut contents = String::new();
    for entry in entries {
        contents.push_str(&entry.name);
        contents.push('|');
        contents.push_str(&entry.uid);
        contents.push('\n');
    }
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_control_file_ignores_lines_without_pipe() {
        let contents = "Speakers|uid-1\nmalformed line\nHeadphones|uid-2\n";
        let entries = parse_control_file(contents);
        assert_eq!(entries, vec![
            PhysicalEntry { name: "Speakers".into(), uid: "uid-1".into() },
            PhysicalEntry { name: "Headphones".into(), uid: "uid-2".into() },
        ]);
    }

    #[test]
    #[serial]
    fn write_control_file_is_readable_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.txt");
        let entries = vec![PhysicalEntry { name: "Speakers".into(), uid: "uid-1".into() }];
        write_control_file(&path, &entries).unwrap();
        let back = parse_control_file(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(back, entries);
    }

    #[test]
    #[serial]
    fn s6_absent_entry_triggers_removal_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = EndpointRegistry::new(dir.path());
        let uid = "uid-1";
        let ring_path = dir.path().join(uid_to_filename(uid));
        let ring = Ring::create_or_open(&ring_path, 48000, 2, crate::ring::SampleFormat::F32, 40).unwrap();
        ring.update_heartbeat_consumer();

        let entries = vec![PhysicalEntry { name: "Speakers".into(), uid: uid.into() }];
        let actions = registry.reconcile(&entries);
        assert_eq!(actions, vec![ReconcileAction::Create(uid.into())]);
        assert!(registry.is_live(uid));

        let actions = registry.reconcile(&[]);
        assert_eq!(actions, vec![ReconcileAction::Destroy(uid.into())]);
        assert!(!registry.is_live(uid));
        assert!(registry.is_in_cooldown(uid, now_ms()));
    }

    #[test]
    #[serial]
    fn s7_stale_heartbeat_is_not_recreated_during_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = EndpointRegistry::new(dir.path());
        registry.cooldowns.insert("uid-1".into(), CooldownRecord { expires_at_ms: now_ms() + COOLDOWN_MS });

        let entries = vec![PhysicalEntry { name: "Speakers".into(), uid: "uid-1".into() }];
        let actions = registry.reconcile(&entries);
        assert!(actions.is_empty());
        assert!(!registry.is_live("uid-1"));
    }
}
