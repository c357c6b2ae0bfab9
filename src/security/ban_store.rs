use crate::clock::Clock;
use crate::config::IpBanningConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BAN_FILE_HEADER: &str = "# GateWatch banned addresses\n# Format: address:unix_timestamp (0 = permanent)\n";
const LOADED_REASON: &str = "loaded from ban file";

#[derive(Debug, Clone)]
struct BanEntry {
    /// `None` for permanent bans.
    banned_at: Option<DateTime<Utc>>,
    reason: String,
}

/// Public view of one ban.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanInfo {
    pub ip: String,
    pub banned: bool,
    pub permanent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Persistent set of banned addresses with optional expiry.
///
/// The map and the ban file are guarded by one lock so that every mutation
/// reaches the file before the call returns.
pub struct BanStore {
    enabled: bool,
    ban_file: PathBuf,
    ban_duration: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, BanEntry>>,
}

impl BanStore {
    /// Load the ban file, creating it when missing and dropping expired entries.
    pub async fn load(config: &IpBanningConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self {
            enabled: config.enabled,
            ban_file: PathBuf::from(&config.ban_file),
            ban_duration: Duration::seconds(config.ban_duration_seconds),
            clock,
            entries: Mutex::new(HashMap::new()),
        };

        if !store.enabled {
            info!("IP banning disabled");
            return Ok(store);
        }

        let mut entries = store.entries.lock().await;

        if !store.ban_file.exists() {
            store.create_ban_file().await?;
            info!(ban_file = %store.ban_file.display(), "Created ban file");
            drop(entries);
            return Ok(store);
        }

        let content = fs::read_to_string(&store.ban_file)
            .await
            .with_context(|| format!("Failed to read ban file: {}", store.ban_file.display()))?;

        let now = store.clock.now();
        let mut dropped = 0usize;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((address, banned_at)) = parse_ban_line(line) else {
                warn!(line = line_no + 1, content = line, "Skipping malformed ban file line");
                continue;
            };

            let entry = BanEntry {
                banned_at,
                reason: LOADED_REASON.to_string(),
            };

            if store.is_expired(&entry, now) {
                dropped += 1;
                continue;
            }

            entries.insert(address, entry);
        }

        if dropped > 0 {
            if let Err(e) = store.rewrite_ban_file(&entries).await {
                warn!(error = %e, "Failed to rewrite ban file after dropping expired entries");
            }
        }

        info!(
            ban_file = %store.ban_file.display(),
            loaded = entries.len(),
            expired = dropped,
            "Loaded banned addresses"
        );

        drop(entries);
        Ok(store)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ban_file(&self) -> &Path {
        &self.ban_file
    }

    /// Whether the address currently has a live ban. Expired bans are evicted.
    pub async fn is_banned(&self, address: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        let expired = match entries.get(address) {
            None => return false,
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            entries.remove(address);
            debug!(ip = address, "Ban expired");
            if let Err(e) = self.rewrite_ban_file(&entries).await {
                warn!(ip = address, error = %e, "Failed to persist ban expiry");
            }
            return false;
        }

        true
    }

    /// Ban an address. Returns false when it is already banned or banning is off.
    pub async fn ban(&self, address: &str, reason: &str, permanent: bool) -> bool {
        if !self.enabled {
            return false;
        }

        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        let stale = match entries.get(address) {
            Some(entry) if !self.is_expired(entry, now) => return false,
            Some(_) => true,
            None => false,
        };

        let entry = BanEntry {
            banned_at: if permanent { None } else { Some(now) },
            reason: reason.to_string(),
        };
        entries.insert(address.to_string(), entry.clone());

        // An expired line for this address is still on disk
        let persisted = if stale {
            self.rewrite_ban_file(&entries).await
        } else {
            self.append_ban(address, &entry).await
        };
        if let Err(e) = persisted {
            warn!(ip = address, error = %e, "Failed to persist ban");
        }

        info!(ip = address, reason = reason, permanent = permanent, "IP banned");
        true
    }

    /// Lift a ban. Returns false when the address was not banned.
    pub async fn unban(&self, address: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let mut entries = self.entries.lock().await;
        if entries.remove(address).is_none() {
            return false;
        }

        if let Err(e) = self.rewrite_ban_file(&entries).await {
            warn!(ip = address, error = %e, "Failed to persist unban");
        }

        info!(ip = address, "IP unbanned");
        true
    }

    /// Live bans, after evicting everything that has expired.
    pub async fn list_banned(&self) -> BTreeSet<String> {
        if !self.enabled {
            return BTreeSet::new();
        }

        let entries = self.evict_expired().await;
        let banned: BTreeSet<String> = entries.keys().cloned().collect();
        banned
    }

    /// Live bans with their details, ordered by address.
    pub async fn list_banned_details(&self) -> Vec<BanInfo> {
        if !self.enabled {
            return Vec::new();
        }

        let entries = self.evict_expired().await;
        let mut details: Vec<BanInfo> = entries
            .iter()
            .map(|(address, entry)| self.to_info(address, entry))
            .collect();
        details.sort_by(|a, b| a.ip.cmp(&b.ip));
        details
    }

    pub async fn ban_info(&self, address: &str) -> Option<BanInfo> {
        if !self.is_banned(address).await {
            return None;
        }

        let entries = self.entries.lock().await;
        entries.get(address).map(|entry| self.to_info(address, entry))
    }

    pub async fn len(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        self.evict_expired().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the ban file can currently be opened for appending.
    pub async fn is_writable(&self) -> bool {
        if !self.enabled {
            return true;
        }
        fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.ban_file)
            .await
            .is_ok()
    }

    async fn evict_expired(&self) -> tokio::sync::MutexGuard<'_, HashMap<String, BanEntry>> {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));

        if entries.len() != before {
            debug!(evicted = before - entries.len(), "Evicted expired bans");
            if let Err(e) = self.rewrite_ban_file(&entries).await {
                warn!(error = %e, "Failed to persist ban expiry");
            }
        }

        entries
    }

    fn is_expired(&self, entry: &BanEntry, now: DateTime<Utc>) -> bool {
        match entry.banned_at {
            None => false,
            Some(banned_at) => now - banned_at >= self.ban_duration,
        }
    }

    fn to_info(&self, address: &str, entry: &BanEntry) -> BanInfo {
        BanInfo {
            ip: address.to_string(),
            banned: true,
            permanent: entry.banned_at.is_none(),
            banned_at: entry.banned_at,
            expires_at: entry.banned_at.map(|at| at + self.ban_duration),
            reason: entry.reason.clone(),
        }
    }

    async fn create_ban_file(&self) -> Result<()> {
        if let Some(parent) = self.ban_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.ban_file, BAN_FILE_HEADER)
            .await
            .with_context(|| format!("Failed to create ban file: {}", self.ban_file.display()))
    }

    async fn append_ban(&self, address: &str, entry: &BanEntry) -> Result<()> {
        if !self.ban_file.exists() {
            self.create_ban_file().await?;
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.ban_file)
            .await
            .with_context(|| format!("Failed to open ban file: {}", self.ban_file.display()))?;
        file.write_all(format_ban_line(address, entry.banned_at).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    async fn rewrite_ban_file(&self, entries: &HashMap<String, BanEntry>) -> Result<()> {
        let mut content = String::from(BAN_FILE_HEADER);
        let mut addresses: Vec<&String> = entries.keys().collect();
        addresses.sort();

        for address in addresses {
            content.push_str(&format_ban_line(address, entries[address].banned_at));
        }

        fs::write(&self.ban_file, content)
            .await
            .with_context(|| format!("Failed to rewrite ban file: {}", self.ban_file.display()))
    }
}

/// Parse `address:timestamp`, splitting on the last colon so IPv6 survives.
/// An unparseable or zero timestamp is a permanent ban.
fn parse_ban_line(line: &str) -> Option<(String, Option<DateTime<Utc>>)> {
    let (address, timestamp) = line.rsplit_once(':')?;
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    let banned_at = match timestamp.trim().parse::<f64>() {
        Ok(seconds) if seconds > 0.0 && seconds.is_finite() => {
            DateTime::from_timestamp_micros((seconds * 1_000_000.0) as i64)
        }
        _ => None,
    };

    Some((address.to_string(), banned_at))
}

fn format_ban_line(address: &str, banned_at: Option<DateTime<Utc>>) -> String {
    match banned_at {
        None => format!("{}:0\n", address),
        Some(at) => format!("{}:{:.6}\n", address, at.timestamp_micros() as f64 / 1_000_000.0),
    }
}
