use crate::audit::audit_event::AuditEvent;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::fs;
use tokio::sync::Mutex;

#[async_trait]
pub trait AuditStorage: Send + Sync {
    async fn store_event(&self, event: &AuditEvent) -> Result<()>;
    async fn get_events_by_timerange(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditEvent>>;
    async fn get_events_by_ip(&self, ip: &str) -> Result<Vec<AuditEvent>>;
    fn location(&self) -> String;
}

/// Append-only JSON-lines file.
pub struct FileAuditStorage {
    file_path: String,
}

impl FileAuditStorage {
    pub fn new(file_path: impl Into<String>) -> Result<Self> {
        let file_path = file_path.into();
        // Ensure the directory exists
        if let Some(parent) = Path::new(&file_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self { file_path })
    }

    async fn read_events(&self) -> Result<Vec<AuditEvent>> {
        if !Path::new(&self.file_path).exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.file_path).await?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str::<AuditEvent>(line).ok())
            .collect())
    }
}

#[async_trait]
impl AuditStorage for FileAuditStorage {
    async fn store_event(&self, event: &AuditEvent) -> Result<()> {
        let event_json = serde_json::to_string(event)?;
        let log_line = format!("{}\n", event_json);

        // Blocking file I/O goes through spawn_blocking to keep the runtime responsive
        let file_path = self.file_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = OpenOptions::new().create(true).append(true).open(&file_path)?;
            file.write_all(log_line.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn get_events_by_timerange(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .read_events()
            .await?
            .into_iter()
            .filter(|event| event.timestamp >= start && event.timestamp <= end)
            .collect();

        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    async fn get_events_by_ip(&self, ip: &str) -> Result<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .read_events()
            .await?
            .into_iter()
            .filter(|event| event.ip.as_deref() == Some(ip))
            .collect();

        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    fn location(&self) -> String {
        self.file_path.clone()
    }
}

/// In-process storage, used when file logging is off and in tests.
#[derive(Default)]
pub struct MemoryAuditStorage {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditStorage for MemoryAuditStorage {
    async fn store_event(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn get_events_by_timerange(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        Ok(self
            .events
            .lock()
            .await
            .iter()
            .filter(|event| event.timestamp >= start && event.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn get_events_by_ip(&self, ip: &str) -> Result<Vec<AuditEvent>> {
        Ok(self
            .events
            .lock()
            .await
            .iter()
            .filter(|event| event.ip.as_deref() == Some(ip))
            .cloned()
            .collect())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::audit_event::AuditEventType;
    use chrono::Duration;

    #[tokio::test]
    async fn test_file_storage_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("log.txt");
        let storage = FileAuditStorage::new(path.to_string_lossy().to_string()).unwrap();

        let first = AuditEvent::new(AuditEventType::Decision, "ACCEPT", "clean request").with_ip("10.0.0.1");
        let second = AuditEvent::new(AuditEventType::Decision, "REJECT", "bad").with_ip("10.0.0.2");
        storage.store_event(&first).await.unwrap();
        storage.store_event(&second).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let by_ip = storage.get_events_by_ip("10.0.0.2").await.unwrap();
        assert_eq!(by_ip.len(), 1);
        assert_eq!(by_ip[0].decision, "REJECT");
    }

    #[tokio::test]
    async fn test_file_storage_skips_foreign_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "# header line\nnot json\n").unwrap();
        let storage = FileAuditStorage::new(path.to_string_lossy().to_string()).unwrap();

        storage
            .store_event(&AuditEvent::new(AuditEventType::System, "SYSTEM", "start"))
            .await
            .unwrap();

        let now = Utc::now();
        let events = storage
            .get_events_by_timerange(now - Duration::minutes(1), now + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
