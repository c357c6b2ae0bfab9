pub mod audit_event;
pub mod audit_logger;
pub mod audit_storage;

pub use audit_event::{AuditEvent, AuditEventType};
pub use audit_logger::AuditLogger;
pub use audit_storage::{AuditStorage, FileAuditStorage, MemoryAuditStorage};

use crate::config::LoggingConfig;
use anyhow::Result;
use std::sync::Arc;

/// Initialize the decision log for the configured files
pub async fn initialize_audit_system(config: &LoggingConfig) -> Result<Arc<AuditLogger>> {
    let audit_logger = AuditLogger::from_config(config)?;

    if audit_logger.is_enabled() {
        tracing::info!(
            log_file = %config.log_file,
            accept_log_file = %config.accept_log_file,
            reject_log_file = %config.reject_log_file,
            "Decision log initialized"
        );
    } else {
        tracing::info!("Decision log disabled");
    }

    Ok(Arc::new(audit_logger))
}
