use csv::WriterBuilder;

use super::domain::{LogEntry, Role, UserId};
use super::repository::{DirectoryRepository, WorkflowRepository};
use super::service::{RequestWorkflowService, WorkflowError};

#[derive(Debug, thiserror::Error)]
pub enum AuditExportError {
    #[error("failed to write audit row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush audit export: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit export is not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Render log entries as CSV, oldest first.
pub fn audit_csv(entries: &[LogEntry]) -> Result<String, AuditExportError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["recorded_at", "state", "request_id", "actor", "message"])?;
    for entry in entries {
        writer.write_record([
            entry.recorded_at.to_rfc3339().as_str(),
            entry.state.label(),
            entry.request_id.as_ref().map_or("", |id| id.as_str()),
            entry.actor.as_str(),
            entry.message.as_str(),
        ])?;
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|err| AuditExportError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;
    Ok(String::from_utf8(bytes)?)
}

impl<R> RequestWorkflowService<R>
where
    R: DirectoryRepository + WorkflowRepository + 'static,
{
    /// Full audit trail as CSV. Director general only.
    pub fn export_audit(&self, actor_id: &UserId) -> Result<String, WorkflowError> {
        let actor = self.actor(actor_id)?;
        if actor.role != Role::Dg {
            return Err(WorkflowError::Forbidden(
                "export réservé au DG".to_string(),
            ));
        }
        let entries = self.repository.audit_trail()?;
        audit_csv(&entries).map_err(|err| WorkflowError::Export(err.to_string()))
    }
}
