use serde::Serialize;

use crate::record::{TransferRecord, TransferStatus};

/// Notifications published by the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    /// Bytes moved; carries a fresh snapshot with statistics.
    Progress(TransferRecord),
    /// Lifecycle transition.
    #[serde(rename_all = "camelCase")]
    StateChanged {
        transfer_id: String,
        status: TransferStatus,
        error: Option<String>,
    },
}

impl TransferEvent {
    pub fn transfer_id(&self) -> &str {
        match self {
            Self::Progress(rec) => &rec.id,
            Self::StateChanged { transfer_id, .. } => transfer_id,
        }
    }
}
