use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::record::ListenPort;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("listen port {0} is already in use by an enabled record")]
    PortInUse(u16),
    #[error("unknown listen-port record {0}")]
    UnknownRecord(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct PortChange {
    pub kind: PortChangeKind,
    pub record: ListenPort,
}

pub type PortEvents = UnboundedReceiverStream<PortChange>;

/// In-memory listen-port configuration service. Every successful mutation
/// is published on the change stream so the endpoint provisioner can open
/// or tear down the matching sockets.
pub struct PortRegistry {
    records: HashMap<Uuid, ListenPort>,
    sender: mpsc::UnboundedSender<PortChange>,
}

impl PortRegistry {
    pub fn new() -> (Self, PortEvents) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                records: HashMap::new(),
                sender,
            },
            UnboundedReceiverStream::new(receiver),
        )
    }

    pub fn create(&mut self, record: ListenPort) -> Result<(), PortError> {
        if record.enabled && self.port_taken(record.port, record.id) {
            return Err(PortError::PortInUse(record.port));
        }
        self.records.insert(record.id, record.clone());
        self.notify(PortChangeKind::Created, record);
        Ok(())
    }

    pub fn update(&mut self, mut record: ListenPort) -> Result<(), PortError> {
        if !self.records.contains_key(&record.id) {
            return Err(PortError::UnknownRecord(record.id));
        }
        if record.enabled && self.port_taken(record.port, record.id) {
            return Err(PortError::PortInUse(record.port));
        }
        record.updated_at = Utc::now().to_rfc3339();
        self.records.insert(record.id, record.clone());
        self.notify(PortChangeKind::Updated, record);
        Ok(())
    }

    pub fn delete(&mut self, id: Uuid) -> Result<ListenPort, PortError> {
        let record = self.records.remove(&id).ok_or(PortError::UnknownRecord(id))?;
        self.notify(PortChangeKind::Deleted, record.clone());
        Ok(record)
    }

    pub fn query(&self, id: Uuid) -> Option<&ListenPort> {
        self.records.get(&id)
    }

    pub fn query_all(&self) -> Vec<ListenPort> {
        let mut records: Vec<ListenPort> = self.records.values().cloned().collect();
        records.sort_by_key(|record| record.port);
        records
    }

    pub fn query_enabled(&self) -> Vec<ListenPort> {
        let mut records: Vec<ListenPort> = self
            .records
            .values()
            .filter(|record| record.enabled)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.port);
        records
    }

    fn port_taken(&self, port: u16, excluding: Uuid) -> bool {
        self.records
            .values()
            .any(|record| record.enabled && record.port == port && record.id != excluding)
    }

    fn notify(&self, kind: PortChangeKind, record: ListenPort) {
        // Nobody may be listening for changes; that is fine.
        let _ = self.sender.send(PortChange { kind, record });
    }
}
