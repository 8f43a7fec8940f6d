use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the listen-port table: which local port to open, how to treat
/// the traffic, which CA identity signs for it (if any), and where to
/// forward. The relay core never interprets these fields; the endpoint
/// provisioner resolves them into live sockets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenPort {
    pub id: Uuid,
    pub enabled: bool,
    pub port: u16,
    pub port_type: PortType,
    pub ca_name: Option<String>,
    pub forward: ForwardTarget,
    pub created_at: String,
    pub updated_at: String,
}

impl ListenPort {
    pub fn new(port: u16, port_type: PortType, forward: ForwardTarget) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4(),
            enabled: true,
            port,
            port_type,
            ca_name: None,
            forward,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PortType {
    HttpProxy,
    Forwarder,
    SslForwarder,
    UdpForwarder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
}

impl ForwardTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
