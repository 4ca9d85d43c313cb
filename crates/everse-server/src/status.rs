use serde::{Deserialize, Serialize};

/// Body of `GET /status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub running: bool,
    pub mdns: bool,
    pub address: String,
    pub local_ip: Option<String>,
    pub port: u16,
}
