use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub tunnel_id: String,
    pub token: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeployWorkerParams {
    pub worker_name: String,
    pub access_token: String,
    pub hostname: String,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injection: Option<String>,
}
