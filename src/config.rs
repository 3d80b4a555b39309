use crate::constants::connection;
use crate::error::DocGraphResult;
use serde::Deserialize;

/// Per-process settings shared by the compilers and the orchestrator.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Key under which each edge document holds its node
    pub node_path: String,
    /// Identifier field of node types
    pub id_field: String,
    /// Discriminator field for members of unions/interfaces that are not nodes
    pub type_field: String,
    /// Appended to every sort document so offsets are reproducible
    pub sort_tiebreaker: Option<String>,
    /// Upper bound applied to the page limit
    pub max_rows: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            node_path: connection::NODE.to_string(),
            id_field: "id".to_string(),
            type_field: "_type".to_string(),
            sort_tiebreaker: Some("_id".to_string()),
            max_rows: None,
        }
    }
}

impl ConnectionConfig {
    pub fn from_json(value: serde_json::Value) -> DocGraphResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
