use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub create_sql: String,
    pub indices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaSpec {
    pub version: u32,
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema version must be greater than zero")]
    InvalidVersion,
    #[error("schema must include at least one table")]
    EmptyTables,
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("table definition cannot be empty for {0}")]
    EmptyTableDefinition(String),
}

pub struct SchemaCatalog;

impl SchemaCatalog {
    pub fn v1() -> SchemaSpec {
        SchemaSpec {
            version: 1,
            tables: vec![
                TableSpec {
                    name: "capture_sources".to_string(),
                    create_sql: "CREATE TABLE IF NOT EXISTS capture_sources (\
    id INTEGER PRIMARY KEY,\
    name TEXT NOT NULL UNIQUE\
)"
                    .to_string(),
                    indices: vec![],
                },
                TableSpec {
                    name: "capture_requests".to_string(),
                    create_sql: "CREATE TABLE IF NOT EXISTS capture_requests (\
    id INTEGER PRIMARY KEY,\
    source_id INTEGER NOT NULL REFERENCES capture_sources(id),\
    destination TEXT NOT NULL,\
    method TEXT NOT NULL,\
    scheme TEXT NOT NULL,\
    host TEXT NOT NULL,\
    port INTEGER NOT NULL,\
    target TEXT NOT NULL,\
    query TEXT,\
    url TEXT NOT NULL,\
    http_version TEXT NOT NULL,\
    request_head BLOB NOT NULL,\
    request_body BLOB,\
    request_body_size INTEGER NOT NULL DEFAULT 0,\
    request_body_truncated INTEGER NOT NULL DEFAULT 0,\
    started_at TEXT NOT NULL\
)"
                    .to_string(),
                    indices: vec![
                        "CREATE INDEX idx_capture_requests_started_at ON capture_requests(started_at)"
                            .to_string(),
                        "CREATE INDEX idx_capture_requests_host ON capture_requests(host)".to_string(),
                        "CREATE INDEX idx_capture_requests_destination ON capture_requests(destination)"
                            .to_string(),
                        "CREATE INDEX idx_capture_requests_method ON capture_requests(method)"
                            .to_string(),
                    ],
                },
                TableSpec {
                    name: "capture_responses".to_string(),
                    create_sql: "CREATE TABLE IF NOT EXISTS capture_responses (\
    id INTEGER PRIMARY KEY,\
    capture_request_id INTEGER NOT NULL REFERENCES capture_requests(id),\
    status_code INTEGER NOT NULL,\
    reason TEXT,\
    response_head BLOB NOT NULL,\
    response_body BLOB,\
    response_body_size INTEGER NOT NULL DEFAULT 0,\
    response_body_truncated INTEGER NOT NULL DEFAULT 0,\
    http_version TEXT NOT NULL,\
    received_at TEXT NOT NULL\
)"
                    .to_string(),
                    indices: vec![
                        "CREATE INDEX idx_capture_responses_request_id ON capture_responses(capture_request_id)"
                            .to_string(),
                        "CREATE INDEX idx_capture_responses_status_code ON capture_responses(status_code)"
                            .to_string(),
                    ],
                },
            ],
        }
    }

    pub fn validate(schema: &SchemaSpec) -> Result<(), SchemaError> {
        if schema.version == 0 {
            return Err(SchemaError::InvalidVersion);
        }
        if schema.tables.is_empty() {
            return Err(SchemaError::EmptyTables);
        }
        for table in &schema.tables {
            if table.name.trim().is_empty() {
                return Err(SchemaError::EmptyTableName);
            }
            if table.create_sql.trim().is_empty() {
                return Err(SchemaError::EmptyTableDefinition(table.name.clone()));
            }
        }
        Ok(())
    }
}
