use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::capture::{CaptureInsertResult, CaptureRequest, CaptureResponse, CaptureStore};
use crate::query::{CaptureEntry, CaptureQuery, CaptureSort};
use crate::schema::SchemaCatalog;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|err| err.to_string())?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|err| err.to_string())?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), String> {
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| err.to_string())?;
        self.conn
            .pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| err.to_string())?;

        let schema = SchemaCatalog::v1();
        SchemaCatalog::validate(&schema).map_err(|err| err.to_string())?;
        for table in schema.tables {
            self.conn
                .execute(&table.create_sql, [])
                .map_err(|err| err.to_string())?;
            for index in table.indices {
                let index_sql = index.replace("CREATE INDEX", "CREATE INDEX IF NOT EXISTS");
                self.conn
                    .execute(&index_sql, [])
                    .map_err(|err| err.to_string())?;
            }
        }

        Ok(())
    }

    fn ensure_source_id(&self, source: &str) -> Result<i64, String> {
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM capture_sources WHERE name = ?1",
                [source],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|err| err.to_string())?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute("INSERT INTO capture_sources (name) VALUES (?1)", [source])
            .map_err(|err| err.to_string())?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_request_inner(&self, request: &CaptureRequest) -> Result<i64, String> {
        let source_id = self.ensure_source_id(&request.source)?;
        self.conn
            .execute(
                "INSERT INTO capture_requests (
                    source_id, destination, method, scheme, host, port, target, query, url,
                    http_version, request_head, request_body, request_body_size,
                    request_body_truncated, started_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    source_id,
                    request.destination,
                    request.method,
                    request.scheme,
                    request.host,
                    request.port,
                    request.target,
                    request.query,
                    request.url,
                    request.http_version,
                    request.request_head,
                    request.request_body,
                    request.request_body_size as i64,
                    request.request_body_truncated as i32,
                    request.started_at,
                ],
            )
            .map_err(|err| err.to_string())?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_response_inner(&self, response: &CaptureResponse) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO capture_responses (
                    capture_request_id, status_code, reason, response_head,
                    response_body, response_body_size, response_body_truncated,
                    http_version, received_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    response.capture_request_id,
                    response.status_code,
                    response.reason,
                    response.response_head,
                    response.response_body,
                    response.response_body_size as i64,
                    response.response_body_truncated as i32,
                    response.http_version,
                    response.received_at,
                ],
            )
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    pub fn query_requests(
        &self,
        query: &CaptureQuery,
        sort: CaptureSort,
    ) -> Result<Vec<CaptureEntry>, String> {
        let mut sql = String::from(
            "SELECT req.id, source.name, req.destination, req.method, req.scheme, req.host, req.port, req.target, req.query, req.url, req.http_version, req.request_head, req.request_body, req.request_body_size, req.request_body_truncated, req.started_at, resp.status_code FROM capture_requests req JOIN capture_sources source ON req.source_id = source.id LEFT JOIN capture_responses resp ON resp.capture_request_id = req.id",
        );
        let mut where_clauses = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(host) = &query.host {
            where_clauses.push("req.host = ?");
            params.push(host.clone().into());
        }
        if let Some(method) = &query.method {
            where_clauses.push("req.method = ?");
            params.push(method.clone().into());
        }
        if let Some(status) = query.status {
            where_clauses.push("resp.status_code = ?");
            params.push(i64::from(status).into());
        }
        if let Some(destination) = &query.destination {
            where_clauses.push("req.destination = ?");
            params.push(destination.clone().into());
        }
        if let Some(source) = &query.source {
            where_clauses.push("source.name = ?");
            params.push(source.clone().into());
        }

        if !where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clauses.join(" AND "));
        }

        match sort {
            CaptureSort::StartedAtDesc => sql.push_str(" ORDER BY req.started_at DESC, req.id DESC"),
            CaptureSort::StartedAtAsc => sql.push_str(" ORDER BY req.started_at ASC, req.id ASC"),
        }
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push((query.limit as i64).into());
        params.push((query.offset as i64).into());

        let mut statement = self.conn.prepare(&sql).map_err(|err| err.to_string())?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(params.iter()), parse_entry_row)
            .map_err(|err| err.to_string())?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|err| err.to_string())?);
        }
        Ok(results)
    }

    pub fn count_requests(&self) -> Result<u64, String> {
        self.count("SELECT COUNT(*) FROM capture_requests")
    }

    pub fn count_responses(&self) -> Result<u64, String> {
        self.count("SELECT COUNT(*) FROM capture_responses")
    }

    fn count(&self, sql: &str) -> Result<u64, String> {
        self.conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|count| count as u64)
            .map_err(|err| err.to_string())
    }
}

impl CaptureStore for SqliteStore {
    fn insert_request(&self, request: CaptureRequest) -> Result<CaptureInsertResult, String> {
        let id = self.insert_request_inner(&request)?;
        Ok(CaptureInsertResult { request_id: id })
    }

    fn insert_response(&self, response: CaptureResponse) -> Result<(), String> {
        self.insert_response_inner(&response)
    }
}

fn parse_entry_row(row: &Row<'_>) -> Result<CaptureEntry, rusqlite::Error> {
    Ok(CaptureEntry {
        id: row.get(0)?,
        request: CaptureRequest {
            source: row.get(1)?,
            destination: row.get(2)?,
            method: row.get(3)?,
            scheme: row.get(4)?,
            host: row.get(5)?,
            port: row.get::<_, i64>(6)? as u16,
            target: row.get(7)?,
            query: row.get(8)?,
            url: row.get(9)?,
            http_version: row.get(10)?,
            request_head: row.get(11)?,
            request_body: row.get::<_, Option<Vec<u8>>>(12)?.unwrap_or_default(),
            request_body_size: row.get::<_, i64>(13)? as usize,
            request_body_truncated: row.get::<_, i64>(14)? != 0,
            started_at: row.get(15)?,
        },
        status_code: row.get::<_, Option<i64>>(16)?.map(|code| code as u16),
    })
}
