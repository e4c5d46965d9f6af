//! MySQL-style relational sink.
//!
//! Unlike the Postgres dialect there is no `ADD COLUMN IF NOT EXISTS`, so
//! every newly-observed key is gated on an `information_schema` existence
//! query before its ALTER runs. Inserts are a single batched
//! `REPLACE INTO … VALUES (…), (…)` per flush; payloads missing a column
//! render `NULL` in that position.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool};
use rivulet_core::spec::{config_str, config_u64};
use rivulet_core::{BatchBuffer, Payload, Sink, TargetSpec, TargetSpecs, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::schema::{column_kind, render_literal, synthesize_key, ColumnKind};

pub struct MysqlSink {
    specs: TargetSpecs,
    key_column: String,
    state: Mutex<MysqlState>,
}

struct MysqlState {
    pool: Option<Pool>,
    /// First-seen column order, key column always first; fixes the layout
    /// of the batched REPLACE statement.
    columns: Vec<String>,
    buffer: BatchBuffer<Payload>,
}

impl MysqlSink {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            key_column: spec.specs.key_column_or_default().to_string(),
            specs: spec.specs.clone(),
            state: Mutex::new(MysqlState {
                pool: None,
                columns: Vec::new(),
                buffer: BatchBuffer::new(),
            }),
        }
    }
}

#[async_trait]
impl Sink for MysqlSink {
    fn kind(&self) -> &'static str {
        "mysql"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.pool.is_some() {
            return Ok(());
        }

        let configurations = &self.specs.configurations;
        let Some(host) = config_str(configurations, "host") else {
            bail!("target host not defined");
        };
        let Some(user) = config_str(configurations, "user") else {
            bail!("target user not defined");
        };
        let Some(password) = config_str(configurations, "password") else {
            bail!("target password not defined");
        };
        let port = config_u64(configurations, "port").unwrap_or(3306) as u16;

        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name((!self.specs.database.is_empty()).then_some(self.specs.database.as_str()))
            .into();

        let pool = Pool::new(opts);
        let mut conn = pool
            .get_conn()
            .await
            .context("failed to connect target mysql")?;

        conn.query_drop(create_table_statement(&self.specs.table, &self.key_column))
            .await
            .with_context(|| format!("failed to initialize table {}", self.specs.table))?;

        info!(
            "initialize target table {} with primary key {}",
            self.specs.table, self.key_column
        );

        state.columns.push(self.key_column.clone());
        state.pool = Some(pool);
        Ok(())
    }

    async fn attach(&self, _key: &str, payload: &Payload) -> Result<()> {
        let mut state = self.state.lock().await;
        state.buffer.push(payload.clone(), 0);
        debug!("queue size: {}", state.buffer.len());
        metrics::increment_counter!("rivulet_records_attached_total", "sink" => "mysql");
        Ok(())
    }

    async fn can_flush(&self) -> bool {
        let state = self.state.lock().await;
        state.buffer.should_flush(0, self.specs.batch_size, false)
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.buffer.is_empty() {
            return Ok(());
        }

        let payloads = state.buffer.drain();
        info!("flush {} events", payloads.len());

        let pool = state
            .pool
            .as_ref()
            .ok_or_else(|| anyhow!("mysql pool not initialized"))?
            .clone();
        let mut conn = pool.get_conn().await.context("failed to acquire mysql connection")?;

        let mut rows: Vec<HashMap<String, String>> = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let mut row = HashMap::new();

            for (key, value) in payload {
                if !state.columns.contains(key) {
                    let exists: Option<u64> = conn
                        .query_first(has_column_statement(&self.specs.table, key))
                        .await
                        .context("failed to query column existence")?;

                    if exists.unwrap_or(0) == 0 {
                        info!("column {key} not found, running build script...");
                        let alter =
                            alter_statement(&self.specs.table, key, &self.key_column, value);
                        debug!("{alter}");
                        conn.query_drop(alter)
                            .await
                            .with_context(|| format!("failed to add column {key}"))?;
                    }

                    state.columns.push(key.clone());
                }

                row.insert(key.clone(), render_literal(value));
            }

            if !row.contains_key(&self.key_column) {
                let values: Vec<String> = state
                    .columns
                    .iter()
                    .filter_map(|c| row.get(c).cloned())
                    .collect();
                row.insert(
                    self.key_column.clone(),
                    format!("'{}'", synthesize_key(&values)),
                );
            }

            rows.push(row);
        }

        let statement = assemble_replace(&self.specs.table, &state.columns, &rows);
        debug!("sql:\n{statement}");
        conn.query_drop(statement).await?;

        metrics::counter!("rivulet_records_flushed_total", payloads.len() as u64, "sink" => "mysql");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(pool) = state.pool.take() {
            pool.disconnect()
                .await
                .context("failed to disconnect mysql pool")?;
        }
        Ok(())
    }
}

fn create_table_statement(table: &str, key_column: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({key_column} varchar(90) NOT NULL, PRIMARY KEY ({key_column}));"
    )
}

fn has_column_statement(table: &str, column: &str) -> String {
    format!(
        "SELECT count(1) FROM information_schema.COLUMNS WHERE TABLE_SCHEMA=DATABASE() AND TABLE_NAME='{table}' AND COLUMN_NAME='{column}'"
    )
}

fn alter_statement(table: &str, column: &str, key_column: &str, value: &Value) -> String {
    let number_default = if column == key_column {
        "NOT NULL"
    } else {
        "NOT NULL DEFAULT 0"
    };
    let text_default = if column == key_column { "NOT NULL" } else { "NULL" };

    match column_kind(value) {
        ColumnKind::Int => format!("ALTER TABLE {table} ADD COLUMN {column} INT {number_default};"),
        ColumnKind::Numeric => {
            format!("ALTER TABLE {table} ADD COLUMN {column} NUMERIC(12,2) {number_default};")
        }
        ColumnKind::Bool => {
            format!("ALTER TABLE {table} ADD COLUMN {column} BOOL NOT NULL DEFAULT false;")
        }
        ColumnKind::Json => format!("ALTER TABLE {table} ADD COLUMN {column} JSON NULL;"),
        ColumnKind::Date | ColumnKind::Timestamp => {
            format!("ALTER TABLE {table} ADD COLUMN {column} DATETIME {text_default};")
        }
        ColumnKind::Varchar => {
            format!("ALTER TABLE {table} ADD COLUMN {column} VARCHAR(255) {text_default};")
        }
    }
}

/// One batched REPLACE for the whole flush, values laid out in the sink's
/// column order with `NULL` holes for absent keys.
fn assemble_replace(table: &str, columns: &[String], rows: &[HashMap<String, String>]) -> String {
    let inserts: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = columns
                .iter()
                .map(|column| row.get(column).cloned().unwrap_or_else(|| "NULL".to_string()))
                .collect();
            format!("({})", values.join(","))
        })
        .collect();

    format!(
        "REPLACE INTO {table} ({}) values {};",
        columns.join(","),
        inserts.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_statement_lays_out_rows_in_column_order() {
        let columns = vec!["id".to_string(), "name".to_string(), "age".to_string()];
        let mut first = HashMap::new();
        first.insert("id".to_string(), "'a'".to_string());
        first.insert("name".to_string(), "'Ada'".to_string());
        first.insert("age".to_string(), "'36'".to_string());
        let mut second = HashMap::new();
        second.insert("id".to_string(), "'b'".to_string());
        second.insert("name".to_string(), "'Bob'".to_string());

        let statement = assemble_replace("people", &columns, &[first, second]);
        assert_eq!(
            statement,
            "REPLACE INTO people (id,name,age) values ('a','Ada','36'),('b','Bob',NULL);"
        );
    }

    #[test]
    fn alter_statements_are_gated_per_dialect() {
        assert_eq!(
            alter_statement("t", "n", "id", &Value::from(1)),
            "ALTER TABLE t ADD COLUMN n INT NOT NULL DEFAULT 0;"
        );
        assert_eq!(
            alter_statement("t", "ts", "id", &Value::String("2024-03-07T10:00:00".into())),
            "ALTER TABLE t ADD COLUMN ts DATETIME NULL;"
        );
        assert!(!alter_statement("t", "x", "id", &Value::String("plain".into()))
            .contains("IF NOT EXISTS"));
    }

    #[test]
    fn existence_query_targets_information_schema() {
        let query = has_column_statement("people", "name");
        assert!(query.contains("information_schema.COLUMNS"));
        assert!(query.contains("TABLE_NAME='people'"));
        assert!(query.contains("COLUMN_NAME='name'"));
    }
}
