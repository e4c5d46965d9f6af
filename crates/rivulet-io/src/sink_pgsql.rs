//! Postgres-style relational sink.
//!
//! The table is created at initialize with the key column as primary key;
//! every flush appends idempotent `ADD COLUMN IF NOT EXISTS` statements for
//! newly-observed payload keys, one `INSERT … ON CONFLICT DO NOTHING` per
//! payload, and executes the whole script in a single batch call.

use std::collections::HashSet;
use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rivulet_core::spec::{config_str, config_u64};
use rivulet_core::{BatchBuffer, Payload, Sink, TargetSpec, TargetSpecs};
use tokio::sync::Mutex;
use tokio_postgres::NoTls;
use tracing::{debug, error, info};

use crate::schema::{column_kind, render_literal, synthesize_key, ColumnKind};

pub struct PgsqlSink {
    specs: TargetSpecs,
    key_column: String,
    state: Mutex<PgsqlState>,
}

struct PgsqlState {
    client: Option<tokio_postgres::Client>,
    columns: HashSet<String>,
    buffer: BatchBuffer<Payload>,
}

impl PgsqlSink {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            key_column: spec.specs.key_column_or_default().to_string(),
            specs: spec.specs.clone(),
            state: Mutex::new(PgsqlState {
                client: None,
                columns: HashSet::new(),
                buffer: BatchBuffer::new(),
            }),
        }
    }
}

#[async_trait]
impl Sink for PgsqlSink {
    fn kind(&self) -> &'static str {
        "pgsql"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.client.is_some() {
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
        let Some(sslmode) = config_str(configurations, "sslmode") else {
            bail!("target sslmode not defined");
        };
        let port = config_u64(configurations, "port").unwrap_or(5432);

        let conn = format!(
            "host={host} port={port} user={user} password={password} dbname={} sslmode={sslmode}",
            self.specs.database
        );

        let (client, connection) = tokio_postgres::connect(&conn, NoTls)
            .await
            .context("failed to connect target pgsql")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("pgsql connection error: {e}");
            }
        });

        client
            .batch_execute(&create_table_statement(&self.specs.table, &self.key_column))
            .await
            .with_context(|| format!("failed to initialize table {}", self.specs.table))?;

        info!(
            "initialize target table {} with primary key {}",
            self.specs.table, self.key_column
        );

        state.client = Some(client);
        Ok(())
    }

    async fn attach(&self, _key: &str, payload: &Payload) -> Result<()> {
        let mut state = self.state.lock().await;
        state.buffer.push(payload.clone(), 0);
        debug!("queue size: {}", state.buffer.len());
        metrics::increment_counter!("rivulet_records_attached_total", "sink" => "pgsql");
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

        let mut script = String::new();
        for payload in &payloads {
            build_commands(
                &mut script,
                &self.specs.table,
                &self.key_column,
                payload,
                &mut state.columns,
            );
        }

        debug!("sql:\n{script}");

        let client = state
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("pgsql client not initialized"))?;
        client.batch_execute(&script).await?;

        metrics::counter!("rivulet_records_flushed_total", payloads.len() as u64, "sink" => "pgsql");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.client = None;
        Ok(())
    }
}

fn create_table_statement(table: &str, key_column: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({key_column} varchar(90) NOT NULL, PRIMARY KEY ({key_column}));\n"
    )
}

/// Append the ALTER statements for unseen columns and the INSERT for one
/// payload. `known` carries the columns already materialized so each key
/// is altered in only once.
fn build_commands(
    script: &mut String,
    table: &str,
    key_column: &str,
    payload: &Payload,
    known: &mut HashSet<String>,
) {
    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    for (key, value) in payload {
        if !known.contains(key.as_str()) {
            let _ = write!(script, "{}", alter_statement(table, key, key_column, value));
            if key == key_column {
                let _ = writeln!(script, "ALTER TABLE {table} ADD UNIQUE({key});");
            }
            known.insert(key.clone());
        }

        columns.push(key.as_str());
        values.push(render_literal(value));
    }

    if !columns.contains(&key_column) {
        let synthesized = synthesize_key(&values);
        columns.push(key_column);
        values.push(format!("'{synthesized}'"));
    }

    let _ = writeln!(
        script,
        "INSERT INTO {table} ({}) values ({}) ON CONFLICT ({key_column}) DO NOTHING;",
        columns.join(","),
        values.join(",")
    );
}

fn alter_statement(table: &str, column: &str, key_column: &str, value: &rivulet_core::Value) -> String {
    let number_default = if column == key_column {
        "NOT NULL"
    } else {
        "NOT NULL DEFAULT 0"
    };
    let text_default = if column == key_column { "NOT NULL" } else { "NULL" };

    match column_kind(value) {
        ColumnKind::Int => format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} INT {number_default};\n"
        ),
        ColumnKind::Numeric => format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} NUMERIC(12,2) {number_default};\n"
        ),
        ColumnKind::Bool => format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} BOOL NOT NULL DEFAULT false;\n"
        ),
        ColumnKind::Json => {
            format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} JSONB NULL;\n")
        }
        ColumnKind::Date => format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} DATE {text_default};\n"
        ),
        ColumnKind::Timestamp => format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} TIMESTAMP {text_default};\n"
        ),
        ColumnKind::Varchar => format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} VARCHAR(255) {text_default};\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::Value;

    fn payload(entries: &[(&str, Value)]) -> Payload {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_table_pins_the_key_column() {
        assert_eq!(
            create_table_statement("people", "id"),
            "CREATE TABLE IF NOT EXISTS people (id varchar(90) NOT NULL, PRIMARY KEY (id));\n"
        );
    }

    #[test]
    fn evolves_date_and_timestamp_columns() {
        let mut script = String::new();
        let mut known = HashSet::new();
        let payload = payload(&[
            ("id", Value::String("k".into())),
            ("when", Value::String("2024-03-07".into())),
            ("ts", Value::String("2024-03-07T10:00:00".into())),
        ]);

        build_commands(&mut script, "events", "id", &payload, &mut known);

        assert!(script.contains("ADD COLUMN IF NOT EXISTS when DATE"));
        assert!(script.contains("ADD COLUMN IF NOT EXISTS ts TIMESTAMP"));
        assert!(script.contains("ADD UNIQUE(id)"));
        assert!(script.contains("'2024-03-07 10:00:00'"));
        assert!(script.contains("ON CONFLICT (id) DO NOTHING"));
    }

    #[test]
    fn repeated_keys_emit_a_single_alter() {
        let mut known = HashSet::new();
        let record = payload(&[("name", Value::String("Ada".into()))]);

        let mut first = String::new();
        build_commands(&mut first, "people", "id", &record, &mut known);
        let mut second = String::new();
        build_commands(&mut second, "people", "id", &record, &mut known);

        assert!(first.contains("ADD COLUMN IF NOT EXISTS name VARCHAR(255) NULL"));
        assert!(!second.contains("ADD COLUMN"));
        assert!(second.contains("INSERT INTO people"));
    }

    #[test]
    fn missing_key_column_is_synthesized() {
        let mut script = String::new();
        let mut known = HashSet::new();
        let record = payload(&[
            ("name", Value::String("Ada".into())),
            ("age", Value::String("36".into())),
        ]);

        build_commands(&mut script, "people", "id", &record, &mut known);

        let expected = synthesize_key(&["'Ada'".to_string(), "'36'".to_string()]);
        assert!(script.contains(&format!("INSERT INTO people (name,age,id) values ('Ada','36','{expected}')")));
    }

    #[test]
    fn numbers_render_unquoted() {
        let mut script = String::new();
        let mut known = HashSet::new();
        let record = payload(&[("id", Value::String("k".into())), ("n", Value::from(7))]);

        build_commands(&mut script, "events", "id", &record, &mut known);

        assert!(script.contains("ADD COLUMN IF NOT EXISTS n INT NOT NULL DEFAULT 0"));
        assert!(script.contains("values ('k',7)"));
    }
}
