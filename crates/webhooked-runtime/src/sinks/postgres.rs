//! PostgreSQL sink
//!
//! Two ways to store a payload:
//!
//! ```yaml
//! # Single column insert
//! specs:
//!   databaseUrl: { valueFrom: { envRef: DATABASE_URL } }
//!   tableName: events
//!   dataField: payload
//!
//! # Free query with named arguments rendered from templates
//! specs:
//!   databaseUrl: { valueFrom: { envRef: DATABASE_URL } }
//!   useFormattingToPerformQuery: true
//!   query: INSERT INTO events(kind, body) VALUES (:kind, :body::jsonb)
//!   args:
//!     kind: '{{ (Payload | fromJson).action }}'
//!     body: '{{ Payload }}'
//! ```
//!
//! Argument templates see the request data of the stage, `Payload` set to the
//! payload this sink received and `FieldName` set to the argument name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use webhooked_core::error::{Error, Result};
use webhooked_core::sinks::{PushContext, Sink};
use webhooked_core::Valuable;

const MAX_CONNECTIONS: u32 = 5;

/// PostgreSQL sink configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConfig {
    /// Connection string
    #[serde(default)]
    pub database_url: Valuable,

    /// Target table of the single column insert
    #[serde(default)]
    pub table_name: String,

    /// Target column of the single column insert
    #[serde(default)]
    pub data_field: String,

    /// Run `query` with `args` instead of the single column insert
    #[serde(default)]
    pub use_formatting_to_perform_query: bool,

    /// Query with `:name` placeholders
    #[serde(default)]
    pub query: String,

    /// Template of each named argument
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl PostgresConfig {
    /// Check the settings and derive the statement to run
    pub fn statement(&self) -> Result<Statement> {
        if self.database_url.first().is_empty() {
            return Err(Error::config("postgres storage needs a databaseUrl"));
        }

        if !self.use_formatting_to_perform_query {
            for (field, value) in [("tableName", &self.table_name), ("dataField", &self.data_field)] {
                if !is_identifier(value) {
                    return Err(Error::config(format!(
                        "postgres {} {:?} is not a valid identifier",
                        field, value
                    )));
                }
            }
            return Ok(Statement::Insert(format!(
                "INSERT INTO {}({}) VALUES ($1)",
                self.table_name, self.data_field
            )));
        }

        if !self.table_name.is_empty() || !self.data_field.is_empty() {
            return Err(Error::config(
                "fields tableName and dataField are deprecated and cannot be used with useFormattingToPerformQuery",
            ));
        }
        if self.query.is_empty() {
            return Err(Error::config(
                "query is required when useFormattingToPerformQuery is enabled",
            ));
        }

        let (sql, params) = positional_query(&self.query);
        if let Some(missing) = params.iter().find(|p| !self.args.contains_key(*p)) {
            return Err(Error::config(format!(
                "query argument {} has no template in args",
                missing
            )));
        }
        Ok(Statement::Named { sql, params })
    }
}

/// Statement run on every push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Insert of the raw payload, bound to `$1`
    Insert(String),
    /// Query whose `$n` placeholder is bound to the rendered `params[n - 1]`
    Named {
        /// Query with positional placeholders
        sql: String,
        /// Argument names in placeholder order
        params: Vec<String>,
    },
}

/// Sink executing one statement per payload
#[derive(Debug)]
pub struct PostgresSink {
    pool: PgPool,
    config: PostgresConfig,
    statement: Statement,
}

impl PostgresSink {
    /// Create the sink. The pool connects lazily, it must be created inside a
    /// tokio runtime.
    pub fn new(config: PostgresConfig) -> Result<Self> {
        let statement = config.statement()?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_lazy(&config.database_url.first())
            .map_err(|e| Error::sink("postgres", e.to_string()))?;

        Ok(Self {
            pool,
            config,
            statement,
        })
    }

    /// Statement run on every push
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Values bound to the statement for `payload`
    pub fn bind_values(&self, ctx: &PushContext, payload: &[u8]) -> Result<Vec<String>> {
        match &self.statement {
            Statement::Insert(_) => Ok(vec![String::from_utf8_lossy(payload).into_owned()]),
            Statement::Named { params, .. } => params
                .iter()
                .map(|name| {
                    let template = self.config.args.get(name).cloned().unwrap_or_default();
                    let stage = ctx.formatter().fork(template);
                    stage.with_payload(payload).with_data("FieldName", name);
                    stage.render()
                })
                .collect(),
        }
    }

    fn sql(&self) -> &str {
        match &self.statement {
            Statement::Insert(sql) => sql,
            Statement::Named { sql, .. } => sql,
        }
    }
}

#[async_trait]
impl Sink for PostgresSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn push(&self, ctx: &PushContext, payload: &[u8]) -> Result<()> {
        let values = self.bind_values(ctx, payload)?;

        let mut query = sqlx::query(self.sql());
        for value in values {
            query = query.bind(value);
        }

        tokio::select! {
            done = query.execute(&self.pool) => {
                let done = done.map_err(|e| Error::sink("postgres", e.to_string()))?;
                debug!(rows = done.rows_affected(), "Payload stored");
                Ok(())
            }
            _ = ctx.cancelled() => Err(Error::sink("postgres", "query cancelled")),
        }
    }
}

/// Rewrite `:name` placeholders as `$n`. A name used twice keeps its number;
/// `::type` casts and quoted text are left alone.
pub fn positional_query(query: &str) -> (String, Vec<String>) {
    let mut sql = String::with_capacity(query.len());
    let mut params: Vec<String> = Vec::new();
    let mut chars = query.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            quoted = !quoted;
            sql.push(c);
            continue;
        }
        if c != ':' || quoted {
            sql.push(c);
            continue;
        }

        match chars.peek() {
            Some(':') => {
                sql.push_str("::");
                chars.next();
            }
            Some(&n) if n.is_ascii_alphabetic() || n == '_' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_') {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                let index = match params.iter().position(|p| *p == name) {
                    Some(index) => index,
                    None => {
                        params.push(name);
                        params.len() - 1
                    }
                };
                sql.push_str(&format!("${}", index + 1));
            }
            _ => sql.push(c),
        }
    }

    (sql, params)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
