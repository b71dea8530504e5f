//! # sink — audit persistence
//!
//! Write-only destinations for [`AuditRecord`]s: trade intents, opens,
//! closed-position summaries, reverse events, equity snapshots.
//!
//! - [`MemorySink`]  — bounded ring buffer, backs `GET /api/events`
//! - [`JsonlSink`]   — one JSON object per line, appended to `AUDIT_LOG_PATH`
//! - `PgSink`        — PostgreSQL table (feature `postgres`)
//! - [`FanoutSink`]  — writes to all of the above
//!
//! The engine goes through [`Auditor`], which never fails: a sink error is
//! logged and the trading path carries on.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::SinkError;
use crate::models::{AuditEntry, AuditRecord};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: &AuditEntry) -> Result<(), SinkError>;
}

// ─── Memory ───────────────────────────────────────────────────────────────────

pub struct MemorySink {
    entries:  Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(capacity)), capacity: capacity.max(1) }
    }

    /// Newest first, optionally filtered by record kind (`"reverse"`, ...).
    pub fn recent(&self, limit: usize, kind: Option<&str>) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.record.kind() == k))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), SinkError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        Ok(())
    }
}

// ─── JSON lines file ──────────────────────────────────────────────────────────

pub struct JsonlSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlSink {
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!(path = %path.display(), "📝 audit log opened");
        Ok(Self { file: tokio::sync::Mutex::new(file) })
    }
}

#[async_trait]
impl AuditSink for JsonlSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

// ─── Fan-out ──────────────────────────────────────────────────────────────────

pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutSink {
    /// Every sink is attempted; the first error is reported.
    async fn write(&self, entry: &AuditEntry) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.write(entry).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// ─── Auditor ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, record: AuditRecord) {
        let entry = AuditEntry::new(record);
        if let Err(e) = self.sink.write(&entry).await {
            warn!(
                kind   = entry.record.kind(),
                symbol = ?entry.record.symbol(),
                error  = %e,
                "⚠️ audit write failed"
            );
        }
    }
}

// ─── PostgreSQL ───────────────────────────────────────────────────────────────

#[cfg(feature = "postgres")]
pub use pg::PgSink;

#[cfg(feature = "postgres")]
mod pg {
    use anyhow::Context;
    use async_trait::async_trait;
    use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
    use tracing::info;

    use super::AuditSink;
    use crate::error::SinkError;
    use crate::models::AuditEntry;

    pub struct PgSink {
        pool: PgPool,
    }

    impl PgSink {
        /// Connect and apply `migrations/001_init.sql`.
        pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
            info!("Connecting to PostgreSQL...");

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(std::time::Duration::from_secs(5))
                .connect(database_url)
                .await
                .context("Failed to connect to PostgreSQL")?;

            // simple-query protocol: the file holds several statements
            pool.execute(include_str!("../migrations/001_init.sql"))
                .await
                .context("Failed to run migration 001_init.sql")?;

            info!("✅ PostgreSQL connected and migrations applied");
            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl AuditSink for PgSink {
        async fn write(&self, entry: &AuditEntry) -> Result<(), SinkError> {
            let payload = serde_json::to_string(&entry.record)?;
            sqlx::query(
                r#"
                INSERT INTO audit_log (id, recorded_at, kind, symbol, payload)
                VALUES ($1, $2, $3, $4, $5::jsonb)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(entry.id)
            .bind(entry.recorded_at)
            .bind(entry.record.kind())
            .bind(entry.record.symbol().map(|s| s.to_string()))
            .bind(payload)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}
