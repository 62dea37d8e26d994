use crate::config::DatabaseConfig;
use crate::events::{AnalysisSummary, EventKind, IntegrityEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Write-side seam between the session processor and durable storage.
///
/// The processor never learns whether the sink is Postgres or a test
/// double; insert failures are logged at the call site and never block
/// subsequent frames.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert_event(
        &self,
        session_id: &str,
        kind: EventKind,
        confidence: f64,
        elapsed_seconds: i64,
    ) -> Result<()>;
}

/// Durable store for integrity events and analysis summaries.
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    /// Create a new store with a connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Fetch all events for a session, oldest first.
    #[instrument(skip(self))]
    pub async fn fetch_events(&self, session_id: &str) -> Result<Vec<IntegrityEvent>> {
        let events = sqlx::query_as::<_, IntegrityEvent>(
            r#"
            SELECT id, session_id, event_type, confidence, elapsed_seconds, created_at
            FROM ai_events
            WHERE session_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query events")?;

        Ok(events)
    }

    /// Write (or overwrite) the analysis summary for a session.
    #[instrument(skip(self, summary))]
    pub async fn upsert_summary(
        &self,
        session_id: &str,
        cheat_score: f64,
        summary: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_summaries (session_id, cheat_score, summary, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET cheat_score = EXCLUDED.cheat_score,
                          summary = EXCLUDED.summary,
                          created_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(cheat_score)
        .bind(summary)
        .execute(&self.pool)
        .await
        .context("Failed to upsert analysis summary")?;

        debug!(session_id = %session_id, cheat_score, "Analysis summary stored");

        Ok(())
    }

    /// Fetch the stored analysis summary for a session, if one exists.
    pub async fn fetch_summary(&self, session_id: &str) -> Result<Option<AnalysisSummary>> {
        let summary = sqlx::query_as::<_, AnalysisSummary>(
            r#"
            SELECT session_id, cheat_score, summary, created_at
            FROM analysis_summaries
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query analysis summary")?;

        Ok(summary)
    }

    /// Get the connection pool (for health checks).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventSink for EventStore {
    #[instrument(skip(self))]
    async fn insert_event(
        &self,
        session_id: &str,
        kind: EventKind,
        confidence: f64,
        elapsed_seconds: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_events (id, session_id, event_type, confidence, elapsed_seconds, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(kind.as_str())
        .bind(confidence)
        .bind(elapsed_seconds)
        .execute(&self.pool)
        .await
        .context("Failed to insert integrity event")?;

        metrics::counter!("proctor.events.stored", "kind" => kind.as_str()).increment(1);

        Ok(())
    }
}
