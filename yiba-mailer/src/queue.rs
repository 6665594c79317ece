//! Queue drain
//!
//! One drain pass claims the oldest PENDING rows up to the configured
//! batch size and resolves each to SENT, FAILED, or a retry. State
//! machine per row:
//!
//!   PENDING --send ok--------------------> SENT        (terminal)
//!   PENDING --suppressed address---------> FAILED      (terminal)
//!   PENDING --send err, attempts < cap---> PENDING     (attempts + 1)
//!   PENDING --send err, attempts at cap--> FAILED      (terminal)
//!
//! SENT and FAILED rows are never claimed again.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

use yiba_common::config::MailerConfig;
use yiba_common::db::models::QueuedEmail;
use yiba_common::Result;

use crate::mailer::{Mailer, OutgoingMessage};

/// Outcome counts for one drain pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub suppressed: usize,
    pub retried: usize,
}

async fn is_suppressed(db: &SqlitePool, address: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM email_suppressions WHERE address = LOWER(?))",
    )
    .bind(address)
    .fetch_one(db)
    .await?;
    Ok(exists)
}

async fn mark_sent(db: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE email_queue SET status = 'SENT', updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

async fn mark_failed(db: &SqlitePool, id: &str, attempts: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE email_queue
         SET status = 'FAILED', attempts = ?, last_error = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(attempts)
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

async fn mark_retry(db: &SqlitePool, id: &str, attempts: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE email_queue SET attempts = ?, last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

/// Run one drain pass and return what happened
pub async fn drain_once(
    db: &SqlitePool,
    mailer: &dyn Mailer,
    config: &MailerConfig,
) -> Result<DrainStats> {
    let batch: Vec<QueuedEmail> = sqlx::query_as(
        "SELECT * FROM email_queue WHERE status = 'PENDING' ORDER BY created_at LIMIT ?",
    )
    .bind(config.batch_size)
    .fetch_all(db)
    .await?;

    let mut stats = DrainStats {
        claimed: batch.len(),
        ..DrainStats::default()
    };

    for row in batch {
        if is_suppressed(db, &row.to_address).await? {
            mark_failed(db, &row.id, row.attempts, "address suppressed").await?;
            stats.suppressed += 1;
            stats.failed += 1;
            continue;
        }

        let message = OutgoingMessage {
            from: config.from_address.clone(),
            to: row.to_address.clone(),
            subject: row.subject.clone(),
            body: row.body.clone(),
        };

        match mailer.send(&message).await {
            Ok(()) => {
                mark_sent(db, &row.id).await?;
                stats.sent += 1;
            }
            Err(e) => {
                let attempts = row.attempts + 1;
                let error = e.to_string();
                if attempts >= config.max_attempts {
                    warn!("mail {} failed permanently after {} attempts: {}", row.id, attempts, error);
                    mark_failed(db, &row.id, attempts, &error).await?;
                    stats.failed += 1;
                } else {
                    warn!("mail {} failed (attempt {}), will retry: {}", row.id, attempts, error);
                    mark_retry(db, &row.id, attempts, &error).await?;
                    stats.retried += 1;
                }
            }
        }
    }

    if stats.claimed > 0 {
        info!(
            "drain pass: {} claimed, {} sent, {} failed ({} suppressed), {} retried",
            stats.claimed, stats.sent, stats.failed, stats.suppressed, stats.retried
        );
    }
    Ok(stats)
}
