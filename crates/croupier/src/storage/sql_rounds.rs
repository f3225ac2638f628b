//! SQL-backed round registry using PostgreSQL via sqlx.
//!
//! Table:
//! - `croupier_rounds`: one row per round number, `closed_at` set once
//!
//! Migrations are shared with [`SqlCounterStore`](super::sql_counter::SqlCounterStore).
//! This module is only available when the `sql` feature is enabled.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::CoordinationError;
use crate::round_registry::{CloseOutcome, RoundRegistry, RoundState};
use crate::types::{RoomId, RoundNo};

pub struct SqlRoundRegistry {
    pool: PgPool,
}

impl SqlRoundRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_err(reason: &str, e: sqlx::Error) -> CoordinationError {
        CoordinationError::Registry {
            reason: format!("{reason}: {e}"),
            source: Some(Box::new(e)),
        }
    }
}

#[async_trait]
impl RoundRegistry for SqlRoundRegistry {
    async fn resolve_or_create_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<RoundState, CoordinationError> {
        sqlx::query(
            r#"
            INSERT INTO croupier_rounds (round_no, room_id)
            VALUES ($1, $2)
            ON CONFLICT (round_no) DO NOTHING
            "#,
        )
        .bind(round_no.as_ref())
        .bind(&room_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_err("failed to create round", e))?;

        let row = sqlx::query("SELECT round_id, room_id FROM croupier_rounds WHERE round_no = $1")
            .bind(round_no.as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_err("failed to resolve round", e))?;

        let round_id: i64 = row
            .try_get("round_id")
            .map_err(|e| Self::map_err("invalid round_id column", e))?;
        let stored_room: String = row
            .try_get("room_id")
            .map_err(|e| Self::map_err("invalid room_id column", e))?;

        Ok(RoundState::bound(
            round_id,
            RoomId::new(stored_room),
            round_no.clone(),
        ))
    }

    async fn close_round(
        &self,
        round_no: &RoundNo,
        room_id: &RoomId,
    ) -> Result<CloseOutcome, CoordinationError> {
        let updated = sqlx::query(
            "UPDATE croupier_rounds SET closed_at = NOW() WHERE round_no = $1 AND closed_at IS NULL",
        )
        .bind(round_no.as_ref())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_err("failed to close round", e))?;
        if updated.rows_affected() == 1 {
            return Ok(CloseOutcome::Closed);
        }

        // Either already closed or never created; record unknown rounds as closed.
        let inserted = sqlx::query(
            r#"
            INSERT INTO croupier_rounds (round_no, room_id, closed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (round_no) DO NOTHING
            "#,
        )
        .bind(round_no.as_ref())
        .bind(&room_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_err("failed to record closed round", e))?;

        if inserted.rows_affected() == 1 {
            Ok(CloseOutcome::Closed)
        } else {
            Ok(CloseOutcome::AlreadyClosed)
        }
    }
}
