use crate::database::DbPool;
use crate::utils::error::{ApiError, BudgetSnapshot};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

/// Per-workspace daily token ledger: reserve before spending, commit the
/// real amount afterward, release on failure. Grounded in
/// `original_source/server/app/core/token_budget.py`.
pub struct BudgetLedger {
    pool: DbPool,
    daily_limit: i64,
}

impl BudgetLedger {
    pub fn new(pool: DbPool, daily_limit: i64) -> Self {
        Self { pool, daily_limit }
    }

    fn resets_at(date_utc: NaiveDate) -> DateTime<Utc> {
        let next = date_utc.succ_opt().expect("date_utc is not the last representable day");
        Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).expect("midnight is a valid time"))
    }

    fn snapshot(&self, used: i64, reserved: i64, date_utc: NaiveDate) -> BudgetSnapshot {
        BudgetSnapshot {
            used,
            reserved,
            limit: self.daily_limit,
            remaining: (self.daily_limit - used - reserved).max(0),
            resets_at: Self::resets_at(date_utc),
        }
    }

    async fn ensure_row(&self, workspace_id: Uuid, date_utc: NaiveDate) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO workspace_daily_usage (workspace_id, date_utc, tokens_used, tokens_reserved)
               VALUES ($1, $2, 0, 0)
               ON CONFLICT (workspace_id, date_utc) DO NOTHING"#,
        )
        .bind(workspace_id)
        .bind(date_utc)
        .execute(self.pool.get())
        .await?;

        Ok(())
    }

    /// Reserve `amount` tokens against today's budget. Fails with
    /// `ApiError::BudgetExceeded` carrying the current snapshot if the
    /// reservation would exceed the daily limit.
    pub async fn reserve(&self, workspace_id: Uuid, amount: i64) -> Result<BudgetSnapshot, ApiError> {
        let today = Utc::now().date_naive();
        self.ensure_row(workspace_id, today).await?;

        let mut tx = self.pool.get().begin().await.map_err(anyhow::Error::from)?;

        let row = sqlx::query(
            r#"SELECT tokens_used, tokens_reserved FROM workspace_daily_usage
               WHERE workspace_id = $1 AND date_utc = $2 FOR UPDATE"#,
        )
        .bind(workspace_id)
        .bind(today)
        .fetch_one(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        let used: i64 = row.get("tokens_used");
        let reserved: i64 = row.get("tokens_reserved");

        if used + reserved + amount > self.daily_limit {
            tx.rollback().await.ok();
            return Err(ApiError::BudgetExceeded(self.snapshot(used, reserved, today)));
        }

        sqlx::query(
            r#"UPDATE workspace_daily_usage
               SET tokens_reserved = tokens_reserved + $1, updated_at = now()
               WHERE workspace_id = $2 AND date_utc = $3"#,
        )
        .bind(amount)
        .bind(workspace_id)
        .bind(today)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(self.snapshot(used, reserved + amount, today))
    }

    /// Move `amount` tokens from reserved into used. Fails with
    /// `ApiError::InvalidReservation` if `amount` exceeds what is currently
    /// reserved for the workspace today.
    pub async fn commit(&self, workspace_id: Uuid, amount: i64) -> Result<BudgetSnapshot, ApiError> {
        let today = Utc::now().date_naive();
        self.ensure_row(workspace_id, today).await?;

        let mut tx = self.pool.get().begin().await.map_err(anyhow::Error::from)?;

        let row = sqlx::query(
            r#"SELECT tokens_used, tokens_reserved FROM workspace_daily_usage
               WHERE workspace_id = $1 AND date_utc = $2 FOR UPDATE"#,
        )
        .bind(workspace_id)
        .bind(today)
        .fetch_one(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        let used: i64 = row.get("tokens_used");
        let reserved: i64 = row.get("tokens_reserved");

        if amount > reserved {
            tx.rollback().await.ok();
            return Err(ApiError::InvalidReservation);
        }

        let new_reserved = reserved - amount;
        let new_used = used + amount;

        sqlx::query(
            r#"UPDATE workspace_daily_usage
               SET tokens_used = $1, tokens_reserved = $2, updated_at = now()
               WHERE workspace_id = $3 AND date_utc = $4"#,
        )
        .bind(new_used)
        .bind(new_reserved)
        .bind(workspace_id)
        .bind(today)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(self.snapshot(new_used, new_reserved, today))
    }

    /// Release `amount` tokens back from reserved without converting them to
    /// usage (failure path). Fails with `ApiError::InvalidReservation` if
    /// `amount` exceeds what is currently reserved.
    pub async fn release(&self, workspace_id: Uuid, amount: i64) -> Result<BudgetSnapshot, ApiError> {
        let today = Utc::now().date_naive();
        self.ensure_row(workspace_id, today).await?;

        let mut tx = self.pool.get().begin().await.map_err(anyhow::Error::from)?;

        let row = sqlx::query(
            r#"SELECT tokens_used, tokens_reserved FROM workspace_daily_usage
               WHERE workspace_id = $1 AND date_utc = $2 FOR UPDATE"#,
        )
        .bind(workspace_id)
        .bind(today)
        .fetch_one(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        let used: i64 = row.get("tokens_used");
        let reserved: i64 = row.get("tokens_reserved");

        if amount > reserved {
            tx.rollback().await.ok();
            return Err(ApiError::InvalidReservation);
        }

        let new_reserved = reserved - amount;

        sqlx::query(
            r#"UPDATE workspace_daily_usage
               SET tokens_reserved = $1, updated_at = now()
               WHERE workspace_id = $2 AND date_utc = $3"#,
        )
        .bind(new_reserved)
        .bind(workspace_id)
        .bind(today)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(self.snapshot(used, new_reserved, today))
    }

    pub async fn status(&self, workspace_id: Uuid) -> anyhow::Result<BudgetSnapshot> {
        let today = Utc::now().date_naive();

        let row = sqlx::query(
            "SELECT tokens_used, tokens_reserved FROM workspace_daily_usage WHERE workspace_id = $1 AND date_utc = $2",
        )
        .bind(workspace_id)
        .bind(today)
        .fetch_optional(self.pool.get())
        .await?;

        let (used, reserved) = row
            .map(|r| (r.get::<i64, _>("tokens_used"), r.get::<i64, _>("tokens_reserved")))
            .unwrap_or((0, 0));

        Ok(self.snapshot(used, reserved, today))
    }

    /// Zero out reservations abandoned by a worker that died mid-request.
    /// Ported from `original_source/worker/jobs/maintenance.py::cleanup_stale_reservations`.
    pub async fn sweep_stale_reservations(&self, ttl_seconds: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"UPDATE workspace_daily_usage
               SET tokens_reserved = 0, updated_at = now()
               WHERE tokens_reserved > 0
                 AND updated_at < now() - ($1 || ' seconds')::interval"#,
        )
        .bind(ttl_seconds.to_string())
        .execute(self.pool.get())
        .await?;

        let affected = result.rows_affected();
        if affected > 0 {
            info!(affected, "swept stale budget reservations");
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn resets_at_is_next_midnight_utc() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        let resets_at = BudgetLedger::resets_at(day);
        assert_eq!(resets_at, Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap());
    }
}
