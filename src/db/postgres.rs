use crate::db::store::{Admission, ScanStore, SellStore};
use crate::error::StoreError;
use crate::models::{
    DayWindow, NewScan, ReconciledSale, ScanEvent, ScanRow, ScanStatus, ScanTransition, SellRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::time::{Duration, Instant};

const SCAN_COLUMNS: &str = "id, ean, product_id, price_cents, weight, description, \
    full_price_cents_kg, discount_price_cents_kg, event_date, equipment_id, employee_id, \
    receipt, store_code, status, notified_at";

/// Rows per INSERT statement when upserting sells
const UPSERT_CHUNK: usize = 1000;
const UPSERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres-backed scan and sell store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_event(row: ScanRow) -> Result<ScanEvent, StoreError> {
    ScanEvent::try_from(row).map_err(|e| StoreError::CorruptRow(e.to_string()))
}

/// Inserts one scan with the given status on an open connection or transaction
async fn insert_scan(conn: &mut PgConnection, scan: NewScan, status: ScanStatus) -> Result<ScanEvent, StoreError> {
    let row = sqlx::query_as::<_, ScanRow>(&format!(
        r#"
        INSERT INTO bips (
            ean, product_id, price_cents, weight, description,
            full_price_cents_kg, discount_price_cents_kg, event_date,
            equipment_id, employee_id, store_code, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {SCAN_COLUMNS}
        "#
    ))
    .bind(&scan.ean)
    .bind(&scan.product_id)
    .bind(scan.price_cents)
    .bind(&scan.weight)
    .bind(&scan.description)
    .bind(scan.full_price_cents_kg)
    .bind(scan.discount_price_cents_kg)
    .bind(scan.event_date)
    .bind(scan.equipment_id)
    .bind(&scan.employee_id)
    .bind(scan.store_code)
    .bind(status.as_str())
    .fetch_one(&mut *conn)
    .await?;
    into_event(row)
}

async fn count_pending_on(conn: &mut PgConnection, ean: &str, day: &DayWindow) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT count(*)
        FROM bips
        WHERE ean = $1
          AND status = 'pending'
          AND event_date >= $2
          AND event_date < $3
        "#,
    )
    .bind(ean)
    .bind(day.start)
    .bind(day.end)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

async fn bulk_cancel_on(conn: &mut PgConnection, ean: &str, day: &DayWindow) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE bips
        SET status = 'cancelled'
        WHERE ean = $1
          AND status = 'pending'
          AND event_date >= $2
          AND event_date < $3
        "#,
    )
    .bind(ean)
    .bind(day.start)
    .bind(day.end)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl ScanStore for PgStore {
    async fn create_pending(&self, scan: NewScan) -> Result<ScanEvent, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_scan(&mut conn, scan, ScanStatus::Pending).await
    }

    async fn count_pending(&self, ean: &str, day: &DayWindow) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        count_pending_on(&mut conn, ean, day).await
    }

    async fn bulk_cancel(&self, ean: &str, day: &DayWindow) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        bulk_cancel_on(&mut conn, ean, day).await
    }

    async fn admit(
        &self,
        scan: NewScan,
        day: &DayWindow,
        should_cancel: &(dyn Fn(i64) -> bool + Send + Sync),
    ) -> Result<Admission, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent scans of the same EAN on the same day until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("bips:{}:{}", scan.ean, day.date))
            .execute(&mut *tx)
            .await?;

        let existing = count_pending_on(&mut tx, &scan.ean, day).await?;
        let admission = if should_cancel(existing) {
            let affected = bulk_cancel_on(&mut tx, &scan.ean, day).await?;
            let scan = insert_scan(&mut tx, scan, ScanStatus::Cancelled).await?;
            Admission::Cancelled { scan, affected }
        } else {
            Admission::Admitted(insert_scan(&mut tx, scan, ScanStatus::Pending).await?)
        };

        tx.commit().await?;
        Ok(admission)
    }

    async fn find_by_date(&self, day: &DayWindow) -> Result<Vec<ScanEvent>, StoreError> {
        let rows = sqlx::query_as::<_, ScanRow>(&format!(
            r#"
            SELECT {SCAN_COLUMNS}
            FROM bips
            WHERE event_date >= $1
              AND event_date < $2
            ORDER BY event_date ASC, id ASC
            "#
        ))
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(into_event).collect()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ScanEvent>, StoreError> {
        let row = sqlx::query_as::<_, ScanRow>(&format!("SELECT {SCAN_COLUMNS} FROM bips WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_event).transpose()
    }

    async fn update_status(&self, id: i64, transition: &ScanTransition) -> Result<ScanEvent, StoreError> {
        let updated = sqlx::query_as::<_, ScanRow>(&format!(
            r#"
            UPDATE bips
            SET status = $2,
                receipt = COALESCE($3, receipt)
            WHERE id = $1
              AND status = 'pending'
            RETURNING {SCAN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(transition.target().as_str())
        .bind(transition.receipt())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return into_event(row);
        }

        // Nothing updated: either missing or already terminal
        let current = sqlx::query_scalar::<_, String>("SELECT status FROM bips WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match current {
            None => Err(StoreError::ScanNotFound(id)),
            Some(status) => {
                let status = status.parse::<ScanStatus>().map_err(|e| StoreError::CorruptRow(e.to_string()))?;
                Err(StoreError::TerminalStatus { id, status })
            }
        }
    }

    async fn mark_notified(&self, ids: &[i64], at: DateTime<Utc>) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE bips
            SET notified_at = $2
            WHERE id = ANY($1)
              AND notified_at IS NULL
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SellStore for PgStore {
    async fn upsert_sells(&self, sells: &[ReconciledSale]) -> Result<u64, StoreError> {
        if sells.is_empty() {
            return Ok(0);
        }

        let mut total = 0u64;
        for chunk in sells.chunks(UPSERT_CHUNK) {
            let start_time = Instant::now();
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO sells (
                    product_id, description, sell_date, value_cents, quantity, scan_id,
                    receipt, pos_code, operator_code, operator_name, status, discount_cents
                ) ",
            );

            query_builder.push_values(chunk, |mut b, sell| {
                b.push_bind(&sell.product_id)
                    .push_bind(&sell.description)
                    .push_bind(sell.sell_date)
                    .push_bind(sell.value_cents)
                    .push_bind(&sell.quantity)
                    .push_bind(sell.scan_id)
                    .push_bind(&sell.receipt)
                    .push_bind(sell.pos_code)
                    .push_bind(sell.operator_code)
                    .push_bind(&sell.operator_name)
                    .push_bind(sell.status.as_str())
                    .push_bind(sell.discount_cents);
            });

            query_builder.push(
                " ON CONFLICT (product_id, quantity, receipt) DO UPDATE SET
                    operator_code = COALESCE(EXCLUDED.operator_code, sells.operator_code),
                    operator_name = COALESCE(EXCLUDED.operator_name, sells.operator_name),
                    pos_code = COALESCE(EXCLUDED.pos_code, sells.pos_code),
                    status = CASE
                        WHEN sells.scan_id IS NULL AND EXCLUDED.scan_id IS NOT NULL THEN EXCLUDED.status
                        ELSE sells.status
                    END,
                    scan_id = COALESCE(sells.scan_id, EXCLUDED.scan_id)",
            );

            let execute_result = tokio::time::timeout(UPSERT_TIMEOUT, query_builder.build().execute(&self.pool)).await;

            match execute_result {
                Ok(Ok(result)) => {
                    tracing::debug!(
                        rows = result.rows_affected(),
                        elapsed = ?start_time.elapsed(),
                        "Upserted sells chunk"
                    );
                    total += result.rows_affected();
                }
                Ok(Err(e)) => {
                    tracing::error!(elapsed = ?start_time.elapsed(), "Sells upsert failed: {e:?}");
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::error!("Sells upsert timed out (>{}s)", UPSERT_TIMEOUT.as_secs());
                    return Err(sqlx::Error::PoolTimedOut.into());
                }
            }
        }

        Ok(total)
    }

    async fn find_sells(&self, date: NaiveDate) -> Result<Vec<ReconciledSale>, StoreError> {
        let start = date.and_time(NaiveTime::MIN);
        let end = date.checked_add_days(Days::new(1)).unwrap_or(date).and_time(NaiveTime::MIN);
        let rows = sqlx::query_as::<_, SellRow>(
            r#"
            SELECT product_id, description, sell_date, value_cents, quantity, scan_id,
                   receipt, pos_code, operator_code, operator_name, status, discount_cents
            FROM sells
            WHERE sell_date >= $1
              AND sell_date < $2
            ORDER BY id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReconciledSale::from).collect())
    }
}
