use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{
    CourtesyBatch, CourtesyTicket, DiscountCode, DiscountUsage, Event, Order, OrderItem,
    OrderStatus, Scan, Ticket, TicketDayEntitlement, TicketType,
};
use crate::store::{CourtesyContext, Store, StoreTx, TicketContext, TicketRef};
use crate::utils::error::AppError;

/// Postgres-backed store. Row locks (`SELECT ... FOR UPDATE`) serialize the
/// check-then-write sections; READ COMMITTED is enough once the rows are locked.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub async fn connect(config: &Config) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(pool, config.tx_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Lock and serialization failures are retryable; a cancelled statement
/// means the transaction ran out of time.
fn db_error(e: sqlx::Error) -> AppError {
    let sqlstate = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());

    match sqlstate.as_deref() {
        Some("40001") | Some("40P01") | Some("55P03") => AppError::Conflict(e.to_string()),
        Some("57014") => AppError::Timeout,
        _ => AppError::DatabaseError(e),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let millis = self.statement_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {millis}"))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        Ok(Box::new(PgTx { tx }))
    }

    async fn discount_code(&self, id: Uuid) -> Result<Option<DiscountCode>, AppError> {
        sqlx::query_as::<_, DiscountCode>("SELECT * FROM discount_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn count_discount_usages(
        &self,
        code_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<i64, AppError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        count_usages(&mut conn, code_id, user_id).await
    }

    async fn courtesy_by_code(&self, code: &str) -> Result<Option<CourtesyContext>, AppError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        load_courtesy(&mut conn, code, false).await
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

async fn count_usages(
    conn: &mut PgConnection,
    code_id: Uuid,
    user_id: Option<Uuid>,
) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM discount_usages
        WHERE discount_code_id = $1
          AND ($2::uuid IS NULL OR user_id = $2)
        "#,
    )
    .bind(code_id)
    .bind(user_id)
    .fetch_one(conn)
    .await
    .map_err(db_error)
}

async fn load_courtesy(
    conn: &mut PgConnection,
    code: &str,
    for_update: bool,
) -> Result<Option<CourtesyContext>, AppError> {
    let sql = if for_update {
        "SELECT * FROM courtesy_tickets WHERE claim_code = $1 FOR UPDATE"
    } else {
        "SELECT * FROM courtesy_tickets WHERE claim_code = $1"
    };

    let Some(courtesy) = sqlx::query_as::<_, CourtesyTicket>(sql)
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
    else {
        return Ok(None);
    };

    let batch =
        sqlx::query_as::<_, CourtesyBatch>("SELECT * FROM courtesy_batches WHERE id = $1")
            .bind(courtesy.batch_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error)?;
    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(batch.event_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;
    let ticket_type = sqlx::query_as::<_, TicketType>("SELECT * FROM ticket_types WHERE id = $1")
        .bind(batch.ticket_type_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;

    Ok(Some(CourtesyContext {
        courtesy,
        batch,
        event,
        ticket_type,
    }))
}

async fn ticket_context(
    conn: &mut PgConnection,
    ticket: Ticket,
) -> Result<TicketContext, AppError> {
    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(ticket.event_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;
    let ticket_type = sqlx::query_as::<_, TicketType>("SELECT * FROM ticket_types WHERE id = $1")
        .bind(ticket.ticket_type_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;

    Ok(TicketContext {
        ticket,
        event,
        ticket_type,
    })
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_ticket_type(&mut self, id: Uuid) -> Result<Option<TicketType>, AppError> {
        sqlx::query_as::<_, TicketType>("SELECT * FROM ticket_types WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn increment_sold(&mut self, id: Uuid, quantity: i32) -> Result<(), AppError> {
        sqlx::query("UPDATE ticket_types SET sold = sold + $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn lock_discount_code(&mut self, id: Uuid) -> Result<Option<DiscountCode>, AppError> {
        sqlx::query_as::<_, DiscountCode>("SELECT * FROM discount_codes WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn count_discount_usages(
        &mut self,
        code_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<i64, AppError> {
        count_usages(&mut self.tx, code_id, user_id).await
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, event_id, status, subtotal_amount, discount_amount,
                total_amount, currency, provider, discount_code_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.event_id)
        .bind(order.status)
        .bind(order.subtotal_amount)
        .bind(order.discount_amount)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(order.provider)
        .bind(order.discount_code_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, ticket_type_id, quantity, unit_price, subtotal, attendees
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.ticket_type_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.subtotal)
            .bind(&item.attendees)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }

        Ok(())
    }

    async fn insert_discount_usage(&mut self, usage: &DiscountUsage) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO discount_usages (
                id, discount_code_id, user_id, order_id, amount_saved, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(usage.id)
        .bind(usage.discount_code_id)
        .bind(usage.user_id)
        .bind(usage.order_id)
        .bind(usage.amount_saved)
        .bind(usage.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, AppError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>, AppError> {
        sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY ticket_type_id, id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn set_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tickets (
                id, order_id, event_id, ticket_type_id, user_id, ticket_code, status,
                attendee_name, attendee_dni, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.order_id)
        .bind(ticket.event_id)
        .bind(ticket.ticket_type_id)
        .bind(ticket.user_id)
        .bind(&ticket.ticket_code)
        .bind(ticket.status)
        .bind(&ticket.attendee_name)
        .bind(&ticket.attendee_dni)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn tickets_for_order(&mut self, order_id: Uuid) -> Result<Vec<Ticket>, AppError> {
        sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE order_id = $1 ORDER BY created_at, ticket_code",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn find_ticket(
        &mut self,
        reference: &TicketRef,
    ) -> Result<Option<TicketContext>, AppError> {
        let query = match reference {
            TicketRef::Id(id) => {
                sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1").bind(*id)
            }
            TicketRef::Code(code) => {
                sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE ticket_code = $1")
                    .bind(code.clone())
            }
        };

        match query.fetch_optional(&mut *self.tx).await.map_err(db_error)? {
            Some(ticket) => ticket_context(&mut self.tx, ticket).await.map(Some),
            None => Ok(None),
        }
    }

    async fn lock_ticket(&mut self, id: Uuid) -> Result<Option<TicketContext>, AppError> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;

        match ticket {
            Some(ticket) => ticket_context(&mut self.tx, ticket).await.map(Some),
            None => Ok(None),
        }
    }

    async fn lock_courtesy_by_code(
        &mut self,
        code: &str,
    ) -> Result<Option<CourtesyContext>, AppError> {
        load_courtesy(&mut self.tx, code, true).await
    }

    async fn mark_courtesy_claimed(
        &mut self,
        id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        ticket_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE courtesy_tickets
            SET status = 'CLAIMED',
                claimed_by_user_id = $2,
                claimed_at = $3,
                ticket_id = $4
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .bind(ticket_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn entitlements(
        &mut self,
        ticket_id: Uuid,
    ) -> Result<Vec<TicketDayEntitlement>, AppError> {
        sqlx::query_as::<_, TicketDayEntitlement>(
            "SELECT * FROM ticket_day_entitlements WHERE ticket_id = $1 ORDER BY date",
        )
        .bind(ticket_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_entitlements(
        &mut self,
        rows: &[TicketDayEntitlement],
    ) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let ticket_ids: Vec<Uuid> = rows.iter().map(|row| row.ticket_id).collect();
        let dates: Vec<NaiveDate> = rows.iter().map(|row| row.date).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO ticket_day_entitlements (id, ticket_id, date)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::date[])
            ON CONFLICT (ticket_id, date) DO NOTHING
            "#,
        )
        .bind(ids)
        .bind(ticket_ids)
        .bind(dates)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn mark_entitlement_used(
        &mut self,
        ticket_id: Uuid,
        date: NaiveDate,
        used_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ticket_day_entitlements (id, ticket_id, date, status, used_at)
            VALUES ($1, $2, $3, 'USED', $4)
            ON CONFLICT (ticket_id, date) DO UPDATE
            SET status = 'USED',
                used_at = COALESCE(ticket_day_entitlements.used_at, EXCLUDED.used_at)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ticket_id)
        .bind(date)
        .bind(used_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn valid_scans(&mut self, ticket_id: Uuid) -> Result<Vec<Scan>, AppError> {
        sqlx::query_as::<_, Scan>(
            "SELECT * FROM scans WHERE ticket_id = $1 AND result = 'VALID' ORDER BY scanned_at",
        )
        .bind(ticket_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn scan_count(&mut self, ticket_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scans WHERE ticket_id = $1")
            .bind(ticket_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn insert_scan(&mut self, scan: &Scan) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scans (id, ticket_id, result, date, reason, scanned_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(scan.id)
        .bind(scan.ticket_id)
        .bind(scan.result)
        .bind(scan.date)
        .bind(&scan.reason)
        .bind(scan.scanned_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(db_error)
    }
}
