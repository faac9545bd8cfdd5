use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    BookingStore, SeatLedger, Settlement, SettleFn, ShowStore, StoreError, StoreResult,
};
use crate::models::{Booking, BookingStatus, NewShow, Show};

const SHOW_COLUMNS: &str =
    "id, name, start_time, total_seats, booked_seats, created_at, updated_at";

const BOOKING_COLUMNS: &str = "id, show_id, seat_numbers, status, created_at, updated_at";

#[derive(Clone)]
pub struct PgShowStore {
    pool: PgPool,
}

impl PgShowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShowStore for PgShowStore {
    async fn create(&self, show: NewShow) -> StoreResult<Show> {
        let created = sqlx::query_as::<_, Show>(&format!(
            "INSERT INTO shows (id, name, start_time, total_seats, booked_seats)
             VALUES ($1, $2, $3, $4, '{{}}')
             RETURNING {SHOW_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&show.name)
        .bind(show.start_time)
        .bind(show.total_seats)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Show>> {
        let show = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(show)
    }

    async fn list(&self) -> StoreResult<Vec<Show>> {
        let shows = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows ORDER BY start_time, created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(shows)
    }

    async fn reserve_seats(&self, id: Uuid, seats: &[i32]) -> StoreResult<bool> {
        let (Some(&min), Some(&max)) = (seats.iter().min(), seats.iter().max()) else {
            return Ok(false);
        };

        // Один UPDATE: при конкурентных запросах второй ждёт блокировку строки
        // и перепроверяет WHERE уже на обновлённых booked_seats.
        let result = sqlx::query(
            r#"
            UPDATE shows
            SET booked_seats = booked_seats || $2::INTEGER[],
                updated_at = NOW()
            WHERE id = $1
              AND NOT (booked_seats && $2::INTEGER[])
              AND $3 >= 1
              AND $4 <= total_seats
            "#,
        )
        .bind(id)
        .bind(seats.to_vec())
        .bind(min)
        .bind(max)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// Статус в БД хранится текстом
#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    show_id: Uuid,
    seat_numbers: Vec<i32>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| StoreError::Corrupt(format!("booking {}: {e}", row.id)))?;

        Ok(Booking {
            id: row.id,
            show_id: row.show_id,
            seat_numbers: row.seat_numbers,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn create_pending(&self, show_id: Uuid, seats: &[i32]) -> StoreResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "INSERT INTO bookings (id, show_id, seat_numbers, status)
             VALUES ($1, $2, $3, $4)
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(show_id)
        .bind(seats.to_vec())
        .bind(BookingStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn resolve(&self, id: Uuid, status: BookingStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE bookings
             SET status = $2, updated_at = NOW()
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(BookingStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn stale_pending(&self, before: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = $1 AND created_at < $2
             ORDER BY created_at"
        ))
        .bind(BookingStatus::Pending.as_str())
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }
}

/// Операции над шоу и бронями в одной транзакции. Строка шоу берётся
/// `FOR UPDATE`, поэтому `reserve_seats` того же шоу ждёт её завершения.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeatLedger for PgLedger {
    async fn settle_orphan(
        &self,
        orphan: &Booking,
        decide: &SettleFn<'_>,
    ) -> StoreResult<Option<Settlement>> {
        let mut tx = self.pool.begin().await?;

        // Порядок блокировок: шоу, затем бронь
        let show = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE id = $1 FOR UPDATE"
        ))
        .bind(orphan.show_id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(orphan.id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Booking::try_from)
        .transpose()?;

        let Some(current) = current.filter(|b| b.status == BookingStatus::Pending) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let rivals = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE show_id = $1
               AND id <> $2
               AND status <> $3
               AND seat_numbers && $4::INTEGER[]"
        ))
        .bind(current.show_id)
        .bind(current.id)
        .bind(BookingStatus::Failed.as_str())
        .bind(current.seat_numbers.clone())
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Booking::try_from)
        .collect::<StoreResult<Vec<_>>>()?;

        let verdict = decide(&current, show.as_ref(), &rivals);
        if let Some(status) = verdict.status() {
            sqlx::query("UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(current.id)
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(verdict))
    }

    async fn release_seats(&self, show_id: Uuid, seats: &[i32]) -> StoreResult<Vec<i32>> {
        let mut tx = self.pool.begin().await?;

        let booked = sqlx::query_scalar::<_, Vec<i32>>(
            "SELECT booked_seats FROM shows WHERE id = $1 FOR UPDATE",
        )
        .bind(show_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(booked) = booked else {
            tx.rollback().await?;
            return Ok(Vec::new());
        };

        let owned = sqlx::query_scalar::<_, i32>(
            "SELECT UNNEST(seat_numbers) FROM bookings
             WHERE show_id = $1 AND status = $2 AND seat_numbers && $3::INTEGER[]",
        )
        .bind(show_id)
        .bind(BookingStatus::Confirmed.as_str())
        .bind(seats.to_vec())
        .fetch_all(&mut *tx)
        .await?;

        let released: Vec<i32> = seats
            .iter()
            .copied()
            .filter(|seat| booked.contains(seat) && !owned.contains(seat))
            .collect();

        if !released.is_empty() {
            let remaining: Vec<i32> = booked
                .into_iter()
                .filter(|seat| !released.contains(seat))
                .collect();
            sqlx::query("UPDATE shows SET booked_seats = $2, updated_at = NOW() WHERE id = $1")
                .bind(show_id)
                .bind(remaining)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(released)
    }
}
