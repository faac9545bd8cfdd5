//! Хранилища шоу и броней.
//!
//! Процедура бронирования работает только через эти трейты. Гарантия
//! "одно место - одна подтверждённая бронь" целиком держится на атомарности
//! `ShowStore::reserve_seats` в конкретной реализации.
//!
//! `SeatLedger` нужен там, где решение зависит сразу от шоу и от броней:
//! реализация держит блокировку шоу на всё время операции.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, NewShow, Show};

pub use memory::{MemoryBookingStore, MemoryLedger, MemoryShowStore};
pub use postgres::{PgBookingStore, PgLedger, PgShowStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ShowStore: Send + Sync {
    async fn create(&self, show: NewShow) -> StoreResult<Show>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Show>>;

    /// Все шоу по возрастанию времени начала.
    async fn list(&self) -> StoreResult<Vec<Show>>;

    /// Одна атомарная операция: добавить `seats` в занятые места шоу, только
    /// если ни одно из них ещё не занято и все лежат в `1..=total_seats`.
    ///
    /// Возвращает `false`, если условие не выполнилось или шоу не существует.
    async fn reserve_seats(&self, id: Uuid, seats: &[i32]) -> StoreResult<bool>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn create_pending(&self, show_id: Uuid, seats: &[i32]) -> StoreResult<Booking>;

    /// Переводит бронь из PENDING в `status`. `false`, если бронь уже
    /// не в PENDING или не найдена.
    async fn resolve(&self, id: Uuid, status: BookingStatus) -> StoreResult<bool>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// PENDING брони, созданные раньше `before`, старые первыми.
    async fn stale_pending(&self, before: DateTime<Utc>) -> StoreResult<Vec<Booking>>;
}

/// Решение по зависшей PENDING брони.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Confirm,
    Fail,
    /// Места держит бронь, чей запрос ещё может завершиться. Решение
    /// откладывается до следующего прохода.
    Defer,
}

impl Settlement {
    /// Статус, который надо записать; `None` для `Defer`.
    pub fn status(&self) -> Option<BookingStatus> {
        match self {
            Settlement::Confirm => Some(BookingStatus::Confirmed),
            Settlement::Fail => Some(BookingStatus::Failed),
            Settlement::Defer => None,
        }
    }
}

/// Правило сверки: зависшая бронь, её шоу (если есть) и другие не-FAILED
/// брони того же шоу, пересекающиеся с ней по местам.
pub type SettleFn<'a> =
    dyn Fn(&Booking, Option<&Show>, &[Booking]) -> Settlement + Send + Sync + 'a;

#[async_trait]
pub trait SeatLedger: Send + Sync {
    /// Под блокировкой шоу перечитывает бронь, шоу и пересекающиеся брони,
    /// применяет `decide` и записывает статус.
    ///
    /// `None`, если бронь уже не в PENDING.
    async fn settle_orphan(
        &self,
        orphan: &Booking,
        decide: &SettleFn<'_>,
    ) -> StoreResult<Option<Settlement>>;

    /// Под блокировкой шоу снимает `seats` с занятых, кроме мест,
    /// принадлежащих CONFIRMED броням. Возвращает освобождённые места.
    async fn release_seats(&self, show_id: Uuid, seats: &[i32]) -> StoreResult<Vec<i32>>;
}
