//! reservation.rs
//!
//! Процедура бронирования мест: либо все запрошенные места резервируются
//! атомарно, либо ни одно.
//!
//! 1.  Бронь создаётся в PENDING.
//! 2.  Одно атомарное условное обновление шоу в хранилище: места добавляются,
//!     только если ни одно ещё не занято и все в пределах вместимости.
//! 3.  Бронь переводится в CONFIRMED или FAILED по результату шага 2.
//!     Если сверка успела закрыть бронь как FAILED уже после шага 2, места
//!     возвращаются шоу.
//!
//! Внутрипроцессных блокировок нет: конкурентные запросы на одно шоу
//! выполняются параллельно, исключительность даёт хранилище.

use std::{collections::HashSet, fmt, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::BookingStatus;
use crate::store::{BookingStore, SeatLedger, ShowStore, StoreError};

/// Итог бронирования, который видит клиент.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOutcome {
    Confirmed { booking_id: Uuid },
    /// Место занято, вне диапазона или шоу не найдено. Бронь помечена FAILED.
    Conflict { booking_id: Uuid },
}

impl BookingOutcome {
    pub fn booking_id(&self) -> Uuid {
        match self {
            BookingOutcome::Confirmed { booking_id } | BookingOutcome::Conflict { booking_id } => {
                *booking_id
            }
        }
    }

    pub fn status(&self) -> BookingStatus {
        match self {
            BookingOutcome::Confirmed { .. } => BookingStatus::Confirmed,
            BookingOutcome::Conflict { .. } => BookingStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidSeats {
    Empty,
    NotPositive(i32),
    Duplicate(i32),
}

impl fmt::Display for InvalidSeats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidSeats::Empty => write!(f, "At least one seat must be requested"),
            InvalidSeats::NotPositive(seat) => write!(f, "Seat number {seat} must be positive"),
            InvalidSeats::Duplicate(seat) => write!(f, "Seat {seat} is requested more than once"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("invalid seats: {0}")]
    InvalidSeats(InvalidSeats),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Проверка запроса до обращения к хранилищу. Верхняя граница
/// (`total_seats`) проверяется внутри атомарного обновления.
pub fn validate_seats(seats: &[i32]) -> Result<(), InvalidSeats> {
    if seats.is_empty() {
        return Err(InvalidSeats::Empty);
    }
    let mut seen = HashSet::with_capacity(seats.len());
    for &seat in seats {
        if seat < 1 {
            return Err(InvalidSeats::NotPositive(seat));
        }
        if !seen.insert(seat) {
            return Err(InvalidSeats::Duplicate(seat));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ReservationService {
    shows: Arc<dyn ShowStore>,
    bookings: Arc<dyn BookingStore>,
    ledger: Arc<dyn SeatLedger>,
}

impl ReservationService {
    pub fn new(
        shows: Arc<dyn ShowStore>,
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn SeatLedger>,
    ) -> Self {
        Self {
            shows,
            bookings,
            ledger,
        }
    }

    pub async fn book_seats(
        &self,
        show_id: Uuid,
        seats: &[i32],
    ) -> Result<BookingOutcome, ReservationError> {
        validate_seats(seats).map_err(ReservationError::InvalidSeats)?;

        let booking = self.bookings.create_pending(show_id, seats).await?;

        let reserved = self.shows.reserve_seats(show_id, seats).await?;

        let (status, outcome) = if reserved {
            (BookingStatus::Confirmed, BookingOutcome::Confirmed { booking_id: booking.id })
        } else {
            (BookingStatus::Failed, BookingOutcome::Conflict { booking_id: booking.id })
        };

        if !self.bookings.resolve(booking.id, status).await? {
            return self.resolved_elsewhere(booking.id, show_id, seats, reserved, outcome).await;
        }

        info!(
            "booking {} for show {} seats {:?}: {}",
            booking.id, show_id, seats, status
        );
        Ok(outcome)
    }

    /// Бронь закрыла сверка. Совпавшее решение отдаём клиенту как есть;
    /// если бронь FAILED, а места успели зарезервироваться, возвращаем их.
    async fn resolved_elsewhere(
        &self,
        booking_id: Uuid,
        show_id: Uuid,
        seats: &[i32],
        reserved: bool,
        outcome: BookingOutcome,
    ) -> Result<BookingOutcome, ReservationError> {
        let current = self.bookings.find(booking_id).await?.map(|b| b.status);
        if current == Some(outcome.status()) {
            info!("booking {} was already resolved as {}", booking_id, outcome.status());
            return Ok(outcome);
        }

        if reserved {
            let released = self.ledger.release_seats(show_id, seats).await?;
            warn!(
                "booking {} for show {} was resolved as {:?} elsewhere, released seats {:?}",
                booking_id, show_id, current, released
            );
        } else {
            warn!(
                "booking {} for show {} was resolved as {:?} elsewhere",
                booking_id, show_id, current
            );
        }

        Err(StoreError::Unavailable(format!("booking {booking_id} is no longer pending")).into())
    }
}
