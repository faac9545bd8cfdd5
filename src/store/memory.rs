//! In-memory хранилища для разработки (`STORAGE=memory`) и тестов.
//!
//! Условное резервирование мест выполняется целиком под одной блокировкой,
//! поэтому атомарно относительно остальных вызовов того же хранилища.
//! `MemoryLedger` берёт обе блокировки в порядке шоу, затем брони.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use uuid::Uuid;

use super::{
    BookingStore, SeatLedger, Settlement, SettleFn, ShowStore, StoreError, StoreResult,
};
use crate::models::{Booking, BookingStatus, NewShow, Show};

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
}

#[derive(Default)]
pub struct MemoryShowStore {
    shows: Mutex<HashMap<Uuid, Show>>,
}

impl MemoryShowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShowStore for MemoryShowStore {
    async fn create(&self, show: NewShow) -> StoreResult<Show> {
        let now = Utc::now();
        let created = Show {
            id: Uuid::new_v4(),
            name: show.name,
            start_time: show.start_time,
            total_seats: show.total_seats,
            booked_seats: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        lock(&self.shows)?.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Show>> {
        Ok(lock(&self.shows)?.get(&id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Show>> {
        let mut shows: Vec<Show> = lock(&self.shows)?.values().cloned().collect();
        shows.sort_by_key(|s| (s.start_time, s.created_at));
        Ok(shows)
    }

    async fn reserve_seats(&self, id: Uuid, seats: &[i32]) -> StoreResult<bool> {
        let mut shows = lock(&self.shows)?;
        let Some(show) = shows.get_mut(&id) else {
            return Ok(false);
        };

        let blocked = seats
            .iter()
            .any(|&seat| seat < 1 || seat > show.total_seats || show.is_booked(seat));
        if seats.is_empty() || blocked {
            return Ok(false);
        }

        show.booked_seats.extend_from_slice(seats);
        show.updated_at = Utc::now();
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryBookingStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Вставка готовой записи; в тестах так моделируются брони,
    /// оставшиеся после падения процесса.
    pub fn insert(&self, booking: Booking) -> StoreResult<()> {
        lock(&self.bookings)?.insert(booking.id, booking);
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn create_pending(&self, show_id: Uuid, seats: &[i32]) -> StoreResult<Booking> {
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            show_id,
            seat_numbers: seats.to_vec(),
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        lock(&self.bookings)?.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn resolve(&self, id: Uuid, status: BookingStatus) -> StoreResult<bool> {
        let mut bookings = lock(&self.bookings)?;
        match bookings.get_mut(&id) {
            Some(booking) if booking.status == BookingStatus::Pending => {
                booking.status = status;
                booking.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(lock(&self.bookings)?.get(&id).cloned())
    }

    async fn stale_pending(&self, before: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let mut stale: Vec<Booking> = lock(&self.bookings)?
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < before)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        Ok(stale)
    }
}

pub struct MemoryLedger {
    shows: Arc<MemoryShowStore>,
    bookings: Arc<MemoryBookingStore>,
}

impl MemoryLedger {
    pub fn new(shows: Arc<MemoryShowStore>, bookings: Arc<MemoryBookingStore>) -> Self {
        Self { shows, bookings }
    }
}

#[async_trait]
impl SeatLedger for MemoryLedger {
    async fn settle_orphan(
        &self,
        orphan: &Booking,
        decide: &SettleFn<'_>,
    ) -> StoreResult<Option<Settlement>> {
        let shows = lock(&self.shows.shows)?;
        let mut bookings = lock(&self.bookings.bookings)?;

        let Some(current) = bookings
            .get(&orphan.id)
            .filter(|b| b.status == BookingStatus::Pending)
            .cloned()
        else {
            return Ok(None);
        };

        let rivals: Vec<Booking> = bookings
            .values()
            .filter(|b| {
                b.id != current.id
                    && b.show_id == current.show_id
                    && b.status != BookingStatus::Failed
                    && b.seat_numbers.iter().any(|s| current.seat_numbers.contains(s))
            })
            .cloned()
            .collect();

        let verdict = decide(&current, shows.get(&current.show_id), &rivals);
        if let (Some(status), Some(booking)) = (verdict.status(), bookings.get_mut(&current.id)) {
            booking.status = status;
            booking.updated_at = Utc::now();
        }
        Ok(Some(verdict))
    }

    async fn release_seats(&self, show_id: Uuid, seats: &[i32]) -> StoreResult<Vec<i32>> {
        let mut shows = lock(&self.shows.shows)?;
        let bookings = lock(&self.bookings.bookings)?;
        let Some(show) = shows.get_mut(&show_id) else {
            return Ok(Vec::new());
        };

        let owned: HashSet<i32> = bookings
            .values()
            .filter(|b| b.show_id == show_id && b.status == BookingStatus::Confirmed)
            .flat_map(|b| b.seat_numbers.iter().copied())
            .collect();

        let released: Vec<i32> = seats
            .iter()
            .copied()
            .filter(|&seat| show.is_booked(seat) && !owned.contains(&seat))
            .collect();
        if !released.is_empty() {
            show.booked_seats.retain(|seat| !released.contains(seat));
            show.updated_at = Utc::now();
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn show_with(store: &MemoryShowStore, total_seats: i32) -> Show {
        store
            .create(NewShow {
                name: "Evening concert".to_string(),
                start_time: Utc::now() + Duration::days(1),
                total_seats,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reserve_rejects_overlap_and_out_of_range() {
        let store = MemoryShowStore::new();
        let show = show_with(&store, 3).await;

        assert!(store.reserve_seats(show.id, &[1, 2]).await.unwrap());
        assert!(!store.reserve_seats(show.id, &[2, 3]).await.unwrap());
        assert!(!store.reserve_seats(show.id, &[4]).await.unwrap());
        assert!(!store.reserve_seats(show.id, &[0]).await.unwrap());
        assert!(!store.reserve_seats(Uuid::new_v4(), &[3]).await.unwrap());

        let show = store.find(show.id).await.unwrap().unwrap();
        assert_eq!(show.booked_seats, vec![1, 2]);
    }

    #[tokio::test]
    async fn list_is_ordered_by_start_time() {
        let store = MemoryShowStore::new();
        let late = store
            .create(NewShow {
                name: "Late".to_string(),
                start_time: Utc::now() + Duration::days(3),
                total_seats: 1,
            })
            .await
            .unwrap();
        let early = show_with(&store, 1).await;

        let ids: Vec<Uuid> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn resolve_happens_only_once() {
        let store = MemoryBookingStore::new();
        let booking = store.create_pending(Uuid::new_v4(), &[1]).await.unwrap();

        assert!(store.resolve(booking.id, BookingStatus::Confirmed).await.unwrap());
        assert!(!store.resolve(booking.id, BookingStatus::Failed).await.unwrap());

        let stored = store.find(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn release_keeps_seats_of_confirmed_bookings() {
        let shows = Arc::new(MemoryShowStore::new());
        let bookings = Arc::new(MemoryBookingStore::new());
        let ledger = MemoryLedger::new(shows.clone(), bookings.clone());
        let show = show_with(&shows, 4).await;

        assert!(shows.reserve_seats(show.id, &[1, 2]).await.unwrap());
        let owner = bookings.create_pending(show.id, &[1]).await.unwrap();
        assert!(bookings.resolve(owner.id, BookingStatus::Confirmed).await.unwrap());

        let released = ledger.release_seats(show.id, &[1, 2, 3]).await.unwrap();

        assert_eq!(released, vec![2]);
        let show = shows.find(show.id).await.unwrap().unwrap();
        assert_eq!(show.booked_seats, vec![1]);
    }

    #[tokio::test]
    async fn settle_sees_only_overlapping_live_bookings() {
        let shows = Arc::new(MemoryShowStore::new());
        let bookings = Arc::new(MemoryBookingStore::new());
        let ledger = MemoryLedger::new(shows.clone(), bookings.clone());
        let show = show_with(&shows, 4).await;

        let orphan = bookings.create_pending(show.id, &[1, 2]).await.unwrap();
        let overlapping = bookings.create_pending(show.id, &[2, 3]).await.unwrap();
        let failed = bookings.create_pending(show.id, &[1]).await.unwrap();
        assert!(bookings.resolve(failed.id, BookingStatus::Failed).await.unwrap());
        bookings.create_pending(show.id, &[4]).await.unwrap();

        let verdict = ledger
            .settle_orphan(&orphan, &|_, show, rivals| {
                assert!(show.is_some());
                let ids: Vec<Uuid> = rivals.iter().map(|b| b.id).collect();
                assert_eq!(ids, vec![overlapping.id]);
                Settlement::Fail
            })
            .await
            .unwrap();

        assert_eq!(verdict, Some(Settlement::Fail));
        let stored = bookings.find(orphan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Failed);

        // Повторно закрыть уже закрытую бронь нельзя
        let again = ledger
            .settle_orphan(&orphan, &|_, _, _| Settlement::Confirm)
            .await
            .unwrap();
        assert_eq!(again, None);
    }
}
