//! Tests of the sqlx stores against a real PostgreSQL. They are skipped when
//! `DATABASE_URL` is not set. Every test works on its own freshly created
//! show, so the tests can share one database.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test --test postgres_store_test`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use show_booking::database::Database;
use show_booking::models::{BookingStatus, NewShow, Show};
use show_booking::services::reconcile::settle;
use show_booking::services::reservation::{BookingOutcome, ReservationService};
use show_booking::store::{
    BookingStore, PgBookingStore, PgLedger, PgShowStore, SeatLedger, Settlement, SettleFn,
    ShowStore,
};

struct Pg {
    db: Database,
    shows: Arc<PgShowStore>,
    bookings: Arc<PgBookingStore>,
    ledger: Arc<PgLedger>,
    service: ReservationService,
}

async fn postgres() -> Option<Pg> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping postgres store tests");
        return None;
    };
    let db = Database::new(&url, 8).await.expect("connect to DATABASE_URL");
    db.run_migrations().await.expect("run migrations");

    let shows = Arc::new(db.show_store());
    let bookings = Arc::new(db.booking_store());
    let ledger = Arc::new(db.ledger());
    let service = ReservationService::new(shows.clone(), bookings.clone(), ledger.clone());
    Some(Pg { db, shows, bookings, ledger, service })
}

async fn create_show(pg: &Pg, total_seats: i32) -> Show {
    pg.shows
        .create(NewShow {
            name: "Postgres hall".to_string(),
            start_time: Utc::now() + Duration::days(1),
            total_seats,
        })
        .await
        .unwrap()
}

async fn booked(pg: &Pg, show_id: Uuid) -> Vec<i32> {
    let mut seats = pg.shows.find(show_id).await.unwrap().unwrap().booked_seats;
    seats.sort_unstable();
    seats
}

async fn status_of(pg: &Pg, id: Uuid) -> BookingStatus {
    pg.bookings.find(id).await.unwrap().unwrap().status
}

// Бронь, оставшаяся после падения процесса
async fn age(pg: &Pg, booking_id: Uuid, minutes: i32) {
    sqlx::query("UPDATE bookings SET created_at = NOW() - make_interval(mins => $2) WHERE id = $1")
        .bind(booking_id)
        .bind(minutes)
        .execute(&pg.db.pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn scenario_a_free_seats_confirm() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 2).await;

    let outcome = pg.service.book_seats(show.id, &[1, 2]).await.unwrap();

    assert!(matches!(outcome, BookingOutcome::Confirmed { .. }));
    assert_eq!(booked(&pg, show.id).await, vec![1, 2]);
    let booking = pg.bookings.find(outcome.booking_id()).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.seat_numbers, vec![1, 2]);
}

#[tokio::test]
async fn scenario_b_overlap_conflicts() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 2).await;
    pg.service.book_seats(show.id, &[1, 2]).await.unwrap();

    let outcome = pg.service.book_seats(show.id, &[2]).await.unwrap();

    assert!(matches!(outcome, BookingOutcome::Conflict { .. }));
    assert_eq!(status_of(&pg, outcome.booking_id()).await, BookingStatus::Failed);
    assert_eq!(booked(&pg, show.id).await, vec![1, 2]);
}

#[tokio::test]
async fn scenario_c_concurrent_requests_for_one_seat_confirm_once() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 1).await;
    let show_id = show.id;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let service = pg.service.clone();
            tokio::spawn(async move { service.book_seats(show_id, &[1]).await })
        })
        .collect();

    let mut confirmed = 0;
    for task in futures::future::join_all(tasks).await {
        if let BookingOutcome::Confirmed { .. } = task.unwrap().unwrap() {
            confirmed += 1;
        }
    }

    assert_eq!(confirmed, 1);
    assert_eq!(booked(&pg, show_id).await, vec![1]);
}

#[tokio::test]
async fn scenario_d_unknown_show_conflicts() {
    let Some(pg) = postgres().await else { return };

    let outcome = pg.service.book_seats(Uuid::new_v4(), &[1]).await.unwrap();

    assert!(matches!(outcome, BookingOutcome::Conflict { .. }));
    assert_eq!(status_of(&pg, outcome.booking_id()).await, BookingStatus::Failed);
}

#[tokio::test]
async fn conditional_update_checks_overlap_and_range() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 3).await;

    assert!(pg.shows.reserve_seats(show.id, &[1, 2]).await.unwrap());
    assert!(!pg.shows.reserve_seats(show.id, &[2, 3]).await.unwrap());
    assert!(!pg.shows.reserve_seats(show.id, &[3, 4]).await.unwrap());
    assert!(!pg.shows.reserve_seats(show.id, &[0]).await.unwrap());
    assert!(!pg.shows.reserve_seats(show.id, &[]).await.unwrap());
    assert!(pg.shows.reserve_seats(show.id, &[3]).await.unwrap());

    assert_eq!(booked(&pg, show.id).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn resolve_only_leaves_pending_once() {
    let Some(pg) = postgres().await else { return };
    let booking = pg.bookings.create_pending(Uuid::new_v4(), &[1]).await.unwrap();

    assert!(pg.bookings.resolve(booking.id, BookingStatus::Confirmed).await.unwrap());
    assert!(!pg.bookings.resolve(booking.id, BookingStatus::Failed).await.unwrap());
    assert!(!pg.bookings.resolve(Uuid::new_v4(), BookingStatus::Failed).await.unwrap());

    assert_eq!(status_of(&pg, booking.id).await, BookingStatus::Confirmed);
}

#[tokio::test]
async fn stale_pending_lists_only_old_pending_bookings() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 5).await;
    let old = pg.bookings.create_pending(show.id, &[1]).await.unwrap();
    let older = pg.bookings.create_pending(show.id, &[2]).await.unwrap();
    let fresh = pg.bookings.create_pending(show.id, &[3]).await.unwrap();
    age(&pg, old.id, 10).await;
    age(&pg, older.id, 20).await;

    let stale: Vec<Uuid> = pg
        .bookings
        .stale_pending(Utc::now() - Duration::minutes(5))
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.show_id == show.id)
        .map(|b| b.id)
        .collect();

    assert_eq!(stale, vec![older.id, old.id]);
    assert!(!stale.contains(&fresh.id));
}

#[tokio::test]
async fn orphan_is_deferred_while_live_booking_holds_its_seat() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 1).await;
    let orphan = pg.bookings.create_pending(show.id, &[1]).await.unwrap();
    age(&pg, orphan.id, 10).await;

    let live = pg.bookings.create_pending(show.id, &[1]).await.unwrap();
    assert!(pg.shows.reserve_seats(show.id, &[1]).await.unwrap());

    let cutoff = Utc::now() - Duration::minutes(5);
    let decide: &SettleFn<'_> = &|b, s, r| settle(b, s, r, cutoff);
    let verdict = pg.ledger.settle_orphan(&orphan, decide).await.unwrap();
    assert_eq!(verdict, Some(Settlement::Defer));
    assert_eq!(status_of(&pg, orphan.id).await, BookingStatus::Pending);

    assert!(pg.bookings.resolve(live.id, BookingStatus::Confirmed).await.unwrap());
    let verdict = pg.ledger.settle_orphan(&orphan, decide).await.unwrap();
    assert_eq!(verdict, Some(Settlement::Fail));
    assert_eq!(status_of(&pg, orphan.id).await, BookingStatus::Failed);
}

#[tokio::test]
async fn applied_orphan_is_confirmed() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 3).await;
    let orphan = pg.bookings.create_pending(show.id, &[2, 3]).await.unwrap();
    assert!(pg.shows.reserve_seats(show.id, &[2, 3]).await.unwrap());
    age(&pg, orphan.id, 10).await;

    let cutoff = Utc::now() - Duration::minutes(5);
    let decide: &SettleFn<'_> = &|b, s, r| settle(b, s, r, cutoff);
    let verdict = pg.ledger.settle_orphan(&orphan, decide).await.unwrap();

    assert_eq!(verdict, Some(Settlement::Confirm));
    assert_eq!(status_of(&pg, orphan.id).await, BookingStatus::Confirmed);
    assert_eq!(pg.ledger.settle_orphan(&orphan, decide).await.unwrap(), None);
}

#[tokio::test]
async fn release_keeps_confirmed_seats() {
    let Some(pg) = postgres().await else { return };
    let show = create_show(&pg, 4).await;
    let owner = pg.service.book_seats(show.id, &[1]).await.unwrap();
    assert!(matches!(owner, BookingOutcome::Confirmed { .. }));
    assert!(pg.shows.reserve_seats(show.id, &[3, 4]).await.unwrap());

    let released = pg.ledger.release_seats(show.id, &[1, 3, 4]).await.unwrap();

    assert_eq!(released, vec![3, 4]);
    assert_eq!(booked(&pg, show.id).await, vec![1]);
}
