//! Сверка броней, зависших в PENDING после падения процесса между
//! созданием брони и её подтверждением.
//!
//! Места шоу сверка не трогает, меняется только статус брони. Решение
//! принимается под блокировкой шоу (`SeatLedger::settle_orphan`):
//! - шоу нет или место принадлежит CONFIRMED брони: FAILED;
//! - место держит свежая PENDING бронь, чей запрос ещё идёт: решение
//!   откладывается до следующего прохода;
//! - все места брони заняты в шоу: условное обновление успело
//!   примениться, CONFIRMED;
//! - иначе FAILED.
//!
//! Брони обрабатываются от старых к новым, поэтому из двух пересекающихся
//! зависших броней подтверждается только первая.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ReconcileConfig;
use crate::models::{Booking, BookingStatus, Show};
use crate::store::{BookingStore, SeatLedger, Settlement, SettleFn, StoreResult};

pub struct ReconcileService {
    bookings: Arc<dyn BookingStore>,
    ledger: Arc<dyn SeatLedger>,
    pending_after: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub confirmed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
}

impl ReconcileStats {
    pub fn total(&self) -> usize {
        self.confirmed + self.failed + self.deferred + self.skipped
    }
}

/// Решение по одной зависшей брони. `rivals` - другие не-FAILED брони
/// того же шоу; брони моложе `fresh_after` считаются живыми запросами.
pub fn settle(
    orphan: &Booking,
    show: Option<&Show>,
    rivals: &[Booking],
    fresh_after: DateTime<Utc>,
) -> Settlement {
    let Some(show) = show else {
        return Settlement::Fail;
    };

    let overlapping: Vec<&Booking> = rivals
        .iter()
        .filter(|b| b.id != orphan.id)
        .filter(|b| b.seat_numbers.iter().any(|s| orphan.seat_numbers.contains(s)))
        .collect();

    if overlapping.iter().any(|b| b.status == BookingStatus::Confirmed) {
        return Settlement::Fail;
    }
    if overlapping
        .iter()
        .any(|b| b.status == BookingStatus::Pending && b.created_at >= fresh_after)
    {
        return Settlement::Defer;
    }

    if orphan.seat_numbers.iter().all(|&seat| show.is_booked(seat)) {
        Settlement::Confirm
    } else {
        Settlement::Fail
    }
}

impl ReconcileService {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn SeatLedger>,
        config: &ReconcileConfig,
    ) -> Self {
        let pending_after = Duration::try_seconds(config.pending_after_seconds)
            .unwrap_or_else(|| {
                warn!(
                    "Pending threshold {}s is out of range, using 5 minutes",
                    config.pending_after_seconds
                );
                Duration::minutes(5)
            });
        Self {
            bookings,
            ledger,
            pending_after,
        }
    }

    /// Бесконечный цикл для фоновой задачи.
    pub async fn run(self, interval: std::time::Duration) {
        loop {
            tokio::time::sleep(interval).await;
            match self.reconcile_once().await {
                Ok(stats) if stats.total() > 0 => info!("Reconciled pending bookings: {:?}", stats),
                Ok(_) => {}
                Err(e) => error!("Pending booking reconciliation failed: {:?}", e),
            }
        }
    }

    pub async fn reconcile_once(&self) -> StoreResult<ReconcileStats> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.pending_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale = self.bookings.stale_pending(cutoff).await?;

        let decide: &SettleFn<'_> =
            &|orphan, show, rivals| settle(orphan, show, rivals, cutoff);

        let mut stats = ReconcileStats::default();
        for booking in stale {
            match self.ledger.settle_orphan(&booking, decide).await? {
                Some(Settlement::Defer) => {
                    info!(
                        "Orphaned booking {} for show {} overlaps a booking in progress, deferring",
                        booking.id, booking.show_id
                    );
                    stats.deferred += 1;
                }
                Some(settlement) => {
                    info!(
                        "Orphaned booking {} for show {} resolved as {:?}",
                        booking.id, booking.show_id, settlement
                    );
                    match settlement {
                        Settlement::Confirm => stats.confirmed += 1,
                        _ => stats.failed += 1,
                    }
                }
                None => {
                    warn!("Booking {} was resolved concurrently, skipping", booking.id);
                    stats.skipped += 1;
                }
            }
        }

        Ok(stats)
    }
}
