pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::services::reservation::ReservationService;
use crate::store::{
    BookingStore, MemoryBookingStore, MemoryLedger, MemoryShowStore, SeatLedger, ShowStore,
};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub shows: Arc<dyn ShowStore>,
    pub bookings: Arc<dyn BookingStore>,
    pub ledger: Arc<dyn SeatLedger>,
    pub reservations: ReservationService,
    pub cache: cache::CacheService,
}

impl AppState {
    pub fn new(
        shows: Arc<dyn ShowStore>,
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn SeatLedger>,
        cache: cache::CacheService,
    ) -> Arc<Self> {
        let reservations =
            ReservationService::new(shows.clone(), bookings.clone(), ledger.clone());
        Arc::new(Self {
            shows,
            bookings,
            ledger,
            reservations,
            cache,
        })
    }

    pub fn in_memory() -> Arc<Self> {
        let (shows, bookings, ledger) = memory_stores();
        Self::new(shows, bookings, ledger, cache::CacheService::disabled())
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Arc<Self>> {
        let (shows, bookings, ledger) = match config.database.backend {
            StorageBackend::Postgres => {
                let db = database::Database::from_config(&config.database).await?;
                info!("Database connected");
                db.run_migrations().await?;
                let shows: Arc<dyn ShowStore> = Arc::new(db.show_store());
                let bookings: Arc<dyn BookingStore> = Arc::new(db.booking_store());
                let ledger: Arc<dyn SeatLedger> = Arc::new(db.ledger());
                (shows, bookings, ledger)
            }
            StorageBackend::Memory => {
                info!("Using in-memory storage, data is lost on restart");
                memory_stores()
            }
        };

        let cache = match &config.redis.url {
            Some(url) => {
                let redis = redis_client::RedisClient::new(url).await?;
                info!("Redis connected");
                cache::CacheService::new(redis)
            }
            None => {
                info!("REDIS_URL not set, show cache disabled");
                cache::CacheService::disabled()
            }
        };

        let state = Self::new(shows, bookings, ledger, cache);

        // Warmup cache в фоне
        let state_for_bg = state.clone();
        tokio::spawn(async move {
            match state_for_bg.shows.list().await {
                Ok(shows) => state_for_bg.cache.warmup(&shows).await,
                Err(e) => tracing::error!("Cache warmup failed: {:?}", e),
            }
        });

        Ok(state)
    }
}

type Stores = (Arc<dyn ShowStore>, Arc<dyn BookingStore>, Arc<dyn SeatLedger>);

fn memory_stores() -> Stores {
    let shows = Arc::new(MemoryShowStore::new());
    let bookings = Arc::new(MemoryBookingStore::new());
    let ledger = Arc::new(MemoryLedger::new(shows.clone(), bookings.clone()));
    (shows, bookings, ledger)
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Ticket Booking API is running..." }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
