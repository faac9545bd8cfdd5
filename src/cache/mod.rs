use crate::redis_client::RedisClient;
use tracing::info;

pub mod shows;

pub use shows::Generation;

/// Кеш чтения шоу в Redis. Без Redis все операции - no-op,
/// и сервис читает хранилище напрямую.
#[derive(Clone)]
pub struct CacheService {
    redis: Option<RedisClient>,
}

impl CacheService {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis: Some(redis) }
    }

    pub fn disabled() -> Self {
        Self { redis: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    // Прогрев кеша при старте
    pub async fn warmup(&self, shows: &[crate::models::Show]) {
        if !self.is_enabled() {
            return;
        }
        let Some(generation) = self.generation().await else {
            return;
        };
        info!("Starting cache warmup...");
        self.save_shows(generation, shows).await;
        for show in shows {
            self.save_show(generation, show).await;
        }
        info!("Cache warmup done: {} shows", shows.len());
    }
}
