//! Кеш списка шоу и отдельных шоу.
//!
//! Ключи содержат поколение кеша. Инвалидация увеличивает поколение, а
//! запись идёт под тем поколением, которое было прочитано до обращения к
//! хранилищу. Запоздавшая запись старых данных попадает в ключ, который
//! уже никто не читает, и истекает по TTL.

use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::CacheService;
use crate::models::Show;

const GENERATION_KEY: &str = "shows:generation";
const SHOW_TTL_SECONDS: u64 = 300;

/// Поколение кеша, прочитанное до похода в хранилище.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

fn shows_key(generation: Generation) -> String {
    format!("shows:{}", generation.0)
}

fn show_key(generation: Generation, id: Uuid) -> String {
    format!("show:{}:{}", generation.0, id)
}

impl CacheService {
    /// Текущее поколение; `None`, если кеш выключен или Redis недоступен.
    pub async fn generation(&self) -> Option<Generation> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.conn.clone();
        let result: Result<Option<u64>, _> = conn.get(GENERATION_KEY).await;
        match result {
            Ok(value) => Some(Generation(value.unwrap_or(0))),
            Err(e) => {
                warn!("Failed to read cache generation: {:?}", e);
                None
            }
        }
    }

    /// Список шоу из кеша; `None` при промахе или ошибке.
    pub async fn get_shows(&self, generation: Generation) -> Option<Vec<Show>> {
        match self.read_json(&shows_key(generation)).await {
            Ok(shows) => shows,
            Err(e) => {
                warn!("Failed to read shows from cache: {:?}", e);
                None
            }
        }
    }

    pub async fn save_shows(&self, generation: Generation, shows: &[Show]) {
        if let Err(e) = self.write_json(&shows_key(generation), shows).await {
            warn!("Failed to cache shows: {:?}", e);
        }
    }

    pub async fn get_show(&self, generation: Generation, id: Uuid) -> Option<Show> {
        match self.read_json(&show_key(generation, id)).await {
            Ok(show) => show,
            Err(e) => {
                warn!("Failed to read show {} from cache: {:?}", id, e);
                None
            }
        }
    }

    pub async fn save_show(&self, generation: Generation, show: &Show) {
        if let Err(e) = self.write_json(&show_key(generation, show.id), show).await {
            warn!("Failed to cache show {}: {:?}", show.id, e);
        }
    }

    // Новое поколение: все ранее записанные шоу и списки перестают читаться
    pub async fn invalidate_show(&self, id: Uuid) {
        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.conn.clone();
        let result: Result<u64, _> = conn.incr(GENERATION_KEY, 1).await;
        match result {
            Ok(generation) => debug!("Invalidated cache for show {}, generation {}", id, generation),
            Err(e) => warn!("Failed to invalidate cache for show {}: {:?}", id, e),
        }
    }

    // === Работа с Redis ===

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, redis::RedisError> {
        let Some(redis) = &self.redis else {
            return Ok(None);
        };
        let mut conn = redis.conn.clone();
        let data: Option<String> = conn.get(key).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let value = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(Some(value))
    }

    async fn write_json<T: serde::Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), redis::RedisError> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };
        let data = serde_json::to_string(value).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = redis.conn.clone();
        conn.set_ex(key, data, SHOW_TTL_SECONDS).await
    }
}
