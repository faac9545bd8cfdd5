use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Шоу с фиксированной вместимостью и множеством уже занятых мест.
///
/// `booked_seats` всегда подмножество `1..=total_seats` без повторов:
/// меняется только атомарным условным обновлением в хранилище.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Show {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub total_seats: i32,
    pub booked_seats: Vec<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Show {
    pub fn available_seats(&self) -> i32 {
        self.total_seats - self.booked_seats.len() as i32
    }

    pub fn is_booked(&self, seat: i32) -> bool {
        self.booked_seats.contains(&seat)
    }
}

#[derive(Debug, Clone)]
pub struct NewShow {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub total_seats: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show(total_seats: i32, booked_seats: Vec<i32>) -> Show {
        let now = Utc::now();
        Show {
            id: Uuid::new_v4(),
            name: "Hamlet".to_string(),
            start_time: now,
            total_seats,
            booked_seats,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn available_seats_counts_free_places() {
        assert_eq!(show(10, vec![]).available_seats(), 10);
        assert_eq!(show(10, vec![3, 7]).available_seats(), 8);
    }

    #[test]
    fn serializes_in_camel_case() {
        let json = serde_json::to_value(show(2, vec![1])).unwrap();
        assert_eq!(json["totalSeats"], 2);
        assert_eq!(json["bookedSeats"], serde_json::json!([1]));
        assert!(json.get("startTime").is_some());
    }
}
