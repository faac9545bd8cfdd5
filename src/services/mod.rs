pub mod reconcile;
pub mod reservation;
