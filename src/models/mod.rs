pub mod booking;
pub mod show;

pub use booking::{Booking, BookingStatus};
pub use show::{NewShow, Show};
