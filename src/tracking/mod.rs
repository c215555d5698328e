mod controller;
mod state;

pub use controller::TrackingController;
pub use state::{TrackingState, TrackingStatus};
