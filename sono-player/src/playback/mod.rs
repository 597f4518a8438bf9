//! Transport state machine and state publication

pub mod engine;
pub mod state;
pub mod throttle;

pub use engine::{PlaybackEngine, Subscription};
pub use state::{EngineStatus, PlaybackState};
pub use throttle::Throttle;
