//! Client side of the distraction server: poll `/status` and raise an alert while distracted.
pub mod alert;
pub mod client;

pub use common::Error;
