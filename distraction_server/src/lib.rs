//! Webcam based distraction detection served over HTTP.
//!
//! Every camera frame is searched for facial landmarks. A visible face means the user is paying
//! attention, no face means they are distracted. The latest verdict is available on `/status`.
pub mod endpoints;
pub mod meter;
pub mod monitor;
pub mod nn;
pub mod preview;
pub mod sensors;
pub mod server;
pub mod state;
pub mod utils;
