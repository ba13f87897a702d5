//! Face-anchored overlay compositing for virtual try-on: camera or photo in,
//! face landmarks out of a background detector, product sprites drawn on top.

pub mod anchor;
pub mod assets;
pub mod capture;
pub mod catalog;
pub mod compositor;
pub mod config;
pub mod error;
pub mod model_download;
pub mod perception;
pub mod session;
pub mod smoothing;
pub mod snapshot;
pub mod types;

pub use session::{TrackingPhase, TryOnSession, TryOnStatus};
