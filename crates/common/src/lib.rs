//! Common types for the site token broker

mod secret;
mod error;
mod time;

pub use secret::Secret;
pub use error::{Error, Result};
pub use time::unix_millis;
