//! `wherenow` - A tiny personal location log behind a bearer token
//!
//! This library provides the pieces of a single-endpoint HTTP service that
//! appends geolocation samples to a JSON Lines file and serves back the most
//! recent ones. Entries can later be annotated with a label, a note and a
//! category.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod record;
pub mod server;
pub mod storage;

pub use auth::BearerAuth;
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use record::{LocationRecord, NewLocation, RecordPatch, ValidationError};
pub use server::{router, AppState};
pub use storage::{clamp_limit, LocationLog, RecentEntry};
