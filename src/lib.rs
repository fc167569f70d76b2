//! foxio: an asynchronous block-I/O engine for external-memory algorithms.
//!
//! Requests are submitted against a [`file::File`] backend and served by a
//! per-disk [`queue`] worker; [`stats`] tracks process-wide serial/parallel
//! I/O time and byte counts, and [`factory`] ties a textual backend name to
//! a constructed file plus its registered queue.

pub mod config;
pub mod error;
pub mod factory;
pub mod file;
pub mod primitives;
pub mod queue;
pub mod registry;
pub mod request;
pub mod stats;

pub use config::{DirectMode, DiskConfig, OpenFlags};
pub use error::IoError;
pub use file::File;
pub use request::{cancel_all, wait_all, wait_any, Direction, Request, RequestState};
pub use stats::Stats;
