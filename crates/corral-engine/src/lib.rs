//! # corral-engine
//!
//! Narrow capability over the local container engine.
//!
//! The supervisor core never talks to the engine directly; it consumes the
//! [`Engine`] trait, which covers exactly the operations reconciliation
//! needs: inspect, pull, create, start, stop, remove, list, exec and
//! network disconnect. [`DockerEngine`] implements the trait against a
//! dockerd Unix socket using one HTTP/1.1 connection per request.
//!
//! ```text
//! corral-supervisor ──► Engine (trait) ──► DockerEngine ──► /var/run/docker.sock
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod capability;
pub mod docker;
pub mod error;
pub mod types;

pub use capability::{Engine, ExecStream};
pub use docker::DockerEngine;
pub use error::{EngineError, Result};

/// Engine API version the client speaks.
pub const API_VERSION: &str = "1.43";
