//! # nrm-core — node-local resource manager daemon control plane
//!
//! Implements the node-local resource manager's control plane: a
//! single-threaded, event-driven core that demultiplexes three message
//! streams (upstream RPC, upstream publish, downstream events), tracks
//! containers/processes/applications through their lifecycle, aggregates
//! per-package energy and power-cap sensors, and runs a time-integrated
//! power controller feeding a per-CPU DDCM duty-cycle policy.
//!
//! ## Architecture
//!
//! The daemon core owns every registry; all mutation happens on handlers
//! running to completion on a single cooperative event loop (`daemon`):
//! ```text
//!                    ┌──────────────────────────────────────┐
//!  upstream RPC   →  │             Daemon Core               │
//!  downstream ev. →  │  ┌───────────┐  ┌──────────────────┐  │
//!                    │  │ Container │  │ Node Power        │  │
//!                    │  │ Registry  │  │ Controller        │  │
//!                    │  └───────────┘  └──────────────────┘  │
//!                    │  ┌───────────┐  ┌──────────────────┐  │
//!                    │  │ Sensor    │  │ DDCM Policy       │  │
//!                    │  │ Manager   │  │ (per container)   │  │
//!                    │  └───────────┘  └──────────────────┘  │
//!                    └──────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod controller;
pub mod daemon;
pub mod ddcm;
pub mod manifest;
pub mod message;
pub mod recovery;
pub mod registry;
pub mod resources;
pub mod runtime;
pub mod sensor;
pub mod topology;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
