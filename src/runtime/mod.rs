//! # Runtime
//!
//! Process wiring around the reconcilers.
//!
//! - `initialization`: crypto provider, logging, metrics, HTTP server, clients
//! - `watch_loop`: the two controllers and their restart loop
//! - `error_policy`: retry decisions for failed reconciliations

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
