//! # Mesh Operator
//!
//! Kubernetes operator for service-mesh control planes.
//!
//! A cluster-scoped `Mesh` declares the desired version, namespace, profile and
//! values. The operator turns it into a `MeshRevision`, installs the control plane
//! chart for each revision with Helm, reports readiness and usage through status
//! conditions, and deletes revisions that have been unused for longer than the
//! grace period.
//!
//! ## Module Structure
//!
//! - `crd`: custom resource types and the condition model
//! - `values`: values documents and profile resolution
//! - `chart`: the Helm release state machine and post-renderer
//! - `controller`: the `Mesh` and `MeshRevision` reconcilers
//! - `runtime`: startup, watch loop and error policy
//! - `client`, `clock`, `config`, `ownership`: seams and shared plumbing
//! - `observability`, `server`: Prometheus metrics and the health server

pub mod cache;
pub mod chart;
pub mod client;
pub mod clock;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod ownership;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod values;
