//! # Custom Resource Definitions
//!
//! CRD types for the mesh operator.
//!
//! ## Module Structure
//!
//! - `mesh.rs` - `Mesh`, the top-level desired state, and revision naming
//! - `revision.rs` - `MeshRevision`, one concrete control plane install
//! - `status.rs` - Condition types and the pure condition-set operations

mod mesh;
mod revision;
mod status;

pub use mesh::{
    active_revision_name, default_mesh_namespace, values_revision_name, Mesh, MeshSpec,
    MeshStatus, RevisionSummary, UpdateStrategy, UpdateStrategyType,
};
pub use revision::{MeshRevision, MeshRevisionSpec, MeshRevisionStatus};
pub use status::{
    derive_state, find_condition, set_condition, Condition, ConditionReason, ConditionStatus,
    ConditionType,
};
