//! # Prelude
//!
//! ```rust
//! use mesh_operator::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::chart::{ChartError, ChartManager, ChartRequest, HelmDriver, Release, ReleaseStatus};

pub use crate::client::{ClientError, KubeClient};

pub use crate::clock::{Clock, SystemClock};

pub use crate::config::ControllerConfig;

pub use crate::controller::Context;

pub use crate::error::{Error, Result};

pub use crate::values::{resolve_values, Values, ValuesError};
