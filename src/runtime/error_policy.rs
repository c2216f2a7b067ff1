//! # Error Policy
//!
//! Decides how long to wait before retrying a failed reconciliation.
//!
//! | Error                       | Action                                   |
//! |-----------------------------|------------------------------------------|
//! | validation, unrecoverable   | wait for the object to change            |
//! | write conflict              | requeue after the conflict delay         |
//! | API server unavailable      | requeue after the not-ready delay        |
//! | anything else               | Fibonacci backoff, tracked per object    |

use crate::controller::Context;
use crate::error::Error;
use crate::observability;
use kube_runtime::controller::Action;
use tracing::{error, info, warn};

/// Key under which an object's failure history is tracked
#[must_use]
pub fn backoff_key(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}

/// Handle a reconciliation error for the object `kind/name`.
#[must_use]
pub fn handle_reconciliation_error(kind: &str, name: &str, error: &Error, ctx: &Context) -> Action {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        resource.kind = kind,
        resource.name = name,
        error.kind = error.kind(),
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors(kind, error.kind());

    if error.is_terminal() {
        error!(%error, "Reconciliation failed, waiting for the object to change");
        return Action::await_change();
    }

    if error.is_conflict() {
        warn!(%error, requeue_secs = ctx.config.conflict_requeue_secs, "Conflict, requeueing");
        observability::metrics::increment_requeues_total("conflict");
        return Action::requeue(ctx.config.conflict_requeue());
    }

    if error.is_unavailable() {
        warn!(
            %error,
            requeue_secs = ctx.config.not_ready_requeue_secs,
            "API server not ready, requeueing"
        );
        observability::metrics::increment_requeues_total("not-ready");
        return Action::requeue(ctx.config.not_ready_requeue());
    }

    error!("Reconciliation error for {kind}/{name}: {error:?}");
    let (delay, error_count) = ctx.backoff.next(&backoff_key(kind, name));
    let next_trigger_time = ctx.clock.now()
        + chrono::Duration::seconds(i64::try_from(delay.as_secs()).unwrap_or(i64::MAX));
    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, next attempt: {})",
        delay.as_secs(),
        error_count,
        next_trigger_time.to_rfc3339()
    );
    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Forget the failure history of `kind/name` after a successful reconcile.
pub fn reset_backoff(kind: &str, name: &str, ctx: &Context) {
    ctx.backoff.reset(&backoff_key(kind, name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartError, ChartManager, MockHelmDriver, ReleaseStatus};
    use crate::client::{ClientError, MockKubeClient};
    use crate::clock::FixedClock;
    use crate::config::ControllerConfig;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> Context {
        Context::new(
            Arc::new(MockKubeClient::new()),
            ChartManager::new(Arc::new(MockHelmDriver::new())),
            ControllerConfig::default(),
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
        )
    }

    #[test]
    fn test_terminal_errors_wait_for_change() {
        let ctx = context();
        let validation = Error::Validation("spec.version not set".into());
        assert_eq!(
            handle_reconciliation_error("Mesh", "m", &validation, &ctx),
            Action::await_change()
        );

        let stuck = Error::Chart(ChartError::UnrecoverableState {
            release: "default-istiod".into(),
            status: ReleaseStatus::PendingRollback,
        });
        assert_eq!(
            handle_reconciliation_error("MeshRevision", "default", &stuck, &ctx),
            Action::await_change()
        );
    }

    #[test]
    fn test_conflict_and_unavailable_use_fixed_delays() {
        let ctx = context();
        let conflict = Error::Client(ClientError::Conflict("stale".into()));
        assert_eq!(
            handle_reconciliation_error("Mesh", "m", &conflict, &ctx),
            Action::requeue(Duration::from_secs(2))
        );

        let unavailable = Error::Client(ClientError::Unavailable("starting".into()));
        assert_eq!(
            handle_reconciliation_error("Mesh", "m", &unavailable, &ctx),
            Action::requeue(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_transient_errors_back_off_per_object() {
        let ctx = context();
        let error = Error::Client(ClientError::Other("connection reset".into()));

        let first = handle_reconciliation_error("Mesh", "a", &error, &ctx);
        let second = handle_reconciliation_error("Mesh", "a", &error, &ctx);
        let third = handle_reconciliation_error("Mesh", "a", &error, &ctx);
        assert_eq!(first, Action::requeue(Duration::from_secs(5)));
        assert_eq!(second, Action::requeue(Duration::from_secs(5)));
        assert_eq!(third, Action::requeue(Duration::from_secs(10)));

        // Other objects start from the beginning.
        assert_eq!(
            handle_reconciliation_error("Mesh", "b", &error, &ctx),
            Action::requeue(Duration::from_secs(5))
        );

        reset_backoff("Mesh", "a", &ctx);
        assert_eq!(
            handle_reconciliation_error("Mesh", "a", &error, &ctx),
            Action::requeue(Duration::from_secs(5))
        );
    }
}
