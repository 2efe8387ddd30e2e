//! Glue between the async control flow and blocking vendor calls.
//!
//! Vendor drivers block the calling thread (wait-until-done, bulk transfers,
//! frame copies, open/close). Every such call goes through [`run_blocking`] so
//! the runtime thread that owns the acquisition loop stays responsive while the
//! hardware works.

use std::time::Duration;

use crate::error::DaqResult;

/// Poll interval for card wait-until-done calls when none is configured.
pub const DEFAULT_CARD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep between camera buffer status polls when none is configured.
pub const DEFAULT_CAMERA_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Run a blocking vendor call on the blocking pool and await its result.
///
/// A panic inside `f` surfaces as [`crate::error::DaqError::Worker`].
pub async fn run_blocking<T, F>(f: F) -> DaqResult<T>
where
    F: FnOnce() -> DaqResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let value = run_blocking(|| Ok(21 * 2)).await;
        assert_eq!(value.ok(), Some(42));
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_inner_error() {
        let result: DaqResult<()> =
            run_blocking(|| Err(DaqError::Resource("pool exhausted".into()))).await;
        assert!(matches!(result, Err(DaqError::Resource(_))));
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_run_blocking_maps_panic_to_worker_error() {
        let result: DaqResult<()> = run_blocking(|| panic!("vendor call crashed")).await;
        assert!(matches!(result, Err(DaqError::Worker(_))));
    }
}
