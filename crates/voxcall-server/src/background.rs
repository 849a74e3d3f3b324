//! Background tasks for the VoxCall server.

use std::time::Duration;
use tokio::time::sleep;
use voxcall_calls::CallLifecycleController;

/// How often [`start_pruning_task`] checks for `retention`.
pub fn pruning_interval(retention: Duration) -> Duration {
    (retention / 2).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Periodically forgets calls that finished more than `retention` ago.
///
/// Runs until the task is dropped. A zero retention disables pruning.
pub async fn start_pruning_task(controller: CallLifecycleController, retention: Duration) {
    if retention.is_zero() {
        tracing::warn!("call pruning task disabled (retention=0)");
        return;
    }

    let interval = pruning_interval(retention);
    tracing::info!(
        retention_seconds = retention.as_secs(),
        interval_seconds = interval.as_secs(),
        "starting call pruning task"
    );

    loop {
        sleep(interval).await;
        let pruned = controller.prune_finished(retention);
        if pruned > 0 {
            tracing::info!(count = pruned, "pruned finished calls");
        }
    }
}
