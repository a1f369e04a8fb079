//! Stage workers (C4): four processor kinds, one per queue, each reading
//! inputs, performing its stage, writing outputs, and enqueuing downstream
//! messages. Every worker calls exactly one of `ack()`/`retry()` per
//! message, decided generically from the error's [`ErrorClass`].

pub mod analysis;
pub mod crawl;
pub mod ocr;
pub mod webhook;

use tracing::{error, warn};

use crate::error::{Classify, ErrorClass};
use crate::queue::{Delivery, Queue, Result as QueueResult};
use crate::store::TelemetryRepository;

/// Record a telemetry step without letting a telemetry write failure fail
/// the stage itself: these are append-only diagnostic streams, not part of
/// the pipeline's correctness contract.
pub(crate) fn log_step_safe(
    telemetry: &TelemetryRepository,
    step: &str,
    status: &str,
    context: serde_json::Value,
) {
    if let Err(e) = telemetry.record_step(step, status, context) {
        warn!(error = %e, step, "failed to record telemetry step");
    }
}

/// Resolve a stage handler's outcome into exactly one `ack()`/`retry()`
/// call, per the error's classification. `PermanentForItem` and
/// `BusinessLogic` are terminal for this item (acked, with the worker
/// having already recorded its own ErrorLog/downgrade); `Transient` and
/// `Fatal` are redelivered up to `max_retries`.
pub async fn finish_delivery<M, Q, E>(
    queue: &Q,
    delivery: &Delivery<M>,
    outcome: Result<(), E>,
    max_retries: u32,
) -> QueueResult<()>
where
    Q: Queue<M>,
    M: Send + Sync + 'static,
    E: Classify + std::fmt::Display,
{
    match outcome {
        Ok(()) => queue.ack(delivery).await,
        Err(err) => match err.classify() {
            ErrorClass::PermanentForItem | ErrorClass::BusinessLogic => {
                error!(error = %err, queue = delivery.queue.as_str(), "stage item terminal, acking");
                queue.ack(delivery).await
            }
            ErrorClass::Transient | ErrorClass::Fatal => {
                warn!(error = %err, queue = delivery.queue.as_str(), "stage item retrying");
                queue.retry(delivery, max_retries).await
            }
        },
    }
}
