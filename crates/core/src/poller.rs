use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::api::{TaskResult, TaskStatus};
use crate::progress::{ProgressSink, UploadProgress};
use crate::transport::Transport;
use crate::{Error, Result};

pub(crate) enum PollOutcome {
    Finished(TaskResult),
    Superseded,
}

/// Queries task status on a fixed interval until a terminal status arrives.
/// The interval elapses before the first request (the server needs a moment
/// to start the task), polls never overlap, and there is no upper bound on
/// how long a task may stay non-terminal. Cancellation interrupts the wait
/// immediately; a request that settles after cancellation is discarded,
/// error or not.
pub(crate) async fn poll_task<T: Transport>(
    transport: &T,
    task_id: &str,
    interval: Duration,
    cancel: &CancellationToken,
    progress: Option<&dyn ProgressSink>,
) -> Result<PollOutcome> {
    let mut polls: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(event = "poll.cancelled", task_id, polls, "poll.cancelled");
                return Ok(PollOutcome::Superseded);
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let reply = transport.get_status(task_id).await;

        if cancel.is_cancelled() {
            debug!(event = "poll.cancelled", task_id, polls, "poll.cancelled");
            return Ok(PollOutcome::Superseded);
        }
        let reply = reply.map_err(|e| Error::PollingTransport {
            message: e.to_string(),
        })?;
        polls += 1;

        if !reply.ok {
            let detail = reply
                .body
                .message
                .unwrap_or_else(|| format!("status={}", reply.body.status));
            error!(event = "poll.http_error", task_id, error = %detail, "poll.http_error");
            return Err(Error::PollingTransport {
                message: format!("server error for task {task_id}: {detail}"),
            });
        }

        let body = reply.body;
        let Some(status) = TaskStatus::from_wire(&body.status) else {
            error!(
                event = "poll.unknown_status",
                task_id,
                status = %body.status,
                "poll.unknown_status"
            );
            return Err(Error::TaskFailure {
                message: format!("unrecognized task status: {}", body.status),
            });
        };

        if !status.is_terminal() {
            debug!(
                event = "poll.waiting",
                task_id,
                status = status.as_wire(),
                polls,
                "poll.waiting"
            );
            if let Some(sink) = progress {
                sink.on_progress(UploadProgress {
                    phase: "poll".to_string(),
                    polls: Some(polls),
                    ..UploadProgress::default()
                });
            }
            continue;
        }

        debug!(
            event = "poll.terminal",
            task_id,
            status = status.as_wire(),
            polls,
            "poll.terminal"
        );

        if matches!(status, TaskStatus::Success | TaskStatus::PartialFailure) {
            return Ok(PollOutcome::Finished(body.into_result(status)));
        }

        let message = body
            .error_message()
            .unwrap_or_else(|| format!("task ended with status {}", status.as_wire()));
        error!(event = "poll.task_failed", task_id, error = %message, "poll.task_failed");
        return Err(Error::TaskFailure { message });
    }
}
