use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::api::InitiateRequest;
use crate::progress::{ProgressSink, UploadProgress};
use crate::transport::Transport;
use crate::{Error, Result};

/// Lifecycle of one upload attempt. `Superseded` means a newer submission
/// replaced this one; it is terminal and never surfaced as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Created,
    Initiating,
    Uploading,
    AwaitingTask,
    Polling,
    Succeeded,
    PartiallyFailed,
    Failed,
    Superseded,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::PartiallyFailed | Self::Failed | Self::Superseded
        )
    }
}

/// One submission's bookkeeping. `client_id` is generated locally; once the
/// initiate call succeeds, `server_id` is the only identifier sent with
/// chunks and `task_id` is what the poller watches.
#[derive(Debug)]
pub struct UploadAttempt {
    pub client_id: uuid::Uuid,
    pub server_id: Option<String>,
    pub task_id: Option<String>,
    pub total_size: u64,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub next_chunk_index: u32,
    pub state: AttemptState,
}

impl UploadAttempt {
    pub fn new(total_size: u64, chunk_size: u32) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4(),
            server_id: None,
            task_id: None,
            total_size,
            chunk_size,
            chunk_count: chunk_count(total_size, chunk_size),
            next_chunk_index: 0,
            state: AttemptState::Created,
        }
    }

    /// Byte range of chunk `index`; the last chunk is short when the total
    /// is not a multiple of the chunk size.
    pub fn chunk_range(&self, index: u32) -> std::ops::Range<usize> {
        let start = index as u64 * self.chunk_size as u64;
        let end = (start + self.chunk_size as u64).min(self.total_size);
        start as usize..end as usize
    }
}

pub fn chunk_count(total_size: u64, chunk_size: u32) -> u32 {
    total_size.div_ceil(chunk_size as u64) as u32
}

pub(crate) enum UploadOutcome {
    Accepted { server_id: String, task_id: String },
    Superseded,
}

/// Initiates the upload and sends every chunk in order, one at a time. The
/// cancellation token is the "still active" guard: it is consulted before
/// each request and again before acting on each reply, so a superseded
/// attempt stops silently instead of racing the attempt that replaced it.
pub(crate) async fn run_upload<T: Transport>(
    transport: &T,
    attempt: &mut UploadAttempt,
    bytes: &[u8],
    auth_token: &str,
    filename: &str,
    cancel: &CancellationToken,
    progress: Option<&dyn ProgressSink>,
) -> Result<UploadOutcome> {
    attempt.state = AttemptState::Initiating;
    debug!(
        event = "initiate.start",
        client_id = %attempt.client_id,
        total_size = attempt.total_size,
        chunk_size = attempt.chunk_size,
        chunk_count = attempt.chunk_count,
        "initiate.start"
    );
    if let Some(sink) = progress {
        sink.on_progress(UploadProgress {
            phase: "initiate".to_string(),
            chunks_total: Some(attempt.chunk_count as u64),
            chunks_done: Some(0),
            bytes_total: Some(attempt.total_size),
            bytes_uploaded: Some(0),
            polls: None,
        });
    }

    if cancel.is_cancelled() {
        attempt.state = AttemptState::Superseded;
        return Ok(UploadOutcome::Superseded);
    }

    let request = InitiateRequest {
        total_size: attempt.total_size,
        filename: filename.to_string(),
        upload_id: attempt.client_id.to_string(),
    };
    let reply = transport.initiate(request, auth_token).await;

    // Consulted before the settle is inspected: an error that lands after
    // a supersede is discarded like any other late reply.
    if cancel.is_cancelled() {
        debug!(
            event = "attempt.superseded",
            client_id = %attempt.client_id,
            at = "initiate",
            "attempt.superseded"
        );
        attempt.state = AttemptState::Superseded;
        return Ok(UploadOutcome::Superseded);
    }
    let reply = reply.map_err(|e| Error::Initiation {
        message: e.to_string(),
    })?;

    if !reply.ok || reply.body.status != "success" {
        let message = reply
            .body
            .message
            .unwrap_or_else(|| format!("server replied status={}", reply.body.status));
        error!(
            event = "initiate.rejected",
            client_id = %attempt.client_id,
            error = %message,
            "initiate.rejected"
        );
        return Err(Error::Initiation { message });
    }
    let server_id = reply.body.upload_id.ok_or_else(|| Error::Initiation {
        message: "success reply missing upload_id".to_string(),
    })?;
    let task_id = reply.body.task_id.ok_or_else(|| Error::Initiation {
        message: "success reply missing task_id".to_string(),
    })?;

    attempt.server_id = Some(server_id.clone());
    attempt.task_id = Some(task_id.clone());
    attempt.state = AttemptState::Uploading;
    debug!(
        event = "initiate.accepted",
        client_id = %attempt.client_id,
        server_id = %server_id,
        task_id = %task_id,
        "initiate.accepted"
    );

    let mut bytes_uploaded: u64 = 0;
    while attempt.next_chunk_index < attempt.chunk_count {
        let index = attempt.next_chunk_index;

        if cancel.is_cancelled() {
            debug!(
                event = "attempt.superseded",
                client_id = %attempt.client_id,
                at = "chunk",
                chunk_index = index,
                "attempt.superseded"
            );
            attempt.state = AttemptState::Superseded;
            return Ok(UploadOutcome::Superseded);
        }

        let range = attempt.chunk_range(index);
        let chunk_len = range.len() as u64;
        let reply = transport
            .upload_chunk(&server_id, index, bytes[range].to_vec(), auth_token)
            .await;

        if cancel.is_cancelled() {
            debug!(
                event = "attempt.superseded",
                client_id = %attempt.client_id,
                at = "chunk",
                chunk_index = index,
                "attempt.superseded"
            );
            attempt.state = AttemptState::Superseded;
            return Ok(UploadOutcome::Superseded);
        }
        let reply = reply.map_err(|e| {
            error!(
                event = "chunk.failed",
                client_id = %attempt.client_id,
                server_id = %server_id,
                chunk_index = index,
                error = %e,
                "chunk.failed"
            );
            Error::ChunkUpload {
                index,
                message: e.to_string(),
            }
        })?;

        if !reply.ok || reply.body.status != "success" {
            let message = reply
                .body
                .message
                .unwrap_or_else(|| "server rejected chunk".to_string());
            error!(
                event = "chunk.rejected",
                client_id = %attempt.client_id,
                server_id = %server_id,
                chunk_index = index,
                error = %message,
                "chunk.rejected"
            );
            return Err(Error::ChunkUpload { index, message });
        }

        attempt.next_chunk_index += 1;
        bytes_uploaded += chunk_len;
        debug!(
            event = "chunk.acked",
            client_id = %attempt.client_id,
            server_id = %server_id,
            chunk_index = index,
            chunk_bytes = chunk_len,
            "chunk.acked"
        );
        // The final chunk's reply repeats the task id; initiate already
        // fixed it, so it is only logged.
        if let Some(confirmed_task_id) = reply.body.task_id.as_deref() {
            debug!(
                event = "chunk.final_ack",
                client_id = %attempt.client_id,
                task_id = confirmed_task_id,
                message = reply.body.message.as_deref().unwrap_or(""),
                "chunk.final_ack"
            );
        }
        if let Some(sink) = progress {
            sink.on_progress(UploadProgress {
                phase: "upload".to_string(),
                chunks_total: Some(attempt.chunk_count as u64),
                chunks_done: Some(attempt.next_chunk_index as u64),
                bytes_total: Some(attempt.total_size),
                bytes_uploaded: Some(bytes_uploaded),
                polls: None,
            });
        }
    }

    attempt.state = AttemptState::AwaitingTask;
    debug!(
        event = "upload.complete",
        client_id = %attempt.client_id,
        server_id = %server_id,
        task_id = %task_id,
        chunks = attempt.chunk_count,
        bytes_uploaded,
        "upload.complete"
    );

    Ok(UploadOutcome::Accepted { server_id, task_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(12_000_000, 5_242_880), 3);
        assert_eq!(chunk_count(10_485_760, 5_242_880), 2);
        assert_eq!(chunk_count(10_485_761, 5_242_880), 3);
        assert_eq!(chunk_count(1, 5_242_880), 1);
    }

    #[test]
    fn chunk_ranges_match_reference_layout() {
        let attempt = UploadAttempt::new(12_000_000, 5_242_880);
        assert_eq!(attempt.chunk_count, 3);
        assert_eq!(attempt.chunk_range(0), 0..5_242_880);
        assert_eq!(attempt.chunk_range(1), 5_242_880..10_485_760);
        assert_eq!(attempt.chunk_range(2), 10_485_760..12_000_000);
    }

    #[test]
    fn chunk_ranges_cover_input_without_gap_or_overlap() {
        let data: Vec<u8> = (0u8..=22).collect();
        let attempt = UploadAttempt::new(data.len() as u64, 7);
        assert_eq!(attempt.chunk_count, 4);

        let mut rebuilt = Vec::new();
        for i in 0..attempt.chunk_count {
            let range = attempt.chunk_range(i);
            assert_eq!(range.start, rebuilt.len());
            rebuilt.extend_from_slice(&data[range]);
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn exact_multiple_has_full_last_chunk() {
        let attempt = UploadAttempt::new(21, 7);
        assert_eq!(attempt.chunk_count, 3);
        assert_eq!(attempt.chunk_range(2), 14..21);
    }

    #[test]
    fn attempt_starts_fresh() {
        let attempt = UploadAttempt::new(100, 10);
        assert_eq!(attempt.state, AttemptState::Created);
        assert!(!attempt.state.is_terminal());
        assert_eq!(attempt.next_chunk_index, 0);
        assert!(attempt.server_id.is_none());
        assert!(attempt.task_id.is_none());
    }

    #[test]
    fn terminal_states_are_classified() {
        for state in [
            AttemptState::Succeeded,
            AttemptState::PartiallyFailed,
            AttemptState::Failed,
            AttemptState::Superseded,
        ] {
            assert!(state.is_terminal());
        }
        for state in [
            AttemptState::Created,
            AttemptState::Initiating,
            AttemptState::Uploading,
            AttemptState::AwaitingTask,
            AttemptState::Polling,
        ] {
            assert!(!state.is_terminal());
        }
    }
}
