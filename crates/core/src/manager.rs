use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{TaskResult, TaskStatus};
use crate::config::UploadConfig;
use crate::poller::{PollOutcome, poll_task};
use crate::progress::ProgressSink;
use crate::session::{AttemptState, UploadAttempt, UploadOutcome, run_upload};
use crate::transport::Transport;
use crate::{Error, Result};

/// What `submit` resolves to. `Partial` still carries a payload: the task
/// produced output and an error and both belong to the caller. `Superseded`
/// means a newer submission replaced this one; it is not a failure.
#[derive(Debug)]
pub enum Outcome {
    Success { result: TaskResult },
    Partial { result: TaskResult },
    Superseded,
}

#[derive(Default)]
pub struct SubmitOptions<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a dyn ProgressSink>,
}

struct ActiveAttempt {
    client_id: uuid::Uuid,
    cancel: CancellationToken,
}

/// Process-wide owner of "the current attempt". At most one attempt is
/// non-terminal at any time: `submit` installs a fresh attempt identity and
/// cancels whatever held the slot before, and every continuation of the old
/// attempt checks its token before touching anything, so the superseded flow
/// unwinds silently instead of racing the new one.
pub struct SessionManager<T: Transport> {
    transport: T,
    config: UploadConfig,
    active: Mutex<Option<ActiveAttempt>>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, config: UploadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            active: Mutex::new(None),
        })
    }

    pub async fn submit(&self, text: &str, auth_token: &str) -> Result<Outcome> {
        self.submit_with(text, auth_token, SubmitOptions::default())
            .await
    }

    /// Uploads `text` in chunks and waits for the processing task's terminal
    /// status. Validation failures return before any network request; a
    /// concurrent `submit`, `cancel_active`, or the token in `options`
    /// makes this call resolve `Ok(Outcome::Superseded)`.
    pub async fn submit_with(
        &self,
        text: &str,
        auth_token: &str,
        options: SubmitOptions<'_>,
    ) -> Result<Outcome> {
        if text.is_empty() {
            return Err(Error::Validation {
                message: "text must not be empty".to_string(),
            });
        }
        if auth_token.trim().is_empty() {
            return Err(Error::Validation {
                message: "auth token is required".to_string(),
            });
        }

        let mut attempt = UploadAttempt::new(text.len() as u64, self.config.chunk_size_bytes);
        let client_id = attempt.client_id;
        // The attempt token is a child of the caller's token when one is
        // given, so either a supersede or the caller can stop this attempt.
        let cancel = match options.cancel {
            Some(external) => external.child_token(),
            None => CancellationToken::new(),
        };

        let prior = {
            let mut slot = self.active.lock().expect("active attempt mutex poisoned");
            slot.replace(ActiveAttempt {
                client_id,
                cancel: cancel.clone(),
            })
        };
        if let Some(prior) = prior {
            prior.cancel.cancel();
            debug!(
                event = "attempt.superseded",
                superseded_client_id = %prior.client_id,
                client_id = %client_id,
                "attempt.superseded"
            );
        }

        let outcome = self
            .drive(&mut attempt, text.as_bytes(), auth_token, &cancel, options)
            .await;

        {
            let mut slot = self.active.lock().expect("active attempt mutex poisoned");
            if slot.as_ref().is_some_and(|a| a.client_id == client_id) {
                *slot = None;
            }
        }

        // An error that raced a supersede is discarded: superseding is
        // never surfaced as a failure.
        let outcome = match outcome {
            Err(discarded) if cancel.is_cancelled() => {
                debug!(
                    event = "attempt.superseded",
                    client_id = %client_id,
                    discarded = %discarded,
                    "attempt.superseded"
                );
                attempt.state = AttemptState::Superseded;
                Ok(Outcome::Superseded)
            }
            other => other,
        };
        if outcome.is_err() {
            attempt.state = AttemptState::Failed;
        }
        debug!(
            event = "attempt.finished",
            client_id = %client_id,
            state = ?attempt.state,
            "attempt.finished"
        );
        outcome
    }

    async fn drive(
        &self,
        attempt: &mut UploadAttempt,
        bytes: &[u8],
        auth_token: &str,
        cancel: &CancellationToken,
        options: SubmitOptions<'_>,
    ) -> Result<Outcome> {
        let accepted = run_upload(
            &self.transport,
            attempt,
            bytes,
            auth_token,
            &self.config.filename,
            cancel,
            options.progress,
        )
        .await?;
        let task_id = match accepted {
            UploadOutcome::Accepted { task_id, .. } => task_id,
            UploadOutcome::Superseded => return Ok(Outcome::Superseded),
        };

        attempt.state = AttemptState::Polling;
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        match poll_task(
            &self.transport,
            &task_id,
            interval,
            cancel,
            options.progress,
        )
        .await?
        {
            PollOutcome::Superseded => {
                attempt.state = AttemptState::Superseded;
                Ok(Outcome::Superseded)
            }
            PollOutcome::Finished(result) => {
                if result.status == TaskStatus::PartialFailure {
                    attempt.state = AttemptState::PartiallyFailed;
                    Ok(Outcome::Partial { result })
                } else {
                    attempt.state = AttemptState::Succeeded;
                    Ok(Outcome::Success { result })
                }
            }
        }
    }

    /// Cancels the current attempt, if any. Its `submit` call resolves
    /// `Ok(Outcome::Superseded)` once the in-flight request settles.
    pub fn cancel_active(&self) {
        let active = {
            self.active
                .lock()
                .expect("active attempt mutex poisoned")
                .take()
        };
        if let Some(active) = active {
            active.cancel.cancel();
            debug!(
                event = "attempt.cancelled",
                client_id = %active.client_id,
                "attempt.cancelled"
            );
        }
    }

    pub fn has_active(&self) -> bool {
        self.active
            .lock()
            .expect("active attempt mutex poisoned")
            .is_some()
    }
}
