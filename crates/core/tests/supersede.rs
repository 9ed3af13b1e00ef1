use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use bluelift_core::{
    ChunkBody, Error, InitiateBody, InitiateRequest, Outcome, Reply, Result, ResultBody,
    SessionManager, StatusBody, SubmitOptions, Transport, UploadConfig,
};

#[derive(Default)]
struct FakeState {
    events: Vec<String>,
}

/// Which request of the first attempt parks on the `Notify` gate.
#[derive(Clone, Copy, PartialEq, Eq)]
enum GatePoint {
    None,
    Initiate,
    Chunk,
    Status,
}

/// Issues `upload-N`/`task-N` per initiation and records every request as an
/// event string. The gated request of the first attempt parks on a `Notify`
/// so a test can hold that attempt mid-flight; with `fail_gated` it settles
/// with a transport error once released.
struct GateFake {
    state: Arc<Mutex<FakeState>>,
    gate: Arc<Notify>,
    gate_point: GatePoint,
    gate_armed: AtomicBool,
    fail_gated: bool,
}

impl GateFake {
    fn build(
        gate_point: GatePoint,
        fail_gated: bool,
    ) -> (Self, Arc<Mutex<FakeState>>, Arc<Notify>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let gate = Arc::new(Notify::new());
        (
            Self {
                state: state.clone(),
                gate: gate.clone(),
                gate_point,
                gate_armed: AtomicBool::new(gate_point != GatePoint::None),
                fail_gated,
            },
            state,
            gate,
        )
    }

    fn free() -> (Self, Arc<Mutex<FakeState>>) {
        let (fake, state, _gate) = Self::build(GatePoint::None, false);
        (fake, state)
    }

    fn gated() -> (Self, Arc<Mutex<FakeState>>, Arc<Notify>) {
        Self::build(GatePoint::Chunk, false)
    }

    fn gated_failing(point: GatePoint) -> (Self, Arc<Mutex<FakeState>>, Arc<Notify>) {
        Self::build(point, true)
    }

    async fn hold_gate(&self) -> Result<()> {
        self.gate.notified().await;
        if self.fail_gated {
            return Err(Error::Transport {
                message: "connection reset by peer".to_string(),
            });
        }
        Ok(())
    }
}

impl Transport for GateFake {
    fn initiate<'a>(
        &'a self,
        _request: InitiateRequest,
        _auth_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<InitiateBody>>> + Send + 'a>> {
        Box::pin(async move {
            let n = {
                let mut state = self.state.lock().unwrap();
                let n = state
                    .events
                    .iter()
                    .filter(|e| e.starts_with("initiate:"))
                    .count()
                    + 1;
                state.events.push(format!("initiate:upload-{n}"));
                n
            };
            if n == 1
                && self.gate_point == GatePoint::Initiate
                && self.gate_armed.swap(false, Ordering::SeqCst)
            {
                self.hold_gate().await?;
            }
            Ok(Reply {
                ok: true,
                body: InitiateBody {
                    status: "success".to_string(),
                    upload_id: Some(format!("upload-{n}")),
                    task_id: Some(format!("task-{n}")),
                    message: None,
                },
            })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        server_id: &'a str,
        chunk_index: u32,
        _bytes: Vec<u8>,
        _auth_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<ChunkBody>>> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock().unwrap();
                state.events.push(format!("chunk:{server_id}:{chunk_index}"));
            }
            if server_id == "upload-1"
                && chunk_index == 0
                && self.gate_point == GatePoint::Chunk
                && self.gate_armed.swap(false, Ordering::SeqCst)
            {
                self.hold_gate().await?;
            }
            Ok(Reply {
                ok: true,
                body: ChunkBody {
                    status: "success".to_string(),
                    message: None,
                    task_id: None,
                },
            })
        })
    }

    fn get_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Reply<StatusBody>>> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock().unwrap();
                state.events.push(format!("status:{task_id}"));
            }
            if task_id == "task-1"
                && self.gate_point == GatePoint::Status
                && self.gate_armed.swap(false, Ordering::SeqCst)
            {
                self.hold_gate().await?;
            }
            Ok(Reply {
                ok: true,
                body: StatusBody {
                    task_id: Some(task_id.to_string()),
                    status: "SUCCESS".to_string(),
                    result: Some(ResultBody {
                        output: Some(format!("<p>done {task_id}</p>")),
                        stats_summary: None,
                        ai_output: None,
                        error: None,
                    }),
                    error: None,
                    message: None,
                },
            })
        })
    }
}

fn config() -> UploadConfig {
    UploadConfig {
        chunk_size_bytes: 8,
        poll_interval_ms: 5,
        ..UploadConfig::default()
    }
}

async fn wait_for_event(state: &Arc<Mutex<FakeState>>, event: &str) {
    for _ in 0..500 {
        if state.lock().unwrap().events.iter().any(|e| e == event) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("event {event:?} not observed in time");
}

#[tokio::test]
async fn second_submit_supersedes_first() {
    let (fake, state, gate) = GateFake::gated();
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());

    // Two chunks, so the first attempt still has work left when it is parked.
    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.submit("abcdefghijklmnop", "token").await }
    });
    wait_for_event(&state, "chunk:upload-1:0").await;
    assert!(manager.has_active());

    let outcome = manager.submit("hi", "token").await.unwrap();
    match outcome {
        Outcome::Success { result } => {
            assert_eq!(result.output.as_deref(), Some("<p>done task-2</p>"));
        }
        other => panic!("expected success for the second submit, got {other:?}"),
    }

    gate.notify_one();
    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, Outcome::Superseded));

    let state = state.lock().unwrap();
    // The superseded attempt stops silently: its pending chunk reply is
    // discarded, no follow-up chunk is sent and its task is never polled.
    assert!(!state.events.iter().any(|e| e == "chunk:upload-1:1"));
    assert!(!state.events.iter().any(|e| e == "status:task-1"));
    assert!(state.events.iter().any(|e| e == "status:task-2"));
    assert!(!manager.has_active());
}

#[tokio::test]
async fn cancel_active_resolves_superseded() {
    let (fake, state, gate) = GateFake::gated();
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.submit("abcdefghijklmnop", "token").await }
    });
    wait_for_event(&state, "chunk:upload-1:0").await;

    manager.cancel_active();
    assert!(!manager.has_active());

    // Cancelling twice is a no-op.
    manager.cancel_active();

    gate.notify_one();
    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, Outcome::Superseded));

    let state = state.lock().unwrap();
    assert!(!state.events.iter().any(|e| e == "chunk:upload-1:1"));
    assert!(!state.events.iter().any(|e| e.starts_with("status:")));
}

#[tokio::test]
async fn caller_token_cancels_attempt() {
    let (fake, state, gate) = GateFake::gated();
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());
    let external = CancellationToken::new();

    let first = tokio::spawn({
        let manager = manager.clone();
        let external = external.clone();
        async move {
            manager
                .submit_with(
                    "abcdefghijklmnop",
                    "token",
                    SubmitOptions {
                        cancel: Some(&external),
                        progress: None,
                    },
                )
                .await
        }
    });
    wait_for_event(&state, "chunk:upload-1:0").await;

    external.cancel();
    gate.notify_one();
    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, Outcome::Superseded));

    let state = state.lock().unwrap();
    assert!(!state.events.iter().any(|e| e == "chunk:upload-1:1"));
    assert!(!state.events.iter().any(|e| e.starts_with("status:")));
    assert!(!manager.has_active());
}

#[tokio::test]
async fn initiate_error_after_cancel_resolves_superseded() {
    let (fake, state, gate) = GateFake::gated_failing(GatePoint::Initiate);
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.submit("hi", "token").await }
    });
    wait_for_event(&state, "initiate:upload-1").await;

    manager.cancel_active();
    gate.notify_one();

    // The parked initiate settles with a transport error, but the attempt is
    // already superseded: the error is discarded with the reply.
    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, Outcome::Superseded));

    let state = state.lock().unwrap();
    assert_eq!(state.events, ["initiate:upload-1"]);
    assert!(!manager.has_active());
}

#[tokio::test]
async fn chunk_error_after_supersede_resolves_superseded() {
    let (fake, state, gate) = GateFake::gated_failing(GatePoint::Chunk);
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.submit("abcdefghijklmnop", "token").await }
    });
    wait_for_event(&state, "chunk:upload-1:0").await;

    let outcome = manager.submit("hi", "token").await.unwrap();
    assert!(matches!(outcome, Outcome::Success { .. }));

    // Release the parked chunk so it settles with a transport error; the
    // superseded attempt discards it instead of surfacing it.
    gate.notify_one();
    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, Outcome::Superseded));

    let state = state.lock().unwrap();
    assert!(!state.events.iter().any(|e| e == "chunk:upload-1:1"));
    assert!(!state.events.iter().any(|e| e == "status:task-1"));
    assert!(!manager.has_active());
}

#[tokio::test]
async fn status_error_after_cancel_resolves_superseded() {
    let (fake, state, gate) = GateFake::gated_failing(GatePoint::Status);
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.submit("hi", "token").await }
    });
    wait_for_event(&state, "status:task-1").await;

    manager.cancel_active();
    gate.notify_one();

    let first_outcome = first.await.unwrap().unwrap();
    assert!(matches!(first_outcome, Outcome::Superseded));

    let state = state.lock().unwrap();
    let polls = state
        .events
        .iter()
        .filter(|e| e.starts_with("status:"))
        .count();
    assert_eq!(polls, 1, "no further poll after the discarded error");
    assert!(!manager.has_active());
}

#[tokio::test]
async fn validation_rejects_before_any_network() {
    let (fake, state) = GateFake::free();
    let manager = SessionManager::new(fake, config()).unwrap();

    let err = manager.submit("", "token").await.unwrap_err();
    match err {
        Error::Validation { message } => assert_eq!(message, "text must not be empty"),
        other => panic!("expected validation error, got {other:?}"),
    }

    let err = manager.submit("hello", "   ").await.unwrap_err();
    match err {
        Error::Validation { message } => assert_eq!(message, "auth token is required"),
        other => panic!("expected validation error, got {other:?}"),
    }

    assert!(state.lock().unwrap().events.is_empty());
    assert!(!manager.has_active());
}

#[tokio::test]
async fn validation_failure_leaves_active_attempt_running() {
    let (fake, state, gate) = GateFake::gated();
    let manager = Arc::new(SessionManager::new(fake, config()).unwrap());

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.submit("abcdefghijklmnop", "token").await }
    });
    wait_for_event(&state, "chunk:upload-1:0").await;

    let err = manager.submit("", "token").await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert!(manager.has_active(), "rejected input must not displace the attempt");

    gate.notify_one();
    let first_outcome = first.await.unwrap().unwrap();
    match first_outcome {
        Outcome::Success { result } => {
            assert_eq!(result.output.as_deref(), Some("<p>done task-1</p>"));
        }
        other => panic!("expected the first attempt to finish, got {other:?}"),
    }
    assert!(!manager.has_active());
}

#[tokio::test]
async fn sequential_submits_reuse_manager() {
    let (fake, state) = GateFake::free();
    let manager = SessionManager::new(fake, config()).unwrap();

    let outcome = manager.submit("one", "token").await.unwrap();
    assert!(matches!(outcome, Outcome::Success { .. }));
    assert!(!manager.has_active());

    let outcome = manager.submit("two", "token").await.unwrap();
    match outcome {
        Outcome::Success { result } => {
            assert_eq!(result.output.as_deref(), Some("<p>done task-2</p>"));
        }
        other => panic!("expected success, got {other:?}"),
    }

    let state = state.lock().unwrap();
    assert_eq!(
        state
            .events
            .iter()
            .filter(|e| e.starts_with("initiate:"))
            .count(),
        2
    );
    assert!(!manager.has_active());
}
