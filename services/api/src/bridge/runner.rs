//! Runs an engine's blocking turn loop on a dedicated worker thread.

use super::{
    hooks::SessionHooks,
    inbox::{Inbound, Inbox},
};
use crate::ws::protocol::ServerMessage;
use crossbeam_channel::{RecvTimeoutError, bounded};
use parking_lot::Mutex;
use parley_core::engine::{AgentEngine, EngineOutcome};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TurnLoopError {
    #[error("the turn loop is already running")]
    AlreadyRunning,
    #[error("failed to spawn turn-loop thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Joined,
    /// The thread did not finish within the join timeout and was left
    /// to end on its own.
    Abandoned,
}

struct Worker {
    handle: thread::JoinHandle<()>,
    done: crossbeam_channel::Receiver<()>,
}

pub struct TurnLoop {
    session_id: Uuid,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl TurnLoop {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts `engine` on a new worker thread. At most one turn loop runs
    /// per session.
    pub fn start(
        &self,
        mut engine: Box<dyn AgentEngine>,
        hooks: Arc<SessionHooks>,
    ) -> Result<(), TurnLoopError> {
        let mut worker = self.worker.lock();
        if self.is_running() {
            return Err(TurnLoopError::AlreadyRunning);
        }
        if let Some(previous) = worker.take() {
            // Already finished, so this does not block.
            let _ = previous.handle.join();
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let session_id = self.session_id;
        let (done_tx, done_rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name(format!("turn-loop-{}", &session_id.simple().to_string()[..8]))
            .spawn(move || {
                run_engine(session_id, engine.as_mut(), &hooks);
                running.store(false, Ordering::SeqCst);
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Releases the turn loop through the inbox sentinel and waits up to
    /// `join_timeout` for its thread to finish.
    pub async fn stop(&self, inbox: &Inbox, join_timeout: Duration) -> StopOutcome {
        let Some(worker) = self.worker.lock().take() else {
            return StopOutcome::NotRunning;
        };
        if self.is_running() {
            inbox.push(Inbound::Shutdown);
        }

        let session_id = self.session_id;
        let joined = tokio::task::spawn_blocking(move || {
            match worker.done.recv_timeout(join_timeout) {
                Err(RecvTimeoutError::Timeout) => false,
                _ => {
                    let _ = worker.handle.join();
                    true
                }
            }
        })
        .await;

        match joined {
            Ok(true) => {
                info!(%session_id, "Turn loop stopped");
                StopOutcome::Joined
            }
            Ok(false) => {
                warn!(
                    %session_id,
                    timeout_secs = join_timeout.as_secs_f32(),
                    "Turn loop did not stop in time; abandoning its thread"
                );
                StopOutcome::Abandoned
            }
            Err(e) => {
                error!(%session_id, error = ?e, "Failed to join turn-loop thread");
                StopOutcome::Abandoned
            }
        }
    }
}

fn run_engine(session_id: Uuid, engine: &mut dyn AgentEngine, hooks: &SessionHooks) {
    info!(%session_id, "Turn loop started");
    match panic::catch_unwind(AssertUnwindSafe(|| engine.run(hooks))) {
        Ok(Ok(EngineOutcome::Terminated)) => info!(%session_id, "Turn loop terminated"),
        Ok(Ok(EngineOutcome::Completed(reason))) => {
            info!(%session_id, %reason, "Engine finished the conversation")
        }
        Ok(Err(e)) => {
            error!(%session_id, error = ?e, "Engine failed");
            hooks.post(ServerMessage::error(format!(
                "The assistant stopped unexpectedly: {e}"
            )));
        }
        Err(payload) => {
            error!(%session_id, panic = panic_message(payload.as_ref()), "Engine panicked");
            hooks.post(ServerMessage::error("The assistant stopped unexpectedly."));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
