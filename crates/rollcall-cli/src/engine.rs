use rollcall_core::{
    ActionKind, AttendanceEngine, AttendanceLedger, EngineError, Enrollment, IdentityStore, Verification,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::replay::Replay;
use crate::report::ConsoleProgress;

#[derive(Error, Debug)]
pub enum HandleError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the command loop to the engine thread.
enum EngineRequest {
    Verify {
        action: ActionKind,
        reply: oneshot::Sender<Result<Verification, EngineError>>,
    },
    Enroll {
        name: String,
        overwrite: bool,
        reply: oneshot::Sender<Result<Enrollment, EngineError>>,
    },
    IsEnrolled {
        name: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    abort: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Run one verification attempt and log it.
    pub async fn verify(&self, action: ActionKind) -> Result<Verification, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Verify { action, reply }).await?;
        Ok(rx.await.map_err(|_| HandleError::ChannelClosed)??)
    }

    /// Enroll `name`. Clears any earlier abort before the request is queued.
    pub async fn enroll(&self, name: String, overwrite: bool) -> Result<Enrollment, HandleError> {
        self.abort.store(false, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll { name, overwrite, reply }).await?;
        Ok(rx.await.map_err(|_| HandleError::ChannelClosed)??)
    }

    pub async fn is_enrolled(&self, name: &str) -> Result<bool, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::IsEnrolled {
            name: name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HandleError::ChannelClosed)
    }

    /// Stop an enrollment in progress. No effect on verification.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    async fn send(&self, request: EngineRequest) -> Result<(), HandleError> {
        self.tx.send(request).await.map_err(|_| HandleError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are served one at a time, so attempts never overlap. The
/// thread exits once every handle has been dropped.
pub fn spawn_engine<S, L>(mut engine: AttendanceEngine<S, L>, mut replay: Replay) -> std::io::Result<EngineHandle>
where
    S: IdentityStore + Send + 'static,
    L: AttendanceLedger + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let abort = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abort);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(identities = engine.identities().len(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify { action, reply } => {
                        let result = engine.verify(replay.sensors(), action, &mut ConsoleProgress::default());
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { name, overwrite, reply } => {
                        let result =
                            engine.enroll(replay.sensors(), &name, overwrite, &flag, &mut ConsoleProgress::default());
                        let _ = reply.send(result);
                    }
                    EngineRequest::IsEnrolled { name, reply } => {
                        let _ = reply.send(engine.identities().contains(name.trim()));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, abort })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::RecordedSession;
    use rollcall_core::decision::Status;
    use rollcall_core::EngineConfig;
    use rollcall_store::{SqliteIdentityStore, SqliteLedger};

    fn session(embedding: [f32; 2], liveness: f32) -> Replay {
        let json = format!(
            r#"{{ "repeat": true, "frames": [ {{ "faces": [ {{
                "bbox": {{"x": 10, "y": 10, "width": 80, "height": 80}},
                "embedding": [{}, {}], "liveness": {liveness} }} ] }} ] }}"#,
            embedding[0], embedding[1]
        );
        let session: RecordedSession = serde_json::from_str(&json).unwrap();
        Replay::new(session)
    }

    fn engine() -> AttendanceEngine<SqliteIdentityStore, SqliteLedger> {
        AttendanceEngine::new(
            EngineConfig::default(),
            SqliteIdentityStore::open_in_memory().unwrap(),
            SqliteLedger::open_in_memory().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_punch_through_handle() {
        let handle = spawn_engine(engine(), session([0.6, 0.8], 0.9)).unwrap();

        assert!(!handle.is_enrolled("dana").await.unwrap());
        let enrolled = handle.enroll("dana".into(), false).await.unwrap();
        assert_eq!(enrolled.samples, 20);
        assert!(handle.is_enrolled(" dana ").await.unwrap());

        let v = handle.verify(ActionKind::In).await.unwrap();
        assert_eq!(v.decision.status, Status::Accepted);
        assert_eq!(v.decision.identity.as_deref(), Some("dana"));

        let again = handle.enroll("dana".into(), false).await.unwrap_err();
        assert!(matches!(again, HandleError::Engine(EngineError::AlreadyEnrolled(_))));
    }

    #[tokio::test]
    async fn test_abort_stops_enrollment() {
        // Liveness below the enrollment minimum: no sample is ever accepted.
        let handle = spawn_engine(engine(), session([1.0, 0.0], 0.5)).unwrap();
        let pending = handle.enroll("erin".into(), false);
        let aborter = handle.clone();
        let (result, ()) = tokio::join!(pending, async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            aborter.abort();
        });
        match result {
            Err(HandleError::Engine(EngineError::Collect(_))) => {}
            other => panic!("expected aborted or timed-out collection, got {other:?}"),
        }
        assert!(!handle.is_enrolled("erin").await.unwrap());
    }
}
