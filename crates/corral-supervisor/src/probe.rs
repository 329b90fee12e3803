//! In-container liveness probe with exec-session reuse.
//!
//! A probe runs the declared check command inside a running container. A
//! slow or hung command can outlive the probe's read deadline; the next
//! probe then finds the previous session still running and attaches to it
//! instead of creating a new one, so exec sessions never accumulate inside
//! long-running containers.

use corral_engine::{Engine, EngineError};
use std::time::Duration;
use thiserror::Error;
use tokio::io;
use tokio::time::timeout;

/// Why a probe pass failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// An engine call failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The check command did not finish within its read deadline.
    #[error("check command timed out")]
    TimedOut,

    /// The check command finished with a non-zero exit code.
    #[error("check command exited with code: {0}")]
    ExitCode(i64),
}

/// Runs one probe pass against `name`.
///
/// Returns the session id to carry into the next pass (empty when the
/// session completed successfully) and the pass outcome. A previous
/// session that is still running is reused; its id is kept either way so a
/// future pass can observe it again.
pub async fn probe(
    engine: &dyn Engine,
    name: &str,
    cmd: &[String],
    deadline: Duration,
    previous: Option<String>,
) -> (Option<String>, std::result::Result<(), ProbeError>) {
    if let Some(prev) = previous {
        if is_running(engine, &prev).await {
            let result = attach_and_wait(engine, &prev, deadline).await;
            return (Some(prev), result);
        }
    }

    let exec_id = match engine.exec_create(name, cmd).await {
        Ok(id) => id,
        Err(e) => return (None, Err(ProbeError::Engine(e))),
    };
    match attach_and_wait(engine, &exec_id, deadline).await {
        Ok(()) => (None, Ok(())),
        Err(e) => (Some(exec_id), Err(e)),
    }
}

async fn is_running(engine: &dyn Engine, exec_id: &str) -> bool {
    engine
        .exec_inspect(exec_id)
        .await
        .map(|inspect| inspect.running)
        .unwrap_or(false)
}

/// Attaches to a session, drains its output under `deadline`, then checks
/// the exit code.
async fn attach_and_wait(
    engine: &dyn Engine,
    exec_id: &str,
    deadline: Duration,
) -> std::result::Result<(), ProbeError> {
    let mut stream = engine.exec_attach(exec_id).await?;
    // The stream stays open until the check command exits; a hung command
    // must not wedge the reconciler, so the drain carries a read deadline.
    match timeout(deadline, io::copy(&mut stream, &mut io::sink())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(ProbeError::Engine(EngineError::from(e))),
        Err(_) => return Err(ProbeError::TimedOut),
    }
    // Inspect runs without the deadline: the exit code must be retrievable
    // even when the drain used the whole budget.
    let inspect = engine.exec_inspect(exec_id).await?;
    let exit_code = inspect.exit_code.unwrap_or(0);
    if exit_code != 0 {
        return Err(ProbeError::ExitCode(exit_code));
    }
    Ok(())
}
