//! Execution unit: one OS thread, one single-threaded tokio runtime, one job
//! at a time.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::core::executor::UnitExecutor;
use crate::util::panic_message;

use super::{Inbox, PoolError, UnitCommand, UnitEvent, UnitEventKind};

/// Supervisor-side handle to a running unit.
pub(crate) struct UnitHandle {
    /// Inbound command channel. Dropping it asks the unit to exit.
    pub commands: Sender<UnitCommand>,
    /// Thread handle, joined or detached on shutdown.
    pub thread: JoinHandle<()>,
}

/// Spawn a unit thread for `worker_id` at `generation`.
///
/// The unit reports every outcome into `events`. A panic inside the executor
/// is reported as [`UnitEventKind::UnitExited`] and ends the thread.
pub(crate) fn spawn_unit<R, E>(
    worker_id: usize,
    generation: u64,
    executor: E,
    events: Sender<Inbox<R>>,
    stack_size: usize,
) -> Result<UnitHandle, PoolError>
where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    let (commands, inbound) = unbounded::<UnitCommand>();

    let thread = thread::Builder::new()
        .name(format!("tc-unit-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || unit_loop(worker_id, generation, &executor, &inbound, &events))
        .map_err(|e| PoolError::Spawn {
            worker_id,
            message: e.to_string(),
        })?;

    Ok(UnitHandle { commands, thread })
}

/// Send a ping and wait for the pong.
///
/// # Errors
///
/// `PoolError::InitTimeout` if no answer arrives within `timeout`, and
/// `PoolError::Spawn` if the unit exited before answering.
pub(crate) fn probe(
    handle: &UnitHandle,
    worker_id: usize,
    timeout: Duration,
) -> Result<(), PoolError> {
    let (reply, pong) = bounded(1);
    let exited = || PoolError::Spawn {
        worker_id,
        message: "unit exited before answering the liveness probe".to_string(),
    };

    handle
        .commands
        .send(UnitCommand::Ping { reply })
        .map_err(|_| exited())?;

    match pong.recv_timeout(timeout) {
        Ok(_) => Ok(()),
        Err(RecvTimeoutError::Timeout) => Err(PoolError::InitTimeout { worker_id, timeout }),
        Err(RecvTimeoutError::Disconnected) => Err(exited()),
    }
}

fn unit_loop<R, E>(
    worker_id: usize,
    generation: u64,
    executor: &E,
    inbound: &Receiver<UnitCommand>,
    events: &Sender<Inbox<R>>,
) where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    let report = |kind: UnitEventKind<R>| {
        events
            .send(Inbox::Unit(UnitEvent {
                worker_id,
                generation,
                kind,
            }))
            .is_ok()
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id, error = %e, "failed to create unit runtime");
            report(UnitEventKind::UnitExited {
                reason: format!("runtime build failed: {e}"),
            });
            return;
        }
    };

    debug!(worker_id, generation, "unit started");

    // Blocks until a command arrives; exits when the supervisor drops the sender.
    while let Ok(command) = inbound.recv() {
        match command {
            UnitCommand::Ping { reply } => {
                let _ = reply.send(worker_id);
            }
            UnitCommand::Run(job) => {
                let job_id = job.id;
                debug!(worker_id, job_id, identifier = %job.identifier, "unit running job");

                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(executor.execute(&job))));

                let kind = match outcome {
                    Ok(Ok(record)) => UnitEventKind::JobComplete { job_id, record },
                    Ok(Err(err)) => UnitEventKind::JobError {
                        job_id,
                        error: err.to_string(),
                    },
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        warn!(worker_id, job_id, reason = %reason, "unit terminated abnormally");
                        report(UnitEventKind::UnitExited { reason });
                        return;
                    }
                };

                if !report(kind) {
                    break;
                }
            }
        }
    }

    debug!(worker_id, generation, "unit exiting");
}
