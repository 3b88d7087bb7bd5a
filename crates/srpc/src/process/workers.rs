//! Echo workers serving the daemon's service.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::{Rpc, ServiceHandle};
use crate::errors::{DispatchFailure, RpcError};
use crate::health::HealthReporter;
use crate::wire::MAX_PAYLOAD_SIZE;

use super::PROCESS_TARGET;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Threads answering every query with its own payload.
#[derive(Debug)]
pub struct EchoWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl EchoWorkers {
    /// Starts `count` workers on `service`.
    ///
    /// # Errors
    ///
    /// Fails when a thread cannot be spawned; workers already started keep
    /// running until the service is withdrawn.
    pub fn spawn(
        engine: &Arc<Rpc>,
        service: ServiceHandle,
        count: usize,
        reporter: &Arc<dyn HealthReporter>,
    ) -> io::Result<Self> {
        let handles = (0..count)
            .map(|worker| {
                let engine = Arc::clone(engine);
                let reporter = Arc::clone(reporter);
                thread::Builder::new()
                    .name(format!("srpc-worker-{worker}"))
                    .spawn(move || serve(&engine, service, worker, reporter.as_ref()))
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { handles })
    }

    /// Number of running workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no worker was started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits up to `budget` for every worker to stop.
    ///
    /// Workers still running at the deadline are detached and counted as
    /// lingering.
    pub fn join_within(self, budget: Duration) -> WorkerExit {
        let deadline = Instant::now() + budget;
        let running = |handles: &[JoinHandle<()>]| handles.iter().any(|h| !h.is_finished());
        while running(&self.handles) && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }
        let (finished, lingering): (Vec<_>, Vec<_>) =
            self.handles.into_iter().partition(JoinHandle::is_finished);
        WorkerExit {
            panicked: finished
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count(),
            lingering: lingering.len(),
        }
    }
}

/// How the workers ended when the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Workers that stopped by panicking.
    pub panicked: usize,
    /// Workers still running when the shutdown budget ran out.
    pub lingering: usize,
}

fn serve(engine: &Rpc, service: ServiceHandle, worker: usize, reporter: &dyn HealthReporter) {
    let mut buffer = vec![0_u8; MAX_PAYLOAD_SIZE];
    loop {
        let (endpoint, len) = match engine.query(service, &mut buffer) {
            Ok(found) => found,
            Err(RpcError::Dispatch(DispatchFailure::Withdrawn)) => break,
            Err(RpcError::Dispatch(DispatchFailure::Reset)) => continue,
            Err(error) => {
                reporter.worker_failed(worker, &error);
                break;
            }
        };
        match engine.response(service, &endpoint, &buffer, len) {
            Ok(()) => {}
            Err(RpcError::Dispatch(DispatchFailure::Withdrawn)) => break,
            Err(error) => debug!(
                target: PROCESS_TARGET,
                worker,
                peer = %endpoint.peer(),
                error = %error,
                "response not delivered"
            ),
        }
    }
    debug!(target: PROCESS_TARGET, worker, "worker stopped");
}
