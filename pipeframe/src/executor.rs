//! Runs a fixed set of named workers in parallel on independent OS
//! threads, captures the first failure, and exposes liveness for
//! diagnostics. Grounded on `extract::models::worker_wait`'s dedicated
//! reaping thread and `extract::process::process_child`'s
//! capture-then-forward error shape, generalized from "one thread" to
//! "a set of named threads with a shared result".

use {
    crate::error::{Error, Result},
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        thread::{self, JoinHandle},
    },
    tracing::{instrument, trace, warn},
};

/// Cooperative cancellation flag handed to every worker. Workers that
/// block (socket accept, stream reads) are expected to poll this at
/// their natural wakeup points.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A worker is a named, single-shot unit of work run on its own thread.
/// It reports failure by returning `Err`; success carries no value,
/// matching spec.md §3 ("Workers do not return values").
pub type WorkerFn = Box<dyn FnOnce(CancelToken) -> Result<()> + Send + 'static>;

struct Slot {
    name: String,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct Executor {
    running: Mutex<Vec<Slot>>,
    first_error: Mutex<Option<Error>>,
    cancel: CancelToken,
    stopped: AtomicBool,
}

impl Executor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts `worker` on a fresh OS thread labelled `name`. Non-blocking.
    /// May be called multiple times, including after other workers have
    /// finished. A no-op once `stop()` has been called.
    #[instrument(skip(self, worker, name), fields(worker = %name.as_ref()))]
    pub fn execute<S>(self: &Arc<Self>, name: S, worker: WorkerFn)
    where
        S: AsRef<str>,
    {
        if self.stopped.load(Ordering::Acquire) {
            trace!("executor stopped, refusing to start worker");
            return;
        }

        let name = name.as_ref().to_string();
        let cancel = self.cancel.clone();
        let this = Arc::clone(self);
        let run_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let outcome = worker(cancel);
                this.finish(&run_name, outcome);
            })
            .expect("failed to spawn executor worker thread");

        self.running.lock().unwrap().push(Slot {
            name,
            handle: Some(handle),
        });
    }

    fn finish(&self, name: &str, outcome: Result<()>) {
        match outcome {
            Ok(()) => trace!(worker = name, "worker finished"),
            Err(e) => {
                let mut slot = self.first_error.lock().unwrap();
                if slot.is_some() {
                    warn!(worker = name, "worker failed after an earlier failure was already captured; dropping");
                } else {
                    warn!(worker = name, "worker failed");
                    *slot = Some(e);
                }
            }
        }
    }

    /// True if any worker has captured a failure so far.
    pub fn has_exception(&self) -> bool {
        self.first_error.lock().unwrap().is_some()
    }

    /// Takes the first exception captured from any worker, if any,
    /// leaving none behind. After the executor has quiesced this is the
    /// final error state; intended to be called exactly once per
    /// `execute()` run.
    pub fn take_exception(&self) -> Option<Error> {
        self.first_error.lock().unwrap().take()
    }

    /// True while at least one started worker has not yet terminated.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap()
            .iter()
            .any(|slot| slot.handle.as_ref().map_or(false, |h| !h.is_finished()))
    }

    /// Diagnostic snapshot of currently-running worker names.
    pub fn running_thread_names(&self) -> Vec<String> {
        self.running
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.handle.as_ref().map_or(false, |h| !h.is_finished()))
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// Signals cancellation to all workers. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Blocks until every started worker has terminated or `timeout`
    /// elapses, whichever comes first. Returns `true` if all workers
    /// quiesced before the timeout.
    pub fn join_with_timeout(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let all_done = {
                let mut slots = self.running.lock().unwrap();
                slots.retain_mut(|slot| match &slot.handle {
                    Some(h) if h.is_finished() => {
                        if let Some(h) = slot.handle.take() {
                            let _ = h.join();
                        }
                        false
                    }
                    _ => true,
                });
                slots.is_empty()
            };
            if all_done {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_error_wins() {
        let exec = Executor::new();
        exec.execute(
            "a",
            Box::new(|_| {
                thread::sleep(Duration::from_millis(20));
                Err(crate::error::Err::NoResult.into())
            }),
        );
        exec.execute(
            "b",
            Box::new(|_| {
                thread::sleep(Duration::from_millis(60));
                Err(crate::error::Err::Interrupted.into())
            }),
        );
        exec.join_with_timeout(Duration::from_secs(1));
        assert!(matches!(
            exec.take_exception().unwrap().kind(),
            crate::error::Err::NoResult
        ));
    }

    #[test]
    fn stop_prevents_new_workers() {
        let exec = Executor::new();
        exec.stop();
        exec.execute("never", Box::new(|_| Ok(())));
        assert!(exec.running_thread_names().is_empty());
        assert!(exec.join_with_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn cancel_token_observed() {
        let exec = Executor::new();
        exec.execute(
            "loop",
            Box::new(|cancel| {
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }),
        );
        thread::sleep(Duration::from_millis(20));
        exec.stop();
        assert!(exec.join_with_timeout(Duration::from_secs(1)));
    }
}
