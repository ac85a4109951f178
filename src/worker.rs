//! C7: a fixed pool of OS worker threads, dispatched over
//! `crossbeam-channel` request/reply pairs implementing the init/execute/
//! error wire protocol from spec.md §4.7/§6 (message-passing, not
//! fork-join — see SPEC_FULL.md §4.7 for why this departs from the
//! teacher's `rayon::join` idiom at the dispatch layer).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::context::Context;
use crate::error::{Error, Result};

/// One quantum of work sent to a worker thread: build its `Context` and run
/// its body. Boxed because each dispatch carries a distinct system closure.
pub type WorkerJob = Box<dyn FnOnce(&Context) + Send>;

enum Request {
    Execute { job: WorkerJob, ctx: Context },
    Shutdown,
}

enum Reply {
    Done,
    Error(String),
}

struct WorkerHandle {
    to_worker: Sender<Request>,
    from_worker: Receiver<Reply>,
    join: Option<JoinHandle<()>>,
}

/// A thread waiting for a slot to free up, queued per-slot so the oldest
/// waiter for a given slot is served first (SPEC_FULL.md §4.7 "worker pool
/// fairness queueing").
struct Waiter {
    notify: Sender<()>,
}

pub struct WorkerPlane {
    workers: Vec<WorkerHandle>,
    /// `true` while a slot is occupied by in-flight work.
    busy: Vec<Mutex<bool>>,
    waiters: Vec<Mutex<VecDeque<Waiter>>>,
    timeout: Duration,
}

impl WorkerPlane {
    pub fn new(max_workers: usize, timeout: Duration) -> Self {
        let mut workers = Vec::with_capacity(max_workers);
        let mut busy = Vec::with_capacity(max_workers);
        let mut waiters = Vec::with_capacity(max_workers);
        for _ in 0..max_workers {
            let (to_worker, worker_rx) = bounded::<Request>(1);
            let (worker_tx, from_worker) = bounded::<Reply>(1);
            let join = std::thread::spawn(move || worker_loop(worker_rx, worker_tx));
            workers.push(WorkerHandle {
                to_worker,
                from_worker,
                join: Some(join),
            });
            busy.push(Mutex::new(false));
            waiters.push(Mutex::new(VecDeque::new()));
        }
        WorkerPlane {
            workers,
            busy,
            waiters,
            timeout,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.workers.len()
    }

    /// Validates a requested thread count against the configured pool size
    /// (spec.md §7 `ThreadCountExceeded`).
    pub fn check_thread_count(&self, requested: usize) -> Result<()> {
        if requested > self.max_workers() {
            return Err(Error::ThreadCountExceeded {
                requested,
                max_workers: self.max_workers(),
            });
        }
        Ok(())
    }

    /// Runs `job` on worker `slot`, blocking the caller until it replies or
    /// times out. `thread_index`/`thread_count` on `ctx` must already
    /// reflect `slot`'s partition.
    pub fn dispatch(&self, slot: usize, job: WorkerJob, ctx: Context) -> Result<()> {
        log::debug!("worker {slot}: dispatch start");
        self.acquire_slot(slot);
        let worker = &self.workers[slot];
        let result = (|| {
            worker
                .to_worker
                .send(Request::Execute { job, ctx })
                .map_err(|_| Error::WorkerError {
                    thread_index: slot,
                    message: "worker thread is gone".to_string(),
                })?;
            match worker.from_worker.recv_timeout(self.timeout) {
                Ok(Reply::Done) => Ok(()),
                Ok(Reply::Error(message)) => Err(Error::WorkerError {
                    thread_index: slot,
                    message,
                }),
                Err(_) => Err(Error::WorkerTimeout { thread_index: slot }),
            }
        })();
        self.release_slot(slot);
        log::debug!("worker {slot}: dispatch done");
        result
    }

    /// Fans one system out across several worker slots concurrently — each
    /// `(slot, job, ctx)` is dispatched on its own scoped thread, and this
    /// blocks until every reply is in, returning the first error seen if any
    /// (spec.md §4.7 "send execute to each... and await all replies").
    pub fn dispatch_many(&self, jobs: Vec<(usize, WorkerJob, Context)>) -> Result<()> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(|(slot, job, ctx)| scope.spawn(move || self.dispatch(slot, job, ctx)))
                .collect();
            let mut first_err = None;
            for handle in handles {
                if let Err(e) = handle.join().expect("worker dispatch thread panicked") {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
            first_err.map_or(Ok(()), Err)
        })
    }

    fn acquire_slot(&self, slot: usize) {
        loop {
            let mut busy = self.busy[slot].lock().unwrap();
            if !*busy {
                *busy = true;
                return;
            }
            let (tx, rx) = bounded(1);
            self.waiters[slot].lock().unwrap().push_back(Waiter { notify: tx });
            drop(busy);
            let _ = rx.recv();
        }
    }

    fn release_slot(&self, slot: usize) {
        let mut busy = self.busy[slot].lock().unwrap();
        *busy = false;
        if let Some(waiter) = self.waiters[slot].lock().unwrap().pop_front() {
            let _ = waiter.notify.send(());
        }
    }

    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            let _ = worker.to_worker.send(Request::Shutdown);
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

impl Drop for WorkerPlane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Request>, tx: Sender<Reply>) {
    while let Ok(request) = rx.recv() {
        match request {
            Request::Shutdown => break,
            Request::Execute { job, ctx } => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    job(&ctx);
                }));
                let reply = match outcome {
                    Ok(()) => Reply::Done,
                    Err(payload) => {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "worker panicked".to_string());
                        Reply::Error(message)
                    }
                };
                if tx.send(reply).is_err() {
                    break;
                }
            }
        }
    }
}

