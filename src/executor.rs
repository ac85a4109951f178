//! C6 (execution half): runs one batch of systems against a single,
//! batch-wide `currEventIndex` (spec.md §4.6 "intra-batch isolation"), then
//! `sync()`s deferred callbacks and subscriber queries.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::context::{Context, WorldHandles};
use crate::error::{Error, Result};
use crate::history::HistoryTable;
use crate::query::{QueryDef, QueryInstance, QueryWindow};
use crate::worker::WorkerPlane;

pub type SystemFn = Arc<dyn Fn(&Context) + Send + Sync>;
type SyncCallback = Box<dyn FnOnce() + Send>;
type SubscriberCallback = Box<dyn Fn(&[u32], &[u32], &[u32]) + Send + Sync>;

/// A plain function, run serially with no history tracking — it sees the
/// batch's `currEventIndex` but always `prevEventIndex = 0`.
pub struct PlainItem {
    pub id: String,
    pub func: SystemFn,
}

/// A system run on the calling thread, in listed order, with its own
/// watermark-tracked `prevEventIndex`.
pub struct MainThreadSystem {
    pub id: String,
    pub func: SystemFn,
}

/// A system dispatched to the worker plane. Higher `priority` runs first.
/// `threads` is the `T` of spec.md §4.7's "dispatching a worker system with
/// `threads = T`" — the system runs once per worker slot in `[0, T)`, each
/// seeing `(threadIndex, threadCount) = (slot, T)` on its `Context`.
pub struct WorkerSystem {
    pub id: String,
    pub priority: i32,
    pub func: SystemFn,
    pub partitioned: bool,
    pub threads: usize,
}

struct Subscription {
    def: QueryDef,
    instance: QueryInstance,
    prev_event_index: u32,
    callback: SubscriberCallback,
}

/// Orchestrates one world's systems: execution batches, the history table
/// driving reclamation, and subscriber queries notified at `sync()`.
pub struct Executor {
    history: HistoryTable,
    workers: Option<WorkerPlane>,
    subscriptions: FxHashMap<u64, Subscription>,
    next_sub_id: u64,
    pending_sync: Vec<SyncCallback>,
}

impl Executor {
    pub fn new(max_events: u32, workers: Option<WorkerPlane>) -> Self {
        Executor {
            history: HistoryTable::new(max_events),
            workers,
            subscriptions: FxHashMap::default(),
            next_sub_id: 0,
            pending_sync: Vec::new(),
        }
    }

    pub fn history(&self) -> &HistoryTable {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryTable {
        &mut self.history
    }

    /// Runs `plain` functions, then `main_thread` systems in listed order,
    /// then `workers` in descending priority, all against one fixed
    /// `currEventIndex` captured at batch start.
    pub fn execute(
        &mut self,
        handles: &WorldHandles,
        plain: &[PlainItem],
        main_thread: &[MainThreadSystem],
        workers: &[WorkerSystem],
    ) -> Result<()> {
        let curr_event_index = handles.events.write_index();

        for item in plain {
            let ctx = Context {
                handles: handles.clone(),
                system_id: item.id.clone(),
                prev_event_index: 0,
                curr_event_index,
                thread_index: 0,
                thread_count: 1,
            };
            (item.func)(&ctx);
        }

        for system in main_thread {
            let prev = self.history.prev_event_index(&system.id);
            let ctx = Context {
                handles: handles.clone(),
                system_id: system.id.clone(),
                prev_event_index: prev,
                curr_event_index,
                thread_index: 0,
                thread_count: 1,
            };
            (system.func)(&ctx);
            self.history.record_execution(&system.id, curr_event_index);
        }

        let mut ordered: Vec<&WorkerSystem> = workers.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for system in ordered {
            let prev = self.history.prev_event_index(&system.id);
            let threads = system.threads.max(1);

            match &self.workers {
                Some(plane) => {
                    // Validate T <= maxWorkers, obtain T slots (0..T), send
                    // execute to each, and await all replies (spec.md §4.7).
                    plane.check_thread_count(threads)?;
                    let jobs = (0..threads)
                        .map(|slot| {
                            let func = system.func.clone();
                            let ctx = Context {
                                handles: handles.clone(),
                                system_id: system.id.clone(),
                                prev_event_index: prev,
                                curr_event_index,
                                thread_index: slot,
                                thread_count: threads,
                            };
                            (slot, Box::new(move |ctx: &Context| func(ctx)) as crate::worker::WorkerJob, ctx)
                        })
                        .collect();
                    plane.dispatch_many(jobs)?;
                }
                None => {
                    if threads > 1 {
                        return Err(Error::ThreadCountExceeded {
                            requested: threads,
                            max_workers: 0,
                        });
                    }
                    let ctx = Context {
                        handles: handles.clone(),
                        system_id: system.id.clone(),
                        prev_event_index: prev,
                        curr_event_index,
                        thread_index: 0,
                        thread_count: 1,
                    };
                    (system.func)(&ctx);
                }
            }
            self.history.record_execution(&system.id, curr_event_index);
        }

        Ok(())
    }

    /// Queues a callback to run on the next `sync()`, before subscribers are
    /// notified.
    pub fn next_sync(&mut self, cb: impl FnOnce() + Send + 'static) {
        self.pending_sync.push(Box::new(cb));
    }

    /// Registers a standing query subscription, returning a handle that
    /// unsubscribes it when passed to `unsubscribe`.
    pub fn subscribe(
        &mut self,
        def: QueryDef,
        max_entities: u32,
        callback: impl Fn(&[u32], &[u32], &[u32]) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        let singleton_only = def.singleton_only;
        self.subscriptions.insert(
            id,
            Subscription {
                def,
                instance: QueryInstance::new(max_entities, singleton_only),
                prev_event_index: 0,
                callback: Box::new(callback),
            },
        );
        id
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subscriptions.remove(&id);
    }

    /// Runs deferred `next_sync` callbacks, then notifies every subscriber
    /// of its `added`/`removed`/`changed` delta and advances its saved
    /// index, per spec.md §4.6 "sync".
    pub fn sync(&mut self, handles: &WorldHandles) {
        for cb in self.pending_sync.drain(..) {
            cb();
        }

        let curr = handles.events.write_index();
        for sub in self.subscriptions.values_mut() {
            sub.instance.refresh(&handles.entities, &handles.events, &sub.def, curr);
            let window = QueryWindow {
                prev_event_index: sub.prev_event_index,
                curr_event_index: curr,
                partitioned: false,
                thread_index: 0,
                thread_count: 1,
            };
            let added = sub.instance.added(&window);
            let removed = sub.instance.removed(&window);
            let changed = sub.instance.changed(&handles.events, &sub.def, &window);
            (sub.callback)(&added, &removed, &changed);
            sub.prev_event_index = curr;
        }
    }
}
