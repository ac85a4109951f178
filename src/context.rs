//! The handle a system function runs with: shared references to the data
//! plane plus the bookkeeping a query call needs (spec.md §4.7 "host sends
//! handles, the worker reconstructs a Context aliasing shared memory").

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::column::Column;
use crate::entity_table::EntityTable;
use crate::event_ring::EventRing;
use crate::pool::IdPool;
use crate::query::QueryWindow;

/// The shared-memory handles every `Context` aliases, cloned cheaply via
/// `Arc` when a worker thread needs its own `Context` for the same world.
#[derive(Clone)]
pub struct WorldHandles {
    pub pool: Arc<IdPool>,
    pub entities: Arc<EntityTable>,
    pub events: Arc<EventRing>,
    pub columns: Arc<FxHashMap<u16, Column>>,
}

/// Per-call execution context: which system is running, the event window it
/// should read queries against, and (for worker systems) which partition of
/// the entity space it owns.
pub struct Context {
    pub handles: WorldHandles,
    pub system_id: String,
    pub prev_event_index: u32,
    pub curr_event_index: u32,
    pub thread_index: usize,
    pub thread_count: usize,
}

impl Context {
    pub fn query_window(&self, partitioned: bool) -> QueryWindow {
        QueryWindow {
            prev_event_index: self.prev_event_index,
            curr_event_index: self.curr_event_index,
            partitioned,
            thread_index: self.thread_index,
            thread_count: self.thread_count,
        }
    }

    pub fn column(&self, component_id: u16) -> Option<&Column> {
        self.handles.columns.get(&component_id)
    }
}
