use thiserror::Error;

use crate::entity_table::EntityId;

/// Fatal errors raised at the API boundaries described in spec.md §7.
///
/// `EventBufferOverflow` and `StaleSystem` are intentionally absent here —
/// they are non-fatal warnings and are reported through `log::warn!` instead
/// (see `query::QueryInstance` and `history::HistoryTable`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("id pool exhausted: no free entity slot among {capacity} entities")]
    CapacityExceeded { capacity: u32 },

    #[error("entity {0:?} is not alive")]
    EntityDead(EntityId),

    #[error("entity index {0} was never allocated")]
    EntityNotFound(u32),

    #[error("entity {entity:?} already has component {component_id}")]
    DuplicateComponent {
        entity: EntityId,
        component_id: u16,
    },

    #[error("column {component_id} is not registered on this world")]
    NotRegistered { component_id: u16 },

    #[error("column {component_id} is already registered in another world")]
    AlreadyInitialized { component_id: u16 },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("system requested {requested} worker threads but max_workers is {max_workers}")]
    ThreadCountExceeded { requested: usize, max_workers: usize },

    #[error("worker {thread_index} timed out")]
    WorkerTimeout { thread_index: usize },

    #[error("worker {thread_index} failed: {message}")]
    WorkerError { thread_index: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
