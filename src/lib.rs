//! Shared-memory columnar ECS core: sparse entities, typed component
//! columns, a reactive query engine, and a worker-thread executor.
//!
//! See `context::Context` for the handle a system function runs with, and
//! `world::World` for the crate's single entry point.

pub mod column;
pub mod context;
pub mod entity_table;
pub mod error;
pub mod event_ring;
pub mod executor;
pub mod history;
pub mod pool;
pub mod query;
pub mod schema;
pub mod sparse_set;
pub mod worker;
pub mod world;

pub use column::{Column, ColumnDef, SINGLETON_ENTITY_ID};
pub use context::{Context, WorldHandles};
pub use entity_table::{EntityId, EntityTable};
pub use error::{Error, Result};
pub use event_ring::{Event, EventRing, EventType};
pub use executor::{Executor, MainThreadSystem, PlainItem, SystemFn, WorkerSystem};
pub use history::HistoryTable;
pub use pool::IdPool;
pub use query::{QueryDef, QueryDefBuilder, QueryInstance, QueryWindow};
pub use schema::{FieldDef, FieldValue, NumberType, NumberValue, Schema};
pub use sparse_set::SparseSet;
pub use worker::WorkerPlane;
pub use world::{ColumnMeta, World, WorldOptions};
