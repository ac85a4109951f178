//! `World`: the crate's single entry point tying the data plane (C1-C4)
//! together with the executor (C6) and worker plane (C7), mirroring
//! `kyren-goggles::world::World`'s "plain struct, no builder" shape
//! (spec.md §6 "World lifecycle").

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::column::{Column, ColumnDef};
use crate::context::{Context, WorldHandles};
use crate::entity_table::{EntityId, EntityTable};
use crate::error::{Error, Result};
use crate::event_ring::{EventRing, EventType};
use crate::executor::{Executor, MainThreadSystem, PlainItem, WorkerSystem};
use crate::history::RECLAIM_DELAY;
use crate::pool::IdPool;
use crate::query::{QueryDef, QueryInstance, QueryWindow};
use crate::schema::FieldValue;
use crate::worker::WorkerPlane;

/// Construction-time options, defaults matching spec.md §6 `newWorld`.
#[derive(Clone, Copy, Debug)]
pub struct WorldOptions {
    pub max_entities: u32,
    pub max_events: u32,
    pub max_workers: usize,
    pub worker_timeout: Duration,
}

impl Default for WorldOptions {
    fn default() -> Self {
        WorldOptions {
            max_entities: 10_000,
            max_events: 131_072,
            max_workers: 0,
            worker_timeout: Duration::from_secs(5),
        }
    }
}

/// Read-only introspection record for a registered column (SPEC_FULL.md §6
/// supplement "world.columns()").
#[derive(Clone, Debug)]
pub struct ColumnMeta {
    pub component_id: u16,
    pub name: String,
    pub is_singleton: bool,
}

struct PendingRemoval {
    index: u32,
    removed_at_event_index: u32,
}

pub struct World {
    handles: WorldHandles,
    options: WorldOptions,
    column_defs: Vec<ColumnMeta>,
    executor: Executor,
    pending_removals: VecDeque<PendingRemoval>,
}

impl World {
    /// Builds a world from its registered columns. Duplicate component ids
    /// across `defs` are rejected (spec.md §7 `AlreadyInitialized`).
    pub fn new(defs: Vec<ColumnDef>, options: WorldOptions) -> Result<Self> {
        let component_count = defs.iter().map(|d| d.component_id as usize + 1).max().unwrap_or(0);

        let mut column_defs = Vec::with_capacity(defs.len());
        let mut columns = FxHashMap::default();
        for def in defs {
            if columns.contains_key(&def.component_id) {
                return Err(Error::AlreadyInitialized {
                    component_id: def.component_id,
                });
            }
            column_defs.push(ColumnMeta {
                component_id: def.component_id,
                name: def.name.clone(),
                is_singleton: def.is_singleton,
            });
            let column = Column::new(def, options.max_entities);
            column.mark_registered();
            columns.insert(column.component_id, column);
        }

        let handles = WorldHandles {
            pool: Arc::new(IdPool::new(options.max_entities)),
            entities: Arc::new(EntityTable::new(options.max_entities, component_count)),
            events: Arc::new(EventRing::new(options.max_events)),
            columns: Arc::new(columns),
        };

        let workers = if options.max_workers > 0 {
            Some(WorkerPlane::new(options.max_workers, options.worker_timeout))
        } else {
            None
        };

        Ok(World {
            handles,
            options,
            column_defs,
            executor: Executor::new(options.max_events, workers),
            pending_removals: VecDeque::new(),
        })
    }

    pub fn options(&self) -> &WorldOptions {
        &self.options
    }

    pub fn column_defs(&self) -> &[ColumnMeta] {
        &self.column_defs
    }

    fn column(&self, component_id: u16) -> Result<&Column> {
        self.handles
            .columns
            .get(&component_id)
            .ok_or(Error::NotRegistered { component_id })
    }

    /// A read-only context usable outside `execute`, e.g. for ad-hoc query
    /// calls from host code (spec.md §6 "World lifecycle: get_context").
    pub fn get_context(&self, system_id: impl Into<String>) -> Context {
        let curr = self.handles.events.write_index();
        Context {
            handles: self.handles.clone(),
            system_id: system_id.into(),
            prev_event_index: curr,
            curr_event_index: curr,
            thread_index: 0,
            thread_count: 1,
        }
    }

    // ---- entity ops ----------------------------------------------------

    pub fn create_entity(&mut self) -> Result<EntityId> {
        let index = self.handles.pool.acquire()?;
        let generation = self.handles.entities.create(index);
        self.handles.events.push(index, EventType::Added, 0);
        Ok(EntityId::new(index, generation))
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.handles.entities.is_alive(id.index) && self.handles.entities.generation(id.index) == id.generation
    }

    /// Validates `id` against the Entity Table, unless `check_existence` is
    /// `false` — spec.md §7 "caller may pass `checkExistence = false` to opt
    /// out (used in recycling / snapshot)".
    fn check_handle(&self, id: EntityId, check_existence: bool) -> Result<()> {
        if !check_existence {
            return Ok(());
        }
        self.handles.entities.check_alive(id.index)?;
        if self.handles.entities.generation(id.index) != id.generation {
            return Err(Error::EntityDead(id));
        }
        Ok(())
    }

    /// Marks `id` dead and queues its slot for reclamation once every live
    /// system's watermark has passed this point (spec.md §4.6).
    pub fn remove_entity(&mut self, id: EntityId) -> Result<()> {
        self.check_handle(id, true)?;
        self.handles.entities.mark_dead(id.index);
        let removed_at = self.handles.events.push(id.index, EventType::Removed, 0);
        self.pending_removals.push_back(PendingRemoval {
            index: id.index,
            removed_at_event_index: removed_at,
        });
        Ok(())
    }

    /// Linear scan for every entity whose `ref` field on `column` resolves
    /// to `target` (SPEC_FULL.md §3 supplement "Backref queries").
    pub fn get_backrefs(
        &self,
        target: EntityId,
        component_id: u16,
        field_name: &str,
        check_existence: bool,
    ) -> Result<Vec<EntityId>> {
        let column = self.column(component_id)?;
        let entities = &self.handles.entities;
        let mut out = Vec::new();
        for index in 0..self.options.max_entities {
            if check_existence && !entities.is_alive(index) {
                continue;
            }
            let resolved = column.read_ref(
                index,
                field_name,
                |i| entities.is_alive(i),
                |i| entities.generation(i),
            );
            if let Some(entity) = resolved {
                if entity.index == target.index && entity.generation == target.generation {
                    out.push(entities.entity_id(index));
                }
            }
        }
        Ok(out)
    }

    // ---- component ops ---------------------------------------------------

    pub fn has_component(&self, id: EntityId, component_id: u16, check_existence: bool) -> Result<bool> {
        self.check_handle(id, check_existence)?;
        Ok(self.handles.entities.has_component(id.index, component_id))
    }

    pub fn add_component(
        &mut self,
        id: EntityId,
        component_id: u16,
        initial: &[(String, FieldValue)],
        check_existence: bool,
    ) -> Result<()> {
        self.check_handle(id, check_existence)?;
        if self.handles.entities.has_component(id.index, component_id) {
            return Err(Error::DuplicateComponent {
                entity: id,
                component_id,
            });
        }
        let column = self.column(component_id)?;
        let mut full = column.default_struct();
        for (name, value) in initial {
            if let Some(slot) = full.iter_mut().find(|(n, _)| n == name) {
                slot.1 = value.clone();
            }
        }
        for (name, value) in full {
            column.set_field_value(id.index, &name, value);
        }
        self.handles.entities.add_component(id.index, component_id);
        self.handles
            .events
            .push(id.index, EventType::ComponentAdded, component_id);
        Ok(())
    }

    pub fn remove_component(&mut self, id: EntityId, component_id: u16, check_existence: bool) -> Result<()> {
        self.check_handle(id, check_existence)?;
        if !self.handles.entities.has_component(id.index, component_id) {
            return Err(Error::NotRegistered { component_id });
        }
        self.handles.entities.remove_component(id.index, component_id);
        self.handles
            .events
            .push(id.index, EventType::ComponentRemoved, component_id);
        Ok(())
    }

    pub fn read_field(&self, id: EntityId, component_id: u16, field_name: &str) -> Result<Option<FieldValue>> {
        self.check_handle(id, true)?;
        Ok(self.column(component_id)?.field_value(id.index, field_name))
    }

    /// Reads a `ref` field, self-healing it to `null` if it points at a
    /// reclaimed, regenerated, or otherwise stale entity (spec.md §4.4
    /// "Ref").
    pub fn read_ref(&self, id: EntityId, component_id: u16, field_name: &str) -> Result<Option<EntityId>> {
        self.check_handle(id, true)?;
        let entities = &self.handles.entities;
        Ok(self.column(component_id)?.read_ref(
            id.index,
            field_name,
            |i| entities.is_alive(i),
            |i| entities.generation(i),
        ))
    }

    pub fn write_field(&self, id: EntityId, component_id: u16, field_name: &str, value: FieldValue) -> Result<()> {
        self.check_handle(id, true)?;
        let column = self.column(component_id)?;
        column.begin_write(&self.handles.events, id.index);
        column.set_field_value(id.index, field_name, value);
        Ok(())
    }

    pub fn copy_component(&self, id: EntityId, component_id: u16, full: &[(String, FieldValue)]) -> Result<()> {
        self.check_handle(id, true)?;
        self.column(component_id)?.copy(&self.handles.events, id.index, full);
        Ok(())
    }

    pub fn patch_component(&self, id: EntityId, component_id: u16, partial: &[(String, FieldValue)]) -> Result<()> {
        self.check_handle(id, true)?;
        self.column(component_id)?.patch(&self.handles.events, id.index, partial);
        Ok(())
    }

    pub fn snapshot_component(&self, id: EntityId, component_id: u16) -> Result<Vec<(String, FieldValue)>> {
        self.check_handle(id, true)?;
        Ok(self.column(component_id)?.snapshot(id.index))
    }

    // ---- singleton ops ---------------------------------------------------

    pub fn singleton_read(&self, component_id: u16, field_name: &str) -> Result<Option<FieldValue>> {
        Ok(self.column(component_id)?.field_value(0, field_name))
    }

    pub fn singleton_write(&self, component_id: u16, field_name: &str, value: FieldValue) -> Result<()> {
        let column = self.column(component_id)?;
        column.begin_write(&self.handles.events, 0);
        column.set_field_value(0, field_name, value);
        Ok(())
    }

    pub fn singleton_patch(&self, component_id: u16, partial: &[(String, FieldValue)]) -> Result<()> {
        self.column(component_id)?.patch(&self.handles.events, 0, partial);
        Ok(())
    }

    // ---- query ops ---------------------------------------------------

    pub fn new_query_instance(&self, def: &QueryDef) -> QueryInstance {
        QueryInstance::new(self.options.max_entities, def.singleton_only)
    }

    pub fn refresh_query(&self, def: &QueryDef, instance: &mut QueryInstance) {
        let curr = self.handles.events.write_index();
        instance.refresh(&self.handles.entities, &self.handles.events, def, curr);
    }

    pub fn current_event_index(&self) -> u32 {
        self.handles.events.write_index()
    }

    pub fn whole_history_window(&self) -> QueryWindow {
        QueryWindow::whole_history(self.current_event_index())
    }

    // ---- execution ---------------------------------------------------

    pub fn execute(
        &mut self,
        plain: &[PlainItem],
        main_thread: &[MainThreadSystem],
        workers: &[WorkerSystem],
    ) -> Result<()> {
        for system in workers {
            self.check_thread_count(system.threads.max(1))?;
        }
        self.executor.execute(&self.handles, plain, main_thread, workers)
    }

    pub fn next_sync(&mut self, cb: impl FnOnce() + Send + 'static) {
        self.executor.next_sync(cb);
    }

    pub fn subscribe(
        &mut self,
        def: QueryDef,
        callback: impl Fn(&[u32], &[u32], &[u32]) + Send + Sync + 'static,
    ) -> u64 {
        self.executor.subscribe(def, self.options.max_entities, callback)
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.executor.unsubscribe(id);
    }

    /// Runs deferred callbacks, notifies subscriber queries, then reclaims
    /// every entity slot whose removal every live system has observed.
    pub fn sync(&mut self) {
        self.executor.sync(&self.handles);
        self.reclaim();
    }

    fn reclaim(&mut self) {
        let curr = self.handles.events.write_index();
        let Some(watermark) = self.executor.history_mut().advance_watermark(curr) else {
            return;
        };
        while let Some(front) = self.pending_removals.front() {
            if front.removed_at_event_index >= watermark {
                break;
            }
            let removal = self.pending_removals.pop_front().unwrap();
            self.handles.entities.delete(removal.index);
            self.handles.pool.release(removal.index);
            log::debug!("reclaimed entity index {}", removal.index);
        }
    }

    pub fn check_thread_count(&self, requested: usize) -> Result<()> {
        if self.options.max_workers == 0 {
            if requested > 1 {
                return Err(Error::ThreadCountExceeded {
                    requested,
                    max_workers: 0,
                });
            }
            return Ok(());
        }
        if requested > self.options.max_workers {
            return Err(Error::ThreadCountExceeded {
                requested,
                max_workers: self.options.max_workers,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, NumberType, NumberValue, Schema};

    fn position_def() -> ColumnDef {
        ColumnDef {
            component_id: 0,
            name: "Position".into(),
            schema: Schema::new(vec![
                ("x".into(), FieldDef::Number(NumberType::F32)),
                ("y".into(), FieldDef::Number(NumberType::F32)),
            ])
            .unwrap(),
            is_singleton: false,
        }
    }

    #[test]
    fn create_add_component_and_read_field() {
        let mut world = World::new(vec![position_def()], WorldOptions::default()).unwrap();
        let e = world.create_entity().unwrap();
        world
            .add_component(e, 0, &[("x".into(), FieldValue::Number(NumberValue::F32(1.0)))], true)
            .unwrap();
        assert!(world.has_component(e, 0, true).unwrap());
        let x = world.read_field(e, 0, "x").unwrap().unwrap();
        assert_eq!(x, FieldValue::Number(NumberValue::F32(1.0)));
    }

    #[test]
    fn duplicate_column_id_is_rejected() {
        let dup = position_def();
        let mut other = position_def();
        other.name = "Other".into();
        let err = World::new(vec![dup, other], WorldOptions::default()).unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized { component_id: 0 }));
    }

    #[test]
    fn removed_entity_is_not_alive_and_rejects_ops() {
        let mut world = World::new(vec![position_def()], WorldOptions::default()).unwrap();
        let e = world.create_entity().unwrap();
        world.remove_entity(e).unwrap();
        assert!(!world.is_alive(e));
        assert!(matches!(world.has_component(e, 0, true), Err(Error::EntityDead(_))));
        assert!(world.has_component(e, 0, false).unwrap(), "check_existence=false bypasses the dead check");
    }

    #[test]
    fn reclamation_waits_for_watermark_then_frees_slot() {
        let mut world = World::new(vec![position_def()], WorldOptions::default()).unwrap();
        let e = world.create_entity().unwrap();
        world.remove_entity(e).unwrap();
        for _ in 0..(RECLAIM_DELAY + 1) {
            world.sync();
        }
        assert!(world.handles.pool.is_free(e.index));
    }
}
