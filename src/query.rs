//! C5: compiled filter predicates (`QueryDef`) and the per-reader
//! `QueryInstance` that maintains a sparse-set cache and computes
//! `added`/`removed`/`changed` deltas from the event ring (spec.md §4.5).

use rustc_hash::{FxHashMap, FxHashSet};

use crate::column::SINGLETON_ENTITY_ID;
use crate::entity_table::{EntityTable, MatchMasks};
use crate::event_ring::{EventRing, EventType};
use crate::sparse_set::SparseSet;

fn mask_has_bits(mask: &[u8]) -> bool {
    mask.iter().any(|&b| b != 0)
}

/// Full-table scan for a cache rebuild after an overflow (spec.md §4.5
/// "cache rebuild"). Fans out across `rayon`'s global pool when the
/// `rayon` feature is enabled, matching the teacher's use of
/// `rayon::join`-style fan-out for per-entity work (`kyren-goggles`'s
/// `rayon_pool.rs`) rather than hand-rolling thread spawning here.
#[cfg(feature = "rayon")]
fn matching_indices(entity_table: &EntityTable, def: &QueryDef) -> Vec<u32> {
    use rayon::prelude::*;
    let masks = def.masks();
    (0..entity_table.max_entities())
        .into_par_iter()
        .filter(|&index| entity_table.matches(index, &masks))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn matching_indices(entity_table: &EntityTable, def: &QueryDef) -> Vec<u32> {
    let masks = def.masks();
    (0..entity_table.max_entities())
        .filter(|&index| entity_table.matches(index, &masks))
        .collect()
}

/// A pure, static query description: four component bitmasks plus the
/// subset of `with` whose `CHANGED` events are surfaced (spec.md §3
/// "Query").
#[derive(Clone)]
pub struct QueryDef {
    pub id: String,
    pub with: Vec<u8>,
    pub without: Vec<u8>,
    pub any: Vec<u8>,
    pub tracking: Vec<u8>,
    /// `true` when every tracked component is a singleton, so the query
    /// needs no membership cache (spec.md §4.5 "Singleton queries").
    pub singleton_only: bool,
}

impl QueryDef {
    pub fn builder(id: impl Into<String>, mask_bytes: usize) -> QueryDefBuilder {
        QueryDefBuilder {
            id: id.into(),
            mask_bytes,
            with: vec![0; mask_bytes],
            without: vec![0; mask_bytes],
            any: vec![0; mask_bytes],
            tracking: vec![0; mask_bytes],
            singleton_only: false,
        }
    }

    fn masks(&self) -> MatchMasks<'_> {
        MatchMasks {
            with: &self.with,
            without: &self.without,
            any: &self.any,
            with_any_bits: mask_has_bits(&self.with),
            without_any_bits: mask_has_bits(&self.without),
            any_any_bits: mask_has_bits(&self.any),
        }
    }

    fn tracks(&self, component_id: u16) -> bool {
        let byte = (component_id / 8) as usize;
        let bit = 1u8 << (component_id % 8);
        self.tracking.get(byte).copied().unwrap_or(0) & bit != 0
    }
}

pub struct QueryDefBuilder {
    id: String,
    mask_bytes: usize,
    with: Vec<u8>,
    without: Vec<u8>,
    any: Vec<u8>,
    tracking: Vec<u8>,
    singleton_only: bool,
}

impl QueryDefBuilder {
    fn set(mask: &mut [u8], component_id: u16) {
        let byte = (component_id / 8) as usize;
        mask[byte] |= 1 << (component_id % 8);
    }

    pub fn with(mut self, component_id: u16) -> Self {
        Self::set(&mut self.with, component_id);
        self
    }

    pub fn without(mut self, component_id: u16) -> Self {
        Self::set(&mut self.without, component_id);
        self
    }

    pub fn any(mut self, component_id: u16) -> Self {
        Self::set(&mut self.any, component_id);
        self
    }

    pub fn tracking(mut self, component_id: u16) -> Self {
        Self::set(&mut self.tracking, component_id);
        self
    }

    pub fn singleton_only(mut self, value: bool) -> Self {
        self.singleton_only = value;
        self
    }

    pub fn build(self) -> QueryDef {
        let _ = self.mask_bytes;
        QueryDef {
            id: self.id,
            with: self.with,
            without: self.without,
            any: self.any,
            tracking: self.tracking,
            singleton_only: self.singleton_only,
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Transient {
    Added,
    Removed,
    Changed,
}

/// The `(prevEventIndex, currEventIndex)` pair a caller's reader context
/// supplies for one query evaluation (spec.md §4.5 "result window").
#[derive(Clone, Copy)]
pub struct QueryWindow {
    pub prev_event_index: u32,
    pub curr_event_index: u32,
    pub partitioned: bool,
    pub thread_index: usize,
    pub thread_count: usize,
}

impl QueryWindow {
    pub fn whole_history(curr_event_index: u32) -> Self {
        QueryWindow {
            prev_event_index: 0,
            curr_event_index,
            partitioned: false,
            thread_index: 0,
            thread_count: 1,
        }
    }
}

/// Per-`(QueryDef, readerId)` instance: owns the sparse-set cache plus the
/// scanning progress and most recent result vectors.
pub struct QueryInstance {
    cache: Option<SparseSet>,
    last_index: u32,
    added: Vec<u32>,
    removed: Vec<u32>,
    changed: Vec<u32>,
    warned_overflow: bool,
}

impl QueryInstance {
    pub fn new(max_entities: u32, singleton_only: bool) -> Self {
        QueryInstance {
            cache: if singleton_only {
                None
            } else {
                Some(SparseSet::new(max_entities))
            },
            last_index: 0,
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
            warned_overflow: false,
        }
    }

    fn rebuild_from_table(&mut self, entity_table: &EntityTable, def: &QueryDef) {
        let cache = self.cache.as_mut().expect("singleton queries have no cache");
        cache.clear();
        for index in matching_indices(entity_table, def) {
            cache.insert(index);
        }
    }

    fn apply_partition(&self, ids: Vec<u32>, window: &QueryWindow) -> Vec<u32> {
        if !window.partitioned || window.thread_count <= 1 {
            return ids;
        }
        let thread_count = window.thread_count as u32;
        let thread_index = window.thread_index as u32;
        ids.into_iter()
            .filter(|id| id % thread_count == thread_index)
            .collect()
    }

    /// Refreshes the cache and recomputes `added`/`removed`/`changed` up to
    /// `curr` (spec.md §4.5's result semantics). `curr` is supplied by the
    /// caller's context rather than read live off the ring, so a system
    /// running mid-batch only ever observes events up to its batch's frozen
    /// `currEventIndex` (spec.md §4.6 "intra-batch isolation").
    pub fn refresh(&mut self, entity_table: &EntityTable, event_ring: &EventRing, def: &QueryDef, curr: u32) {
        if def.singleton_only {
            self.last_index = curr;
            return;
        }

        let capacity = event_ring.capacity();
        let cache_overflowed = curr.wrapping_sub(self.last_index) > capacity;
        if cache_overflowed {
            self.rebuild_from_table(entity_table, def);
            if !self.warned_overflow {
                log::warn!(
                    "query {}: cache overflow, rebuilt from entity table (added/removed may be incomplete)",
                    def.id
                );
                self.warned_overflow = true;
            }
        } else {
            self.warned_overflow = false;
        }

        let scan_from = if cache_overflowed {
            curr
        } else {
            event_ring.clamp_from(self.last_index)
        };

        let mut transient: FxHashMap<u32, Transient> = FxHashMap::default();
        let masks = def.masks();
        let cache = self.cache.as_mut().expect("non-singleton query has a cache");

        let mut i = scan_from;
        while i != curr {
            let event = event_ring.read_event(i);
            match event.event_type {
                t if t == EventType::Added.bit()
                    || t == EventType::Removed.bit()
                    || t == EventType::ComponentAdded.bit()
                    || t == EventType::ComponentRemoved.bit() =>
                {
                    let now_matches = entity_table.matches(event.entity_id, &masks);
                    let was_cached = cache.contains(event.entity_id);
                    if now_matches && !was_cached {
                        cache.insert(event.entity_id);
                        Self::note_transition(&mut transient, event.entity_id, Transient::Added);
                    } else if !now_matches && was_cached {
                        cache.remove(event.entity_id);
                        Self::note_transition(&mut transient, event.entity_id, Transient::Removed);
                    }
                }
                t if t == EventType::Changed.bit() => {
                    if def.tracks(event.component_id) && cache.contains(event.entity_id) {
                        Self::note_transition(&mut transient, event.entity_id, Transient::Changed);
                    }
                }
                _ => {}
            }
            i = i.wrapping_add(1);
        }
        self.last_index = curr;

        self.added.clear();
        self.removed.clear();
        self.changed.clear();
        for (&id, state) in transient.iter() {
            match state {
                Transient::Added => self.added.push(id),
                Transient::Removed => self.removed.push(id),
                Transient::Changed => self.changed.push(id),
            }
        }
    }

    fn note_transition(map: &mut FxHashMap<u32, Transient>, id: u32, next: Transient) {
        use Transient::*;
        let merged = match (map.get(&id).copied(), next) {
            (None, n) => Some(n),
            (Some(Added), Removed) => None, // cancels
            (Some(Changed), Removed) => Some(Removed), // promotes
            (Some(Removed), Added) => Some(Added),
            (Some(a), b) if a == b => Some(a), // duplicate collapses
            (Some(_), n) => Some(n),
        };
        match merged {
            Some(state) => {
                map.insert(id, state);
            }
            None => {
                map.remove(&id);
            }
        }
    }

    pub fn current(&self, window: &QueryWindow, singleton_only: bool) -> Vec<u32> {
        if singleton_only {
            return vec![SINGLETON_ENTITY_ID];
        }
        let ids = self
            .cache
            .as_ref()
            .map(|c| c.as_slice().to_vec())
            .unwrap_or_default();
        self.apply_partition(ids, window)
    }

    pub fn added(&self, window: &QueryWindow) -> Vec<u32> {
        self.apply_partition(self.added.clone(), window)
    }

    pub fn removed(&self, window: &QueryWindow) -> Vec<u32> {
        self.apply_partition(self.removed.clone(), window)
    }

    pub fn changed(
        &self,
        event_ring: &EventRing,
        def: &QueryDef,
        window: &QueryWindow,
    ) -> Vec<u32> {
        if def.singleton_only {
            let mut found = false;
            let mut out = FxHashSet::default();
            event_ring.collect_entities_in_range(
                window.prev_event_index,
                Some(window.curr_event_index),
                EventType::Changed.bit(),
                Some(&def.tracking),
                &mut out,
            );
            found |= !out.is_empty();
            return if found { vec![SINGLETON_ENTITY_ID] } else { vec![] };
        }
        self.apply_partition(self.changed.clone(), window)
    }

    pub fn added_or_changed(&self, event_ring: &EventRing, def: &QueryDef, window: &QueryWindow) -> Vec<u32> {
        let mut out: Vec<u32> = self.added(window);
        for id in self.changed(event_ring, def, window) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}
