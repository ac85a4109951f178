//! spec.md §8: two systems in the same `execute()` batch share one fixed
//! `currEventIndex`, so a system later in the batch must not observe an
//! entity a system earlier in the same batch just created.

use std::sync::{Arc, Mutex};

use sparseworld::{
    Context, ColumnDef, EventType, FieldDef, MainThreadSystem, NumberType, QueryDef, QueryInstance,
    Schema, World, WorldOptions,
};

const POSITION: u16 = 0;

fn position_def() -> ColumnDef {
    ColumnDef {
        component_id: POSITION,
        name: "Position".into(),
        schema: Schema::new(vec![("x".into(), FieldDef::Number(NumberType::F32))]).unwrap(),
        is_singleton: false,
    }
}

#[test]
fn later_system_in_batch_does_not_see_earlier_systems_new_entity() {
    let mut world = World::new(vec![position_def()], WorldOptions::default()).unwrap();

    let existing = world.create_entity().unwrap();
    world.add_component(existing, POSITION, &[], true).unwrap();

    let def = QueryDef::builder("with_pos", 1).with(POSITION).build();
    let def_for_b = def.clone();

    let seen_by_b: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_by_b_inner = Arc::clone(&seen_by_b);

    let system_a_creates_entity = MainThreadSystem {
        id: "spawner".into(),
        func: Arc::new(move |ctx: &Context| {
            let index = ctx.handles.pool.acquire().unwrap();
            ctx.handles.entities.create(index);
            ctx.handles.entities.add_component(index, POSITION);
            ctx.handles.events.push(index, EventType::Added, 0);
            ctx.handles
                .events
                .push(index, EventType::ComponentAdded, POSITION);
        }),
    };

    let system_b_queries = MainThreadSystem {
        id: "reader".into(),
        func: Arc::new(move |ctx: &Context| {
            let mut instance = QueryInstance::new(10_000, false);
            instance.refresh(&ctx.handles.entities, &ctx.handles.events, &def_for_b, ctx.curr_event_index);
            let window = ctx.query_window(false);
            *seen_by_b_inner.lock().unwrap() = instance.current(&window, false);
        }),
    };

    world
        .execute(&[], &[system_a_creates_entity, system_b_queries], &[])
        .unwrap();

    let seen = seen_by_b.lock().unwrap();
    assert_eq!(
        *seen,
        vec![existing.index],
        "system b must only see what existed at the batch's frozen currEventIndex"
    );
}
