//! spec.md §8: a `with(Position, Velocity)` query reports `added` the frame
//! after both components land on an entity, then reports nothing further
//! once the entity is stable.

use sparseworld::{ColumnDef, FieldDef, NumberType, QueryDef, QueryWindow, Schema, World, WorldOptions};

const POSITION: u16 = 0;
const VELOCITY: u16 = 1;

fn vec2_def(id: u16, name: &str) -> ColumnDef {
    ColumnDef {
        component_id: id,
        name: name.into(),
        schema: Schema::new(vec![
            ("x".into(), FieldDef::Number(NumberType::F32)),
            ("y".into(), FieldDef::Number(NumberType::F32)),
        ])
        .unwrap(),
        is_singleton: false,
    }
}

#[test]
fn added_then_removed_across_frames() {
    let mut world = World::new(
        vec![vec2_def(POSITION, "Position"), vec2_def(VELOCITY, "Velocity")],
        WorldOptions::default(),
    )
    .unwrap();

    // Frame A: create an entity with both components.
    let e = world.create_entity().unwrap();
    world.add_component(e, POSITION, &[], true).unwrap();
    world.add_component(e, VELOCITY, &[], true).unwrap();

    let def = QueryDef::builder("moving", 1).with(POSITION).with(VELOCITY).build();
    let mut instance = world.new_query_instance(&def);

    // Frame B: first observation sees the whole of frame A as "added".
    let curr_b = world.current_event_index();
    world.refresh_query(&def, &mut instance);
    let window_b = QueryWindow {
        prev_event_index: 0,
        curr_event_index: curr_b,
        partitioned: false,
        thread_index: 0,
        thread_count: 1,
    };
    assert_eq!(instance.added(&window_b), vec![e.index]);
    assert_eq!(instance.current(&window_b, false), vec![e.index]);

    // Frame C: nothing changed, so added/removed are both empty.
    let curr_c = world.current_event_index();
    world.refresh_query(&def, &mut instance);
    let window_c = QueryWindow {
        prev_event_index: curr_b,
        curr_event_index: curr_c,
        partitioned: false,
        thread_index: 0,
        thread_count: 1,
    };
    assert!(instance.added(&window_c).is_empty());
    assert!(instance.removed(&window_c).is_empty());
    assert_eq!(instance.current(&window_c, false), vec![e.index]);

    // Frame D: removing Velocity drops the entity from the match set.
    world.remove_component(e, VELOCITY, true).unwrap();
    let curr_d = world.current_event_index();
    world.refresh_query(&def, &mut instance);
    let window_d = QueryWindow {
        prev_event_index: curr_c,
        curr_event_index: curr_d,
        partitioned: false,
        thread_index: 0,
        thread_count: 1,
    };
    assert_eq!(instance.removed(&window_d), vec![e.index]);
    assert!(instance.current(&window_d, false).is_empty());
}
