//! spec.md §8: with `maxEvents = 10`, generating far more events than the
//! ring holds before a query ever reads them must still leave the query's
//! cache correct after it rebuilds from the entity table.

use sparseworld::{ColumnDef, FieldDef, NumberType, QueryDef, QueryWindow, Schema, World, WorldOptions};

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
fn cache_rebuilds_correctly_after_ring_overflow() {
    let options = WorldOptions {
        max_events: 10,
        ..WorldOptions::default()
    };
    let mut world = World::new(vec![position_def()], options).unwrap();

    let def = QueryDef::builder("with_pos", 1).with(POSITION).build();
    let mut instance = world.new_query_instance(&def);

    // 20 entities x 2 events (Added, ComponentAdded) = 40 events, far more
    // than the 10-slot ring, all written before the query ever reads.
    let mut created = Vec::new();
    for _ in 0..20 {
        let e = world.create_entity().unwrap();
        world.add_component(e, POSITION, &[], true).unwrap();
        created.push(e);
    }

    let curr = world.current_event_index();
    world.refresh_query(&def, &mut instance);
    let window = QueryWindow {
        prev_event_index: 0,
        curr_event_index: curr,
        partitioned: false,
        thread_index: 0,
        thread_count: 1,
    };

    let mut current = instance.current(&window, false);
    current.sort_unstable();
    let mut expected: Vec<u32> = created.iter().map(|e| e.index).collect();
    expected.sort_unstable();
    assert_eq!(current, expected, "cache rebuild from the entity table recovers full membership");
}
