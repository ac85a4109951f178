//! spec.md §8: removing an entity must not reuse its index until every
//! live system has executed past the removal by the reclamation delay.

use sparseworld::{ColumnDef, Context, FieldDef, MainThreadSystem, NumberType, Schema, World, WorldOptions};

fn position_def() -> ColumnDef {
    ColumnDef {
        component_id: 0,
        name: "Position".into(),
        schema: Schema::new(vec![("x".into(), FieldDef::Number(NumberType::F32))]).unwrap(),
        is_singleton: false,
    }
}

fn noop_system(id: &str) -> MainThreadSystem {
    MainThreadSystem {
        id: id.into(),
        func: std::sync::Arc::new(|_ctx: &Context| {}),
    }
}

#[test]
fn reused_index_keeps_old_handle_dead_until_reclamation_delay_elapses() {
    let mut world = World::new(vec![position_def()], WorldOptions::default()).unwrap();
    let movement = noop_system("movement");

    let e = world.create_entity().unwrap();
    world.add_component(e, 0, &[], true).unwrap();
    world.remove_entity(e).unwrap();

    // Two executions + syncs: not yet enough to pass the watermark.
    for _ in 0..2 {
        world.execute(&[], std::slice::from_ref(&movement), &[]).unwrap();
        world.sync();
    }
    assert!(!world.is_alive(e));

    // One more cycle crosses the reclamation delay; the slot recycles.
    world.execute(&[], std::slice::from_ref(&movement), &[]).unwrap();
    world.sync();

    let new_entity = world.create_entity().unwrap();
    assert_eq!(new_entity.index, e.index, "slot is recycled after the delay");
    assert_ne!(new_entity.generation, e.generation, "generation bumped on reuse");
    assert!(!world.is_alive(e), "old handle must never resolve to the new entity");
    assert!(world.is_alive(new_entity));
}
