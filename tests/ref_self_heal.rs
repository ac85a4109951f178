//! spec.md §8: a `ref` field pointing at an entity that gets removed,
//! reclaimed, and whose slot is reused by a new entity must read back as
//! `null` rather than resolve to the new, unrelated entity.

use sparseworld::{
    Context, ColumnDef, EntityId, FieldDef, FieldValue, MainThreadSystem, Schema, World, WorldOptions,
};

const OWNER: u16 = 0;

fn owner_def() -> ColumnDef {
    ColumnDef {
        component_id: OWNER,
        name: "Owner".into(),
        schema: Schema::new(vec![("target".into(), FieldDef::Ref)]).unwrap(),
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
fn stale_ref_self_heals_after_reclamation_and_slot_reuse() {
    let mut world = World::new(vec![owner_def()], WorldOptions::default()).unwrap();
    let tick = noop_system("tick");

    let target = world.create_entity().unwrap();
    let owner = world.create_entity().unwrap();
    world.add_component(owner, OWNER, &[], true).unwrap();
    world
        .write_field(owner, OWNER, "target", FieldValue::Ref(Some(target.pack())))
        .unwrap();

    assert_eq!(world.read_ref(owner, OWNER, "target").unwrap(), Some(target));

    world.remove_entity(target).unwrap();
    for _ in 0..4 {
        world.execute(&[], std::slice::from_ref(&tick), &[]).unwrap();
        world.sync();
    }

    let replacement = world.create_entity().unwrap();
    assert_eq!(replacement.index, target.index, "slot reused after reclamation");
    assert_ne!(replacement.generation, target.generation);

    let resolved: Option<EntityId> = world.read_ref(owner, OWNER, "target").unwrap();
    assert_eq!(resolved, None, "stale ref self-heals to null rather than aliasing the new entity");
}
