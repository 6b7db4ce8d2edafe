use std::rc::Rc;

use glam::{Vec2, Vec3};
use marionette::error::ApiError;
use marionette::facade::{ApiContext, EntityApi, EntityHandle, EntityQueries, LivingQueries, PlayerEntityRef};
use marionette::store::StoreDirectory;
use marionette::trust::{CapabilityGate, SettingValue, TrustContainer, TrustRegistry, TrustSetting};
use marionette::world::{EntityKind, EntitySnapshot, ItemStack, StatusFlags, WorldLink, WorldSnapshot, WorldView};
use uuid::Uuid;

fn context(owner: Uuid, container: TrustContainer) -> Rc<ApiContext> {
    let mut registry = TrustRegistry::new();
    registry.insert(owner, container);
    Rc::new(ApiContext::new(owner, CapabilityGate::new(registry), WorldLink::new(), StoreDirectory::new()))
}

fn in_world<R>(ctx: &Rc<ApiContext>, world: WorldSnapshot, f: impl FnOnce() -> R) -> R {
    let view: Rc<dyn WorldView> = Rc::new(world);
    ctx.world().scoped(view, f)
}

fn player_of(ctx: &Rc<ApiContext>, id: Uuid) -> PlayerEntityRef {
    PlayerEntityRef::new(EntityHandle::new(id, Rc::clone(ctx)))
}

#[test]
fn every_query_on_a_gone_entity_fails() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let cow = Uuid::new_v4();
    let mut world = WorldSnapshot::new("overworld");
    world.insert(EntitySnapshot::living(cow));
    let wrapper = in_world(&ctx, world.clone(), || EntityApi::wrap(cow, &ctx));
    let EntityApi::Living(living) = wrapper else {
        panic!("cow should wrap as a living entity");
    };

    world.remove(cow);
    in_world(&ctx, world, || {
        for _ in 0..2 {
            assert_eq!(living.health(), Err(ApiError::EntityGone(cow)));
            assert_eq!(living.position(1.0), Err(ApiError::EntityGone(cow)));
            assert_eq!(living.is_sneaking(), Err(ApiError::EntityGone(cow)));
            assert_eq!(living.nbt_value("Health"), Err(ApiError::EntityGone(cow)));
        }
    });
}

#[test]
fn queries_without_an_installed_world_fail() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let other = Uuid::new_v4();
    let player = player_of(&ctx, other);
    assert_eq!(player.food(), Err(ApiError::EntityGone(other)));
}

#[test]
fn own_player_reports_not_yet_available_before_player_init() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let player = player_of(&ctx, owner);
    let err = in_world(&ctx, WorldSnapshot::new("lobby"), || player.health()).expect_err("not loaded yet");
    assert!(matches!(err, ApiError::NotYetAvailable { what: "player", retry_in: "player_init" }));
}

#[test]
fn positions_and_rotations_interpolate_between_ticks() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let mut snapshot = EntitySnapshot::player(owner);
    snapshot.prev_position = Vec3::new(0.0, 64.0, 0.0);
    snapshot.position = Vec3::new(2.0, 64.0, -2.0);
    snapshot.prev_rotation = Vec2::new(0.0, 90.0);
    snapshot.rotation = Vec2::new(10.0, 180.0);
    let mut world = WorldSnapshot::new("overworld");
    world.insert(snapshot);

    let player = player_of(&ctx, owner);
    in_world(&ctx, world, || {
        assert_eq!(player.position(0.5), Ok(Vec3::new(1.0, 64.0, -1.0)));
        assert_eq!(player.position(7.0), Ok(Vec3::new(2.0, 64.0, -2.0)));
        assert_eq!(player.rotation(0.5), Ok(Vec2::new(5.0, 135.0)));
        assert_eq!(player.velocity(), Ok(Vec3::new(2.0, 0.0, -2.0)));
        assert_eq!(player.world_name(), Ok("overworld".to_string()));
    });
}

#[test]
fn held_items_and_equipment_use_one_based_slots() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let mut snapshot = EntitySnapshot::player(owner);
    if let EntityKind::Player { player, .. } = &mut snapshot.kind {
        player.main_hand = Some(ItemStack::new("minecraft:diamond_sword", 1));
        player.off_hand = Some(ItemStack::new("minecraft:air", 1));
    }
    snapshot.equipment = vec![Some(ItemStack::new("minecraft:iron_boots", 1)), None];
    let mut world = WorldSnapshot::new("overworld");
    world.insert(snapshot);

    let player = player_of(&ctx, owner);
    in_world(&ctx, world, || {
        let main = player.held_item(1).expect("main hand").expect("holding a sword");
        assert_eq!(main.id, "minecraft:diamond_sword");
        assert_eq!(player.held_item(2), Ok(None));
        assert_eq!(player.held_item(3), Ok(None));
        let boots = player.equipment_item(1).expect("slot 1").expect("boots equipped");
        assert_eq!(boots.id, "minecraft:iron_boots");
        assert_eq!(player.equipment_item(0), Ok(None));
        assert_eq!(player.equipment_item(2), Ok(None));
        assert_eq!(player.equipment_item(-4), Ok(None));
    });
}

#[test]
fn status_flags_map_to_predicates() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let mut snapshot = EntitySnapshot::player(owner);
    snapshot.flags = StatusFlags::SNEAKING | StatusFlags::UNDERWATER | StatusFlags::WET;
    let mut world = WorldSnapshot::new("overworld");
    world.insert(snapshot);
    let player = player_of(&ctx, owner);
    in_world(&ctx, world, || {
        assert_eq!(player.is_sneaking(), Ok(true));
        assert_eq!(player.is_underwater(), Ok(true));
        assert_eq!(player.is_wet(), Ok(true));
        assert_eq!(player.is_sprinting(), Ok(false));
        assert_eq!(player.is_in_lava(), Ok(false));
    });
}

#[test]
fn targeting_requires_trust_and_a_visible_target() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let (visible, hidden) = (Uuid::new_v4(), Uuid::new_v4());
    let mut world = WorldSnapshot::new("overworld");
    world.insert(EntitySnapshot::player(owner));
    world.insert(EntitySnapshot::living(visible));
    let mut ghost = EntitySnapshot::living(hidden);
    ghost.flags = StatusFlags::INVISIBLE;
    world.insert(ghost);
    world.set_target(owner, Some(visible));

    let player = player_of(&ctx, owner);
    let target = in_world(&ctx, world.clone(), || player.targeted_entity()).expect("query succeeds");
    assert_eq!(target.map(|entity| entity.handle().id()), Some(visible));

    world.set_target(owner, Some(hidden));
    let target = in_world(&ctx, world.clone(), || player.targeted_entity()).expect("query succeeds");
    assert!(target.is_none());

    world.set_target(owner, Some(visible));
    ctx.gate()
        .registry_mut()
        .container_mut(owner)
        .expect("container")
        .set(TrustSetting::EntityTargeting, SettingValue::Bool(false));
    let target = in_world(&ctx, world, || player.targeted_entity()).expect("denied reads as absent");
    assert!(target.is_none());
}

#[test]
fn other_players_cannot_be_asked_for_their_target() {
    let owner = Uuid::new_v4();
    let ctx = context(owner, TrustContainer::trusted(1_000));
    let (stranger, cow) = (Uuid::new_v4(), Uuid::new_v4());
    let mut world = WorldSnapshot::new("overworld");
    world.insert(EntitySnapshot::player(stranger));
    world.insert(EntitySnapshot::living(cow));
    world.set_target(stranger, Some(cow));
    let other = player_of(&ctx, stranger);
    let target = in_world(&ctx, world, || other.targeted_entity()).expect("query succeeds");
    assert!(target.is_none());
}

#[test]
fn unknown_identities_get_the_most_restrictive_answers() {
    let owner = Uuid::new_v4();
    let ctx = Rc::new(ApiContext::new(
        owner,
        CapabilityGate::new(TrustRegistry::new()),
        WorldLink::new(),
        StoreDirectory::new(),
    ));
    assert!(!ctx.allows(TrustSetting::NbtAccess));
    assert!(!ctx.allows(TrustSetting::VanillaModifications));
    assert_eq!(ctx.gate().operation_budget(owner), 0);

    let mut entity = EntitySnapshot::new(Uuid::new_v4(), EntityKind::Entity);
    entity.persisted = serde_json::json!({ "Motion": [0.0, 1.0, 0.0] });
    let id = entity.id;
    let mut world = WorldSnapshot::new("overworld");
    world.insert(entity);
    let wrapper = in_world(&ctx, world.clone(), || EntityApi::wrap(id, &ctx));
    let value = in_world(&ctx, world, || match &wrapper {
        EntityApi::Entity(plain) => plain.nbt_value("Motion.1"),
        _ => panic!("expected a plain entity"),
    });
    assert_eq!(value, Ok(None));
}
