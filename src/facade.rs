//! Read-only query surface over host entities, as seen from one avatar.
//!
//! Wrappers hold an entity id plus the shared [`ApiContext`] and resolve the
//! snapshot on every access. Building a wrapper never fails; a query against a
//! missing entity fails with [`ApiError::EntityGone`] each time it is made.
//! Privileged queries consult the [`CapabilityGate`] and read as absent when
//! denied.

use glam::{Vec2, Vec3};
use rhai::Dynamic;
use std::cell::Cell;
use std::rc::Rc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::StoreDirectory;
use crate::trust::{CapabilityGate, TrustSetting};
use crate::world::{EntityKind, EntitySnapshot, ItemStack, LivingState, PlayerState, StatusFlags, WorldLink, WorldView};

/// Everything a facade query needs besides the entity id.
pub struct ApiContext {
    owner: Uuid,
    gate: CapabilityGate,
    world: WorldLink,
    stores: StoreDirectory,
    player_seen: Cell<bool>,
}

impl ApiContext {
    pub fn new(owner: Uuid, gate: CapabilityGate, world: WorldLink, stores: StoreDirectory) -> Self {
        Self { owner, gate, world, stores, player_seen: Cell::new(false) }
    }

    /// Identity of the avatar's owner; trust lookups and the own-player wrapper key off it.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    pub fn world(&self) -> &WorldLink {
        &self.world
    }

    pub fn stores(&self) -> &StoreDirectory {
        &self.stores
    }

    pub fn player_seen(&self) -> bool {
        self.player_seen.get()
    }

    pub fn mark_player_seen(&self) {
        self.player_seen.set(true);
    }

    /// Gated reads call this and turn a denial into an absent value.
    pub fn require(&self, setting: TrustSetting) -> ApiResult<()> {
        if self.gate.allows(self.owner, setting) {
            Ok(())
        } else {
            Err(ApiError::CapabilityDenied(setting.key()))
        }
    }

    pub fn allows(&self, setting: TrustSetting) -> bool {
        match self.require(setting) {
            Ok(()) => true,
            Err(denied) => {
                log::debug!("[trust] {denied} for {}", self.owner);
                false
            }
        }
    }

    pub fn world_name(&self) -> Option<String> {
        self.world.with(|view| view.world_name().to_string())
    }

    pub fn entity_exists(&self, id: Uuid) -> bool {
        self.world.with(|view| view.entity(id).is_some()).unwrap_or(false)
    }
}

/// Stable id plus resolver; never a live reference into the host.
#[derive(Clone)]
pub struct EntityHandle {
    id: Uuid,
    ctx: Rc<ApiContext>,
}

impl EntityHandle {
    pub fn new(id: Uuid, ctx: Rc<ApiContext>) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &Rc<ApiContext> {
        &self.ctx
    }

    fn is_own_player(&self) -> bool {
        self.id == self.ctx.owner
    }

    /// Resolves the snapshot and runs `f` against it.
    pub fn read<R>(&self, f: impl FnOnce(&EntitySnapshot, &dyn WorldView) -> R) -> ApiResult<R> {
        let resolved = self.ctx.world.with(|view| view.entity(self.id).map(|entity| f(entity, view))).flatten();
        resolved.ok_or_else(|| self.missing())
    }

    fn missing(&self) -> ApiError {
        if self.is_own_player() && !self.ctx.player_seen() {
            ApiError::NotYetAvailable { what: "player", retry_in: "player_init" }
        } else {
            ApiError::EntityGone(self.id)
        }
    }

    fn read_living<R>(&self, f: impl FnOnce(&LivingState) -> R) -> ApiResult<R> {
        self.read(|entity, _| entity.kind.living().map(f))?.ok_or(ApiError::EntityGone(self.id))
    }

    fn read_player<R>(&self, f: impl FnOnce(&EntitySnapshot, &PlayerState) -> R) -> ApiResult<R> {
        self.read(|entity, _| entity.kind.player().map(|player| f(entity, player)))?
            .ok_or(ApiError::EntityGone(self.id))
    }

    fn flag(&self, flag: StatusFlags) -> ApiResult<bool> {
        self.read(|entity, _| entity.flags.contains(flag))
    }
}

/// Queries available on every entity.
pub trait EntityQueries {
    fn handle(&self) -> &EntityHandle;

    /// Position interpolated between the previous and current tick by `delta` in `[0, 1]`.
    fn position(&self, delta: f32) -> ApiResult<Vec3> {
        let t = delta.clamp(0.0, 1.0);
        self.handle().read(|entity, _| entity.prev_position.lerp(entity.position, t))
    }

    /// Pitch/yaw in degrees, interpolated like [`EntityQueries::position`].
    fn rotation(&self, delta: f32) -> ApiResult<Vec2> {
        let t = delta.clamp(0.0, 1.0);
        self.handle().read(|entity, _| entity.prev_rotation.lerp(entity.rotation, t))
    }

    fn velocity(&self) -> ApiResult<Vec3> {
        self.handle().read(|entity, _| entity.position - entity.prev_position)
    }

    fn look_dir(&self) -> ApiResult<Vec3> {
        self.handle().read(|entity, _| look_direction(entity.rotation))
    }

    fn uuid(&self) -> ApiResult<String> {
        self.handle().read(|entity, _| entity.id.to_string())
    }

    fn entity_type(&self) -> ApiResult<String> {
        self.handle().read(|entity, _| entity.type_id.clone())
    }

    fn name(&self) -> ApiResult<String> {
        self.handle().read(|entity, _| entity.custom_name.clone().unwrap_or_else(|| entity.name.clone()))
    }

    fn fire_ticks(&self) -> ApiResult<i32> {
        self.handle().read(|entity, _| entity.fire_ticks)
    }

    fn frozen_ticks(&self) -> ApiResult<i32> {
        self.handle().read(|entity, _| entity.frozen_ticks)
    }

    fn air(&self) -> ApiResult<i32> {
        self.handle().read(|entity, _| entity.air)
    }

    fn max_air(&self) -> ApiResult<i32> {
        self.handle().read(|entity, _| entity.max_air)
    }

    fn air_percentage(&self) -> ApiResult<f32> {
        self.handle().read(|entity, _| if entity.max_air > 0 { entity.air as f32 / entity.max_air as f32 } else { 0.0 })
    }

    fn world_name(&self) -> ApiResult<String> {
        self.handle().read(|_, view| view.world_name().to_string())
    }

    /// Equipment by 1-based slot; out of range or empty reads as absent.
    fn equipment_item(&self, slot: i64) -> ApiResult<Option<ItemStack>> {
        self.handle().read(|entity, _| {
            let index = usize::try_from(slot).ok()?.checked_sub(1)?;
            entity.equipment.get(index)?.as_ref().filter(|item| !item.is_empty()).cloned()
        })
    }

    fn pose(&self) -> ApiResult<Option<String>> {
        self.handle().read(|entity, _| entity.pose.clone())
    }

    fn vehicle(&self) -> ApiResult<Option<EntityApi>> {
        let vehicle = self.handle().read(|entity, _| entity.vehicle)?;
        Ok(vehicle.map(|id| EntityApi::wrap(id, self.handle().context())))
    }

    fn eye_height(&self) -> ApiResult<f32> {
        self.handle().read(|entity, _| entity.eye_height)
    }

    fn eye_y(&self) -> ApiResult<f32> {
        self.handle().read(|entity, _| entity.position.y + entity.eye_height)
    }

    /// Width, height, width.
    fn bounding_box(&self) -> ApiResult<Vec3> {
        self.handle().read(|entity, _| Vec3::new(entity.dimensions.x, entity.dimensions.y, entity.dimensions.x))
    }

    fn is_on_ground(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::ON_GROUND)
    }

    fn is_wet(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::WET)
    }

    fn is_in_water(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::TOUCHING_WATER)
    }

    fn is_underwater(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::UNDERWATER)
    }

    fn is_in_lava(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::IN_LAVA)
    }

    fn is_in_rain(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::IN_RAIN)
    }

    fn is_sprinting(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::SPRINTING)
    }

    fn is_sneaking(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::SNEAKING)
    }

    fn is_sneaky(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::SNEAKY)
    }

    fn is_glowing(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::GLOWING)
    }

    fn is_invisible(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::INVISIBLE)
    }

    fn is_silent(&self) -> ApiResult<bool> {
        self.handle().flag(StatusFlags::SILENT)
    }

    fn has_avatar(&self) -> ApiResult<bool> {
        let handle = self.handle();
        handle.read(|_, _| ())?;
        Ok(handle.context().stores().has_avatar(handle.id()))
    }

    /// Dotted-path lookup into persisted state. Absent paths and denied access both read as `None`.
    fn nbt_value(&self, path: &str) -> ApiResult<Option<serde_json::Value>> {
        let handle = self.handle();
        let value = handle.read(|entity, _| lookup_path(&entity.persisted, path).cloned())?;
        if !handle.context().allows(TrustSetting::NbtAccess) {
            return Ok(None);
        }
        Ok(value)
    }
}

/// Queries added by living entities.
pub trait LivingQueries: EntityQueries {
    fn health(&self) -> ApiResult<f32> {
        self.handle().read_living(|living| living.health)
    }

    fn max_health(&self) -> ApiResult<f32> {
        self.handle().read_living(|living| living.max_health)
    }

    fn health_percentage(&self) -> ApiResult<f32> {
        self.handle()
            .read_living(|living| if living.max_health > 0.0 { living.health / living.max_health } else { 0.0 })
    }

    fn armor(&self) -> ApiResult<i32> {
        self.handle().read_living(|living| living.armor)
    }

    fn death_time(&self) -> ApiResult<i32> {
        self.handle().read_living(|living| living.death_time)
    }

    fn body_yaw(&self) -> ApiResult<f32> {
        self.handle().read_living(|living| living.body_yaw)
    }

    fn status_effects(&self) -> ApiResult<Vec<String>> {
        self.handle().read_living(|living| living.status_effects.clone())
    }
}

#[derive(Clone)]
pub struct EntityRef {
    handle: EntityHandle,
}

#[derive(Clone)]
pub struct LivingEntityRef {
    handle: EntityHandle,
}

#[derive(Clone)]
pub struct PlayerEntityRef {
    handle: EntityHandle,
}

impl EntityQueries for EntityRef {
    fn handle(&self) -> &EntityHandle {
        &self.handle
    }
}

impl EntityQueries for LivingEntityRef {
    fn handle(&self) -> &EntityHandle {
        &self.handle
    }
}

impl LivingQueries for LivingEntityRef {}

impl EntityQueries for PlayerEntityRef {
    fn handle(&self) -> &EntityHandle {
        &self.handle
    }
}

impl LivingQueries for PlayerEntityRef {}

impl PlayerEntityRef {
    pub fn new(handle: EntityHandle) -> Self {
        Self { handle }
    }

    /// 1 is the main hand, 2 the off hand; anything else or an empty hand is absent.
    pub fn held_item(&self, hand: i64) -> ApiResult<Option<ItemStack>> {
        self.handle.read_player(|_, player| {
            let item = match hand {
                1 => player.main_hand.as_ref(),
                2 => player.off_hand.as_ref(),
                _ => None,
            };
            item.filter(|item| !item.is_empty()).cloned()
        })
    }

    pub fn food(&self) -> ApiResult<i32> {
        self.handle.read_player(|_, player| player.food)
    }

    pub fn saturation(&self) -> ApiResult<f32> {
        self.handle.read_player(|_, player| player.saturation)
    }

    pub fn experience_progress(&self) -> ApiResult<f32> {
        self.handle.read_player(|_, player| player.experience_progress)
    }

    pub fn experience_level(&self) -> ApiResult<i32> {
        self.handle.read_player(|_, player| player.experience_level)
    }

    pub fn model_type(&self) -> ApiResult<String> {
        self.handle.read_player(|_, player| player.model_type.clone())
    }

    pub fn game_mode(&self) -> ApiResult<Option<String>> {
        self.handle.read_player(|_, player| player.game_mode.clone())
    }

    pub fn is_flying(&self) -> ApiResult<bool> {
        self.handle.read_player(|_, player| player.flying)
    }

    /// Entity under this player's look ray. Only the avatar owner's own player can ask.
    pub fn targeted_entity(&self) -> ApiResult<Option<EntityApi>> {
        let target = self.handle.read(|_, view| view.targeted_entity(self.handle.id))?;
        if !self.handle.is_own_player() || !self.handle.ctx.allows(TrustSetting::EntityTargeting) {
            return Ok(None);
        }
        let Some(target) = target else {
            return Ok(None);
        };
        let visible = self
            .handle
            .ctx
            .world
            .with(|view| view.entity(target).map_or(false, |entity| !entity.flags.contains(StatusFlags::INVISIBLE)))
            .unwrap_or(false);
        Ok(visible.then(|| EntityApi::wrap(target, &self.handle.ctx)))
    }

    pub fn last_damage_source(&self) -> ApiResult<Option<String>> {
        self.handle.read(|_, _| ())?;
        Ok(self.handle.ctx.stores.last_damage_source(self.handle.id))
    }

    /// A value from this player's avatar store.
    pub fn stored_value(&self, key: &str) -> ApiResult<Option<Dynamic>> {
        self.handle.read(|_, _| ())?;
        if !self.handle.ctx.allows(TrustSetting::SharedValues) {
            return Ok(None);
        }
        Ok(self.handle.ctx.stores.stored_value(self.handle.id, key))
    }
}

/// Capability set chosen once from the entity's runtime kind.
#[derive(Clone)]
pub enum EntityApi {
    Entity(EntityRef),
    Living(LivingEntityRef),
    Player(PlayerEntityRef),
}

impl EntityApi {
    /// Wraps `id` according to its current kind. Unknown entities wrap as plain
    /// entities, except the owner's own player which is always a player.
    pub fn wrap(id: Uuid, ctx: &Rc<ApiContext>) -> Self {
        let handle = EntityHandle::new(id, Rc::clone(ctx));
        let kind = ctx.world.with(|view| view.entity(id).map(|entity| discriminant(&entity.kind))).flatten();
        match kind {
            Some(KindTag::Player) => EntityApi::Player(PlayerEntityRef { handle }),
            Some(KindTag::Living) => EntityApi::Living(LivingEntityRef { handle }),
            Some(KindTag::Entity) => EntityApi::Entity(EntityRef { handle }),
            None if id == ctx.owner => EntityApi::Player(PlayerEntityRef { handle }),
            None => EntityApi::Entity(EntityRef { handle }),
        }
    }

    pub fn handle(&self) -> &EntityHandle {
        match self {
            EntityApi::Entity(inner) => &inner.handle,
            EntityApi::Living(inner) => &inner.handle,
            EntityApi::Player(inner) => &inner.handle,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityApi::Entity(_) => "entity",
            EntityApi::Living(_) => "living_entity",
            EntityApi::Player(_) => "player_entity",
        }
    }

    pub fn into_dynamic(self) -> Dynamic {
        match self {
            EntityApi::Entity(inner) => Dynamic::from(inner),
            EntityApi::Living(inner) => Dynamic::from(inner),
            EntityApi::Player(inner) => Dynamic::from(inner),
        }
    }
}

#[derive(Clone, Copy)]
enum KindTag {
    Entity,
    Living,
    Player,
}

fn discriminant(kind: &EntityKind) -> KindTag {
    match kind {
        EntityKind::Entity => KindTag::Entity,
        EntityKind::Living { .. } => KindTag::Living,
        EntityKind::Player { .. } => KindTag::Player,
    }
}

/// Unit vector for a pitch/yaw pair in degrees, yaw 0 facing +Z.
pub fn look_direction(rotation: Vec2) -> Vec3 {
    let pitch = rotation.x.to_radians();
    let yaw = -rotation.y.to_radians();
    let (sin_yaw, cos_yaw) = yaw.sin_cos();
    let (sin_pitch, cos_pitch) = pitch.sin_cos();
    Vec3::new(sin_yaw * cos_pitch, -sin_pitch, cos_yaw * cos_pitch)
}

/// Walks `root` by `.`-separated keys; numeric segments index into arrays.
pub fn lookup_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |node, segment| match node {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}
