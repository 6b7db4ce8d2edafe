//! Host-side view of entity and world state.
//!
//! The host owns the simulation; this module only describes the snapshot the
//! core reads from. Queries never hold on to a [`WorldView`] past the lifecycle
//! call it was installed for.

use bitflags::bitflags;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use uuid::Uuid;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusFlags: u32 {
        const ON_GROUND = 1 << 0;
        const WET = 1 << 1;
        const TOUCHING_WATER = 1 << 2;
        const UNDERWATER = 1 << 3;
        const IN_LAVA = 1 << 4;
        const IN_RAIN = 1 << 5;
        const SPRINTING = 1 << 6;
        const SNEAKING = 1 << 7;
        const SNEAKY = 1 << 8;
        const GLOWING = 1 << 9;
        const INVISIBLE = 1 << 10;
        const SILENT = 1 << 11;
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub id: String,
    #[serde(default = "ItemStack::default_count")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<serde_json::Value>,
}

impl ItemStack {
    const fn default_count() -> u32 {
        1
    }

    pub fn new(id: impl Into<String>, count: u32) -> Self {
        Self { id: id.into(), count, tag: None }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.id.is_empty() || self.id == "minecraft:air"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivingState {
    pub health: f32,
    pub max_health: f32,
    #[serde(default)]
    pub armor: i32,
    #[serde(default)]
    pub death_time: i32,
    #[serde(default)]
    pub body_yaw: f32,
    #[serde(default)]
    pub status_effects: Vec<String>,
}

impl Default for LivingState {
    fn default() -> Self {
        Self { health: 20.0, max_health: 20.0, armor: 0, death_time: 0, body_yaw: 0.0, status_effects: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub main_hand: Option<ItemStack>,
    #[serde(default)]
    pub off_hand: Option<ItemStack>,
    #[serde(default = "PlayerState::default_food")]
    pub food: i32,
    #[serde(default)]
    pub saturation: f32,
    #[serde(default)]
    pub experience_progress: f32,
    #[serde(default)]
    pub experience_level: i32,
    #[serde(default = "PlayerState::default_model_type")]
    pub model_type: String,
    #[serde(default)]
    pub game_mode: Option<String>,
    #[serde(default)]
    pub flying: bool,
}

impl PlayerState {
    const fn default_food() -> i32 {
        20
    }

    fn default_model_type() -> String {
        "default".to_string()
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            main_hand: None,
            off_hand: None,
            food: Self::default_food(),
            saturation: 5.0,
            experience_progress: 0.0,
            experience_level: 0,
            model_type: Self::default_model_type(),
            game_mode: None,
            flying: false,
        }
    }
}

/// Runtime kind of an entity; decides which query surface a wrapper exposes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Entity,
    Living { living: LivingState },
    Player { living: LivingState, player: PlayerState },
}

impl EntityKind {
    pub fn living(&self) -> Option<&LivingState> {
        match self {
            EntityKind::Entity => None,
            EntityKind::Living { living } | EntityKind::Player { living, .. } => Some(living),
        }
    }

    pub fn player(&self) -> Option<&PlayerState> {
        match self {
            EntityKind::Player { player, .. } => Some(player),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Entity => "entity",
            EntityKind::Living { .. } => "living_entity",
            EntityKind::Player { .. } => "player_entity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: Uuid,
    #[serde(default = "EntitySnapshot::default_type_id")]
    pub type_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub prev_position: Vec3,
    /// Pitch (x) and yaw (y) in degrees.
    #[serde(default)]
    pub rotation: Vec2,
    #[serde(default)]
    pub prev_rotation: Vec2,
    #[serde(default)]
    pub flags: StatusFlags,
    #[serde(default)]
    pub fire_ticks: i32,
    #[serde(default)]
    pub frozen_ticks: i32,
    #[serde(default = "EntitySnapshot::default_air")]
    pub air: i32,
    #[serde(default = "EntitySnapshot::default_air")]
    pub max_air: i32,
    #[serde(default)]
    pub pose: Option<String>,
    #[serde(default)]
    pub vehicle: Option<Uuid>,
    #[serde(default = "EntitySnapshot::default_eye_height")]
    pub eye_height: f32,
    /// Width (x) and height (y) of the bounding box.
    #[serde(default = "EntitySnapshot::default_dimensions")]
    pub dimensions: Vec2,
    #[serde(default)]
    pub equipment: Vec<Option<ItemStack>>,
    #[serde(default)]
    pub persisted: serde_json::Value,
    #[serde(flatten)]
    pub kind: EntityKind,
}

impl EntitySnapshot {
    fn default_type_id() -> String {
        "minecraft:pig".to_string()
    }

    const fn default_air() -> i32 {
        300
    }

    const fn default_eye_height() -> f32 {
        1.62
    }

    fn default_dimensions() -> Vec2 {
        Vec2::new(0.6, 1.8)
    }

    pub fn new(id: Uuid, kind: EntityKind) -> Self {
        Self {
            id,
            type_id: match kind {
                EntityKind::Player { .. } => "minecraft:player".to_string(),
                _ => Self::default_type_id(),
            },
            name: String::new(),
            custom_name: None,
            position: Vec3::ZERO,
            prev_position: Vec3::ZERO,
            rotation: Vec2::ZERO,
            prev_rotation: Vec2::ZERO,
            flags: StatusFlags::empty(),
            fire_ticks: 0,
            frozen_ticks: 0,
            air: Self::default_air(),
            max_air: Self::default_air(),
            pose: None,
            vehicle: None,
            eye_height: Self::default_eye_height(),
            dimensions: Self::default_dimensions(),
            equipment: Vec::new(),
            persisted: serde_json::Value::Null,
            kind,
        }
    }

    pub fn player(id: Uuid) -> Self {
        Self::new(id, EntityKind::Player { living: LivingState::default(), player: PlayerState::default() })
    }

    pub fn living(id: Uuid) -> Self {
        Self::new(id, EntityKind::Living { living: LivingState::default() })
    }
}

pub trait WorldView {
    fn world_name(&self) -> &str;

    fn entity(&self, id: Uuid) -> Option<&EntitySnapshot>;

    /// Entity under the viewer's own look ray, if the host tracks one.
    fn targeted_entity(&self, viewer: Uuid) -> Option<Uuid>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    #[serde(default = "WorldSnapshot::default_name")]
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntitySnapshot>,
    #[serde(default)]
    pub targets: HashMap<Uuid, Uuid>,
    #[serde(skip)]
    index: HashMap<Uuid, usize>,
}

impl WorldSnapshot {
    fn default_name() -> String {
        "minecraft:overworld".to_string()
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn insert(&mut self, entity: EntitySnapshot) {
        match self.index.get(&entity.id) {
            Some(&slot) => self.entities[slot] = entity,
            None => {
                self.index.insert(entity.id, self.entities.len());
                self.entities.push(entity);
            }
        }
    }

    pub fn remove(&mut self, id: Uuid) -> Option<EntitySnapshot> {
        let slot = self.index.remove(&id)?;
        let removed = self.entities.remove(slot);
        self.reindex();
        Some(removed)
    }

    pub fn entity_mut(&mut self, id: Uuid) -> Option<&mut EntitySnapshot> {
        let slot = *self.index.get(&id)?;
        self.entities.get_mut(slot)
    }

    pub fn set_target(&mut self, viewer: Uuid, target: Option<Uuid>) {
        match target {
            Some(target) => {
                self.targets.insert(viewer, target);
            }
            None => {
                self.targets.remove(&viewer);
            }
        }
    }

    /// Rebuilds the id lookup; call after deserialising a snapshot.
    pub fn reindex(&mut self) {
        self.index = self.entities.iter().enumerate().map(|(slot, entity)| (entity.id, slot)).collect();
    }
}

impl WorldView for WorldSnapshot {
    fn world_name(&self) -> &str {
        &self.name
    }

    fn entity(&self, id: Uuid) -> Option<&EntitySnapshot> {
        match self.index.get(&id) {
            Some(&slot) => self.entities.get(slot),
            None => self.entities.iter().find(|entity| entity.id == id),
        }
    }

    fn targeted_entity(&self, viewer: Uuid) -> Option<Uuid> {
        self.targets.get(&viewer).copied()
    }
}

/// Frame-scoped slot holding the world view for the call in progress.
#[derive(Clone, Default)]
pub struct WorldLink {
    current: Rc<RefCell<Option<Rc<dyn WorldView>>>>,
}

impl WorldLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, view: Rc<dyn WorldView>) {
        *self.current.borrow_mut() = Some(view);
    }

    pub fn clear(&self) {
        self.current.borrow_mut().take();
    }

    pub fn is_installed(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Runs `f` against the installed view; `None` when nothing is installed.
    pub fn with<R>(&self, f: impl FnOnce(&dyn WorldView) -> R) -> Option<R> {
        let view = self.current.borrow().clone()?;
        Some(f(view.as_ref()))
    }

    pub fn scoped<R>(&self, view: Rc<dyn WorldView>, f: impl FnOnce() -> R) -> R {
        self.install(view);
        let result = f();
        self.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialises_tagged_kinds() {
        let json = serde_json::json!({
            "id": "7d444840-9dc0-11d1-b245-5ffdce74fad2",
            "kind": "player",
            "living": { "health": 12.0, "max_health": 20.0 },
            "player": { "food": 7 },
            "flags": "SNEAKING | ON_GROUND"
        });
        let snapshot: EntitySnapshot = serde_json::from_value(json).expect("snapshot should parse");
        assert_eq!(snapshot.kind.label(), "player_entity");
        assert_eq!(snapshot.kind.player().map(|p| p.food), Some(7));
        assert!(snapshot.flags.contains(StatusFlags::SNEAKING | StatusFlags::ON_GROUND));
    }

    #[test]
    fn link_resolves_only_while_installed() {
        let id = Uuid::new_v4();
        let mut world = WorldSnapshot::new("test");
        world.insert(EntitySnapshot::living(id));
        let link = WorldLink::new();
        assert!(link.with(|view| view.entity(id).is_some()).is_none());
        let seen = link.scoped(Rc::new(world), || link.with(|view| view.entity(id).is_some()));
        assert_eq!(seen, Some(true));
        assert!(!link.is_installed());
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut world = WorldSnapshot::new("test");
        world.insert(EntitySnapshot::living(a));
        world.insert(EntitySnapshot::living(b));
        world.insert(EntitySnapshot::living(c));
        assert!(world.remove(a).is_some());
        assert_eq!(world.entity(c).map(|e| e.id), Some(c));
        assert!(world.entity(a).is_none());
    }
}
