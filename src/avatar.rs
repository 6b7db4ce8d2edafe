use anyhow::{bail, Result};
use indexmap::IndexMap;
use rhai::Dynamic;
use std::cell::{Ref, RefCell};
use std::rc::Rc;
use uuid::Uuid;

use crate::animation::{self, Model, PartPose};
use crate::config::RuntimeConfig;
use crate::events::{AvatarEvent, EventBus};
use crate::facade::ApiContext;
use crate::scripts::{CallStatus, ScriptFault, ScriptHost, ScriptSource};
use crate::store::StoreDirectory;
use crate::trust::{CapabilityGate, TrustSetting};
use crate::world::{WorldLink, WorldView};

/// One owner's model, animation tracks and optional script.
pub struct Avatar {
    ctx: Rc<ApiContext>,
    model: Rc<RefCell<Model>>,
    script: ScriptHost,
}

impl Avatar {
    pub fn owner(&self) -> Uuid {
        self.ctx.owner()
    }

    pub fn model(&self) -> Ref<'_, Model> {
        self.model.borrow()
    }

    pub fn script(&self) -> &ScriptHost {
        &self.script
    }

    pub fn poses(&self) -> Vec<(String, PartPose)> {
        self.model.borrow().poses().into_iter().map(|(name, pose)| (name.to_string(), pose)).collect()
    }

    fn withhold_pose(&self) {
        self.model.borrow_mut().reset_pose();
    }

    /// Pose deltas reach the host only when the script is healthy and vanilla edits are trusted.
    fn pose_allowed(&self, status: &CallStatus) -> bool {
        !status.is_fault() && !self.script.is_disabled() && self.ctx.allows(TrustSetting::VanillaModifications)
    }
}

/// Owns every live avatar and drives them through tick and render.
pub struct AvatarManager {
    config: RuntimeConfig,
    gate: CapabilityGate,
    world: WorldLink,
    stores: StoreDirectory,
    avatars: IndexMap<Uuid, Avatar>,
    events: EventBus,
}

impl AvatarManager {
    pub fn new(config: RuntimeConfig) -> Self {
        let gate = CapabilityGate::new(config.trust_registry());
        Self::with_gate(config, gate)
    }

    pub fn with_gate(config: RuntimeConfig, gate: CapabilityGate) -> Self {
        Self {
            config,
            gate,
            world: WorldLink::new(),
            stores: StoreDirectory::new(),
            avatars: IndexMap::new(),
            events: EventBus::default(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    pub fn stores(&self) -> &StoreDirectory {
        &self.stores
    }

    pub fn avatar(&self, owner: Uuid) -> Option<&Avatar> {
        self.avatars.get(&owner)
    }

    pub fn owners(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.avatars.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    pub fn create_avatar(&mut self, owner: Uuid, model: Model) -> Result<()> {
        if self.avatars.contains_key(&owner) {
            bail!("Avatar for {owner} already exists");
        }
        let ctx = Rc::new(ApiContext::new(owner, self.gate.clone(), self.world.clone(), self.stores.clone()));
        let model = Rc::new(RefCell::new(model));
        let script = ScriptHost::new(Rc::clone(&ctx), Rc::clone(&model), &self.config.sandbox, &self.config.faults);
        self.stores.register_avatar(owner);
        self.avatars.insert(owner, Avatar { ctx, model, script });
        log::info!("[avatar] created avatar for {owner}");
        Ok(())
    }

    /// Destroys the avatar, its script instance, store and tracks.
    pub fn destroy_avatar(&mut self, owner: Uuid) -> bool {
        let Some(mut avatar) = self.avatars.shift_remove(&owner) else {
            return false;
        };
        avatar.script.unload();
        self.events.extend(avatar.script.drain_events());
        self.stores.remove_avatar(owner);
        log::info!("[avatar] destroyed avatar for {owner}");
        true
    }

    pub fn load_script(&mut self, owner: Uuid, source: ScriptSource) -> Result<()> {
        let avatar = self.avatar_mut(owner)?;
        let result = avatar.script.load(source);
        let events = avatar.script.drain_events();
        self.events.extend(events);
        result
    }

    pub fn reload_script(&mut self, owner: Uuid) -> Result<()> {
        let avatar = self.avatar_mut(owner)?;
        let result = avatar.script.reload();
        let events = avatar.script.drain_events();
        self.events.extend(events);
        result
    }

    fn avatar_mut(&mut self, owner: Uuid) -> Result<&mut Avatar> {
        match self.avatars.get_mut(&owner) {
            Some(avatar) => Ok(avatar),
            None => bail!("No avatar registered for {owner}"),
        }
    }

    /// One simulation step: script `tick`, then animation advance and composition.
    pub fn tick(&mut self, world: Rc<dyn WorldView>, dt: f32) {
        let link = self.world.clone();
        link.scoped(world, || {
            for avatar in self.avatars.values_mut() {
                let owner = avatar.owner();
                if let Err(err) = avatar.script.reload_if_needed() {
                    log::warn!("[script] hot reload for {owner} failed: {err:#}");
                }
                if avatar.ctx.entity_exists(owner) {
                    avatar.ctx.mark_player_seen();
                }
                let status = avatar.script.tick();
                let finished = animation::step(&mut avatar.model.borrow_mut(), dt);
                for track in finished {
                    log::debug!("[animation] {owner} finished '{track}'");
                    self.events.push(AvatarEvent::TrackFinished { avatar: owner, track });
                }
                if !avatar.pose_allowed(&status) {
                    avatar.withhold_pose();
                }
                self.events.extend(avatar.script.drain_events());
            }
        });
    }

    /// One drawn frame: script `render` with the sub-tick fraction.
    pub fn render(&mut self, world: Rc<dyn WorldView>, delta: f32) {
        let link = self.world.clone();
        link.scoped(world, || {
            for avatar in self.avatars.values_mut() {
                let status = avatar.script.render(delta);
                if !avatar.pose_allowed(&status) {
                    avatar.withhold_pose();
                }
                self.events.extend(avatar.script.drain_events());
            }
        });
    }

    pub fn call_event(&mut self, world: Rc<dyn WorldView>, owner: Uuid, name: &str, args: Vec<Dynamic>) -> CallStatus {
        let link = self.world.clone();
        let Some(avatar) = self.avatars.get_mut(&owner) else {
            return CallStatus::Skipped;
        };
        let status = link.scoped(world, || avatar.script.call_event(name, args));
        if status.is_fault() {
            avatar.withhold_pose();
        }
        self.events.extend(avatar.script.drain_events());
        status
    }

    /// Remembers what last hurt the owner's player; other avatars read it through the facade.
    pub fn record_damage(&mut self, owner: Uuid, source: impl Into<String>) -> bool {
        let Some(shared) = self.avatars.get(&owner).and_then(|avatar| avatar.script.shared()) else {
            return false;
        };
        shared.borrow_mut().last_damage_source = Some(source.into());
        true
    }

    pub fn pose(&self, owner: Uuid) -> Option<Vec<(String, PartPose)>> {
        self.avatars.get(&owner).map(Avatar::poses)
    }

    pub fn part_pose(&self, owner: Uuid, part: &str) -> Option<PartPose> {
        self.avatars.get(&owner)?.model().part_pose(part)
    }

    pub fn last_fault(&self, owner: Uuid) -> Option<ScriptFault> {
        self.avatars.get(&owner)?.script.last_fault().cloned()
    }

    pub fn drain_events(&mut self) -> Vec<AvatarEvent> {
        self.events.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustContainer;
    use crate::world::{EntitySnapshot, WorldSnapshot};

    #[test]
    fn duplicate_avatars_are_rejected() {
        let owner = Uuid::new_v4();
        let mut manager = AvatarManager::new(RuntimeConfig::default());
        manager.create_avatar(owner, Model::default()).expect("first avatar");
        assert!(manager.create_avatar(owner, Model::default()).is_err());
        assert!(manager.destroy_avatar(owner));
        assert!(!manager.destroy_avatar(owner));
        assert!(!manager.stores().has_avatar(owner));
    }

    #[test]
    fn record_damage_needs_a_loaded_script() {
        let owner = Uuid::new_v4();
        let mut manager = AvatarManager::new(RuntimeConfig::default());
        manager.gate().registry_mut().insert(owner, TrustContainer::trusted(1_000));
        manager.create_avatar(owner, Model::default()).expect("avatar");
        assert!(!manager.record_damage(owner, "fall"));
        manager.load_script(owner, ScriptSource::inline("noop", "")).expect("loads");
        assert!(manager.record_damage(owner, "fall"));
        assert_eq!(manager.stores().last_damage_source(owner).as_deref(), Some("fall"));
    }

    #[test]
    fn player_init_runs_once_the_player_appears() {
        let owner = Uuid::new_v4();
        let mut manager = AvatarManager::new(RuntimeConfig::default());
        manager.gate().registry_mut().insert(owner, TrustContainer::trusted(10_000));
        manager.create_avatar(owner, Model::default()).expect("avatar");
        let script = r#"
            fn player_init(avatar) { log("food " + avatar.player().food()); }
        "#;
        manager.load_script(owner, ScriptSource::inline("init", script)).expect("loads");

        manager.tick(Rc::new(WorldSnapshot::new("empty")), 0.05);
        let mut world = WorldSnapshot::new("overworld");
        world.insert(EntitySnapshot::player(owner));
        let world: Rc<dyn WorldView> = Rc::new(world);
        manager.tick(Rc::clone(&world), 0.05);
        manager.tick(world, 0.05);

        let logs: Vec<_> = manager
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                AvatarEvent::ScriptLog { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(logs, vec!["food 20".to_string()]);
        assert!(manager.last_fault(owner).is_none());
    }
}
