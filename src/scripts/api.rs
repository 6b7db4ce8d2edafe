//! Script-facing API table and its registration into a Rhai engine.
//!
//! Every operation a script can reach is listed in one of the `*_OPS` tables
//! below, grouped by the type it is called on. The gated table records which
//! trust setting guards an operation; everything else is ungated.

use glam::{Vec2, Vec3};
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT};
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

use crate::animation::{AnimationTrack, LoopMode, Model, PlayState};
use crate::error::ApiError;
use crate::facade::{ApiContext, EntityApi, EntityHandle, EntityQueries, LivingQueries, PlayerEntityRef};
use crate::facade::{EntityRef, LivingEntityRef};
use crate::store::InstanceHandle;
use crate::trust::TrustSetting;
use crate::world::ItemStack;

type Fallible<T> = Result<T, Box<EvalAltResult>>;

pub const API_VERSION: u32 = 1;

pub const GLOBAL_OPS: &[&str] = &["log", "rand", "api_version"];

pub const AVATAR_OPS: &[&str] = &[
    "player",
    "entity",
    "world_name",
    "animation",
    "animations",
    "stop_all",
    "cease_all",
    "store",
    "stored",
    "unstore",
    "stored_keys",
    "can",
];

pub const ANIMATION_OPS: &[&str] = &[
    "name",
    "play",
    "start",
    "pause",
    "stop",
    "cease",
    "is_playing",
    "play_state",
    "set_play_state",
    "loop_mode",
    "set_loop_mode",
    "length",
    "set_length",
    "time",
    "speed",
    "set_speed",
    "offset",
    "set_offset",
    "start_delay",
    "set_start_delay",
    "loop_delay",
    "set_loop_delay",
    "blend_weight",
    "set_blend_weight",
    "blend_time",
    "set_blend_time",
    "is_override",
    "set_override",
    "is_replace",
    "set_replace",
    "priority",
    "set_priority",
];

pub const ENTITY_OPS: &[&str] = &[
    "kind",
    "position",
    "rotation",
    "velocity",
    "look_dir",
    "uuid",
    "entity_type",
    "name",
    "fire_ticks",
    "frozen_ticks",
    "air",
    "max_air",
    "air_percentage",
    "world_name",
    "equipment_item",
    "pose",
    "vehicle",
    "eye_height",
    "eye_y",
    "bounding_box",
    "is_on_ground",
    "is_wet",
    "is_in_water",
    "is_underwater",
    "is_in_lava",
    "is_in_rain",
    "is_sprinting",
    "is_sneaking",
    "is_sneaky",
    "is_glowing",
    "is_invisible",
    "is_silent",
    "has_avatar",
    "nbt",
];

pub const LIVING_OPS: &[&str] =
    &["health", "max_health", "health_percentage", "armor", "death_time", "body_yaw", "status_effects"];

pub const PLAYER_OPS: &[&str] = &[
    "held_item",
    "food",
    "saturation",
    "experience_progress",
    "experience_level",
    "model_type",
    "game_mode",
    "is_flying",
    "targeted_entity",
    "last_damage_source",
    "stored_value",
];

/// Operations that read as absent unless the named trust setting allows them.
pub const GATED_OPS: &[(&str, TrustSetting)] = &[
    ("nbt", TrustSetting::NbtAccess),
    ("targeted_entity", TrustSetting::EntityTargeting),
    ("stored_value", TrustSetting::SharedValues),
];

/// Handle passed as the first argument of every lifecycle function.
#[derive(Clone)]
pub struct AvatarApi {
    ctx: Rc<ApiContext>,
    model: Rc<RefCell<Model>>,
    shared: InstanceHandle,
}

impl AvatarApi {
    pub fn new(ctx: Rc<ApiContext>, model: Rc<RefCell<Model>>, shared: InstanceHandle) -> Self {
        Self { ctx, model, shared }
    }

    fn player(&mut self) -> Dynamic {
        let handle = EntityHandle::new(self.ctx.owner(), Rc::clone(&self.ctx));
        Dynamic::from(PlayerEntityRef::new(handle))
    }

    fn entity(&mut self, id: &str) -> Fallible<Dynamic> {
        let id = Uuid::parse_str(id).map_err(|err| ApiError::invalid(format!("'{id}' is not a uuid: {err}")))?;
        Ok(EntityApi::wrap(id, &self.ctx).into_dynamic())
    }

    fn world_name(&mut self) -> Dynamic {
        optional(self.ctx.world_name())
    }

    fn animation(&mut self, name: &str) -> Dynamic {
        if self.model.borrow().track(name).is_some() {
            Dynamic::from(TrackApi { model: Rc::clone(&self.model), name: name.to_string() })
        } else {
            Dynamic::UNIT
        }
    }

    fn animations(&mut self) -> Array {
        self.model.borrow().list_tracks().into_iter().map(Dynamic::from).collect()
    }

    fn stop_all(&mut self) {
        self.model.borrow_mut().stop_all();
    }

    fn cease_all(&mut self) {
        self.model.borrow_mut().cease_all();
    }

    fn store(&mut self, key: &str, value: Dynamic) {
        self.shared.borrow_mut().store.set(key, value);
    }

    fn stored(&mut self, key: &str) -> Dynamic {
        self.shared.borrow().store.get(key).unwrap_or(Dynamic::UNIT)
    }

    fn unstore(&mut self, key: &str) -> Dynamic {
        self.shared.borrow_mut().store.remove(key).unwrap_or(Dynamic::UNIT)
    }

    fn stored_keys(&mut self) -> Array {
        self.shared.borrow().store.keys().map(|key| Dynamic::from(key.to_string())).collect()
    }

    fn can(&mut self, setting: &str) -> bool {
        self.ctx.gate().is_allowed(self.ctx.owner(), setting)
    }
}

/// Script-side reference to one track of the avatar's model, by name.
#[derive(Clone)]
pub struct TrackApi {
    model: Rc<RefCell<Model>>,
    name: String,
}

impl TrackApi {
    fn with<R>(&self, f: impl FnOnce(&mut AnimationTrack) -> R) -> Fallible<R> {
        let mut model = self.model.borrow_mut();
        let track = model
            .track_mut(&self.name)
            .ok_or_else(|| ApiError::invalid(format!("animation '{}' no longer exists", self.name)))?;
        Ok(f(track))
    }

    fn chain(&self, f: impl FnOnce(&mut AnimationTrack)) -> Fallible<TrackApi> {
        self.with(f)?;
        Ok(self.clone())
    }
}

pub fn register(engine: &mut Engine, logs: Rc<RefCell<Vec<String>>>) {
    register_globals(engine, logs);
    register_math(engine);
    register_avatar(engine);
    register_tracks(engine);
    engine.register_type_with_name::<EntityRef>("Entity");
    engine.register_type_with_name::<LivingEntityRef>("LivingEntity");
    engine.register_type_with_name::<PlayerEntityRef>("PlayerEntity");
    register_entity_queries::<EntityRef>(engine);
    register_entity_queries::<LivingEntityRef>(engine);
    register_entity_queries::<PlayerEntityRef>(engine);
    register_living_queries::<LivingEntityRef>(engine);
    register_living_queries::<PlayerEntityRef>(engine);
    register_player_queries(engine);
}

fn register_globals(engine: &mut Engine, logs: Rc<RefCell<Vec<String>>>) {
    engine.register_fn("log", move |message: Dynamic| {
        let text = message.to_string();
        log::info!("[script] {text}");
        logs.borrow_mut().push(text);
    });
    engine.register_fn("rand", |min: FLOAT, max: FLOAT| -> Fallible<FLOAT> {
        if !min.is_finite() || !max.is_finite() || !(max - min).is_finite() {
            let message = format!("rand range [{min}, {max}) is not finite");
            return Err(ApiError::invalid(message).into());
        }
        if max <= min {
            return Ok(min);
        }
        Ok(rand::thread_rng().gen_range(min..max))
    });
    engine.register_fn("api_version", || INT::from(API_VERSION));
}

fn register_math(engine: &mut Engine) {
    engine.register_type_with_name::<Vec3>("Vec3");
    engine.register_fn("vec3", |x: FLOAT, y: FLOAT, z: FLOAT| Vec3::new(x as f32, y as f32, z as f32));
    engine.register_get("x", |v: &mut Vec3| v.x as FLOAT);
    engine.register_get("y", |v: &mut Vec3| v.y as FLOAT);
    engine.register_get("z", |v: &mut Vec3| v.z as FLOAT);
    engine.register_fn("length", |v: &mut Vec3| v.length() as FLOAT);
    engine.register_fn("to_string", |v: &mut Vec3| format!("({}, {}, {})", v.x, v.y, v.z));
    engine.register_fn("to_debug", |v: &mut Vec3| format!("vec3({}, {}, {})", v.x, v.y, v.z));

    engine.register_type_with_name::<Vec2>("Vec2");
    engine.register_get("x", |v: &mut Vec2| v.x as FLOAT);
    engine.register_get("y", |v: &mut Vec2| v.y as FLOAT);
    engine.register_fn("to_string", |v: &mut Vec2| format!("({}, {})", v.x, v.y));
}

fn register_avatar(engine: &mut Engine) {
    engine.register_type_with_name::<AvatarApi>("Avatar");
    engine.register_fn("player", AvatarApi::player);
    engine.register_fn("entity", AvatarApi::entity);
    engine.register_fn("world_name", AvatarApi::world_name);
    engine.register_fn("animation", AvatarApi::animation);
    engine.register_fn("animations", AvatarApi::animations);
    engine.register_fn("stop_all", AvatarApi::stop_all);
    engine.register_fn("cease_all", AvatarApi::cease_all);
    engine.register_fn("store", AvatarApi::store);
    engine.register_fn("stored", AvatarApi::stored);
    engine.register_fn("unstore", AvatarApi::unstore);
    engine.register_fn("stored_keys", AvatarApi::stored_keys);
    engine.register_fn("can", AvatarApi::can);
}

fn register_tracks(engine: &mut Engine) {
    engine.register_type_with_name::<TrackApi>("Animation");
    engine.register_fn("name", |t: &mut TrackApi| t.name.clone());
    engine.register_fn("to_string", |t: &mut TrackApi| format!("Animation({})", t.name));

    engine.register_fn("play", |t: &mut TrackApi| t.chain(AnimationTrack::play));
    engine.register_fn("start", |t: &mut TrackApi| t.chain(AnimationTrack::start));
    engine.register_fn("pause", |t: &mut TrackApi| t.chain(AnimationTrack::pause));
    engine.register_fn("stop", |t: &mut TrackApi| t.chain(AnimationTrack::stop));
    engine.register_fn("cease", |t: &mut TrackApi| t.chain(AnimationTrack::cease));
    engine.register_fn("is_playing", |t: &mut TrackApi| t.with(|track| track.is_playing()));

    engine.register_fn("play_state", |t: &mut TrackApi| t.with(|track| track.play_state().as_str().to_string()));
    engine.register_fn("set_play_state", |t: &mut TrackApi, state: &str| -> Fallible<TrackApi> {
        let state = PlayState::parse(state)?;
        t.chain(|track| track.set_play_state(state))
    });
    engine.register_fn("loop_mode", |t: &mut TrackApi| t.with(|track| track.loop_mode().as_str().to_string()));
    engine.register_fn("set_loop_mode", |t: &mut TrackApi, mode: &str| {
        let mode = LoopMode::from_str(mode);
        t.chain(|track| track.set_loop_mode(mode))
    });

    engine.register_fn("length", |t: &mut TrackApi| t.with(|track| track.length() as FLOAT));
    engine.register_fn("set_length", |t: &mut TrackApi, value: FLOAT| t.chain(|track| track.set_length(value as f32)));
    engine.register_fn("time", |t: &mut TrackApi| t.with(|track| track.elapsed() as FLOAT));
    engine.register_fn("speed", |t: &mut TrackApi| t.with(|track| track.speed() as FLOAT));
    engine.register_fn("set_speed", |t: &mut TrackApi, value: FLOAT| t.chain(|track| track.set_speed(value as f32)));
    engine.register_fn("offset", |t: &mut TrackApi| t.with(|track| track.start_offset() as FLOAT));
    engine.register_fn("set_offset", |t: &mut TrackApi, value: FLOAT| {
        t.chain(|track| track.set_start_offset(value as f32))
    });
    engine.register_fn("start_delay", |t: &mut TrackApi| t.with(|track| track.start_delay() as FLOAT));
    engine.register_fn("set_start_delay", |t: &mut TrackApi, value: FLOAT| {
        t.chain(|track| track.set_start_delay(value as f32))
    });
    engine.register_fn("loop_delay", |t: &mut TrackApi| t.with(|track| track.loop_delay() as FLOAT));
    engine.register_fn("set_loop_delay", |t: &mut TrackApi, value: FLOAT| {
        t.chain(|track| track.set_loop_delay(value as f32))
    });
    engine.register_fn("blend_weight", |t: &mut TrackApi| t.with(|track| track.blend_weight() as FLOAT));
    engine.register_fn("set_blend_weight", |t: &mut TrackApi, value: FLOAT| {
        t.chain(|track| track.set_blend_weight(value as f32))
    });
    engine.register_fn("blend_time", |t: &mut TrackApi| t.with(|track| track.blend_time() as FLOAT));
    engine.register_fn("set_blend_time", |t: &mut TrackApi, value: FLOAT| {
        t.chain(|track| track.set_blend_time(value as f32))
    });
    engine.register_fn("is_override", |t: &mut TrackApi| t.with(|track| track.override_base()));
    engine.register_fn("set_override", |t: &mut TrackApi, value: bool| t.chain(|track| track.set_override(value)));
    engine.register_fn("is_replace", |t: &mut TrackApi| t.with(|track| track.replace()));
    engine.register_fn("set_replace", |t: &mut TrackApi, value: bool| t.chain(|track| track.set_replace(value)));
    engine.register_fn("priority", |t: &mut TrackApi| t.with(|track| INT::from(track.priority())));
    engine.register_fn("set_priority", |t: &mut TrackApi, value: INT| {
        let priority = value.clamp(INT::from(i32::MIN), INT::from(i32::MAX)) as i32;
        t.chain(|track| track.set_priority(priority))
    });
}

fn optional<T: Clone + 'static>(value: Option<T>) -> Dynamic {
    value.map_or(Dynamic::UNIT, Dynamic::from)
}

fn item_dynamic(item: Option<ItemStack>) -> Fallible<Dynamic> {
    match item {
        Some(item) => rhai::serde::to_dynamic(&item),
        None => Ok(Dynamic::UNIT),
    }
}

fn entity_dynamic(entity: Option<EntityApi>) -> Dynamic {
    entity.map_or(Dynamic::UNIT, EntityApi::into_dynamic)
}

fn kind_label<T: EntityQueries>(entity: &T) -> &'static str {
    EntityApi::wrap(entity.handle().id(), entity.handle().context()).label()
}

fn register_entity_queries<T: EntityQueries + Clone + 'static>(engine: &mut Engine) {
    engine.register_fn("kind", |e: &mut T| kind_label(e).to_string());
    engine.register_fn("to_string", |e: &mut T| format!("{}({})", kind_label(e), e.handle().id()));
    engine.register_fn("position", |e: &mut T| -> Fallible<Vec3> { Ok(e.position(1.0)?) });
    engine.register_fn("position", |e: &mut T, delta: FLOAT| -> Fallible<Vec3> { Ok(e.position(delta as f32)?) });
    engine.register_fn("rotation", |e: &mut T| -> Fallible<Vec2> { Ok(e.rotation(1.0)?) });
    engine.register_fn("rotation", |e: &mut T, delta: FLOAT| -> Fallible<Vec2> { Ok(e.rotation(delta as f32)?) });
    engine.register_fn("velocity", |e: &mut T| -> Fallible<Vec3> { Ok(e.velocity()?) });
    engine.register_fn("look_dir", |e: &mut T| -> Fallible<Vec3> { Ok(e.look_dir()?) });
    engine.register_fn("uuid", |e: &mut T| -> Fallible<String> { Ok(e.uuid()?) });
    engine.register_fn("entity_type", |e: &mut T| -> Fallible<String> { Ok(e.entity_type()?) });
    engine.register_fn("name", |e: &mut T| -> Fallible<String> { Ok(e.name()?) });
    engine.register_fn("fire_ticks", |e: &mut T| -> Fallible<INT> { Ok(INT::from(e.fire_ticks()?)) });
    engine.register_fn("frozen_ticks", |e: &mut T| -> Fallible<INT> { Ok(INT::from(e.frozen_ticks()?)) });
    engine.register_fn("air", |e: &mut T| -> Fallible<INT> { Ok(INT::from(e.air()?)) });
    engine.register_fn("max_air", |e: &mut T| -> Fallible<INT> { Ok(INT::from(e.max_air()?)) });
    engine.register_fn("air_percentage", |e: &mut T| -> Fallible<FLOAT> { Ok(e.air_percentage()? as FLOAT) });
    engine.register_fn("world_name", |e: &mut T| -> Fallible<String> { Ok(e.world_name()?) });
    engine.register_fn("equipment_item", |e: &mut T, slot: INT| -> Fallible<Dynamic> {
        item_dynamic(e.equipment_item(slot)?)
    });
    engine.register_fn("pose", |e: &mut T| -> Fallible<Dynamic> { Ok(optional(e.pose()?)) });
    engine.register_fn("vehicle", |e: &mut T| -> Fallible<Dynamic> { Ok(entity_dynamic(e.vehicle()?)) });
    engine.register_fn("eye_height", |e: &mut T| -> Fallible<FLOAT> { Ok(e.eye_height()? as FLOAT) });
    engine.register_fn("eye_y", |e: &mut T| -> Fallible<FLOAT> { Ok(e.eye_y()? as FLOAT) });
    engine.register_fn("bounding_box", |e: &mut T| -> Fallible<Vec3> { Ok(e.bounding_box()?) });
    engine.register_fn("is_on_ground", |e: &mut T| -> Fallible<bool> { Ok(e.is_on_ground()?) });
    engine.register_fn("is_wet", |e: &mut T| -> Fallible<bool> { Ok(e.is_wet()?) });
    engine.register_fn("is_in_water", |e: &mut T| -> Fallible<bool> { Ok(e.is_in_water()?) });
    engine.register_fn("is_underwater", |e: &mut T| -> Fallible<bool> { Ok(e.is_underwater()?) });
    engine.register_fn("is_in_lava", |e: &mut T| -> Fallible<bool> { Ok(e.is_in_lava()?) });
    engine.register_fn("is_in_rain", |e: &mut T| -> Fallible<bool> { Ok(e.is_in_rain()?) });
    engine.register_fn("is_sprinting", |e: &mut T| -> Fallible<bool> { Ok(e.is_sprinting()?) });
    engine.register_fn("is_sneaking", |e: &mut T| -> Fallible<bool> { Ok(e.is_sneaking()?) });
    engine.register_fn("is_sneaky", |e: &mut T| -> Fallible<bool> { Ok(e.is_sneaky()?) });
    engine.register_fn("is_glowing", |e: &mut T| -> Fallible<bool> { Ok(e.is_glowing()?) });
    engine.register_fn("is_invisible", |e: &mut T| -> Fallible<bool> { Ok(e.is_invisible()?) });
    engine.register_fn("is_silent", |e: &mut T| -> Fallible<bool> { Ok(e.is_silent()?) });
    engine.register_fn("has_avatar", |e: &mut T| -> Fallible<bool> { Ok(e.has_avatar()?) });
    engine.register_fn("nbt", |e: &mut T, path: &str| -> Fallible<Dynamic> {
        match e.nbt_value(path)? {
            Some(value) => rhai::serde::to_dynamic(&value),
            None => Ok(Dynamic::UNIT),
        }
    });
}

fn register_living_queries<T: LivingQueries + Clone + 'static>(engine: &mut Engine) {
    engine.register_fn("health", |e: &mut T| -> Fallible<FLOAT> { Ok(e.health()? as FLOAT) });
    engine.register_fn("max_health", |e: &mut T| -> Fallible<FLOAT> { Ok(e.max_health()? as FLOAT) });
    engine.register_fn("health_percentage", |e: &mut T| -> Fallible<FLOAT> { Ok(e.health_percentage()? as FLOAT) });
    engine.register_fn("armor", |e: &mut T| -> Fallible<INT> { Ok(INT::from(e.armor()?)) });
    engine.register_fn("death_time", |e: &mut T| -> Fallible<INT> { Ok(INT::from(e.death_time()?)) });
    engine.register_fn("body_yaw", |e: &mut T| -> Fallible<FLOAT> { Ok(e.body_yaw()? as FLOAT) });
    engine.register_fn("status_effects", |e: &mut T| -> Fallible<Array> {
        Ok(e.status_effects()?.into_iter().map(Dynamic::from).collect())
    });
}

fn register_player_queries(engine: &mut Engine) {
    engine.register_fn("held_item", |p: &mut PlayerEntityRef, hand: INT| -> Fallible<Dynamic> {
        item_dynamic(p.held_item(hand)?)
    });
    engine.register_fn("food", |p: &mut PlayerEntityRef| -> Fallible<INT> { Ok(INT::from(p.food()?)) });
    engine.register_fn("saturation", |p: &mut PlayerEntityRef| -> Fallible<FLOAT> { Ok(p.saturation()? as FLOAT) });
    engine.register_fn("experience_progress", |p: &mut PlayerEntityRef| -> Fallible<FLOAT> {
        Ok(p.experience_progress()? as FLOAT)
    });
    engine.register_fn("experience_level", |p: &mut PlayerEntityRef| -> Fallible<INT> {
        Ok(INT::from(p.experience_level()?))
    });
    engine.register_fn("model_type", |p: &mut PlayerEntityRef| -> Fallible<String> { Ok(p.model_type()?) });
    engine.register_fn("game_mode", |p: &mut PlayerEntityRef| -> Fallible<Dynamic> { Ok(optional(p.game_mode()?)) });
    engine.register_fn("is_flying", |p: &mut PlayerEntityRef| -> Fallible<bool> { Ok(p.is_flying()?) });
    engine.register_fn("targeted_entity", |p: &mut PlayerEntityRef| -> Fallible<Dynamic> {
        Ok(entity_dynamic(p.targeted_entity()?))
    });
    engine.register_fn("last_damage_source", |p: &mut PlayerEntityRef| -> Fallible<Dynamic> {
        Ok(optional(p.last_damage_source()?))
    });
    engine.register_fn("stored_value", |p: &mut PlayerEntityRef, key: &str| -> Fallible<Dynamic> {
        Ok(p.stored_value(key)?.unwrap_or(Dynamic::UNIT))
    });
}
