use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use rhai::Dynamic;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::animation::{Model, ModelDescription};
use crate::avatar::AvatarManager;
use crate::config::RuntimeConfig;
use crate::events::AvatarEvent;
use crate::scripts::{ScriptFault, ScriptSource};
use crate::trust::TrustContainer;
use crate::world::{WorldSnapshot, WorldView};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSource {
    Path(String),
    Inline(ModelDescription),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledEvent {
    pub step: usize,
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessFixture {
    pub script: String,
    #[serde(default)]
    pub model: Option<ModelSource>,
    #[serde(default = "default_owner")]
    pub owner: Uuid,
    /// Trust for the owner; a trusted container with the configured default budget when absent.
    #[serde(default)]
    pub trust: Option<TrustContainer>,
    #[serde(default)]
    pub world: WorldSnapshot,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_dt")]
    pub dt: f32,
    #[serde(default)]
    pub render_delta: Option<f32>,
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl HarnessFixture {
    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    fn build_model(&self) -> Result<Model> {
        let description = match &self.model {
            None => ModelDescription::default(),
            Some(ModelSource::Inline(description)) => description.clone(),
            Some(ModelSource::Path(path)) => ModelDescription::load(self.resolve(path))?,
        };
        Model::from_description(&description).context("building fixture model")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub steps: usize,
    pub dt: f32,
    pub script: String,
    pub results: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<ScriptFault>,
    pub disabled: bool,
    pub final_poses: Vec<PoseSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finished: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseSummary {
    pub part: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    run_fixture_with_config(fixture, &RuntimeConfig::default())
}

pub fn run_fixture_with_config(fixture: &HarnessFixture, config: &RuntimeConfig) -> Result<HarnessOutput> {
    let owner = fixture.owner;
    let mut manager = AvatarManager::new(config.clone());
    let trust = fixture.trust.clone().unwrap_or_else(|| {
        let budget = i64::try_from(config.sandbox.default_operations).unwrap_or(i64::MAX);
        TrustContainer::trusted(budget)
    });
    manager.gate().registry_mut().insert(owner, trust);
    manager.create_avatar(owner, fixture.build_model()?)?;

    let script_path = fixture.resolve(&fixture.script);
    // Compile failures surface as the recorded load fault.
    if let Err(err) = manager.load_script(owner, ScriptSource::file(&script_path)) {
        log::warn!("[script-harness] {err:#}");
    }

    let mut world = fixture.world.clone();
    world.reindex();
    let world: Rc<dyn WorldView> = Rc::new(world);

    let mut results = Vec::with_capacity(fixture.steps);
    let mut pending = summarize_events(config, manager.drain_events());
    for step in 0..fixture.steps {
        manager.tick(Rc::clone(&world), fixture.dt);
        if let Some(delta) = fixture.render_delta {
            manager.render(Rc::clone(&world), delta);
        }
        for event in fixture.events.iter().filter(|event| event.step == step) {
            let args = event
                .args
                .iter()
                .map(|value| rhai::serde::to_dynamic(value).map_err(|err| anyhow!("event argument: {err}")))
                .collect::<Result<Vec<Dynamic>>>()
                .with_context(|| format!("converting arguments for '{}' at step {step}", event.name))?;
            manager.call_event(Rc::clone(&world), owner, &event.name, args);
        }
        let mut summary = summarize_events(config, manager.drain_events());
        summary.merge_front(std::mem::take(&mut pending));
        results.push(StepResult { step, logs: summary.logs, faults: summary.faults, finished: summary.finished });
    }

    let final_poses = manager
        .pose(owner)
        .unwrap_or_default()
        .into_iter()
        .map(|(part, pose)| PoseSummary {
            part,
            position: round3(pose.position.to_array()),
            rotation: round3(pose.rotation.to_array()),
        })
        .collect();
    let avatar = manager.avatar(owner);
    Ok(HarnessOutput {
        steps: fixture.steps,
        dt: fixture.dt,
        script: fixture.script.clone(),
        results,
        fault: manager.last_fault(owner),
        disabled: avatar.map_or(false, |avatar| avatar.script().is_disabled()),
        final_poses,
    })
}

#[derive(Default)]
struct EventSummary {
    logs: Vec<String>,
    faults: Vec<String>,
    finished: Vec<String>,
}

impl EventSummary {
    fn merge_front(&mut self, mut earlier: EventSummary) {
        earlier.logs.append(&mut self.logs);
        earlier.faults.append(&mut self.faults);
        earlier.finished.append(&mut self.finished);
        *self = earlier;
    }
}

fn summarize_events(config: &RuntimeConfig, events: Vec<AvatarEvent>) -> EventSummary {
    let mut summary = EventSummary::default();
    for event in events {
        if config.trace {
            log::info!("[script-harness] {event}");
        }
        match event {
            AvatarEvent::ScriptLog { message, .. } => summary.logs.push(message),
            AvatarEvent::ScriptFault { phase, message, .. } => summary.faults.push(format!("{phase}: {message}")),
            AvatarEvent::TrackFinished { track, .. } => summary.finished.push(track),
            AvatarEvent::ScriptLoaded { .. } | AvatarEvent::ScriptDisabled { .. } => {}
        }
    }
    summary
}

fn round3(values: [f32; 3]) -> [f32; 3] {
    values.map(|value| {
        let rounded = (value * 1000.0).round() / 1000.0;
        if rounded == 0.0 {
            0.0
        } else {
            rounded
        }
    })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fixture '{}'", path.display()))?;
    let mut fixture: HarnessFixture = serde_json::from_reader(file).with_context(|| "parsing fixture JSON")?;
    fixture.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(fixture)
}

fn default_owner() -> Uuid {
    Uuid::nil()
}

fn default_dt() -> f32 {
    0.05
}

fn default_steps() -> usize {
    1
}
