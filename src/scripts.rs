pub mod api;

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::animation::Model;
use crate::config::{FaultConfig, SandboxConfig};
use crate::events::AvatarEvent;
use crate::facade::ApiContext;
use crate::store::{InstanceHandle, InstanceShared};

pub use api::{AvatarApi, TrackApi, API_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Load,
    Init,
    PlayerInit,
    Tick,
    Render,
    Event,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Load => "load",
            LifecyclePhase::Init => "init",
            LifecyclePhase::PlayerInit => "player_init",
            LifecyclePhase::Tick => "tick",
            LifecyclePhase::Render => "render",
            LifecyclePhase::Event => "event",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure contained at the lifecycle call boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFault {
    pub phase: LifecyclePhase,
    pub message: String,
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline { name: String, code: String },
    File(PathBuf),
}

impl ScriptSource {
    pub fn inline(name: impl Into<String>, code: impl Into<String>) -> Self {
        ScriptSource::Inline { name: name.into(), code: code.into() }
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        ScriptSource::File(path.as_ref().to_path_buf())
    }

    pub fn label(&self) -> String {
        match self {
            ScriptSource::Inline { name, .. } => name.clone(),
            ScriptSource::File(path) => path.display().to_string(),
        }
    }

    fn read(&self) -> Result<String> {
        match self {
            ScriptSource::Inline { code, .. } => Ok(code.clone()),
            ScriptSource::File(path) => {
                fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))
            }
        }
    }

    fn modified(&self) -> Option<SystemTime> {
        match self {
            ScriptSource::Inline { .. } => None,
            ScriptSource::File(path) => fs::metadata(path).ok().and_then(|meta| meta.modified().ok()),
        }
    }
}

/// Result of one lifecycle dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Completed,
    /// The script does not define the function.
    Missing,
    /// Nothing ran: no script, disabled, or a zero operation budget.
    Skipped,
    Faulted(ScriptFault),
}

impl CallStatus {
    pub fn is_fault(&self) -> bool {
        matches!(self, CallStatus::Faulted(_))
    }
}

/// One compiled script with its engine, scope and shared state.
struct ScriptInstance {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    shared: InstanceHandle,
    initialized: bool,
    player_initialized: bool,
}

/// Owns the sandboxed script of one avatar and dispatches its lifecycle calls.
pub struct ScriptHost {
    ctx: Rc<ApiContext>,
    model: Rc<RefCell<Model>>,
    sandbox: SandboxConfig,
    disable_after: u32,
    source: Option<ScriptSource>,
    instance: Option<ScriptInstance>,
    last_modified: Option<SystemTime>,
    digest: Option<blake3::Hash>,
    last_fault: Option<ScriptFault>,
    consecutive_faults: u32,
    disabled: bool,
    logs: Rc<RefCell<Vec<String>>>,
    events: Vec<AvatarEvent>,
}

impl ScriptHost {
    pub fn new(ctx: Rc<ApiContext>, model: Rc<RefCell<Model>>, sandbox: &SandboxConfig, faults: &FaultConfig) -> Self {
        Self {
            ctx,
            model,
            sandbox: sandbox.clone(),
            disable_after: faults.disable_after,
            source: None,
            instance: None,
            last_modified: None,
            digest: None,
            last_fault: None,
            consecutive_faults: 0,
            disabled: false,
            logs: Rc::new(RefCell::new(Vec::new())),
            events: Vec::new(),
        }
    }

    fn owner(&self) -> Uuid {
        self.ctx.owner()
    }

    pub fn is_loaded(&self) -> bool {
        self.instance.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn last_fault(&self) -> Option<&ScriptFault> {
        self.last_fault.as_ref()
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    pub fn digest(&self) -> Option<String> {
        self.digest.map(|hash| hash.to_hex().to_string())
    }

    pub fn source(&self) -> Option<&ScriptSource> {
        self.source.as_ref()
    }

    /// State other avatars see through the store directory; `None` until a script loads.
    pub fn shared(&self) -> Option<&InstanceHandle> {
        self.instance.as_ref().map(|instance| &instance.shared)
    }

    pub fn drain_events(&mut self) -> Vec<AvatarEvent> {
        self.flush_logs();
        self.events.drain(..).collect()
    }

    /// Compiles `source` into a fresh instance, discarding any previous one and its store.
    pub fn load(&mut self, source: ScriptSource) -> Result<()> {
        self.source = Some(source);
        self.digest = None;
        self.rebuild()
    }

    /// Recompiles the current source unconditionally and clears the disabled state.
    pub fn reload(&mut self) -> Result<()> {
        self.digest = None;
        self.rebuild()
    }

    /// Recompiles a file source when its modification time advanced and its contents changed.
    pub fn reload_if_needed(&mut self) -> Result<bool> {
        let Some(source @ ScriptSource::File(_)) = &self.source else {
            return Ok(false);
        };
        let Some(modified) = source.modified() else {
            return Err(anyhow!("Script file not accessible: {}", source.label()));
        };
        if self.last_modified.map_or(false, |prev| modified <= prev) {
            return Ok(false);
        }
        let code = source.read()?;
        let digest = blake3::hash(code.as_bytes());
        if self.instance.is_some() && self.digest == Some(digest) {
            self.last_modified = Some(modified);
            log::debug!("[script] {} touched without changes; keeping compiled instance", source.label());
            return Ok(false);
        }
        self.rebuild_from(code, digest)?;
        Ok(true)
    }

    fn rebuild(&mut self) -> Result<()> {
        let Some(source) = &self.source else {
            return Err(anyhow!("No script source loaded for avatar {}", self.owner()));
        };
        let code = source.read()?;
        let digest = blake3::hash(code.as_bytes());
        self.rebuild_from(code, digest)
    }

    fn rebuild_from(&mut self, code: String, digest: blake3::Hash) -> Result<()> {
        let label = self.source.as_ref().map(ScriptSource::label).unwrap_or_default();
        self.drop_instance();
        self.last_modified = self.source.as_ref().and_then(ScriptSource::modified);
        self.last_fault = None;
        self.consecutive_faults = 0;
        self.disabled = false;

        let engine = self.build_engine();
        let ast = match engine.compile(&code).with_context(|| format!("Compiling {label}")) {
            Ok(ast) => ast,
            Err(err) => {
                self.record_fault(LifecyclePhase::Load, format!("{err:#}"));
                return Err(err);
            }
        };
        let shared: InstanceHandle = Rc::new(RefCell::new(InstanceShared::default()));
        self.ctx.stores().attach_instance(self.owner(), &shared);
        self.instance = Some(ScriptInstance {
            engine,
            ast,
            scope: Scope::new(),
            shared,
            initialized: false,
            player_initialized: false,
        });
        self.digest = Some(digest);
        let digest = digest.to_hex().to_string();
        log::info!("[script] loaded {label} for avatar {} ({})", self.owner(), &digest[..12]);
        self.events.push(AvatarEvent::ScriptLoaded { avatar: self.owner(), digest });
        Ok(())
    }

    /// Drops the compiled instance and detaches its store.
    pub fn unload(&mut self) {
        self.drop_instance();
        self.source = None;
        self.digest = None;
        self.last_modified = None;
    }

    fn drop_instance(&mut self) {
        if self.instance.take().is_some() {
            self.ctx.stores().detach_instance(self.owner());
        }
    }

    fn build_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        // Scripts only reach the host through the registered API; no module loading.
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.set_max_call_levels(self.sandbox.max_call_levels);
        engine.set_max_expr_depths(self.sandbox.max_expr_depth, self.sandbox.max_function_expr_depth);
        engine.set_max_string_size(self.sandbox.max_string_size);
        engine.set_max_array_size(self.sandbox.max_array_size);
        engine.set_max_map_size(self.sandbox.max_map_size);
        let logs = Rc::clone(&self.logs);
        engine.on_print(move |text| logs.borrow_mut().push(text.to_string()));
        api::register(&mut engine, Rc::clone(&self.logs));
        engine
    }

    /// Runs top-level statements and `init` once, then `player_init` once the
    /// owner's player is in the world, then `tick`.
    pub fn tick(&mut self) -> CallStatus {
        let status = self.ensure_initialized();
        if status.is_fault() {
            return status;
        }
        if self.ctx.entity_exists(self.owner()) {
            self.ctx.mark_player_seen();
            let needs_player_init = self.instance.as_ref().map_or(false, |instance| !instance.player_initialized);
            if needs_player_init {
                if let Some(instance) = self.instance.as_mut() {
                    instance.player_initialized = true;
                }
                let status = self.call(LifecyclePhase::PlayerInit, "player_init", Vec::new());
                if status.is_fault() {
                    return status;
                }
            }
        }
        self.call(LifecyclePhase::Tick, "tick", Vec::new())
    }

    pub fn render(&mut self, delta: f32) -> CallStatus {
        let status = self.ensure_initialized();
        if status.is_fault() {
            return status;
        }
        self.call(LifecyclePhase::Render, "render", vec![Dynamic::from(f64::from(delta))])
    }

    /// Calls the script function `name(avatar, args...)`.
    pub fn call_event(&mut self, name: &str, args: Vec<Dynamic>) -> CallStatus {
        let status = self.ensure_initialized();
        if status.is_fault() {
            return status;
        }
        self.call(LifecyclePhase::Event, name, args)
    }

    fn ensure_initialized(&mut self) -> CallStatus {
        if self.disabled || self.instance.as_ref().map_or(true, |instance| instance.initialized) {
            return CallStatus::Skipped;
        }
        let Some(budget) = self.budget() else {
            return CallStatus::Skipped;
        };
        let Some(instance) = self.instance.as_mut() else {
            return CallStatus::Skipped;
        };
        instance.initialized = true;
        instance.engine.set_max_operations(budget);
        let result = instance.engine.run_ast_with_scope(&mut instance.scope, &instance.ast);
        self.flush_logs();
        if let Err(err) = result {
            return self.record_fault(LifecyclePhase::Init, err.to_string());
        }
        self.call(LifecyclePhase::Init, "init", Vec::new())
    }

    /// Per-call operation budget; `None` when trust blocks the script entirely.
    fn budget(&self) -> Option<u64> {
        let budget = self.ctx.gate().operation_budget(self.owner());
        if budget == 0 {
            log::debug!("[script] avatar {} has no operation budget; call skipped", self.owner());
            None
        } else {
            Some(budget)
        }
    }

    fn call(&mut self, phase: LifecyclePhase, name: &str, args: Vec<Dynamic>) -> CallStatus {
        if self.disabled || self.instance.is_none() {
            return CallStatus::Skipped;
        }
        let Some(budget) = self.budget() else {
            return CallStatus::Skipped;
        };
        let Some(instance) = self.instance.as_mut() else {
            return CallStatus::Skipped;
        };
        instance.engine.set_max_operations(budget);
        let avatar = AvatarApi::new(Rc::clone(&self.ctx), Rc::clone(&self.model), Rc::clone(&instance.shared));
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Dynamic::from(avatar));
        call_args.extend(args);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result =
            instance.engine.call_fn_with_options::<Dynamic>(options, &mut instance.scope, &instance.ast, name, call_args);
        self.flush_logs();
        match result {
            Ok(_) => {
                self.consecutive_faults = 0;
                CallStatus::Completed
            }
            Err(err) if is_missing(&err, name) => CallStatus::Missing,
            Err(err) => self.record_fault(phase, err.to_string()),
        }
    }

    fn record_fault(&mut self, phase: LifecyclePhase, message: String) -> CallStatus {
        let owner = self.owner();
        log::warn!("[script] avatar {owner} {phase} fault: {message}");
        let fault = ScriptFault { phase, message };
        self.last_fault = Some(fault.clone());
        self.events.push(AvatarEvent::ScriptFault { avatar: owner, phase, message: fault.message.clone() });
        if phase != LifecyclePhase::Load {
            self.consecutive_faults += 1;
            if self.disable_after > 0 && self.consecutive_faults >= self.disable_after && !self.disabled {
                self.disabled = true;
                log::error!("[script] avatar {owner} disabled after {} consecutive faults", self.consecutive_faults);
                self.events.push(AvatarEvent::ScriptDisabled { avatar: owner, faults: self.consecutive_faults });
            }
        }
        CallStatus::Faulted(fault)
    }

    fn flush_logs(&mut self) {
        let owner = self.owner();
        let lines: Vec<String> = self.logs.borrow_mut().drain(..).collect();
        self.events.extend(lines.into_iter().map(|message| AvatarEvent::ScriptLog { avatar: owner, message }));
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        self.drop_instance();
    }
}

fn is_missing(err: &EvalAltResult, name: &str) -> bool {
    match err {
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            signature.split(|c: char| c == ' ' || c == '(').next() == Some(name)
        }
        _ => false,
    }
}
