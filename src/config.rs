use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::trust::{SettingValue, TrustContainer, TrustRegistry, TrustSetting};

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "SandboxConfig::default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "SandboxConfig::default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "SandboxConfig::default_max_function_expr_depth")]
    pub max_function_expr_depth: usize,
    #[serde(default = "SandboxConfig::default_max_string_size")]
    pub max_string_size: usize,
    #[serde(default = "SandboxConfig::default_max_array_size")]
    pub max_array_size: usize,
    #[serde(default = "SandboxConfig::default_max_map_size")]
    pub max_map_size: usize,
    /// Budget for configured trust containers that leave `max_operations` unset.
    #[serde(default = "SandboxConfig::default_operations")]
    pub default_operations: u64,
}

impl SandboxConfig {
    const fn default_max_call_levels() -> usize {
        32
    }

    const fn default_max_expr_depth() -> usize {
        64
    }

    const fn default_max_function_expr_depth() -> usize {
        32
    }

    const fn default_max_string_size() -> usize {
        16 * 1024
    }

    const fn default_max_array_size() -> usize {
        4_096
    }

    const fn default_max_map_size() -> usize {
        1_024
    }

    const fn default_operations() -> u64 {
        100_000
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_call_levels: Self::default_max_call_levels(),
            max_expr_depth: Self::default_max_expr_depth(),
            max_function_expr_depth: Self::default_max_function_expr_depth(),
            max_string_size: Self::default_max_string_size(),
            max_array_size: Self::default_max_array_size(),
            max_map_size: Self::default_max_map_size(),
            default_operations: Self::default_operations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultConfig {
    /// Consecutive faulting calls before the script is disabled; 0 never disables.
    #[serde(default = "FaultConfig::default_disable_after")]
    pub disable_after: u32,
}

impl FaultConfig {
    const fn default_disable_after() -> u32 {
        3
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self { disable_after: Self::default_disable_after() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustEntry {
    pub identity: Uuid,
    #[serde(flatten)]
    pub container: TrustContainer,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub containers: Vec<TrustEntry>,
}

impl TrustConfig {
    /// Inserts every configured container, filling a missing budget with `default_operations`.
    pub fn seed(&self, registry: &mut TrustRegistry, default_operations: u64) {
        let budget = i64::try_from(default_operations).unwrap_or(i64::MAX);
        for entry in &self.containers {
            let mut container = entry.container.clone();
            if container.get(TrustSetting::MaxOperations.key()).is_none() {
                container.set(TrustSetting::MaxOperations, SettingValue::Number(budget));
            }
            registry.insert(entry.identity, container);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub faults: FaultConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub trace: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigOverrides {
    pub fault_threshold: Option<u32>,
    pub max_operations: Option<u64>,
    pub trace: Option<bool>,
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] {err:#}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(threshold) = overrides.fault_threshold {
            self.faults.disable_after = threshold;
        }
        if let Some(budget) = overrides.max_operations {
            self.sandbox.default_operations = budget;
        }
        if let Some(trace) = overrides.trace {
            self.trace = trace;
        }
    }

    pub fn trust_registry(&self) -> TrustRegistry {
        let mut registry = TrustRegistry::new();
        self.trust.seed(&mut registry, self.sandbox.default_operations);
        registry
    }
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.fault_threshold.is_none() && self.max_operations.is_none() && self.trace.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.fault_threshold.is_some() {
            fields.push("fault_threshold");
        }
        if self.max_operations.is_some() {
            fields.push("max_operations");
        }
        if self.trace.is_some() {
            fields.push("trace");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::CapabilityGate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_sections_use_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str(r#"{ "faults": {} }"#).expect("parse");
        assert_eq!(cfg.faults.disable_after, 3);
        assert_eq!(cfg.sandbox.max_call_levels, 32);
        assert!(cfg.trust.containers.is_empty());
    }

    #[test]
    fn seeds_trust_containers() {
        let identity = Uuid::new_v4();
        let json = format!(
            r#"{{ "trust": {{ "containers": [
                {{ "identity": "{identity}", "name": "friend",
                   "settings": {{ "allow_nbt": true, "max_operations": 5000 }} }}
            ] }} }}"#
        );
        let cfg: RuntimeConfig = serde_json::from_str(&json).expect("parse");
        let registry = cfg.trust_registry();
        let container = registry.container(identity).expect("seeded");
        assert_eq!(container.name, "friend");
        assert_eq!(container.get(TrustSetting::NbtAccess.key()).map(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn containers_without_a_budget_get_the_configured_default() {
        let (limited, open) = (Uuid::new_v4(), Uuid::new_v4());
        let json = format!(
            r#"{{ "trust": {{ "containers": [
                {{ "identity": "{limited}", "settings": {{ "max_operations": 5000 }} }},
                {{ "identity": "{open}", "settings": {{ "allow_nbt": true }} }}
            ] }} }}"#
        );
        let mut cfg: RuntimeConfig = serde_json::from_str(&json).expect("parse");
        cfg.apply_overrides(&RuntimeConfigOverrides { max_operations: Some(2_500), ..Default::default() });
        let gate = CapabilityGate::new(cfg.trust_registry());
        assert_eq!(gate.operation_budget(limited), 5_000);
        assert_eq!(gate.operation_budget(open), 2_500);
        assert_eq!(gate.operation_budget(Uuid::new_v4()), 0);
    }

    #[test]
    fn load_or_default_survives_bad_files() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write");
        let cfg = RuntimeConfig::load_or_default(file.path());
        assert_eq!(cfg.faults.disable_after, 3);
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut cfg = RuntimeConfig::default();
        let overrides = RuntimeConfigOverrides { fault_threshold: Some(1), max_operations: None, trace: Some(true) };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.faults.disable_after, 1);
        assert_eq!(cfg.sandbox.default_operations, 100_000);
        assert!(cfg.trace);
        assert_eq!(overrides.applied_fields(), vec!["fault_threshold", "trace"]);
    }
}
