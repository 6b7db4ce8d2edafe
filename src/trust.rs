use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustSetting {
    VanillaModifications,
    NbtAccess,
    SharedValues,
    EntityTargeting,
    MaxOperations,
}

impl TrustSetting {
    pub const ALL: [TrustSetting; 5] = [
        TrustSetting::VanillaModifications,
        TrustSetting::NbtAccess,
        TrustSetting::SharedValues,
        TrustSetting::EntityTargeting,
        TrustSetting::MaxOperations,
    ];

    pub fn key(self) -> &'static str {
        match self {
            TrustSetting::VanillaModifications => "allow_vanilla_mods",
            TrustSetting::NbtAccess => "allow_nbt",
            TrustSetting::SharedValues => "allow_shared_values",
            TrustSetting::EntityTargeting => "allow_targeting",
            TrustSetting::MaxOperations => "max_operations",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|setting| setting.key() == key)
    }

    /// The most restrictive value; returned whenever a lookup cannot be resolved.
    pub fn restrictive_default(self) -> SettingValue {
        match self {
            TrustSetting::MaxOperations => SettingValue::Number(0),
            _ => SettingValue::Bool(false),
        }
    }
}

impl fmt::Display for TrustSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(i64),
}

impl SettingValue {
    pub fn as_bool(self) -> bool {
        match self {
            SettingValue::Bool(value) => value,
            SettingValue::Number(value) => value > 0,
        }
    }

    pub fn as_number(self) -> i64 {
        match self {
            SettingValue::Bool(value) => i64::from(value),
            SettingValue::Number(value) => value.max(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub settings: HashMap<String, SettingValue>,
}

impl TrustContainer {
    pub fn untrusted() -> Self {
        let mut container = Self { name: "untrusted".to_string(), settings: HashMap::new() };
        for setting in TrustSetting::ALL {
            container.settings.insert(setting.key().to_string(), setting.restrictive_default());
        }
        container
    }

    pub fn trusted(max_operations: i64) -> Self {
        let mut container = Self { name: "trusted".to_string(), settings: HashMap::new() };
        container.set(TrustSetting::VanillaModifications, SettingValue::Bool(true));
        container.set(TrustSetting::NbtAccess, SettingValue::Bool(true));
        container.set(TrustSetting::SharedValues, SettingValue::Bool(true));
        container.set(TrustSetting::EntityTargeting, SettingValue::Bool(true));
        container.set(TrustSetting::MaxOperations, SettingValue::Number(max_operations));
        container
    }

    pub fn set(&mut self, setting: TrustSetting, value: SettingValue) {
        self.settings.insert(setting.key().to_string(), value);
    }

    pub fn with(mut self, setting: TrustSetting, value: SettingValue) -> Self {
        self.set(setting, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<SettingValue> {
        self.settings.get(name).copied()
    }
}

#[derive(Debug, Default)]
pub struct TrustRegistry {
    containers: HashMap<Uuid, TrustContainer>,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: Uuid, container: TrustContainer) {
        self.containers.insert(identity, container);
    }

    pub fn remove(&mut self, identity: Uuid) -> Option<TrustContainer> {
        self.containers.remove(&identity)
    }

    pub fn container(&self, identity: Uuid) -> Option<&TrustContainer> {
        self.containers.get(&identity)
    }

    pub fn container_mut(&mut self, identity: Uuid) -> Option<&mut TrustContainer> {
        self.containers.get_mut(&identity)
    }
}

/// Read-only policy lookups over a shared [`TrustRegistry`].
///
/// This is the only place trust policy is resolved. Lookups fail closed: an
/// unknown identity, an unknown setting name, or a value of the wrong shape all
/// resolve to the restrictive default.
#[derive(Clone, Default)]
pub struct CapabilityGate {
    registry: Rc<RefCell<TrustRegistry>>,
}

impl CapabilityGate {
    pub fn new(registry: TrustRegistry) -> Self {
        Self { registry: Rc::new(RefCell::new(registry)) }
    }

    pub fn registry(&self) -> Ref<'_, TrustRegistry> {
        self.registry.borrow()
    }

    pub fn registry_mut(&self) -> RefMut<'_, TrustRegistry> {
        self.registry.borrow_mut()
    }

    pub fn get_setting(&self, identity: Uuid, name: &str) -> SettingValue {
        let Some(setting) = TrustSetting::from_key(name) else {
            log::debug!("[trust] unknown setting '{name}' requested for {identity}");
            return SettingValue::Bool(false);
        };
        self.setting(identity, setting)
    }

    pub fn is_allowed(&self, identity: Uuid, name: &str) -> bool {
        self.get_setting(identity, name).as_bool()
    }

    pub fn setting(&self, identity: Uuid, setting: TrustSetting) -> SettingValue {
        let registry = self.registry.borrow();
        let value = registry.container(identity).and_then(|container| container.get(setting.key()));
        match (setting.restrictive_default(), value) {
            (SettingValue::Bool(_), Some(SettingValue::Bool(value))) => SettingValue::Bool(value),
            (SettingValue::Number(_), Some(SettingValue::Number(value))) => SettingValue::Number(value.max(0)),
            (fallback, _) => fallback,
        }
    }

    pub fn allows(&self, identity: Uuid, setting: TrustSetting) -> bool {
        self.setting(identity, setting).as_bool()
    }

    pub fn operation_budget(&self, identity: Uuid) -> u64 {
        self.setting(identity, TrustSetting::MaxOperations).as_number() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_with(identity: Uuid, container: TrustContainer) -> CapabilityGate {
        let mut registry = TrustRegistry::new();
        registry.insert(identity, container);
        CapabilityGate::new(registry)
    }

    #[test]
    fn unknown_identity_fails_closed() {
        let gate = CapabilityGate::default();
        let stranger = Uuid::new_v4();
        for setting in TrustSetting::ALL {
            assert!(!gate.allows(stranger, setting), "{setting} should be denied");
        }
        assert_eq!(gate.operation_budget(stranger), 0);
    }

    #[test]
    fn unknown_setting_name_fails_closed() {
        let identity = Uuid::new_v4();
        let gate = gate_with(identity, TrustContainer::trusted(10_000));
        assert!(!gate.is_allowed(identity, "allow_everything"));
        assert!(gate.is_allowed(identity, "allow_nbt"));
    }

    #[test]
    fn mismatched_value_shape_resolves_to_default() {
        let identity = Uuid::new_v4();
        let container = TrustContainer::trusted(500)
            .with(TrustSetting::NbtAccess, SettingValue::Number(1))
            .with(TrustSetting::MaxOperations, SettingValue::Bool(true));
        let gate = gate_with(identity, container);
        assert!(!gate.allows(identity, TrustSetting::NbtAccess));
        assert_eq!(gate.operation_budget(identity), 0);
    }

    #[test]
    fn registry_edits_apply_to_existing_handles() {
        let identity = Uuid::new_v4();
        let gate = gate_with(identity, TrustContainer::untrusted());
        let view = gate.clone();
        assert!(!view.allows(identity, TrustSetting::SharedValues));
        gate.registry_mut()
            .container_mut(identity)
            .expect("container registered")
            .set(TrustSetting::SharedValues, SettingValue::Bool(true));
        assert!(view.allows(identity, TrustSetting::SharedValues));
    }

    #[test]
    fn negative_budgets_clamp_to_zero() {
        let identity = Uuid::new_v4();
        let gate = gate_with(identity, TrustContainer::trusted(-5));
        assert_eq!(gate.operation_budget(identity), 0);
    }
}
