use indexmap::IndexMap;
use rhai::Dynamic;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use uuid::Uuid;

/// Per-instance key/value map other avatars may read through the facade.
#[derive(Debug, Clone, Default)]
pub struct SharedValueStore {
    values: IndexMap<String, Dynamic>,
}

impl SharedValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`; a repeated key keeps its slot and takes the new value.
    pub fn set(&mut self, key: impl Into<String>, value: Dynamic) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Dynamic> {
        self.values.get(key).cloned()
    }

    pub fn remove(&mut self, key: &str) -> Option<Dynamic> {
        self.values.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// State a script instance exposes to other avatars. Dropped with the instance.
#[derive(Debug, Default)]
pub struct InstanceShared {
    pub store: SharedValueStore,
    pub last_damage_source: Option<String>,
}

pub type InstanceHandle = Rc<RefCell<InstanceShared>>;

#[derive(Default)]
struct DirectoryEntry {
    instance: Option<Weak<RefCell<InstanceShared>>>,
}

/// Identity-keyed index of live avatars and their instance state.
///
/// Holds weak references only; the owning avatar controls lifetime through
/// explicit [`StoreDirectory::register_avatar`] / [`StoreDirectory::remove_avatar`].
#[derive(Clone, Default)]
pub struct StoreDirectory {
    entries: Rc<RefCell<HashMap<Uuid, DirectoryEntry>>>,
}

impl StoreDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_avatar(&self, identity: Uuid) {
        self.entries.borrow_mut().entry(identity).or_default();
    }

    pub fn remove_avatar(&self, identity: Uuid) {
        self.entries.borrow_mut().remove(&identity);
    }

    pub fn has_avatar(&self, identity: Uuid) -> bool {
        self.entries.borrow().contains_key(&identity)
    }

    pub fn attach_instance(&self, identity: Uuid, instance: &InstanceHandle) {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(identity).or_default();
        entry.instance = Some(Rc::downgrade(instance));
    }

    pub fn detach_instance(&self, identity: Uuid) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(&identity) {
            entry.instance = None;
        }
    }

    pub fn instance(&self, identity: Uuid) -> Option<InstanceHandle> {
        self.entries.borrow().get(&identity)?.instance.as_ref()?.upgrade()
    }

    pub fn stored_value(&self, identity: Uuid, key: &str) -> Option<Dynamic> {
        let instance = self.instance(identity)?;
        let shared = instance.borrow();
        shared.store.get(key)
    }

    pub fn last_damage_source(&self, identity: Uuid) -> Option<String> {
        let instance = self.instance(identity)?;
        let shared = instance.borrow();
        shared.last_damage_source.clone()
    }
}
