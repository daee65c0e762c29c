//! Process-wide class registry
//!
//! Stored in `EngineContext` and shared by every request context. Each class
//! name owns a `NamedEntity`: a stable cache slot, the list of classes linked
//! under that name (one per distinct set of dependency identities) and the
//! install lock that serializes linking of that name. Classes whose whole
//! dependency chain is persistent are additionally published process-wide.

use crate::core::Symbol;
use crate::runtime::class::{ClassState, LinkedClass, PERSISTENT_SLOT_BIT};
use crate::runtime::func::ClassId;
use crate::runtime::treadmill::Treadmill;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Everything the registry knows about one class name.
#[derive(Debug)]
pub struct NamedEntity {
    name: Symbol,
    slot: u32,
    classes: Mutex<Vec<Arc<LinkedClass>>>,
    install_lock: Mutex<()>,
}

impl NamedEntity {
    fn new(name: Symbol, slot: u32) -> Self {
        Self {
            name,
            slot,
            classes: Mutex::new(Vec::new()),
            install_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> Symbol {
        self.name
    }

    /// Per-context cache slot for this name. Never zero.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Snapshot of the classes linked under this name, newest first.
    pub fn classes(&self) -> Vec<Arc<LinkedClass>> {
        self.classes.lock().iter().rev().cloned().collect()
    }

    /// Held while linking and publishing a class under this name.
    pub fn install_lock(&self) -> MutexGuard<'_, ()> {
        self.install_lock.lock()
    }

    fn push(&self, cls: Arc<LinkedClass>) {
        self.classes.lock().push(cls);
    }

    fn remove(&self, id: ClassId) -> bool {
        let mut classes = self.classes.lock();
        let before = classes.len();
        classes.retain(|c| c.id() != id);
        classes.len() != before
    }
}

#[derive(Debug)]
pub struct ClassRegistry {
    entities: RwLock<HashMap<Symbol, Arc<NamedEntity>>>,
    next_slot: AtomicU32,
    /// Serializes the Active -> Destroying transition.
    destroy_lock: Mutex<()>,
    persistent: RwLock<HashMap<u32, Arc<LinkedClass>>>,
    treadmill: Treadmill,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            next_slot: AtomicU32::new(1),
            destroy_lock: Mutex::new(()),
            persistent: RwLock::new(HashMap::new()),
            treadmill: Treadmill::new(),
        }
    }

    pub fn treadmill(&self) -> &Treadmill {
        &self.treadmill
    }

    /// Entity for `name` (case-insensitive), created on first use.
    pub fn entity(&self, name: Symbol) -> Arc<NamedEntity> {
        let key = name.lower();
        if let Some(entity) = self.entities.read().get(&key) {
            return Arc::clone(entity);
        }
        let mut entities = self.entities.write();
        let entity = entities.entry(key).or_insert_with(|| {
            let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
            Arc::new(NamedEntity::new(name, slot))
        });
        Arc::clone(entity)
    }

    pub fn find_entity(&self, name: Symbol) -> Option<Arc<NamedEntity>> {
        self.entities.read().get(&name.lower()).cloned()
    }

    /// Record a freshly linked class under its entity. Persistent classes
    /// become visible to every context right away.
    pub(crate) fn publish(&self, entity: &NamedEntity, cls: &Arc<LinkedClass>, persistent: bool) {
        let slot = if persistent {
            entity.slot | PERSISTENT_SLOT_BIT
        } else {
            entity.slot
        };
        cls.cached_slot.store(slot, Ordering::Release);
        entity.push(Arc::clone(cls));
        if persistent {
            self.persistent.write().insert(entity.slot, Arc::clone(cls));
        }
        debug!(class = %cls.name(), id = cls.id().0, slot = entity.slot, persistent, "class published");
    }

    /// Persistent class published under `slot`, if any.
    pub fn persistent_class(&self, slot: u32) -> Option<Arc<LinkedClass>> {
        self.persistent.read().get(&slot).cloned()
    }

    pub fn num_classes(&self) -> usize {
        self.entities
            .read()
            .values()
            .map(|e| e.classes.lock().len())
            .sum()
    }

    /// Retire `cls`: unpublish it, drop its links to other classes and hand
    /// the registry's reference to the treadmill. Returns `false` when the
    /// class was already past `Active`.
    pub fn destroy_class(&self, cls: &Arc<LinkedClass>) -> bool {
        if cls.state() != ClassState::Active {
            return false;
        }
        {
            let _guard = self.destroy_lock.lock();
            if cls.state() != ClassState::Active {
                return false;
            }
            cls.set_state(ClassState::Destroying);
            let slot = cls.cached_slot() & !PERSISTENT_SLOT_BIT;
            cls.cached_slot.store(0, Ordering::Release);

            if let Some(entity) = self.find_entity(cls.name()) {
                entity.remove(cls.id());
            }
            let mut persistent = self.persistent.write();
            if persistent.get(&slot).is_some_and(|p| p.id() == cls.id()) {
                persistent.remove(&slot);
            }
            drop(persistent);

            cls.release_refs();
            cls.set_state(ClassState::ZombiePendingFree);
        }
        debug!(class = %cls.name(), id = cls.id().0, "class destroyed");

        let victim = Arc::clone(cls);
        self.treadmill.enqueue(move || {
            victim.set_state(ClassState::Freed);
            tracing::trace!(class = %victim.name(), id = victim.id().0, "class reclaimed");
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::decl::ClassDecl;
    use crate::core::intern;
    use crate::runtime::linker::tests::MapResolver;

    #[test]
    fn test_entity_slots_are_stable_and_case_insensitive() {
        let registry = ClassRegistry::new();
        let a = registry.entity(intern("Widget"));
        let b = registry.entity(intern("WIDGET"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_ne!(a.slot(), 0);
        assert_ne!(registry.entity(intern("Other")).slot(), a.slot());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        let cls = r.link(ClassDecl::class("Doomed")).unwrap();
        let entity = registry.entity(cls.name());
        registry.publish(&entity, &cls, false);
        assert_eq!(registry.num_classes(), 1);
        assert_eq!(cls.cached_slot(), entity.slot());

        assert!(registry.destroy_class(&cls));
        assert!(!registry.destroy_class(&cls));
        assert_eq!(registry.num_classes(), 0);
        assert_eq!(cls.cached_slot(), 0);
        // No request is active, so the treadmill released it at once.
        assert_eq!(cls.state(), ClassState::Freed);
    }

    #[test]
    fn test_destroy_waits_for_running_requests() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        let cls = r.link(ClassDecl::class("Pinned")).unwrap();
        let entity = registry.entity(cls.name());
        registry.publish(&entity, &cls, true);
        assert!(cls.is_persistent());
        assert!(registry.persistent_class(entity.slot()).is_some());

        let token = registry.treadmill().start_request();
        registry.destroy_class(&cls);
        assert_eq!(cls.state(), ClassState::ZombiePendingFree);
        assert!(registry.persistent_class(entity.slot()).is_none());
        registry.treadmill().finish_request(token);
        assert_eq!(cls.state(), ClassState::Freed);
    }

    #[test]
    fn test_destroy_releases_parent_link() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("Anchor")).unwrap();
        let child = r.link(ClassDecl::class("Drifter").extends("Anchor")).unwrap();
        assert!(child.parent().is_some());
        registry.destroy_class(&child);
        assert!(child.parent().is_none());
    }
}
