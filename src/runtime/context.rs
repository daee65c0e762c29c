//! Engine and request contexts
//!
//! `EngineContext` is process-wide: configuration, the class registry and
//! the optional autoloader. `RequestContext` is one execution context. It
//! holds the per-request view of which classes are defined plus the lazily
//! built instance defaults, static-property storage and non-scalar constant
//! values. None of that per-request state is shared; only the linked classes
//! it derives from are.

use crate::compiler::decl::{ClassDecl, FuncBody};
use crate::core::{Symbol, Val};
use crate::runtime::avail::{Availability, avail};
use crate::runtime::class::{LinkedClass, SProp};
use crate::runtime::error::{LinkError, RuntimeError};
use crate::runtime::func::ClassId;
use crate::runtime::init::{PropInitVec, init_props, run_sinits};
use crate::runtime::linker::{ClassResolver, LinkOptions, link_class};
use crate::runtime::registry::{ClassRegistry, NamedEntity};
use crate::runtime::treadmill::RequestToken;
use crate::vm::visibility::sprop_accessible;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Source of declarations for classes referenced before they are defined.
pub trait Autoloader: Send + Sync {
    fn load(&self, name: Symbol) -> Option<Arc<ClassDecl>>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consult the autoloader for unknown parents, interfaces and traits.
    pub autoload: bool,
    /// Nested autoloads allowed while one class definition is in flight.
    pub max_autoload_depth: usize,
    /// Honor `__MockClass` declarations.
    pub allow_mock_classes: bool,
    /// Publish PERSISTENT classes to every context.
    pub persistent_classes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autoload: true,
            max_autoload_depth: 64,
            allow_mock_classes: false,
            persistent_classes: true,
        }
    }
}

pub struct EngineContext {
    pub registry: ClassRegistry,
    pub config: EngineConfig,
    autoloader: Option<Arc<dyn Autoloader>>,
}

impl EngineContext {
    pub fn new() -> Self {
        Self {
            registry: ClassRegistry::new(),
            config: EngineConfig::default(),
            autoloader: None,
        }
    }

    pub fn autoloader(&self) -> Option<&Arc<dyn Autoloader>> {
        self.autoloader.as_ref()
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            allow_mock_classes: self.config.allow_mock_classes,
        }
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating an EngineContext
///
/// # Example
/// ```ignore
/// let engine = EngineBuilder::new()
///     .allow_mock_classes(true)
///     .with_autoloader(manifest)
///     .build();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    autoloader: Option<Arc<dyn Autoloader>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            autoloader: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn autoload(mut self, enabled: bool) -> Self {
        self.config.autoload = enabled;
        self
    }

    pub fn max_autoload_depth(mut self, depth: usize) -> Self {
        self.config.max_autoload_depth = depth;
        self
    }

    pub fn allow_mock_classes(mut self, allow: bool) -> Self {
        self.config.allow_mock_classes = allow;
        self
    }

    pub fn persistent_classes(mut self, enabled: bool) -> Self {
        self.config.persistent_classes = enabled;
        self
    }

    pub fn with_autoloader<A: Autoloader + 'static>(mut self, loader: A) -> Self {
        self.autoloader = Some(Arc::new(loader));
        self
    }

    pub fn build(self) -> Arc<EngineContext> {
        Arc::new(EngineContext {
            registry: ClassRegistry::new(),
            config: self.config,
            autoloader: self.autoloader,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One static property as seen by a request.
#[derive(Debug, Clone)]
enum SPropCell {
    Value(Val),
    /// Inherited: lives in the owning class's cell.
    Indirect { owner: ClassId, slot: usize },
}

/// Address of a static property's storage in this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSlot {
    pub owner: ClassId,
    pub slot: usize,
}

pub struct RequestContext {
    pub engine: Arc<EngineContext>,
    /// Entity slot -> class defined in this request.
    classes: HashMap<u32, Arc<LinkedClass>>,
    prop_data: HashMap<ClassId, Arc<PropInitVec>>,
    sprop_data: HashMap<ClassId, Vec<SPropCell>>,
    const_cache: HashMap<(ClassId, Symbol), Val>,
    /// Lower-cased names currently being defined or autoloaded.
    loading: HashSet<Symbol>,
    token: RequestToken,
}

impl RequestContext {
    pub fn new(engine: Arc<EngineContext>) -> Self {
        let token = engine.registry.treadmill().start_request();
        trace!(?token, "request context created");
        Self {
            engine,
            classes: HashMap::new(),
            prop_data: HashMap::new(),
            sprop_data: HashMap::new(),
            const_cache: HashMap::new(),
            loading: HashSet::new(),
            token,
        }
    }

    // ---- class definition ----

    /// Class currently bound to `name` in this request, including persistent
    /// classes. Destroyed classes are never returned.
    pub fn lookup_class(&self, name: Symbol) -> Option<Arc<LinkedClass>> {
        let entity = self.engine.registry.find_entity(name)?;
        if let Some(cls) = self.classes.get(&entity.slot()) {
            if !cls.is_zombie() {
                return Some(Arc::clone(cls));
            }
        }
        self.engine
            .registry
            .persistent_class(entity.slot())
            .filter(|c| !c.is_zombie())
    }

    /// Look `name` up, autoloading it when unknown and autoload is enabled.
    pub fn load_class(&mut self, name: Symbol) -> Result<Option<Arc<LinkedClass>>, LinkError> {
        if let Some(cls) = self.lookup_class(name) {
            return Ok(Some(cls));
        }
        let config = &self.engine.config;
        if !config.autoload {
            return Ok(None);
        }
        let key = name.lower();
        if self.loading.contains(&key) || self.loading.len() >= config.max_autoload_depth {
            debug!(class = %name, depth = self.loading.len(), "autoload refused");
            return Ok(None);
        }
        let Some(loader) = self.engine.autoloader().cloned() else {
            return Ok(None);
        };
        let Some(decl) = loader.load(name) else {
            return Ok(None);
        };

        trace!(class = %name, "autoloading");
        self.define_class(&decl).map(Some)
    }

    /// Define `decl` in this request. A class already linked by another
    /// context against the same dependency identities is reused; otherwise
    /// the declaration is linked and published.
    pub fn define_class(&mut self, decl: &Arc<ClassDecl>) -> Result<Arc<LinkedClass>, LinkError> {
        // The install lock is not reentrant: a dependency cycle must end in
        // an unresolved name, never in a second definition of this one.
        let key = decl.name.lower();
        let outermost = self.loading.insert(key);
        let result = self.define_class_locked(decl);
        if outermost {
            self.loading.remove(&key);
        }
        result
    }

    fn define_class_locked(&mut self, decl: &Arc<ClassDecl>) -> Result<Arc<LinkedClass>, LinkError> {
        if let Some(existing) = self.lookup_class(decl.name) {
            if Arc::ptr_eq(existing.decl(), decl) {
                return Ok(existing);
            }
            return Err(LinkError::Redeclared { class: decl.name });
        }

        let parent = match decl.parent {
            Some(parent_name) => match self.load_class(parent_name)? {
                Some(parent) => Some(parent),
                None => return Err(LinkError::unresolved(decl.name, parent_name, "Class")),
            },
            None => None,
        };

        let engine = Arc::clone(&self.engine);
        let entity = engine.registry.entity(decl.name);

        if let Some(cls) = self.find_reusable(&entity, decl)? {
            return Ok(self.bind(&entity, cls));
        }

        let cls = {
            let _install = entity.install_lock();
            // Another context may have linked it while we waited.
            if let Some(cls) = self.find_reusable(&entity, decl)? {
                cls
            } else {
                let cls = link_class(decl, parent, self, engine.link_options())?;
                let persistent = engine.config.persistent_classes && cls.verify_persistent();
                engine.registry.publish(&entity, &cls, persistent);
                cls
            }
        };
        Ok(self.bind(&entity, cls))
    }

    fn find_reusable(
        &mut self,
        entity: &NamedEntity,
        decl: &Arc<ClassDecl>,
    ) -> Result<Option<Arc<LinkedClass>>, LinkError> {
        let engine = Arc::clone(&self.engine);
        for cls in entity.classes() {
            if !Arc::ptr_eq(cls.decl(), decl) || cls.is_zombie() {
                continue;
            }
            match avail(&cls, self, &engine.registry)? {
                Availability::Available => {
                    trace!(class = %cls.name(), id = cls.id().0, "reusing linked class");
                    return Ok(Some(cls));
                }
                Availability::Recoverable => {}
                Availability::Fatal { missing } => {
                    return Err(LinkError::unresolved(decl.name, missing, "Class"));
                }
            }
        }
        Ok(None)
    }

    fn bind(&mut self, entity: &NamedEntity, cls: Arc<LinkedClass>) -> Arc<LinkedClass> {
        debug!(class = %cls.name(), id = cls.id().0, "class defined");
        self.classes.insert(entity.slot(), Arc::clone(&cls));
        cls
    }

    /// Classes defined in this request, in no particular order.
    pub fn defined_classes(&self) -> impl Iterator<Item = &Arc<LinkedClass>> {
        self.classes.values()
    }

    // ---- instance properties ----

    /// Instance-property defaults of `cls`, computed on first use.
    pub fn init_props(&mut self, cls: &LinkedClass) -> Result<Arc<PropInitVec>, RuntimeError> {
        if let Some(vec) = self.prop_data.get(&cls.id()) {
            return Ok(Arc::clone(vec));
        }
        let vec = Arc::new(init_props(cls)?);
        self.prop_data.insert(cls.id(), Arc::clone(&vec));
        Ok(vec)
    }

    // ---- static properties ----

    /// Materialize the static-property storage of `cls` (and of every
    /// ancestor owning one of its statics) for this request.
    pub fn ensure_sprops(&mut self, cls: &LinkedClass) -> Result<(), RuntimeError> {
        if self.sprop_data.contains_key(&cls.id()) {
            return Ok(());
        }
        let produced = run_sinits(cls)?;

        let mut cells = Vec::with_capacity(cls.num_static_props());
        let mut owner_writes = Vec::new();
        for sprop in cls.static_props() {
            let val = produced
                .get(&sprop.name)
                .filter(|v| !v.is_sentinel())
                .cloned();
            if sprop.class.id == cls.id() {
                let val = match val {
                    Some(v) => v,
                    None if sprop.val.is_uninit() => {
                        return Err(RuntimeError::PropertyNotInitialized {
                            class: cls.name(),
                            property: sprop.name,
                        });
                    }
                    None => sprop.val.clone(),
                };
                cells.push(SPropCell::Value(val));
            } else {
                let owner = cls
                    .ancestor_with_id(sprop.class.id)
                    .ok_or(RuntimeError::UndefinedStaticProperty {
                        class: sprop.class.name,
                        property: sprop.name,
                    })?;
                self.ensure_sprops(&owner)?;
                let (slot, _) = owner.lookup_sprop(sprop.name).ok_or(
                    RuntimeError::UndefinedStaticProperty {
                        class: owner.name(),
                        property: sprop.name,
                    },
                )?;
                if let Some(v) = val {
                    owner_writes.push((owner.id(), slot, v));
                }
                cells.push(SPropCell::Indirect {
                    owner: owner.id(),
                    slot,
                });
            }
        }

        for (owner, slot, val) in owner_writes {
            if let Some(SPropCell::Value(cell)) =
                self.sprop_data.get_mut(&owner).and_then(|c| c.get_mut(slot))
            {
                *cell = val;
            }
        }
        trace!(class = %cls.name(), count = cells.len(), "static props initialized");
        self.sprop_data.insert(cls.id(), cells);
        Ok(())
    }

    fn lookup_sprop<'c>(
        cls: &'c LinkedClass,
        name: Symbol,
        ctx: Option<&LinkedClass>,
    ) -> Result<(usize, &'c SProp), RuntimeError> {
        let (slot, sprop) = cls
            .lookup_sprop(name)
            .ok_or(RuntimeError::UndefinedStaticProperty {
                class: cls.name(),
                property: name,
            })?;
        if !sprop_accessible(cls, sprop, ctx) {
            return Err(RuntimeError::Inaccessible {
                class: cls.name(),
                property: name,
                visibility: sprop.visibility().as_str(),
            });
        }
        Ok((slot, sprop))
    }

    /// Storage address of static `name` of `cls` as seen from class scope
    /// `ctx` (`None` for top-level code). Inherited statics resolve to the
    /// owner's storage.
    pub fn static_slot(
        &mut self,
        cls: &LinkedClass,
        name: Symbol,
        ctx: Option<&LinkedClass>,
    ) -> Result<StaticSlot, RuntimeError> {
        let (slot, _) = Self::lookup_sprop(cls, name, ctx)?;
        self.ensure_sprops(cls)?;
        match self.sprop_data.get(&cls.id()).and_then(|c| c.get(slot)) {
            Some(SPropCell::Indirect { owner, slot }) => Ok(StaticSlot {
                owner: *owner,
                slot: *slot,
            }),
            _ => Ok(StaticSlot {
                owner: cls.id(),
                slot,
            }),
        }
    }

    pub fn get_static_value(
        &mut self,
        cls: &LinkedClass,
        name: Symbol,
        ctx: Option<&LinkedClass>,
    ) -> Result<Val, RuntimeError> {
        let at = self.static_slot(cls, name, ctx)?;
        match self.sprop_data.get(&at.owner).and_then(|c| c.get(at.slot)) {
            Some(SPropCell::Value(v)) => Ok(v.clone()),
            _ => Err(RuntimeError::UndefinedStaticProperty {
                class: cls.name(),
                property: name,
            }),
        }
    }

    pub fn set_static_value(
        &mut self,
        cls: &LinkedClass,
        name: Symbol,
        ctx: Option<&LinkedClass>,
        val: Val,
    ) -> Result<(), RuntimeError> {
        let at = self.static_slot(cls, name, ctx)?;
        match self.sprop_data.get_mut(&at.owner).and_then(|c| c.get_mut(at.slot)) {
            Some(SPropCell::Value(cell)) => {
                *cell = val;
                Ok(())
            }
            _ => Err(RuntimeError::UndefinedStaticProperty {
                class: cls.name(),
                property: name,
            }),
        }
    }

    // ---- constants ----

    /// Value of class constant `name`. Non-scalar constants are computed by
    /// the declaring class's `86cinit` once per request.
    pub fn class_constant(&mut self, cls: &LinkedClass, name: Symbol) -> Result<Val, RuntimeError> {
        let undefined = || RuntimeError::UndefinedConstant {
            class: cls.name(),
            constant: name,
        };
        let constant = cls.constant(name).ok_or_else(undefined)?;
        if !constant.val.is_uninit() {
            return Ok(constant.val.clone());
        }

        let key = (constant.class.id, name);
        if let Some(val) = self.const_cache.get(&key) {
            return Ok(val.clone());
        }

        let declaring = cls.declaring_class(constant.class).ok_or_else(undefined)?;
        let cinit = declaring.const_initializer().ok_or_else(undefined)?;
        let val = match cinit.body() {
            FuncBody::ConstInit(body) => body(name)?,
            _ => {
                return Err(RuntimeError::initializer(
                    declaring.name(),
                    format!("{} cannot compute constants", cinit.full_name()),
                ));
            }
        };
        trace!(class = %declaring.name(), constant = %name, "constant initialized");
        self.const_cache.insert(key, val.clone());
        Ok(val)
    }

    // ---- lifecycle ----

    /// Declare that this request holds no class pointers obtained before
    /// this call, letting the treadmill release older retired classes.
    pub fn checkpoint(&self) {
        self.engine.registry.treadmill().checkpoint(self.token);
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }
}

impl ClassResolver for RequestContext {
    fn resolve_class(&mut self, name: Symbol) -> Result<Option<Arc<LinkedClass>>, LinkError> {
        self.load_class(name)
    }
}

/// Drop per-request state, then let the treadmill know this context is done.
impl Drop for RequestContext {
    fn drop(&mut self) {
        self.classes.clear();
        self.prop_data.clear();
        self.sprop_data.clear();
        self.const_cache.clear();
        let engine = Arc::clone(&self.engine);
        engine.registry.treadmill().finish_request(self.token);
    }
}
