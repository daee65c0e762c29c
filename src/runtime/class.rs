//! Linked runtime classes
//!
//! A `LinkedClass` is the fully resolved descriptor produced by the linker:
//! one method table, the declared-property layout, static-property aliasing,
//! the constant table, the initializer chains and the ancestor vector. It is
//! immutable once published. The only mutable parts are the lifecycle state,
//! the cache slot and the strong links to parent/interfaces/traits, which are
//! dropped when the class is destroyed so otherwise unreferenced ancestors can
//! be reclaimed.

use crate::compiler::decl::{ClassDecl, InstanceCtor};
use crate::core::{Attr, Symbol, Val, Visibility};
use crate::runtime::func::{ClassId, ClassRef, Func};
use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Size of the object header preceding builtin payload and declared
/// properties.
pub const OBJECT_HEADER_SIZE: usize = 16;
/// Size of one declared-property slot.
pub const TYPED_VALUE_SIZE: usize = 16;
/// Marks cache slots that are valid in every request.
pub const PERSISTENT_SLOT_BIT: u32 = 1 << 31;

static NEXT_LAYOUT_GENERATION: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_layout_generation() -> u64 {
    NEXT_LAYOUT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Method table keyed by lower-cased name. Slot index = insertion index.
pub type MethodTable = IndexMap<Symbol, Arc<Func>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClassState {
    Active = 0,
    Destroying = 1,
    /// Unpublished; contexts started before the retirement may still use it.
    ZombiePendingFree = 2,
    /// The registry's reference has been released. Callers still holding an
    /// `Arc` keep the memory alive until they drop it.
    Freed = 3,
}

impl ClassState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ClassState::Active,
            1 => ClassState::Destroying,
            2 => ClassState::ZombiePendingFree,
            _ => ClassState::Freed,
        }
    }
}

bitflags! {
    /// Magic methods the object layer needs to know about without a
    /// method-table lookup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MagicMethods: u8 {
        const HAS_SLEEP       = 1 << 0;
        const USE_GET         = 1 << 1;
        const USE_SET         = 1 << 2;
        const USE_ISSET       = 1 << 3;
        const USE_UNSET       = 1 << 4;
        const HAS_CALL        = 1 << 5;
        const HAS_CALL_STATIC = 1 << 6;
    }
}

impl Default for MagicMethods {
    fn default() -> Self {
        MagicMethods::empty()
    }
}

/// Declared instance property.
#[derive(Debug, Clone)]
pub struct Prop {
    pub name: Symbol,
    pub mangled_name: Symbol,
    /// Key under which initializer routines address the property.
    pub original_mangled_name: Symbol,
    pub attrs: Attr,
    /// First class in the hierarchy to declare the property.
    pub class: ClassRef,
    pub type_constraint: Option<Symbol>,
    pub doc_comment: Option<Arc<str>>,
}

impl Prop {
    pub fn visibility(&self) -> Visibility {
        self.attrs.visibility()
    }

    pub fn is_deep_init(&self) -> bool {
        self.attrs.contains(Attr::DEEP_INIT)
    }

    /// Key used in initializer scratch containers.
    pub fn init_key(&self) -> Symbol {
        if self.attrs.is_private() {
            self.original_mangled_name
        } else {
            self.name
        }
    }
}

/// Declared-property table. Private properties inherited from ancestors are
/// kept in layout order but have no name entry.
#[derive(Debug, Clone, Default)]
pub struct PropTable {
    props: Vec<Prop>,
    index: HashMap<Symbol, usize>,
}

impl PropTable {
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn find(&self, name: Symbol) -> Option<usize> {
        self.index.get(&name).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&Prop> {
        self.props.get(slot)
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> &mut Prop {
        &mut self.props[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prop> {
        self.props.iter()
    }

    pub(crate) fn add(&mut self, prop: Prop) -> usize {
        let slot = self.props.len();
        self.index.insert(prop.name, slot);
        self.props.push(prop);
        slot
    }

    pub(crate) fn add_unnamed(&mut self, prop: Prop) -> usize {
        let slot = self.props.len();
        self.props.push(prop);
        slot
    }
}

/// Static property. `val` is only meaningful on the owning class; aliases
/// carry `Val::Uninit` and resolve to the owner's storage at runtime.
#[derive(Debug, Clone)]
pub struct SProp {
    pub name: Symbol,
    pub attrs: Attr,
    pub class: ClassRef,
    pub val: Val,
    pub type_constraint: Option<Symbol>,
    pub doc_comment: Option<Arc<str>>,
}

impl SProp {
    pub fn visibility(&self) -> Visibility {
        self.attrs.visibility()
    }
}

#[derive(Debug, Clone)]
pub struct Const {
    pub name: Symbol,
    pub class: ClassRef,
    pub class_is_interface: bool,
    /// `Val::Uninit` for non-scalar initializers.
    pub val: Val,
    pub php_code: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct SpecialMethods {
    pub ctor: Arc<Func>,
    pub to_string: Option<Arc<Func>>,
    pub dtor: Option<Arc<Func>>,
    pub invoke: Option<Arc<Func>>,
    /// This class's own `86cinit`, if its declaration carries one.
    pub cinit: Option<Arc<Func>>,
}

/// Strong references released on destroy.
#[derive(Debug, Default)]
pub(crate) struct ClassLinks {
    pub parent: Option<Arc<LinkedClass>>,
    pub decl_interfaces: Vec<Arc<LinkedClass>>,
    pub used_traits: Vec<Arc<LinkedClass>>,
    pub interfaces: Vec<Arc<LinkedClass>>,
}

/// Published layout identity. Compiled code records the stamp it was built
/// against and re-validates before trusting cached offsets or slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutStamp {
    pub class: ClassId,
    pub generation: u64,
}

pub struct LinkedClass {
    pub(crate) id: ClassId,
    pub(crate) decl: Arc<ClassDecl>,
    pub(crate) attrs: Attr,
    pub(crate) links: RwLock<ClassLinks>,
    pub(crate) parent_id: Option<ClassId>,
    pub(crate) class_vec: SmallVec<[Weak<LinkedClass>; 4]>,
    pub(crate) methods: MethodTable,
    pub(crate) traits_begin: usize,
    pub(crate) traits_end: usize,
    pub(crate) special: SpecialMethods,
    pub(crate) magic: MagicMethods,
    pub(crate) interface_names: IndexMap<Symbol, Symbol>,
    pub(crate) decl_interface_names: Vec<Symbol>,
    pub(crate) used_trait_names: Vec<Symbol>,
    pub(crate) trait_aliases: Vec<(Symbol, Symbol)>,
    pub(crate) constants: IndexMap<Symbol, Const>,
    pub(crate) decl_props: PropTable,
    pub(crate) decl_prop_init: Vec<Val>,
    pub(crate) decl_prop_num_accessible: usize,
    pub(crate) has_deep_init_props: bool,
    pub(crate) static_props: IndexMap<Symbol, SProp>,
    pub(crate) pinit_vec: Vec<Arc<Func>>,
    pub(crate) sinit_vec: Vec<Arc<Func>>,
    pub(crate) instance_ctor: Option<InstanceCtor>,
    pub(crate) builtin_prop_size: usize,
    pub(crate) layout_generation: u64,
    pub(crate) cached_slot: AtomicU32,
    pub(crate) state: AtomicU8,
}

impl std::fmt::Debug for LinkedClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedClass")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl LinkedClass {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> Symbol {
        self.decl.name
    }

    pub fn class_ref(&self) -> ClassRef {
        ClassRef {
            id: self.id,
            name: self.decl.name,
        }
    }

    pub fn decl(&self) -> &Arc<ClassDecl> {
        &self.decl
    }

    pub fn attrs(&self) -> Attr {
        self.attrs
    }

    pub fn is_interface(&self) -> bool {
        self.attrs.contains(Attr::INTERFACE)
    }

    pub fn is_trait(&self) -> bool {
        self.attrs.contains(Attr::TRAIT)
    }

    pub fn is_abstract(&self) -> bool {
        self.attrs.is_abstract()
    }

    /// Neither interface nor trait.
    pub fn is_normal_class(&self) -> bool {
        !self.attrs.intersects(Attr::INTERFACE | Attr::TRAIT)
    }

    pub fn parent(&self) -> Option<Arc<LinkedClass>> {
        self.links.read().parent.clone()
    }

    pub fn parent_id(&self) -> Option<ClassId> {
        self.parent_id
    }

    pub fn declared_interfaces(&self) -> Vec<Arc<LinkedClass>> {
        self.links.read().decl_interfaces.clone()
    }

    pub fn used_traits(&self) -> Vec<Arc<LinkedClass>> {
        self.links.read().used_traits.clone()
    }

    /// Every interface this class implements, directly or inherited.
    pub fn interfaces(&self) -> Vec<Arc<LinkedClass>> {
        self.links.read().interfaces.clone()
    }

    pub fn implements(&self, iface: Symbol) -> bool {
        self.interface_names.contains_key(&iface.lower())
    }

    pub fn trait_aliases(&self) -> &[(Symbol, Symbol)] {
        &self.trait_aliases
    }

    // ---- ancestor vector ----

    /// Inheritance depth; the root class has depth 0.
    pub fn depth(&self) -> usize {
        self.class_vec.len() - 1
    }

    /// Ancestor at inheritance depth `depth`, or `None` past this class or
    /// once the ancestor has been freed.
    pub fn ancestor_at(&self, depth: usize) -> Option<Arc<LinkedClass>> {
        self.class_vec.get(depth).and_then(Weak::upgrade)
    }

    /// Ancestor (or self) with identity `id`.
    pub fn ancestor_with_id(&self, id: ClassId) -> Option<Arc<LinkedClass>> {
        self.class_vec
            .iter()
            .filter_map(Weak::upgrade)
            .find(|c| c.id == id)
    }

    /// Class a member record points back to: self, an ancestor or an
    /// implemented interface.
    pub fn declaring_class(&self, cls: ClassRef) -> Option<Arc<LinkedClass>> {
        self.ancestor_with_id(cls.id).or_else(|| {
            self.links
                .read()
                .interfaces
                .iter()
                .find(|i| i.id == cls.id)
                .cloned()
        })
    }

    /// O(1) class-hierarchy test through the ancestor vector. A class is a
    /// subclass of itself.
    pub fn is_subclass_of(&self, other: &LinkedClass) -> bool {
        let depth = other.class_vec.len() - 1;
        self.class_vec
            .get(depth)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), other as *const LinkedClass))
    }

    /// `instanceof`: ancestor classes and implemented interfaces.
    pub fn classof(&self, other: &LinkedClass) -> bool {
        if other.is_interface() {
            return self.id == other.id || self.implements(other.name());
        }
        self.is_subclass_of(other)
    }

    /// Deepest class that both `self` and `other` descend from.
    pub fn common_ancestor(&self, other: &LinkedClass) -> Option<Arc<LinkedClass>> {
        let shared = self.class_vec.len().min(other.class_vec.len());
        (0..shared)
            .rev()
            .find(|&i| Weak::ptr_eq(&self.class_vec[i], &other.class_vec[i]))
            .and_then(|i| self.class_vec[i].upgrade())
    }

    // ---- methods ----

    /// Case-insensitive method lookup.
    pub fn resolve_method(&self, name: Symbol) -> Option<&Arc<Func>> {
        self.methods.get(&name.lower())
    }

    pub fn method_at(&self, slot: usize) -> Option<&Arc<Func>> {
        self.methods.get_index(slot).map(|(_, f)| f)
    }

    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<Func>> {
        self.methods.values()
    }

    /// Methods imported from traits, in import order.
    pub fn trait_methods(&self) -> impl Iterator<Item = &Arc<Func>> {
        self.methods.values().skip(self.traits_begin).take(self.traits_end - self.traits_begin)
    }

    pub fn ctor(&self) -> &Arc<Func> {
        &self.special.ctor
    }

    /// Constructor declared by user code, if any.
    pub fn declared_ctor(&self) -> Option<&Arc<Func>> {
        let ctor = &self.special.ctor;
        (!ctor.is_generated()).then_some(ctor)
    }

    pub fn to_string_method(&self) -> Option<&Arc<Func>> {
        self.special.to_string.as_ref()
    }

    pub fn dtor(&self) -> Option<&Arc<Func>> {
        self.special.dtor.as_ref()
    }

    pub fn invoke_method(&self) -> Option<&Arc<Func>> {
        self.special.invoke.as_ref()
    }

    /// This class's own `86cinit`, used for constants it declares.
    pub fn const_initializer(&self) -> Option<&Arc<Func>> {
        self.special.cinit.as_ref()
    }

    pub fn magic_methods(&self) -> MagicMethods {
        self.magic
    }

    /// Whether `method` counts as declared by this class. Trait imports
    /// count as declared by the importing class.
    pub fn declared_method(&self, method: &Func) -> bool {
        method.base_cls.id == self.id || (method.cls.id == self.id && method.pre_class == self.name())
    }

    // ---- constants ----

    pub fn constant(&self, name: Symbol) -> Option<&Const> {
        self.constants.get(&name)
    }

    pub fn constants(&self) -> impl Iterator<Item = &Const> {
        self.constants.values()
    }

    // ---- properties ----

    pub fn decl_props(&self) -> &PropTable {
        &self.decl_props
    }

    pub fn num_decl_props(&self) -> usize {
        self.decl_props.len()
    }

    /// Declared properties visible to enumeration (inherited privates
    /// excluded).
    pub fn num_accessible_decl_props(&self) -> usize {
        self.decl_prop_num_accessible
    }

    pub fn lookup_decl_prop(&self, name: Symbol) -> Option<usize> {
        self.decl_props.find(name)
    }

    /// Declared initial values, `Val::Uninit` where an initializer runs.
    pub fn decl_prop_init(&self) -> &[Val] {
        &self.decl_prop_init
    }

    pub fn has_deep_init_props(&self) -> bool {
        self.has_deep_init_props
    }

    pub fn static_props(&self) -> impl Iterator<Item = &SProp> {
        self.static_props.values()
    }

    pub fn num_static_props(&self) -> usize {
        self.static_props.len()
    }

    pub fn lookup_sprop(&self, name: Symbol) -> Option<(usize, &SProp)> {
        self.static_props.get_full(&name).map(|(i, _, p)| (i, p))
    }

    pub fn sprop_at(&self, slot: usize) -> Option<&SProp> {
        self.static_props.get_index(slot).map(|(_, p)| p)
    }

    // ---- initializers ----

    pub fn pinit_vec(&self) -> &[Arc<Func>] {
        &self.pinit_vec
    }

    pub fn sinit_vec(&self) -> &[Arc<Func>] {
        &self.sinit_vec
    }

    /// Per-request state must be materialized before first use.
    pub fn needs_initialization(&self) -> bool {
        !self.pinit_vec.is_empty() || !self.static_props.is_empty()
    }

    pub fn has_init_methods(&self) -> bool {
        !self.pinit_vec.is_empty() || !self.sinit_vec.is_empty()
    }

    // ---- layout ----

    pub fn instance_ctor(&self) -> Option<InstanceCtor> {
        self.instance_ctor
    }

    pub fn builtin_prop_size(&self) -> usize {
        self.builtin_prop_size
    }

    /// Byte offset of declared-property `slot` inside an object.
    pub fn decl_prop_offset(&self, slot: usize) -> usize {
        OBJECT_HEADER_SIZE + self.builtin_prop_size + slot * TYPED_VALUE_SIZE
    }

    pub fn layout_stamp(&self) -> LayoutStamp {
        LayoutStamp {
            class: self.id,
            generation: self.layout_generation,
        }
    }

    /// A stamp is trusted only for the live class it was taken from.
    pub fn validate_layout(&self, stamp: LayoutStamp) -> bool {
        stamp.class == self.id
            && stamp.generation == self.layout_generation
            && self.state() == ClassState::Active
    }

    // ---- lifecycle ----

    pub fn state(&self) -> ClassState {
        ClassState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ClassState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_zombie(&self) -> bool {
        self.state() != ClassState::Active
    }

    pub fn cached_slot(&self) -> u32 {
        self.cached_slot.load(Ordering::Acquire)
    }

    pub fn is_persistent(&self) -> bool {
        self.cached_slot() & PERSISTENT_SLOT_BIT != 0
    }

    /// Persistent only when every dependency is persistent too.
    pub fn verify_persistent(&self) -> bool {
        if !self.attrs.contains(Attr::PERSISTENT) {
            return false;
        }
        let links = self.links.read();
        links.parent.iter().all(|p| p.is_persistent())
            && links.decl_interfaces.iter().all(|i| i.is_persistent())
            && links.used_traits.iter().all(|t| t.is_persistent())
    }

    /// Drop strong references to ancestors, interfaces and traits.
    ///
    /// The parent stays linked while this class's table still shares a
    /// `Func` owned by an ancestor, since children of this class may still
    /// reach it only through us. Safe to call more than once.
    pub(crate) fn release_refs(&self) {
        let shares_ancestor_funcs = self
            .methods
            .values()
            .any(|f| f.cls.id != self.id && (f.attrs.is_private() || !f.has_static_locals()));
        let mut links = self.links.write();
        if !shares_ancestor_funcs {
            links.parent = None;
        }
        links.decl_interfaces.clear();
        links.used_traits.clear();
        links.interfaces.clear();
    }
}

impl Drop for LinkedClass {
    fn drop(&mut self) {
        tracing::trace!(class = %self.decl.name, id = self.id.0, "class freed");
    }
}
