//! Class linking
//!
//! `link_class` turns one `ClassDecl` plus its already-linked parent into a
//! `LinkedClass`. The steps run in a fixed order, each one reading what the
//! previous steps produced:
//!
//! 1. validate the parent and inherit the native layout
//! 2. resolve used traits
//! 3. build the method table (own methods, then trait imports)
//! 4. resolve special methods and magic-method flags
//! 5. collect interfaces and check interface methods
//! 6. build the constant table
//! 7. lay out instance and static properties (trait properties last)
//! 8. assemble the initializer chains
//! 9. publish the class with its ancestor vector
//!
//! Any step may fail with a `LinkError`; nothing is published in that case.

use crate::compiler::decl::{ClassDecl, FuncDecl, InstanceCtor, SD_86CINIT, SD_86CTOR, SD_CONSTRUCT};
use crate::core::{Attr, Symbol, Val, intern};
use crate::runtime::class::{
    ClassLinks, ClassState, Const, LinkedClass, MagicMethods, MethodTable, PropTable, SProp,
    SpecialMethods, next_layout_generation,
};
use crate::runtime::error::LinkError;
use crate::runtime::func::{ClassId, ClassRef, Func};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32};
use tracing::debug;

lazy_static! {
    static ref SD_TOSTRING: Symbol = intern("__toString");
    static ref SD_DESTRUCT: Symbol = intern("__destruct");
    static ref SD_INVOKE: Symbol = intern("__invoke");
    static ref MAGIC_METHODS: Vec<(Symbol, MagicMethods)> = vec![
        (intern("__sleep"), MagicMethods::HAS_SLEEP),
        (intern("__get"), MagicMethods::USE_GET),
        (intern("__set"), MagicMethods::USE_SET),
        (intern("__isset"), MagicMethods::USE_ISSET),
        (intern("__unset"), MagicMethods::USE_UNSET),
        (intern("__call"), MagicMethods::HAS_CALL),
        (intern("__callStatic"), MagicMethods::HAS_CALL_STATIC),
    ];
}

/// Name-to-class lookup used while linking. Implementations may load
/// missing classes on demand; a load that itself fails to link reports its
/// error through the `Err` arm.
pub trait ClassResolver {
    fn resolve_class(&mut self, name: Symbol) -> Result<Option<Arc<LinkedClass>>, LinkError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Honor `__MockClass` on declarations.
    pub allow_mock_classes: bool,
}

/// Link `decl` against `parent`, resolving interfaces and traits through
/// `resolver`.
pub fn link_class(
    decl: &Arc<ClassDecl>,
    parent: Option<Arc<LinkedClass>>,
    resolver: &mut dyn ClassResolver,
    options: LinkOptions,
) -> Result<Arc<LinkedClass>, LinkError> {
    if let Some(parent_name) = decl.parent {
        match &parent {
            None => return Err(LinkError::unresolved(decl.name, parent_name, "Class")),
            Some(p) if !p.name().eq_ignore_case(parent_name) => {
                return Err(LinkError::unresolved(decl.name, parent_name, "Class"));
            }
            Some(_) => {}
        }
    }

    let mut builder = ClassBuilder::new(decl, parent, options);
    builder.set_parent()?;
    builder.set_used_traits(resolver)?;
    builder.set_methods()?;
    builder.set_special();
    builder.set_magic_methods();
    builder.set_interfaces(resolver)?;
    builder.set_constants()?;
    builder.set_properties()?;
    builder.set_initializers();
    let cls = builder.finish();

    debug!(
        class = %cls.name(),
        id = cls.id().0,
        methods = cls.num_methods(),
        props = cls.num_decl_props(),
        sprops = cls.num_static_props(),
        depth = cls.depth(),
        "linked class"
    );
    Ok(cls)
}

/// Mutable state of one link in progress.
pub(crate) struct ClassBuilder<'a> {
    pub(crate) decl: &'a Arc<ClassDecl>,
    pub(crate) me: ClassRef,
    pub(crate) attrs: Attr,
    pub(crate) options: LinkOptions,
    pub(crate) parent: Option<Arc<LinkedClass>>,
    pub(crate) used_traits: Vec<Arc<LinkedClass>>,
    pub(crate) decl_interfaces: Vec<Arc<LinkedClass>>,
    pub(crate) interfaces: IndexMap<Symbol, Arc<LinkedClass>>,
    pub(crate) methods: MethodTable,
    pub(crate) traits_begin: usize,
    pub(crate) traits_end: usize,
    pub(crate) trait_aliases: Vec<(Symbol, Symbol)>,
    pub(crate) special: Option<SpecialMethods>,
    pub(crate) magic: MagicMethods,
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
}

impl<'a> ClassBuilder<'a> {
    fn new(decl: &'a Arc<ClassDecl>, parent: Option<Arc<LinkedClass>>, options: LinkOptions) -> Self {
        let me = ClassRef {
            id: ClassId::next(),
            name: decl.name,
        };
        Self {
            decl,
            me,
            attrs: decl.attrs,
            options,
            parent,
            used_traits: Vec::new(),
            decl_interfaces: Vec::new(),
            interfaces: IndexMap::new(),
            methods: IndexMap::new(),
            traits_begin: 0,
            traits_end: 0,
            trait_aliases: Vec::new(),
            special: None,
            magic: MagicMethods::empty(),
            constants: IndexMap::new(),
            decl_props: PropTable::default(),
            decl_prop_init: Vec::new(),
            decl_prop_num_accessible: 0,
            has_deep_init_props: false,
            static_props: IndexMap::new(),
            pinit_vec: Vec::new(),
            sinit_vec: Vec::new(),
            instance_ctor: None,
            builtin_prop_size: 0,
        }
    }

    pub(crate) fn name(&self) -> Symbol {
        self.decl.name
    }

    /// Mock classes may extend final classes and override final methods.
    pub(crate) fn is_mock(&self) -> bool {
        self.options.allow_mock_classes && self.decl.is_mock()
    }

    fn set_parent(&mut self) -> Result<(), LinkError> {
        if let Some(parent) = &self.parent {
            let pattrs = parent.attrs();
            if pattrs.intersects(Attr::FINAL | Attr::INTERFACE | Attr::TRAIT) {
                let mocked_final = pattrs.is_final()
                    && !pattrs.intersects(Attr::INTERFACE | Attr::TRAIT)
                    && self.is_mock();
                if !mocked_final {
                    let kind = if pattrs.is_final() {
                        "final class"
                    } else if pattrs.contains(Attr::INTERFACE) {
                        "interface"
                    } else {
                        "trait"
                    };
                    return Err(LinkError::IllegalInheritance {
                        class: self.name(),
                        message: format!(
                            "Class {} may not inherit from {} ({})",
                            self.name(),
                            kind,
                            parent.name()
                        ),
                    });
                }
            }
        }

        if let Some(ctor) = self.decl.instance_ctor {
            self.instance_ctor = Some(ctor);
            self.builtin_prop_size = self.decl.builtin_prop_size;
        } else if let Some(parent) = &self.parent {
            self.instance_ctor = parent.instance_ctor();
            self.builtin_prop_size = parent.builtin_prop_size();
        }
        Ok(())
    }

    fn set_used_traits(&mut self, resolver: &mut dyn ClassResolver) -> Result<(), LinkError> {
        for &name in &self.decl.used_traits {
            let Some(trait_cls) = resolver.resolve_class(name)? else {
                return Err(LinkError::unresolved(self.name(), name, "Trait"));
            };
            if !trait_cls.is_trait() {
                return Err(LinkError::IllegalInheritance {
                    class: self.name(),
                    message: format!(
                        "{} cannot use {} - it is not a trait",
                        self.name(),
                        trait_cls.name()
                    ),
                });
            }
            self.used_traits.push(trait_cls);
        }
        Ok(())
    }

    pub(crate) fn lookup_method(&self, name: Symbol) -> Option<&Arc<Func>> {
        self.methods.get(&name.lower())
    }

    /// Bind one of this class's generated `86` methods, if declared.
    pub(crate) fn find_special_method(&self, name: Symbol) -> Option<Arc<Func>> {
        let decl = self.decl.methods.iter().find(|m| m.name == name)?;
        Some(Arc::new(self.bind_own(Arc::clone(decl))))
    }

    pub(crate) fn bind_own(&self, decl: Arc<FuncDecl>) -> Func {
        let mut f = Func::bind(decl, self.me, self.name(), 0);
        f.pre_class_is_trait = self.decl.is_trait();
        f
    }

    fn set_special(&mut self) {
        let to_string = self.lookup_method(*SD_TOSTRING).cloned();
        let dtor = self.lookup_method(*SD_DESTRUCT).cloned();
        let invoke = self
            .lookup_method(*SD_INVOKE)
            .filter(|f| !f.is_static())
            .cloned();
        let cinit = self.find_special_method(*SD_86CINIT);
        let ctor = self.resolve_ctor();

        self.special = Some(SpecialMethods {
            ctor,
            to_string,
            dtor,
            invoke,
            cinit,
        });
    }

    fn resolve_ctor(&self) -> Arc<Func> {
        // __construct declared here or imported from a trait
        if let Some(f) = self.lookup_method(*SD_CONSTRUCT) {
            if f.pre_class == self.name() || f.pre_class_is_trait {
                return Arc::clone(f);
            }
        }

        // Old-style constructor named after the class, never via a trait
        if !self.decl.is_trait() {
            if let Some(f) = self.lookup_method(self.name()) {
                if f.pre_class == self.name() && !f.pre_class_is_trait {
                    return Arc::clone(f);
                }
            }
        }

        if let Some(parent) = &self.parent {
            if parent.ctor().name != *SD_86CTOR {
                return Arc::clone(parent.ctor());
            }
        }

        self.find_special_method(*SD_86CTOR)
            .unwrap_or_else(|| Arc::new(self.bind_own(Arc::new(FuncDecl::default_ctor()))))
    }

    fn set_magic_methods(&mut self) {
        let mut magic = MagicMethods::empty();
        for (name, flag) in MAGIC_METHODS.iter() {
            if self.lookup_method(*name).is_some() {
                magic |= *flag;
            }
        }
        self.magic = magic;
    }

    /// Ancestor or self owning static property storage `id`.
    pub(crate) fn ancestor_with_id(&self, id: ClassId) -> Option<Arc<LinkedClass>> {
        self.parent.as_ref().and_then(|p| p.ancestor_with_id(id))
    }

    fn finish(self) -> Arc<LinkedClass> {
        let ClassBuilder {
            decl,
            me,
            attrs,
            parent,
            used_traits,
            decl_interfaces,
            interfaces,
            methods,
            traits_begin,
            traits_end,
            trait_aliases,
            special,
            magic,
            constants,
            decl_props,
            decl_prop_init,
            decl_prop_num_accessible,
            has_deep_init_props,
            static_props,
            pinit_vec,
            sinit_vec,
            instance_ctor,
            builtin_prop_size,
            ..
        } = self;

        let special = special.unwrap_or_else(|| SpecialMethods {
            ctor: Arc::new(Func::bind(Arc::new(FuncDecl::default_ctor()), me, me.name, 0)),
            to_string: None,
            dtor: None,
            invoke: None,
            cinit: None,
        });
        let interface_names = interfaces
            .iter()
            .map(|(key, iface)| (*key, iface.name()))
            .collect();
        let decl_interface_names = decl_interfaces.iter().map(|i| i.name()).collect();
        let used_trait_names = used_traits.iter().map(|t| t.name()).collect();
        let parent_id = parent.as_ref().map(|p| p.id());

        Arc::new_cyclic(|weak_self| {
            let mut class_vec: SmallVec<[std::sync::Weak<LinkedClass>; 4]> = SmallVec::new();
            if let Some(parent) = &parent {
                class_vec.extend(parent.class_vec.iter().cloned());
            }
            class_vec.push(weak_self.clone());

            LinkedClass {
                id: me.id,
                decl: Arc::clone(decl),
                attrs,
                links: RwLock::new(ClassLinks {
                    parent,
                    decl_interfaces,
                    used_traits,
                    interfaces: interfaces.into_values().collect(),
                }),
                parent_id,
                class_vec,
                methods,
                traits_begin,
                traits_end,
                special,
                magic,
                interface_names,
                decl_interface_names,
                used_trait_names,
                trait_aliases,
                constants,
                decl_props,
                decl_prop_init,
                decl_prop_num_accessible,
                has_deep_init_props,
                static_props,
                pinit_vec,
                sinit_vec,
                instance_ctor,
                builtin_prop_size,
                layout_generation: next_layout_generation(),
                cached_slot: AtomicU32::new(0),
                state: AtomicU8::new(ClassState::Active as u8),
            }
        })
    }
}
