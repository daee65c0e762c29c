//! Initializer chains and lazy property initialization
//!
//! Properties whose default cannot be computed at compile time carry
//! `Val::Uninit` in the declared-init vector. The first time an execution
//! context touches such a class it seeds a scratch container with every
//! declared default, `Val::Sentinel` standing in for those slots, runs the
//! class's `86pinit` chain against it and reads the filled slots back. The chain holds ancestor initializers
//! first and is run in reverse, so a descendant's routine runs before the
//! routines it inherited and ancestors only fill slots nobody has filled yet.

use crate::compiler::decl::{FuncBody, SD_86PINIT, SD_86SINIT};
use crate::core::{Symbol, Val, intern};
use crate::runtime::class::LinkedClass;
use crate::runtime::error::RuntimeError;
use crate::runtime::func::Func;
use crate::runtime::linker::ClassBuilder;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::trace;

/// Property container handed to initializer routines. Keys are property
/// names, or the original mangled name for private properties.
pub struct InitScratch<'a> {
    class: &'a LinkedClass,
    values: &'a mut IndexMap<Symbol, Val>,
}

impl<'a> InitScratch<'a> {
    pub fn new(class: &'a LinkedClass, values: &'a mut IndexMap<Symbol, Val>) -> Self {
        Self { class, values }
    }

    /// Class being initialized (not necessarily the one declaring the
    /// running routine).
    pub fn class(&self) -> &LinkedClass {
        self.class
    }

    pub fn get(&self, key: &str) -> Option<&Val> {
        self.get_key(intern(key))
    }

    pub fn get_key(&self, key: Symbol) -> Option<&Val> {
        self.values.get(&key)
    }

    pub fn set(&mut self, key: &str, val: Val) {
        self.set_key(intern(key), val);
    }

    pub fn set_key(&mut self, key: Symbol, val: Val) {
        self.values.insert(key, val);
    }

    /// Slot still waiting for a value.
    pub fn is_pending(&self, key: Symbol) -> bool {
        self.values.get(&key).is_some_and(Val::is_sentinel)
    }

    pub fn pending(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.values
            .iter()
            .filter(|(_, v)| v.is_sentinel())
            .map(|(k, _)| *k)
    }
}

impl ClassBuilder<'_> {
    /// Instance chain: the parent's chain, this class's own `86pinit`, then
    /// the chains of used traits without duplicates. The static chain holds
    /// only this class's `86sinit` and those of its traits; inherited
    /// statics are initialized through their owner.
    pub(crate) fn set_initializers(&mut self) {
        let mut pinits: Vec<Arc<Func>> = self
            .parent
            .as_ref()
            .map(|p| p.pinit_vec().to_vec())
            .unwrap_or_default();
        if let Some(f) = self.find_special_method(*SD_86PINIT) {
            pinits.push(f);
        }

        let mut sinits: Vec<Arc<Func>> = Vec::new();
        if let Some(f) = self.find_special_method(*SD_86SINIT) {
            sinits.push(f);
        }

        for trait_cls in &self.used_traits {
            for f in trait_cls.pinit_vec() {
                if !pinits.iter().any(|g| Arc::ptr_eq(g, f)) {
                    pinits.push(Arc::clone(f));
                }
            }
            for f in trait_cls.sinit_vec() {
                if !sinits.iter().any(|g| Arc::ptr_eq(g, f)) {
                    sinits.push(Arc::clone(f));
                }
            }
        }

        self.pinit_vec = pinits;
        self.sinit_vec = sinits;
    }
}

/// Resolved instance-property defaults for one execution context.
#[derive(Debug, Clone, PartialEq)]
pub struct PropInitVec {
    values: Vec<Val>,
    deep: Vec<bool>,
}

impl PropInitVec {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Val] {
        &self.values
    }

    pub fn get(&self, slot: usize) -> Option<&Val> {
        self.values.get(slot)
    }

    /// Slot must be deep-copied into each new instance.
    pub fn is_deep(&self, slot: usize) -> bool {
        self.deep.get(slot).copied().unwrap_or(false)
    }

    /// No slot needs a deep copy; instances may copy the vector as is.
    pub fn is_shallow(&self) -> bool {
        !self.deep.iter().any(|d| *d)
    }

    /// Property values for a fresh instance.
    pub fn instantiate(&self) -> Vec<Val> {
        if self.is_shallow() {
            return self.values.clone();
        }
        self.values
            .iter()
            .zip(&self.deep)
            .map(|(v, deep)| if *deep { v.deep_copy() } else { v.clone() })
            .collect()
    }
}

fn run_initializer(
    cls: &LinkedClass,
    f: &Func,
    scratch: &mut InitScratch<'_>,
) -> Result<(), RuntimeError> {
    trace!(class = %cls.name(), init = %f.full_name(), "running initializer");
    match f.body() {
        FuncBody::PropInit(body) => body(scratch),
        other => Err(RuntimeError::initializer(
            cls.name(),
            format!("{} has a {:?} body, not a property initializer", f.full_name(), other),
        )),
    }
}

/// Compute the instance-property defaults of `cls`. On failure nothing is
/// retained; a later call starts from scratch.
pub fn init_props(cls: &LinkedClass) -> Result<PropInitVec, RuntimeError> {
    let props = cls.decl_props();
    let declared = cls.decl_prop_init();

    // Scalar defaults are visible to the routines; only pending slots are
    // read back.
    let mut values: IndexMap<Symbol, Val> = IndexMap::new();
    let mut any_pending = false;
    for (slot, prop) in props.iter().enumerate() {
        if declared[slot].is_uninit() {
            any_pending = true;
            values.insert(prop.init_key(), Val::Sentinel);
        } else {
            values.insert(prop.init_key(), declared[slot].clone());
        }
    }

    if any_pending || !cls.pinit_vec().is_empty() {
        let mut scratch = InitScratch::new(cls, &mut values);
        for f in cls.pinit_vec().iter().rev() {
            run_initializer(cls, f, &mut scratch)?;
        }
    }

    let mut out = PropInitVec {
        values: Vec::with_capacity(props.len()),
        deep: Vec::with_capacity(props.len()),
    };
    for (slot, prop) in props.iter().enumerate() {
        let val = if declared[slot].is_uninit() {
            match values.get(&prop.init_key()) {
                Some(v) if !v.is_sentinel() => v.clone(),
                _ => {
                    return Err(RuntimeError::PropertyNotInitialized {
                        class: cls.name(),
                        property: prop.name,
                    });
                }
            }
        } else {
            declared[slot].clone()
        };
        out.deep.push(prop.is_deep_init() || matches!(val, Val::Array(_)));
        out.values.push(val);
    }
    trace!(class = %cls.name(), slots = out.len(), shallow = out.is_shallow(), "instance props initialized");
    Ok(out)
}

/// Run the static initializer chain of `cls`. Every static property name
/// starts as `Val::Sentinel`; entries still holding it were left alone by
/// the chain.
pub fn run_sinits(cls: &LinkedClass) -> Result<IndexMap<Symbol, Val>, RuntimeError> {
    let mut values: IndexMap<Symbol, Val> =
        cls.static_props().map(|s| (s.name, Val::Sentinel)).collect();
    let mut scratch = InitScratch::new(cls, &mut values);
    for f in cls.sinit_vec() {
        run_initializer(cls, f, &mut scratch)?;
    }
    trace!(class = %cls.name(), count = values.len(), "static initializers ran");
    Ok(values)
}
