//! Runtime method records
//!
//! A `Func` is a declaration bound to the class whose method table holds it.
//! Inherited entries share the parent's `Func`; overrides, trait imports and
//! static-local copies get a fresh one with a new id.

use crate::compiler::decl::{FuncBody, FuncDecl};
use crate::core::{Attr, Symbol, Visibility};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static NEXT_FUNC_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn next() -> Self {
        FuncId(NEXT_FUNC_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one linked class. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u64);

impl ClassId {
    pub fn next() -> Self {
        ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Class reference stored on members. Holds no ownership, so member records
/// never keep a class alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef {
    pub id: ClassId,
    pub name: Symbol,
}

#[derive(Debug, Clone)]
pub struct Func {
    pub id: FuncId,
    /// Name under which the method is reachable (differs from the
    /// declaration for trait aliases).
    pub name: Symbol,
    pub attrs: Attr,
    pub decl: Arc<FuncDecl>,
    /// Class the method is bound to.
    pub cls: ClassRef,
    /// Class that declared the method; for trait imports the trait.
    pub pre_class: Symbol,
    pub pre_class_is_trait: bool,
    /// Topmost class in the override chain, used for protected/private
    /// visibility resolution.
    pub base_cls: ClassRef,
    /// Declaration at `base_cls`, the reference for signature checks.
    pub base_decl: Arc<FuncDecl>,
    pub has_private_ancestor: bool,
    pub slot: usize,
}

impl Func {
    pub(crate) fn bind(decl: Arc<FuncDecl>, cls: ClassRef, pre_class: Symbol, slot: usize) -> Self {
        Self {
            id: FuncId::next(),
            name: decl.name,
            attrs: decl.attrs,
            base_decl: Arc::clone(&decl),
            decl,
            cls,
            pre_class,
            pre_class_is_trait: false,
            base_cls: cls,
            has_private_ancestor: false,
            slot,
        }
    }

    /// Copy bound to `cls` with a fresh identity.
    pub(crate) fn clone_for(&self, cls: ClassRef) -> Self {
        let mut f = self.clone();
        f.id = FuncId::next();
        f.cls = cls;
        f
    }

    pub fn visibility(&self) -> Visibility {
        self.attrs.visibility()
    }

    pub fn is_static(&self) -> bool {
        self.attrs.is_static()
    }

    pub fn is_abstract(&self) -> bool {
        self.attrs.is_abstract()
    }

    pub fn is_final(&self) -> bool {
        self.attrs.is_final()
    }

    pub fn is_generated(&self) -> bool {
        self.attrs.contains(Attr::GENERATED)
    }

    pub fn has_static_locals(&self) -> bool {
        self.decl.has_static_locals
    }

    pub fn body(&self) -> &FuncBody {
        &self.decl.body
    }

    pub fn full_name(&self) -> String {
        format!("{}::{}", self.cls.name, self.name)
    }
}
