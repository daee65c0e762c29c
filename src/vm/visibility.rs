//! Visibility checking and access control
//!
//! Access checks an interpreter performs against linked classes. `ctx` is
//! the class scope of the calling code, `None` for top-level code.
//!
//! ## Rules
//!
//! - **Public**: accessible from anywhere
//! - **Protected**: accessible when the calling scope and the declaring
//!   class are related in either direction
//! - **Private**: accessible only from the declaring class; a private
//!   property of the calling scope shadows whatever the object's class
//!   exposes under the same name

use crate::core::{Symbol, Visibility};
use crate::runtime::class::{LinkedClass, SProp};
use crate::runtime::func::Func;

/// Result of a declared-property lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropLookup {
    pub slot: usize,
    pub accessible: bool,
}

fn related(a: &LinkedClass, b: &LinkedClass) -> bool {
    a.classof(b) || b.classof(a)
}

/// Private property `name` declared by `ctx` itself, if `cls` inherits it.
fn ctx_private_prop(cls: &LinkedClass, ctx: &LinkedClass, name: Symbol) -> Option<usize> {
    if !cls.classof(ctx) {
        return None;
    }
    let slot = ctx.lookup_decl_prop(name)?;
    let prop = ctx.decl_props().get(slot)?;
    (prop.class.id == ctx.id() && prop.attrs.is_private()).then_some(slot)
}

/// Slot of declared property `name` of `cls` as seen from `ctx`.
pub fn decl_prop_index(cls: &LinkedClass, ctx: Option<&LinkedClass>, name: Symbol) -> Option<PropLookup> {
    let named = match cls.lookup_decl_prop(name) {
        Some(slot) => match named_prop_lookup(cls, ctx, slot) {
            NamedProp::Final(lookup) => return Some(lookup),
            NamedProp::Shadowable(lookup) => Some(lookup),
        },
        None => None,
    };
    // A private property of the calling scope trumps anything else the
    // object's class exposes under that name.
    ctx.and_then(|ctx| ctx_private_prop(cls, ctx, name))
        .map(|slot| PropLookup {
            slot,
            accessible: true,
        })
        .or(named)
}

/// Outcome of checking the slot found by name.
enum NamedProp {
    /// No private property of the calling scope can shadow this slot.
    Final(PropLookup),
    /// The calling scope's own private property still takes priority.
    Shadowable(PropLookup),
}

fn named_prop_lookup(cls: &LinkedClass, ctx: Option<&LinkedClass>, slot: usize) -> NamedProp {
    let lookup = |accessible| PropLookup { slot, accessible };
    let Some(prop) = cls.decl_props().get(slot) else {
        return NamedProp::Final(lookup(false));
    };
    if prop.visibility() == Visibility::Public {
        return match ctx {
            Some(ctx) if ctx.id() != cls.id() => NamedProp::Shadowable(lookup(true)),
            _ => NamedProp::Final(lookup(true)),
        };
    }
    let Some(ctx) = ctx else {
        return NamedProp::Final(lookup(false));
    };
    if ctx.id() == prop.class.id {
        return NamedProp::Final(lookup(true));
    }
    if prop.visibility() == Visibility::Private {
        return NamedProp::Shadowable(lookup(false));
    }
    let Some(base) = cls.declaring_class(prop.class) else {
        return NamedProp::Final(lookup(false));
    };
    if ctx.classof(&base) {
        // A descendant of the declaring class cannot also declare a
        // private property with this name.
        return NamedProp::Final(lookup(true));
    }
    if !base.classof(ctx) {
        return NamedProp::Final(lookup(false));
    }
    NamedProp::Shadowable(lookup(true))
}

/// Whether static property `sprop` of `cls` may be accessed from `ctx`.
pub fn sprop_accessible(cls: &LinkedClass, sprop: &SProp, ctx: Option<&LinkedClass>) -> bool {
    match (sprop.visibility(), ctx) {
        (Visibility::Public, _) => true,
        (_, None) => false,
        (_, Some(ctx)) if ctx.id() == cls.id() => true,
        (Visibility::Protected, Some(ctx)) => related(ctx, cls),
        (Visibility::Private, Some(_)) => false,
    }
}

/// Whether `func`, found in the method table of `cls`, may be called from
/// `ctx`.
pub fn method_accessible(cls: &LinkedClass, func: &Func, ctx: Option<&LinkedClass>) -> bool {
    match (func.visibility(), ctx) {
        (Visibility::Public, _) => true,
        (_, None) => false,
        (Visibility::Private, Some(ctx)) => ctx.id() == func.cls.id,
        (Visibility::Protected, Some(ctx)) => {
            if ctx.id() == func.base_cls.id {
                return true;
            }
            match cls.declaring_class(func.base_cls) {
                Some(base) => related(ctx, &base),
                None => related(ctx, cls),
            }
        }
    }
}
