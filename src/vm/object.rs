//! Object instances
//!
//! A minimal object model over linked classes: an instance is a copy of its
//! class's per-request property defaults plus the builtin storage the native
//! instance constructor hands back. Property access and native method calls
//! go through the same visibility rules an interpreter would apply.

use crate::compiler::decl::FuncBody;
use crate::core::{Symbol, Val};
use crate::runtime::class::{LayoutStamp, LinkedClass};
use crate::runtime::context::RequestContext;
use crate::runtime::error::RuntimeError;
use crate::runtime::func::Func;
use crate::vm::visibility::{decl_prop_index, method_accessible};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Instance {
    class: Arc<LinkedClass>,
    stamp: LayoutStamp,
    props: Vec<Val>,
    builtin: Vec<Val>,
}

impl Instance {
    pub fn class(&self) -> &Arc<LinkedClass> {
        &self.class
    }

    /// Declared properties, in slot order.
    pub fn props(&self) -> &[Val] {
        &self.props
    }

    pub fn builtin(&self) -> &[Val] {
        &self.builtin
    }

    pub fn layout_stamp(&self) -> LayoutStamp {
        self.stamp
    }

    /// Whether the slot layout this instance was built with still holds.
    pub fn layout_valid(&self) -> bool {
        self.class.validate_layout(self.stamp)
    }

    fn slot_for(&self, name: Symbol, scope: Option<&LinkedClass>) -> Result<usize, RuntimeError> {
        let lookup = decl_prop_index(&self.class, scope, name).ok_or(RuntimeError::UndefinedProperty {
            class: self.class.name(),
            property: name,
        })?;
        if !lookup.accessible {
            let visibility = self
                .class
                .decl_props()
                .get(lookup.slot)
                .map(|p| p.visibility().as_str())
                .unwrap_or("private");
            return Err(RuntimeError::Inaccessible {
                class: self.class.name(),
                property: name,
                visibility,
            });
        }
        Ok(lookup.slot)
    }

    /// Read property `name` from class scope `scope`.
    pub fn get_prop(&self, name: Symbol, scope: Option<&LinkedClass>) -> Result<&Val, RuntimeError> {
        let slot = self.slot_for(name, scope)?;
        self.props.get(slot).ok_or(RuntimeError::UndefinedProperty {
            class: self.class.name(),
            property: name,
        })
    }

    pub fn set_prop(&mut self, name: Symbol, scope: Option<&LinkedClass>, val: Val) -> Result<(), RuntimeError> {
        let slot = self.slot_for(name, scope)?;
        let class = self.class.name();
        let cell = self
            .props
            .get_mut(slot)
            .ok_or(RuntimeError::UndefinedProperty { class, property: name })?;
        *cell = val;
        Ok(())
    }
}

/// Create an instance of `cls` in request `ctx`.
pub fn instantiate(ctx: &mut RequestContext, cls: &Arc<LinkedClass>) -> Result<Instance, RuntimeError> {
    let kind = if cls.is_interface() {
        Some("interface")
    } else if cls.is_trait() {
        Some("trait")
    } else if cls.is_abstract() {
        Some("abstract class")
    } else {
        None
    };
    if let Some(kind) = kind {
        return Err(RuntimeError::NotInstantiable {
            class: cls.name(),
            kind,
        });
    }

    let defaults = ctx.init_props(cls)?;
    let builtin = cls.instance_ctor().map(|ctor| ctor(cls.name())).unwrap_or_default();
    Ok(Instance {
        class: Arc::clone(cls),
        stamp: cls.layout_stamp(),
        props: defaults.instantiate(),
        builtin,
    })
}

/// State handed to a native method body.
pub struct MethodCall<'a> {
    pub ctx: &'a mut RequestContext,
    pub func: &'a Func,
    pub this: Option<&'a mut Instance>,
    pub args: &'a [Val],
}

impl MethodCall<'_> {
    /// Class whose body is executing: the one the method was bound to.
    pub fn scope(&self) -> Option<Arc<LinkedClass>> {
        let this = self.this.as_deref()?;
        this.class().declaring_class(self.func.cls)
    }

    pub fn arg(&self, index: usize) -> Val {
        self.args.get(index).cloned().unwrap_or(Val::Null)
    }

    /// Read `$this->name` with the method's own scope.
    pub fn this_prop(&self, name: Symbol) -> Result<Val, RuntimeError> {
        let scope = self.scope();
        let this = self
            .this
            .as_deref()
            .ok_or_else(|| RuntimeError::Message("Using $this when not in object context".into()))?;
        this.get_prop(name, scope.as_deref()).cloned()
    }

    pub fn set_this_prop(&mut self, name: Symbol, val: Val) -> Result<(), RuntimeError> {
        let scope = self.scope();
        let this = self
            .this
            .as_deref_mut()
            .ok_or_else(|| RuntimeError::Message("Using $this when not in object context".into()))?;
        this.set_prop(name, scope.as_deref(), val)
    }
}

/// Call method `name` of `cls` from class scope `scope`. Only native
/// bodies can run here; bytecode belongs to an interpreter.
pub fn call_method(
    ctx: &mut RequestContext,
    cls: &LinkedClass,
    this: Option<&mut Instance>,
    name: Symbol,
    args: &[Val],
    scope: Option<&LinkedClass>,
) -> Result<Val, RuntimeError> {
    let func = cls
        .resolve_method(name)
        .cloned()
        .ok_or(RuntimeError::UndefinedMethod {
            class: cls.name(),
            method: name,
        })?;
    if !method_accessible(cls, &func, scope) {
        let from = scope.map_or_else(|| "global scope".to_string(), |s| format!("scope {}", s.name()));
        return Err(RuntimeError::Message(format!(
            "Call to {} method {}() from {}",
            func.visibility().as_str(),
            func.full_name(),
            from
        )));
    }
    if func.is_abstract() {
        return Err(RuntimeError::Message(format!(
            "Cannot call abstract method {}()",
            func.full_name()
        )));
    }
    if this.is_none() && !func.is_static() {
        return Err(RuntimeError::Message(format!(
            "Non-static method {}() cannot be called statically",
            func.full_name()
        )));
    }

    let body = match func.body() {
        FuncBody::Native(body) => Arc::clone(body),
        _ => {
            return Err(RuntimeError::Message(format!(
                "Method {}() has no native body",
                func.full_name()
            )));
        }
    };
    let mut call = MethodCall {
        ctx,
        func: &func,
        this,
        args,
    };
    body(&mut call)
}
