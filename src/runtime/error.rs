//! Linkage and runtime errors
//!
//! Every linkage failure is fatal for the one class being linked: nothing is
//! installed in the registry and the error is surfaced to whoever asked for
//! the class to be defined. Each variant carries the class that failed to
//! link plus a message naming the offending member.

use crate::core::Symbol;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    /// Extending a final class, an interface or a trait; implementing a
    /// non-interface; using a non-trait.
    #[error("{message}")]
    IllegalInheritance { class: Symbol, message: String },

    /// Narrowed visibility, changed static-ness, overridden final method,
    /// illegal abstract redeclaration or incompatible parameters.
    #[error("{message}")]
    OverrideViolation {
        class: Symbol,
        method: Symbol,
        message: String,
    },

    /// Unresolved multi-trait conflict or a bad precedence/alias rule.
    #[error("{message}")]
    TraitConflict { class: Symbol, message: String },

    /// Static/non-static mismatch, narrowed visibility or a trait property
    /// that disagrees with an earlier declaration.
    #[error("{message}")]
    PropertyRedeclaration {
        class: Symbol,
        property: Symbol,
        message: String,
    },

    /// Colliding interface constants or an override of an interface
    /// constant.
    #[error("{message}")]
    ConstantConflict {
        class: Symbol,
        constant: Symbol,
        message: String,
    },

    /// Parent, interface or trait that cannot be resolved, even after
    /// on-demand loading.
    #[error("{message}")]
    UnresolvedDependency {
        class: Symbol,
        dependency: Symbol,
        message: String,
    },

    /// Concrete class with an abstract method left unimplemented.
    #[error("{message}")]
    AbstractMethodUnimplemented {
        class: Symbol,
        method: Symbol,
        message: String,
    },

    /// A different declaration is already defined under this name in the
    /// current context.
    #[error("Cannot redeclare class {class}")]
    Redeclared { class: Symbol },
}

impl LinkError {
    /// Class whose linkage failed.
    pub fn class(&self) -> Symbol {
        match self {
            LinkError::IllegalInheritance { class, .. }
            | LinkError::OverrideViolation { class, .. }
            | LinkError::TraitConflict { class, .. }
            | LinkError::PropertyRedeclaration { class, .. }
            | LinkError::ConstantConflict { class, .. }
            | LinkError::UnresolvedDependency { class, .. }
            | LinkError::AbstractMethodUnimplemented { class, .. }
            | LinkError::Redeclared { class } => *class,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::IllegalInheritance { .. } => "IllegalInheritance",
            LinkError::OverrideViolation { .. } => "OverrideViolation",
            LinkError::TraitConflict { .. } => "TraitConflict",
            LinkError::PropertyRedeclaration { .. } => "PropertyRedeclaration",
            LinkError::ConstantConflict { .. } => "ConstantConflict",
            LinkError::UnresolvedDependency { .. } => "UnresolvedDependency",
            LinkError::AbstractMethodUnimplemented { .. } => "AbstractMethodUnimplemented",
            LinkError::Redeclared { .. } => "Redeclared",
        }
    }

    pub(crate) fn trait_conflict(class: Symbol, message: impl Into<String>) -> Self {
        LinkError::TraitConflict {
            class,
            message: message.into(),
        }
    }

    pub(crate) fn unresolved(class: Symbol, dependency: Symbol, what: &str) -> Self {
        LinkError::UnresolvedDependency {
            class,
            dependency,
            message: format!("{} '{}' not found (required by {})", what, dependency, class),
        }
    }
}

/// Failures raised while using a linked class inside an execution context.
/// They leave the class intact; a later access may retry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("Initializer for {class} failed: {message}")]
    InitializerFailed { class: Symbol, message: String },

    #[error("Property {class}::${property} was not initialized by its initializer")]
    PropertyNotInitialized { class: Symbol, property: Symbol },

    #[error("Cannot access {visibility} property {class}::${property}")]
    Inaccessible {
        class: Symbol,
        property: Symbol,
        visibility: &'static str,
    },

    #[error("Access to undeclared static property {class}::${property}")]
    UndefinedStaticProperty { class: Symbol, property: Symbol },

    #[error("Undefined property {class}::${property}")]
    UndefinedProperty { class: Symbol, property: Symbol },

    #[error("Undefined constant {class}::{constant}")]
    UndefinedConstant { class: Symbol, constant: Symbol },

    #[error("Cannot instantiate {kind} {class}")]
    NotInstantiable { class: Symbol, kind: &'static str },

    #[error("Call to undefined method {class}::{method}()")]
    UndefinedMethod { class: Symbol, method: Symbol },

    #[error("{0}")]
    Message(String),
}

impl RuntimeError {
    pub fn initializer(class: Symbol, message: impl Into<String>) -> Self {
        RuntimeError::InitializerFailed {
            class,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
