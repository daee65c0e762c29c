//! Compile-time class declarations
//!
//! A `ClassDecl` is the immutable record of one class as written in source:
//! its modifiers, members, trait-usage rules and the generated initializer
//! methods the emitter attached to it. The linker reads declarations and
//! never mutates them; one declaration may be linked many times (once per
//! distinct parent/interface/trait identity it is defined against).

use crate::core::{Attr, Symbol, Val, Visibility, intern};
use crate::runtime::error::RuntimeError;
use crate::runtime::init::InitScratch;
use crate::vm::object::MethodCall;
use lazy_static::lazy_static;
use std::fmt;
use std::sync::Arc;

/// Native method implementation.
pub type NativeMethod = Arc<dyn Fn(&mut MethodCall<'_>) -> Result<Val, RuntimeError> + Send + Sync>;

/// Body of a generated `86pinit` / `86sinit` method. Receives the scratch
/// container of declared properties and fills the slots still holding
/// `Val::Sentinel`.
pub type PropInitFn = Arc<dyn Fn(&mut InitScratch<'_>) -> Result<(), RuntimeError> + Send + Sync>;

/// Body of a generated `86cinit` method: computes the named constant.
pub type ConstInitFn = Arc<dyn Fn(Symbol) -> Result<Val, RuntimeError> + Send + Sync>;

/// Native instance constructor of a built-in class.
pub type InstanceCtor = fn(class: Symbol) -> Vec<Val>;

lazy_static! {
    pub static ref SD_86CTOR: Symbol = intern("86ctor");
    pub static ref SD_86PINIT: Symbol = intern("86pinit");
    pub static ref SD_86SINIT: Symbol = intern("86sinit");
    pub static ref SD_86CINIT: Symbol = intern("86cinit");
    pub static ref SD_CONSTRUCT: Symbol = intern("__construct");
    pub static ref SD_MOCK_CLASS: Symbol = intern("__MockClass");
}

/// Compiler-generated lifecycle methods carry an `86` prefix, which cannot
/// be spelled by user code.
pub fn is_special_name(name: Symbol) -> bool {
    name.as_str().starts_with("86")
}

/// Storage key of a declared property.
///
/// - public: `name`
/// - protected: `"\0*\0name"`
/// - private: `"\0Class\0name"`
pub fn mangle_prop_name(class: Symbol, name: Symbol, attrs: Attr) -> Symbol {
    match attrs.visibility() {
        Visibility::Public => name,
        Visibility::Protected => intern(&format!("\0*\0{}", name)),
        Visibility::Private => intern(&format!("\0{}\0{}", class, name)),
    }
}

#[derive(Clone)]
pub enum FuncBody {
    /// Bytecode owned by the unit; the linker never looks inside.
    Bytecode(u32),
    Native(NativeMethod),
    PropInit(PropInitFn),
    ConstInit(ConstInitFn),
}

impl fmt::Debug for FuncBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncBody::Bytecode(off) => write!(f, "Bytecode({})", off),
            FuncBody::Native(_) => f.write_str("Native"),
            FuncBody::PropInit(_) => f.write_str("PropInit"),
            FuncBody::ConstInit(_) => f.write_str("ConstInit"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Symbol,
    pub has_default: bool,
    pub is_variadic: bool,
    pub by_ref: bool,
}

impl ParamDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            has_default: false,
            is_variadic: false,
            by_ref: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.is_variadic = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: Symbol,
    pub attrs: Attr,
    pub params: Vec<ParamDecl>,
    pub has_static_locals: bool,
    pub body: FuncBody,
    pub doc_comment: Option<Arc<str>>,
}

impl FuncDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            attrs: Attr::PUBLIC,
            params: Vec::new(),
            has_static_locals: false,
            body: FuncBody::Bytecode(0),
            doc_comment: None,
        }
    }

    /// Generated instance-property initializer.
    pub fn pinit<F>(body: F) -> Self
    where
        F: Fn(&mut InitScratch<'_>) -> Result<(), RuntimeError> + Send + Sync + 'static,
    {
        Self::special(*SD_86PINIT, FuncBody::PropInit(Arc::new(body)))
    }

    /// Generated static-property initializer.
    pub fn sinit<F>(body: F) -> Self
    where
        F: Fn(&mut InitScratch<'_>) -> Result<(), RuntimeError> + Send + Sync + 'static,
    {
        Self::special(*SD_86SINIT, FuncBody::PropInit(Arc::new(body)))
    }

    /// Generated constant initializer.
    pub fn cinit<F>(body: F) -> Self
    where
        F: Fn(Symbol) -> Result<Val, RuntimeError> + Send + Sync + 'static,
    {
        Self::special(*SD_86CINIT, FuncBody::ConstInit(Arc::new(body)))
    }

    /// Generated default constructor.
    pub fn default_ctor() -> Self {
        let mut f = Self::special(*SD_86CTOR, FuncBody::Bytecode(0));
        f.attrs = Attr::PUBLIC | Attr::GENERATED;
        f
    }

    fn special(name: Symbol, body: FuncBody) -> Self {
        Self {
            name,
            attrs: Attr::PUBLIC | Attr::STATIC | Attr::GENERATED,
            params: Vec::new(),
            has_static_locals: false,
            body,
            doc_comment: None,
        }
    }

    pub fn attrs(mut self, attrs: Attr) -> Self {
        self.attrs = attrs;
        if !attrs.intersects(Attr::VISIBILITY) {
            self.attrs |= Attr::PUBLIC;
        }
        self
    }

    pub fn visibility(mut self, vis: Visibility) -> Self {
        self.attrs = self.attrs.with_visibility(vis);
        self
    }

    pub fn param(mut self, param: ParamDecl) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_static_locals(mut self) -> Self {
        self.has_static_locals = true;
        self
    }

    pub fn native<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut MethodCall<'_>) -> Result<Val, RuntimeError> + Send + Sync + 'static,
    {
        self.body = FuncBody::Native(Arc::new(body));
        self
    }

    pub fn is_special(&self) -> bool {
        is_special_name(self.name)
    }

    pub fn is_generated(&self) -> bool {
        self.attrs.contains(Attr::GENERATED)
    }

    /// Minimum number of arguments a caller must pass.
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| !p.has_default && !p.is_variadic)
            .count()
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p.is_variadic)
    }
}

#[derive(Debug, Clone)]
pub struct PropDecl {
    pub name: Symbol,
    pub mangled_name: Symbol,
    pub attrs: Attr,
    /// `Val::Uninit` when the initializer is non-scalar.
    pub default: Val,
    pub type_constraint: Option<Symbol>,
    pub doc_comment: Option<Arc<str>>,
}

impl PropDecl {
    pub fn new(name: &str, attrs: Attr, default: Val) -> Self {
        let attrs = if attrs.intersects(Attr::VISIBILITY) {
            attrs
        } else {
            attrs | Attr::PUBLIC
        };
        Self {
            name: intern(name),
            mangled_name: intern(name),
            attrs,
            default,
            type_constraint: None,
            doc_comment: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.attrs.is_static()
    }
}

#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: Symbol,
    /// `Val::Uninit` when the initializer is non-scalar.
    pub value: Val,
    /// Source text of the initializer, kept for reflection.
    pub php_code: Arc<str>,
}

impl ConstDecl {
    pub fn new(name: &str, value: Val) -> Self {
        let php_code: Arc<str> = Arc::from(value.to_json().to_string());
        Self {
            name: intern(name),
            value,
            php_code,
        }
    }

    pub fn non_scalar(name: &str, php_code: &str) -> Self {
        Self {
            name: intern(name),
            value: Val::Uninit,
            php_code: Arc::from(php_code),
        }
    }
}

/// `Selected::method insteadof Other1, Other2;`
#[derive(Debug, Clone)]
pub struct TraitPrecRule {
    pub method: Symbol,
    pub selected_trait: Symbol,
    pub other_traits: Vec<Symbol>,
}

/// `[Trait::]method as [modifiers] [alias];`
#[derive(Debug, Clone)]
pub struct TraitAliasRule {
    pub trait_name: Option<Symbol>,
    pub orig_method: Symbol,
    pub new_method: Symbol,
    pub modifiers: Attr,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Symbol,
    pub parent: Option<Symbol>,
    pub attrs: Attr,
    pub methods: Vec<Arc<FuncDecl>>,
    pub properties: Vec<PropDecl>,
    pub constants: Vec<ConstDecl>,
    pub interfaces: Vec<Symbol>,
    pub used_traits: Vec<Symbol>,
    pub trait_prec_rules: Vec<TraitPrecRule>,
    pub trait_alias_rules: Vec<TraitAliasRule>,
    pub user_attributes: Vec<Symbol>,
    pub instance_ctor: Option<InstanceCtor>,
    pub builtin_prop_size: usize,
    pub doc_comment: Option<Arc<str>>,
}

impl ClassDecl {
    pub fn new(name: &str, attrs: Attr) -> Self {
        Self {
            name: intern(name),
            parent: None,
            attrs,
            methods: Vec::new(),
            properties: Vec::new(),
            constants: Vec::new(),
            interfaces: Vec::new(),
            used_traits: Vec::new(),
            trait_prec_rules: Vec::new(),
            trait_alias_rules: Vec::new(),
            user_attributes: Vec::new(),
            instance_ctor: None,
            builtin_prop_size: 0,
            doc_comment: None,
        }
    }

    pub fn class(name: &str) -> Self {
        Self::new(name, Attr::empty())
    }

    pub fn interface(name: &str) -> Self {
        Self::new(name, Attr::INTERFACE | Attr::ABSTRACT)
    }

    pub fn new_trait(name: &str) -> Self {
        Self::new(name, Attr::TRAIT | Attr::ABSTRACT)
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.parent = Some(intern(parent));
        self
    }

    pub fn implements(mut self, iface: &str) -> Self {
        self.interfaces.push(intern(iface));
        self
    }

    pub fn uses(mut self, trait_name: &str) -> Self {
        self.used_traits.push(intern(trait_name));
        self
    }

    pub fn with_attrs(mut self, attrs: Attr) -> Self {
        self.attrs |= attrs;
        self
    }

    pub fn method(mut self, func: FuncDecl) -> Self {
        self.methods.push(Arc::new(func));
        self
    }

    /// Add a property. Array and runtime-computed defaults are flagged for
    /// deep copy on instantiation.
    pub fn prop(mut self, mut prop: PropDecl) -> Self {
        prop.mangled_name = mangle_prop_name(self.name, prop.name, prop.attrs);
        if matches!(prop.default, Val::Array(_) | Val::Uninit) {
            prop.attrs |= Attr::DEEP_INIT;
        }
        self.properties.push(prop);
        self
    }

    pub fn constant(mut self, constant: ConstDecl) -> Self {
        self.constants.push(constant);
        self
    }

    pub fn prefer(mut self, selected: &str, method: &str, others: &[&str]) -> Self {
        self.trait_prec_rules.push(TraitPrecRule {
            method: intern(method),
            selected_trait: intern(selected),
            other_traits: others.iter().map(|o| intern(o)).collect(),
        });
        self
    }

    pub fn alias(
        mut self,
        trait_name: Option<&str>,
        orig: &str,
        new_name: &str,
        modifiers: Attr,
    ) -> Self {
        self.trait_alias_rules.push(TraitAliasRule {
            trait_name: trait_name.map(intern),
            orig_method: intern(orig),
            new_method: intern(new_name),
            modifiers,
        });
        self
    }

    pub fn user_attribute(mut self, name: &str) -> Self {
        self.user_attributes.push(intern(name));
        self
    }

    pub fn native_ctor(mut self, ctor: InstanceCtor, builtin_prop_size: usize) -> Self {
        self.instance_ctor = Some(ctor);
        self.builtin_prop_size = builtin_prop_size;
        self
    }

    pub fn build(self) -> Arc<ClassDecl> {
        Arc::new(self)
    }

    pub fn is_interface(&self) -> bool {
        self.attrs.contains(Attr::INTERFACE)
    }

    pub fn is_trait(&self) -> bool {
        self.attrs.contains(Attr::TRAIT)
    }

    /// `__MockClass` test doubles may extend final classes and override
    /// final methods.
    pub fn is_mock(&self) -> bool {
        self.user_attributes.contains(&SD_MOCK_CLASS)
    }

    pub fn has_method(&self, name: Symbol) -> bool {
        self.lookup_method(name).is_some()
    }

    pub fn lookup_method(&self, name: Symbol) -> Option<&Arc<FuncDecl>> {
        let key = name.lower();
        self.methods.iter().find(|m| m.name.lower() == key)
    }

    pub fn has_prop(&self, name: Symbol) -> bool {
        self.lookup_prop(name).is_some()
    }

    pub fn lookup_prop(&self, name: Symbol) -> Option<&PropDecl> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_prop_name() {
        let cls = intern("Foo");
        let name = intern("bar");
        assert_eq!(mangle_prop_name(cls, name, Attr::PUBLIC), name);
        assert_eq!(
            &*mangle_prop_name(cls, name, Attr::PROTECTED).as_str(),
            "\0*\0bar"
        );
        assert_eq!(
            &*mangle_prop_name(cls, name, Attr::PRIVATE).as_str(),
            "\0Foo\0bar"
        );
    }

    #[test]
    fn test_special_names() {
        assert!(is_special_name(*SD_86PINIT));
        assert!(!is_special_name(intern("__construct")));
        assert!(FuncDecl::pinit(|_| Ok(())).is_generated());
    }

    #[test]
    fn test_required_params() {
        let f = FuncDecl::new("f")
            .param(ParamDecl::new("a"))
            .param(ParamDecl::new("b").optional())
            .param(ParamDecl::new("c").variadic());
        assert_eq!(f.required_params(), 1);
        assert!(f.is_variadic());
    }

    #[test]
    fn test_method_lookup_ignores_case() {
        let decl = ClassDecl::class("A").method(FuncDecl::new("doThing"));
        assert!(decl.has_method(intern("DOTHING")));
        assert!(!decl.has_method(intern("other")));
    }
}
