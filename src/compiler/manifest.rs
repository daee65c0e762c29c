//! JSON class manifests
//!
//! Describes a class graph as data so tools and tests can feed declarations
//! to the linker without a compiler. Values are plain JSON. A property or
//! constant given an `init` instead of a `default`/`value` is treated as a
//! runtime-computed initializer: the generated `86pinit`, `86sinit` or
//! `86cinit` produces it when an execution context first needs it.
//!
//! ```json
//! { "classes": [
//!   { "name": "Base",
//!     "properties": [{ "name": "x", "visibility": "protected", "default": 1 }],
//!     "methods": [{ "name": "get", "returns_property": "x" }] },
//!   { "name": "Child", "extends": "Base" }
//! ] }
//! ```

use crate::compiler::decl::{ClassDecl, ConstDecl, FuncDecl, ParamDecl, PropDecl, mangle_prop_name};
use crate::core::{Attr, Symbol, Val, Visibility, intern};
use crate::runtime::context::Autoloader;
use crate::runtime::error::RuntimeError;
use crate::runtime::init::InitScratch;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("class {class}: {message}")]
    Invalid { class: String, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassKind {
    #[default]
    Class,
    Abstract,
    Interface,
    Trait,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilitySpec {
    #[default]
    Public,
    Protected,
    Private,
}

impl From<VisibilitySpec> for Visibility {
    fn from(v: VisibilitySpec) -> Self {
        match v {
            VisibilitySpec::Public => Visibility::Public,
            VisibilitySpec::Protected => Visibility::Protected,
            VisibilitySpec::Private => Visibility::Private,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub variadic: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub visibility: VisibilitySpec,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Native body returning this constant value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Json>,
    /// Native body returning `$this->{returns_property}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns_property: Option<String>,
    #[serde(default)]
    pub static_locals: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub visibility: VisibilitySpec,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    /// Value produced by the generated initializer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Json>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_constraint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Json>,
    /// Source text shown by reflection for computed constants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrecedenceSpec {
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub method: String,
    pub insteadof: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasSpec {
    #[serde(default, rename = "trait", skip_serializing_if = "Option::is_none")]
    pub trait_name: Option<String>,
    pub method: String,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<VisibilitySpec>,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ClassKind,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub uses: Vec<String>,
    #[serde(default)]
    pub precedence: Vec<PrecedenceSpec>,
    #[serde(default)]
    pub aliases: Vec<AliasSpec>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub constants: Vec<ConstantSpec>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestFile {
    pub classes: Vec<ClassSpec>,
}

fn invalid(class: &str, message: impl Into<String>) -> ManifestError {
    ManifestError::Invalid {
        class: class.to_string(),
        message: message.into(),
    }
}

fn method_decl(class: &str, spec: &MethodSpec) -> Result<FuncDecl, ManifestError> {
    let mut attrs = Attr::empty().with_visibility(spec.visibility.into());
    if spec.is_static {
        attrs |= Attr::STATIC;
    }
    if spec.is_abstract {
        attrs |= Attr::ABSTRACT;
    }
    if spec.is_final {
        attrs |= Attr::FINAL;
    }
    let mut f = FuncDecl::new(&spec.name).attrs(attrs);
    for p in &spec.params {
        let mut param = ParamDecl::new(&p.name);
        if p.optional {
            param = param.optional();
        }
        if p.variadic {
            param = param.variadic();
        }
        f = f.param(param);
    }
    if spec.static_locals {
        f = f.with_static_locals();
    }

    match (&spec.returns, &spec.returns_property) {
        (Some(_), Some(_)) => {
            return Err(invalid(
                class,
                format!("method {} has both returns and returns_property", spec.name),
            ));
        }
        (Some(json), None) => {
            let val = Val::from_json(json);
            f = f.native(move |_| Ok(val.clone()));
        }
        (None, Some(prop)) => {
            let prop = intern(prop);
            f = f.native(move |call| call.this_prop(prop));
        }
        (None, None) => {}
    }
    Ok(f)
}

/// Key the initializer scratch uses for a property declared by `class`.
fn init_key(class: Symbol, name: Symbol, attrs: Attr) -> Symbol {
    if attrs.is_private() {
        mangle_prop_name(class, name, attrs)
    } else {
        name
    }
}

fn fill_pending(
    values: Arc<Vec<(Symbol, Val)>>,
) -> impl Fn(&mut InitScratch<'_>) -> Result<(), RuntimeError> + Send + Sync + 'static {
    move |scratch: &mut InitScratch<'_>| {
        for (key, val) in values.iter() {
            if scratch.is_pending(*key) {
                scratch.set_key(*key, val.clone());
            }
        }
        Ok(())
    }
}

impl ClassSpec {
    /// Build the compile-time declaration described by this entry.
    pub fn to_decl(&self) -> Result<ClassDecl, ManifestError> {
        if self.name.is_empty() {
            return Err(invalid("<anonymous>", "class name is empty"));
        }
        let mut decl = match self.kind {
            ClassKind::Class => ClassDecl::class(&self.name),
            ClassKind::Abstract => ClassDecl::class(&self.name).with_attrs(Attr::ABSTRACT),
            ClassKind::Interface => ClassDecl::interface(&self.name),
            ClassKind::Trait => ClassDecl::new_trait(&self.name),
        };
        if self.is_final {
            decl = decl.with_attrs(Attr::FINAL);
        }
        if self.persistent {
            decl = decl.with_attrs(Attr::PERSISTENT);
        }
        if let Some(parent) = &self.extends {
            decl = decl.extends(parent);
        }
        for iface in &self.implements {
            decl = decl.implements(iface);
        }
        for used in &self.uses {
            decl = decl.uses(used);
        }
        for rule in &self.precedence {
            let others: Vec<&str> = rule.insteadof.iter().map(String::as_str).collect();
            decl = decl.prefer(&rule.trait_name, &rule.method, &others);
        }
        for rule in &self.aliases {
            let mut modifiers = Attr::empty();
            if let Some(vis) = rule.visibility {
                modifiers = modifiers.with_visibility(vis.into());
            }
            if rule.is_final {
                modifiers |= Attr::FINAL;
            }
            let new_name = rule.alias.as_deref().unwrap_or(&rule.method);
            decl = decl.alias(rule.trait_name.as_deref(), &rule.method, new_name, modifiers);
        }
        for attr in &self.attributes {
            decl = decl.user_attribute(attr);
        }

        let mut computed_consts: IndexMap<Symbol, Val> = IndexMap::new();
        for c in &self.constants {
            decl = match (&c.value, &c.init) {
                (Some(v), None) => decl.constant(ConstDecl::new(&c.name, Val::from_json(v))),
                (None, Some(init)) => {
                    computed_consts.insert(intern(&c.name), Val::from_json(init));
                    let code = c.expression.clone().unwrap_or_else(|| init.to_string());
                    decl.constant(ConstDecl::non_scalar(&c.name, &code))
                }
                _ => {
                    return Err(invalid(
                        &self.name,
                        format!("constant {} needs exactly one of value or init", c.name),
                    ));
                }
            };
        }

        let mut pinit: Vec<(Symbol, Val)> = Vec::new();
        let mut sinit: Vec<(Symbol, Val)> = Vec::new();
        for p in &self.properties {
            let mut attrs = Attr::empty().with_visibility(p.visibility.into());
            if p.is_static {
                attrs |= Attr::STATIC;
            }
            let default = match (&p.default, &p.init) {
                (Some(_), Some(_)) => {
                    return Err(invalid(
                        &self.name,
                        format!("property ${} has both default and init", p.name),
                    ));
                }
                (Some(v), None) => Val::from_json(v),
                (None, Some(init)) => {
                    let name = intern(&p.name);
                    let val = Val::from_json(init);
                    if p.is_static {
                        sinit.push((name, val));
                    } else {
                        pinit.push((init_key(decl.name, name, attrs), val));
                    }
                    Val::Uninit
                }
                (None, None) => Val::Null,
            };
            let mut prop = PropDecl::new(&p.name, attrs, default);
            prop.type_constraint = p.type_constraint.as_deref().map(intern);
            decl = decl.prop(prop);
        }

        for m in &self.methods {
            decl = decl.method(method_decl(&self.name, m)?);
        }
        if !pinit.is_empty() {
            decl = decl.method(FuncDecl::pinit(fill_pending(Arc::new(pinit))));
        }
        if !sinit.is_empty() {
            decl = decl.method(FuncDecl::sinit(fill_pending(Arc::new(sinit))));
        }
        if !computed_consts.is_empty() {
            let class = decl.name;
            decl = decl.method(FuncDecl::cinit(move |name| {
                computed_consts
                    .get(&name)
                    .cloned()
                    .ok_or(RuntimeError::UndefinedConstant { class, constant: name })
            }));
        }
        Ok(decl)
    }
}

/// Declarations parsed from a manifest, in file order, addressable by
/// case-insensitive name.
#[derive(Debug, Clone, Default)]
pub struct ClassManifest {
    decls: IndexMap<Symbol, Arc<ClassDecl>>,
}

impl ClassManifest {
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        let file: ManifestFile = serde_json::from_str(text)?;
        Self::from_file(&file)
    }

    pub fn from_file(file: &ManifestFile) -> Result<Self, ManifestError> {
        let mut decls = IndexMap::new();
        for spec in &file.classes {
            let decl = spec.to_decl()?;
            let key = decl.name.lower();
            if decls.contains_key(&key) {
                return Err(invalid(&spec.name, "declared twice in manifest"));
            }
            decls.insert(key, Arc::new(decl));
        }
        debug!(classes = decls.len(), "manifest loaded");
        Ok(Self { decls })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn get(&self, name: Symbol) -> Option<&Arc<ClassDecl>> {
        self.decls.get(&name.lower())
    }

    pub fn decls(&self) -> impl Iterator<Item = &Arc<ClassDecl>> {
        self.decls.values()
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

impl Autoloader for ClassManifest {
    fn load(&self, name: Symbol) -> Option<Arc<ClassDecl>> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::decl::{FuncBody, SD_86CINIT, SD_86PINIT};

    #[test]
    fn test_parse_minimal() {
        let manifest = ClassManifest::from_json(
            r#"{ "classes": [
                { "name": "Base",
                  "properties": [{ "name": "x", "visibility": "protected", "default": 1 }],
                  "methods": [{ "name": "get", "returns_property": "x" }] },
                { "name": "Child", "extends": "Base", "kind": "class" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 2);
        let child = manifest.get(intern("CHILD")).unwrap();
        assert_eq!(child.parent, Some(intern("Base")));
        let base = manifest.get(intern("base")).unwrap();
        let get = base.lookup_method(intern("get")).unwrap();
        assert!(matches!(get.body, FuncBody::Native(_)));
        assert_eq!(base.properties[0].attrs.visibility(), Visibility::Protected);
    }

    #[test]
    fn test_computed_members_get_initializers() {
        let manifest = ClassManifest::from_json(
            r#"{ "classes": [
                { "name": "Cfg",
                  "properties": [
                    { "name": "opts", "visibility": "private", "init": { "debug": true } },
                    { "name": "cache", "static": true, "init": [] }
                  ],
                  "constants": [{ "name": "LIST", "init": [1, 2], "expression": "[1, 2]" }] }
            ] }"#,
        )
        .unwrap();
        let cfg = manifest.get(intern("Cfg")).unwrap();
        assert!(cfg.has_method(*SD_86PINIT));
        assert!(cfg.has_method(*SD_86CINIT));
        assert!(cfg.properties[0].default.is_uninit());
        assert_eq!(&*cfg.constants[0].php_code, "[1, 2]");
    }

    #[test]
    fn test_rejects_conflicting_fields() {
        let err = ClassManifest::from_json(
            r#"{ "classes": [{ "name": "Bad", "constants": [{ "name": "A" }] }] }"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "class Bad: constant A needs exactly one of value or init"
        );

        let err = ClassManifest::from_json(r#"{ "classes": [{ "name": "A" }, { "name": "a" }] }"#)
            .unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { .. }));

        let err = ClassManifest::from_json(r#"{ "classes": [{ "name": "A", "bogus": 1 }] }"#)
            .unwrap_err();
        assert!(matches!(err, ManifestError::Json(_)));
    }
}
