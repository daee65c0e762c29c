//! Introspection of linked classes
//!
//! Produces a serializable description of a `LinkedClass`: what it declares
//! itself versus what it inherits or imports, with the declaring class and
//! visibility of every member. Maps preserve declared order; trait aliases
//! keep the order their rules were applied in.

use crate::core::{Symbol, Val};
use crate::runtime::class::{ClassState, LinkedClass};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub class: String,
    pub visibility: &'static str,
    #[serde(rename = "static")]
    pub is_static: bool,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Declared by this class (including methods imported from its traits).
    pub own: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_trait: Option<String>,
    pub slot: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropInfo {
    pub class: String,
    pub visibility: &'static str,
    pub own: bool,
    /// `null` when an initializer computes the value.
    pub default: Json,
    pub has_initializer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_constraint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstInfo {
    pub class: String,
    pub own: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    /// Source expression of a constant computed at runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Root first, this class last.
    pub ancestors: Vec<String>,
    pub interfaces: Vec<String>,
    pub traits: Vec<String>,
    pub trait_aliases: IndexMap<String, String>,
    pub constants: IndexMap<String, ConstInfo>,
    pub properties: IndexMap<String, PropInfo>,
    pub static_properties: IndexMap<String, PropInfo>,
    pub methods: IndexMap<String, MethodInfo>,
    pub persistent: bool,
    pub state: &'static str,
}

fn name(sym: Symbol) -> String {
    sym.as_str().to_string()
}

fn default_json(val: &Val) -> (Json, bool) {
    if val.is_uninit() {
        (Json::Null, true)
    } else {
        (val.to_json(), false)
    }
}

pub fn class_kind(cls: &LinkedClass) -> &'static str {
    if cls.is_interface() {
        "interface"
    } else if cls.is_trait() {
        "trait"
    } else if cls.is_abstract() {
        "abstract class"
    } else {
        "class"
    }
}

fn state_name(state: ClassState) -> &'static str {
    match state {
        ClassState::Active => "active",
        ClassState::Destroying => "destroying",
        ClassState::ZombiePendingFree => "zombie",
        ClassState::Freed => "freed",
    }
}

/// Describe `cls`.
pub fn describe(cls: &LinkedClass) -> ClassInfo {
    let own_id = cls.id();

    let ancestors = (0..=cls.depth())
        .filter_map(|d| cls.ancestor_at(d))
        .map(|c| name(c.name()))
        .collect();

    let mut methods = IndexMap::new();
    for func in cls.methods() {
        let from_trait = func.pre_class_is_trait.then(|| name(func.pre_class));
        methods.insert(
            name(func.name),
            MethodInfo {
                class: name(func.cls.name),
                visibility: func.visibility().as_str(),
                is_static: func.is_static(),
                is_abstract: func.is_abstract(),
                is_final: func.is_final(),
                own: func.cls.id == own_id,
                from_trait,
                slot: func.slot,
            },
        );
    }

    let mut properties = IndexMap::new();
    for (slot, prop) in cls.decl_props().iter().enumerate() {
        let own = prop.class.id == own_id;
        // Inherited privates share their name with anything else the class
        // may declare; key them by their declaring class.
        let key = if prop.attrs.is_private() && !own {
            format!("{}::{}", prop.class.name, prop.name)
        } else {
            name(prop.name)
        };
        let (default, has_initializer) = cls
            .decl_prop_init()
            .get(slot)
            .map(default_json)
            .unwrap_or((Json::Null, false));
        properties.insert(
            key,
            PropInfo {
                class: name(prop.class.name),
                visibility: prop.visibility().as_str(),
                own,
                default,
                has_initializer,
                offset: Some(cls.decl_prop_offset(slot)),
                type_constraint: prop.type_constraint.map(name),
            },
        );
    }

    let mut static_properties = IndexMap::new();
    for sprop in cls.static_props() {
        let (default, has_initializer) = default_json(&sprop.val);
        static_properties.insert(
            name(sprop.name),
            PropInfo {
                class: name(sprop.class.name),
                visibility: sprop.visibility().as_str(),
                own: sprop.class.id == own_id,
                default,
                has_initializer,
                offset: None,
                type_constraint: sprop.type_constraint.map(name),
            },
        );
    }

    let mut constants = IndexMap::new();
    for c in cls.constants() {
        let non_scalar = c.val.is_uninit();
        constants.insert(
            name(c.name),
            ConstInfo {
                class: name(c.class.name),
                own: c.class.id == own_id,
                value: (!non_scalar).then(|| c.val.to_json()),
                expression: non_scalar.then(|| c.php_code.to_string()),
            },
        );
    }

    ClassInfo {
        name: name(cls.name()),
        kind: class_kind(cls),
        parent: cls.decl().parent.map(name),
        ancestors,
        interfaces: cls.interfaces().iter().map(|i| name(i.name())).collect(),
        traits: cls.decl().used_traits.iter().copied().map(name).collect(),
        trait_aliases: cls
            .trait_aliases()
            .iter()
            .map(|(alias, orig)| (name(*alias), name(*orig)))
            .collect(),
        constants,
        properties,
        static_properties,
        methods,
        persistent: cls.is_persistent(),
        state: state_name(cls.state()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::decl::{ClassDecl, ConstDecl, FuncDecl, PropDecl};
    use crate::core::Attr;
    use crate::runtime::linker::tests::MapResolver;

    #[test]
    fn test_describe_inherited_members() {
        let mut r = MapResolver::default();
        r.link(
            ClassDecl::class("RBase")
                .prop(PropDecl::new("secret", Attr::PRIVATE, Val::Int(1)))
                .prop(PropDecl::new("count", Attr::PROTECTED | Attr::STATIC, Val::Int(0)))
                .constant(ConstDecl::new("LIMIT", Val::Int(10)))
                .method(FuncDecl::new("run")),
        )
        .unwrap();
        let child = r
            .link(
                ClassDecl::class("RChild")
                    .extends("RBase")
                    .prop(PropDecl::new("secret", Attr::PRIVATE, Val::Int(2)))
                    .constant(ConstDecl::non_scalar("TABLE", "['a' => 1]")),
            )
            .unwrap();

        let info = describe(&child);
        assert_eq!(info.kind, "class");
        assert_eq!(info.ancestors, vec!["RBase", "RChild"]);
        assert_eq!(info.parent.as_deref(), Some("RBase"));

        let keys: Vec<_> = info.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["RBase::secret", "secret"]);
        assert!(info.properties["secret"].own);
        assert!(!info.properties["RBase::secret"].own);

        assert_eq!(info.static_properties["count"].class, "RBase");
        assert_eq!(info.constants["LIMIT"].value, Some(Json::from(10)));
        assert_eq!(info.constants["TABLE"].expression.as_deref(), Some("['a' => 1]"));
        assert!(!info.methods["run"].own);
        assert_eq!(info.methods["run"].class, "RBase");
    }

    #[test]
    fn test_describe_trait_aliases_in_order() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::new_trait("Greets").method(FuncDecl::new("hello")))
            .unwrap();
        let cls = r
            .link(
                ClassDecl::class("Greeter")
                    .uses("Greets")
                    .alias(Some("Greets"), "hello", "hi", Attr::empty())
                    .alias(None, "hello", "hey", Attr::PROTECTED),
            )
            .unwrap();
        let info = describe(&cls);
        let aliases: Vec<_> = info.trait_aliases.iter().collect();
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases[0], (&"hi".to_string(), &"Greets::hello".to_string()));
        assert_eq!(aliases[1].0, "hey");
        assert_eq!(info.methods["hey"].visibility, "protected");
        assert_eq!(info.methods["hello"].from_trait.as_deref(), Some("Greets"));
        assert!(info.methods["hello"].own);
        assert_eq!(info.traits, vec!["Greets"]);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["methods"]["hi"]["static"], Json::Bool(false));
    }
}
