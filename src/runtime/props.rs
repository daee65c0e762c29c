//! Declared-property layout and static-property aliasing.

use crate::compiler::decl::{PropDecl, mangle_prop_name};
use crate::core::{Attr, Symbol, Val, Visibility};
use crate::runtime::class::{Prop, SProp};
use crate::runtime::error::LinkError;
use crate::runtime::linker::ClassBuilder;

/// Trait properties must agree with earlier declarations on these bits.
const TRAIT_PROP_MASK: Attr = Attr::VISIBILITY.union(Attr::STATIC);

/// Initial values a trait may repeat: same scalar type and value. Arrays
/// and runtime-computed values never qualify.
pub fn compatible_trait_prop_init(a: &Val, b: &Val) -> bool {
    a.same_scalar(b)
}

impl ClassBuilder<'_> {
    pub(crate) fn set_properties(&mut self) -> Result<(), LinkError> {
        let mut num_inaccessible = 0;

        if let Some(parent) = self.parent.clone() {
            self.has_deep_init_props = parent.has_deep_init_props();
            for prop in parent.decl_props().iter() {
                if prop.attrs.is_private() {
                    num_inaccessible += 1;
                    self.decl_props.add_unnamed(prop.clone());
                } else {
                    self.decl_props.add(prop.clone());
                }
            }
            self.decl_prop_init = parent.decl_prop_init().to_vec();

            // Inherited statics alias the owner's storage.
            for sprop in parent.static_props() {
                if sprop.attrs.is_private() {
                    continue;
                }
                let mut alias = sprop.clone();
                alias.val = Val::Uninit;
                self.static_props.insert(alias.name, alias);
            }
        }

        let decl = self.decl;
        for pre in &decl.properties {
            if pre.is_static() {
                self.add_static_prop(pre)?;
            } else {
                self.add_instance_prop(pre)?;
            }
        }

        self.import_trait_props()?;

        self.decl_prop_num_accessible = self.decl_props.len() - num_inaccessible;
        Ok(())
    }

    fn redeclaration(&self, property: Symbol, message: String) -> LinkError {
        LinkError::PropertyRedeclaration {
            class: self.name(),
            property,
            message,
        }
    }

    fn add_instance_prop(&mut self, pre: &PropDecl) -> Result<(), LinkError> {
        if let Some(existing) = self.static_props.get(&pre.name) {
            return Err(self.redeclaration(
                pre.name,
                format!(
                    "Cannot redeclare static {}::${} as non-static {}::${}",
                    existing.class.name,
                    pre.name,
                    self.name(),
                    pre.name
                ),
            ));
        }

        if let Some(parent) = &self.parent {
            if let Some(slot) = parent.lookup_decl_prop(pre.name) {
                if let Some(parent_prop) = parent.decl_props().get(slot) {
                    if pre.attrs.visibility() > parent_prop.visibility() {
                        return Err(self.redeclaration(
                            pre.name,
                            format!(
                                "Access level to {}::${} must be {} (as in class {}) or weaker",
                                self.name(),
                                pre.name,
                                parent_prop.visibility().as_str(),
                                parent.name()
                            ),
                        ));
                    }
                }
            }
        }

        if pre.attrs.contains(Attr::DEEP_INIT) {
            self.has_deep_init_props = true;
        }

        if !pre.attrs.is_private() {
            if let Some(slot) = self.decl_props.find(pre.name) {
                // Redeclaration of an inherited protected/public property
                // keeps the slot; a public redeclaration widens a protected
                // one in place.
                let prop = self.decl_props.get_mut(slot);
                if pre.attrs.contains(Attr::PUBLIC) && prop.attrs.contains(Attr::PROTECTED) {
                    prop.mangled_name = pre.mangled_name;
                    prop.original_mangled_name = pre.mangled_name;
                    prop.attrs = prop.attrs.with_visibility(Visibility::Public);
                    prop.type_constraint = pre.type_constraint;
                }
                if pre.attrs.contains(Attr::DEEP_INIT) {
                    prop.attrs |= Attr::DEEP_INIT;
                } else {
                    prop.attrs -= Attr::DEEP_INIT;
                }
                self.decl_prop_init[slot] = pre.default.clone();
                return Ok(());
            }
        }

        self.decl_props.add(Prop {
            name: pre.name,
            mangled_name: pre.mangled_name,
            original_mangled_name: pre.mangled_name,
            attrs: pre.attrs,
            class: self.me,
            type_constraint: pre.type_constraint,
            doc_comment: pre.doc_comment.clone(),
        });
        self.decl_prop_init.push(pre.default.clone());
        Ok(())
    }

    fn add_static_prop(&mut self, pre: &PropDecl) -> Result<(), LinkError> {
        if let Some(slot) = self.decl_props.find(pre.name) {
            let owner = self
                .decl_props
                .get(slot)
                .map(|p| p.class.name)
                .unwrap_or(self.me.name);
            return Err(self.redeclaration(
                pre.name,
                format!(
                    "Cannot redeclare non-static {}::${} as static {}::${}",
                    owner,
                    pre.name,
                    self.name(),
                    pre.name
                ),
            ));
        }

        if let Some(existing) = self.static_props.get(&pre.name) {
            if pre.attrs.visibility() > existing.visibility() {
                let parent_name = self.parent.as_ref().map(|p| p.name()).unwrap_or(existing.class.name);
                return Err(self.redeclaration(
                    pre.name,
                    format!(
                        "Access level to {}::${} must be {} (as in class {}) or weaker",
                        self.name(),
                        pre.name,
                        existing.visibility().as_str(),
                        parent_name
                    ),
                ));
            }
        }

        // Redeclaring takes ownership: this class gets its own storage.
        let sprop = SProp {
            name: pre.name,
            attrs: pre.attrs,
            class: self.me,
            val: pre.default.clone(),
            type_constraint: pre.type_constraint,
            doc_comment: pre.doc_comment.clone(),
        };
        match self.static_props.get_mut(&pre.name) {
            Some(existing) => *existing = sprop,
            None => {
                self.static_props.insert(pre.name, sprop);
            }
        }
        Ok(())
    }

    fn incompatible_trait_prop(&self, name: Symbol) -> LinkError {
        self.redeclaration(
            name,
            format!(
                "trait declaration of property '{}' is incompatible with previous declaration",
                name
            ),
        )
    }

    fn import_trait_props(&mut self) -> Result<(), LinkError> {
        let traits = self.used_traits.clone();
        for trait_cls in &traits {
            for (slot, trait_prop) in trait_cls.decl_props().iter().enumerate() {
                let trait_val = trait_cls.decl_prop_init()[slot].clone();
                self.import_trait_instance_prop(trait_prop, trait_val)?;
            }
            for trait_sprop in trait_cls.static_props() {
                self.import_trait_static_prop(trait_sprop)?;
            }
        }
        Ok(())
    }

    fn import_trait_instance_prop(&mut self, trait_prop: &Prop, trait_val: Val) -> Result<(), LinkError> {
        if self.static_props.contains_key(&trait_prop.name) {
            return Err(self.incompatible_trait_prop(trait_prop.name));
        }
        match self.decl_props.find(trait_prop.name) {
            None => {
                let mut prop = trait_prop.clone();
                prop.class = self.me;
                // Private keys embed the declaring class; the trait's
                // original key stays the initializer key.
                if prop.attrs.is_private() {
                    prop.mangled_name = mangle_prop_name(self.name(), prop.name, prop.attrs);
                }
                if prop.is_deep_init() {
                    self.has_deep_init_props = true;
                }
                self.decl_props.add(prop);
                self.decl_prop_init.push(trait_val);
            }
            Some(slot) => {
                let prev_attrs = self.decl_props.get(slot).map(|p| p.attrs).unwrap_or_default();
                let prev_val = &self.decl_prop_init[slot];
                if (prev_attrs & TRAIT_PROP_MASK) != (trait_prop.attrs & TRAIT_PROP_MASK)
                    || !compatible_trait_prop_init(prev_val, &trait_val)
                {
                    return Err(self.incompatible_trait_prop(trait_prop.name));
                }
            }
        }
        Ok(())
    }

    fn import_trait_static_prop(&mut self, trait_sprop: &SProp) -> Result<(), LinkError> {
        if self.decl_props.find(trait_sprop.name).is_some() {
            return Err(self.incompatible_trait_prop(trait_sprop.name));
        }

        let Some(prev) = self.static_props.get(&trait_sprop.name).cloned() else {
            let mut sprop = trait_sprop.clone();
            sprop.class = self.me;
            self.static_props.insert(sprop.name, sprop);
            return Ok(());
        };

        let prev_val = if prev.class.id == self.me.id {
            prev.val.clone()
        } else {
            self.static_prop_init_val(&prev)
        };
        if (prev.attrs & TRAIT_PROP_MASK) != (trait_sprop.attrs & TRAIT_PROP_MASK)
            || !compatible_trait_prop_init(&trait_sprop.val, &prev_val)
        {
            return Err(self.incompatible_trait_prop(trait_sprop.name));
        }

        if let Some(prev) = self.static_props.get_mut(&trait_sprop.name) {
            prev.class = self.me;
            prev.val = prev_val;
        }
        Ok(())
    }

    /// Declared initial value of an inherited static, read from its owner.
    fn static_prop_init_val(&self, sprop: &SProp) -> Val {
        self.ancestor_with_id(sprop.class.id)
            .and_then(|owner| owner.lookup_sprop(sprop.name).map(|(_, p)| p.val.clone()))
            .unwrap_or(Val::Uninit)
    }
}
