//! Trait method import
//!
//! Trait methods are gathered into a name-keyed candidate list, filtered by
//! the class's `insteadof` and `as` rules, stripped of redundant abstract
//! declarations and finally installed into the method table as if the class
//! had declared them itself.

use crate::compiler::decl::{TraitAliasRule, TraitPrecRule, is_special_name};
use crate::core::{Attr, Symbol, intern};
use crate::runtime::class::LinkedClass;
use crate::runtime::error::LinkError;
use crate::runtime::func::Func;
use crate::runtime::linker::ClassBuilder;
use indexmap::IndexMap;
use std::sync::Arc;

/// One import candidate: a trait's method plus the modifiers it would be
/// imported with.
#[derive(Debug, Clone)]
struct TraitMethod {
    trait_cls: Arc<LinkedClass>,
    method: Arc<Func>,
    modifiers: Attr,
}

/// Candidates per method, keyed by lower-cased name. The entry keeps the
/// spelling under which the method will be installed.
type CandidateMap = IndexMap<Symbol, (Symbol, Vec<TraitMethod>)>;

impl ClassBuilder<'_> {
    pub(crate) fn import_trait_methods(&mut self) -> Result<(), LinkError> {
        let mut candidates = CandidateMap::new();

        for trait_cls in &self.used_traits {
            for method in trait_cls.methods() {
                if is_special_name(method.name) {
                    continue;
                }
                candidates
                    .entry(method.name.lower())
                    .or_insert_with(|| (method.name, Vec::new()))
                    .1
                    .push(TraitMethod {
                        trait_cls: Arc::clone(trait_cls),
                        method: Arc::clone(method),
                        modifiers: method.attrs,
                    });
            }
        }

        let decl = self.decl;
        for rule in &decl.trait_prec_rules {
            self.apply_prec_rule(rule, &mut candidates)?;
        }
        for rule in &decl.trait_alias_rules {
            self.apply_alias_rule(rule, &mut candidates)?;
        }
        remove_spare_abstract_methods(&mut candidates);

        for (_, (name, list)) in candidates {
            match list.len() {
                0 => continue,
                1 => {}
                _ => {
                    // The class's own declaration settles the conflict.
                    if self.decl.has_method(name) {
                        continue;
                    }
                    return Err(LinkError::trait_conflict(
                        self.name(),
                        format!("method '{}' declared in multiple traits", name),
                    ));
                }
            }
            self.import_trait_method(&list[0], name)?;
        }
        Ok(())
    }

    fn apply_prec_rule(&self, rule: &TraitPrecRule, candidates: &mut CandidateMap) -> Result<(), LinkError> {
        let Some((_, list)) = candidates.get_mut(&rule.method.lower()) else {
            return Err(LinkError::trait_conflict(
                self.name(),
                format!("unknown method '{}'", rule.method),
            ));
        };

        let mut others: Vec<Symbol> = rule.other_traits.clone();
        let mut found_selected = false;
        list.retain(|tm| {
            let trait_name = tm.trait_cls.name();
            if trait_name.eq_ignore_case(rule.selected_trait) {
                found_selected = true;
                return true;
            }
            match others.iter().position(|o| o.eq_ignore_case(trait_name)) {
                Some(pos) => {
                    others.remove(pos);
                    false
                }
                None => true,
            }
        });

        if !found_selected {
            return Err(LinkError::trait_conflict(
                self.name(),
                format!("unknown trait '{}'", rule.selected_trait),
            ));
        }
        if let Some(other) = others.first() {
            return Err(LinkError::trait_conflict(
                self.name(),
                format!("unknown trait '{}'", other),
            ));
        }
        Ok(())
    }

    fn apply_alias_rule(&mut self, rule: &TraitAliasRule, candidates: &mut CandidateMap) -> Result<(), LinkError> {
        let trait_cls = match rule.trait_name {
            Some(name) => self
                .used_traits
                .iter()
                .find(|t| t.name().eq_ignore_case(name))
                .cloned(),
            None => self.find_single_trait_with_method(rule.orig_method),
        };
        let Some(trait_cls) = trait_cls else {
            let message = match rule.trait_name {
                Some(name) => format!("unknown trait '{}'", name),
                None => format!("no single trait provides method '{}'", rule.orig_method),
            };
            return Err(LinkError::trait_conflict(self.name(), message));
        };

        if rule.modifiers.is_static() {
            return Err(LinkError::trait_conflict(
                self.name(),
                "cannot use 'static' as access modifier",
            ));
        }

        let Some(method) = trait_cls.resolve_method(rule.orig_method).cloned() else {
            return Err(LinkError::trait_conflict(
                self.name(),
                format!("unknown trait method '{}'", rule.orig_method),
            ));
        };

        self.trait_aliases.push((
            rule.new_method,
            intern(&format!("{}::{}", trait_cls.name(), rule.orig_method)),
        ));

        if rule.orig_method.eq_ignore_case(rule.new_method) {
            // Visibility-only alias: adjust the existing candidate.
            if let Some((_, list)) = candidates.get_mut(&rule.orig_method.lower()) {
                if let Some(tm) = list.iter_mut().find(|tm| Arc::ptr_eq(&tm.trait_cls, &trait_cls)) {
                    tm.modifiers = rule.modifiers;
                }
            }
        } else if !is_special_name(rule.new_method) {
            candidates
                .entry(rule.new_method.lower())
                .or_insert_with(|| (rule.new_method, Vec::new()))
                .1
                .push(TraitMethod {
                    trait_cls,
                    method,
                    modifiers: rule.modifiers,
                });
        }
        Ok(())
    }

    /// The one used trait providing `name`, or `None` when zero or several
    /// do.
    fn find_single_trait_with_method(&self, name: Symbol) -> Option<Arc<LinkedClass>> {
        let mut found = None;
        for trait_cls in &self.used_traits {
            if trait_cls.resolve_method(name).is_some() {
                if found.is_some() {
                    return None;
                }
                found = Some(Arc::clone(trait_cls));
            }
        }
        found
    }

    fn import_trait_method(&mut self, tm: &TraitMethod, name: Symbol) -> Result<(), LinkError> {
        let existing = self.lookup_method(name).cloned();

        if tm.modifiers.is_abstract() && existing.is_some() {
            return Ok(());
        }

        let method_attrs = tm.method.attrs;
        let attrs = if tm.modifiers.is_empty() || tm.modifiers == method_attrs {
            method_attrs
        } else {
            // Aliases may only touch visibility, abstract and final.
            let mut masked = tm.modifiers & Attr::ALIAS_MASK;
            if !masked.intersects(Attr::VISIBILITY) {
                masked |= method_attrs & Attr::VISIBILITY;
            }
            masked | (method_attrs - Attr::ALIAS_MASK)
        };

        if let Some(existing) = &existing {
            if existing.cls.id == self.me.id {
                return Ok(());
            }
        }

        let mut f = tm.method.clone_for(self.me);
        f.name = name;
        f.attrs = attrs;
        self.install_method(f)
    }
}

/// Drop abstract candidates when a concrete one exists, and keep at most
/// one abstract declaration otherwise.
fn remove_spare_abstract_methods(candidates: &mut CandidateMap) {
    for (_, list) in candidates.values_mut() {
        let has_concrete = list.iter().any(|tm| !tm.modifiers.is_abstract());
        let mut seen_abstract = false;
        list.retain(|tm| {
            if !tm.modifiers.is_abstract() {
                return true;
            }
            let keep = !has_concrete && !seen_abstract;
            seen_abstract = true;
            keep
        });
    }
}
