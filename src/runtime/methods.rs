//! Method table construction and override legality.

use crate::compiler::decl::{FuncDecl, SD_CONSTRUCT};
use crate::runtime::error::LinkError;
use crate::runtime::func::Func;
use crate::runtime::linker::ClassBuilder;
use std::sync::Arc;

/// Whether `child` accepts every call `base` accepts: no more required
/// parameters, at least as many positional ones, variadic if the base is,
/// and matching by-reference passing on the shared positions.
pub fn params_compatible(child: &FuncDecl, base: &FuncDecl) -> bool {
    if child.required_params() > base.required_params() {
        return false;
    }
    if base.is_variadic() && !child.is_variadic() {
        return false;
    }
    let base_positional = base.params.iter().filter(|p| !p.is_variadic).count();
    let child_positional = child.params.iter().filter(|p| !p.is_variadic).count();
    if child_positional < base_positional && !child.is_variadic() {
        return false;
    }
    child
        .params
        .iter()
        .zip(base.params.iter())
        .all(|(c, b)| c.by_ref == b.by_ref)
}

impl ClassBuilder<'_> {
    pub(crate) fn set_methods(&mut self) -> Result<(), LinkError> {
        let mut static_local_slots = Vec::new();

        if let Some(parent) = self.parent.clone() {
            for (slot, (key, f)) in parent.methods.iter().enumerate() {
                if !f.attrs.is_private() && f.has_static_locals() {
                    static_local_slots.push(slot);
                }
                self.methods.insert(*key, Arc::clone(f));
            }
        }

        for decl in &self.decl.methods {
            if decl.is_special() {
                continue;
            }
            let f = self.bind_own(Arc::clone(decl));
            self.install_method(f)?;
        }

        self.traits_begin = self.methods.len();
        if !self.used_traits.is_empty() {
            self.import_trait_methods()?;
        }
        self.traits_end = self.methods.len();

        // Inherited methods with static locals get their own copy so each
        // class sees distinct static-local storage.
        for slot in static_local_slots {
            let f = &self.methods[slot];
            if f.cls.id != self.me.id {
                let copy = f.clone_for(f.cls);
                self.methods[slot] = Arc::new(copy);
            }
        }

        if !self.attrs.allows_abstract_methods() {
            if let Some(f) = self.methods.values().find(|f| f.is_abstract()) {
                return Err(LinkError::AbstractMethodUnimplemented {
                    class: self.name(),
                    method: f.name,
                    message: format!(
                        "Class {} contains abstract method ({}) and must therefore be declared abstract or implement the remaining methods",
                        self.name(),
                        f.name
                    ),
                });
            }
        }
        Ok(())
    }

    /// Overlay `f` onto an inherited entry of the same name, or append it
    /// as a new slot.
    pub(crate) fn install_method(&mut self, mut f: Func) -> Result<(), LinkError> {
        let key = f.name.lower();
        match self.methods.get_full(&key) {
            Some((slot, _, existing)) => {
                let existing = Arc::clone(existing);
                self.check_override(&existing, &f)?;
                if existing.attrs.is_private() || f.attrs.is_private() {
                    f.base_cls = self.me;
                    f.base_decl = Arc::clone(&f.decl);
                } else {
                    f.base_cls = existing.base_cls;
                    f.base_decl = Arc::clone(&existing.base_decl);
                }
                f.has_private_ancestor = existing.has_private_ancestor || existing.attrs.is_private();
                f.slot = slot;
                self.methods[slot] = Arc::new(f);
            }
            None => {
                f.base_cls = self.me;
                f.base_decl = Arc::clone(&f.decl);
                f.has_private_ancestor = false;
                f.slot = self.methods.len();
                self.methods.insert(key, Arc::new(f));
            }
        }
        Ok(())
    }

    fn check_override(&self, parent: &Func, method: &Func) -> Result<(), LinkError> {
        if method.is_generated() {
            return Ok(());
        }
        let violation = |message: String| LinkError::OverrideViolation {
            class: self.name(),
            method: method.name,
            message,
        };

        if parent.is_final() && !self.is_mock() {
            return Err(violation(format!(
                "Cannot override final method {}::{}()",
                parent.cls.name, parent.name
            )));
        }

        if method.is_abstract() && !parent.is_abstract() {
            return Err(violation(format!(
                "Cannot re-declare non-abstract method {}::{}() abstract in class {}",
                parent.cls.name,
                parent.name,
                self.name()
            )));
        }

        if method.visibility() > parent.visibility() {
            return Err(violation(format!(
                "Access level to {}::{}() must be {} (as in class {}) or weaker",
                self.name(),
                method.name,
                parent.visibility().as_str(),
                parent.cls.name
            )));
        }

        if method.is_static() != parent.is_static() {
            return Err(violation(format!(
                "Cannot change {}static method {}::{}() to {}static in {}",
                if parent.is_static() { "" } else { "non-" },
                parent.base_cls.name,
                method.name,
                if method.is_static() { "" } else { "non-" },
                self.name()
            )));
        }

        // Signatures are checked against the topmost declaration. Private
        // ancestors start a new chain, and constructors only need to match
        // an abstract base.
        let base = &parent.base_decl;
        let is_ctor = method.name.lower() == *SD_CONSTRUCT;
        if !method.is_abstract()
            && !parent.attrs.is_private()
            && (base.attrs.is_abstract() || !is_ctor)
            && !params_compatible(&method.decl, base)
        {
            return Err(violation(format!(
                "Declaration of {}::{}() must be compatible with that of {}::{}()",
                self.name(),
                method.name,
                parent.base_cls.name,
                base.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::decl::{ClassDecl, ParamDecl};
    use crate::core::{Attr, Visibility, intern};
    use crate::runtime::linker::tests::MapResolver;

    #[test]
    fn test_params_compatible() {
        let base = FuncDecl::new("f").param(ParamDecl::new("a"));
        let wider = FuncDecl::new("f")
            .param(ParamDecl::new("a"))
            .param(ParamDecl::new("b").optional());
        let stricter = FuncDecl::new("f")
            .param(ParamDecl::new("a"))
            .param(ParamDecl::new("b"));
        let fewer = FuncDecl::new("f");
        let variadic = FuncDecl::new("f").param(ParamDecl::new("rest").variadic());

        assert!(params_compatible(&wider, &base));
        assert!(!params_compatible(&stricter, &base));
        assert!(!params_compatible(&fewer, &base));
        assert!(params_compatible(&variadic, &base));
    }

    #[test]
    fn test_parent_slots_come_first() {
        let mut r = MapResolver::default();
        r.link(
            ClassDecl::class("SlotBase")
                .method(FuncDecl::new("a"))
                .method(FuncDecl::new("b")),
        )
        .unwrap();
        let child = r
            .link(
                ClassDecl::class("SlotChild")
                    .extends("SlotBase")
                    .method(FuncDecl::new("c"))
                    .method(FuncDecl::new("a")),
            )
            .unwrap();
        let names: Vec<_> = child.methods().map(|f| f.name.to_string()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        let a = child.resolve_method(intern("A")).unwrap();
        assert_eq!(a.slot, 0);
        assert_eq!(a.cls.name, intern("SlotChild"));
        assert_eq!(a.base_cls.name, intern("SlotBase"));
        assert_eq!(child.resolve_method(intern("b")).unwrap().cls.name, intern("SlotBase"));
    }

    #[test]
    fn test_final_method_cannot_be_overridden() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("FinBase").method(FuncDecl::new("run").attrs(Attr::FINAL)))
            .unwrap();
        let err = r
            .link(ClassDecl::class("FinChild").extends("FinBase").method(FuncDecl::new("run")))
            .unwrap_err();
        assert_eq!(err.kind(), "OverrideViolation");
        assert_eq!(err.to_string(), "Cannot override final method FinBase::run()");
    }

    #[test]
    fn test_static_mismatch() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("StBase").method(FuncDecl::new("make").attrs(Attr::STATIC)))
            .unwrap();
        let err = r
            .link(ClassDecl::class("StChild").extends("StBase").method(FuncDecl::new("make")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot change static method StBase::make() to non-static in StChild"
        );
    }

    #[test]
    fn test_abstract_redeclaration() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("AbBase").method(FuncDecl::new("go"))).unwrap();
        let err = r
            .link(
                ClassDecl::class("AbChild")
                    .extends("AbBase")
                    .with_attrs(Attr::ABSTRACT)
                    .method(FuncDecl::new("go").attrs(Attr::ABSTRACT)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "OverrideViolation");
    }

    #[test]
    fn test_concrete_class_with_abstract_method() {
        let mut r = MapResolver::default();
        r.link(
            ClassDecl::class("Shape")
                .with_attrs(Attr::ABSTRACT)
                .method(FuncDecl::new("area").attrs(Attr::ABSTRACT)),
        )
        .unwrap();
        let err = r.link(ClassDecl::class("Blob").extends("Shape")).unwrap_err();
        assert_eq!(err.kind(), "AbstractMethodUnimplemented");

        let square = r
            .link(ClassDecl::class("Square").extends("Shape").method(FuncDecl::new("area")))
            .unwrap();
        assert!(!square.resolve_method(intern("area")).unwrap().is_abstract());
    }

    #[test]
    fn test_private_parent_starts_new_chain() {
        let mut r = MapResolver::default();
        r.link(
            ClassDecl::class("PrivBase")
                .method(FuncDecl::new("helper").visibility(Visibility::Private).param(ParamDecl::new("x"))),
        )
        .unwrap();
        let child = r
            .link(ClassDecl::class("PrivChild").extends("PrivBase").method(FuncDecl::new("helper")))
            .unwrap();
        let f = child.resolve_method(intern("helper")).unwrap();
        assert_eq!(f.base_cls.name, intern("PrivChild"));
        assert!(f.has_private_ancestor);
    }

    #[test]
    fn test_incompatible_signature() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("SigBase").method(FuncDecl::new("run").param(ParamDecl::new("a"))))
            .unwrap();
        let err = r
            .link(
                ClassDecl::class("SigChild").extends("SigBase").method(
                    FuncDecl::new("run")
                        .param(ParamDecl::new("a"))
                        .param(ParamDecl::new("b")),
                ),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Declaration of SigChild::run() must be compatible with that of SigBase::run()"
        );

        // Constructors may change arity freely.
        r.link(ClassDecl::class("CtorSigBase").method(FuncDecl::new("__construct")))
            .unwrap();
        assert!(
            r.link(
                ClassDecl::class("CtorSigChild")
                    .extends("CtorSigBase")
                    .method(FuncDecl::new("__construct").param(ParamDecl::new("x")))
            )
            .is_ok()
        );
    }

    #[test]
    fn test_static_locals_are_cloned() {
        let mut r = MapResolver::default();
        let base = r
            .link(ClassDecl::class("CounterBase").method(FuncDecl::new("tick").with_static_locals()))
            .unwrap();
        let child = r.link(ClassDecl::class("CounterChild").extends("CounterBase")).unwrap();
        let parent_tick = base.resolve_method(intern("tick")).unwrap();
        let child_tick = child.resolve_method(intern("tick")).unwrap();
        assert_ne!(parent_tick.id, child_tick.id);
        assert_eq!(child_tick.cls, parent_tick.cls);
    }
}
