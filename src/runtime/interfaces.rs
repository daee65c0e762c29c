//! Interface collection and interface-method conformance.

use crate::core::{Symbol, Visibility};
use crate::runtime::class::LinkedClass;
use crate::runtime::error::LinkError;
use crate::runtime::linker::{ClassBuilder, ClassResolver};
use crate::runtime::methods::params_compatible;
use std::sync::Arc;

impl ClassBuilder<'_> {
    /// Collect the full interface set: the parent's, each declared interface
    /// together with the interfaces it extends, then those of used traits.
    pub(crate) fn set_interfaces(&mut self, resolver: &mut dyn ClassResolver) -> Result<(), LinkError> {
        if let Some(parent) = self.parent.clone() {
            for iface in parent.interfaces() {
                self.add_interface(iface);
            }
        }

        let decl = self.decl;
        for &name in &decl.interfaces {
            let Some(iface) = resolver.resolve_class(name)? else {
                return Err(LinkError::unresolved(self.name(), name, "Interface"));
            };
            if !iface.is_interface() {
                return Err(LinkError::IllegalInheritance {
                    class: self.name(),
                    message: format!(
                        "{} cannot implement {} - it is not an interface",
                        self.name(),
                        iface.name()
                    ),
                });
            }
            for inherited in iface.interfaces() {
                self.add_interface(inherited);
            }
            self.decl_interfaces.push(Arc::clone(&iface));
            self.add_interface(iface);
        }

        for trait_cls in self.used_traits.clone() {
            for iface in trait_cls.interfaces() {
                self.add_interface(iface);
            }
        }

        self.check_interface_methods()
    }

    fn add_interface(&mut self, iface: Arc<LinkedClass>) {
        self.interfaces.entry(iface.name().lower()).or_insert(iface);
    }

    fn check_interface_methods(&self) -> Result<(), LinkError> {
        for iface in self.interfaces.values() {
            for imeth in iface.methods() {
                let Some(meth) = self.lookup_method(imeth.name) else {
                    if self.attrs.allows_abstract_methods() {
                        continue;
                    }
                    return Err(self.unimplemented(iface, imeth.name));
                };
                if meth.is_abstract() && !self.attrs.allows_abstract_methods() {
                    return Err(self.unimplemented(iface, imeth.name));
                }

                let violation = |message: String| LinkError::OverrideViolation {
                    class: self.name(),
                    method: meth.name,
                    message,
                };
                if meth.is_static() != imeth.is_static() {
                    return Err(violation(format!(
                        "Cannot make {}static method {}::{}() {}static in class {}",
                        if imeth.is_static() { "" } else { "non-" },
                        iface.name(),
                        imeth.name,
                        if meth.is_static() { "" } else { "non-" },
                        self.name()
                    )));
                }
                if imeth.visibility() == Visibility::Public && meth.visibility() != Visibility::Public {
                    return Err(violation(format!(
                        "Access level to {}::{}() must be public (as in interface {})",
                        self.name(),
                        meth.name,
                        iface.name()
                    )));
                }
                if !params_compatible(&meth.decl, &imeth.decl) {
                    return Err(violation(format!(
                        "Declaration of {}::{}() must be compatible with that of {}::{}()",
                        self.name(),
                        meth.name,
                        iface.name(),
                        imeth.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn unimplemented(&self, iface: &LinkedClass, method: Symbol) -> LinkError {
        LinkError::AbstractMethodUnimplemented {
            class: self.name(),
            method,
            message: format!(
                "Class {} contains abstract method ({}::{}) and must therefore be declared abstract or implement the remaining methods",
                self.name(),
                iface.name(),
                method
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::decl::{ClassDecl, FuncDecl, ParamDecl};
    use crate::core::{Attr, Visibility, intern};
    use crate::runtime::linker::tests::MapResolver;

    fn countable() -> ClassDecl {
        ClassDecl::interface("Countable").method(FuncDecl::new("count").attrs(Attr::ABSTRACT))
    }

    #[test]
    fn test_interface_set_is_transitive() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::interface("Traversable")).unwrap();
        r.link(ClassDecl::interface("IteratorLike").implements("Traversable"))
            .unwrap();
        r.link(ClassDecl::interface("Stringable")).unwrap();
        r.link(ClassDecl::new_trait("PrintsSelf").implements("Stringable"))
            .unwrap();
        r.link(ClassDecl::class("Coll").implements("IteratorLike")).unwrap();
        let cls = r
            .link(ClassDecl::class("SubColl").extends("Coll").uses("PrintsSelf"))
            .unwrap();
        let names: Vec<_> = cls.interfaces().iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, ["Traversable", "IteratorLike", "Stringable"]);
        assert!(cls.implements(intern("traversable")));
        assert!(cls.declared_interfaces().is_empty());
    }

    #[test]
    fn test_missing_interface_method() {
        let mut r = MapResolver::default();
        r.link(countable()).unwrap();
        let err = r.link(ClassDecl::class("Bag").implements("Countable")).unwrap_err();
        assert_eq!(err.kind(), "AbstractMethodUnimplemented");

        // Abstract classes may defer the implementation to subclasses.
        r.link(
            ClassDecl::class("AbstractBag")
                .with_attrs(Attr::ABSTRACT)
                .implements("Countable"),
        )
        .unwrap();
        let err = r.link(ClassDecl::class("LazyBag").extends("AbstractBag")).unwrap_err();
        assert_eq!(err.kind(), "AbstractMethodUnimplemented");
        assert!(
            r.link(
                ClassDecl::class("RealBag")
                    .extends("AbstractBag")
                    .method(FuncDecl::new("count"))
            )
            .is_ok()
        );
    }

    #[test]
    fn test_interface_method_must_stay_public() {
        let mut r = MapResolver::default();
        r.link(countable()).unwrap();
        let err = r
            .link(
                ClassDecl::class("Hidden")
                    .implements("Countable")
                    .method(FuncDecl::new("count").visibility(Visibility::Protected)),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Access level to Hidden::count() must be public (as in interface Countable)"
        );
    }

    #[test]
    fn test_interface_static_mismatch_and_signature() {
        let mut r = MapResolver::default();
        r.link(countable()).unwrap();
        let err = r
            .link(
                ClassDecl::class("StaticCount")
                    .implements("Countable")
                    .method(FuncDecl::new("count").attrs(Attr::STATIC)),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot make non-static method Countable::count() static in class StaticCount"
        );

        let err = r
            .link(
                ClassDecl::class("NeedsArg")
                    .implements("Countable")
                    .method(FuncDecl::new("count").param(ParamDecl::new("mode"))),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "OverrideViolation");
    }

    #[test]
    fn test_implementing_a_class_fails() {
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("NotAnInterface")).unwrap();
        let err = r
            .link(ClassDecl::class("Confused").implements("NotAnInterface"))
            .unwrap_err();
        assert_eq!(err.kind(), "IllegalInheritance");
        assert_eq!(
            err.to_string(),
            "Confused cannot implement NotAnInterface - it is not an interface"
        );

        let err = r.link(ClassDecl::class("Lost").implements("Nowhere")).unwrap_err();
        assert_eq!(err.kind(), "UnresolvedDependency");
    }
}
