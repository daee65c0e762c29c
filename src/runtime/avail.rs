//! Reuse of classes linked by other execution contexts
//!
//! A linked class is keyed by its declaration and the exact identities of
//! its parent, declared interfaces and used traits. Another context defining
//! the same declaration may reuse it only when every one of those names
//! resolves, in that context, to the very same linked class.

use crate::core::Symbol;
use crate::runtime::class::LinkedClass;
use crate::runtime::error::LinkError;
use crate::runtime::linker::ClassResolver;
use crate::runtime::registry::ClassRegistry;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Every dependency resolves to the identity the class was linked
    /// against.
    Available,
    /// Some dependency resolves to a different class; link afresh.
    Recoverable,
    /// A dependency cannot be resolved at all.
    Fatal { missing: Symbol },
}

enum DepCheck {
    Same,
    Different,
    Missing(Symbol),
}

fn check_dep(
    cls: &Arc<LinkedClass>,
    dep: &Arc<LinkedClass>,
    resolver: &mut dyn ClassResolver,
    registry: &ClassRegistry,
) -> Result<DepCheck, LinkError> {
    let Some(current) = resolver.resolve_class(dep.name())? else {
        return Ok(DepCheck::Missing(dep.name()));
    };
    if Arc::ptr_eq(&current, dep) {
        return Ok(DepCheck::Same);
    }
    if dep.is_zombie() {
        // Nobody can reach the stale dependency through the registry any
        // more; a class linked against it is dead weight.
        debug!(class = %cls.name(), stale = %dep.name(), "dependency is a zombie");
        registry.destroy_class(cls);
    }
    Ok(DepCheck::Different)
}

/// Check parent, then declared interfaces, then used traits, stopping at
/// the first dependency that is missing or changed.
pub fn avail(
    cls: &Arc<LinkedClass>,
    resolver: &mut dyn ClassResolver,
    registry: &ClassRegistry,
) -> Result<Availability, LinkError> {
    let deps = cls
        .parent()
        .into_iter()
        .chain(cls.declared_interfaces())
        .chain(cls.used_traits());

    for dep in deps {
        match check_dep(cls, &dep, resolver, registry)? {
            DepCheck::Same => {}
            DepCheck::Different => return Ok(Availability::Recoverable),
            DepCheck::Missing(missing) => return Ok(Availability::Fatal { missing }),
        }
    }
    Ok(Availability::Available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::decl::ClassDecl;
    use crate::core::intern;
    use crate::runtime::class::ClassState;
    use crate::runtime::linker::tests::MapResolver;

    #[test]
    fn test_available_when_identities_match() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        r.link(ClassDecl::interface("Shown")).unwrap();
        r.link(ClassDecl::class("Base")).unwrap();
        let cls = r
            .link(ClassDecl::class("Leaf").extends("Base").implements("Shown"))
            .unwrap();
        assert_eq!(avail(&cls, &mut r, &registry).unwrap(), Availability::Available);
    }

    #[test]
    fn test_missing_dependency_is_fatal() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("Gone")).unwrap();
        let cls = r.link(ClassDecl::class("Left").extends("Gone")).unwrap();
        r.classes.remove(&intern("gone"));
        assert_eq!(
            avail(&cls, &mut r, &registry).unwrap(),
            Availability::Fatal {
                missing: intern("Gone")
            }
        );
    }

    #[test]
    fn test_changed_parent_is_recoverable() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        let old_base = r.link(ClassDecl::class("Moving")).unwrap();
        let cls = r.link(ClassDecl::class("Follower").extends("Moving")).unwrap();
        r.link(ClassDecl::class("Moving")).unwrap();
        assert_eq!(avail(&cls, &mut r, &registry).unwrap(), Availability::Recoverable);
        assert_eq!(cls.state(), ClassState::Active);

        // A zombie dependency takes the dependent class down with it.
        registry.destroy_class(&old_base);
        assert_eq!(avail(&cls, &mut r, &registry).unwrap(), Availability::Recoverable);
        assert!(cls.is_zombie());
    }

    #[test]
    fn test_parent_checked_before_interfaces() {
        let registry = ClassRegistry::new();
        let mut r = MapResolver::default();
        r.link(ClassDecl::class("P1")).unwrap();
        r.link(ClassDecl::interface("I1")).unwrap();
        let cls = r.link(ClassDecl::class("C1").extends("P1").implements("I1")).unwrap();
        r.link(ClassDecl::class("P1")).unwrap();
        r.classes.remove(&intern("i1"));
        assert_eq!(avail(&cls, &mut r, &registry).unwrap(), Availability::Recoverable);
    }
}
