//! Attribute bits shared by classes, methods and properties.

use crate::core::value::Visibility;
use bitflags::bitflags;

bitflags! {
    /// Declared modifiers. The three visibility bits are ordered so that a
    /// numerically larger visibility is a narrower one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Attr: u32 {
        const PUBLIC     = 1 << 0;
        const PROTECTED  = 1 << 1;
        const PRIVATE    = 1 << 2;
        const STATIC     = 1 << 3;
        const ABSTRACT   = 1 << 4;
        const FINAL      = 1 << 5;
        const INTERFACE  = 1 << 6;
        const TRAIT      = 1 << 7;
        /// Class may be published to every request once defined.
        const PERSISTENT = 1 << 8;
        /// Property initial value must be deep-copied per instance.
        const DEEP_INIT  = 1 << 9;
        /// Compiler-generated method, exempt from override checks.
        const GENERATED  = 1 << 10;

        const VISIBILITY = Self::PUBLIC.bits() | Self::PROTECTED.bits() | Self::PRIVATE.bits();
        /// Bits a trait alias rule may change on an imported method.
        const ALIAS_MASK = Self::VISIBILITY.bits() | Self::ABSTRACT.bits() | Self::FINAL.bits();
    }
}

impl Default for Attr {
    fn default() -> Self {
        Attr::empty()
    }
}

impl Attr {
    /// Visibility encoded in these bits; members without an explicit
    /// visibility bit are public.
    pub fn visibility(self) -> Visibility {
        if self.contains(Attr::PRIVATE) {
            Visibility::Private
        } else if self.contains(Attr::PROTECTED) {
            Visibility::Protected
        } else {
            Visibility::Public
        }
    }

    pub fn from_visibility(vis: Visibility) -> Attr {
        match vis {
            Visibility::Public => Attr::PUBLIC,
            Visibility::Protected => Attr::PROTECTED,
            Visibility::Private => Attr::PRIVATE,
        }
    }

    pub fn with_visibility(self, vis: Visibility) -> Attr {
        (self - Attr::VISIBILITY) | Attr::from_visibility(vis)
    }

    pub fn is_static(self) -> bool {
        self.contains(Attr::STATIC)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Attr::ABSTRACT)
    }

    pub fn is_final(self) -> bool {
        self.contains(Attr::FINAL)
    }

    pub fn is_private(self) -> bool {
        self.contains(Attr::PRIVATE)
    }

    /// Interface, trait or abstract: may legally keep abstract methods.
    pub fn allows_abstract_methods(self) -> bool {
        self.intersects(Attr::INTERFACE | Attr::TRAIT | Attr::ABSTRACT)
    }

    /// Keywords for diagnostics and reflection, in declaration order.
    pub fn keywords(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.is_abstract() {
            out.push("abstract");
        }
        if self.is_final() {
            out.push("final");
        }
        if self.contains(Attr::INTERFACE) {
            out.push("interface");
        }
        if self.contains(Attr::TRAIT) {
            out.push("trait");
        }
        if self.is_static() {
            out.push("static");
        }
        out
    }
}
