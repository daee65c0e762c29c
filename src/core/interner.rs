//! Process-wide symbol interner
//!
//! Linked classes are shared by every request context, so the names they carry
//! must resolve identically on every thread. Symbols are handed out by one
//! global table guarded by a reader-writer lock; lookups after the first
//! intern of a name only take the read side.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Interned string. Equality is byte equality of the original spelling.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Symbol(pub u32);

#[derive(Debug, Default)]
pub struct Interner {
    map: HashMap<Arc<str>, Symbol>,
    vec: Vec<Arc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Symbol(self.vec.len() as u32);
        let owned: Arc<str> = Arc::from(s);
        self.vec.push(Arc::clone(&owned));
        self.map.insert(owned, sym);
        sym
    }

    pub fn find(&self, s: &str) -> Option<Symbol> {
        self.map.get(s).copied()
    }

    pub fn lookup(&self, sym: Symbol) -> Option<Arc<str>> {
        self.vec.get(sym.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }
}

lazy_static! {
    static ref GLOBAL: RwLock<Interner> = {
        let mut interner = Interner::new();
        // Symbol(0) is the empty string so `Symbol::default()` is meaningful.
        interner.intern("");
        RwLock::new(interner)
    };
}

/// Intern `s` in the process-wide table.
pub fn intern(s: &str) -> Symbol {
    if let Some(sym) = GLOBAL.read().find(s) {
        return sym;
    }
    GLOBAL.write().intern(s)
}

impl Symbol {
    pub fn new(s: &str) -> Self {
        intern(s)
    }

    /// Original spelling of the symbol.
    pub fn as_str(self) -> Arc<str> {
        GLOBAL.read().lookup(self).unwrap_or_else(|| Arc::from(""))
    }

    /// Lower-cased twin, used as the key for case-insensitive tables
    /// (class names and method names).
    pub fn lower(self) -> Symbol {
        let s = self.as_str();
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            intern(&s.to_ascii_lowercase())
        } else {
            self
        }
    }

    /// Case-insensitive comparison.
    pub fn eq_ignore_case(self, other: Symbol) -> bool {
        self == other || self.lower() == other.lower()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", &*self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        intern(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = intern("Foo");
        let b = intern("Foo");
        assert_eq!(a, b);
        assert_eq!(&*a.as_str(), "Foo");
    }

    #[test]
    fn test_lower_is_case_insensitive_key() {
        let a = intern("GetValue");
        let b = intern("getvalue");
        assert_ne!(a, b);
        assert_eq!(a.lower(), b);
        assert!(a.eq_ignore_case(b));
    }

    #[test]
    fn test_default_symbol_is_empty_string() {
        assert!(Symbol::default().is_empty());
        assert_eq!(&*Symbol::default().as_str(), "");
    }

    #[test]
    fn test_local_interner() {
        let mut interner = Interner::new();
        let sym = interner.intern("x");
        assert_eq!(interner.find("x"), Some(sym));
        assert_eq!(interner.lookup(sym).as_deref(), Some("x"));
        assert_eq!(interner.len(), 1);
    }
}
