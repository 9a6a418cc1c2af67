//! String interning.
//!
//! Every string the compiler or VM ever produces — identifiers, string
//! literals, field and method names — passes through a single [`Interner`]
//! so that two strings with equal characters are always the same
//! reference. That lets the VM compare strings for equality with a
//! pointer comparison instead of a character scan.

use std::rc::Rc;

use crate::table::Table;
use crate::value::LoxStr;

/// FNV-1a, 32-bit, matching the hash baked into every interned string.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Canonicalizes strings: `intern(s) == intern(s)` by reference for any
/// two character-equal inputs.
///
/// Backed by the same open-addressed [`Table`] used for globals and
/// instance fields, specialized so its key and value are the same
/// `Rc<LoxStr>` — the table's `find_string` fast path compares hash and
/// characters directly, without first materializing a key to look up.
pub struct Interner {
    strings: Table<Rc<LoxStr>>,
}

impl Interner {
    pub fn new() -> Self {
        Interner {
            strings: Table::new(),
        }
    }

    /// Intern `chars`, returning the canonical `Rc<LoxStr>` for it.
    ///
    /// Idempotent: interning the characters of an already-interned string
    /// returns the same reference.
    pub fn intern(&mut self, chars: &str) -> Rc<LoxStr> {
        let hash = fnv1a(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return existing;
        }
        let interned = Rc::new(LoxStr::new(chars.to_string(), hash));
        self.strings.insert(interned.clone(), interned.clone());
        interned
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent_and_pointer_equal() {
        let mut pool = Interner::new();
        let a = pool.intern("hello");
        let b = pool.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_contents_intern_distinctly() {
        let mut pool = Interner::new();
        let a = pool.intern("hello");
        let b = pool.intern("world");
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn hash_matches_fnv1a_reference() {
        // "" hashes to the FNV-1a offset basis.
        assert_eq!(fnv1a(b""), 2166136261);
    }
}
