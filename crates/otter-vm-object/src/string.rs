//! Interned JavaScript strings
//!
//! Property names are always internalized so that name comparison in the
//! inline caches is a pointer comparison.

use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

/// Global string intern table
static STRING_TABLE: LazyLock<DashMap<Arc<str>, Arc<JsString>>> = LazyLock::new(DashMap::new);

/// An interned JavaScript string
pub struct JsString {
    data: Arc<str>,
    hash: u64,
    utf16_len: usize,
}

impl JsString {
    /// Intern a string, returning the canonical instance
    pub fn intern(s: &str) -> Arc<Self> {
        if let Some(existing) = STRING_TABLE.get(s) {
            return existing.clone();
        }
        let data: Arc<str> = Arc::from(s);
        STRING_TABLE
            .entry(data.clone())
            .or_insert_with(|| {
                Arc::new(JsString {
                    hash: Self::compute_hash(s),
                    utf16_len: s.encode_utf16().count(),
                    data,
                })
            })
            .clone()
    }

    /// Get the string content
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Length in UTF-16 code units (the JS `length`)
    pub fn len(&self) -> usize {
        self.utf16_len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.utf16_len == 0
    }

    /// Precomputed hash
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// The one-code-unit string at `index`, as `str[index]` would produce it
    pub fn char_at(&self, index: usize) -> Option<Arc<JsString>> {
        let unit = self.data.encode_utf16().nth(index)?;
        Some(Self::intern(&String::from_utf16_lossy(&[unit])))
    }

    /// Parse as a canonical array index (`"0"`, `"17"`, never `"017"`)
    pub fn as_array_index(&self) -> Option<u32> {
        let s = self.as_str();
        if s.is_empty() || s.len() > 10 {
            return None;
        }
        if s.len() > 1 && s.starts_with('0') {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u64 = s.parse().ok()?;
        // 2^32 - 1 is the maximum array length, not a valid index.
        if value < u32::MAX as u64 {
            Some(value as u32)
        } else {
            None
        }
    }

    fn compute_hash(s: &str) -> u64 {
        let mut hasher = FxHasher::default();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Debug for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for JsString {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || (self.hash == other.hash && self.data == other.data)
    }
}

impl Eq for JsString {}

impl Hash for JsString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning() {
        let a = JsString::intern("hello");
        let b = JsString::intern("hello");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn test_array_index() {
        assert_eq!(JsString::intern("0").as_array_index(), Some(0));
        assert_eq!(JsString::intern("42").as_array_index(), Some(42));
        assert_eq!(JsString::intern("042").as_array_index(), None);
        assert_eq!(JsString::intern("4294967295").as_array_index(), None);
        assert_eq!(JsString::intern("x1").as_array_index(), None);
    }

    #[test]
    fn test_char_at() {
        let s = JsString::intern("abc");
        assert_eq!(s.char_at(1).unwrap().as_str(), "b");
        assert!(s.char_at(3).is_none());
    }
}
