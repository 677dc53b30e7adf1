//! Thread-local compiled-regex cache.
//!
//! Search and substitution compile their patterns through this cache to
//! avoid recompiling the same expression for every file in a bulk run.
//! The cache is capped at 256 entries; when full it is cleared and
//! rebuilt on demand.

use std::cell::RefCell;
use std::collections::HashMap;

use regex::bytes::{Regex, RegexBuilder};

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    static PATTERN_CACHE: RefCell<HashMap<(String, bool), Regex>> =
        RefCell::new(HashMap::with_capacity(64));
}

/// Get a compiled pattern from the cache, or compile and cache it.
///
/// The case-insensitive flag is part of the key: the same pattern text
/// compiled with and without it are distinct entries. Compilation
/// failures are not cached.
pub fn get_or_compile(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    PATTERN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();

        if let Some(re) = cache.get(&(pattern.to_string(), case_insensitive)) {
            return Ok(re.clone());
        }

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        cache.insert((pattern.to_string(), case_insensitive), compiled.clone());
        Ok(compiled)
    })
}

/// Clear the pattern cache (mainly for testing).
pub fn clear() {
    PATTERN_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Number of live cache entries on this thread.
pub fn size() -> usize {
    PATTERN_CACHE.with(|cache| cache.borrow().len())
}
