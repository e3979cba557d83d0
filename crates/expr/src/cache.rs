use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::{Lazy, OnceCell};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{compile, Dialect, ExprError, Program};

type Slot = Arc<OnceCell<Arc<dyn Program>>>;

/// Compile-once cache keyed by `(dialect, source)`.
///
/// The map lock is held only to find or insert a slot; compilation runs
/// against the slot, so concurrent callers with the same source wait for one
/// compile while unrelated sources proceed. Failed compiles leave the slot
/// empty and are retried by the next caller.
#[derive(Default)]
pub struct ProgramCache {
    slots: Mutex<FxHashMap<(Dialect, String), Slot>>,
}

static GLOBAL: Lazy<ProgramCache> = Lazy::new(ProgramCache::default);

impl ProgramCache {
    pub fn new() -> Self { Self::default() }

    /// Process-wide cache.
    pub fn global() -> &'static ProgramCache { &GLOBAL }

    pub fn get_or_compile(&self, dialect: Dialect, source: &str) -> Result<Arc<dyn Program>, ExprError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry((dialect, source.to_string())).or_default().clone()
        };
        let program = slot.get_or_try_init(|| {
            trace!(%dialect, source, "compiling expression");
            compile(dialect, source)
        })?;
        Ok(program.clone())
    }

    /// Number of successfully compiled programs.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|s| s.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramCache").field("programs", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_source_compiles_once() {
        let cache = ProgramCache::new();
        let a = cache.get_or_compile(Dialect::Jq, ".a").unwrap();
        let b = cache.get_or_compile(Dialect::Jq, ".a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_or_compile(Dialect::Cel, "1 + 1").unwrap();
        assert_eq!(c.dialect(), Dialect::Cel);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = ProgramCache::new();
        assert!(cache.get_or_compile(Dialect::Jq, ".a |").is_err());
        assert!(cache.get_or_compile(Dialect::Jq, ".a |").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_callers_share_one_program() {
        let cache = Arc::new(ProgramCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get_or_compile(Dialect::Cel, "self.a > 1").unwrap())
            })
            .collect();
        let programs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(programs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
