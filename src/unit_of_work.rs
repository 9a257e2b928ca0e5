use serde::{Deserialize, Serialize};

use crate::handle::{CacheMode, FlushMode, SessionOptions};

/// Name a unit of work targets when none is declared.
///
/// Resolves to the sole registered factory when exactly one exists.
pub const DEFAULT_UNIT_NAME: &str = "default";

/// Declares that an operation needs a unit of work.
///
/// A declaration is attached once, at startup, to a pipeline method or a
/// proxied method. It never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitOfWorkSpec {
    /// Name of the persistence unit against which the handle is opened.
    pub unit: String,

    /// If `true`, the handle defaults to loading read-only data.
    pub read_only: bool,

    /// If `true`, a transaction is started before the operation, committed
    /// when it returns and rolled back when it fails.
    pub transactional: bool,

    pub cache_mode: CacheMode,

    pub flush_mode: FlushMode,
}

impl Default for UnitOfWorkSpec {
    fn default() -> Self {
        Self {
            unit: DEFAULT_UNIT_NAME.to_string(),
            read_only: false,
            transactional: true,
            cache_mode: CacheMode::default(),
            flush_mode: FlushMode::default(),
        }
    }
}

impl UnitOfWorkSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a named persistence unit.
    pub fn for_unit(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            read_only: self.read_only,
            cache_mode: self.cache_mode,
            flush_mode: self.flush_mode,
        }
    }
}
