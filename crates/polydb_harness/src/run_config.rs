//! Which backends a run covers, in order, and their init scripts.

use crate::backend::BackendKind;

/// Ordered backend set with an optional init script per backend.
///
/// Each backend appears at most once; re-adding one replaces its script but
/// keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendRunConfig {
    entries: Vec<(BackendKind, Option<String>)>,
}

impl BackendRunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The common two-engine setup.
    pub fn mysql_and_oceanbase(mysql_script: &str, oceanbase_script: &str) -> Self {
        Self::new()
            .with_init_script(BackendKind::MySql, mysql_script)
            .with_init_script(BackendKind::OceanBase, oceanbase_script)
    }

    pub fn with_init_script(self, kind: BackendKind, script: impl Into<String>) -> Self {
        self.upsert(kind, Some(script.into()))
    }

    /// Add `kind` without an init script.
    pub fn with_backend(self, kind: BackendKind) -> Self {
        self.upsert(kind, None)
    }

    fn upsert(mut self, kind: BackendKind, script: Option<String>) -> Self {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = script,
            None => self.entries.push((kind, script)),
        }
        self
    }

    /// Backends and scripts in execution order.
    pub fn entries(&self) -> impl Iterator<Item = (BackendKind, Option<&str>)> + '_ {
        self.entries
            .iter()
            .map(|(kind, script)| (*kind, script.as_deref()))
    }

    pub fn init_script(&self, kind: BackendKind) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, script)| script.as_deref())
    }

    /// Whether `kind` has a non-blank init script.
    pub fn has_init_script(&self, kind: BackendKind) -> bool {
        self.init_script(kind)
            .is_some_and(|script| !script.trim().is_empty())
    }

    pub fn configured_backends(&self) -> Vec<BackendKind> {
        self.entries.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
