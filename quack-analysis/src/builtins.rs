use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::ast::{NodeId, NodeKind};
use crate::program::Program;
use crate::types::Type;

/// Source of the builtin classes every module can see.
pub trait BuiltinsProvider {
    fn builtin_class(&self, name: &str) -> Option<NodeId>;

    /// Root node of the builtins module.
    fn builtins_root(&self) -> Option<NodeId>;

    /// Changes whenever the builtins source is reloaded.
    fn modification_count(&self) -> u64;
}

impl BuiltinsProvider for Program {
    fn builtin_class(&self, name: &str) -> Option<NodeId> {
        let root = self.builtins_root()?;
        self.scope_body(root).iter().copied().find(|statement| {
            matches!(self.kind(*statement), Some(NodeKind::Class(class)) if class.name == name)
        })
    }

    fn builtins_root(&self) -> Option<NodeId> {
        let module = self.builtins_module()?;
        self.module(module).map(|info| info.root)
    }

    fn modification_count(&self) -> u64 {
        self.builtins_revision()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    revision: u64,
    classes: HashMap<String, Option<Type>>,
}

/// Builtin class name to class-definition type, shared between contexts.
///
/// Entries are dropped as soon as the provider reports a different
/// modification count than the one they were computed under.
#[derive(Debug, Default)]
pub struct BuiltinTypeCache {
    state: Mutex<CacheState>,
}

impl BuiltinTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_type(&self, provider: &dyn BuiltinsProvider, name: &str) -> Option<Type> {
        let revision = provider.modification_count();
        let mut state = self.lock();
        if state.revision != revision {
            debug!(
                old = state.revision,
                new = revision,
                dropped = state.classes.len(),
                "builtins changed, clearing builtin type cache"
            );
            state.classes.clear();
            state.revision = revision;
        }

        if let Some(cached) = state.classes.get(name) {
            trace!(name, "builtin type cache hit");
            return cached.clone();
        }

        let ty = provider.builtin_class(name).map(Type::definition);
        state.classes.insert(name.to_string(), ty.clone());
        ty
    }

    pub fn len(&self) -> usize {
        self.lock().classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // the state is a plain map, still consistent after a panic elsewhere
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
