use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::{NodeId, NodeKind};
use crate::builtins::BuiltinTypeCache;
use crate::config::{AnalysisMode, AnalyzerConfig, LanguageConfig};
use crate::flow;
use crate::program::Program;
use crate::providers::{ParameterUsageProvider, TypeProvider};
use crate::resolve::{chase_reference, Candidate, ResolveResult};
use crate::scope::{self, Declaration, ScopeIndex, SymbolIndex, TreeScopes};
use crate::types::{ClassHierarchy, Type};

/// What the in-progress set and the memo tables are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EvalKey {
    Expression(NodeId),
    Return(NodeId),
    Annotation(NodeId),
    Bases(NodeId),
}

enum Symbols<'p> {
    Tree(TreeScopes),
    Index(&'p ScopeIndex),
}

/// Shared state for one round of type queries over a [`Program`].
///
/// A context memoizes what it computes and guards against re-entrant
/// evaluation of the same node. It is meant for a single thread; build one
/// per worker and share only the [`BuiltinTypeCache`].
pub struct TypeEvalContext<'p> {
    program: &'p Program,
    mode: AnalysisMode,
    symbols: Symbols<'p>,
    providers: Vec<Box<dyn TypeProvider>>,
    builtins: Arc<BuiltinTypeCache>,
    language: LanguageConfig,
    in_progress: RefCell<HashSet<EvalKey>>,
    cache: RefCell<HashMap<EvalKey, Type>>,
    mro_cache: RefCell<HashMap<NodeId, Vec<NodeId>>>,
    guard_trips: Cell<usize>,
    classes: OnceCell<Vec<NodeId>>,
}

/// Marks a key as being evaluated until dropped.
pub(crate) struct InProgress<'a> {
    set: &'a RefCell<HashSet<EvalKey>>,
    key: EvalKey,
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.key);
    }
}

impl<'p> TypeEvalContext<'p> {
    pub fn new(program: &'p Program, mode: AnalysisMode, builtins: Arc<BuiltinTypeCache>) -> Self {
        debug!(?mode, modules = program.modules().len(), "new type evaluation context");
        Self {
            program,
            mode,
            symbols: Symbols::Tree(TreeScopes),
            providers: vec![Box::new(ParameterUsageProvider)],
            builtins,
            language: LanguageConfig::default(),
            in_progress: RefCell::new(HashSet::new()),
            cache: RefCell::new(HashMap::new()),
            mro_cache: RefCell::new(HashMap::new()),
            guard_trips: Cell::new(0),
            classes: OnceCell::new(),
        }
    }

    /// Full analysis: walks function bodies and the tree on demand.
    pub fn code_analysis(program: &'p Program, builtins: Arc<BuiltinTypeCache>) -> Self {
        Self::new(program, AnalysisMode::FullTree, builtins)
    }

    /// Declarations only, answered from a prebuilt index.
    pub fn index_only(
        program: &'p Program,
        index: &'p ScopeIndex,
        builtins: Arc<BuiltinTypeCache>,
    ) -> Self {
        Self::new(program, AnalysisMode::IndexOnly, builtins).with_index(index)
    }

    pub fn from_config(
        program: &'p Program,
        index: Option<&'p ScopeIndex>,
        builtins: Arc<BuiltinTypeCache>,
        config: &AnalyzerConfig,
    ) -> Self {
        let mut context = Self::new(program, config.mode, builtins);
        if let (AnalysisMode::IndexOnly, Some(index)) = (config.mode, index) {
            context = context.with_index(index);
        }
        if !config.providers.parameter_usage {
            context.providers.clear();
        }
        context.with_language(config.language)
    }

    pub fn with_index(mut self, index: &'p ScopeIndex) -> Self {
        self.symbols = Symbols::Index(index);
        self
    }

    pub fn with_language(mut self, language: LanguageConfig) -> Self {
        self.language = language;
        self
    }

    /// Replaces the provider chain; providers are asked in order.
    pub fn with_providers(mut self, providers: Vec<Box<dyn TypeProvider>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn language(&self) -> LanguageConfig {
        self.language
    }

    pub(crate) fn full_tree(&self) -> bool {
        self.mode == AnalysisMode::FullTree
    }

    pub(crate) fn providers(&self) -> &[Box<dyn TypeProvider>] {
        &self.providers
    }

    pub(crate) fn symbols(&self) -> &dyn SymbolIndex {
        match &self.symbols {
            Symbols::Tree(tree) => tree,
            Symbols::Index(index) => *index,
        }
    }

    /// Type of any expression; `Unknown` when nothing better can be said.
    pub fn type_of(&self, expr: NodeId) -> Type {
        self.guarded(EvalKey::Expression(expr), || {
            for provider in &self.providers {
                if let Some(ty) = provider.expression_type(expr, self) {
                    trace!(provider = provider.name(), node = expr.0, "provider supplied type");
                    return ty;
                }
            }
            self.evaluate(expr)
        })
    }

    /// Memoized, re-entrancy safe computation of `key`.
    ///
    /// A re-entrant request yields `Unknown`. Results computed while any
    /// such guard tripped are not memoized, since they saw a partial view.
    pub(crate) fn guarded(&self, key: EvalKey, compute: impl FnOnce() -> Type) -> Type {
        if let Some(cached) = self.cache.borrow().get(&key) {
            trace!(?key, "type cache hit");
            return cached.clone();
        }

        let Some(_guard) = self.enter(key) else {
            trace!(?key, "recursion guard tripped");
            self.guard_trips.set(self.guard_trips.get() + 1);
            return Type::Unknown;
        };

        let trips = self.guard_trips.get();
        let ty = compute();
        if self.guard_trips.get() == trips {
            self.cache.borrow_mut().insert(key, ty.clone());
        }
        ty
    }

    pub(crate) fn enter(&self, key: EvalKey) -> Option<InProgress<'_>> {
        if !self.in_progress.borrow_mut().insert(key) {
            return None;
        }
        Some(InProgress {
            set: &self.in_progress,
            key,
        })
    }

    pub(crate) fn is_in_progress(&self, key: EvalKey) -> bool {
        self.in_progress.borrow().contains(&key)
    }

    /// Class-definition type of a builtin class.
    pub fn builtin_class(&self, name: &str) -> Option<NodeId> {
        match self.builtins.class_type(self.program, name)? {
            Type::Class { class, .. } => Some(class),
            _ => None,
        }
    }

    pub fn builtin_instance(&self, name: &str) -> Type {
        self.builtin_class(name)
            .map(Type::instance)
            .unwrap_or(Type::Unknown)
    }

    pub(crate) fn builtin_collection(&self, name: &str, elements: Vec<Type>) -> Type {
        match self.builtin_class(name) {
            Some(class) => Type::Collection { class, elements },
            None => Type::Unknown,
        }
    }

    /// Declarations visible for the name `name` at `at`, in source order.
    pub fn lookup_name(&self, at: NodeId, name: &str) -> Vec<Declaration> {
        scope::lookup(self.program, self.symbols(), at, name)
    }

    /// Declarations of `name` that can be bound when `reference` runs, in
    /// source order.
    ///
    /// A read in a function or module body keeps the writes that reach it. A
    /// function reading a module name keeps what the module binds last. Falls
    /// back to every declaration when the flow gives nothing.
    pub(crate) fn visible_declarations(&self, reference: NodeId, name: &str) -> Vec<Declaration> {
        let declarations = self.lookup_name(reference, name);
        if !self.full_tree() || declarations.is_empty() {
            return declarations;
        }
        let program = self.program;
        let Some(scope) = program.scope_of(reference) else {
            return declarations;
        };
        let declared_in = |scope: NodeId| {
            let local = self.symbols().declarations_in(program, scope, name);
            local == declarations
        };

        let reaching = if declared_in(scope) {
            flow::reaching_definitions(program, scope, reference, name)
        } else if program.function_definition(scope).is_some() {
            program
                .module_of(reference)
                .and_then(|module| program.module(module))
                .map(|info| info.root)
                .filter(|root| declared_in(*root))
                .and_then(|root| flow::final_definitions(program, root, name))
        } else {
            None
        };
        let Some(reaching) = reaching else {
            return declarations;
        };

        let narrowed: Vec<Declaration> = declarations
            .iter()
            .filter(|declaration| reaching.contains(&declaration.node()))
            .cloned()
            .collect();
        if narrowed.is_empty() {
            declarations
        } else {
            narrowed
        }
    }

    /// Candidates for a name or attribute reference, later bindings first.
    pub(crate) fn reference_candidates(&self, reference: NodeId) -> Vec<Candidate> {
        match self.program.kind(reference) {
            Some(NodeKind::Name(name)) => self
                .visible_declarations(reference, name)
                .into_iter()
                .rev()
                .map(Candidate::explicit)
                .collect(),
            Some(NodeKind::Attribute(attribute)) => {
                let object_type = self.type_of(attribute.object);
                match object_type.unwrap_weak() {
                    Type::Unknown | Type::Structural(_) => self
                        .unique_class_member(&attribute.name)
                        .into_iter()
                        .rev()
                        .map(Candidate::implicit)
                        .collect(),
                    known => {
                        let implicit = object_type.is_weak();
                        self.member_declarations(known, &attribute.name)
                            .into_iter()
                            .rev()
                            .map(|declaration| Candidate {
                                declaration,
                                implicit,
                            })
                            .collect()
                    }
                }
            }
            _ => Vec::new(),
        }
    }

    /// Chases a name or attribute reference to its declaration.
    pub fn resolve(&self, reference: NodeId) -> ResolveResult {
        chase_reference(self.program, reference, |seeker| {
            self.reference_candidates(seeker)
        })
    }

    /// Members named `name` on a value of type `ty`, searched through the
    /// class's linearised bases.
    pub fn member_declarations(&self, ty: &Type, name: &str) -> Vec<Declaration> {
        match ty.unwrap_weak() {
            Type::Module(module) => self
                .program
                .module(*module)
                .map(|info| self.symbols().declarations_in(self.program, info.root, name))
                .unwrap_or_default(),
            Type::Class { class, definition } => {
                for candidate in self.mro(*class) {
                    let mut found = self.symbols().declarations_in(self.program, candidate, name);
                    if !definition {
                        found.extend(self.symbols().instance_attributes(
                            self.program,
                            candidate,
                            name,
                        ));
                    }
                    if !found.is_empty() {
                        return found;
                    }
                }
                Vec::new()
            }
            Type::Union(members) => {
                let mut found: Vec<Declaration> = Vec::new();
                for member in members {
                    for declaration in self.member_declarations(member, name) {
                        if !found.contains(&declaration) {
                            found.push(declaration);
                        }
                    }
                }
                found
            }
            other => self
                .class_of(other)
                .map(|class| self.member_declarations(&Type::instance(class), name))
                .unwrap_or_default(),
        }
    }

    /// Declarations of `name` when exactly one class in the program has such a member.
    fn unique_class_member(&self, name: &str) -> Vec<Declaration> {
        let mut owners = self.all_classes().iter().filter_map(|class| {
            let found = self.symbols().declarations_in(self.program, *class, name);
            (!found.is_empty()).then_some(found)
        });
        match (owners.next(), owners.next()) {
            (Some(found), None) => found,
            (Some(_), Some(_)) => {
                debug!(name, "member name is declared by several classes");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn all_classes(&self) -> &[NodeId] {
        self.classes.get_or_init(|| {
            self.program
                .modules()
                .iter()
                .filter(|module| Some(module.id) != self.program.builtins_module())
                .flat_map(|module| self.program.descendants(module.root))
                .filter(|node| matches!(self.program.kind(*node), Some(NodeKind::Class(_))))
                .collect()
        })
    }

    /// Direct base classes, in declaration order.
    pub fn bases(&self, class: NodeId) -> Vec<NodeId> {
        let Some(definition) = self.program.class_definition(class) else {
            return Vec::new();
        };
        let Some(_guard) = self.enter(EvalKey::Bases(class)) else {
            return Vec::new();
        };
        definition
            .bases
            .iter()
            .filter_map(|base| match self.type_of(*base).unwrap_weak() {
                Type::Class {
                    class,
                    definition: true,
                } => Some(*class),
                _ => None,
            })
            .collect()
    }

    /// C3 linearisation of `class`, with `object` last.
    ///
    /// Inconsistent hierarchies and inheritance cycles give just the class
    /// and `object`.
    pub fn mro(&self, class: NodeId) -> Vec<NodeId> {
        if let Some(cached) = self.mro_cache.borrow().get(&class) {
            return cached.clone();
        }
        if self.is_in_progress(EvalKey::Bases(class)) {
            // inheritance cycle
            return vec![class];
        }

        let object = self.builtin_class("object");
        let mut order = self
            .linearize(class, object, &mut Vec::new())
            .unwrap_or_else(|| {
                debug!(class = class.0, "no consistent method resolution order");
                vec![class]
            });
        if let Some(object) = object {
            order.retain(|candidate| *candidate != object);
            order.push(object);
        }

        self.mro_cache.borrow_mut().insert(class, order.clone());
        order
    }

    /// C3 order of `class` and its bases, `object` left out.
    fn linearize(
        &self,
        class: NodeId,
        object: Option<NodeId>,
        visiting: &mut Vec<NodeId>,
    ) -> Option<Vec<NodeId>> {
        if visiting.contains(&class) {
            return None;
        }
        visiting.push(class);
        let bases: Vec<NodeId> = self
            .bases(class)
            .into_iter()
            .filter(|base| Some(*base) != object)
            .collect();
        let mut sequences = Vec::with_capacity(bases.len() + 1);
        for base in &bases {
            match self.linearize(*base, object, visiting) {
                Some(order) => sequences.push(order),
                None => {
                    visiting.pop();
                    return None;
                }
            }
        }
        visiting.pop();
        sequences.push(bases);

        let mut order = vec![class];
        order.extend(c3_merge(sequences)?);
        Some(order)
    }
}

/// Repeatedly takes the first head that appears in no other sequence's tail.
fn c3_merge(mut sequences: Vec<Vec<NodeId>>) -> Option<Vec<NodeId>> {
    let mut merged = Vec::new();
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            return Some(merged);
        }
        let head = sequences
            .iter()
            .filter_map(|sequence| sequence.first().copied())
            .find(|candidate| {
                sequences
                    .iter()
                    .all(|sequence| !sequence.iter().skip(1).any(|node| node == candidate))
            })?;
        merged.push(head);
        for sequence in &mut sequences {
            if sequence.first() == Some(&head) {
                sequence.remove(0);
            }
        }
    }
}

impl ClassHierarchy for TypeEvalContext<'_> {
    fn is_subclass(&self, class: NodeId, base: NodeId) -> bool {
        class == base || self.mro(class).contains(&base)
    }

    fn has_attribute(&self, ty: &Type, name: &str) -> bool {
        match ty.unwrap_weak() {
            Type::Structural(attributes) => attributes.contains(name),
            Type::Unknown => true,
            other => !self.member_declarations(other, name).is_empty(),
        }
    }

    fn class_of(&self, ty: &Type) -> Option<NodeId> {
        match ty.unwrap_weak() {
            Type::Class {
                class,
                definition: false,
            } => Some(*class),
            Type::Class {
                definition: true, ..
            } => self.builtin_class("type"),
            Type::Collection { class, .. } => Some(*class),
            Type::None => self.builtin_class("NoneType"),
            Type::Tuple { .. } => self.builtin_class("tuple"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_released_on_every_exit() {
        let program = Program::with_builtins().expect("builtins");
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let key = EvalKey::Expression(NodeId(0));
        {
            let _outer = context.enter(key).expect("first entry");
            assert!(context.enter(key).is_none());
            assert!(context.is_in_progress(key));
        }
        assert!(!context.is_in_progress(key));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = context.enter(key);
            panic!("evaluation failed");
        }));
        assert!(result.is_err());
        assert!(!context.is_in_progress(key));
    }

    #[test]
    fn reentrant_requests_are_unknown_and_not_cached() {
        let program = Program::with_builtins().expect("builtins");
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let key = EvalKey::Expression(NodeId(1));
        let outer = context.guarded(key, || {
            let inner = context.guarded(key, || Type::None);
            assert_eq!(inner, Type::Unknown);
            Type::union([Type::None, inner])
        });
        assert_eq!(outer, Type::None.weak());
        assert_eq!(context.guarded(key, || Type::None), Type::None);
    }

    #[test]
    fn linearises_bases_with_object_last() {
        let mut program = Program::with_builtins().expect("builtins");
        let module = program
            .add_module("m", "class A\nend\nclass B(A)\nend\nclass C(B, A)\nend\n")
            .expect("parse");
        let root = program.module(module).expect("module").root;
        let statements = program.module_node(root).expect("root").statements.clone();
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let object = context.builtin_class("object").expect("object");
        assert_eq!(
            context.mro(statements[2]),
            vec![statements[2], statements[1], statements[0], object]
        );
        assert!(context.is_subclass(statements[2], statements[0]));
        assert!(!context.is_subclass(statements[0], statements[1]));
    }

    fn classes(text: &str) -> (Program, Vec<NodeId>) {
        let mut program = Program::with_builtins().expect("builtins");
        let module = program.add_module("m", text).expect("parse");
        let root = program.module(module).expect("module").root;
        let statements = program.module_node(root).expect("root").statements.clone();
        (program, statements)
    }

    #[test]
    fn diamonds_follow_c3_order() {
        let (program, c) =
            classes("class A
end
class B(A)
end
class C(A)
end
class D(B, C)
end
");
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let object = context.builtin_class("object").expect("object");
        assert_eq!(context.mro(c[3]), vec![c[3], c[1], c[2], c[0], object]);
    }

    #[test]
    fn inconsistent_hierarchies_keep_only_the_class() {
        let (program, c) = classes("class A
end
class B(A)
end
class X(A, B)
end
");
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let object = context.builtin_class("object").expect("object");
        assert_eq!(context.mro(c[2]), vec![c[2], object]);
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let (program, c) = classes("class A(B)
end
class B(A)
end
");
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let object = context.builtin_class("object").expect("object");
        assert_eq!(context.mro(c[0]), vec![c[0], object]);
    }
}
