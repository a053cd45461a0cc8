use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ast::{
    ClassDefinition, FunctionDefinition, ModuleId, ModuleNode, Node, NodeId, NodeKind,
    ParameterNode, SourceSpan,
};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::LoadError;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::source::{SourceFile, SourceId};

const BUILTINS_SOURCE: &str = include_str!("builtins.qk");

#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub root: NodeId,
    pub source: SourceFile,
    /// Warnings reported while parsing.
    pub warnings: Vec<Diagnostic>,
}

/// Every parsed module, user code and builtins alike, in one node arena.
///
/// Node ids are never reused, so they are stable for the lifetime of the
/// program and serve as identities for caches and the recursion guard.
#[derive(Debug, Default)]
pub struct Program {
    nodes: Vec<Node>,
    modules: Vec<ModuleInfo>,
    builtins: Option<ModuleId>,
    builtins_revision: u64,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// A program with the bundled builtins module already loaded.
    pub fn with_builtins() -> Result<Self, LoadError> {
        let mut program = Self::new();
        program.load_builtins(BUILTINS_SOURCE)?;
        Ok(program)
    }

    /// Parses `source` as the builtins module, replacing any previous one.
    ///
    /// Bumps the builtins modification counter so that shared builtin type
    /// caches drop entries pointing at the old module.
    pub fn load_builtins(&mut self, source: &str) -> Result<ModuleId, LoadError> {
        let file = SourceFile::new(
            SourceId(self.modules.len() as u32),
            PathBuf::from("builtins.qk"),
            source.to_string(),
        );
        let id = self.add_source(file)?;
        self.builtins = Some(id);
        self.builtins_revision += 1;
        debug!(revision = self.builtins_revision, "loaded builtins module");
        Ok(id)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<ModuleId, LoadError> {
        let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = SourceFile::new(
            SourceId(self.modules.len() as u32),
            path.to_path_buf(),
            contents,
        );
        self.add_source(file)
    }

    /// Convenience for tests and embedders: parse `text` as module `name`.
    pub fn add_module(&mut self, name: &str, text: &str) -> Result<ModuleId, LoadError> {
        let file = SourceFile::new(
            SourceId(self.modules.len() as u32),
            PathBuf::from(format!("{name}.qk")),
            text.to_string(),
        );
        self.add_source(file)
    }

    pub fn add_source(&mut self, source: SourceFile) -> Result<ModuleId, LoadError> {
        let module = ModuleId(self.modules.len() as u32);
        let mark = self.nodes.len();
        let name = source.module_name();

        let mut diagnostics = Diagnostics::new();
        let parsed = Lexer::new(&source).tokenize().and_then(|tokens| {
            let mut parser = Parser::new(tokens, self, module, &name);
            let root = parser.parse();
            diagnostics.extend(parser.into_diagnostics());
            root
        });

        match parsed {
            Ok(root) => {
                self.modules.push(ModuleInfo {
                    id: module,
                    name,
                    root,
                    source,
                    warnings: diagnostics.into_entries(),
                });
                Ok(module)
            }
            Err(error) => {
                self.nodes.truncate(mark);
                Err(LoadError::Syntax {
                    path: source.path,
                    message: error.to_string(),
                    diagnostics: diagnostics.into_entries(),
                })
            }
        }
    }

    /// Appends a node and adopts its already allocated children.
    pub(crate) fn alloc(&mut self, module: ModuleId, kind: NodeKind, span: SourceSpan) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for child in kind.children() {
            if let Some(node) = self.nodes.get_mut(child.0 as usize) {
                node.parent = Some(id);
            }
        }
        self.nodes.push(Node {
            kind,
            span,
            parent: None,
            module,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|node| &node.kind)
    }

    pub fn span(&self, id: NodeId) -> SourceSpan {
        self.node(id).map(|node| node.span).unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn module_of(&self, id: NodeId) -> Option<ModuleId> {
        self.node(id).map(|node| node.module)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).map(NodeKind::children).unwrap_or_default()
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.get(id.0 as usize)
    }

    /// Latest module registered under `name`.
    pub fn module_by_name(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.iter().rev().find(|module| module.name == name)
    }

    pub fn builtins_module(&self) -> Option<ModuleId> {
        self.builtins
    }

    pub fn builtins_revision(&self) -> u64 {
        self.builtins_revision
    }

    pub fn is_builtin(&self, id: NodeId) -> bool {
        self.builtins.is_some() && self.module_of(id) == self.builtins
    }

    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            program: self,
            next: self.parent(id),
        }
    }

    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|candidate| candidate == ancestor)
    }

    /// Pre-order walk below `root`, `root` excluded.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    pub fn module_node(&self, id: NodeId) -> Option<&ModuleNode> {
        match self.kind(id)? {
            NodeKind::Module(module) => Some(module),
            _ => None,
        }
    }

    pub fn class_definition(&self, id: NodeId) -> Option<&ClassDefinition> {
        match self.kind(id)? {
            NodeKind::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn function_definition(&self, id: NodeId) -> Option<&FunctionDefinition> {
        match self.kind(id)? {
            NodeKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn parameter(&self, id: NodeId) -> Option<&ParameterNode> {
        match self.kind(id)? {
            NodeKind::Parameter(parameter) => Some(parameter),
            _ => None,
        }
    }

    /// Identifier text of a name, attribute, definition or parameter node.
    pub fn name_text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Name(name) => Some(name),
            NodeKind::Attribute(attribute) => Some(&attribute.name),
            NodeKind::Class(class) => Some(&class.name),
            NodeKind::Function(function) => Some(&function.name),
            NodeKind::Parameter(parameter) => parameter.name.as_deref(),
            NodeKind::Keyword(keyword) => Some(&keyword.name),
            NodeKind::Import(import) => Some(&import.name),
            NodeKind::Module(module) => Some(&module.name),
            _ => None,
        }
    }

    /// Statement list of a scope (module, class or function body).
    pub fn scope_body(&self, scope: NodeId) -> &[NodeId] {
        match self.kind(scope) {
            Some(NodeKind::Module(module)) => &module.statements,
            Some(NodeKind::Class(class)) => &class.body,
            Some(NodeKind::Function(function)) => &function.body,
            _ => &[],
        }
    }

    /// Innermost scope whose *body* contains `id`.
    ///
    /// Decorators, bases, parameter defaults and annotations belong to the
    /// scope around the definition, not to the definition itself.
    pub fn scope_of(&self, id: NodeId) -> Option<NodeId> {
        let mut child = id;
        for ancestor in self.ancestors(id) {
            match self.kind(ancestor)? {
                NodeKind::Module(_) => return Some(ancestor),
                NodeKind::Class(class) if class.body.contains(&child) => return Some(ancestor),
                NodeKind::Function(function) if function.body.contains(&child) => {
                    return Some(ancestor)
                }
                _ => {}
            }
            child = ancestor;
        }
        None
    }

    /// Scope that encloses the scope node `scope` itself.
    pub fn outer_scope(&self, scope: NodeId) -> Option<NodeId> {
        self.scope_of(scope)
    }

    /// Function whose body (transitively) contains `id`.
    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.scope_of(id)?;
        loop {
            match self.kind(current)? {
                NodeKind::Function(_) => return Some(current),
                NodeKind::Module(_) => return None,
                _ => current = self.scope_of(current)?,
            }
        }
    }

    /// Class whose body directly declares the definition `id`.
    pub fn declaring_class(&self, id: NodeId) -> Option<NodeId> {
        let scope = self.scope_of(id)?;
        self.class_definition(scope).map(|_| scope)
    }

    /// Class of the method that (transitively) contains `id`.
    pub fn enclosing_class(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.scope_of(id)?;
        loop {
            match self.kind(current)? {
                NodeKind::Class(_) => return Some(current),
                NodeKind::Module(_) => return None,
                _ => current = self.scope_of(current)?,
            }
        }
    }

    /// Element expressions of a literal tuple or list, used to splice `*[a, b]`.
    pub fn literal_elements(&self, id: NodeId) -> Option<Vec<NodeId>> {
        match self.kind(id)? {
            NodeKind::Tuple(elements) | NodeKind::List(elements) => Some(elements.clone()),
            _ => None,
        }
    }

    /// Names used as decorators on a class or function (`@property` -> `property`).
    pub fn decorator_names(&self, id: NodeId) -> Vec<&str> {
        let decorators = match self.kind(id) {
            Some(NodeKind::Function(function)) => &function.decorators,
            Some(NodeKind::Class(class)) => &class.decorators,
            _ => return Vec::new(),
        };
        decorators
            .iter()
            .filter_map(|decorator| self.name_text(*decorator))
            .collect()
    }

    /// Source path of the module that owns `id`, for reporting.
    pub fn path_of(&self, id: NodeId) -> Option<&Path> {
        let module = self.module_of(id)?;
        self.module(module).map(|info| info.source.path.as_path())
    }
}

pub struct Ancestors<'a> {
    program: &'a Program,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.program.parent(current);
        Some(current)
    }
}
