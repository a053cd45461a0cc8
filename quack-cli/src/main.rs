use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use quack_analysis::{
    AnalysisMode, AnalyzerConfig, BuiltinTypeCache, Declaration, Diagnostic,
    DiagnosticLevel, Literal, LoadError, ModuleId, NodeId, NodeKind, Parameter, Program,
    ScopeIndex, TypeEvalContext,
};

#[derive(Parser)]
#[command(
    name = "quack",
    version,
    about = "Type evaluation and call analysis for quack sources."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Analyzer configuration file (YAML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Answer from the declaration index only; unannotated returns stay unknown.
    #[arg(long, global = true)]
    index_only: bool,

    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Print the type of every module-level binding and expression statement.
    Types {
        /// Files or directories to analyze.
        #[arg(value_name = "PATH", required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Show how the arguments of every call map onto the callee's parameters.
    Calls {
        /// Files or directories to analyze.
        #[arg(value_name = "PATH", required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => AnalyzerConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnalyzerConfig::default(),
    };
    if cli.index_only {
        config.mode = AnalysisMode::IndexOnly;
    }

    let inputs = match &cli.command {
        Command::Types { inputs } | Command::Calls { inputs } => inputs,
    };
    let workspace = load_workspace(inputs)?;
    let program = &workspace.program;

    let index = (config.mode == AnalysisMode::IndexOnly).then(|| ScopeIndex::build(program));
    let context = TypeEvalContext::from_config(
        program,
        index.as_ref(),
        Arc::new(BuiltinTypeCache::new()),
        &config,
    );
    info!(mode = ?config.mode, modules = workspace.modules.len(), "analyzing");

    match cli.command {
        Command::Types { .. } => {
            let entries = type_entries(&context, &workspace.modules);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{}:{}:{} {}: {}",
                        entry.path, entry.line, entry.column, entry.name, entry.ty
                    );
                }
            }
        }
        Command::Calls { .. } => {
            let entries = call_entries(&context, &workspace.modules);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    print_call(entry);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

struct Workspace {
    program: Program,
    /// User modules, in load order.
    modules: Vec<ModuleId>,
}

fn load_workspace(inputs: &[PathBuf]) -> Result<Workspace> {
    let mut files = BTreeSet::new();
    for input in inputs {
        collect_quack_files(input, &mut files)?;
    }
    if files.is_empty() {
        bail!("no .qk files found");
    }

    let mut program = Program::with_builtins().context("failed to load builtins")?;
    let mut modules = Vec::new();
    let mut failed = 0usize;

    for path in &files {
        match program.load_file(path) {
            Ok(module) => {
                debug!(path = %path.display(), "loaded module");
                if let Some(info) = program.module(module) {
                    let lines: Vec<&str> = info.source.contents.lines().collect();
                    for warning in &info.warnings {
                        print_diagnostic(path, &lines, warning);
                    }
                }
                modules.push(module);
            }
            Err(LoadError::Syntax {
                path,
                message,
                diagnostics,
            }) => {
                failed += 1;
                let contents = fs::read_to_string(&path).unwrap_or_default();
                let lines: Vec<&str> = contents.lines().collect();
                if diagnostics.is_empty() {
                    eprintln!("  - error: {message}");
                    eprintln!("     --> {}", path.display());
                }
                for diagnostic in &diagnostics {
                    print_diagnostic(&path, &lines, diagnostic);
                }
            }
            Err(error) => {
                return Err(error).with_context(|| format!("failed to load {}", path.display()))
            }
        }
    }

    if failed > 0 {
        bail!("{} file(s) failed to parse", failed);
    }

    Ok(Workspace { program, modules })
}

/// Explicit files are taken as given; directories contribute their `.qk` files.
fn collect_quack_files(path: &Path, targets: &mut BTreeSet<PathBuf>) -> Result<()> {
    fs::metadata(path).with_context(|| format!("Failed to access {:?}", path))?;

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read directory {:?}", path))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_source = entry.path().extension().and_then(|ext| ext.to_str()) == Some("qk");
        if entry.depth() == 0 || is_source {
            targets.insert(entry.into_path());
        }
    }

    Ok(())
}

fn print_diagnostic(path: &Path, lines: &[&str], diagnostic: &Diagnostic) {
    let (level_label, level_marker) = match diagnostic.level {
        DiagnosticLevel::Error => ("error", "  -"),
        DiagnosticLevel::Warning => ("warning", "  ~"),
    };
    eprintln!("{} {}: {}", level_marker, level_label, diagnostic.message);
    let Some(span) = diagnostic.span else {
        return;
    };
    eprintln!("     --> {}:{}:{}", path.display(), span.line, span.column);

    if let Some(raw_line) = lines.get(span.line.saturating_sub(1)) {
        let display_line = raw_line.replace('\t', "    ");
        eprintln!("      {}", display_line);

        let mut caret_line = String::from("      ");
        for ch in raw_line.chars().take(span.column.saturating_sub(1)) {
            match ch {
                '\t' => caret_line.push_str("    "),
                _ => caret_line.push(' '),
            }
        }
        let highlight_len = if span.end_line == span.line {
            span.end_column.saturating_sub(span.column).saturating_add(1)
        } else {
            1
        };
        caret_line.push_str(&"^".repeat(highlight_len.max(1)));
        eprintln!("{}", caret_line);
    }
}

#[derive(Debug, Serialize)]
struct TypeEntry {
    path: String,
    line: usize,
    column: usize,
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

fn type_entries(context: &TypeEvalContext<'_>, modules: &[ModuleId]) -> Vec<TypeEntry> {
    let program = context.program();
    let mut entries = Vec::new();

    for module in modules {
        let Some(info) = program.module(*module) else {
            continue;
        };
        let Some(root) = program.module_node(info.root) else {
            continue;
        };
        let path = info.source.path.display().to_string();

        for &statement in &root.statements {
            let mut push = |node: NodeId, name: String, ty: String| {
                let span = program.span(node);
                entries.push(TypeEntry {
                    path: path.clone(),
                    line: span.line,
                    column: span.column,
                    name,
                    ty,
                });
            };

            match program.kind(statement) {
                Some(NodeKind::Assignment(assignment)) => {
                    let mut bound = Vec::new();
                    bound_names(program, assignment.target, &mut Vec::new(), &mut bound);
                    for (target, path) in bound {
                        let declaration = if path.is_empty() {
                            Declaration::Assignment { target, statement }
                        } else {
                            Declaration::Unpacked {
                                target,
                                statement,
                                path,
                            }
                        };
                        let name = program.name_text(target).unwrap_or_default().to_string();
                        let ty = context.declaration_type(&declaration).describe(program);
                        push(target, name, ty);
                    }
                }
                Some(NodeKind::Function(function)) => {
                    let ty = context.return_type(statement).describe(program);
                    push(statement, format!("{}()", function.name), ty);
                }
                Some(NodeKind::Import(import)) => {
                    let ty = context.type_of(statement).describe(program);
                    push(statement, import.name.clone(), ty);
                }
                Some(NodeKind::ExpressionStatement(expr)) => {
                    let ty = context.type_of(*expr).describe(program);
                    push(*expr, expression_label(program, *expr), ty);
                }
                _ => {}
            }
        }
    }

    entries
}

/// Name targets of an assignment, with their position inside unpacked tuples.
fn bound_names(
    program: &Program,
    target: NodeId,
    path: &mut Vec<usize>,
    out: &mut Vec<(NodeId, Vec<usize>)>,
) {
    match program.kind(target) {
        Some(NodeKind::Name(_)) => out.push((target, path.clone())),
        Some(NodeKind::Tuple(elements)) | Some(NodeKind::List(elements)) => {
            for (index, element) in elements.iter().enumerate() {
                path.push(index);
                bound_names(program, *element, path, out);
                path.pop();
            }
        }
        _ => {}
    }
}

#[derive(Debug, Serialize)]
struct CallEntry {
    path: String,
    line: usize,
    column: usize,
    call: String,
    callee: Option<CalleeEntry>,
    mapped: Vec<MappedEntry>,
    implicit_parameters: Vec<String>,
    unmapped_arguments: Vec<String>,
    unmapped_parameters: Vec<String>,
    spillover_parameters: Vec<String>,
    spliced_parameters: Vec<String>,
    defaulted_parameters: Vec<String>,
    absorbed_arguments: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CalleeEntry {
    name: String,
    modifier: &'static str,
    implicit_offset: usize,
    constructor: bool,
    implicit: bool,
}

#[derive(Debug, Serialize)]
struct MappedEntry {
    argument: String,
    parameter: String,
}

fn call_entries(context: &TypeEvalContext<'_>, modules: &[ModuleId]) -> Vec<CallEntry> {
    let program = context.program();
    let mut entries = Vec::new();

    for module in modules {
        let Some(info) = program.module(*module) else {
            continue;
        };
        let path = info.source.path.display().to_string();
        let calls = program
            .descendants(info.root)
            .into_iter()
            .filter(|node| matches!(program.kind(*node), Some(NodeKind::Call(_))));

        for call in calls {
            let callee = context.resolve_callee(call);
            let mapping = context.map_call_arguments(call);
            let span = program.span(call);
            entries.push(CallEntry {
                path: path.clone(),
                line: span.line,
                column: span.column,
                call: expression_label(program, call),
                callee: callee.map(|callee| CalleeEntry {
                    name: callee.callable.name,
                    modifier: callee.modifier.name(),
                    implicit_offset: callee.implicit_offset,
                    constructor: callee.is_constructor_call,
                    implicit: callee.implicit,
                }),
                mapped: mapping
                    .mapped
                    .iter()
                    .map(|(argument, parameter)| MappedEntry {
                        argument: expression_label(program, argument.expr),
                        parameter: parameter_label(parameter),
                    })
                    .collect(),
                implicit_parameters: mapping
                    .implicit_parameters
                    .iter()
                    .map(parameter_label)
                    .collect(),
                unmapped_arguments: mapping
                    .unmapped_arguments
                    .iter()
                    .map(|argument| expression_label(program, argument.expr))
                    .collect(),
                unmapped_parameters: mapping
                    .unmapped_parameters
                    .iter()
                    .map(parameter_label)
                    .collect(),
                spillover_parameters: mapping
                    .variadic_spillover_parameters
                    .iter()
                    .map(parameter_label)
                    .collect(),
                spliced_parameters: mapping
                    .parameters_mapped_to_variadic_components
                    .iter()
                    .map(parameter_label)
                    .collect(),
                defaulted_parameters: mapping
                    .defaulted_parameters
                    .iter()
                    .map(parameter_label)
                    .collect(),
                absorbed_arguments: mapping
                    .absorbed_arguments
                    .iter()
                    .map(|argument| expression_label(program, argument.expr))
                    .collect(),
            });
        }
    }

    entries
}

fn print_call(entry: &CallEntry) {
    let target = match &entry.callee {
        Some(callee) => {
            let mut notes = vec![format!("offset {}", callee.implicit_offset)];
            if callee.modifier != "none" {
                notes.push(callee.modifier.to_string());
            }
            if callee.constructor {
                notes.push("constructor".to_string());
            }
            if callee.implicit {
                notes.push("implicit".to_string());
            }
            format!("{} [{}]", callee.name, notes.join(", "))
        }
        None => "<unresolved>".to_string(),
    };
    println!(
        "{}:{}:{} {} -> {}",
        entry.path, entry.line, entry.column, entry.call, target
    );
    for mapped in &entry.mapped {
        println!("    {} -> {}", mapped.argument, mapped.parameter);
    }
    let groups = [
        ("implicit", &entry.implicit_parameters),
        ("unmapped arguments", &entry.unmapped_arguments),
        ("unmapped parameters", &entry.unmapped_parameters),
        ("spillover", &entry.spillover_parameters),
        ("from spliced elements", &entry.spliced_parameters),
        ("defaulted", &entry.defaulted_parameters),
        ("absorbed", &entry.absorbed_arguments),
    ];
    for (label, items) in groups {
        if !items.is_empty() {
            println!("    {}: {}", label, items.join(", "));
        }
    }
}

fn parameter_label(parameter: &Parameter) -> String {
    parameter.name.clone().unwrap_or_else(|| "(..)".to_string())
}

/// Short source-like rendering of an expression for reports.
fn expression_label(program: &Program, expr: NodeId) -> String {
    match program.kind(expr) {
        Some(NodeKind::Name(name)) => name.clone(),
        Some(NodeKind::Literal(literal)) => match literal {
            Literal::Integer(value) => value.to_string(),
            Literal::Float(value) => value.to_string(),
            Literal::String(value) => format!("{value:?}"),
            Literal::Boolean(value) => value.to_string(),
            Literal::None => "None".to_string(),
        },
        Some(NodeKind::Attribute(attribute)) => format!(
            "{}.{}",
            expression_label(program, attribute.object),
            attribute.name
        ),
        Some(NodeKind::Call(call)) => format!("{}(..)", expression_label(program, call.callee)),
        Some(NodeKind::Keyword(keyword)) => format!(
            "{}={}",
            keyword.name,
            expression_label(program, keyword.value)
        ),
        Some(NodeKind::Starred(inner)) => format!("*{}", expression_label(program, *inner)),
        Some(NodeKind::DoubleStarred(inner)) => {
            format!("**{}", expression_label(program, *inner))
        }
        Some(NodeKind::List(_)) => "[..]".to_string(),
        Some(NodeKind::Tuple(_)) => "(..)".to_string(),
        Some(NodeKind::Dict(_)) => "{..}".to_string(),
        _ => {
            let span = program.span(expr);
            format!("<expr {}:{}>", span.line, span.column)
        }
    }
}
