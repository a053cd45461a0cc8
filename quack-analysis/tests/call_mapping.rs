use std::sync::Arc;

use quack_analysis::{
    map_arguments, resolve_callee, ArgumentKind, ArgumentMapping, BuiltinTypeCache,
    LanguageConfig, Literal, Modifier, NodeId, NodeKind, Program, TypeEvalContext,
};

fn load(text: &str) -> Program {
    let mut program = Program::with_builtins().expect("builtins");
    program.add_module("main", text).expect("parse main");
    program
}

/// Every call expression in the main module, in source order.
fn calls(program: &Program) -> Vec<NodeId> {
    let module = program.module_by_name("main").expect("main module");
    program
        .descendants(module.root)
        .into_iter()
        .filter(|node| matches!(program.kind(*node), Some(NodeKind::Call(_))))
        .collect()
}

fn last_call(program: &Program) -> NodeId {
    calls(program).last().copied().expect("a call")
}

fn label(program: &Program, expr: NodeId) -> String {
    match program.kind(expr) {
        Some(NodeKind::Literal(Literal::Integer(value))) => value.to_string(),
        Some(NodeKind::Name(name)) => name.clone(),
        Some(NodeKind::List(_)) => "[..]".to_string(),
        other => format!("{other:?}"),
    }
}

/// `argument -> parameter` pairs, in mapping order.
fn pairs(program: &Program, mapping: &ArgumentMapping) -> Vec<String> {
    mapping
        .mapped
        .iter()
        .map(|(argument, parameter)| {
            format!(
                "{}->{}",
                label(program, argument.expr),
                parameter.name.as_deref().unwrap_or("?")
            )
        })
        .collect()
}

fn names<'a>(parameters: impl IntoIterator<Item = &'a quack_analysis::Parameter>) -> Vec<String> {
    parameters
        .into_iter()
        .filter_map(|parameter| parameter.name.clone())
        .collect()
}

fn context(program: &Program) -> TypeEvalContext<'_> {
    TypeEvalContext::code_analysis(program, Arc::new(BuiltinTypeCache::new()))
}

#[test]
fn variadic_containers_collect_the_rest() {
    let program = load("def f(a, b, *args, **kwargs)\nend\nf(1, 2, 3, x=4)\n");
    let context = context(&program);
    let mapping = map_arguments(last_call(&program), &context);
    assert_eq!(
        pairs(&program, &mapping),
        vec!["1->a", "2->b", "3->args", "4->kwargs"]
    );
    assert!(mapping.unmapped_arguments.is_empty());
    assert!(mapping.unmapped_parameters.is_empty());
}

#[test]
fn missing_arguments_leave_parameters_unmapped() {
    let program = load("def f(a, b)\nend\nf(1)\n");
    let context = context(&program);
    let mapping = map_arguments(last_call(&program), &context);
    assert_eq!(pairs(&program, &mapping), vec!["1->a"]);
    assert_eq!(names(&mapping.unmapped_parameters), vec!["b"]);
    assert!(mapping.unmapped_arguments.is_empty());
}

#[test]
fn keyword_only_parameters_reject_positional_arguments() {
    let program = load("def f(a, *, b)\nend\nf(1, b=2)\nf(1, 2)\n");
    let context = context(&program);
    let all = calls(&program);

    let by_keyword = map_arguments(all[0], &context);
    assert_eq!(pairs(&program, &by_keyword), vec!["1->a", "2->b"]);
    assert!(by_keyword.unmapped_parameters.is_empty());

    let positional = map_arguments(all[1], &context);
    assert_eq!(pairs(&program, &positional), vec!["1->a"]);
    assert_eq!(names(&positional.unmapped_parameters), vec!["b"]);
    let unmapped: Vec<String> = positional
        .unmapped_arguments
        .iter()
        .map(|argument| label(&program, argument.expr))
        .collect();
    assert_eq!(unmapped, vec!["2"]);
}

#[test]
fn instance_methods_skip_the_receiver() {
    let program = load("class C\n  def m(self, x)\n  end\nend\nobj = C()\nobj.m(5)\n");
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(callee.callable.name, "m");
    assert_eq!(callee.implicit_offset, 1);
    assert!(!callee.is_constructor_call);

    let mapping = map_arguments(call, &context);
    assert_eq!(pairs(&program, &mapping), vec!["5->x"]);
    assert_eq!(names(&mapping.implicit_parameters), vec!["self"]);
}

#[test]
fn methods_called_on_the_class_take_the_receiver_explicitly() {
    let program = load("class C\n  def m(self, x)\n  end\nend\nC.m(C(), 5)\n");
    let context = context(&program);
    let call = calls(&program)[0];
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(callee.implicit_offset, 0);
    let mapping = map_arguments(call, &context);
    assert_eq!(pairs(&program, &mapping).last().map(String::as_str), Some("5->x"));
}

#[test]
fn classmethods_bind_the_class() {
    let program = load("class C\n  @classmethod\n  def m(cls, x)\n  end\nend\nC.m(5)\nC().m(6)\n");
    let context = context(&program);
    for call in calls(&program).into_iter().filter(|call| {
        matches!(program.kind(*call), Some(NodeKind::Call(expression))
            if matches!(program.kind(expression.callee), Some(NodeKind::Attribute(_))))
    }) {
        let callee = resolve_callee(call, &context).expect("callee");
        assert_eq!(callee.modifier, Modifier::ClassMethod);
        assert_eq!(callee.implicit_offset, 1);
        let mapping = map_arguments(call, &context);
        assert_eq!(names(mapping.mapped.values()), vec!["x"]);
    }
}

#[test]
fn rebinding_through_staticmethod_is_recognised() {
    let text = "class C\n  def s(x)\n  end\n  s = staticmethod(s)\nend\nC().s(5)\n";
    let program = load(text);
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(callee.modifier, Modifier::StaticMethod);
    assert_eq!(callee.implicit_offset, 0);
    assert_eq!(pairs(&program, &map_arguments(call, &context)), vec!["5->x"]);
}

#[test]
fn constructor_calls_map_onto_the_initializer() {
    let program = load("class P\n  def __init__(self, x, y=0)\n  end\nend\nP(1)\n");
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert!(callee.is_constructor_call);
    assert_eq!(callee.callable.name, "__init__");
    assert_eq!(callee.implicit_offset, 1);

    let mapping = map_arguments(call, &context);
    assert_eq!(pairs(&program, &mapping), vec!["1->x"]);
    assert_eq!(names(&mapping.defaulted_parameters), vec!["y"]);
    assert_eq!(context.type_of(call).describe(&program), "P");
}

#[test]
fn unknown_callees_leave_every_argument_unmapped() {
    let program = load("missing(1, 2)\n");
    let context = context(&program);
    let call = last_call(&program);
    assert!(resolve_callee(call, &context).is_none());
    let mapping = map_arguments(call, &context);
    assert!(mapping.mapped.is_empty());
    assert_eq!(mapping.unmapped_arguments.len(), 2);
}

#[test]
fn redefined_functions_resolve_to_the_latest_definition() {
    let program = load("def f(a)\nend\ndef f(a, b)\nend\nf(1, 2)\n");
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(names(&callee.callable.parameters), vec!["a", "b"]);
    assert_eq!(pairs(&program, &map_arguments(call, &context)), vec!["1->a", "2->b"]);
}

#[test]
fn calls_between_definitions_see_the_earlier_one() {
    let program = load("def f(a)\nend\nf(1)\ndef f(a, b)\nend\n");
    let context = context(&program);
    let callee = resolve_callee(last_call(&program), &context).expect("callee");
    assert_eq!(names(&callee.callable.parameters), vec!["a"]);
}

#[test]
fn methods_call_the_final_module_definition() {
    let text = "def f(a)\nend\ndef g()\n  f(1, 2)\nend\ndef f(a, b)\nend\n";
    let program = load(text);
    let context = context(&program);
    let callee = resolve_callee(last_call(&program), &context).expect("callee");
    assert_eq!(names(&callee.callable.parameters), vec!["a", "b"]);
}

#[test]
fn branch_definitions_are_ambiguous() {
    let text = "def outer(c)\n  if c\n    def f(a)\n    end\n  else\n    def f(a, b)\n    end\n  end\n  f(1)\nend\n";
    let program = load(text);
    let context = context(&program);
    assert!(resolve_callee(last_call(&program), &context).is_none());
}

#[test]
fn module_level_branch_definitions_are_ambiguous() {
    let program = load("if c\n  def f(a)\n  end\nelse\n  def f(a, b)\n  end\nend\nf(1)\n");
    let context = context(&program);
    assert!(resolve_callee(last_call(&program), &context).is_none());
}

#[test]
fn bound_method_aliases_keep_their_receiver() {
    let program = load("class C\n  def m(self, x)\n  end\nend\nbound = C().m\nbound(5)\n");
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(callee.implicit_offset, 1);
    assert_eq!(pairs(&program, &map_arguments(call, &context)), vec!["5->x"]);
}

#[test]
fn literal_star_arguments_are_spliced() {
    let program = load("def f(a, b)\nend\nf(*[1, 2])\n");
    let call = last_call(&program);

    let context = context(&program);
    let spliced = map_arguments(call, &context);
    assert_eq!(pairs(&program, &spliced), vec!["1->a", "2->b"]);
    assert_eq!(spliced.variadic_components.len(), 2);
    assert_eq!(spliced.absorbed_arguments.len(), 1);
    assert_eq!(
        names(&spliced.parameters_mapped_to_variadic_components),
        vec!["a", "b"]
    );

    let opaque_context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()))
        .with_language(LanguageConfig {
            splice_literal_star_args: false,
        });
    let opaque = map_arguments(call, &opaque_context);
    assert!(opaque.mapped.is_empty());
    assert_eq!(names(&opaque.variadic_spillover_parameters), vec!["a", "b"]);
    let absorbed: Vec<&ArgumentKind> = opaque
        .absorbed_arguments
        .iter()
        .map(|argument| &argument.kind)
        .collect();
    assert_eq!(absorbed, vec![&ArgumentKind::VariadicPositional]);
    assert!(opaque.unmapped_arguments.is_empty());
    assert!(opaque.parameters_mapped_to_variadic_components.is_empty());
}

#[test]
fn short_literal_star_arguments_tag_what_they_fill() {
    let program = load("def f(a, b, c)\nend\nf(0, *[1])\n");
    let context = context(&program);
    let mapping = map_arguments(last_call(&program), &context);
    assert_eq!(pairs(&program, &mapping), vec!["0->a", "1->b"]);
    assert_eq!(
        names(&mapping.parameters_mapped_to_variadic_components),
        vec!["b"]
    );
    assert_eq!(names(&mapping.unmapped_parameters), vec!["c"]);
}

#[test]
fn properties_call_the_value_they_return() {
    let text = "def helper(x)\nend\nclass C\n  @property\n  def handler(self)\n    return helper\n  end\nend\nC().handler(1)\n";
    let program = load(text);
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(callee.callable.name, "helper");
    assert_eq!(callee.implicit_offset, 0);
    assert_eq!(pairs(&program, &map_arguments(call, &context)), vec!["1->x"]);
}

#[test]
fn unknown_receivers_use_the_only_class_with_that_member() {
    let text = "class Gadget\n  def frobnicate(self, n)\n  end\nend\ndef use(thing)\n  thing.frobnicate(1)\nend\n";
    let program = load(text);
    let context = context(&program);
    let call = last_call(&program);
    let callee = resolve_callee(call, &context).expect("callee");
    assert!(callee.implicit);
    assert_eq!(callee.implicit_offset, 1);
    assert_eq!(pairs(&program, &map_arguments(call, &context)), vec!["1->n"]);
}

#[test]
fn calls_through_returned_functions() {
    let text = "def inner(a, b)\nend\ndef make()\n  return inner\nend\nmake()(1, 2)\n";
    let program = load(text);
    let context = context(&program);
    let call = calls(&program)
        .into_iter()
        .find(|call| {
            matches!(program.kind(*call), Some(NodeKind::Call(expression))
                if matches!(program.kind(expression.callee), Some(NodeKind::Call(_))))
        })
        .expect("outer call");
    let callee = resolve_callee(call, &context).expect("callee");
    assert_eq!(callee.callable.name, "inner");
    assert_eq!(
        pairs(&program, &map_arguments(call, &context)),
        vec!["1->a", "2->b"]
    );
}
