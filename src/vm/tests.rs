//! End-to-end tests: build a tree, compile it, run it on the VM.

use std::sync::Arc;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use crate::ast::build::*;
use crate::ast::{Expr, Stmt, StmtKind};
use crate::config::VmConfig;
use crate::error::{CompileError, RuntimeError};
use crate::span::Span;

use super::compiler::compile;
use super::loader::StaticLoader;
use super::serializer::{deserialize, serialize};
use super::value::Value;
use super::vm::Vm;

fn compile_and_run(statements: Vec<Stmt>) -> Result<Value, RuntimeError> {
    run_with_config(statements, VmConfig::default())
}

fn run_with_config(statements: Vec<Stmt>, config: VmConfig) -> Result<Value, RuntimeError> {
    let unit = compile(&program(statements)).expect("program should compile");
    Vm::new(&unit, config).run()
}

fn run_ok(statements: Vec<Stmt>) -> Value {
    compile_and_run(statements).expect("program should run")
}

fn compile_err(statements: Vec<Stmt>) -> CompileError {
    compile(&program(statements)).expect_err("program should not compile")
}

fn incr(name: &str) -> Expr {
    assign(var(name), add(var(name), int(1)))
}

fn counting_loop(name: &str, limit: i64, body: Vec<Stmt>) -> Stmt {
    for_(
        Some(let_(name, int(0))),
        Some(less(var(name), int(limit))),
        Some(incr(name)),
        block(body),
    )
}

// --- Basics ---

#[test]
fn test_vm_arithmetic_and_promotion() {
    assert_eq!(run_ok(vec![expr_stmt(add(int(1), float(1.5)))]), Value::Float(2.5));
    assert_eq!(
        run_ok(vec![expr_stmt(add(string("a"), int(1)))]),
        Value::String("a1".into())
    );
    assert_eq!(run_ok(vec![expr_stmt(mul(int(6), int(7)))]), Value::Int(42));
    assert_eq!(run_ok(vec![expr_stmt(neg(int(3)))]), Value::Int(-3));
    assert_eq!(run_ok(vec![expr_stmt(not(null()))]), Value::Bool(true));
}

#[test]
fn test_vm_division_by_zero() {
    let int_div = compile_and_run(vec![expr_stmt(div(int(1), int(0)))]);
    assert!(matches!(int_div, Err(RuntimeError::DivisionByZero(_))));

    let float_div = compile_and_run(vec![expr_stmt(div(float(1.0), float(0.0)))]);
    assert!(matches!(float_div, Err(RuntimeError::DivisionByZero(_))));
}

#[test]
fn test_vm_division_by_zero_is_not_catchable() {
    let result = compile_and_run(vec![try_catch(
        vec![expr_stmt(div(int(1), int(0)))],
        Some("e"),
        vec![],
    )]);
    assert!(matches!(result, Err(RuntimeError::DivisionByZero(_))));
}

#[test]
fn test_vm_empty_program_returns_null() {
    assert_eq!(run_ok(vec![]), Value::Null);
    assert_eq!(run_ok(vec![let_("x", int(1))]), Value::Null);
}

#[test]
fn test_vm_short_circuit() {
    let value = run_ok(vec![
        let_("hits", int(0)),
        fn_decl(
            "bump",
            &[],
            vec![expr_stmt(incr("hits")), ret(boolean(true))],
        ),
        expr_stmt(and(boolean(false), call(var("bump"), vec![]))),
        expr_stmt(or(boolean(true), call(var("bump"), vec![]))),
        expr_stmt(var("hits")),
    ]);
    assert_eq!(value, Value::Int(0));

    assert_eq!(
        run_ok(vec![expr_stmt(or(null(), string("fallback")))]),
        Value::String("fallback".into())
    );
    assert_eq!(
        run_ok(vec![expr_stmt(and(int(1), int(2)))]),
        Value::Int(2)
    );
}

#[test]
fn test_vm_conditional_expression() {
    let value = run_ok(vec![expr_stmt(ternary(
        less(int(1), int(2)),
        string("yes"),
        string("no"),
    ))]);
    assert_eq!(value, Value::String("yes".into()));
}

// --- Functions and closures ---

#[test]
fn test_vm_function_call() {
    let value = run_ok(vec![
        fn_decl("add", &["a", "b"], vec![ret(add(var("a"), var("b")))]),
        expr_stmt(call(var("add"), vec![int(2), int(3)])),
    ]);
    assert_eq!(value, Value::Int(5));
}

#[test]
fn test_vm_wrong_arity() {
    let result = compile_and_run(vec![
        fn_decl("one", &["a"], vec![ret(var("a"))]),
        expr_stmt(call(var("one"), vec![])),
    ]);
    assert!(matches!(
        result,
        Err(RuntimeError::WrongArity {
            expected: 1,
            got: 0,
            ..
        })
    ));
}

#[test]
fn test_vm_not_callable() {
    let result = compile_and_run(vec![expr_stmt(call(int(3), vec![]))]);
    assert!(matches!(result, Err(RuntimeError::NotCallable(ref t, _)) if t == "int"));
}

#[test]
fn test_vm_closure_captures_value_at_creation() {
    let value = run_ok(vec![expr_stmt(iife(vec![
        let_("x", int(1)),
        let_("f", func(&[], vec![ret(var("x"))])),
        expr_stmt(assign(var("x"), int(2))),
        ret(call(var("f"), vec![])),
    ]))]);
    assert_eq!(value, Value::Int(1));
}

#[test]
fn test_vm_top_level_closure_reads_live_global() {
    // Top-level names are globals, and globals are never captured.
    let value = run_ok(vec![
        let_("x", int(1)),
        let_("f", func(&[], vec![ret(var("x"))])),
        expr_stmt(assign(var("x"), int(2))),
        expr_stmt(call(var("f"), vec![])),
    ]);
    assert_eq!(value, Value::Int(2));
}

#[test]
fn test_vm_free_variable_promotion_through_levels() {
    let value = run_ok(vec![
        fn_decl(
            "outer",
            &[],
            vec![
                let_("a", int(7)),
                ret(func(&[], vec![ret(func(&[], vec![ret(var("a"))]))])),
            ],
        ),
        expr_stmt(call(
            call(call(var("outer"), vec![]), vec![]),
            vec![],
        )),
    ]);
    assert_eq!(value, Value::Int(7));
}

#[test]
fn test_vm_local_recursion() {
    let value = run_ok(vec![expr_stmt(iife(vec![
        fn_decl(
            "fact",
            &["n"],
            vec![
                if_(less(var("n"), int(2)), ret(int(1)), None),
                ret(mul(
                    var("n"),
                    call(var("fact"), vec![sub(var("n"), int(1))]),
                )),
            ],
        ),
        ret(call(var("fact"), vec![int(5)])),
    ]))]);
    assert_eq!(value, Value::Int(120));
}

#[test]
fn test_vm_globals_are_shared_with_functions() {
    let value = run_ok(vec![
        let_("counter", int(0)),
        fn_decl("tick", &[], vec![expr_stmt(incr("counter"))]),
        expr_stmt(call(var("tick"), vec![])),
        expr_stmt(call(var("tick"), vec![])),
        expr_stmt(var("counter")),
    ]);
    assert_eq!(value, Value::Int(2));
}

// --- Control flow ---

#[test]
fn test_vm_while_loop() {
    let value = run_ok(vec![
        let_("n", int(0)),
        while_(less(var("n"), int(5)), expr_stmt(incr("n"))),
        expr_stmt(var("n")),
    ]);
    assert_eq!(value, Value::Int(5));
}

#[test]
fn test_vm_break_exits_innermost_loop_only() {
    let value = run_ok(vec![
        let_("count", int(0)),
        counting_loop(
            "i",
            3,
            vec![counting_loop(
                "j",
                10,
                vec![
                    if_(eq(var("j"), int(2)), break_(), None),
                    expr_stmt(incr("count")),
                ],
            )],
        ),
        expr_stmt(var("count")),
    ]);
    assert_eq!(value, Value::Int(6));
}

#[test]
fn test_vm_continue_runs_increment() {
    let value = run_ok(vec![
        let_("sum", int(0)),
        counting_loop(
            "i",
            5,
            vec![
                if_(eq(var("i"), int(2)), continue_(), None),
                expr_stmt(assign(var("sum"), add(var("sum"), var("i")))),
            ],
        ),
        expr_stmt(var("sum")),
    ]);
    assert_eq!(value, Value::Int(8));
}

#[test]
fn test_vm_switch() {
    let classify = |subject: i64| {
        vec![
            let_("r", string("")),
            switch(
                int(subject),
                vec![
                    (int(1), vec![expr_stmt(assign(var("r"), string("one")))]),
                    (int(2), vec![expr_stmt(assign(var("r"), string("two")))]),
                ],
                Some(vec![expr_stmt(assign(var("r"), string("other")))]),
            ),
            expr_stmt(var("r")),
        ]
    };
    assert_eq!(run_ok(classify(2)), Value::String("two".into()));
    assert_eq!(run_ok(classify(1)), Value::String("one".into()));
    assert_eq!(run_ok(classify(9)), Value::String("other".into()));
}

#[test]
fn test_vm_for_in_over_array_map_and_string() {
    let sum = run_ok(vec![
        let_("sum", int(0)),
        for_in(
            "x",
            array(vec![int(1), int(2), int(3)]),
            expr_stmt(assign(var("sum"), add(var("sum"), var("x")))),
        ),
        expr_stmt(var("sum")),
    ]);
    assert_eq!(sum, Value::Int(6));

    let keys = run_ok(vec![
        let_("out", string("")),
        for_in(
            "k",
            hash(vec![(string("a"), int(1)), (string("b"), int(2))]),
            expr_stmt(assign(var("out"), add(var("out"), var("k")))),
        ),
        expr_stmt(var("out")),
    ]);
    assert_eq!(keys, Value::String("ab".into()));

    let chars = run_ok(vec![
        let_("n", int(0)),
        for_in("c", string("héllo"), expr_stmt(incr("n"))),
        expr_stmt(var("n")),
    ]);
    assert_eq!(chars, Value::Int(5));
}

#[test]
fn test_vm_for_in_inside_function() {
    let value = run_ok(vec![
        fn_decl(
            "total",
            &["items"],
            vec![
                let_("t", int(0)),
                for_in(
                    "x",
                    var("items"),
                    block(vec![
                        if_(eq(var("x"), int(3)), continue_(), None),
                        expr_stmt(assign(var("t"), add(var("t"), var("x")))),
                    ]),
                ),
                ret(var("t")),
            ],
        ),
        expr_stmt(call(
            var("total"),
            vec![array(vec![int(1), int(2), int(3), int(4)])],
        )),
    ]);
    assert_eq!(value, Value::Int(7));
}

// --- Exceptions ---

#[test]
fn test_vm_nested_exception() {
    let unit = compile(&program(vec![
        let_("r", int(0)),
        try_catch(
            vec![try_catch(
                vec![throw(int(1))],
                Some("e"),
                vec![throw(add(var("e"), int(1)))],
            )],
            Some("e"),
            vec![expr_stmt(assign(var("r"), var("e")))],
        ),
        expr_stmt(var("r")),
    ]))
    .unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default());
    assert_eq!(vm.run().unwrap(), Value::Int(2));
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.frame_count(), 0);
}

#[test]
fn test_vm_unwind_restores_depths_of_try_enter() {
    let unit = compile(&program(vec![
        fn_decl("inner", &["x"], vec![throw(mul(var("x"), int(2)))]),
        fn_decl(
            "mid",
            &["x"],
            vec![
                let_("m", add(var("x"), int(1))),
                ret(add(int(100), call(var("inner"), vec![var("m")]))),
            ],
        ),
        fn_decl(
            "outer",
            &["a"],
            vec![
                let_("b", add(var("a"), int(1))),
                let_("r", int(0)),
                try_catch(
                    vec![expr_stmt(assign(
                        var("r"),
                        add(var("b"), call(var("mid"), vec![var("a")])),
                    ))],
                    Some("e"),
                    vec![expr_stmt(assign(
                        var("r"),
                        add(add(var("a"), var("b")), var("e")),
                    ))],
                ),
                ret(var("r")),
            ],
        ),
        expr_stmt(add(int(10), call(var("outer"), vec![int(5)]))),
    ]))
    .unwrap();

    let mut vm = Vm::new(&unit, VmConfig::default());
    // 10 + (5 + 6 + 12): the operand 10 and outer's locals survive the unwind.
    assert_eq!(vm.run().unwrap(), Value::Int(33));

    assert_eq!(vm.try_depths.len(), 1);
    let (stack_at_enter, frames_at_enter) = vm.try_depths[0];
    assert_eq!(frames_at_enter, 2);
    assert!(stack_at_enter > 0);
    // The throw happened two frames below outer with operands pushed.
    assert_eq!(vm.catch_depths, vec![(stack_at_enter, frames_at_enter)]);
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.frame_count(), 0);
}

#[test]
fn test_vm_nested_catch_depths_match_each_try() {
    let unit = compile(&program(vec![
        fn_decl("fail", &["v"], vec![throw(var("v"))]),
        fn_decl(
            "run",
            &[],
            vec![
                let_("r", int(0)),
                try_catch(
                    vec![
                        let_("inside", int(1)),
                        try_catch(
                            vec![expr_stmt(call(var("fail"), vec![int(1)]))],
                            Some("e"),
                            vec![expr_stmt(call(
                                var("fail"),
                                vec![add(var("e"), var("inside"))],
                            ))],
                        ),
                    ],
                    Some("e2"),
                    vec![expr_stmt(assign(var("r"), var("e2")))],
                ),
                ret(var("r")),
            ],
        ),
        expr_stmt(call(var("run"), vec![])),
    ]))
    .unwrap();

    let mut vm = Vm::new(&unit, VmConfig::default());
    assert_eq!(vm.run().unwrap(), Value::Int(2));
    assert_eq!(vm.try_depths.len(), 2);
    // Inner handler fires first, then the outer one.
    assert_eq!(vm.catch_depths, vec![vm.try_depths[1], vm.try_depths[0]]);
    // Both regions sit in run's frame; statements leave no operands behind.
    assert_eq!(vm.try_depths[0].1, 2);
    assert_eq!(vm.try_depths[1], vm.try_depths[0]);
}

#[test]
fn test_vm_throw_unwinds_call_frames() {
    let value = run_ok(vec![
        let_("r", null()),
        fn_decl("inner", &[], vec![throw(string("deep"))]),
        fn_decl(
            "outer",
            &[],
            vec![ret(add(int(1), call(var("inner"), vec![])))],
        ),
        try_catch(
            vec![expr_stmt(call(var("outer"), vec![]))],
            Some("e"),
            vec![expr_stmt(assign(var("r"), var("e")))],
        ),
        expr_stmt(var("r")),
    ]);
    assert_eq!(value, Value::String("deep".into()));
}

#[test]
fn test_vm_catch_without_binding() {
    let value = run_ok(vec![
        let_("r", int(0)),
        try_catch(
            vec![throw(int(9))],
            None,
            vec![expr_stmt(assign(var("r"), int(1)))],
        ),
        expr_stmt(var("r")),
    ]);
    assert_eq!(value, Value::Int(1));
}

#[test]
fn test_vm_break_out_of_try_drops_handler() {
    let value = run_ok(vec![
        let_("r", int(0)),
        try_catch(
            vec![
                while_(
                    boolean(true),
                    try_catch(
                        vec![break_()],
                        Some("e"),
                        vec![expr_stmt(assign(var("r"), int(-1)))],
                    ),
                ),
                throw(int(5)),
            ],
            Some("e"),
            vec![expr_stmt(assign(var("r"), var("e")))],
        ),
        expr_stmt(var("r")),
    ]);
    assert_eq!(value, Value::Int(5));
}

#[test]
fn test_vm_return_from_try_drops_handler() {
    let result = compile_and_run(vec![
        fn_decl(
            "f",
            &[],
            vec![try_catch(
                vec![ret(int(1))],
                Some("e"),
                vec![ret(int(2))],
            )],
        ),
        let_("v", call(var("f"), vec![])),
        throw(var("v")),
    ]);
    match result {
        Err(RuntimeError::UncaughtException { message, .. }) => assert_eq!(message, "1"),
        other => panic!("expected uncaught exception, got {:?}", other),
    }
}

#[test]
fn test_vm_uncaught_exception_carries_position() {
    let unit = compile(&program(vec![
        let_("x", int(1)),
        throw(string("boom")).at(2),
    ]))
    .unwrap();
    match Vm::new(&unit, VmConfig::default()).run() {
        Err(RuntimeError::UncaughtException { message, span }) => {
            assert_eq!(message, "boom");
            assert_eq!(span.line, 2);
        }
        other => panic!("expected uncaught exception, got {:?}", other),
    }
}

// --- Collections and structs ---

#[test]
fn test_vm_arrays_and_maps() {
    let value = run_ok(vec![
        let_("xs", array(vec![int(1), int(2)])),
        expr_stmt(call(var("push"), vec![var("xs"), int(3)])),
        expr_stmt(assign(index(var("xs"), int(0)), int(10))),
        let_("m", hash(vec![(string("k"), int(5))])),
        expr_stmt(assign(index(var("m"), string("j")), int(6))),
        expr_stmt(add(
            add(index(var("xs"), int(0)), index(var("xs"), int(2))),
            add(index(var("m"), string("k")), member(var("m"), "j")),
        )),
    ]);
    assert_eq!(value, Value::Int(24));

    assert_eq!(
        run_ok(vec![expr_stmt(index(array(vec![int(1)]), int(5)))]),
        Value::Null
    );
    assert_eq!(
        run_ok(vec![expr_stmt(call(var("len"), vec![string("héllo")]))]),
        Value::Int(5)
    );
}

#[test]
fn test_vm_array_write_out_of_bounds() {
    let result = compile_and_run(vec![
        let_("xs", array(vec![int(1)])),
        expr_stmt(assign(index(var("xs"), int(3)), int(0))),
    ]);
    assert!(matches!(
        result,
        Err(RuntimeError::IndexOutOfBounds {
            index: 3,
            length: 1,
            ..
        })
    ));
}

#[test]
fn test_vm_struct_fields() {
    let value = run_ok(vec![
        struct_decl("Point", &["x", "y"]),
        let_("p", call(var("Point"), vec![int(1), int(2)])),
        expr_stmt(assign(member(var("p"), "x"), int(10))),
        expr_stmt(add(member(var("p"), "x"), member(var("p"), "y"))),
    ]);
    assert_eq!(value, Value::Int(12));

    let partial = run_ok(vec![
        struct_decl("Point", &["x", "y"]),
        expr_stmt(member(call(var("Point"), vec![int(1)]), "y")),
    ]);
    assert_eq!(partial, Value::Null);

    let type_name = run_ok(vec![
        struct_decl("Point", &["x", "y"]),
        expr_stmt(call(var("type"), vec![call(var("Point"), vec![])])),
    ]);
    assert_eq!(type_name, Value::String("Point".into()));
}

#[test]
fn test_vm_struct_unknown_field() {
    let read = compile_and_run(vec![
        struct_decl("Point", &["x", "y"]),
        expr_stmt(member(call(var("Point"), vec![]), "z")),
    ]);
    assert!(matches!(read, Err(RuntimeError::NoSuchField { ref field, .. }) if field == "z"));

    let write = compile_and_run(vec![
        struct_decl("Point", &["x", "y"]),
        let_("p", call(var("Point"), vec![])),
        expr_stmt(assign(member(var("p"), "z"), int(1))),
    ]);
    assert!(matches!(write, Err(RuntimeError::NoSuchField { .. })));
}

// --- Compile errors ---

#[test]
fn test_vm_compile_errors() {
    assert!(matches!(
        compile_err(vec![expr_stmt(var("nope"))]),
        CompileError::UndefinedVariable(ref name, _) if name == "nope"
    ));
    assert!(matches!(
        compile_err(vec![
            const_("c", int(1)),
            expr_stmt(assign(var("c"), int(2))),
        ]),
        CompileError::AssignToConst(..)
    ));
    assert!(matches!(
        compile_err(vec![expr_stmt(iife(vec![
            let_("x", int(1)),
            expr_stmt(iife(vec![expr_stmt(assign(var("x"), int(2)))])),
        ]))]),
        CompileError::AssignToCaptured(ref name, _) if name == "x"
    ));
    assert!(matches!(
        compile_err(vec![break_()]),
        CompileError::BreakOutsideLoop(_)
    ));
    assert!(matches!(
        compile_err(vec![continue_()]),
        CompileError::ContinueOutsideLoop(_)
    ));
    assert!(matches!(
        compile_err(vec![let_typed("n", ty("int"), string("x"))]),
        CompileError::TypeMismatch { .. }
    ));
    assert!(matches!(
        compile_err(vec![expr_stmt(assign(int(1), int(2)))]),
        CompileError::InvalidAssignmentTarget(_)
    ));
    assert!(matches!(
        compile_err(vec![expr_stmt(spawn(int(1)))]),
        CompileError::InvalidSpawn(_)
    ));
    assert!(matches!(
        compile_err(vec![Stmt::new(
            StmtKind::Function(function_decl(None, &[], vec![])),
            Span::default(),
        )]),
        CompileError::MissingFunctionName(_)
    ));
}

#[test]
fn test_vm_int_widens_to_float_annotation() {
    let value = run_ok(vec![
        let_typed("f", ty("float"), int(1)),
        expr_stmt(var("f")),
    ]);
    assert_eq!(value, Value::Int(1));
}

#[test]
fn test_vm_break_inside_function_inside_loop_is_rejected() {
    let err = compile_err(vec![while_(
        boolean(true),
        expr_stmt(iife(vec![break_()])),
    )]);
    assert!(matches!(err, CompileError::BreakOutsideLoop(_)));
}

// --- Serialization ---

#[test]
fn test_vm_serialized_unit_runs_the_same() {
    let unit = compile(&program(vec![
        fn_decl(
            "fib",
            &["n"],
            vec![
                if_(less(var("n"), int(2)), ret(var("n")), None),
                ret(add(
                    call(var("fib"), vec![sub(var("n"), int(1))]),
                    call(var("fib"), vec![sub(var("n"), int(2))]),
                )),
            ],
        ),
        expr_stmt(call(var("fib"), vec![int(15)])),
    ]))
    .unwrap();
    let decoded = deserialize(&serialize(&unit).unwrap()).unwrap();
    assert_eq!(decoded, unit);

    let direct = Vm::new(&unit, VmConfig::default()).run().unwrap();
    let loaded = Vm::new(&decoded, VmConfig::default()).run().unwrap();
    assert_eq!(direct, Value::Int(610));
    assert_eq!(loaded, direct);
}

// --- Limits ---

#[test]
fn test_vm_stack_overflow() {
    let config = VmConfig::default().with_stack_size(4);
    let result = run_with_config(
        vec![expr_stmt(array((0..10).map(int).collect()))],
        config,
    );
    assert!(matches!(result, Err(RuntimeError::StackOverflow(_))));
}

#[test]
fn test_vm_frame_overflow() {
    let config = VmConfig::default().with_max_frames(16);
    let result = run_with_config(
        vec![
            fn_decl(
                "down",
                &["n"],
                vec![ret(call(var("down"), vec![add(var("n"), int(1))]))],
            ),
            expr_stmt(call(var("down"), vec![int(0)])),
        ],
        config,
    );
    assert!(matches!(result, Err(RuntimeError::FrameOverflow(_))));
}

// --- Modules ---

#[test]
fn test_vm_import_through_loader() {
    let mut exports = IndexMap::new();
    exports.insert("answer".to_string(), Value::Int(42));
    let loader = StaticLoader::new().with_module("lib/answers", exports);

    let unit = compile(&program(vec![
        import("lib/answers", "answers"),
        expr_stmt(member(var("answers"), "answer")),
    ]))
    .unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default()).with_loader(Arc::new(loader));
    assert_eq!(vm.run().unwrap(), Value::Int(42));
}

#[test]
fn test_vm_import_without_loader() {
    let result = compile_and_run(vec![import("missing", "m")]);
    assert!(matches!(
        result,
        Err(RuntimeError::UnresolvedImport { ref path, .. }) if path == "missing"
    ));
}

#[test]
fn test_vm_import_binding_is_constant() {
    let err = compile_err(vec![
        import("m", "m"),
        expr_stmt(assign(var("m"), int(1))),
    ]);
    assert!(matches!(err, CompileError::AssignToConst(..)));
}

// --- Concurrency ---

#[test]
fn test_vm_spawn_await_matches_direct_call() {
    let value = run_ok(vec![
        fn_decl("f", &["a", "b"], vec![ret(mul(var("a"), var("b")))]),
        let_("direct", call(var("f"), vec![int(6), int(7)])),
        let_("spawned", await_(spawn(call(var("f"), vec![int(6), int(7)])))),
        expr_stmt(eq(var("direct"), var("spawned"))),
    ]);
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn test_vm_spawned_tasks_share_globals() {
    let value = run_ok(vec![
        let_("seen", int(0)),
        fn_decl("mark", &[], vec![expr_stmt(assign(var("seen"), int(99)))]),
        expr_stmt(await_(spawn(call(var("mark"), vec![])))),
        expr_stmt(var("seen")),
    ]);
    assert_eq!(value, Value::Int(99));
}

#[test]
fn test_vm_channel_race_delivers_every_value() {
    let value = run_ok(vec![
        let_("ch", call(var("channel"), vec![int(1)])),
        fn_decl(
            "sender",
            &["v"],
            vec![expr_stmt(call(var("send"), vec![var("ch"), var("v")]))],
        ),
        let_("t1", spawn(call(var("sender"), vec![int(1)]))),
        let_("t2", spawn(call(var("sender"), vec![int(2)]))),
        let_("a", call(var("recv"), vec![var("ch")])),
        let_("b", call(var("recv"), vec![var("ch")])),
        expr_stmt(await_(var("t1"))),
        expr_stmt(await_(var("t2"))),
        expr_stmt(array(vec![var("a"), var("b")])),
    ]);

    let Value::Array(items) = value else {
        panic!("expected an array");
    };
    let mut received: Vec<i64> = items
        .read()
        .unwrap()
        .iter()
        .map(|v| match v {
            Value::Int(n) => *n,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    received.sort_unstable();
    assert_eq!(received, vec![1, 2]);
}

#[test]
fn test_vm_failed_task_reports_on_await() {
    let result = compile_and_run(vec![
        fn_decl("explode", &[], vec![throw(string("bang"))]),
        expr_stmt(await_(spawn(call(var("explode"), vec![])))),
    ]);
    assert!(matches!(result, Err(RuntimeError::TaskFailed { .. })));
}

#[test]
fn test_vm_await_plain_value_passes_through() {
    assert_eq!(run_ok(vec![expr_stmt(await_(int(4)))]), Value::Int(4));
}

#[test]
fn test_vm_async_function_and_timer_ordering() {
    let unit = compile(&program(vec![
        expr_stmt(call(
            var("setTimeout"),
            vec![
                func(&[], vec![expr_stmt(call(var("print"), vec![string("timeout")]))]),
                int(20),
            ],
        )),
        async_fn_decl(
            "work",
            &[],
            vec![expr_stmt(call(var("print"), vec![string("async")]))],
        ),
        expr_stmt(call(var("work"), vec![])),
        expr_stmt(call(var("print"), vec![string("sync")])),
    ]))
    .unwrap();

    let mut vm = Vm::new(&unit, VmConfig::default()).capture_output();
    vm.run().unwrap();
    assert_eq!(vm.output().to_vec(), vec!["sync", "async", "timeout"]);
}

#[test]
fn test_vm_await_async_result() {
    let value = run_ok(vec![
        async_fn_decl("double", &["x"], vec![ret(mul(var("x"), int(2)))]),
        expr_stmt(await_(call(var("double"), vec![int(21)]))),
    ]);
    assert_eq!(value, Value::Int(42));

    let slept = run_ok(vec![
        expr_stmt(await_(call(var("sleep"), vec![int(5)]))),
        expr_stmt(string("done")),
    ]);
    assert_eq!(slept, Value::String("done".into()));
}

#[test]
fn test_vm_async_rejection_is_catchable() {
    let value = run_ok(vec![
        let_("r", null()),
        async_fn_decl("bad", &[], vec![throw(string("nope"))]),
        try_catch(
            vec![expr_stmt(await_(call(var("bad"), vec![])))],
            Some("e"),
            vec![expr_stmt(assign(var("r"), var("e")))],
        ),
        expr_stmt(var("r")),
    ]);
    assert_eq!(value, Value::String("nope".into()));
}

#[test]
fn test_vm_uncaught_throw_in_timer_is_fatal() {
    let result = compile_and_run(vec![expr_stmt(call(
        var("setTimeout"),
        vec![func(&[], vec![throw(string("late"))]), int(0)],
    ))]);
    assert!(matches!(
        result,
        Err(RuntimeError::UncaughtException { ref message, .. }) if message == "late"
    ));
}

#[test]
fn test_vm_timer_delay_out_of_range_is_an_error() {
    let result = compile_and_run(vec![expr_stmt(call(
        var("setTimeout"),
        vec![func(&[], vec![]), div(float(1.0), float(1e-320))],
    ))]);
    assert!(matches!(result, Err(RuntimeError::TypeError { .. })));

    let result = compile_and_run(vec![expr_stmt(call(var("sleep"), vec![float(1e300)]))]);
    assert!(matches!(result, Err(RuntimeError::TypeError { .. })));

    let result = compile_and_run(vec![expr_stmt(call(var("sleep"), vec![int(i64::MAX)]))]);
    assert!(
        matches!(result, Err(RuntimeError::General { ref message, .. }) if message.contains("out of range"))
    );
}

#[test]
fn test_vm_channel_capacity_is_capped() {
    let result = compile_and_run(vec![expr_stmt(call(var("channel"), vec![int(i64::MAX)]))]);
    assert!(
        matches!(result, Err(RuntimeError::General { ref message, .. }) if message.contains("channel capacity"))
    );

    let value = run_ok(vec![
        let_("ch", call(var("channel"), vec![int(4)])),
        expr_stmt(call(var("send"), vec![var("ch"), int(9)])),
        expr_stmt(call(var("recv"), vec![var("ch")])),
    ]);
    assert_eq!(value, Value::Int(9));
}

#[test]
fn test_vm_print_self_containing_array() {
    let unit = compile(&program(vec![
        let_("a", array(vec![int(1)])),
        expr_stmt(call(var("push"), vec![var("a"), var("a")])),
        expr_stmt(call(var("print"), vec![var("a")])),
    ]))
    .unwrap();
    let mut vm = Vm::new(&unit, VmConfig::default()).capture_output();
    vm.run().unwrap();
    assert_eq!(vm.output().to_vec(), vec!["[1, [...]]"]);
}

#[test]
fn test_vm_uncaught_self_containing_array() {
    let result = compile_and_run(vec![
        let_("a", array(vec![])),
        expr_stmt(call(var("push"), vec![var("a"), var("a")])),
        throw(var("a")),
    ]);
    assert!(
        matches!(result, Err(RuntimeError::UncaughtException { ref message, .. }) if message == "[[...]]")
    );
}
