//! Property-based tests for the pipeline's core determinism and
//! soundness properties, using `proptest` (see `Cargo.toml`) rather than
//! exhaustive fuzzing.

use proptest::prelude::*;

use lwscript::common::frame::Frame;
use lwscript::common::token::TokenKind;
use lwscript::compiler::compile::Compiler;
use lwscript::compiler::lex::Lexer;
use lwscript::compiler::optimize::optimize;
use lwscript::compiler::parse::Parser;
use lwscript::common::value::Value;

/// A single lexable unit: its lexeme and the [`TokenKind`] it must produce.
/// Kept to a closed, known-safe set so joining several with single spaces
/// can never accidentally fuse into a different token (e.g. two adjacent
/// `=` lexemes becoming `==`) or land on a reserved word by chance.
#[derive(Debug, Clone)]
struct Sample {
    lexeme: &'static str,
    kind_eq: fn(&TokenKind) -> bool,
}

fn samples() -> impl Strategy<Value = Sample> {
    let table: &[(&'static str, fn(&TokenKind) -> bool)] = &[
        ("1", |k| matches!(k, TokenKind::Integer(1))),
        ("42", |k| matches!(k, TokenKind::Integer(42))),
        ("foo", |k| matches!(k, TokenKind::Identifier(n) if n == "foo")),
        ("bar", |k| matches!(k, TokenKind::Identifier(n) if n == "bar")),
        ("+", |k| matches!(k, TokenKind::Plus)),
        ("-", |k| matches!(k, TokenKind::Minus)),
        ("*", |k| matches!(k, TokenKind::Star)),
        ("==", |k| matches!(k, TokenKind::EqEq)),
        ("=", |k| matches!(k, TokenKind::Eq)),
        ("(", |k| matches!(k, TokenKind::LParen)),
        (")", |k| matches!(k, TokenKind::RParen)),
        (",", |k| matches!(k, TokenKind::Comma)),
        ("let", |k| matches!(k, TokenKind::Let)),
        ("true", |k| matches!(k, TokenKind::True)),
        ("false", |k| matches!(k, TokenKind::False)),
        ("nil", |k| matches!(k, TokenKind::Nil)),
    ];
    (0..table.len()).prop_map(move |i| Sample { lexeme: table[i].0, kind_eq: table[i].1 })
}

proptest! {
    /// Property 1: concatenating token lexemes with single spaces and
    /// relexing yields the same kind sequence (ignoring the trailing `End`
    /// sentinel both sides produce).
    #[test]
    fn lexer_round_trip(tokens in prop::collection::vec(samples(), 0..12)) {
        let source = tokens.iter().map(|t| t.lexeme).collect::<Vec<_>>().join(" ");
        let relexed = Lexer::lex(&source).expect("a concatenation of known-good lexemes always lexes");
        let relexed_kinds: Vec<&TokenKind> = relexed.iter().map(|t| &t.kind).filter(|k| !matches!(k, TokenKind::End)).collect();
        prop_assert_eq!(relexed_kinds.len(), tokens.len());
        for (kind, expected) in relexed_kinds.iter().zip(tokens.iter()) {
            prop_assert!((expected.kind_eq)(kind));
        }
    }

    /// Property 2: the same token stream always yields an AST equal by
    /// deep value comparison (`Expr`/`Stmt` derive `PartialEq`).
    #[test]
    fn parser_determinism(n in 0i64..1000, m in 0i64..1000) {
        let source = format!("let a = {n} + {m} * 2; return a;");
        let tokens_a = Lexer::lex(&source).unwrap();
        let tokens_b = Lexer::lex(&source).unwrap();
        let ast_a = Parser::parse(tokens_a).unwrap();
        let ast_b = Parser::parse(tokens_b).unwrap();
        prop_assert_eq!(ast_a, ast_b);
    }

    /// Property 4: the same AST produces the same bytecode, modulo nothing
    /// (frame-index ordering is already stable — pools are append-only and
    /// never deduped, see `Frame::add_int`).
    #[test]
    fn compiler_determinism(n in 0i64..1000, m in 0i64..1000) {
        let source = format!("let a = {n} + {m} * 2; if (a > 0) {{ return a; }} return 0;");
        let tokens = Lexer::lex(&source).unwrap();
        let ast = Parser::parse(tokens).unwrap();
        let frame_a = Compiler::compile(&ast).unwrap();
        let frame_b = Compiler::compile(&ast).unwrap();
        prop_assert!(frames_equal(&frame_a, &frame_b));
    }

    /// Property 3: for a program with no division/modulus by zero and no
    /// side-effecting initializer, optimizing before compiling must not
    /// change what the program computes.
    #[test]
    fn optimizer_soundness(n in 1i64..50, m in 1i64..50) {
        let source = format!("let a = {n} + {m} * 2 - {n} / {m}; if (a > 0) {{ return a; }} else {{ return -a; }}");

        let tokens = Lexer::lex(&source).unwrap();
        let ast = Parser::parse(tokens).unwrap();

        let unoptimized = optimize(ast.clone(), false);
        let optimized = optimize(ast, true);

        let frame_unopt = Compiler::compile(&unoptimized).unwrap();
        let frame_opt = Compiler::compile(&optimized).unwrap();

        let mut vm_unopt = lwscript::vm::vm::VM::new();
        let mut vm_opt = lwscript::vm::vm::VM::new();
        let result_unopt = vm_unopt.interpret(std::rc::Rc::new(frame_unopt)).unwrap();
        let result_opt = vm_opt.interpret(std::rc::Rc::new(frame_opt)).unwrap();

        prop_assert!(values_equal(&result_unopt, &result_opt));
    }
}

/// Structural equality for [`Frame`], which deliberately doesn't derive
/// `PartialEq` itself (its `functions`/`classes`/`methods` tables hold
/// `Rc<Frame>`, and production code never needs to compare two frames —
/// only this determinism property does).
fn frames_equal(a: &Frame, b: &Frame) -> bool {
    a.code == b.code
        && a.ints == b.ints
        && a.floats == b.floats
        && a.strings == b.strings
        && a.params == b.params
        && a.var_arg == b.var_arg
        && a.parents == b.parents
        && named_frames_equal(&a.functions, &b.functions)
        && named_frames_equal(&a.classes, &b.classes)
        && named_frames_equal(&a.methods, &b.methods)
}

fn named_frames_equal(a: &std::collections::HashMap<String, std::rc::Rc<Frame>>, b: &std::collections::HashMap<String, std::rc::Rc<Frame>>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|other| frames_equal(v, other)))
}

/// Value equality for the property test above, which only ever compares
/// scalars a folding optimizer could produce (`Int`/`Bool`); anything else
/// is a test-authoring mistake, not a property failure, so it panics
/// rather than silently reporting `false`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        _ => panic!("optimizer_soundness only expects Int/Bool/Nil results, found {a:?} and {b:?}"),
    }
}
