//! The AST optimizer / constant folder: a bottom-up, idempotent tree
//! rewrite that must never change observable behavior.

use crate::common::ast::*;

/// Runs the constant folder over a parsed program. `enabled` is the CLI's
/// `--no-optimize` escape hatch; when `false`, the tree is returned
/// untouched.
pub fn optimize(program: Stmt, enabled: bool) -> Stmt {
    if !enabled {
        return program;
    }
    fold_stmt(program)
}

fn fold_stmt(stmt: Stmt) -> Stmt {
    let Stmt { kind, token } = stmt;
    let kind = match kind {
        StmtKind::Expr(e) => StmtKind::Expr(fold_expr(e)),
        StmtKind::VarDecl { privilege, bindings } => StmtKind::VarDecl {
            privilege,
            bindings: bindings
                .into_iter()
                .map(|(binder, init)| (binder, init.map(fold_expr)))
                .collect(),
        },
        StmtKind::Return(e) => StmtKind::Return(e.map(fold_expr)),
        StmtKind::If { cond, then, otherwise } => {
            let cond = fold_expr(cond);
            let then = Box::new(fold_stmt(*then));
            let otherwise = otherwise.map(|o| Box::new(fold_stmt(*o)));
            match literal_bool(&cond) {
                Some(true) => return *then,
                Some(false) => {
                    return match otherwise {
                        Some(o) => *o,
                        None => Stmt::new(StmtKind::Noop, token),
                    }
                }
                None => StmtKind::If { cond, then, otherwise },
            }
        }
        StmtKind::Block(stmts) => StmtKind::Block(stmts.into_iter().map(fold_stmt).collect()),
        StmtKind::While { cond, body, increment } => StmtKind::While {
            cond: fold_expr(cond),
            body: Box::new(fold_stmt(*body)),
            increment: increment.map(|b| Box::new(fold_stmt(*b))),
        },
        StmtKind::Function { name, params, body } => StmtKind::Function {
            name,
            params,
            body: body.into_iter().map(fold_stmt).collect(),
        },
        StmtKind::Class { name, parents, members, methods, constructors, enums } => StmtKind::Class {
            name,
            parents,
            members: members.into_iter().map(fold_stmt).collect(),
            methods: methods.into_iter().map(fold_stmt).collect(),
            constructors: constructors.into_iter().map(fold_stmt).collect(),
            enums: enums.into_iter().map(fold_stmt).collect(),
        },
        StmtKind::Module { name, body } => {
            StmtKind::Module { name, body: body.into_iter().map(fold_stmt).collect() }
        }
        StmtKind::Program(stmts) => StmtKind::Program(stmts.into_iter().map(fold_stmt).collect()),
        other => other, // Break, Continue, Enum, Noop
    };
    Stmt::new(kind, token)
}

fn literal_bool(expr: &Expr) -> Option<bool> {
    match &expr.kind {
        ExprKind::Literal(Literal::Bool(b)) => Some(*b),
        ExprKind::Group(inner) => literal_bool(inner),
        _ => None,
    }
}

fn fold_expr(expr: Expr) -> Expr {
    let Expr { kind, token } = expr;
    match kind {
        ExprKind::Group(inner) => {
            // `group(e)` becomes `e`.
            fold_expr(*inner)
        }
        ExprKind::Prefix { op, right } => {
            let right = fold_expr(*right);
            match fold_prefix(op, &right) {
                Some(literal) => Expr::new(ExprKind::Literal(literal), token),
                None => Expr::new(ExprKind::Prefix { op, right: Box::new(right) }, token),
            }
        }
        ExprKind::Factorial { left } => {
            let left = fold_expr(*left);
            match fold_factorial(&left) {
                Some(literal) => Expr::new(ExprKind::Literal(literal), token),
                None => Expr::new(ExprKind::Factorial { left: Box::new(left) }, token),
            }
        }
        ExprKind::Infix { op, left, right } => {
            let left = fold_expr(*left);
            let right = fold_expr(*right);
            match fold_infix(op, &left, &right) {
                Some(literal) => Expr::new(ExprKind::Literal(literal), token),
                None => Expr::new(
                    ExprKind::Infix { op, left: Box::new(left), right: Box::new(right) },
                    token,
                ),
            }
        }
        ExprKind::Conditional { cond, then, otherwise } => {
            let cond = fold_expr(*cond);
            let then = fold_expr(*then);
            let otherwise = fold_expr(*otherwise);
            match literal_bool(&cond) {
                Some(true) => then,
                Some(false) => otherwise,
                None => Expr::new(
                    ExprKind::Conditional {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                    token,
                ),
            }
        }
        ExprKind::Index { target, index } => Expr::new(
            ExprKind::Index { target: Box::new(fold_expr(*target)), index: Box::new(fold_expr(*index)) },
            token,
        ),
        ExprKind::Member { target, name } => {
            Expr::new(ExprKind::Member { target: Box::new(fold_expr(*target)), name }, token)
        }
        ExprKind::Call { callee, args } => Expr::new(
            ExprKind::Call {
                callee: Box::new(fold_expr(*callee)),
                args: args.into_iter().map(fold_expr).collect(),
            },
            token,
        ),
        ExprKind::Lambda { params, body } => Expr::new(
            ExprKind::Lambda { params, body: body.into_iter().map(fold_stmt).collect() },
            token,
        ),
        ExprKind::Array(elements) => {
            Expr::new(ExprKind::Array(elements.into_iter().map(fold_expr).collect()), token)
        }
        ExprKind::Dict(pairs) => Expr::new(
            ExprKind::Dict(pairs.into_iter().map(|(k, v)| (fold_expr(k), fold_expr(v))).collect()),
            token,
        ),
        ExprKind::Ref(inner) => Expr::new(ExprKind::Ref(Box::new(fold_expr(*inner))), token),
        ExprKind::NewCall { class_name, args } => Expr::new(
            ExprKind::NewCall { class_name, args: args.into_iter().map(fold_expr).collect() },
            token,
        ),
        ExprKind::NewStruct { class_name, fields } => Expr::new(
            ExprKind::NewStruct {
                class_name,
                fields: fields.into_iter().map(|(k, v)| (k, fold_expr(v))).collect(),
            },
            token,
        ),
        ExprKind::Compound { stmts, tail } => Expr::new(
            ExprKind::Compound {
                stmts: stmts.into_iter().map(fold_stmt).collect(),
                tail: Box::new(fold_expr(*tail)),
            },
            token,
        ),
        ExprKind::StructLiteral(fields) => Expr::new(
            ExprKind::StructLiteral(fields.into_iter().map(|(k, v)| (k, fold_expr(v))).collect()),
            token,
        ),
        other => Expr::new(other, token), // Literal, Identifier, VarDescriptor, This, Base, VarArg
    }
}

fn fold_prefix(op: PrefixOp, right: &Expr) -> Option<Literal> {
    match (op, &right.kind) {
        (PrefixOp::Neg, ExprKind::Literal(Literal::Int(n))) => Some(Literal::Int(-n)),
        (PrefixOp::Neg, ExprKind::Literal(Literal::Float(n))) => Some(Literal::Float(-n)),
        (PrefixOp::Not, ExprKind::Literal(Literal::Bool(b))) => Some(Literal::Bool(!b)),
        (PrefixOp::BitNot, ExprKind::Literal(Literal::Int(n))) => Some(Literal::Int(!n)),
        _ => None,
    }
}

/// Postfix `!` on a non-negative integer literal: `x!` becomes the
/// factorial. Left unfolded for anything else, including negative
/// integers (whose factorial is undefined).
fn fold_factorial(left: &Expr) -> Option<Literal> {
    match &left.kind {
        ExprKind::Literal(Literal::Int(n)) if *n >= 0 => {
            let mut acc: i64 = 1;
            for i in 2..=*n {
                acc = acc.checked_mul(i)?;
            }
            Some(Literal::Int(acc))
        }
        _ => None,
    }
}

fn fold_infix(op: InfixOp, left: &Expr, right: &Expr) -> Option<Literal> {
    use InfixOp::*;

    if op.is_assign() {
        return None; // assignments have side effects, never folded
    }

    if let (ExprKind::Literal(Literal::Str(a)), ExprKind::Literal(Literal::Str(b))) =
        (&left.kind, &right.kind)
    {
        if op == Add {
            return Some(Literal::Str(format!("{}{}", a, b)));
        }
        return None;
    }

    let (a, b) = match (numeric(left), numeric(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => return None,
    };

    match op {
        Add | Sub | Mul | Div | Mod => fold_arith(op, a, b),
        BitAnd | BitOr | BitXor | Shl | Shr => fold_bitwise(op, a, b),
        Eq | Ne | Lt | Le | Gt | Ge => fold_compare(op, a, b),
        And | Or => None, // operands must already be literal bools, handled by `numeric` returning None
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn numeric(expr: &Expr) -> Option<Num> {
    match &expr.kind {
        ExprKind::Literal(Literal::Int(n)) => Some(Num::Int(*n)),
        ExprKind::Literal(Literal::Float(n)) => Some(Num::Float(*n)),
        _ => None,
    }
}

fn fold_arith(op: InfixOp, a: Num, b: Num) -> Option<Literal> {
    use InfixOp::*;
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => {
            // integer division/modulus by zero are left unfolded, so the
            // runtime error surfaces at the same point regardless of
            // whether folding ran
            if matches!(op, Div | Mod) && b == 0 {
                return None;
            }
            Some(Literal::Int(match op {
                Add => a.checked_add(b)?,
                Sub => a.checked_sub(b)?,
                Mul => a.checked_mul(b)?,
                Div => a.checked_div(b)?,
                Mod => a.checked_rem(b)?,
                _ => unreachable!(),
            }))
        }
        (a, b) => {
            let a = as_f64(a);
            let b = as_f64(b);
            Some(Literal::Float(match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                Mod => a % b,
                _ => unreachable!(),
            }))
        }
    }
}

fn fold_bitwise(op: InfixOp, a: Num, b: Num) -> Option<Literal> {
    use InfixOp::*;
    let (a, b) = match (a, b) {
        (Num::Int(a), Num::Int(b)) => (a, b),
        _ => return None, // bitwise ops require two integers
    };
    Some(Literal::Int(match op {
        BitAnd => a & b,
        BitOr => a | b,
        BitXor => a ^ b,
        Shl => a.checked_shl(b as u32)?,
        Shr => a.checked_shr(b as u32)?,
        _ => unreachable!(),
    }))
}

fn fold_compare(op: InfixOp, a: Num, b: Num) -> Option<Literal> {
    use InfixOp::*;
    let ordering = match (a, b) {
        (Num::Int(a), Num::Int(b)) => a.partial_cmp(&b),
        (a, b) => as_f64(a).partial_cmp(&as_f64(b)),
    }?;
    use std::cmp::Ordering::*;
    Some(Literal::Bool(match op {
        Eq => ordering == Equal,
        Ne => ordering != Equal,
        Lt => ordering == Less,
        Le => ordering != Greater,
        Gt => ordering == Greater,
        Ge => ordering != Less,
        _ => unreachable!(),
    }))
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::lex::Lexer;
    use crate::compiler::parse::Parser;

    fn optimized(src: &str) -> Stmt {
        let tokens = Lexer::lex(src).unwrap();
        let ast = Parser::parse(tokens).unwrap();
        optimize(ast, true)
    }

    fn first_expr(program: &Stmt) -> &Expr {
        match &program.kind {
            StmtKind::Program(stmts) => match &stmts[0].kind {
                StmtKind::Expr(e) => e,
                _ => panic!("expected an expression statement"),
            },
            _ => panic!("expected a program"),
        }
    }

    #[test]
    fn folds_integer_arithmetic() {
        let program = optimized("1 + 2 * 3;");
        assert_eq!(first_expr(&program).kind, ExprKind::Literal(Literal::Int(7)));
    }

    #[test]
    fn folds_string_concat() {
        let program = optimized("\"a\" + \"b\";");
        assert_eq!(first_expr(&program).kind, ExprKind::Literal(Literal::Str("ab".to_string())));
    }

    #[test]
    fn leaves_division_by_zero_unfolded() {
        let program = optimized("1 / 0;");
        assert!(matches!(first_expr(&program).kind, ExprKind::Infix { .. }));
    }

    #[test]
    fn folds_prefix_negation() {
        let program = optimized("-5;");
        assert_eq!(first_expr(&program).kind, ExprKind::Literal(Literal::Int(-5)));
    }

    #[test]
    fn folds_factorial() {
        let program = optimized("5!;");
        assert_eq!(first_expr(&program).kind, ExprKind::Literal(Literal::Int(120)));
    }

    #[test]
    fn removes_trivial_group() {
        let program = optimized("(42);");
        assert_eq!(first_expr(&program).kind, ExprKind::Literal(Literal::Int(42)));
    }

    #[test]
    fn prunes_if_on_literal_true() {
        let tokens = Lexer::lex("if(true) 1; else 2;").unwrap();
        let ast = Parser::parse(tokens).unwrap();
        let optimized = optimize(ast, true);
        if let StmtKind::Program(stmts) = optimized.kind {
            assert!(matches!(stmts[0].kind, StmtKind::Expr(_)));
            if let StmtKind::Expr(e) = &stmts[0].kind {
                assert_eq!(e.kind, ExprKind::Literal(Literal::Int(1)));
            }
        } else {
            panic!("expected a program");
        }
    }

    #[test]
    fn prunes_if_on_literal_false_without_else() {
        let tokens = Lexer::lex("if(false) 1;").unwrap();
        let ast = Parser::parse(tokens).unwrap();
        let optimized = optimize(ast, true);
        if let StmtKind::Program(stmts) = optimized.kind {
            assert_eq!(stmts[0].kind, StmtKind::Noop);
        } else {
            panic!("expected a program");
        }
    }

    #[test]
    fn disabled_optimizer_is_a_no_op() {
        let tokens = Lexer::lex("1 + 2;").unwrap();
        let ast = Parser::parse(tokens).unwrap();
        let untouched = optimize(ast.clone(), false);
        assert_eq!(untouched, ast);
    }
}
