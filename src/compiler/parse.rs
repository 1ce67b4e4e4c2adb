//! A Pratt (precedence-climbing) parser over lwscript's grammar:
//! statements, `let`/`const` with destructuring, `if`/`while`/`for`
//! (the latter desugared to `while` here), functions, lambdas, classes.

use crate::common::ast::*;
use crate::common::token::{Token, TokenKind};
use crate::error::ParseError;

/// Precedence levels, lowest to highest:
/// `LOWEST < ASSIGN < CONDITION < OR < AND < BIT_OR < BIT_XOR < BIT_AND <
/// EQUAL < COMPARE < BIT_SHIFT < ADD_SUB < MUL_DIV_MOD < PREFIX <
/// POSTFIX/CALL/INDEX/DOT`.
///
/// Levels are spaced two apart so right-associative operators (`ASSIGN`)
/// can bind their right operand at the same level (via binding power `(L,
/// L)`) while left-associative operators bind theirs one tighter (`(L, L +
/// 1)`) — the standard "binding power" Pratt-parsing technique.
mod level {
    pub const LOWEST: u8 = 0;
    pub const ASSIGN: u8 = 2;
    pub const CONDITION: u8 = 4;
    pub const OR: u8 = 6;
    pub const AND: u8 = 8;
    pub const BIT_OR: u8 = 10;
    pub const BIT_XOR: u8 = 12;
    pub const BIT_AND: u8 = 14;
    pub const EQUAL: u8 = 16;
    pub const COMPARE: u8 = 18;
    pub const BIT_SHIFT: u8 = 20;
    pub const ADD_SUB: u8 = 22;
    pub const MUL_DIV_MOD: u8 = 24;
    pub const PREFIX: u8 = 26;
    pub const POSTFIX: u8 = 28;
}

/// Returns `(left_binding_power, right_binding_power)` for an infix-position
/// token, or `None` if it cannot start an infix expression.
///
/// Left-associative: `right_bp = left_bp + 1` (a same-level op on the right
/// won't satisfy the next recursive call's `min_bp`, so chains fold left).
/// Right-associative (`=` family): `right_bp = left_bp` (a same-level op on
/// the right is accepted, so chains fold right: `a = b = c` is `a = (b = c)`).
fn infix_binding_power(kind: &TokenKind) -> Option<(u8, u8)> {
    use level::*;
    use TokenKind::*;
    Some(match kind {
        Eq | PlusEq | MinusEq | StarEq | SlashEq | PercentEq | AmpEq | PipeEq | CaretEq
        | ShlEq | ShrEq => (ASSIGN, ASSIGN),
        Question => (CONDITION, CONDITION),
        PipePipe => (OR, OR + 1),
        AmpAmp => (AND, AND + 1),
        Pipe => (BIT_OR, BIT_OR + 1),
        Caret => (BIT_XOR, BIT_XOR + 1),
        Amp => (BIT_AND, BIT_AND + 1),
        EqEq | NotEq => (EQUAL, EQUAL + 1),
        Lt | Le | Gt | Ge => (COMPARE, COMPARE + 1),
        Shl | Shr => (BIT_SHIFT, BIT_SHIFT + 1),
        Plus | Minus => (ADD_SUB, ADD_SUB + 1),
        Star | Slash | Percent => (MUL_DIV_MOD, MUL_DIV_MOD + 1),
        LParen | LBracket | Dot | Bang => (POSTFIX, POSTFIX + 1),
        _ => return None,
    })
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    /// Parses a complete token stream into the top-level `Program` block.
    pub fn parse(tokens: Vec<Token>) -> Result<Stmt, ParseError> {
        let mut parser = Parser::new(tokens);
        let program = parser.parse_program()?;
        Ok(program)
    }

    fn parse_program(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::End) {
            stmts.push(self.statement()?);
        }
        Ok(Stmt::new(StmtKind::Program(stmts), token))
    }

    // --- token stream primitives ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if !self.check(&TokenKind::End) {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, context: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let found = self.peek().clone();
            Err(ParseError::new(
                found.line,
                format!("expected {} {}, found '{}'", describe(kind), context, found.lexeme),
            ))
        }
    }

    fn identifier_name(&mut self, context: &str) -> Result<(String, Token), ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name.clone(), token))
            }
            _ => Err(ParseError::new(
                token.line,
                format!("expected an identifier {}, found '{}'", context, token.lexeme),
            )),
        }
    }

    // --- statements ---

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Let => self.var_decl(Privilege::Mutable),
            TokenKind::Const => self.var_decl(Privilege::Immutable),
            TokenKind::Return => self.return_stmt(),
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Break => {
                self.advance();
                self.matches(&TokenKind::Semicolon);
                Ok(Stmt::new(StmtKind::Break, token))
            }
            TokenKind::Continue => {
                self.advance();
                self.matches(&TokenKind::Semicolon);
                Ok(Stmt::new(StmtKind::Continue, token))
            }
            TokenKind::LBrace => self.block_stmt(),
            TokenKind::Enum => self.enum_stmt(),
            TokenKind::Function => self.function_stmt(),
            TokenKind::Class => self.class_stmt(),
            TokenKind::Module => self.module_stmt(),
            _ => self.expr_stmt(),
        }
    }

    fn var_descriptor(&mut self) -> Result<VarDescriptor, ParseError> {
        let (name, _) = self.identifier_name("in a variable binder")?;
        let type_desc = if self.matches(&TokenKind::Colon) {
            let (tname, _) = self.identifier_name("as a type annotation")?;
            Some(tname)
        } else {
            None
        };
        Ok(VarDescriptor { name, type_desc })
    }

    fn binder(&mut self) -> Result<Binder, ParseError> {
        if self.matches(&TokenKind::LBracket) {
            let mut elements = Vec::new();
            let mut rest = None;
            while !self.check(&TokenKind::RBracket) {
                if self.matches(&TokenKind::Ellipsis) {
                    rest = Some(self.var_descriptor()?);
                    if !self.check(&TokenKind::RBracket) {
                        let found = self.peek().clone();
                        return Err(ParseError::new(
                            found.line,
                            "a '...rest' binder must be last in a destructuring pattern".to_string(),
                        ));
                    }
                    break;
                }
                elements.push(self.var_descriptor()?);
                if !self.check(&TokenKind::RBracket) {
                    self.consume(&TokenKind::Comma, "between destructuring elements")?;
                }
            }
            self.consume(&TokenKind::RBracket, "to close a destructuring pattern")?;
            Ok(Binder::Destructure { elements, rest })
        } else {
            Ok(Binder::Simple(self.var_descriptor()?))
        }
    }

    fn var_decl(&mut self, privilege: Privilege) -> Result<Stmt, ParseError> {
        let token = self.advance(); // `let` / `const`
        let mut bindings = Vec::new();
        loop {
            let binder = self.binder()?;
            let init = if self.matches(&TokenKind::Eq) {
                Some(self.expression(level::LOWEST)?)
            } else {
                None
            };
            bindings.push((binder, init));
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.matches(&TokenKind::Semicolon);
        Ok(Stmt::new(StmtKind::VarDecl { privilege, bindings }, token))
    }

    fn return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        let value = if self.check(&TokenKind::Semicolon) || self.check(&TokenKind::RBrace) {
            None
        } else {
            Some(self.expression(level::LOWEST)?)
        };
        self.matches(&TokenKind::Semicolon);
        Ok(Stmt::new(StmtKind::Return(value), token))
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        self.consume(&TokenKind::LParen, "after 'if'")?;
        let cond = self.expression(level::LOWEST)?;
        self.consume(&TokenKind::RParen, "after an 'if' condition")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.matches(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::new(StmtKind::If { cond, then, otherwise }, token))
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        self.consume(&TokenKind::LParen, "after 'while'")?;
        let cond = self.expression(level::LOWEST)?;
        self.consume(&TokenKind::RParen, "after a 'while' condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::new(StmtKind::While { cond, body, increment: None }, token))
    }

    /// Desugars `for(init; cond; step…) body` into `{ init; while(cond) body }`
    /// with `step…` carried in the `while`'s `increment` field, so `continue`
    /// (which targets the increment, not the loop top — see `compile.rs`)
    /// still runs the steps before re-testing `cond`.
    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        self.consume(&TokenKind::LParen, "after 'for'")?;

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.statement()?)
        };
        if init.is_none() {
            self.consume(&TokenKind::Semicolon, "after an empty 'for' initializer")?;
        }

        let cond = if self.check(&TokenKind::Semicolon) {
            Expr::new(ExprKind::Literal(Literal::Bool(true)), token.clone())
        } else {
            self.expression(level::LOWEST)?
        };
        self.consume(&TokenKind::Semicolon, "after a 'for' condition")?;

        let mut steps = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let step_token = self.peek().clone();
            let step_expr = self.expression(level::LOWEST)?;
            steps.push(Stmt::new(StmtKind::Expr(step_expr), step_token));
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RParen, "after 'for' clauses")?;

        let body = self.statement()?;
        let increment = if steps.is_empty() { None } else { Some(Box::new(Stmt::new(StmtKind::Block(steps), token.clone()))) };

        let while_stmt = Stmt::new(
            StmtKind::While { cond, body: Box::new(body), increment },
            token.clone(),
        );

        let mut scope = Vec::new();
        if let Some(init) = init {
            scope.push(init);
        }
        scope.push(while_stmt);

        Ok(Stmt::new(StmtKind::Block(scope), token))
    }

    fn block_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance(); // `{`
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::End) {
            stmts.push(self.statement()?);
        }
        self.consume(&TokenKind::RBrace, "to close a block")?;
        Ok(Stmt::new(StmtKind::Block(stmts), token))
    }

    fn enum_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        let (name, _) = self.identifier_name("after 'enum'")?;
        self.consume(&TokenKind::LBrace, "after an enum name")?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let (variant, _) = self.identifier_name("as an enum variant")?;
            variants.push(variant);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RBrace, "to close an enum body")?;
        Ok(Stmt::new(StmtKind::Enum { name, variants }, token))
    }

    fn param_list(&mut self) -> Result<Vec<Param>, ParseError> {
        self.consume(&TokenKind::LParen, "before a parameter list")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if self.matches(&TokenKind::Ellipsis) {
                let descriptor = self.var_descriptor()?;
                params.push(Param { descriptor, var_arg: true });
                break;
            }
            let descriptor = self.var_descriptor()?;
            params.push(Param { descriptor, var_arg: false });
            if !self.check(&TokenKind::RParen) {
                self.consume(&TokenKind::Comma, "between parameters")?;
            }
        }
        self.consume(&TokenKind::RParen, "to close a parameter list")?;
        Ok(params)
    }

    fn function_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.consume(&TokenKind::LBrace, "to open a function body")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            body.push(self.statement()?);
        }
        self.consume(&TokenKind::RBrace, "to close a function body")?;
        Ok(body)
    }

    fn function_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        let (name, _) = self.identifier_name("after 'function'")?;
        let params = self.param_list()?;
        let body = self.function_body()?;
        Ok(Stmt::new(StmtKind::Function { name, params, body }, token))
    }

    fn class_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        let (name, _) = self.identifier_name("after 'class'")?;

        let mut parents = Vec::new();
        if self.matches(&TokenKind::Colon) {
            loop {
                let (parent, _) = self.identifier_name("as a parent class")?;
                parents.push(parent);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::LBrace, "to open a class body")?;
        let mut members = Vec::new();
        let mut methods = Vec::new();
        let mut constructors = Vec::new();
        let mut enums = Vec::new();

        while !self.check(&TokenKind::RBrace) {
            match self.peek_kind() {
                TokenKind::Let => members.push(self.var_decl(Privilege::Mutable)?),
                TokenKind::Const => members.push(self.var_decl(Privilege::Immutable)?),
                TokenKind::Enum => enums.push(self.enum_stmt()?),
                TokenKind::Function => {
                    let func_token = self.peek().clone();
                    self.advance();
                    let (fname, _) = self.identifier_name("after 'function' in a class body")?;
                    let params = self.param_list()?;
                    let body = self.function_body()?;
                    let func = Stmt::new(StmtKind::Function { name: fname.clone(), params, body }, func_token);
                    if fname == name {
                        constructors.push(func);
                    } else {
                        methods.push(func);
                    }
                }
                _ => {
                    let found = self.peek().clone();
                    return Err(ParseError::new(
                        found.line,
                        format!("unexpected '{}' in a class body", found.lexeme),
                    ));
                }
            }
        }
        self.consume(&TokenKind::RBrace, "to close a class body")?;

        Ok(Stmt::new(
            StmtKind::Class { name, parents, members, methods, constructors, enums },
            token,
        ))
    }

    fn module_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        let (name, _) = self.identifier_name("after 'module'")?;
        self.consume(&TokenKind::LBrace, "to open a module body")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            body.push(self.statement()?);
        }
        self.consume(&TokenKind::RBrace, "to close a module body")?;
        Ok(Stmt::new(StmtKind::Module { name, body }, token))
    }

    fn expr_stmt(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let expr = self.expression(level::LOWEST)?;
        self.matches(&TokenKind::Semicolon);
        Ok(Stmt::new(StmtKind::Expr(expr), token))
    }

    // --- expressions (Pratt) ---

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.prefix()?;

        loop {
            let (left_bp, right_bp) = match infix_binding_power(self.peek_kind()) {
                Some(bp) => bp,
                None => break,
            };
            if left_bp < min_bp {
                break;
            }
            left = self.infix(left, right_bp)?;
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Int(*n)), token))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Float(*n)), token))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Str(s.clone())), token))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(true)), token))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(false)), token))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Nil), token))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::new(ExprKind::This, token))
            }
            TokenKind::Base => {
                self.advance();
                self.consume(&TokenKind::Dot, "after 'base'")?;
                let (name, _) = self.identifier_name("after 'base.'")?;
                Ok(Expr::new(ExprKind::Base { name }, token))
            }
            TokenKind::Ellipsis => {
                self.advance();
                let (name, _) = self.identifier_name("after '...'")?;
                Ok(Expr::new(ExprKind::VarArg(name), token))
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::new(ExprKind::Identifier(name), token))
            }
            TokenKind::Minus => {
                self.advance();
                let right = self.expression(level::PREFIX)?;
                Ok(Expr::new(ExprKind::Prefix { op: PrefixOp::Neg, right: Box::new(right) }, token))
            }
            TokenKind::Bang => {
                self.advance();
                let right = self.expression(level::PREFIX)?;
                Ok(Expr::new(ExprKind::Prefix { op: PrefixOp::Not, right: Box::new(right) }, token))
            }
            TokenKind::Tilde => {
                self.advance();
                let right = self.expression(level::PREFIX)?;
                Ok(Expr::new(ExprKind::Prefix { op: PrefixOp::BitNot, right: Box::new(right) }, token))
            }
            TokenKind::Amp => {
                self.advance();
                let right = self.expression(level::PREFIX)?;
                Ok(Expr::new(ExprKind::Ref(Box::new(right)), token))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression(level::LOWEST)?;
                self.consume(&TokenKind::RParen, "to close a grouped expression")?;
                Ok(Expr::new(ExprKind::Group(Box::new(inner)), token))
            }
            TokenKind::LBracket => self.array_literal(token),
            TokenKind::LBrace => self.brace_expr(token),
            TokenKind::Lambda => self.lambda_expr(token),
            TokenKind::New => self.new_expr(token),
            other => Err(ParseError::new(
                token.line,
                format!("unexpected token '{}' ({:?}) in expression position", token.lexeme, other),
            )),
        }
    }

    fn array_literal(&mut self, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `[`
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            elements.push(self.expression(level::ASSIGN)?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RBracket, "to close an array literal")?;
        Ok(Expr::new(ExprKind::Array(elements), token))
    }

    /// Disambiguates `{` as a dict literal, a struct literal, or a compound
    /// expression `({stmts…; expr})`.
    fn brace_expr(&mut self, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `{`

        if self.check(&TokenKind::RBrace) {
            self.advance();
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), token));
        }

        // dict / struct literal: `key : value, …`
        if self.looks_like_keyed_literal() {
            let mut pairs = Vec::new();
            let mut is_struct = true;
            while !self.check(&TokenKind::RBrace) {
                let key_token = self.peek().clone();
                let key = self.expression(level::ASSIGN)?;
                self.consume(&TokenKind::Colon, "between a key and a value")?;
                let value = self.expression(level::ASSIGN)?;
                if !matches!(key.kind, ExprKind::Identifier(_)) {
                    is_struct = false;
                }
                pairs.push((key_token, key, value));
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(&TokenKind::RBrace, "to close a dict/struct literal")?;

            if is_struct {
                let fields = pairs
                    .into_iter()
                    .map(|(_, key, value)| match key.kind {
                        ExprKind::Identifier(name) => (name, value),
                        _ => unreachable!(),
                    })
                    .collect();
                return Ok(Expr::new(ExprKind::StructLiteral(fields), token));
            }

            let dict = pairs.into_iter().map(|(_, k, v)| (k, v)).collect();
            return Ok(Expr::new(ExprKind::Dict(dict), token));
        }

        // compound expression: `{ stmts… ; tail }`
        let mut stmts = Vec::new();
        loop {
            let before = self.pos;
            let stmt = self.statement()?;
            if self.check(&TokenKind::RBrace) {
                if let StmtKind::Expr(tail) = stmt.kind {
                    self.advance();
                    return Ok(Expr::new(
                        ExprKind::Compound { stmts, tail: Box::new(tail) },
                        token,
                    ));
                }
            }
            stmts.push(stmt);
            if self.pos == before {
                // safety valve against infinite loops on malformed input
                let found = self.peek().clone();
                return Err(ParseError::new(found.line, "malformed compound expression".to_string()));
            }
            if self.check(&TokenKind::RBrace) {
                self.advance();
                return Ok(Expr::new(
                    ExprKind::Compound {
                        stmts,
                        tail: Box::new(Expr::new(ExprKind::Literal(Literal::Nil), token.clone())),
                    },
                    token,
                ));
            }
        }
    }

    /// Lookahead heuristic: `{` begins a keyed (dict/struct) literal when an
    /// expression is immediately followed by `:` before any `;`.
    fn looks_like_keyed_literal(&self) -> bool {
        if self.check(&TokenKind::RBrace) {
            return false;
        }
        let mut depth = 0i32;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match &self.tokens[i].kind {
                TokenKind::LBrace | TokenKind::LBracket | TokenKind::LParen => depth += 1,
                TokenKind::RBrace | TokenKind::RBracket | TokenKind::RParen if depth == 0 => return false,
                TokenKind::RBrace | TokenKind::RBracket | TokenKind::RParen => depth -= 1,
                TokenKind::Colon if depth == 0 => return true,
                TokenKind::Semicolon if depth == 0 => return false,
                TokenKind::Comma if depth == 0 => return false,
                TokenKind::End => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn lambda_expr(&mut self, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `lambda`
        let params = self.param_list()?;
        let body = self.function_body()?;
        Ok(Expr::new(ExprKind::Lambda { params, body }, token))
    }

    fn new_expr(&mut self, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `new`
        let (name, _) = self.identifier_name("after 'new'")?;

        if self.check(&TokenKind::LParen) {
            self.advance();
            let mut args = Vec::new();
            while !self.check(&TokenKind::RParen) {
                args.push(self.expression(level::ASSIGN)?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(&TokenKind::RParen, "to close 'new' arguments")?;
            Ok(Expr::new(ExprKind::NewCall { class_name: name, args }, token))
        } else if self.check(&TokenKind::LBrace) {
            self.advance();
            let mut fields = Vec::new();
            while !self.check(&TokenKind::RBrace) {
                let (field, _) = self.identifier_name("as a struct-literal field")?;
                self.consume(&TokenKind::Colon, "between a field name and its value")?;
                let value = self.expression(level::ASSIGN)?;
                fields.push((field, value));
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(&TokenKind::RBrace, "to close a struct literal")?;
            Ok(Expr::new(ExprKind::NewStruct { class_name: name, fields }, token))
        } else {
            let found = self.peek().clone();
            Err(ParseError::new(
                found.line,
                "'new' must be followed by a call '(...)' or a struct literal '{...}'".to_string(),
            ))
        }
    }

    fn infix(&mut self, left: Expr, right_bp: u8) -> Result<Expr, ParseError> {
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::LParen => self.call(left, token),
            TokenKind::LBracket => self.index(left, token),
            TokenKind::Dot => self.member(left, token),
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::new(ExprKind::Factorial { left: Box::new(left) }, token))
            }
            TokenKind::Question => self.conditional(left, token),
            _ => self.binary(left, token, right_bp),
        }
    }

    fn call(&mut self, callee: Expr, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `(`
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.expression(level::ASSIGN)?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RParen, "to close a call's argument list")?;
        Ok(Expr::new(ExprKind::Call { callee: Box::new(callee), args }, token))
    }

    fn index(&mut self, target: Expr, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `[`
        let index = self.expression(level::LOWEST)?;
        self.consume(&TokenKind::RBracket, "to close an index expression")?;
        Ok(Expr::new(ExprKind::Index { target: Box::new(target), index: Box::new(index) }, token))
    }

    fn member(&mut self, target: Expr, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `.`
        let (name, _) = self.identifier_name("after '.'")?;
        Ok(Expr::new(ExprKind::Member { target: Box::new(target), name }, token))
    }

    fn conditional(&mut self, cond: Expr, token: Token) -> Result<Expr, ParseError> {
        self.advance(); // `?`
        let then = self.expression(level::CONDITION)?;
        self.consume(&TokenKind::Colon, "between a ternary's branches")?;
        let otherwise = self.expression(level::ASSIGN)?;
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            token,
        ))
    }

    fn binary(&mut self, left: Expr, token: Token, right_bp: u8) -> Result<Expr, ParseError> {
        let op = infix_op(&token.kind).ok_or_else(|| {
            ParseError::new(token.line, format!("'{}' is not a valid binary operator", token.lexeme))
        })?;
        self.advance();
        let right = self.expression(right_bp)?;
        Ok(Expr::new(ExprKind::Infix { op, left: Box::new(left), right: Box::new(right) }, token))
    }
}

fn infix_op(kind: &TokenKind) -> Option<InfixOp> {
    use InfixOp::*;
    use TokenKind::*;
    Some(match kind {
        Plus => Add,
        Minus => Sub,
        Star => Mul,
        Slash => Div,
        Percent => Mod,
        Amp => BitAnd,
        Pipe => BitOr,
        Caret => BitXor,
        Shl => self::InfixOp::Shl,
        Shr => self::InfixOp::Shr,
        Lt => self::InfixOp::Lt,
        Le => self::InfixOp::Le,
        Gt => self::InfixOp::Gt,
        Ge => self::InfixOp::Ge,
        EqEq => self::InfixOp::Eq,
        NotEq => Ne,
        AmpAmp => And,
        PipePipe => Or,
        Eq => Assign,
        PlusEq => AddAssign,
        MinusEq => SubAssign,
        StarEq => MulAssign,
        SlashEq => DivAssign,
        PercentEq => ModAssign,
        AmpEq => AndAssign,
        PipeEq => OrAssign,
        CaretEq => XorAssign,
        ShlEq => ShlAssign,
        ShrEq => ShrAssign,
        _ => return None,
    })
}

fn describe(kind: &TokenKind) -> &'static str {
    use TokenKind::*;
    match kind {
        RParen => "')'",
        LParen => "'('",
        RBrace => "'}'",
        LBrace => "'{'",
        RBracket => "']'",
        LBracket => "'['",
        Colon => "':'",
        Comma => "','",
        Semicolon => "';'",
        Dot => "'.'",
        _ => "a token",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::lex::Lexer;

    fn parse_src(src: &str) -> Stmt {
        let tokens = Lexer::lex(src).unwrap();
        Parser::parse(tokens).unwrap()
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let program = parse_src("1 + 2 * 3;");
        if let StmtKind::Program(stmts) = program.kind {
            if let StmtKind::Expr(expr) = &stmts[0].kind {
                if let ExprKind::Infix { op, left, right } = &expr.kind {
                    assert_eq!(*op, InfixOp::Add);
                    assert!(matches!(left.kind, ExprKind::Literal(Literal::Int(1))));
                    assert!(matches!(right.kind, ExprKind::Infix { op: InfixOp::Mul, .. }));
                    return;
                }
            }
            panic!("expected a top-level infix expression statement");
        } else {
            panic!("expected a program");
        }
    }

    #[test]
    fn parses_let_with_destructuring() {
        let program = parse_src("let [a, b, ...rest] = arr;");
        if let StmtKind::Program(stmts) = program.kind {
            if let StmtKind::VarDecl { bindings, .. } = &stmts[0].kind {
                match &bindings[0].0 {
                    Binder::Destructure { elements, rest } => {
                        assert_eq!(elements.len(), 2);
                        assert!(rest.is_some());
                    }
                    _ => panic!("expected a destructuring binder"),
                }
                return;
            }
        }
        panic!("expected a var decl");
    }

    #[test]
    fn desugars_for_loop() {
        let program = parse_src("for(let i=0; i<10; i+=1) { x; }");
        if let StmtKind::Program(stmts) = program.kind {
            assert!(matches!(stmts[0].kind, StmtKind::Block(_)));
            if let StmtKind::Block(inner) = &stmts[0].kind {
                assert_eq!(inner.len(), 2); // init + while
                assert!(matches!(inner[0].kind, StmtKind::VarDecl { .. }));
                assert!(matches!(inner[1].kind, StmtKind::While { .. }));
            }
            return;
        }
        panic!("expected a program");
    }

    #[test]
    fn parses_class_with_parent() {
        let program = parse_src("class Cat : Animal { let x=0; function Cat() { } function get() { return this.x; } }");
        if let StmtKind::Program(stmts) = program.kind {
            if let StmtKind::Class { parents, methods, constructors, .. } = &stmts[0].kind {
                assert_eq!(parents, &vec!["Animal".to_string()]);
                assert_eq!(methods.len(), 1);
                assert_eq!(constructors.len(), 1);
                return;
            }
        }
        panic!("expected a class");
    }

    #[test]
    fn rejects_rest_not_last() {
        let tokens = Lexer::lex("let [...rest, a] = arr;").unwrap();
        let err = Parser::parse(tokens).unwrap_err();
        assert!(err.message.contains("last"));
    }

    #[test]
    fn parses_ternary_and_index() {
        let program = parse_src("let x = a[0] ? 1 : 2;");
        if let StmtKind::Program(stmts) = program.kind {
            if let StmtKind::VarDecl { bindings, .. } = &stmts[0].kind {
                let (_, init) = &bindings[0];
                assert!(matches!(init.as_ref().unwrap().kind, ExprKind::Conditional { .. }));
                return;
            }
        }
        panic!("expected a var decl with a ternary initializer");
    }
}
