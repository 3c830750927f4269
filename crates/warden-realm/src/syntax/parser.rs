// parser.rs — Recursive-descent parser for the confined language.
//
// Nesting is bounded: every recursive entry point goes through `enter()`, and
// binary-operator chains count toward the same limit. Hostile input therefore
// fails with a SyntaxError instead of exhausting the host stack, both here and
// later in the tree-walking interpreter.

use std::sync::Arc;

use super::ast::*;
use super::lexer::{tokenize, Keyword, Punct, Token, TokenKind};
use super::ParseError;
use crate::value::number_to_string;

/// Maximum syntactic nesting (blocks, parentheses, unary operators).
pub const MAX_NESTING: usize = 128;

/// Maximum operators in one left-associative chain such as `1 + 1 + 1`.
/// Counted apart from nesting; the chain still builds a left-deep tree.
pub const MAX_OPERATOR_CHAIN: usize = 1024;

/// Parse a whole program (statement list).
pub fn parse_program(src: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut body = Vec::new();
    while !parser.at_eof() {
        parser.parse_item(&mut body)?;
    }
    Ok(Program { body })
}

/// Parse source that must consist of exactly one expression.
pub fn parse_expression_source(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    if parser.at_eof() {
        return Err(parser.error("expected an expression"));
    }
    let expr = parser.parse_expression()?;
    if !parser.at_eof() {
        return Err(parser.error("unexpected input after expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    loop_depth: usize,
    function_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            loop_depth: 0,
            function_depth: 0,
        }
    }

    // ── token helpers ──────────────────────────────────────────

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn is_punct(&self, punct: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(punct)
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(keyword)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Number(n) => number_to_string(*n),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Keyword(kw) => format!("'{}'", kw.as_str()),
            TokenKind::Punct(p) => format!("{:?}", p),
        };
        ParseError::new(
            format!("{}, found {}", message.into(), found),
            token.line,
            token.col,
        )
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Automatic semicolon insertion: accept `;`, or nothing before `}`,
    /// end of input or a line break.
    fn consume_semicolon(&mut self) -> Result<(), ParseError> {
        if self.eat_punct(Punct::Semicolon) {
            return Ok(());
        }
        let token = self.peek();
        if token.newline_before
            || token.kind == TokenKind::Eof
            || token.kind == TokenKind::Punct(Punct::RBrace)
        {
            return Ok(());
        }
        Err(self.error("expected ';'"))
    }

    // ── statements ─────────────────────────────────────────────

    /// A statement in a block or program body. Declarations may expand to
    /// several statements (`let a = 1, b = 2`).
    fn parse_item(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Let) | TokenKind::Keyword(Keyword::Var) => DeclKind::Let,
            TokenKind::Keyword(Keyword::Const) => DeclKind::Const,
            _ => {
                let stmt = self.parse_statement()?;
                out.push(stmt);
                return Ok(());
            }
        };
        self.advance();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.parse_assignment()?)
            } else if kind == DeclKind::Const {
                return Err(self.error("missing initializer in const declaration"));
            } else {
                None
            };
            out.push(Stmt::Declare { kind, name, init });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.consume_semicolon()
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.enter()?;
        let stmt = self.parse_statement_inner();
        self.leave();
        stmt
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ParseError> {
        match &self.peek().kind {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Let)
            | TokenKind::Keyword(Keyword::Var)
            | TokenKind::Keyword(Keyword::Const) => {
                Err(self.error("lexical declaration not allowed here"))
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = self.expect_ident()?;
                let def = self.parse_function_rest(Some(name))?;
                Ok(Stmt::Function(def))
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                self.expect_punct(Punct::LParen, "'(' after if")?;
                let cond = self.parse_expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.eat_keyword(Keyword::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen, "'(' after while")?;
                let cond = self.parse_expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                self.loop_depth += 1;
                let body = self.parse_statement();
                self.loop_depth -= 1;
                Ok(Stmt::While {
                    cond,
                    body: Box::new(body?),
                })
            }
            TokenKind::Keyword(Keyword::Return) => {
                if self.function_depth == 0 {
                    return Err(self.error("illegal return statement"));
                }
                self.advance();
                let token = self.peek();
                let bare = token.newline_before
                    || matches!(
                        token.kind,
                        TokenKind::Eof
                            | TokenKind::Punct(Punct::Semicolon)
                            | TokenKind::Punct(Punct::RBrace)
                    );
                let value = if bare {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                if self.peek().newline_before {
                    return Err(self.error("illegal newline after throw"));
                }
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Break) => {
                if self.loop_depth == 0 {
                    return Err(self.error("illegal break statement"));
                }
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                if self.loop_depth == 0 {
                    return Err(self.error("illegal continue statement"));
                }
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.is_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.error("expected '}'"));
            }
            self.parse_item(&mut body)?;
        }
        self.advance();
        Ok(body)
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let body = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword(Keyword::Catch) {
            if self.eat_punct(Punct::LParen) {
                param = Some(self.expect_ident()?);
                self.expect_punct(Punct::RParen, "')'")?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.eat_keyword(Keyword::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            body,
            param,
            handler,
            finalizer,
        })
    }

    /// Parameters and body after `function name?`.
    fn parse_function_rest(&mut self, name: Option<String>) -> Result<Arc<FunctionDef>, ParseError> {
        self.expect_punct(Punct::LParen, "'(' before parameters")?;
        let params = self.parse_params()?;
        let body = self.parse_function_body()?;
        Ok(Arc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            arrow: false,
        }))
    }

    /// Identifiers up to and including the closing `)`.
    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            let name = self.expect_ident()?;
            if params.contains(&name) {
                return Err(self.error(format!("duplicate parameter '{}'", name)));
            }
            params.push(name);
            if !self.is_punct(Punct::RParen) {
                self.expect_punct(Punct::Comma, "',' or ')'")?;
            }
        }
        Ok(params)
    }

    fn parse_function_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        body
    }

    // ── expressions ────────────────────────────────────────────

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.parse_assignment_inner();
        self.leave();
        expr
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }

        let target = self.parse_conditional()?;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Assign) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::AddAssign,
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::SubAssign,
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..)) {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign(op, Box::new(target), Box::new(value)))
    }

    /// Arrow functions: `x => ...` or `(a, b) => ...`.
    fn try_parse_arrow(&mut self) -> Result<Option<Expr>, ParseError> {
        let params = match self.peek().kind.clone() {
            TokenKind::Ident(name)
                if self.peek_kind_at(1) == &TokenKind::Punct(Punct::Arrow) =>
            {
                self.advance();
                vec![name]
            }
            TokenKind::Punct(Punct::LParen) if self.paren_is_arrow_head() => {
                self.advance();
                self.parse_params()?
            }
            _ => return Ok(None),
        };
        self.expect_punct(Punct::Arrow, "'=>'")?;

        let body = if self.is_punct(Punct::LBrace) {
            FunctionBody::Block(self.parse_function_body()?)
        } else {
            FunctionBody::Expr(self.parse_assignment()?)
        };
        Ok(Some(Expr::Function(Arc::new(FunctionDef {
            name: None,
            params,
            body,
            arrow: true,
        }))))
    }

    /// Whether the `(` at the cursor closes with a `)` followed by `=>`.
    fn paren_is_arrow_head(&self) -> bool {
        let mut depth = 0usize;
        let mut offset = 0;
        loop {
            match self.peek_kind_at(offset) {
                TokenKind::Eof => return false,
                TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_kind_at(offset + 1) == &TokenKind::Punct(Punct::Arrow);
                    }
                }
                _ => {}
            }
            offset += 1;
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(0)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(cond);
        }
        let then = self.parse_assignment()?;
        self.expect_punct(Punct::Colon, "':' in conditional")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    /// Precedence climbing over left-associative binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        let mut chain = 0;
        while let Some((prec, op)) = binary_operator(&self.peek().kind) {
            if prec < min_prec {
                break;
            }
            chain += 1;
            if chain > MAX_OPERATOR_CHAIN {
                return Err(self.error("operator chain too long"));
            }
            self.advance();
            self.enter()?;
            let right = self.parse_binary(prec + 1);
            self.leave();
            let right = Box::new(right?);
            left = match op {
                Operator::Binary(op) => Expr::Binary(op, Box::new(left), right),
                Operator::Logical(op) => Expr::Logical(op, Box::new(left), right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Bang) => UnaryOp::Not,
            TokenKind::Punct(Punct::Minus) => UnaryOp::Neg,
            TokenKind::Punct(Punct::Plus) => UnaryOp::Plus,
            TokenKind::Keyword(Keyword::Typeof) => UnaryOp::Typeof,
            TokenKind::Keyword(Keyword::Delete) => {
                self.advance();
                self.enter()?;
                let operand = self.parse_unary();
                self.leave();
                let operand = operand?;
                if !matches!(operand, Expr::Member(..) | Expr::Index(..)) {
                    return Err(self.error("delete of an unqualified identifier"));
                }
                return Ok(Expr::Delete(Box::new(operand)));
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    /// Member access, indexing and calls on a primary or `new` expression.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.is_keyword(Keyword::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.eat_punct(Punct::Dot) {
                expr = Expr::Member(Box::new(expr), self.property_name_after_dot()?);
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_punct(Punct::LParen) {
                let args = self.parse_arguments()?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        self.advance();
        self.enter()?;
        let callee = if self.is_keyword(Keyword::New) {
            self.parse_new()
        } else {
            self.parse_primary()
        };
        self.leave();
        let mut callee = callee?;
        loop {
            if self.eat_punct(Punct::Dot) {
                callee = Expr::Member(Box::new(callee), self.property_name_after_dot()?);
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                callee = Expr::Index(Box::new(callee), Box::new(index));
            } else {
                break;
            }
        }
        let args = if self.eat_punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New(Box::new(callee), args))
    }

    fn property_name_after_dot(&mut self) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                Ok(kw.as_str().to_string())
            }
            _ => Err(self.error("expected property name after '.'")),
        }
    }

    /// Arguments up to and including the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            args.push(self.parse_assignment()?);
            if !self.is_punct(Punct::RParen) {
                self.expect_punct(Punct::Comma, "',' or ')'")?;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(Keyword::Undefined) => {
                self.advance();
                Ok(Expr::Undefined)
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                Ok(Expr::This)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = match &self.peek().kind {
                    TokenKind::Ident(_) => Some(self.expect_ident()?),
                    _ => None,
                };
                Ok(Expr::Function(self.parse_function_rest(name)?))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat_punct(Punct::RBracket) {
                    items.push(self.parse_assignment()?);
                    if !self.is_punct(Punct::RBracket) {
                        self.expect_punct(Punct::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Punct(Punct::LBrace) => self.parse_object(),
            _ => Err(self.error("unexpected token")),
        }
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        self.advance();
        let mut props = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            props.push(self.parse_property()?);
            if !self.is_punct(Punct::RBrace) {
                self.expect_punct(Punct::Comma, "',' or '}'")?;
            }
        }
        Ok(Expr::Object(props))
    }

    fn parse_property(&mut self) -> Result<PropDef, ParseError> {
        let is_getter = self.peek().kind == TokenKind::Ident("get".to_string())
            && !matches!(
                self.peek_kind_at(1),
                TokenKind::Punct(Punct::Colon | Punct::LParen | Punct::Comma | Punct::RBrace)
            );
        if is_getter {
            self.advance();
            let (key, _) = self.property_key()?;
            self.expect_punct(Punct::LParen, "'(' after getter name")?;
            self.expect_punct(Punct::RParen, "')': getters take no parameters")?;
            let body = self.parse_function_body()?;
            return Ok(PropDef::Getter(
                key.clone(),
                Arc::new(FunctionDef {
                    name: Some(key),
                    params: Vec::new(),
                    body: FunctionBody::Block(body),
                    arrow: false,
                }),
            ));
        }

        let (key, shorthand_ok) = self.property_key()?;
        if self.eat_punct(Punct::Colon) {
            let value = self.parse_assignment()?;
            return Ok(PropDef::Init(key, value));
        }
        if self.is_punct(Punct::LParen) {
            let def = self.parse_function_rest(Some(key.clone()))?;
            return Ok(PropDef::Init(key, Expr::Function(def)));
        }
        if shorthand_ok && (self.is_punct(Punct::Comma) || self.is_punct(Punct::RBrace)) {
            return Ok(PropDef::Init(key.clone(), Expr::Ident(key)));
        }
        Err(self.error("expected ':' after property name"))
    }

    /// A property key, and whether it may be used as a shorthand binding.
    fn property_key(&mut self) -> Result<(String, bool), ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, true))
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                Ok((kw.as_str().to_string(), false))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok((s, false))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok((number_to_string(n), false))
            }
            _ => Err(self.error("expected property name")),
        }
    }
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(kind: &TokenKind) -> Option<(u8, Operator)> {
    use Operator::{Binary, Logical};
    let entry = match kind {
        TokenKind::Punct(Punct::OrOr) => (1, Logical(LogicalOp::Or)),
        TokenKind::Punct(Punct::AndAnd) => (2, Logical(LogicalOp::And)),
        TokenKind::Punct(Punct::EqEq) => (3, Binary(BinaryOp::Eq)),
        TokenKind::Punct(Punct::NotEq) => (3, Binary(BinaryOp::NotEq)),
        TokenKind::Punct(Punct::EqEqEq) => (3, Binary(BinaryOp::StrictEq)),
        TokenKind::Punct(Punct::NotEqEq) => (3, Binary(BinaryOp::StrictNotEq)),
        TokenKind::Punct(Punct::Lt) => (4, Binary(BinaryOp::Lt)),
        TokenKind::Punct(Punct::Le) => (4, Binary(BinaryOp::Le)),
        TokenKind::Punct(Punct::Gt) => (4, Binary(BinaryOp::Gt)),
        TokenKind::Punct(Punct::Ge) => (4, Binary(BinaryOp::Ge)),
        TokenKind::Keyword(Keyword::Instanceof) => (4, Binary(BinaryOp::InstanceOf)),
        TokenKind::Punct(Punct::Plus) => (5, Binary(BinaryOp::Add)),
        TokenKind::Punct(Punct::Minus) => (5, Binary(BinaryOp::Sub)),
        TokenKind::Punct(Punct::Star) => (6, Binary(BinaryOp::Mul)),
        TokenKind::Punct(Punct::Slash) => (6, Binary(BinaryOp::Div)),
        TokenKind::Punct(Punct::Percent) => (6, Binary(BinaryOp::Rem)),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_associativity() {
        let expr = parse_expression_source("1 + 2 * 3 - 4").unwrap();
        // ((1 + (2 * 3)) - 4)
        match expr {
            Expr::Binary(BinaryOp::Sub, left, _) => match *left {
                Expr::Binary(BinaryOp::Add, _, right) => {
                    assert!(matches!(*right, Expr::Binary(BinaryOp::Mul, _, _)))
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn arrows_and_parenthesized_expressions() {
        assert!(matches!(
            parse_expression_source("(a, b) => a + b").unwrap(),
            Expr::Function(_)
        ));
        assert!(matches!(
            parse_expression_source("x => { return x }").unwrap(),
            Expr::Function(_)
        ));
        assert!(matches!(
            parse_expression_source("(1 + 2) * 3").unwrap(),
            Expr::Binary(BinaryOp::Mul, _, _)
        ));
    }

    #[test]
    fn semicolons_are_inserted_at_line_breaks() {
        let program = parse_program("let x = 1\nlet y = x + 1\ny").unwrap();
        assert_eq!(program.body.len(), 3);
        assert!(parse_program("let x = 1 let y = 2").is_err());
    }

    #[test]
    fn multiple_declarators_expand() {
        let program = parse_program("let a = 1, b;").unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(parse_program("const c;").is_err());
    }

    #[test]
    fn object_literals_with_getters_and_shorthand() {
        let expr = parse_expression_source("({ a: 1, get b() { return 2 }, c, 'd': 4, if: 5 })")
            .unwrap();
        let Expr::Object(props) = expr else {
            panic!("not an object");
        };
        assert_eq!(props.len(), 5);
        assert!(matches!(&props[1], PropDef::Getter(name, _) if name == "b"));
        assert!(matches!(&props[2], PropDef::Init(name, Expr::Ident(_)) if name == "c"));
    }

    #[test]
    fn get_can_still_be_a_plain_key() {
        let expr = parse_expression_source("({ get: 1 })").unwrap();
        assert!(matches!(expr, Expr::Object(props) if matches!(&props[0], PropDef::Init(k, _) if k == "get")));
    }

    #[test]
    fn new_binds_to_member_callee() {
        let expr = parse_expression_source("new Foo.Bar(1).baz").unwrap();
        let Expr::Member(inner, name) = expr else {
            panic!("expected member");
        };
        assert_eq!(name, "baz");
        assert!(matches!(*inner, Expr::New(_, ref args) if args.len() == 1));
    }

    #[test]
    fn expression_source_rejects_trailing_input() {
        assert!(parse_expression_source("1 + 1").is_ok());
        assert!(parse_expression_source("1; 2").is_err());
        assert!(parse_expression_source("").is_err());
        assert!(parse_expression_source("let x = 1").is_err());
    }

    #[test]
    fn control_flow_placement_is_checked() {
        assert!(parse_program("break").is_err());
        assert!(parse_program("return 1").is_err());
        assert!(parse_program("while (true) { break }").is_ok());
        assert!(parse_program("function f() { while (1) { return 2 } }").is_ok());
        assert!(parse_program("while (1) { function f() { break } }").is_err());
        assert!(parse_program("try { } ").is_err());
        assert!(parse_program("try { x() } catch { }").is_ok());
    }

    #[test]
    fn invalid_targets_are_rejected() {
        assert!(parse_program("1 = 2").is_err());
        assert!(parse_program("delete x").is_err());
        assert!(parse_program("a.b += 1").is_ok());
    }

    #[test]
    fn deep_nesting_fails_cleanly() {
        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(parse_expression_source(&deep).is_err());
        let chain = vec!["1"; 10_000].join(" + ");
        assert!(parse_expression_source(&chain).is_err());
        let nested_chain = format!("{}{}{}", "(".repeat(100), vec!["1"; 2_000].join("+"), ")".repeat(100));
        assert!(parse_expression_source(&nested_chain).is_err());
    }

    #[test]
    fn flat_operator_chains_do_not_count_as_nesting() {
        let chain = vec!["1"; 600].join(" + ");
        assert!(parse_expression_source(&chain).is_ok());
        let logical = vec!["a"; 300].join(" && ");
        let nested = format!("{}{}{}", "(".repeat(100), logical, ")".repeat(100));
        assert!(parse_expression_source(&nested).is_ok());
        let unary = format!("{}1", "!".repeat(10_000));
        assert!(parse_expression_source(&unary).is_err());
    }
}
