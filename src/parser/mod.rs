use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

const MAX_ERRORS: usize = 20;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| self.eof_span())
    }

    fn eof_span(&self) -> Span {
        self.tokens
            .last()
            .map(|(_, s)| Span::new(s.end, s.end))
            .unwrap_or(Span::UNKNOWN)
    }

    /// End of the most recently consumed token.
    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| s.end)
            .unwrap_or(0)
    }

    fn span_from(&self, start: Span) -> Span {
        Span::new(start.start, self.prev_end().max(start.start))
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error("SVML-P003", format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error("SVML-P004", format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("SVML-P005", format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("SVML-P006", "expected identifier, got EOF".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn token_at(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx).map(|(t, _)| t)
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut body = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            let before = self.pos;
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => {
                    errors.push(e);
                    // Rewind to the statement start so its braces are balanced.
                    self.pos = before;
                    self.advance();
                    self.sync_to_statement_boundary();
                }
            }
        }

        (Program { body, source: None }, errors)
    }

    /// Skip ahead to what looks like the next statement. Brace depth is tracked
    /// so a broken function body is skipped as a unit.
    fn sync_to_statement_boundary(&mut self) {
        let mut depth: usize = match self.token_at(self.pos.saturating_sub(1)) {
            Some(Token::LBrace) => 1,
            _ => 0,
        };
        loop {
            match self.peek() {
                None => break,
                Some(Token::LBrace) => {
                    depth += 1;
                    self.advance();
                }
                Some(Token::RBrace) => {
                    self.advance();
                    if depth <= 1 {
                        break;
                    }
                    depth -= 1;
                }
                Some(Token::Semi) if depth == 0 => {
                    self.advance();
                    break;
                }
                Some(
                    Token::Const
                    | Token::Let
                    | Token::Function
                    | Token::If
                    | Token::While
                    | Token::For
                    | Token::Return,
                ) if depth == 0 => break,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ---- Statements ----

    fn parse_statement(&mut self) -> Result<Stmt> {
        let start = self.peek_span();
        let kind = match self.peek() {
            Some(Token::Const) | Some(Token::Let) => {
                let decl = self.parse_declaration()?;
                self.expect(&Token::Semi)?;
                decl
            }
            Some(Token::Function) => self.parse_function_decl()?,
            Some(Token::Return) => {
                self.advance();
                let value = if self.eat(&Token::Semi) {
                    None
                } else {
                    let e = self.parse_expr()?;
                    self.expect(&Token::Semi)?;
                    Some(e)
                };
                StmtKind::Return(value)
            }
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => {
                self.advance();
                self.expect(&Token::LParen)?;
                let test = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                let body = self.parse_block()?;
                StmtKind::While { test, body, latch: Vec::new(), update: None }
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Break) => {
                self.advance();
                self.expect(&Token::Semi)?;
                StmtKind::Break
            }
            Some(Token::Continue) => {
                self.advance();
                self.expect(&Token::Semi)?;
                StmtKind::Continue
            }
            Some(Token::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(Token::Semi) => {
                self.advance();
                return self.parse_statement_or_empty(start);
            }
            Some(_) => {
                let e = self.parse_expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::Expr(e)
            }
            None => return Err(self.error("SVML-P002", "expected statement, got EOF".into())),
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    /// A stray `;` is an empty statement; it is folded into the next one.
    fn parse_statement_or_empty(&mut self, start: Span) -> Result<Stmt> {
        match self.peek() {
            None | Some(Token::RBrace) => Ok(Stmt::new(StmtKind::Block(Vec::new()), start)),
            _ => self.parse_statement(),
        }
    }

    /// `const x = e` / `let x = e`, without the trailing semicolon.
    fn parse_declaration(&mut self) -> Result<StmtKind> {
        let kind = match self.advance() {
            Some(Token::Let) => DeclKind::Let,
            _ => DeclKind::Const,
        };
        let name = self.expect_ident()?;
        if !matches!(self.peek(), Some(Token::Assign)) {
            return Err(self.error(
                "SVML-P009",
                format!("declaration of '{name}' needs an initializer: {name} = ..."),
            ));
        }
        self.advance();
        let value = self.parse_expr()?;
        Ok(StmtKind::Declaration { kind, name, value })
    }

    fn parse_function_decl(&mut self) -> Result<StmtKind> {
        self.expect(&Token::Function)?;
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(StmtKind::Function { name, params, body })
    }

    /// `(a, b, c)`
    fn parse_params(&mut self) -> Result<Vec<String>> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(params)
    }

    /// `{ stmt* }`
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Some(Token::RBrace) | None) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let test = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        let consequent = self.parse_block()?;
        let alternate = if self.eat(&Token::Else) {
            if matches!(self.peek(), Some(Token::If)) {
                let start = self.peek_span();
                let nested = self.parse_if()?;
                Some(vec![Stmt::new(nested, self.span_from(start))])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If { test, consequent, alternate })
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.expect(&Token::For)?;
        self.expect(&Token::LParen)?;

        // for (const x of xs)
        let is_for_of = matches!(self.peek(), Some(Token::Const | Token::Let))
            && matches!(self.token_at(self.pos + 1), Some(Token::Ident(_)))
            && matches!(self.token_at(self.pos + 2), Some(Token::Ident(w)) if w == "of");
        if is_for_of {
            self.advance();
            let name = self.expect_ident()?;
            self.advance();
            let iterable = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            let body = self.parse_block()?;
            return Ok(StmtKind::ForOf { name, iterable, body });
        }

        let init = match self.peek() {
            Some(Token::Semi) => None,
            Some(Token::Const | Token::Let) => {
                let start = self.peek_span();
                let decl = self.parse_declaration()?;
                Some(Box::new(Stmt::new(decl, self.span_from(start))))
            }
            _ => {
                let start = self.peek_span();
                let e = self.parse_expr()?;
                Some(Box::new(Stmt::new(StmtKind::Expr(e), self.span_from(start))))
            }
        };
        self.expect(&Token::Semi)?;
        let test = if matches!(self.peek(), Some(Token::Semi)) { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::Semi)?;
        let update = if matches!(self.peek(), Some(Token::RParen)) { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(StmtKind::For { init, test, update, body })
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr> {
        if self.is_arrow_start() {
            return self.parse_arrow();
        }
        let start = self.peek_span();
        let target = self.parse_conditional()?;
        if !matches!(self.peek(), Some(Token::Assign)) {
            return Ok(target);
        }
        if !matches!(
            target.node,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Member { .. }
        ) {
            return Err(ParseError {
                code: "SVML-P007",
                position: self.pos,
                span: target.span,
                message: format!("cannot assign to {}", target.describe()),
            });
        }
        self.advance();
        let value = self.parse_assign()?;
        let kind = ExprKind::Assign { target: Box::new(target), value: Box::new(value) };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    /// `x =>` or `( ... ) =>`
    fn is_arrow_start(&self) -> bool {
        match self.peek() {
            Some(Token::Ident(_)) => matches!(self.token_at(self.pos + 1), Some(Token::Arrow)),
            Some(Token::LParen) => {
                let mut i = self.pos + 1;
                loop {
                    match self.token_at(i) {
                        Some(Token::Ident(_)) | Some(Token::Comma) => i += 1,
                        Some(Token::RParen) => {
                            return matches!(self.token_at(i + 1), Some(Token::Arrow));
                        }
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let params = if matches!(self.peek(), Some(Token::LParen)) {
            self.parse_params()?
        } else {
            vec![self.expect_ident()?]
        };
        self.expect(&Token::Arrow)?;
        let body = if matches!(self.peek(), Some(Token::LBrace)) {
            LambdaBody::Block(self.parse_block()?)
        } else {
            LambdaBody::Expr(Box::new(self.parse_assign()?))
        };
        Ok(Expr::new(ExprKind::Lambda { params, body }, self.span_from(start)))
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let test = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assign()?;
        self.expect(&Token::Colon)?;
        let alternate = self.parse_assign()?;
        let kind = ExprKind::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            let kind = ExprKind::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) };
            left = Expr::new(kind, self.span_from(start));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let mut left = self.parse_binary(0)?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_binary(0)?;
            let kind = ExprKind::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) };
            left = Expr::new(kind, self.span_from(start));
        }
        Ok(left)
    }

    /// Precedence climbing over the left-associative binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let start = self.peek_span();
        let mut left = self.parse_unary()?;
        loop {
            if matches!(self.peek(), Some(Token::LooseEq | Token::LooseNotEq)) {
                let strict = if self.peek() == Some(&Token::LooseEq) { "===" } else { "!==" };
                return Err(self.error(
                    "SVML-P008",
                    format!("loose equality is not supported; use '{strict}'"),
                ));
            }
            let Some((op, prec)) = self.peek().and_then(binary_op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            let kind = ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) };
            left = Expr::new(kind, self.span_from(start));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::new(ExprKind::Unary { op, operand: Box::new(operand) }, self.span_from(start)))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let mut expr = self.parse_primary()?;
        loop {
            let kind = match self.peek() {
                Some(Token::LParen) => {
                    let args = self.parse_args()?;
                    ExprKind::Call { callee: Box::new(expr), args }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    ExprKind::Index { object: Box::new(expr), index: Box::new(index) }
                }
                Some(Token::Dot) => {
                    self.advance();
                    let property = self.expect_ident()?;
                    ExprKind::Member { object: Box::new(expr), property }
                }
                _ => break,
            };
            expr = Expr::new(kind, self.span_from(start));
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let kind = match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                ExprKind::Literal(Literal::Number(n))
            }
            Some(Token::Text(s)) => {
                self.advance();
                ExprKind::Literal(Literal::Text(s))
            }
            Some(Token::True) => {
                self.advance();
                ExprKind::Literal(Literal::Bool(true))
            }
            Some(Token::False) => {
                self.advance();
                ExprKind::Literal(Literal::Bool(false))
            }
            Some(Token::Null) => {
                self.advance();
                ExprKind::Literal(Literal::Null)
            }
            Some(Token::Ident(name)) => {
                self.advance();
                ExprKind::Ident(name)
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                // Parentheses only group; keep the inner node but widen its span.
                return Ok(Expr::new(inner.node, self.span_from(start)));
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut elements = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        elements.push(self.parse_expr()?);
                        if self.eat(&Token::Comma) {
                            if self.eat(&Token::RBracket) {
                                break;
                            }
                            continue;
                        }
                        self.expect(&Token::RBracket)?;
                        break;
                    }
                }
                ExprKind::Array(elements)
            }
            Some(Token::LBrace) => self.parse_object()?,
            Some(Token::Function) => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                ExprKind::Lambda { params, body: LambdaBody::Block(body) }
            }
            Some(tok) => {
                return Err(self.error("SVML-P001", format!("expected expression, got {:?}", tok)));
            }
            None => return Err(self.error("SVML-P002", "expected expression, got EOF".into())),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    /// `{ key: value, ... }`
    fn parse_object(&mut self) -> Result<ExprKind> {
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.eat(&Token::RBrace) {
            let key = match self.peek().cloned() {
                Some(Token::Ident(k)) | Some(Token::Text(k)) => {
                    self.advance();
                    k
                }
                Some(tok) => {
                    return Err(self.error("SVML-P010", format!("expected property name, got {:?}", tok)));
                }
                None => return Err(self.error("SVML-P004", "expected '}', got EOF".into())),
            };
            self.expect(&Token::Colon)?;
            fields.push((key, self.parse_expr()?));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(ExprKind::Object(fields))
    }
}

/// Binary operator and its precedence; higher binds tighter.
fn binary_op(tok: &Token) -> Option<(BinOp, u8)> {
    let entry = match tok {
        Token::StrictEq => (BinOp::Equals, 0),
        Token::StrictNotEq => (BinOp::NotEquals, 0),
        Token::Less => (BinOp::LessThan, 1),
        Token::Greater => (BinOp::GreaterThan, 1),
        Token::LessEq => (BinOp::LessOrEqual, 1),
        Token::GreaterEq => (BinOp::GreaterOrEqual, 1),
        Token::Plus => (BinOp::Add, 2),
        Token::Minus => (BinOp::Subtract, 2),
        Token::Star => (BinOp::Multiply, 3),
        Token::Slash => (BinOp::Divide, 3),
        Token::Percent => (BinOp::Modulo, 3),
        _ => return None,
    };
    Some(entry)
}

/// Parse from token+span pairs.
/// Returns `(program, errors)`. Statements that failed to parse are dropped, so
/// check `errors.is_empty()` before compiling the program.
pub fn parse(tokens: Vec<(Token, Span)>) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
