use super::lexer::{tokenize, Spanned, TemplatePart, Token};
use super::value::{RegexValue, Value};
use super::ScriptError;
use crate::constants::MAX_SCRIPT_DEPTH;
use regex::RegexBuilder;
use std::sync::Arc;

#[derive(Clone)]
pub enum Expr {
    Literal(Value),
    Template(Vec<TemplatePiece>),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: Property,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Arrow(Arc<FunctionDef>),
    Assign(String, Box<Expr>),
}

#[derive(Clone)]
pub enum TemplatePiece {
    Text(String),
    Expr(Expr),
}

#[derive(Clone)]
pub enum Property {
    Named(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: FunctionBody,
}

pub enum FunctionBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Clone)]
pub enum Stmt {
    Declare {
        mutable: bool,
        bindings: Vec<(String, Option<Expr>)>,
    },
    Expr(Expr),
    Return(Option<Expr>),
    Throw(Expr),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    Block(Vec<Stmt>),
}

const RESERVED: &[&str] = &[
    "const", "let", "var", "return", "throw", "if", "else", "new", "typeof", "true", "false",
    "null", "undefined", "function", "for", "while", "do", "class", "this", "delete", "in",
    "instanceof", "void", "yield", "await", "switch", "case", "break", "continue", "try",
    "catch", "finally",
];

const UNSUPPORTED: &[&str] = &[
    "function", "for", "while", "do", "class", "this", "switch", "try", "yield", "await",
];

/// Parses `source` as a single expression, optionally followed by `;`.
pub fn parse_expression(source: &str) -> Result<Expr, ScriptError> {
    let mut parser = Parser::new(tokenize(source)?, 0);
    let expr = parser.parse_assignment()?;
    parser.eat(";");
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses `source` as a list of statements.
pub fn parse_body(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(tokenize(source)?, 0);
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        stmts.push(parser.parse_statement()?);
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
        }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(w) if w == word)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{p}'")))
        }
    }

    fn expect_eof(&self) -> Result<(), ScriptError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("expected end of input"))
        }
    }

    fn unexpected(&self, context: &str) -> ScriptError {
        let found = match self.peek() {
            Token::Eof => "end of input".to_string(),
            Token::Punct(p) => format!("'{p}'"),
            Token::Ident(w) => format!("'{w}'"),
            Token::Num(n) => format!("number {n}"),
            Token::Str(_) | Token::Template(_) => "string".to_string(),
            Token::Regex { .. } => "regular expression".to_string(),
        };
        ScriptError::syntax(self.offset(), format!("unexpected {found}, {context}"))
    }

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_SCRIPT_DEPTH {
            return Err(ScriptError::syntax(self.offset(), "nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Counts one more link of a left-nested chain against the depth limit.
    /// The caller gives the links back with `leave_links` once the chain ends.
    fn enter_link(&mut self, links: &mut usize) -> Result<(), ScriptError> {
        self.enter()?;
        *links += 1;
        Ok(())
    }

    fn leave_links(&mut self, links: usize) {
        self.depth -= links;
    }

    fn binding_name(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.enter()?;
        let stmt = self.parse_statement_inner()?;
        self.leave();
        Ok(stmt)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ScriptError> {
        if self.eat("{") {
            let mut stmts = Vec::new();
            while !self.eat("}") {
                if self.at_eof() {
                    return Err(self.unexpected("expected '}'"));
                }
                stmts.push(self.parse_statement()?);
            }
            return Ok(Stmt::Block(stmts));
        }
        if self.eat(";") {
            return Ok(Stmt::Block(Vec::new()));
        }

        let keyword = match self.peek() {
            Token::Ident(w) => Some(w.clone()),
            _ => None,
        };
        let stmt = match keyword.as_deref() {
            Some(word @ ("const" | "let" | "var")) => {
                let mutable = word != "const";
                self.advance();
                let mut bindings = Vec::new();
                loop {
                    let name = self.binding_name()?;
                    let init = if self.eat("=") {
                        Some(self.parse_assignment()?)
                    } else if !mutable {
                        return Err(self.unexpected("missing initializer in const declaration"));
                    } else {
                        None
                    };
                    bindings.push((name, init));
                    if !self.eat(",") {
                        break;
                    }
                }
                Stmt::Declare { mutable, bindings }
            }
            Some("return") => {
                self.advance();
                if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.parse_assignment()?))
                }
            }
            Some("throw") => {
                self.advance();
                Stmt::Throw(self.parse_assignment()?)
            }
            Some("if") => {
                self.advance();
                self.expect("(")?;
                let cond = self.parse_assignment()?;
                self.expect(")")?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.is_keyword("else") {
                    self.advance();
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                return Ok(Stmt::If(cond, then, otherwise));
            }
            Some(word) if UNSUPPORTED.contains(&word) => {
                return Err(ScriptError::syntax(
                    self.offset(),
                    format!("'{word}' is not supported"),
                ));
            }
            _ => Stmt::Expr(self.parse_assignment()?),
        };
        self.eat(";");
        Ok(stmt)
    }

    fn parse_assignment(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let expr = self.parse_assignment_inner()?;
        self.leave();
        Ok(expr)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ScriptError> {
        if let Some(params) = self.arrow_params() {
            return self.parse_arrow_body(params);
        }
        if let (Token::Ident(name), Token::Punct("=")) = (self.peek(), self.peek_at(1)) {
            if !RESERVED.contains(&name.as_str()) {
                let name = name.clone();
                self.pos += 2;
                let value = self.parse_assignment()?;
                return Ok(Expr::Assign(name, Box::new(value)));
            }
        }
        self.parse_conditional()
    }

    /// Consumes an arrow function's parameter list and `=>` if one starts here.
    fn arrow_params(&mut self) -> Option<Vec<String>> {
        if let (Token::Ident(name), Token::Punct("=>")) = (self.peek(), self.peek_at(1)) {
            if RESERVED.contains(&name.as_str()) {
                return None;
            }
            let params = vec![name.clone()];
            self.pos += 2;
            return Some(params);
        }
        if !self.is_punct("(") {
            return None;
        }
        let mut params = Vec::new();
        let mut ahead = 1;
        loop {
            match self.peek_at(ahead) {
                Token::Punct(")") => break,
                Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                    params.push(name.clone());
                    ahead += 1;
                    match self.peek_at(ahead) {
                        Token::Punct(",") => ahead += 1,
                        Token::Punct(")") => break,
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }
        if !matches!(self.peek_at(ahead + 1), Token::Punct("=>")) {
            return None;
        }
        self.pos += ahead + 2;
        Some(params)
    }

    fn parse_arrow_body(&mut self, params: Vec<String>) -> Result<Expr, ScriptError> {
        let body = if self.eat("{") {
            let mut stmts = Vec::new();
            while !self.eat("}") {
                if self.at_eof() {
                    return Err(self.unexpected("expected '}'"));
                }
                stmts.push(self.parse_statement()?);
            }
            FunctionBody::Block(stmts)
        } else {
            FunctionBody::Expr(self.parse_assignment()?)
        };
        Ok(Expr::Arrow(Arc::new(FunctionDef { params, body })))
    }

    fn parse_conditional(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.parse_or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.parse_assignment()?;
        self.expect(":")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        loop {
            let op = if self.eat("||") {
                LogicalOp::Or
            } else if self.eat("??") {
                LogicalOp::Nullish
            } else {
                self.leave_links(links);
                return Ok(left);
            };
            self.enter_link(&mut links)?;
            let right = self.parse_and()?;
            left = Expr::Logical(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.parse_equality()?;
        let mut links = 0;
        while self.eat("&&") {
            self.enter_link(&mut links)?;
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut left = next(self)?;
        let mut links = 0;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    self.enter_link(&mut links)?;
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.leave_links(links);
            return Ok(left);
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::LooseEq),
                ("!=", BinaryOp::LooseNe),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else if self.is_keyword("typeof") {
            self.advance();
            UnaryOp::TypeOf
        } else {
            return self.parse_postfix();
        };
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if self.is_punct(".")
                || self.is_punct("?.")
                || self.is_punct("[")
                || self.is_punct("(")
            {
                self.enter_link(&mut links)?;
            }
            if self.eat(".") {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Named(name),
                    optional: false,
                };
            } else if self.eat("?.") {
                if self.eat("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat("[") {
                    let index = self.parse_assignment()?;
                    self.expect("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Property::Computed(Box::new(index)),
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Property::Named(name),
                        optional: true,
                    };
                }
            } else if self.eat("[") {
                let index = self.parse_assignment()?;
                self.expect("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Computed(Box::new(index)),
                    optional: false,
                };
            } else if self.eat("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                self.leave_links(links);
                return Ok(expr);
            }
        }
    }

    fn property_name(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected property name")),
        }
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        while !self.eat(")") {
            args.push(self.parse_assignment()?);
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let offset = self.offset();
        match self.advance() {
            Token::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Template(parts) => self.template(parts),
            Token::Regex { pattern, flags } => regex_literal(offset, pattern, flags),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "undefined" => Ok(Expr::Literal(Value::Undefined)),
                "new" => {
                    let class = self.binding_name()?;
                    let args = if self.eat("(") {
                        self.parse_arguments()?
                    } else {
                        Vec::new()
                    };
                    Ok(Expr::New { class, args })
                }
                w if UNSUPPORTED.contains(&w) => Err(ScriptError::syntax(
                    offset,
                    format!("'{w}' is not supported"),
                )),
                w if RESERVED.contains(&w) => {
                    self.pos -= 1;
                    Err(self.unexpected("expected expression"))
                }
                _ => Ok(Expr::Ident(word)),
            },
            Token::Punct("(") => {
                let expr = self.parse_assignment()?;
                self.expect(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    items.push(self.parse_assignment()?);
                    if !self.eat(",") {
                        self.expect("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => {
                let mut fields = Vec::new();
                while !self.eat("}") {
                    let key = match self.peek().clone() {
                        Token::Ident(k) | Token::Str(k) => k,
                        Token::Num(n) => super::value::format_number(n),
                        _ => return Err(self.unexpected("expected property key")),
                    };
                    self.advance();
                    let value = if self.eat(":") {
                        self.parse_assignment()?
                    } else {
                        Expr::Ident(key.clone())
                    };
                    fields.push((key, value));
                    if !self.eat(",") {
                        self.expect("}")?;
                        break;
                    }
                }
                Ok(Expr::Object(fields))
            }
            Token::Eof => Err(self.unexpected("expected expression")),
            _ => {
                self.pos -= 1;
                Err(self.unexpected("expected expression"))
            }
        }
    }

    fn template(&mut self, parts: Vec<TemplatePart>) -> Result<Expr, ScriptError> {
        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                TemplatePart::Text(text) => pieces.push(TemplatePiece::Text(text)),
                TemplatePart::Expr(source) => {
                    let mut inner = Parser::new(tokenize(&source)?, self.depth + 1);
                    let expr = inner.parse_assignment()?;
                    inner.expect_eof()?;
                    pieces.push(TemplatePiece::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(pieces))
    }
}

fn regex_literal(offset: usize, pattern: String, flags: String) -> Result<Expr, ScriptError> {
    if let Some(bad) = flags.chars().find(|f| !matches!(f, 'g' | 'i' | 'm' | 's' | 'u' | 'y')) {
        return Err(ScriptError::syntax(offset, format!("invalid regex flag '{bad}'")));
    }
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| ScriptError::syntax(offset, format!("invalid regex: {e}")))?;
    Ok(Expr::Literal(Value::Regex(Arc::new(RegexValue {
        regex,
        source: pattern,
        flags,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_forms() {
        assert!(matches!(parse_expression("line => line.trim()"), Ok(Expr::Arrow(_))));
        assert!(matches!(parse_expression("(a, b) => a + b"), Ok(Expr::Arrow(_))));
        assert!(matches!(parse_expression("() => { return 1 }"), Ok(Expr::Arrow(_))));
        assert!(matches!(parse_expression("(a)"), Ok(Expr::Ident(_))));
    }

    #[test]
    fn test_body_statements() {
        let body = parse_body("const x = line.trim(); if (x) { return x } else return 'empty'").unwrap();
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0], Stmt::Declare { mutable: false, .. }));
        assert!(matches!(body[1], Stmt::If(..)));
    }

    #[test]
    fn test_precedence() {
        let Ok(Expr::Binary(BinaryOp::Add, _, right)) = parse_expression("1 + 2 * 3") else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*right, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_expression("line => line.trim(").is_err());
        assert!(parse_body("return (line").is_err());
        assert!(parse_body("for (;;) {}").is_err());
        assert!(parse_body("const x").is_err());
        assert!(parse_expression("/[/").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(parse_expression(&deep).is_err());
        let fine = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse_expression(&fine).is_ok());
    }

    #[test]
    fn test_chain_length_limit() {
        let calls = format!("line => line{}", ".trim()".repeat(5000));
        let err = parse_expression(&calls).err().unwrap();
        assert!(err.to_string().contains("nesting too deep"), "{err}");

        let sums = format!("line => 1{}", "+1".repeat(5000));
        assert!(parse_expression(&sums).is_err());
        assert!(parse_expression(&format!("a{}", " && a".repeat(5000))).is_err());
        assert!(parse_expression(&format!("a{}", " ?? a".repeat(5000))).is_err());

        // Short chains stay usable, and the depth is given back after each one.
        let short = format!("line => line{}", ".trim()".repeat(20));
        assert!(parse_expression(&short).is_ok());
        let many = "x = line.trim().trim().trim() + 1 + 2 + 3;\n".repeat(500);
        assert!(parse_body(&format!("let x\n{many}return x")).is_ok());
    }
}
