// Copyright 2026 the stepscript authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! parse.rs - Source-to-AST parsing
//! A hand-written lexer and recursive-descent parser for the supported
//! language subset, reporting errors with their line and column. Constructs
//! outside the subset (`try`, `class`, destructuring, `for-in`/`for-of`,
//! labels, template literals) are rejected here with pointed messages.

use std::rc::Rc;

use crate::ast::{
    Arg, AssignOp, BinaryOp, DeclKind, Declarator, Element, Node, NodeKind, Param, Property,
    UnaryOp, UpdateOp,
};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(f64),
    Str(String),
    Regex { pattern: String, flags: String },
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: Tok,
    start: usize,
    end: usize,
    line: usize,
    col: usize,
    newline_before: bool,
}

/// Words that cannot be used as plain identifiers in expressions.
const KEYWORDS: &[&str] = &[
    "let", "const", "var", "if", "else", "for", "while", "do", "break", "continue", "return",
    "function", "new", "this", "null", "true", "false", "typeof", "void", "in", "instanceof",
    "delete", "await", "class", "extends", "try", "catch", "finally", "throw", "switch", "case",
    "default", "import", "export", "yield", "super",
];

/// Keywords after which a `/` starts a regex literal rather than division.
const REGEX_AFTER_KW: &[&str] = &[
    "return",
    "typeof",
    "void",
    "delete",
    "in",
    "instanceof",
    "new",
    "await",
    "else",
    "do",
    "case",
];

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    col: usize,
}

fn ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.src[self.pos..].chars();
        it.next();
        it.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn err<S: Into<String>>(&self, msg: S) -> Error {
        Error::syntax(msg, self.line, self.col)
    }

    /// Skip whitespace and comments; reports whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, Error> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    if c == '\n' {
                        newline = true;
                    }
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                            None => return Err(self.err("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn lex_ident(&mut self) -> Tok {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if ident_continue(c) {
                self.bump();
            } else {
                break;
            }
        }
        Tok::Ident(self.src[start..self.pos].to_string())
    }

    fn lex_number(&mut self) -> Result<Tok, Error> {
        let start = self.pos;
        if self.peek() == Some('0') {
            match self.peek_second() {
                Some('x') | Some('X') => return self.lex_radix(16),
                Some('b') | Some('B') => return self.lex_radix(2),
                Some('o') | Some('O') => return self.lex_radix(8),
                _ => {}
            }
        }
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let exp_ok = match self.peek_second() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => true,
                _ => false,
            };
            if exp_ok {
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
                if !self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    return Err(self.err("missing exponent digits"));
                }
                while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.err(format!("invalid number literal `{}`", text)))
    }

    fn lex_radix(&mut self, radix: u32) -> Result<Tok, Error> {
        self.bump(); // 0
        self.bump(); // x / b / o
        let start = self.pos;
        while self.peek().map_or(false, |c| c.is_digit(radix)) {
            self.bump();
        }
        let digits = &self.src[start..self.pos];
        if digits.is_empty() {
            return Err(self.err("missing digits in number literal"));
        }
        u64::from_str_radix(digits, radix)
            .map(|n| Tok::Num(n as f64))
            .map_err(|_| self.err(format!("invalid number literal `{}`", digits)))
    }

    fn lex_string(&mut self) -> Result<Tok, Error> {
        let quote = self.bump().unwrap();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.err("unterminated string literal")),
                Some(c) if c == quote => return Ok(Tok::Str(out)),
                Some('\\') => match self.bump() {
                    None => return Err(self.err("unterminated string literal")),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('v') => out.push('\u{b}'),
                    Some('0') => out.push('\0'),
                    Some('\n') => {}
                    Some('x') => out.push(self.lex_hex_escape(2)?),
                    Some('u') => {
                        if self.peek() == Some('{') {
                            self.bump();
                            let start = self.pos;
                            while self.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
                                self.bump();
                            }
                            let digits = &self.src[start..self.pos];
                            if self.bump() != Some('}') {
                                return Err(self.err("unterminated unicode escape"));
                            }
                            let cp = u32::from_str_radix(digits, 16)
                                .map_err(|_| self.err("invalid unicode escape"))?;
                            match char::from_u32(cp) {
                                Some(c) => out.push(c),
                                None => return Err(self.err("invalid unicode escape")),
                            }
                        } else {
                            out.push(self.lex_hex_escape(4)?);
                        }
                    }
                    Some(c) => out.push(c),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_hex_escape(&mut self, len: usize) -> Result<char, Error> {
        let start = self.pos;
        for _ in 0..len {
            if !self.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
                return Err(self.err("invalid hex escape"));
            }
            self.bump();
        }
        let cp = u32::from_str_radix(&self.src[start..self.pos], 16)
            .map_err(|_| self.err("invalid hex escape"))?;
        char::from_u32(cp).ok_or_else(|| self.err("invalid hex escape"))
    }

    fn lex_regex(&mut self) -> Result<Tok, Error> {
        self.bump(); // opening /
        let start = self.pos;
        let mut in_class = false;
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.err("unterminated regex literal")),
                Some('\\') => {
                    self.bump();
                    if self.bump().is_none() {
                        return Err(self.err("unterminated regex literal"));
                    }
                }
                Some('[') => {
                    in_class = true;
                    self.bump();
                }
                Some(']') => {
                    in_class = false;
                    self.bump();
                }
                Some('/') if !in_class => break,
                Some(_) => {
                    self.bump();
                }
            }
        }
        let pattern = self.src[start..self.pos].to_string();
        self.bump(); // closing /
        let flags_start = self.pos;
        while self.peek().map_or(false, ident_continue) {
            self.bump();
        }
        Ok(Tok::Regex {
            pattern,
            flags: self.src[flags_start..self.pos].to_string(),
        })
    }

    fn lex_punct(&mut self) -> Result<Tok, Error> {
        const OPS: &[&str] = &[
            ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>",
            "?.", "??", "&&", "||", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=",
            "|=", "^=", "++", "--", "**", "<<", ">>", "|>", "+", "-", "*", "/", "%", "&", "|", "^",
            "~", "<", ">", "=", "!", "?", ":", ";", ",", ".", "(", ")", "[", "]", "{", "}",
        ];
        let rest = &self.src[self.pos..];
        for &op in OPS {
            if rest.starts_with(op) {
                // `x ?.5 : y` is a conditional, not an optional chain
                if op == "?." && rest[2..].chars().next().map_or(false, |c| c.is_ascii_digit()) {
                    continue;
                }
                for _ in 0..op.len() {
                    self.bump();
                }
                return Ok(Tok::Punct(op));
            }
        }
        match self.peek() {
            Some('`') => Err(self.err("template literals are not supported")),
            Some(c) => Err(self.err(format!("unexpected character `{}`", c))),
            None => Err(self.err("unexpected end of input")),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, Error> {
    let mut lx = Lexer {
        src,
        pos: 0,
        line: 1,
        col: 1,
    };
    let mut tokens = Vec::new();
    let mut newline = false;
    let mut regex_ok = true;
    loop {
        newline |= lx.skip_trivia()?;
        let (start, line, col) = (lx.pos, lx.line, lx.col);
        let c = match lx.peek() {
            Some(c) => c,
            None => {
                tokens.push(Token {
                    kind: Tok::Eof,
                    start,
                    end: start,
                    line,
                    col,
                    newline_before: newline,
                });
                return Ok(tokens);
            }
        };
        let kind = if ident_start(c) {
            lx.lex_ident()
        } else if c.is_ascii_digit()
            || (c == '.' && lx.peek_second().map_or(false, |c| c.is_ascii_digit()))
        {
            lx.lex_number()?
        } else if c == '"' || c == '\'' {
            lx.lex_string()?
        } else if c == '/' && regex_ok {
            lx.lex_regex()?
        } else {
            lx.lex_punct()?
        };
        regex_ok = match &kind {
            Tok::Ident(s) => REGEX_AFTER_KW.contains(&s.as_str()),
            Tok::Num(_) | Tok::Str(_) | Tok::Regex { .. } => false,
            Tok::Punct(p) => !matches!(*p, ")" | "]" | "++" | "--"),
            Tok::Eof => false,
        };
        tokens.push(Token {
            kind,
            start,
            end: lx.pos,
            line,
            col,
            newline_before: newline,
        });
        newline = false;
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    prev_end: usize,
    /// Whether the enclosing function body (or the program root) is async.
    async_ctx: Vec<bool>,
    /// Loop nesting per function boundary, for break/continue validation.
    loop_depth: Vec<usize>,
}

/// Parse a whole program. The program root is an async context, so
/// top-level `await` is legal.
pub fn parse_program(src: &str) -> Result<Rc<Node>, Error> {
    let tokens = tokenize(src)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        prev_end: 0,
        async_ctx: vec![true],
        loop_depth: vec![0],
    };
    let mut body = Vec::new();
    while !p.at_eof() {
        if let Some(stmt) = p.parse_statement()? {
            body.push(stmt);
        }
    }
    Ok(Node::new(NodeKind::Program { body }, 0, src.len()))
}

impl Parser {
    fn tok(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn tok_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn at_eof(&self) -> bool {
        matches!(self.tok().kind, Tok::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if !matches!(t.kind, Tok::Eof) {
            self.pos += 1;
        }
        self.prev_end = t.end;
        t
    }

    fn err_here<S: Into<String>>(&self, msg: S) -> Error {
        let t = self.tok();
        Error::syntax(msg, t.line, t.col)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.tok().kind, Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), Error> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected `{}`", p)))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(&self.tok().kind, Tok::Ident(s) if s == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), Error> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected `{}`", kw)))
        }
    }

    /// Consume an identifier that can serve as a binding name.
    fn expect_binding_name(&mut self) -> Result<String, Error> {
        match &self.tok().kind {
            Tok::Ident(s) if !KEYWORDS.contains(&s.as_str()) => {
                let name = s.clone();
                self.advance();
                Ok(name)
            }
            Tok::Ident(s) => Err(self.err_here(format!("`{}` cannot be used as a name", s))),
            Tok::Punct("[") | Tok::Punct("{") => Err(Error::UnsupportedParam(
                "destructuring patterns are not supported".to_string(),
            )),
            _ => Err(self.err_here("expected a name")),
        }
    }

    /// Statement separator: an explicit `;`, or a newline, `}` or EOF.
    fn consume_semi(&mut self) -> Result<(), Error> {
        if self.eat_punct(";") {
            return Ok(());
        }
        if self.at_eof() || self.is_punct("}") || self.tok().newline_before {
            return Ok(());
        }
        Err(self.err_here("expected `;`"))
    }

    // -- statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Option<Rc<Node>>, Error> {
        if self.eat_punct(";") {
            return Ok(None);
        }
        if self.is_punct("{") {
            return self.parse_block().map(Some);
        }
        for kw in ["class", "try", "throw", "switch", "import", "export"].iter().copied() {
            if self.is_kw(kw) {
                return Err(self.err_here(format!("`{}` is not supported", kw)));
            }
        }
        if self.is_kw("function") {
            return Err(
                self.err_here("function declarations are not supported; use a function expression")
            );
        }
        if self.is_kw("let") || self.is_kw("const") || self.is_kw("var") {
            let decl = self.parse_var_decl()?;
            self.consume_semi()?;
            return Ok(Some(decl));
        }
        if self.is_kw("if") {
            return self.parse_if().map(Some);
        }
        if self.is_kw("for") {
            return self.parse_for().map(Some);
        }
        if self.is_kw("while") {
            return self.parse_while().map(Some);
        }
        if self.is_kw("do") {
            return self.parse_do_while().map(Some);
        }
        if self.is_kw("break") {
            let start = self.tok().start;
            if *self.loop_depth.last().unwrap() == 0 {
                return Err(self.err_here("`break` outside of a loop"));
            }
            self.advance();
            self.consume_semi()?;
            return Ok(Some(Node::new(NodeKind::BreakStatement, start, self.prev_end)));
        }
        if self.is_kw("continue") {
            let start = self.tok().start;
            if *self.loop_depth.last().unwrap() == 0 {
                return Err(self.err_here("`continue` outside of a loop"));
            }
            self.advance();
            self.consume_semi()?;
            return Ok(Some(Node::new(
                NodeKind::ContinueStatement,
                start,
                self.prev_end,
            )));
        }
        if self.is_kw("return") {
            let start = self.tok().start;
            self.advance();
            let argument = if self.at_eof()
                || self.is_punct(";")
                || self.is_punct("}")
                || self.tok().newline_before
            {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.consume_semi()?;
            return Ok(Some(Node::new(
                NodeKind::ReturnStatement { argument },
                start,
                self.prev_end,
            )));
        }
        let start = self.tok().start;
        let expression = self.parse_expression()?;
        self.consume_semi()?;
        Ok(Some(Node::new(
            NodeKind::ExpressionStatement { expression },
            start,
            self.prev_end,
        )))
    }

    fn parse_block(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.err_here("expected `}`"));
            }
            if let Some(stmt) = self.parse_statement()? {
                body.push(stmt);
            }
        }
        Ok(Node::new(NodeKind::Block { body }, start, self.prev_end))
    }

    /// A loop or `if` body; a bare `;` body becomes an empty block.
    fn parse_nested_statement(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        match self.parse_statement()? {
            Some(stmt) => Ok(stmt),
            None => Ok(Node::new(
                NodeKind::Block { body: vec![] },
                start,
                self.prev_end,
            )),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        let kind = if self.eat_kw("let") {
            DeclKind::Let
        } else if self.eat_kw("const") {
            DeclKind::Const
        } else {
            self.expect_kw("var")?;
            DeclKind::Var
        };
        let mut declarations = Vec::new();
        loop {
            let name = self.expect_binding_name()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarations.push(Declarator { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Node::new(
            NodeKind::VariableDeclaration { kind, declarations },
            start,
            self.prev_end,
        ))
    }

    fn parse_if(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_kw("if")?;
        self.expect_punct("(")?;
        let test = self.parse_expression()?;
        self.expect_punct(")")?;
        let consequent = self.parse_nested_statement()?;
        let alternate = if self.eat_kw("else") {
            Some(self.parse_nested_statement()?)
        } else {
            None
        };
        Ok(Node::new(
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            },
            start,
            self.prev_end,
        ))
    }

    fn parse_for(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_kw("for")?;
        self.expect_punct("(")?;
        let init = if self.is_punct(";") {
            None
        } else if self.is_kw("let") || self.is_kw("const") || self.is_kw("var") {
            Some(self.parse_var_decl()?)
        } else {
            Some(self.parse_expression()?)
        };
        if self.is_kw("of") || self.is_kw("in") {
            return Err(self.err_here("`for-in`/`for-of` loops are not supported"));
        }
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = self.parse_loop_body()?;
        Ok(Node::new(
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            },
            start,
            self.prev_end,
        ))
    }

    fn parse_while(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_kw("while")?;
        self.expect_punct("(")?;
        let test = self.parse_expression()?;
        self.expect_punct(")")?;
        let body = self.parse_loop_body()?;
        Ok(Node::new(
            NodeKind::WhileStatement { test, body },
            start,
            self.prev_end,
        ))
    }

    fn parse_do_while(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_kw("do")?;
        let body = self.parse_loop_body()?;
        self.expect_kw("while")?;
        self.expect_punct("(")?;
        let test = self.parse_expression()?;
        self.expect_punct(")")?;
        self.consume_semi()?;
        Ok(Node::new(
            NodeKind::DoWhileStatement { body, test },
            start,
            self.prev_end,
        ))
    }

    fn parse_loop_body(&mut self) -> Result<Rc<Node>, Error> {
        *self.loop_depth.last_mut().unwrap() += 1;
        let body = self.parse_nested_statement();
        *self.loop_depth.last_mut().unwrap() -= 1;
        body
    }

    // -- expressions --------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Rc<Node>, Error> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Rc<Node>, Error> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        let start = self.tok().start;
        let left = self.parse_conditional()?;
        let op = match &self.tok().kind {
            Tok::Punct(p) => match *p {
                "=" => Some(AssignOp::Assign),
                "+=" => Some(AssignOp::Add),
                "-=" => Some(AssignOp::Sub),
                "*=" => Some(AssignOp::Mul),
                "/=" => Some(AssignOp::Div),
                "%=" => Some(AssignOp::Rem),
                "**=" => Some(AssignOp::Pow),
                "&=" => Some(AssignOp::BitAnd),
                "|=" => Some(AssignOp::BitOr),
                "^=" => Some(AssignOp::BitXor),
                "<<=" => Some(AssignOp::Shl),
                ">>=" => Some(AssignOp::Shr),
                ">>>=" => Some(AssignOp::UShr),
                "&&=" => Some(AssignOp::And),
                "||=" => Some(AssignOp::Or),
                "??=" => Some(AssignOp::Nullish),
                _ => None,
            },
            _ => None,
        };
        let op = match op {
            Some(op) => op,
            None => return Ok(left),
        };
        self.check_assignment_target(&left)?;
        self.advance();
        let right = self.parse_assignment()?;
        Ok(Node::new(
            NodeKind::AssignmentExpression { op, left, right },
            start,
            self.prev_end,
        ))
    }

    fn check_assignment_target(&self, target: &Node) -> Result<(), Error> {
        match &target.kind {
            NodeKind::Identifier { .. } => Ok(()),
            NodeKind::MemberExpression {
                optional: false, ..
            } => Ok(()),
            NodeKind::MemberExpression { optional: true, .. } => {
                Err(self.err_here("an optional chain cannot be assigned to"))
            }
            _ => Err(self.err_here("invalid assignment target")),
        }
    }

    /// Arrow-function lookahead: `x =>`, `(params) =>`, optionally preceded
    /// by `async`. Returns `None` without consuming anything when the
    /// tokens ahead are not an arrow head.
    fn try_parse_arrow(&mut self) -> Result<Option<Rc<Node>>, Error> {
        let start = self.tok().start;
        let (is_async, head) = if self.is_kw("async") {
            match &self.tok_at(1).kind {
                Tok::Ident(s) if !KEYWORDS.contains(&s.as_str()) => (true, 1),
                Tok::Punct("(") => (true, 1),
                _ => (false, 0),
            }
        } else {
            (false, 0)
        };
        match &self.tok_at(head).kind {
            Tok::Ident(s) if !KEYWORDS.contains(&s.as_str()) => {
                if !matches!(self.tok_at(head + 1).kind, Tok::Punct("=>")) {
                    return Ok(None);
                }
                if is_async {
                    self.advance();
                }
                let name = self.expect_binding_name()?;
                self.expect_punct("=>")?;
                let body = self.parse_arrow_body(is_async)?;
                Ok(Some(Node::new(
                    NodeKind::FunctionExpression {
                        name: None,
                        params: vec![Param::Ident(name)],
                        body,
                        is_async,
                        is_arrow: true,
                    },
                    start,
                    self.prev_end,
                )))
            }
            Tok::Punct("(") => {
                if !self.paren_group_is_arrow_head(head) {
                    return Ok(None);
                }
                if is_async {
                    self.advance();
                }
                let params = self.parse_params()?;
                self.expect_punct("=>")?;
                let body = self.parse_arrow_body(is_async)?;
                Ok(Some(Node::new(
                    NodeKind::FunctionExpression {
                        name: None,
                        params,
                        body,
                        is_async,
                        is_arrow: true,
                    },
                    start,
                    self.prev_end,
                )))
            }
            _ => Ok(None),
        }
    }

    /// Scan ahead over a balanced paren group starting at `offset`; true if
    /// the token after it is `=>`.
    fn paren_group_is_arrow_head(&self, offset: usize) -> bool {
        let mut i = self.pos + offset;
        let mut depth = 0usize;
        loop {
            let tok = match self.tokens.get(i) {
                Some(t) => t,
                None => return false,
            };
            match &tok.kind {
                Tok::Punct("(") => depth += 1,
                Tok::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(Tok::Punct("=>"))
                        );
                    }
                }
                Tok::Eof => return false,
                _ => {}
            }
            i += 1;
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, Error> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        loop {
            if self.eat_punct(")") {
                return Ok(params);
            }
            if self.eat_punct("...") {
                let name = self.expect_binding_name()?;
                params.push(Param::Rest(name));
                if !self.is_punct(")") {
                    return Err(Error::UnsupportedParam(
                        "a rest parameter must be last".to_string(),
                    ));
                }
                continue;
            }
            let name = self.expect_binding_name()?;
            if self.is_punct("=") {
                return Err(Error::UnsupportedParam(
                    "default parameter values are not supported".to_string(),
                ));
            }
            params.push(Param::Ident(name));
            if !self.eat_punct(",") && !self.is_punct(")") {
                return Err(self.err_here("expected `,` or `)`"));
            }
        }
    }

    fn parse_arrow_body(&mut self, is_async: bool) -> Result<Rc<Node>, Error> {
        if self.is_punct("{") {
            self.parse_function_block(is_async)
        } else {
            self.async_ctx.push(is_async);
            let body = self.parse_assignment();
            self.async_ctx.pop();
            body
        }
    }

    fn parse_function_block(&mut self, is_async: bool) -> Result<Rc<Node>, Error> {
        self.async_ctx.push(is_async);
        self.loop_depth.push(0);
        let body = self.parse_block();
        self.loop_depth.pop();
        self.async_ctx.pop();
        body
    }

    fn parse_conditional(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        let test = self.parse_binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Node::new(
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            },
            start,
            self.prev_end,
        ))
    }

    fn peek_binary_op(&self) -> Option<(u8, BinaryOp)> {
        match &self.tok().kind {
            Tok::Ident(s) if s == "in" => Some((9, BinaryOp::In)),
            Tok::Ident(s) if s == "instanceof" => Some((9, BinaryOp::InstanceOf)),
            Tok::Punct(p) => Some(match *p {
                "|>" => (1, BinaryOp::Pipeline),
                "??" => (2, BinaryOp::Nullish),
                "||" => (3, BinaryOp::Or),
                "&&" => (4, BinaryOp::And),
                "|" => (5, BinaryOp::BitOr),
                "^" => (6, BinaryOp::BitXor),
                "&" => (7, BinaryOp::BitAnd),
                "==" => (8, BinaryOp::LooseEq),
                "!=" => (8, BinaryOp::LooseNotEq),
                "===" => (8, BinaryOp::StrictEq),
                "!==" => (8, BinaryOp::StrictNotEq),
                "<" => (9, BinaryOp::Lt),
                "<=" => (9, BinaryOp::Le),
                ">" => (9, BinaryOp::Gt),
                ">=" => (9, BinaryOp::Ge),
                "<<" => (10, BinaryOp::Shl),
                ">>" => (10, BinaryOp::Shr),
                ">>>" => (10, BinaryOp::UShr),
                "+" => (11, BinaryOp::Add),
                "-" => (11, BinaryOp::Sub),
                "*" => (12, BinaryOp::Mul),
                "/" => (12, BinaryOp::Div),
                "%" => (12, BinaryOp::Rem),
                "**" => (13, BinaryOp::Pow),
                _ => return None,
            }),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        let mut left = self.parse_unary()?;
        while let Some((prec, op)) = self.peek_binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            // `**` is right-associative
            let next_min = if op == BinaryOp::Pow { prec } else { prec + 1 };
            let right = self.parse_binary(next_min)?;
            left = Node::new(
                NodeKind::BinaryExpression { op, left, right },
                start,
                self.prev_end,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        let unary = match &self.tok().kind {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("~") => Some(UnaryOp::BitNot),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Punct("-") => Some(UnaryOp::Minus),
            Tok::Ident(s) if s == "typeof" => Some(UnaryOp::TypeOf),
            Tok::Ident(s) if s == "void" => Some(UnaryOp::Void),
            Tok::Ident(s) if s == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let argument = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::UnaryExpression { op, argument },
                start,
                self.prev_end,
            ));
        }
        if self.is_punct("++") || self.is_punct("--") {
            let op = if self.eat_punct("++") {
                UpdateOp::Inc
            } else {
                self.advance();
                UpdateOp::Dec
            };
            let argument = self.parse_unary()?;
            self.check_assignment_target(&argument)?;
            return Ok(Node::new(
                NodeKind::UpdateExpression {
                    op,
                    prefix: true,
                    argument,
                },
                start,
                self.prev_end,
            ));
        }
        if self.is_kw("await") {
            if !*self.async_ctx.last().unwrap() {
                return Err(self.err_here("`await` is only valid in async functions"));
            }
            self.advance();
            let argument = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::AwaitExpression { argument },
                start,
                self.prev_end,
            ));
        }
        if self.is_kw("new") {
            self.advance();
            let callee = self.parse_member_only()?;
            let arguments = if self.is_punct("(") {
                self.parse_args()?
            } else {
                Vec::new()
            };
            let new_node = Node::new(
                NodeKind::NewExpression { callee, arguments },
                start,
                self.prev_end,
            );
            // allow `new Foo().bar` and similar continuations
            return self.parse_postfix_from(new_node);
        }
        let primary = self.parse_primary()?;
        self.parse_postfix_from(primary)
    }

    fn parse_postfix_from(&mut self, seed: Rc<Node>) -> Result<Rc<Node>, Error> {
        let start = seed.start;
        let expr = self.parse_call_chain(seed)?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.tok().newline_before {
            let op = if self.eat_punct("++") {
                UpdateOp::Inc
            } else {
                self.advance();
                UpdateOp::Dec
            };
            self.check_assignment_target(&expr)?;
            return Ok(Node::new(
                NodeKind::UpdateExpression {
                    op,
                    prefix: false,
                    argument: expr,
                },
                start,
                self.prev_end,
            ));
        }
        Ok(expr)
    }

    fn parse_call_chain(&mut self, seed: Rc<Node>) -> Result<Rc<Node>, Error> {
        let start = seed.start;
        let mut expr = seed;
        // once `?.` appears, every later link in the chain short-circuits
        let mut chain_optional = false;
        loop {
            if self.eat_punct(".") {
                let property = self.parse_property_name()?;
                expr = Node::new(
                    NodeKind::MemberExpression {
                        object: expr,
                        property,
                        computed: false,
                        optional: chain_optional,
                    },
                    start,
                    self.prev_end,
                );
            } else if self.is_punct("?.") {
                self.advance();
                chain_optional = true;
                if self.is_punct("(") {
                    let arguments = self.parse_args()?;
                    expr = Node::new(
                        NodeKind::CallExpression {
                            callee: expr,
                            arguments,
                            optional: true,
                        },
                        start,
                        self.prev_end,
                    );
                } else if self.eat_punct("[") {
                    let property = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = Node::new(
                        NodeKind::MemberExpression {
                            object: expr,
                            property,
                            computed: true,
                            optional: true,
                        },
                        start,
                        self.prev_end,
                    );
                } else {
                    let property = self.parse_property_name()?;
                    expr = Node::new(
                        NodeKind::MemberExpression {
                            object: expr,
                            property,
                            computed: false,
                            optional: true,
                        },
                        start,
                        self.prev_end,
                    );
                }
            } else if self.eat_punct("[") {
                let property = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = Node::new(
                    NodeKind::MemberExpression {
                        object: expr,
                        property,
                        computed: true,
                        optional: chain_optional,
                    },
                    start,
                    self.prev_end,
                );
            } else if self.is_punct("(") {
                let arguments = self.parse_args()?;
                expr = Node::new(
                    NodeKind::CallExpression {
                        callee: expr,
                        arguments,
                        optional: chain_optional,
                    },
                    start,
                    self.prev_end,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// `new` callees: member accesses only, no calls or optional links.
    fn parse_member_only(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.parse_property_name()?;
                expr = Node::new(
                    NodeKind::MemberExpression {
                        object: expr,
                        property,
                        computed: false,
                        optional: false,
                    },
                    start,
                    self.prev_end,
                );
            } else if self.eat_punct("[") {
                let property = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = Node::new(
                    NodeKind::MemberExpression {
                        object: expr,
                        property,
                        computed: true,
                        optional: false,
                    },
                    start,
                    self.prev_end,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// Property names after `.` may be any word, keywords included.
    fn parse_property_name(&mut self) -> Result<Rc<Node>, Error> {
        let t = self.tok().clone();
        match t.kind {
            Tok::Ident(name) => {
                self.advance();
                Ok(Node::new(NodeKind::Identifier { name }, t.start, t.end))
            }
            _ => Err(self.err_here("expected a property name")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Arg>, Error> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        loop {
            if self.eat_punct(")") {
                return Ok(args);
            }
            if self.eat_punct("...") {
                args.push(Arg::Spread(self.parse_assignment()?));
            } else {
                args.push(Arg::Expr(self.parse_assignment()?));
            }
            if !self.eat_punct(",") && !self.is_punct(")") {
                return Err(self.err_here("expected `,` or `)`"));
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Rc<Node>, Error> {
        let t = self.tok().clone();
        match &t.kind {
            Tok::Num(n) => {
                self.advance();
                Ok(Node::new(
                    NodeKind::NumericLiteral { value: *n },
                    t.start,
                    t.end,
                ))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Node::new(
                    NodeKind::StringLiteral { value: s.clone() },
                    t.start,
                    t.end,
                ))
            }
            Tok::Regex { pattern, flags } => {
                self.advance();
                Ok(Node::new(
                    NodeKind::RegExpLiteral {
                        pattern: pattern.clone(),
                        flags: flags.clone(),
                    },
                    t.start,
                    t.end,
                ))
            }
            Tok::Punct("(") => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => self.parse_array_literal(),
            Tok::Punct("{") => self.parse_object_literal(),
            Tok::Ident(word) => match word.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Node::new(
                        NodeKind::BooleanLiteral {
                            value: word == "true",
                        },
                        t.start,
                        t.end,
                    ))
                }
                "null" => {
                    self.advance();
                    Ok(Node::new(NodeKind::NullLiteral, t.start, t.end))
                }
                "this" => {
                    self.advance();
                    Ok(Node::new(NodeKind::ThisExpression, t.start, t.end))
                }
                "function" => self.parse_function_expression(false),
                "async" => {
                    if matches!(&self.tok_at(1).kind, Tok::Ident(s) if s == "function") {
                        self.advance();
                        self.parse_function_expression(true)
                    } else {
                        // `async` is contextual; bare uses are identifiers
                        self.advance();
                        Ok(Node::new(
                            NodeKind::Identifier {
                                name: "async".to_string(),
                            },
                            t.start,
                            t.end,
                        ))
                    }
                }
                w if KEYWORDS.contains(&w) => {
                    Err(self.err_here(format!("unexpected keyword `{}`", w)))
                }
                _ => {
                    self.advance();
                    Ok(Node::new(
                        NodeKind::Identifier { name: word.clone() },
                        t.start,
                        t.end,
                    ))
                }
            },
            Tok::Punct(p) => Err(self.err_here(format!("unexpected token `{}`", p))),
            Tok::Eof => Err(self.err_here("unexpected end of input")),
        }
    }

    fn parse_function_expression(&mut self, is_async: bool) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_kw("function")?;
        let name = match &self.tok().kind {
            Tok::Ident(s) if !KEYWORDS.contains(&s.as_str()) => {
                let n = s.clone();
                self.advance();
                Some(n)
            }
            _ => None,
        };
        let params = self.parse_params()?;
        let body = self.parse_function_block(is_async)?;
        Ok(Node::new(
            NodeKind::FunctionExpression {
                name,
                params,
                body,
                is_async,
                is_arrow: false,
            },
            start,
            self.prev_end,
        ))
    }

    fn parse_array_literal(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_punct("[")?;
        let mut elements = Vec::new();
        loop {
            if self.eat_punct("]") {
                break;
            }
            if self.is_punct(",") {
                self.advance();
                elements.push(Element::Hole);
                continue;
            }
            if self.eat_punct("...") {
                elements.push(Element::Spread(self.parse_assignment()?));
            } else {
                elements.push(Element::Expr(self.parse_assignment()?));
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct("]")?;
            break;
        }
        Ok(Node::new(
            NodeKind::ArrayExpression { elements },
            start,
            self.prev_end,
        ))
    }

    fn parse_object_literal(&mut self) -> Result<Rc<Node>, Error> {
        let start = self.tok().start;
        self.expect_punct("{")?;
        let mut properties = Vec::new();
        loop {
            if self.eat_punct("}") {
                break;
            }
            if self.eat_punct("...") {
                properties.push(Property::Spread(self.parse_assignment()?));
            } else {
                properties.push(self.parse_object_entry()?);
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct("}")?;
            break;
        }
        Ok(Node::new(
            NodeKind::ObjectExpression { properties },
            start,
            self.prev_end,
        ))
    }

    fn parse_object_entry(&mut self) -> Result<Property, Error> {
        // `async` is a method modifier only when a key follows it
        let is_async_method = self.is_kw("async")
            && matches!(
                &self.tok_at(1).kind,
                Tok::Ident(_) | Tok::Str(_) | Tok::Num(_) | Tok::Punct("[")
            );
        if is_async_method {
            self.advance();
            let (key, computed, name) = self.parse_object_key()?;
            return self.parse_object_method(key, computed, name, true);
        }
        let (key, computed, name) = self.parse_object_key()?;
        if self.eat_punct(":") {
            let value = self.parse_assignment()?;
            return Ok(Property::Keyed {
                key,
                value,
                computed,
                method: false,
            });
        }
        if self.is_punct("(") {
            return self.parse_object_method(key, computed, name, false);
        }
        // shorthand `{ x }`
        match &key.kind {
            NodeKind::Identifier { name } if !KEYWORDS.contains(&name.as_str()) => {
                let value = Node::new(
                    NodeKind::Identifier { name: name.clone() },
                    key.start,
                    key.end,
                );
                Ok(Property::Keyed {
                    key,
                    value,
                    computed: false,
                    method: false,
                })
            }
            _ => Err(self.err_here("expected `:`, `(` or `,` after property key")),
        }
    }

    /// Returns the key node, whether it is computed, and the static name
    /// usable for method naming.
    fn parse_object_key(&mut self) -> Result<(Rc<Node>, bool, Option<String>), Error> {
        let t = self.tok().clone();
        match &t.kind {
            Tok::Ident(name) => {
                self.advance();
                Ok((
                    Node::new(NodeKind::Identifier { name: name.clone() }, t.start, t.end),
                    false,
                    Some(name.clone()),
                ))
            }
            Tok::Str(s) => {
                self.advance();
                Ok((
                    Node::new(NodeKind::StringLiteral { value: s.clone() }, t.start, t.end),
                    false,
                    Some(s.clone()),
                ))
            }
            Tok::Num(n) => {
                self.advance();
                Ok((
                    Node::new(NodeKind::NumericLiteral { value: *n }, t.start, t.end),
                    false,
                    None,
                ))
            }
            Tok::Punct("[") => {
                self.advance();
                let key = self.parse_assignment()?;
                self.expect_punct("]")?;
                Ok((key, true, None))
            }
            _ => Err(self.err_here("expected a property key")),
        }
    }

    fn parse_object_method(
        &mut self,
        key: Rc<Node>,
        computed: bool,
        name: Option<String>,
        is_async: bool,
    ) -> Result<Property, Error> {
        let start = key.start;
        let params = self.parse_params()?;
        let body = self.parse_function_block(is_async)?;
        let value = Node::new(
            NodeKind::FunctionExpression {
                name,
                params,
                body,
                is_async,
                is_arrow: false,
            },
            start,
            self.prev_end,
        );
        Ok(Property::Keyed {
            key,
            value,
            computed,
            method: true,
        })
    }
}
