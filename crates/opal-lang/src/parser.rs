//! The recursive-descent parser.
//!
//! Statements and expressions build IR directly through the function
//! builder. Control flow mirrors the block shapes the backend expects:
//! `while` makes condition/body/after blocks, `if` makes then/else/after,
//! and a block statement gets its own inside/after pair.

use std::fmt;

use opal_builder::{BuildError, FunctionBuilder};
use opal_ir::{name, CmpKind, Function, Name, ValueId};

use crate::lexer::{LexError, Lexer};
use crate::token::{Token, TokenKind};

/// Frontend errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unrecognized character in the source.
    UnexpectedChar { ch: char, offset: usize },
    /// A specific token was required.
    Expected { expected: &'static str, got: String },
    /// A token no production starts with.
    UnexpectedToken { got: String },
    /// Integer literal outside the 32-bit range.
    BadNumber { text: String },
    /// Assignment to an expression with no storage location.
    NotAssignable,
    /// IR construction failed (duplicate `let`, call arity, ...).
    Build(BuildError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedChar { ch, offset } => {
                write!(f, "unrecognized character {ch:?} at offset {offset}")
            }
            ParseError::Expected { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
            ParseError::UnexpectedToken { got } => write!(f, "unexpected token: {got}"),
            ParseError::BadNumber { text } => {
                write!(f, "integer literal '{text}' does not fit 32 bits")
            }
            ParseError::NotAssignable => {
                write!(f, "left side of assignment has no storage location")
            }
            ParseError::Build(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError::UnexpectedChar {
            ch: err.ch,
            offset: err.offset,
        }
    }
}

impl From<BuildError> for ParseError {
    fn from(err: BuildError) -> Self {
        ParseError::Build(err)
    }
}

/// Parse a source file into IR functions.
pub fn parse_source(source: &str) -> Result<Vec<Function>, ParseError> {
    Parser::new(source).parse_source()
}

/// What the most recently parsed expression can be assigned through.
#[derive(Clone, Copy)]
enum LValue {
    None,
    /// A variable binding in the current block.
    Var(Name),
    /// An attribute location handle.
    Attr(ValueId),
}

struct Parser<'src> {
    lexer: Lexer<'src>,
    builder: Option<FunctionBuilder>,
    lvalue: LValue,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            lexer: Lexer::new(source),
            builder: None,
            lvalue: LValue::None,
        }
    }

    fn builder(&mut self) -> &mut FunctionBuilder {
        self.builder.as_mut().expect("parsing inside a function")
    }

    fn peek(&mut self) -> Result<Token<'src>, ParseError> {
        Ok(self.lexer.peek_token()?)
    }

    fn peek_is(&mut self, kind: TokenKind) -> Result<bool, ParseError> {
        Ok(self.peek()?.kind == kind)
    }

    fn advance(&mut self) -> Result<Token<'src>, ParseError> {
        Ok(self.lexer.next_token()?)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        let token = self.advance()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(ParseError::Expected {
                expected: kind.describe(),
                got: token.kind.describe().to_string(),
            })
        }
    }

    // region Expressions

    fn parse_expression(&mut self) -> Result<ValueId, ParseError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<ValueId, ParseError> {
        let saved = std::mem::replace(&mut self.lvalue, LValue::None);
        let mut expr = self.parse_compare()?;
        if self.peek_is(TokenKind::Equal)? {
            self.expect(TokenKind::Equal)?;
            let target = self.lvalue;
            let right = self.parse_assign()?;
            expr = match target {
                LValue::Var(var) => self.builder().set_variable(var, right)?,
                LValue::Attr(loc) => self.builder().set_loc(loc, right),
                LValue::None => return Err(ParseError::NotAssignable),
            };
        }
        self.lvalue = saved;
        Ok(expr)
    }

    fn parse_compare(&mut self) -> Result<ValueId, ParseError> {
        let mut expr = self.parse_addition()?;
        loop {
            let kind = match self.peek()?.kind {
                TokenKind::Less => CmpKind::Less,
                TokenKind::Greater => CmpKind::Greater,
                _ => return Ok(expr),
            };
            self.advance()?;
            let right = self.parse_addition()?;
            expr = self.builder().cmp(kind, expr, right);
            self.lvalue = LValue::None;
        }
    }

    fn parse_addition(&mut self) -> Result<ValueId, ParseError> {
        let mut expr = self.parse_postfix()?;
        loop {
            match self.peek()?.kind {
                TokenKind::Plus => {
                    self.expect(TokenKind::Plus)?;
                    let right = self.parse_postfix()?;
                    expr = self.builder().add(expr, right);
                }
                TokenKind::Minus => {
                    self.expect(TokenKind::Minus)?;
                    let right = self.parse_postfix()?;
                    expr = self.builder().sub(expr, right);
                }
                _ => return Ok(expr),
            }
            self.lvalue = LValue::None;
        }
    }

    fn parse_postfix(&mut self) -> Result<ValueId, ParseError> {
        let mut expr = self.parse_terminal()?;
        loop {
            match self.peek()?.kind {
                TokenKind::LeftParen => {
                    expr = self.parse_call_arguments(expr)?;
                    self.lvalue = LValue::None;
                }
                TokenKind::Dot => {
                    expr = self.parse_attribute(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_arguments(&mut self, callee: ValueId) -> Result<ValueId, ParseError> {
        let call = self.builder().call(callee);
        self.expect(TokenKind::LeftParen)?;
        while !self.peek_is(TokenKind::RightParen)? {
            let arg = self.parse_expression()?;
            self.builder().call_argument(call, arg)?;
            if self.peek_is(TokenKind::Comma)? {
                self.expect(TokenKind::Comma)?;
            } else {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(call)
    }

    fn parse_attribute(&mut self, expr: ValueId) -> Result<ValueId, ParseError> {
        self.expect(TokenKind::Dot)?;
        let attr = self.expect(TokenKind::Ident)?;
        let loc = self.builder().get_attr(expr, name(attr.text));
        self.lvalue = LValue::Attr(loc);
        Ok(self.builder().get_loc(loc))
    }

    fn parse_terminal(&mut self) -> Result<ValueId, ParseError> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Ident => {
                self.expect(TokenKind::Ident)?;
                let ident = name(token.text);
                match self.builder().get_variable(ident) {
                    Some(value) => {
                        self.lvalue = LValue::Var(ident);
                        Ok(value)
                    }
                    // Unbound names resolve as globals, lazily, at run time.
                    None => {
                        self.lvalue = LValue::None;
                        Ok(self.builder().global(ident))
                    }
                }
            }
            TokenKind::Number => {
                self.expect(TokenKind::Number)?;
                let constant: i32 = token.text.parse().map_err(|_| ParseError::BadNumber {
                    text: token.text.to_string(),
                })?;
                self.lvalue = LValue::None;
                Ok(self.builder().int(constant))
            }
            TokenKind::LeftParen => {
                self.expect(TokenKind::LeftParen)?;
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RightParen)?;
                Ok(expr)
            }
            TokenKind::LeftBrace => {
                self.expect(TokenKind::LeftBrace)?;
                self.expect(TokenKind::RightBrace)?;
                self.lvalue = LValue::None;
                Ok(self.builder().new_object())
            }
            other => Err(ParseError::UnexpectedToken {
                got: other.describe().to_string(),
            }),
        }
    }

    // endregion

    // region Statements

    fn parse_statement(&mut self) -> Result<(), ParseError> {
        match self.peek()?.kind {
            TokenKind::Return => self.parse_return(),
            TokenKind::Let => self.parse_let(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::LeftBrace => self.parse_block(),
            _ => {
                self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(())
            }
        }
    }

    fn parse_let(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::Let)?;
        let var = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::Equal)?;
        let value = self.parse_expression()?;
        self.builder().add_variable(name(var.text), value)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    fn parse_return(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::Return)?;
        let value = self.parse_expression()?;
        self.builder().ret(value);
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    fn parse_if(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LeftParen)?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RightParen)?;

        let then_block = self.builder().add_block();
        let else_block = self.builder().add_block();
        let after_block = self.builder().add_block();
        self.builder().cbranch(cond, then_block, else_block)?;

        self.builder().enter_block(then_block);
        self.parse_statement()?;
        if !self.builder().is_terminated() {
            self.builder().branch(after_block)?;
        }

        self.expect(TokenKind::Else)?;
        self.builder().enter_block(else_block);
        self.parse_statement()?;
        if !self.builder().is_terminated() {
            self.builder().branch(after_block)?;
        }

        self.builder().enter_block(after_block);
        Ok(())
    }

    fn parse_while(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::While)?;

        let cond_block = self.builder().add_block();
        self.builder().branch(cond_block)?;
        self.builder().enter_block(cond_block);

        self.expect(TokenKind::LeftParen)?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RightParen)?;

        let do_block = self.builder().add_block();
        let after_block = self.builder().add_block();
        self.builder().cbranch(cond, do_block, after_block)?;

        self.builder().enter_block(do_block);
        self.parse_statement()?;
        if !self.builder().is_terminated() {
            self.builder().branch(cond_block)?;
        }

        self.builder().enter_block(after_block);
        Ok(())
    }

    fn parse_block(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::LeftBrace)?;
        let inside = self.builder().add_block();
        self.builder().branch(inside)?;
        self.builder().enter_block(inside);
        while !self.peek_is(TokenKind::RightBrace)? {
            self.parse_statement()?;
        }
        self.expect(TokenKind::RightBrace)?;
        let after = self.builder().add_block();
        if !self.builder().is_terminated() {
            self.builder().branch(after)?;
        }
        self.builder().enter_block(after);
        Ok(())
    }

    // endregion

    fn parse_function(&mut self) -> Result<Function, ParseError> {
        self.expect(TokenKind::Def)?;
        let fname = self.expect(TokenKind::Ident)?;
        self.builder = Some(FunctionBuilder::new(name(fname.text)));

        self.expect(TokenKind::LeftParen)?;
        while !self.peek_is(TokenKind::RightParen)? {
            let pname = self.expect(TokenKind::Ident)?;
            let param = self.builder().add_parameter(name(pname.text));
            self.builder().add_variable(name(pname.text), param)?;
            if self.peek_is(TokenKind::Comma)? {
                self.expect(TokenKind::Comma)?;
            } else {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;

        self.expect(TokenKind::LeftBrace)?;
        while !self.peek_is(TokenKind::RightBrace)? {
            self.parse_statement()?;
        }
        self.expect(TokenKind::RightBrace)?;

        let builder = self.builder.take().expect("builder set above");
        Ok(builder.finish())
    }

    fn parse_source(mut self) -> Result<Vec<Function>, ParseError> {
        let mut functions = Vec::new();
        while !self.peek_is(TokenKind::Eof)? {
            if !self.peek_is(TokenKind::Def)? {
                let got = self.peek()?.kind.describe().to_string();
                return Err(ParseError::Expected {
                    expected: TokenKind::Def.describe(),
                    got,
                });
            }
            functions.push(self.parse_function()?);
        }
        Ok(functions)
    }
}
