use std::{iter::Peekable, str::CharIndices};

use crate::CompileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Int(i64),
    /// A bare or quoted name.
    Name(String),
    /// `#name`, or `##name` for a query that is not limited to the current file.
    StructName {
        name: String,
        global: bool,
    },
    /// A lone `#`, used by the `#=` selector.
    Hash,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Tilde,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    At,
    Dot,
    Dollar,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) pos: usize,
}

const OPERATORS: &[(&str, TokenKind)] = &[
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::Ne),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Assign),
    ("@", TokenKind::At),
    (".", TokenKind::Dot),
    ("$", TokenKind::Dollar),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    (",", TokenKind::Comma),
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source).tokens()
}

fn is_first_name_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '#'
}

struct Lexer<'s> {
    source: &'s str,
    chars: Peekable<CharIndices<'s>>,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokens(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        self.skip_whitespace();
        while let Some(&(pos, c)) = self.chars.peek() {
            let kind = if c.is_ascii_digit() {
                TokenKind::Int(self.int()?)
            } else if is_first_name_char(c) || c == '"' {
                TokenKind::Name(self.name()?)
            } else if c == '#' {
                self.struct_name()?
            } else {
                self.operator(pos, c)?
            };
            tokens.push(Token { kind, pos });
            self.skip_whitespace();
        }
        Ok(tokens)
    }

    fn operator(&mut self, pos: usize, c: char) -> Result<TokenKind, CompileError> {
        let rest = &self.source[pos..];
        let (text, kind) = OPERATORS
            .iter()
            .find(|(text, _)| rest.starts_with(text))
            .ok_or(CompileError::UnexpectedChar { pos, found: c })?;
        for _ in 0..text.len() {
            self.chars.next();
        }
        Ok(kind.clone())
    }

    /// A decimal or `0x` hex literal. Values above `i64::MAX` wrap around.
    fn int(&mut self) -> Result<i64, CompileError> {
        let mut radix = 10;
        if let Some(&(_, '0')) = self.chars.peek() {
            self.chars.next();
            if let Some(&(_, 'x' | 'X')) = self.chars.peek() {
                self.chars.next();
                radix = 16;
                match self.chars.peek() {
                    Some(&(_, c)) if c.is_ascii_hexdigit() => {}
                    Some(&(pos, found)) => {
                        return Err(CompileError::UnexpectedChar { pos, found })
                    }
                    None => {
                        return Err(CompileError::UnexpectedChar {
                            pos: self.source.len(),
                            found: 'x',
                        })
                    }
                }
            }
        }

        let mut value: u64 = 0;
        while let Some(digit) = self.chars.peek().and_then(|&(_, c)| c.to_digit(radix)) {
            value = value.wrapping_mul(radix as u64).wrapping_add(digit as u64);
            self.chars.next();
        }
        if let Some(&(pos, found)) = self.chars.peek() {
            if is_first_name_char(found) {
                return Err(CompileError::UnexpectedChar { pos, found });
            }
        }
        Ok(value as i64)
    }

    fn name(&mut self) -> Result<String, CompileError> {
        let mut name = String::new();
        match self.chars.peek() {
            Some(&(start, '"')) => {
                self.chars.next();
                loop {
                    match self.chars.next() {
                        Some((_, '"')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err(CompileError::UnterminatedQuote { pos: start }),
                    }
                }
            }
            _ => {
                while let Some(&(_, c)) = self.chars.peek().filter(|&&(_, c)| is_name_char(c)) {
                    name.push(c);
                    self.chars.next();
                }
            }
        }
        Ok(name)
    }

    fn struct_name(&mut self) -> Result<TokenKind, CompileError> {
        let pos = match self.chars.next() {
            Some((pos, _)) => pos,
            None => return Err(CompileError::BadStructName { pos: self.source.len() }),
        };
        let global = matches!(self.chars.peek(), Some(&(_, '#')));
        if global {
            self.chars.next();
        }
        match self.chars.peek() {
            Some(&(_, c)) if is_first_name_char(c) || c == '"' => {
                let name = self.name()?;
                if name.is_empty() {
                    return Err(CompileError::BadStructName { pos });
                }
                Ok(TokenKind::StructName { name, global })
            }
            _ if !global => Ok(TokenKind::Hash),
            _ => Err(CompileError::BadStructName { pos }),
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .chars
            .peek()
            .filter(|(_, c)| c.is_ascii_whitespace())
            .is_some()
        {
            self.chars.next();
        }
    }
}
