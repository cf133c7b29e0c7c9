//! Tokenizer for the dump format.

use crate::ParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Run of `[A-Za-z0-9_?]`: keywords, integers, `d0`, `128x128xf32`.
    Word(String),
    /// `%name`, without the sigil.
    Value(String),
    /// `@name`, without the sigil.
    Symbol(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Less,
    Greater,
    Comma,
    Colon,
    Equals,
    Plus,
    Minus,
    Star,
    Arrow,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{w}'"),
            Self::Value(v) => format!("'%{v}'"),
            Self::Symbol(s) => format!("'@{s}'"),
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::LBracket => "'['".into(),
            Self::RBracket => "']'".into(),
            Self::LBrace => "'{'".into(),
            Self::RBrace => "'}'".into(),
            Self::Less => "'<'".into(),
            Self::Greater => "'>'".into(),
            Self::Comma => "','".into(),
            Self::Colon => "':'".into(),
            Self::Equals => "'='".into(),
            Self::Plus => "'+'".into(),
            Self::Minus => "'-'".into(),
            Self::Star => "'*'".into(),
            Self::Arrow => "'->'".into(),
            Self::Eof => "end of input".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '?'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            text.push(c);
            self.bump();
        }
        text
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        let error = |message: String| ParseError {
            line,
            column,
            message,
        };
        let Some(&c) = self.chars.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
                column,
            });
        };

        let kind = if is_word_char(c) {
            TokenKind::Word(self.take_while(is_word_char))
        } else {
            self.bump();
            match c {
                '%' | '@' => {
                    let name = self.take_while(is_name_char);
                    if name.is_empty() {
                        return Err(error(format!("expected a name after '{c}'")));
                    }
                    if c == '%' {
                        TokenKind::Value(name)
                    } else {
                        TokenKind::Symbol(name)
                    }
                }
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '<' => TokenKind::Less,
                '>' => TokenKind::Greater,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                '=' => TokenKind::Equals,
                '+' => TokenKind::Plus,
                '*' => TokenKind::Star,
                '-' => {
                    if self.chars.peek() == Some(&'>') {
                        self.bump();
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                other => return Err(error(format!("unexpected character '{other}'"))),
            }
        };
        Ok(Token { kind, line, column })
    }
}

/// Splits `source` into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
