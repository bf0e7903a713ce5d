//! Tokenizer for the contract language.
//!
//! Hand-written scanner with the language's automatic semicolon rule:
//! a newline after a statement-terminating token yields a `Semi` token.
//! Comments never reach the parser; they are collected separately so
//! the screener can scan them for toolchain directives.

use thiserror::Error;

use crate::token::{Comment, Keyword, Pos, Token, TokenKind};

#[derive(Debug, Clone, Error)]
#[error("lex error at {pos}: {message}")]
pub struct LexError {
    pub pos: Pos,
    pub message: String,
}

pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub comments: Vec<Comment>,
}

pub fn lex(source: &str) -> Result<LexOutput, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a [u8],
    offset: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    comments: Vec<Comment>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            offset: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            pos: self.pos(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.offset).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.offset + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.offset += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, pos: Pos) {
        self.tokens.push(Token { kind, pos });
    }

    /// Semicolon insertion: called on every newline (and at EOF).
    fn maybe_semi(&mut self, pos: Pos) {
        if let Some(last) = self.tokens.last() {
            if last.kind.terminates_statement() {
                self.push(TokenKind::Semi, pos);
            }
        }
    }

    fn run(mut self) -> Result<LexOutput, LexError> {
        loop {
            let pos = self.pos();
            let Some(ch) = self.peek() else {
                self.maybe_semi(pos);
                self.push(TokenKind::Eof, pos);
                return Ok(LexOutput {
                    tokens: self.tokens,
                    comments: self.comments,
                });
            };

            match ch {
                b' ' | b'\t' | b'\r' => {
                    self.bump();
                }
                b'\n' => {
                    self.bump();
                    self.maybe_semi(pos);
                }
                b'/' => {
                    if self.peek_at(1) == Some(b'/') {
                        self.line_comment(pos);
                    } else if self.peek_at(1) == Some(b'*') {
                        self.block_comment(pos)?;
                    } else {
                        self.operator(pos)?;
                    }
                }
                b'"' => self.string_lit(pos)?,
                b'`' => self.raw_string_lit(pos)?,
                b'\'' => self.rune_lit(pos)?,
                b'0'..=b'9' => self.number(pos),
                b'.' => {
                    if matches!(self.peek_at(1), Some(b'0'..=b'9')) {
                        self.number(pos);
                    } else {
                        self.operator(pos)?;
                    }
                }
                c if is_ident_start(c) => self.ident(pos),
                _ => self.operator(pos)?,
            }
        }
    }

    fn line_comment(&mut self, pos: Pos) {
        self.bump();
        self.bump(); // consume "//"
        let start = self.offset;
        while let Some(ch) = self.peek() {
            if ch == b'\n' {
                break;
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();
        self.comments.push(Comment {
            text,
            line: pos.line,
            block: false,
        });
        // The trailing newline is handled by the main loop and triggers
        // semicolon insertion there.
    }

    fn block_comment(&mut self, pos: Pos) -> Result<(), LexError> {
        self.bump();
        self.bump(); // consume "/*"
        let start = self.offset;
        let start_line = self.line;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated block comment")),
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                    let text =
                        String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();
                    self.bump();
                    self.bump();
                    let spans_lines = self.line > start_line;
                    self.comments.push(Comment {
                        text,
                        line: pos.line,
                        block: true,
                    });
                    // A multi-line comment acts like a newline.
                    if spans_lines {
                        self.maybe_semi(pos);
                    }
                    return Ok(());
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn ident(&mut self, pos: Pos) {
        let start = self.offset;
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                self.bump();
            } else {
                break;
            }
        }
        let name = String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();
        let kind = match Keyword::lookup(&name) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(name),
        };
        self.push(kind, pos);
    }

    fn number(&mut self, pos: Pos) {
        let start = self.offset;
        let mut is_float = false;

        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x' | b'X' | b'b' | b'B' | b'o' | b'O'))
        {
            self.bump();
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
                self.bump();
            }
        } else {
            while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'_') {
                self.bump();
            }
            if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit())
            {
                is_float = true;
                self.bump();
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'_') {
                    self.bump();
                }
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.bump();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text = String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();
        let kind = if is_float {
            TokenKind::Float(text)
        } else {
            TokenKind::Int(text)
        };
        self.push(kind, pos);
    }

    fn string_lit(&mut self, pos: Pos) -> Result<(), LexError> {
        self.bump(); // opening quote
        let mut value: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => return Err(self.error("unterminated string literal")),
                Some(b'"') => break,
                Some(b'\\') => {
                    let esc = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
                    match esc {
                        b'n' => value.push(b'\n'),
                        b't' => value.push(b'\t'),
                        b'r' => value.push(b'\r'),
                        b'\\' => value.push(b'\\'),
                        b'"' => value.push(b'"'),
                        b'\'' => value.push(b'\''),
                        b'0' => value.push(b'\0'),
                        other => {
                            // Unrecognized escapes kept verbatim; the
                            // toolchain validates the full escape set.
                            value.push(b'\\');
                            value.push(other);
                        }
                    }
                }
                Some(other) => value.push(other),
            }
        }
        let value = String::from_utf8_lossy(&value).into_owned();
        self.push(TokenKind::Str(value), pos);
        Ok(())
    }

    fn raw_string_lit(&mut self, pos: Pos) -> Result<(), LexError> {
        self.bump(); // opening backtick
        let start = self.offset;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated raw string literal")),
                Some(b'`') => {
                    let value =
                        String::from_utf8_lossy(&self.src[start..self.offset]).into_owned();
                    self.bump();
                    self.push(TokenKind::Str(value), pos);
                    return Ok(());
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn rune_lit(&mut self, pos: Pos) -> Result<(), LexError> {
        self.bump(); // opening quote
        let start = self.offset;
        loop {
            match self.bump() {
                None | Some(b'\n') => return Err(self.error("unterminated rune literal")),
                Some(b'\\') => {
                    self.bump();
                }
                Some(b'\'') => {
                    let text =
                        String::from_utf8_lossy(&self.src[start..self.offset - 1]).into_owned();
                    self.push(TokenKind::Char(text), pos);
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    fn operator(&mut self, pos: Pos) -> Result<(), LexError> {
        let ch = self.bump().expect("operator start");
        let kind = match ch {
            b'+' => {
                if self.eat(b'+') {
                    TokenKind::Inc
                } else if self.eat(b'=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    TokenKind::Dec
                } else if self.eat(b'=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => {
                if self.eat(b'=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    TokenKind::AndAnd
                } else if self.eat(b'^') {
                    if self.eat(b'=') {
                        TokenKind::AmpCaretAssign
                    } else {
                        TokenKind::AmpCaret
                    }
                } else if self.eat(b'=') {
                    TokenKind::AmpAssign
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    TokenKind::OrOr
                } else if self.eat(b'=') {
                    TokenKind::PipeAssign
                } else {
                    TokenKind::Pipe
                }
            }
            b'^' => {
                if self.eat(b'=') {
                    TokenKind::CaretAssign
                } else {
                    TokenKind::Caret
                }
            }
            b'<' => {
                if self.eat(b'-') {
                    TokenKind::Arrow
                } else if self.eat(b'<') {
                    if self.eat(b'=') {
                        TokenKind::ShlAssign
                    } else {
                        TokenKind::Shl
                    }
                } else if self.eat(b'=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    if self.eat(b'=') {
                        TokenKind::ShrAssign
                    } else {
                        TokenKind::Shr
                    }
                } else if self.eat(b'=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            b':' => {
                if self.eat(b'=') {
                    TokenKind::Define
                } else {
                    TokenKind::Colon
                }
            }
            b'.' => {
                if self.peek() == Some(b'.') && self.peek_at(1) == Some(b'.') {
                    self.bump();
                    self.bump();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            other => {
                return Err(self.error(format!("unexpected character {:?}", other as char)));
            }
        };
        self.push(kind, pos);
        Ok(())
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_' || ch >= 0x80
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_package_clause() {
        let toks = kinds("package counter\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::Package),
                TokenKind::Ident("counter".into()),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn inserts_semicolon_after_terminating_tokens_only() {
        let toks = kinds("x := 1 +\n2\n");
        // no semicolon after `+`, one after `2`
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Define,
                TokenKind::Int("1".into()),
                TokenKind::Plus,
                TokenKind::Int("2".into()),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn collects_comments_out_of_band() {
        let out = lex("// leading\nx := 1 /* inline */\n").unwrap();
        assert_eq!(out.comments.len(), 2);
        assert_eq!(out.comments[0].text, " leading");
        assert!(!out.comments[0].block);
        assert_eq!(out.comments[1].text, " inline ");
        assert!(out.comments[1].block);
        // comments are invisible to the token stream
        assert!(out
            .tokens
            .iter()
            .all(|t| !matches!(t.kind, TokenKind::Slash)));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let toks = kinds(r#"s := "a\n\"b""#);
        assert!(toks.contains(&TokenKind::Str("a\n\"b".into())));
    }

    #[test]
    fn raw_strings_keep_content_verbatim() {
        let toks = kinds("s := `a\\n`");
        assert!(toks.contains(&TokenKind::Str("a\\n".into())));
    }

    #[test]
    fn multi_char_operators() {
        let toks = kinds("a <= b && c != d");
        assert!(toks.contains(&TokenKind::LtEq));
        assert!(toks.contains(&TokenKind::AndAnd));
        assert!(toks.contains(&TokenKind::NotEq));
    }

    #[test]
    fn channel_arrow_and_shift() {
        let toks = kinds("ch <- 1 << 2");
        assert!(toks.contains(&TokenKind::Arrow));
        assert!(toks.contains(&TokenKind::Shl));
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(lex("s := \"abc").is_err());
        assert!(lex("/* never closed").is_err());
    }

    #[test]
    fn hex_and_float_literals() {
        let toks = kinds("a := 0xFF\nb := 1.5e3\n");
        assert!(toks.contains(&TokenKind::Int("0xFF".into())));
        assert!(toks.contains(&TokenKind::Float("1.5e3".into())));
    }
}
