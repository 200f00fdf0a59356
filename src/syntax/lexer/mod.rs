use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::Lexeme;

pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit()
                || (ch == b'-' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
            {
                return self.scan_number();
            }

            match ch {
                b'%' => return self.scan_sigil(Lexeme::Value, "value name"),
                b'@' => return self.scan_sigil(Lexeme::Symbol, "symbol name"),
                b'!' => return self.scan_sigil(Lexeme::Dialect, "dialect type"),
                b'"' => return self.scan_string(),
                _ => {}
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None → error was recorded, try again
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'/') {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }

            break;
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = self.text(start, self.pos);
        if text == "memref" && self.peek() == Some(b'<') {
            return self.scan_memref(start);
        }
        let token = Lexeme::from_keyword(&text).unwrap_or(Lexeme::Ident(text));
        self.make_token(token, start, self.pos)
    }

    /// Capture the raw body of `memref<...>`, tracking nested brackets.
    fn scan_memref(&mut self, start: usize) -> Spanned<Lexeme> {
        self.pos += 1; // skip '<'
        let body_start = self.pos;
        let mut depth = 1u32;
        while self.pos < self.source.len() {
            match self.source[self.pos] {
                b'<' => depth += 1,
                b'>' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                b'\n' => break,
                _ => {}
            }
            self.pos += 1;
        }
        if depth != 0 {
            self.diagnostics.push(Diagnostic::error(
                "unterminated memref type".to_string(),
                Span::new(start as u32, self.pos as u32),
            ));
            let body = self.text(body_start, self.pos);
            return self.make_token(Lexeme::MemRef(body), start, self.pos);
        }
        let body = self.text(body_start, self.pos);
        self.pos += 1; // skip '>'
        self.make_token(Lexeme::MemRef(body), start, self.pos)
    }

    /// `%name`, `@name`, `!name`: a one-character sigil followed by name
    /// characters. Value names may start with a digit (`%0`).
    fn scan_sigil(&mut self, make: fn(String) -> Lexeme, what: &str) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1;
        let name_start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        if self.pos == name_start {
            self.diagnostics.push(Diagnostic::error(
                format!("expected {} after '{}'", what, self.source[start] as char),
                Span::new(start as u32, self.pos as u32),
            ));
        }
        let name = self.text(name_start, self.pos);
        self.make_token(make(name), start, self.pos)
    }

    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        self.skip_digits();
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                self.skip_digits();
            }
        }
        let text = self.text(start, self.pos);
        let span = Span::new(start as u32, self.pos as u32);
        if is_float {
            match text.parse::<f64>() {
                Ok(x) => self.make_token(Lexeme::Float(x), start, self.pos),
                Err(_) => {
                    self.diagnostics.push(Diagnostic::error(
                        format!("invalid float literal '{}'", text),
                        span,
                    ));
                    self.make_token(Lexeme::Float(0.0), start, self.pos)
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => self.make_token(Lexeme::Integer(n), start, self.pos),
                Err(_) => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            format!("integer literal '{}' is out of range", text),
                            span,
                        )
                        .with_help(format!("integer literals must fit in {} bits", i64::BITS)),
                    );
                    self.make_token(Lexeme::Integer(0), start, self.pos)
                }
            }
        }
    }

    /// A quoted byte string with `\"`, `\\`, `\n`, `\t` and `\XX` escapes.
    fn scan_string(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1; // skip '"'
        let mut bytes = Vec::new();
        loop {
            let Some(ch) = self.peek() else {
                self.diagnostics.push(Diagnostic::error(
                    "unterminated string literal".to_string(),
                    Span::new(start as u32, self.pos as u32),
                ));
                break;
            };
            self.pos += 1;
            match ch {
                b'"' => break,
                b'\\' => {
                    let esc_start = self.pos - 1;
                    match self.peek() {
                        Some(b'"') => {
                            bytes.push(b'"');
                            self.pos += 1;
                        }
                        Some(b'\\') => {
                            bytes.push(b'\\');
                            self.pos += 1;
                        }
                        Some(b'n') => {
                            bytes.push(b'\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            bytes.push(b'\t');
                            self.pos += 1;
                        }
                        _ => {
                            let hi = self.peek().and_then(hex_value);
                            let lo = self.peek_at(1).and_then(hex_value);
                            if let (Some(hi), Some(lo)) = (hi, lo) {
                                bytes.push((hi << 4) | lo);
                                self.pos += 2;
                            } else {
                                let end = (self.pos + 1).min(self.source.len());
                                self.diagnostics.push(
                                    Diagnostic::error(
                                        "invalid escape sequence in string literal".to_string(),
                                        Span::new(esc_start as u32, end as u32),
                                    )
                                    .with_help(
                                        "supported escapes are \\\", \\\\, \\n, \\t and \\XX"
                                            .to_string(),
                                    ),
                                );
                            }
                        }
                    }
                }
                _ => bytes.push(ch),
            }
        }
        self.make_token(Lexeme::Str(bytes), start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        self.pos += 1;

        let token = match ch {
            b'(' => Lexeme::LParen,
            b')' => Lexeme::RParen,
            b'{' => Lexeme::LBrace,
            b'}' => Lexeme::RBrace,
            b'[' => Lexeme::LBracket,
            b']' => Lexeme::RBracket,
            b',' => Lexeme::Comma,
            b'=' => Lexeme::Eq,
            b':' => {
                if self.peek() == Some(b':') {
                    self.pos += 1;
                    Lexeme::ColonColon
                } else {
                    Lexeme::Colon
                }
            }
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    format!("unexpected character '{}' (U+{:04X})", ch as char, ch),
                    Span::new(start as u32, self.pos as u32),
                ));
                return None;
            }
        };

        Some(self.make_token(token, start, self.pos))
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn text(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.source[start..end]).into_owned()
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(token, Span::new(start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.' || ch == b'$'
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}
