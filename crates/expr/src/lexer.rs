//! Tokenizer shared by the jq and CEL parsers.

use crate::{Dialect, ExprError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(&'static str),
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub offset: usize,
}

// Longest first.
const PUNCTS: &[&str] = &[
    "..", "//", "||", "&&", "==", "!=", "<=", ">=",
    ".", "/", "|", "<", ">", "+", "-", "*", "%", "!", "?", ":", ";", ",", "(", ")", "[", "]", "{", "}", "$",
];

pub(crate) fn tokenize(dialect: Dialect, src: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() { i += 1; continue; }
        if dialect == Dialect::Jq && c == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' { i += 1; }
            continue;
        }
        let start = i;
        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') { i += 1; }
            out.push(Token { tok: Tok::Ident(src[start..i].to_string()), offset: start });
            continue;
        }
        if c.is_ascii_digit() {
            let (tok, next) = lex_number(dialect, src, start)?;
            out.push(Token { tok, offset: start });
            i = next;
            continue;
        }
        if c == b'"' || (c == b'\'' && dialect == Dialect::Cel) {
            let (s, next) = lex_string(dialect, src, start)?;
            out.push(Token { tok: Tok::Str(s), offset: start });
            i = next;
            continue;
        }
        match PUNCTS.iter().find(|p| src[i..].starts_with(**p)) {
            Some(p) => {
                out.push(Token { tok: Tok::Punct(p), offset: start });
                i += p.len();
            }
            None => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(ExprError::parse(dialect, src, i, format!("unexpected character {:?}", ch)));
            }
        }
    }
    Ok(out)
}

fn lex_number(dialect: Dialect, src: &str, start: usize) -> Result<(Tok, usize), ExprError> {
    let bytes = src.as_bytes();
    let mut i = start;
    if dialect == Dialect::Cel && src[start..].starts_with("0x") {
        i += 2;
        let hex_start = i;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() { i += 1; }
        let v = i64::from_str_radix(&src[hex_start..i], 16)
            .map_err(|e| ExprError::parse(dialect, src, start, format!("invalid hex literal: {}", e)))?;
        if i < bytes.len() && (bytes[i] == b'u' || bytes[i] == b'U') { i += 1; }
        return Ok((Tok::Int(v), i));
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() { i += 1; }
    let mut is_float = false;
    if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() { i += 1; }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') { j += 1; }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() { i += 1; }
        }
    }
    let text = &src[start..i];
    if is_float {
        let v: f64 = text.parse().map_err(|_| ExprError::parse(dialect, src, start, "invalid number"))?;
        return Ok((Tok::Float(v), i));
    }
    let tok = match text.parse::<i64>() {
        Ok(v) => Tok::Int(v),
        Err(_) => Tok::Float(text.parse().map_err(|_| ExprError::parse(dialect, src, start, "invalid number"))?),
    };
    if dialect == Dialect::Cel && i < bytes.len() && (bytes[i] == b'u' || bytes[i] == b'U') { i += 1; }
    Ok((tok, i))
}

fn lex_string(dialect: Dialect, src: &str, start: usize) -> Result<(String, usize), ExprError> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((off, ch)) = chars.next() {
        let pos = start + 1 + off;
        if ch == quote {
            return Ok((out, pos + ch.len_utf8()));
        }
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some((_, esc)) = chars.next() else { break };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '/' => out.push('/'),
            'u' => {
                let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, c)| c)).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ExprError::parse(dialect, src, pos, "invalid unicode escape"))?;
                out.push(code);
            }
            '(' if dialect == Dialect::Jq => {
                return Err(ExprError::parse(dialect, src, pos, "string interpolation is not supported"));
            }
            other => return Err(ExprError::parse(dialect, src, pos, format!("unknown escape \\{}", other))),
        }
    }
    Err(ExprError::parse(dialect, src, start, "unterminated string"))
}

/// Token stream with one-token lookahead, shared by both recursive-descent parsers.
pub(crate) struct Cursor<'s> {
    dialect: Dialect,
    src: &'s str,
    toks: Vec<Token>,
    pos: usize,
}

impl<'s> Cursor<'s> {
    pub fn new(dialect: Dialect, src: &'s str) -> Result<Self, ExprError> {
        Ok(Self { dialect, src, toks: tokenize(dialect, src)?, pos: 0 })
    }

    pub fn peek(&self) -> Option<&Tok> { self.peek_at(0) }

    pub fn peek_at(&self, n: usize) -> Option<&Tok> { self.toks.get(self.pos + n).map(|t| &t.tok) }

    pub fn at_end(&self) -> bool { self.pos >= self.toks.len() }

    pub fn offset(&self) -> usize { self.offset_at(0) }

    pub fn offset_at(&self, n: usize) -> usize {
        self.toks.get(self.pos + n).map(|t| t.offset).unwrap_or(self.src.len())
    }

    pub fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|t| t.tok.clone());
        if t.is_some() { self.pos += 1; }
        t
    }

    pub fn is_punct(&self, p: &str) -> bool { matches!(self.peek(), Some(Tok::Punct(q)) if *q == p) }

    pub fn is_ident(&self, kw: &str) -> bool { matches!(self.peek(), Some(Tok::Ident(q)) if q == kw) }

    pub fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) { self.pos += 1; true } else { false }
    }

    pub fn eat_ident(&mut self, kw: &str) -> bool {
        if self.is_ident(kw) { self.pos += 1; true } else { false }
    }

    pub fn expect(&mut self, p: &str) -> Result<(), ExprError> {
        if self.eat(p) { Ok(()) } else { Err(self.error(format!("expected {:?}", p))) }
    }

    pub fn expect_ident(&mut self, kw: &str) -> Result<(), ExprError> {
        if self.eat_ident(kw) { Ok(()) } else { Err(self.error(format!("expected {:?}", kw))) }
    }

    pub fn error_at(&self, offset: usize, message: impl Into<String>) -> ExprError {
        ExprError::parse(self.dialect, self.src, offset, message)
    }

    pub fn error(&self, message: impl Into<String>) -> ExprError {
        let mut message = message.into();
        match self.peek() {
            Some(t) => message.push_str(&format!(", found {}", describe(t))),
            None => message.push_str(", found end of input"),
        }
        ExprError::parse(self.dialect, self.src, self.offset(), message)
    }
}

fn describe(t: &Tok) -> String {
    match t {
        Tok::Ident(s) => format!("identifier {:?}", s),
        Tok::Int(i) => format!("number {}", i),
        Tok::Float(f) => format!("number {}", f),
        Tok::Str(s) => format!("string {:?}", s),
        Tok::Punct(p) => format!("{:?}", p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(d: Dialect, s: &str) -> Vec<Tok> {
        tokenize(d, s).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn jq_path_tokens() {
        assert_eq!(
            toks(Dialect::Jq, ".status.conditions[0]"),
            vec![
                Tok::Punct("."), Tok::Ident("status".into()), Tok::Punct("."), Tok::Ident("conditions".into()),
                Tok::Punct("["), Tok::Int(0), Tok::Punct("]"),
            ]
        );
        assert_eq!(toks(Dialect::Jq, ".a // 1.5"), vec![
            Tok::Punct("."), Tok::Ident("a".into()), Tok::Punct("//"), Tok::Float(1.5),
        ]);
    }

    #[test]
    fn cel_strings_and_suffixes() {
        assert_eq!(toks(Dialect::Cel, "'a\\'b' == \"c\""), vec![
            Tok::Str("a'b".into()), Tok::Punct("=="), Tok::Str("c".into()),
        ]);
        assert_eq!(toks(Dialect::Cel, "3u + 0x10"), vec![Tok::Int(3), Tok::Punct("+"), Tok::Int(16)]);
    }

    #[test]
    fn unterminated_string_is_error() {
        assert!(tokenize(Dialect::Jq, "\"abc").is_err());
        assert!(tokenize(Dialect::Cel, "a @ b").is_err());
    }
}
