//! Fortran namelist text codec.
//!
//! Reads the subset of namelist syntax that model configuration files use in
//! practice: `&group ... /` blocks (also `$group ... $end`), `key = v1, v2`
//! assignments, quoted strings with doubled-quote escapes, `!` comments,
//! logical literals, repeat counts (`3*0.5`) and whole-array index suffixes
//! (`key(1:3) = ...`). Group and key names are case-insensitive and are
//! normalized to lower case.

use std::fmt::Write as _;

use modelrun_types::{NamelistDocument, NamelistScalar, NamelistSection, NamelistValue};

/// A syntax error with the 1-based line it was found on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct FormatError {
    pub line: usize,
    pub message: String,
}

impl FormatError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    GroupStart(String),
    GroupEnd,
    Equals,
    Comma,
    Word(String),
    Quoted(String),
}

fn is_word_break(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '=' | '/' | '!' | '\'' | '"')
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, FormatError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '!' => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '&' | '$' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = name.to_ascii_lowercase();
                if name.is_empty() || name == "end" {
                    tokens.push((line, Token::GroupEnd));
                } else {
                    tokens.push((line, Token::GroupStart(name)));
                }
            }
            '/' => tokens.push((line, Token::GroupEnd)),
            '=' => tokens.push((line, Token::Equals)),
            ',' => tokens.push((line, Token::Comma)),
            '\'' | '"' => {
                let start_line = line;
                let mut value = String::new();
                let mut closed = false;
                while let Some(next) = chars.next() {
                    if next == c {
                        if chars.peek() == Some(&c) {
                            value.push(c);
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    if next == '\n' {
                        line += 1;
                    }
                    value.push(next);
                }
                if !closed {
                    return Err(FormatError::new(start_line, "unterminated string"));
                }
                tokens.push((start_line, Token::Quoted(value)));
            }
            c => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if is_word_break(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push((line, Token::Word(word)));
            }
        }
    }

    Ok(tokens)
}

fn parse_logical(word: &str) -> Option<bool> {
    match word.to_ascii_lowercase().as_str() {
        ".true." | ".t." | ".true" | "t" | "true" => Some(true),
        ".false." | ".f." | ".false" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// Non-finite reals, spelled the way Fortran runtimes write them.
fn parse_non_finite(word: &str) -> Option<f64> {
    let lower = word.to_ascii_lowercase();
    let (sign, magnitude) = match lower.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, lower.strip_prefix('+').unwrap_or(&lower)),
    };
    match magnitude {
        "inf" | "infinity" => Some(sign * f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    }
}

fn parse_word(word: &str) -> NamelistScalar {
    if let Some(b) = parse_logical(word) {
        return NamelistScalar::Logical(b);
    }
    if let Some(r) = parse_non_finite(word) {
        return NamelistScalar::Real(r);
    }
    if let Ok(i) = word.parse::<i64>() {
        return NamelistScalar::Integer(i);
    }
    let numeric_start = word
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'));
    if numeric_start {
        let normalized = word.replace(['d', 'D'], "e");
        if let Ok(r) = normalized.parse::<f64>() {
            return NamelistScalar::Real(r);
        }
    }
    NamelistScalar::Text(word.to_string())
}

/// Largest accepted `N` in an `N*value` repeat.
const MAX_REPEAT: usize = 1 << 20;

/// Split a `N*` or `N*value` repeat prefix.
fn split_repeat(word: &str, line: usize) -> Result<Option<(usize, &str)>, FormatError> {
    let Some((count, rest)) = word.split_once('*') else {
        return Ok(None);
    };
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match count.parse::<usize>() {
        Ok(n) if n <= MAX_REPEAT => Ok(Some((n, rest))),
        _ => Err(FormatError::new(line, "repeat count too large")),
    }
}

/// Strip an index suffix from a key. Only whole-array forms are accepted.
fn parse_key(word: &str, line: usize) -> Result<String, FormatError> {
    let Some((name, index)) = word.split_once('(') else {
        return Ok(word.to_ascii_lowercase());
    };
    let index = index
        .strip_suffix(')')
        .ok_or_else(|| FormatError::new(line, format!("bad index in '{word}'")))?;
    let whole_array = matches!(index.trim(), "1" | "1:" | ":")
        || index
            .split_once(':')
            .is_some_and(|(lo, hi)| lo.trim() == "1" && hi.trim().parse::<usize>().is_ok());
    if !whole_array {
        return Err(FormatError::new(
            line,
            format!("unsupported index '{index}' on '{name}'"),
        ));
    }
    Ok(name.to_ascii_lowercase())
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(_, t)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(l, _)| *l)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn at_assignment(&self) -> bool {
        matches!(self.peek(), Some(Token::Word(_))) && self.peek_at(1) == Some(&Token::Equals)
    }

    fn parse_document(&mut self) -> Result<NamelistDocument, FormatError> {
        let mut doc = NamelistDocument::new();
        while let Some(token) = self.next() {
            match token {
                Token::GroupStart(name) => {
                    let section = self.parse_group(&name)?;
                    doc.entry(name).or_default().extend(section);
                }
                other => {
                    return Err(FormatError::new(
                        self.tokens[self.pos - 1].0,
                        format!("expected '&group', found {other:?}"),
                    ));
                }
            }
        }
        Ok(doc)
    }

    fn parse_group(&mut self, group: &str) -> Result<NamelistSection, FormatError> {
        let mut section = NamelistSection::new();
        loop {
            match self.peek() {
                None => {
                    return Err(FormatError::new(
                        self.line(),
                        format!("group '{group}' is not terminated"),
                    ));
                }
                Some(Token::GroupEnd) => {
                    self.pos += 1;
                    return Ok(section);
                }
                Some(Token::Comma) => self.pos += 1,
                Some(Token::Word(word)) if self.at_assignment() => {
                    let key = parse_key(word, self.line())?;
                    // key and '='
                    self.pos += 2;
                    let values = self.parse_values()?;
                    section.insert(key, NamelistValue::from_scalars(values));
                }
                Some(other) => {
                    return Err(FormatError::new(
                        self.line(),
                        format!("expected 'key = value' in group '{group}', found {other:?}"),
                    ));
                }
            }
        }
    }

    fn parse_values(&mut self) -> Result<Vec<NamelistScalar>, FormatError> {
        let mut values = Vec::new();
        loop {
            if self.at_assignment() {
                break;
            }
            match self.peek() {
                None | Some(Token::GroupEnd | Token::GroupStart(_)) => break,
                Some(Token::Equals) => {
                    return Err(FormatError::new(self.line(), "unexpected '='"));
                }
                Some(Token::Comma) => self.pos += 1,
                Some(Token::Quoted(_)) => {
                    if let Some(Token::Quoted(text)) = self.next() {
                        values.push(NamelistScalar::Text(text));
                    }
                }
                Some(Token::Word(_)) => {
                    let line = self.line();
                    let Some(Token::Word(word)) = self.next() else {
                        break;
                    };
                    match split_repeat(&word, line)? {
                        Some((count, "")) => {
                            // `N*` applies to the next token. Null values are not kept.
                            let next = match self.peek() {
                                Some(Token::Quoted(text)) => {
                                    Some(NamelistScalar::Text(text.clone()))
                                }
                                Some(Token::Word(w)) if !self.at_assignment() => {
                                    Some(parse_word(w))
                                }
                                _ => None,
                            };
                            let Some(value) = next else {
                                return Err(FormatError::new(
                                    line,
                                    format!("null values are not supported ('{word}')"),
                                ));
                            };
                            self.pos += 1;
                            values.extend(std::iter::repeat(value).take(count));
                        }
                        Some((count, rest)) => {
                            values.extend(std::iter::repeat(parse_word(rest)).take(count));
                        }
                        None => values.push(parse_word(&word)),
                    }
                }
            }
        }
        Ok(values)
    }
}

/// Parse namelist text into a document.
///
/// A group that appears twice has its keys merged, later assignments winning.
///
/// # Errors
///
/// Returns a [`FormatError`] on malformed syntax.
pub fn parse_namelist(text: &str) -> Result<NamelistDocument, FormatError> {
    let tokens = tokenize(text)?;
    Parser { tokens, pos: 0 }.parse_document()
}

fn format_real(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    // Debug keeps a decimal point or exponent so the value re-reads as real.
    format!("{value:?}")
}

fn format_scalar(scalar: &NamelistScalar) -> String {
    match scalar {
        NamelistScalar::Logical(true) => ".true.".to_string(),
        NamelistScalar::Logical(false) => ".false.".to_string(),
        NamelistScalar::Integer(i) => i.to_string(),
        NamelistScalar::Real(r) => format_real(*r),
        NamelistScalar::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Render a document as namelist text.
#[must_use]
pub fn write_namelist(doc: &NamelistDocument) -> String {
    let mut out = String::new();
    for (index, (group, section)) in doc.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "&{group}");
        for (key, value) in section {
            let rendered: Vec<String> = value.as_slice().iter().map(format_scalar).collect();
            let _ = writeln!(out, "    {key} = {}", rendered.join(", "));
        }
        out.push_str("/\n");
    }
    out
}
