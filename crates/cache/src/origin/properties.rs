//! Flat `key=value` text blocks used for origin metadata
//!
//! The layout follows the classic properties file: `#` or `!` comment lines,
//! one entry per line, backslash escapes for separators and control
//! characters, and trailing-backslash line continuations on input.

use cachetier_core::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// Ordered set of string properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginProperties {
    entries: BTreeMap<String, String>,
}

impl OriginProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Write a comment header followed by every entry, sorted by key
    pub fn store(&self, out: &mut impl Write, comment: &str) -> std::io::Result<()> {
        for line in comment.lines() {
            writeln!(out, "#{line}")?;
        }
        writeln!(out, "#{}", chrono::Utc::now().to_rfc2822())?;
        for (key, value) in &self.entries {
            writeln!(out, "{}={}", escape(key, true), escape(value, false))?;
        }
        out.flush()
    }

    /// Parse a block written by [`OriginProperties::store`] or by hand
    pub fn load(input: &mut impl Read) -> std::io::Result<Self> {
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut properties = Self::new();
        let mut logical = String::new();

        for raw in text.lines() {
            let line = if logical.is_empty() {
                let trimmed = raw.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                trimmed
            } else {
                // Leading whitespace of continuation lines is dropped
                raw.trim_start()
            };

            if ends_with_continuation(line) {
                logical.push_str(&line[..line.len() - 1]);
                continue;
            }
            logical.push_str(line);

            let (key, value) = split_entry(&logical);
            properties.set(key, value);
            logical.clear();
        }

        if !logical.is_empty() {
            let (key, value) = split_entry(&logical);
            properties.set(key, value);
        }
        properties
    }
}

impl fmt::Display for OriginProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        write!(f, "}}")
    }
}

fn escape(text: &str, is_key: bool) -> String {
    let mut escaped = String::with_capacity(text.len());
    for (index, ch) in text.chars().enumerate() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '=' | ':' | '#' | '!' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' ' if is_key || index == 0 => escaped.push_str("\\ "),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|&ch| ch == '\\').count();
    trailing % 2 == 1
}

/// Split a logical line at the first unescaped `=`, `:` or whitespace
fn split_entry(line: &str) -> (String, String) {
    let mut key = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    key.push(unescape_char(next));
                }
            }
            '=' | ':' => break,
            ch if ch.is_whitespace() => {
                // Whitespace may be followed by one explicit separator
                while chars.peek().is_some_and(|ch| ch.is_whitespace()) {
                    chars.next();
                }
                if matches!(chars.peek(), Some('=') | Some(':')) {
                    chars.next();
                }
                break;
            }
            ch => key.push(ch),
        }
    }

    while chars.peek().is_some_and(|ch| ch.is_whitespace()) {
        chars.next();
    }

    let mut value = String::new();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                value.push(unescape_char(next));
            }
        } else {
            value.push(ch);
        }
    }
    (key, value)
}

fn unescape_char(ch: char) -> char {
    match ch {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'f' => '\u{c}',
        other => other,
    }
}

/// Map an I/O failure while moving origin metadata
pub(crate) fn io_error(operation: &str, source: std::io::Error) -> Error {
    Error::io("origin metadata", operation, source)
}
