//! Markup elements to `h(tag, props, ...children)` calls.

use super::TransformError;
use super::scanner::{Prev, Transformer, is_ident_start, is_lua_name};

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// Lua expression for a tag name: host tags are strings, components are names.
fn tag_expression(name: &str) -> Option<String> {
    let host = name.starts_with(|c: char| c.is_ascii_lowercase()) && !name.contains('.');
    if host {
        Some(lua_string(name))
    } else if name.split('.').all(is_lua_name) {
        Some(name.to_string())
    } else {
        None
    }
}

fn lua_key(key: &str) -> String {
    if is_lua_name(key) {
        key.to_string()
    } else {
        format!("[{}]", lua_string(key))
    }
}

/// Quote `s` as a Lua string literal.
pub(super) fn lua_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Collapse text the way markup readers expect: lines are trimmed where
/// they meet a line break and blank lines disappear.
fn normalize_text(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len() - 1;
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line = if i == 0 { *line } else { line.trim_start() };
            if i == last { line } else { line.trim_end() }
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                name.strip_prefix('#').and_then(|dec| dec.parse().ok())
            };
            code.and_then(char::from_u32)
        }
    }
}

fn display_tag(name: &str) -> String {
    format!("<{name}>")
}

impl Transformer {
    fn skip_markup_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            if c == '\n' {
                self.pending_newlines += 1;
            }
            self.bump();
        }
    }

    fn flush_newlines(&mut self) {
        for _ in 0..self.pending_newlines {
            self.out.push('\n');
        }
        self.pending_newlines = 0;
    }

    fn take_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek().filter(|&c| is_name_char(c)) {
            name.push(c);
            self.bump();
        }
        name
    }

    /// Parse one element at `<` and write its `h(...)` call.
    pub(super) fn element(&mut self) -> Result<(), TransformError> {
        let start_line = self.line;
        self.bump();

        let name = self.take_name();
        let tag = if name.is_empty() {
            "Fragment".to_string()
        } else {
            tag_expression(&name)
                .ok_or_else(|| self.error(format!("invalid element name {}", display_tag(&name))))?
        };

        self.out.push_str("h(");
        self.out.push_str(&tag);

        let self_closing = self.attributes(&name, start_line)?;
        if !self_closing {
            self.children(&name, start_line)?;
        }

        self.flush_newlines();
        self.out.push(')');
        Ok(())
    }

    /// Write the props table. Returns whether the element closed itself.
    fn attributes(&mut self, name: &str, start_line: usize) -> Result<bool, TransformError> {
        let mut count = 0;

        let self_closing = loop {
            self.skip_markup_ws();
            match self.peek() {
                None => {
                    return Err(TransformError {
                        line: start_line,
                        message: format!("unterminated element {}", display_tag(name)),
                    });
                }
                Some('/') => {
                    self.bump();
                    if self.peek() != Some('>') {
                        return Err(self.error("expected `>` after `/`"));
                    }
                    self.bump();
                    break true;
                }
                Some('>') => {
                    self.bump();
                    break false;
                }
                Some('{') => {
                    let next = self.next_non_ws_from(self.pos + 1);
                    let message = if self.starts_with_at(next, "...") {
                        "spread attributes are not supported"
                    } else {
                        "expected an attribute name"
                    };
                    return Err(self.error(message));
                }
                Some(c) if is_ident_start(c) => {
                    let key = self.take_name();
                    self.out.push_str(if count == 0 { ", {" } else { ", " });
                    count += 1;
                    self.flush_newlines();
                    self.out.push_str(&lua_key(&key));
                    self.out.push_str(" = ");

                    self.skip_markup_ws();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.skip_markup_ws();
                        self.attribute_value(&key)?;
                    } else {
                        self.out.push_str("true");
                    }
                }
                Some(c) => {
                    return Err(self.error(format!(
                        "unexpected `{c}` in {}",
                        display_tag(name)
                    )));
                }
            }
        };

        if count == 0 {
            self.out.push_str(", nil");
        } else {
            self.flush_newlines();
            self.out.push('}');
        }
        Ok(self_closing)
    }

    fn attribute_value(&mut self, key: &str) -> Result<(), TransformError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let line = self.line;
                self.bump();
                let mut value = String::new();
                loop {
                    match self.bump() {
                        None => {
                            return Err(TransformError {
                                line,
                                message: format!("unterminated value for attribute `{key}`"),
                            });
                        }
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                    }
                }
                self.pending_newlines += value.matches('\n').count();
                self.out.push_str(&lua_string(&decode_entities(&value)));
                Ok(())
            }
            Some('{') => {
                self.bump();
                if self.starts_with_at(self.next_non_ws(), "...") {
                    return Err(self.error("spread attributes are not supported"));
                }
                let before = self.tokens;
                self.prev = Prev::Operator;
                self.lua(true)?;
                self.bump();
                if self.tokens == before {
                    return Err(self.error(format!("attribute `{key}` has an empty expression")));
                }
                Ok(())
            }
            Some('<') => self.element(),
            _ => Err(self.error(format!("expected a value for attribute `{key}`"))),
        }
    }

    fn children(&mut self, name: &str, start_line: usize) -> Result<(), TransformError> {
        loop {
            match self.peek() {
                None => {
                    return Err(TransformError {
                        line: start_line,
                        message: format!("unterminated element {}", display_tag(name)),
                    });
                }
                Some('<') if self.peek_at(1) == Some('/') => return self.closing_tag(name),
                Some('<') => {
                    self.out.push_str(", ");
                    self.flush_newlines();
                    self.element()?;
                }
                Some('{') => self.expression_child()?,
                Some(_) => self.text_child(),
            }
        }
    }

    fn closing_tag(&mut self, name: &str) -> Result<(), TransformError> {
        self.bump();
        self.bump();
        self.skip_markup_ws();
        let closing = self.take_name();
        self.skip_markup_ws();
        if self.peek() != Some('>') {
            return Err(self.error(format!("expected `>` to close </{closing}")));
        }
        self.bump();

        if closing != name {
            return Err(self.error(format!(
                "expected </{name}> to close {} but found </{closing}>",
                display_tag(name)
            )));
        }
        Ok(())
    }

    fn expression_child(&mut self) -> Result<(), TransformError> {
        self.bump();
        let mark = self.out.len();
        let before = self.tokens;

        self.out.push_str(", ");
        self.flush_newlines();
        self.prev = Prev::Operator;
        self.lua(true)?;
        self.bump();

        // `{}` or a comment: no child, but its newlines stay.
        if self.tokens == before {
            let dropped = self.out.split_off(mark);
            self.pending_newlines += dropped.matches('\n').count();
        }
        Ok(())
    }

    fn text_child(&mut self) {
        let mut raw = String::new();
        while let Some(c) = self.peek().filter(|&c| c != '<' && c != '{') {
            raw.push(c);
            self.bump();
        }

        let total = raw.matches('\n').count();
        let leading = raw[..raw.len() - raw.trim_start().len()].matches('\n').count();
        self.pending_newlines += leading;

        let text = normalize_text(&raw);
        if !text.is_empty() {
            self.out.push_str(", ");
            self.flush_newlines();
            self.out.push_str(&lua_string(&decode_entities(&text)));
        }
        self.pending_newlines += total - leading;
    }
}
