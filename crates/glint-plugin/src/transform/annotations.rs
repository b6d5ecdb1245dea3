//! Type annotation removal for the typed dialect.
//!
//! Supported forms:
//!
//! ```text
//! type Point = { x: number, y: number }
//! export type Handler = (event: string) -> ()
//! local count: number, label: string? = 0, nil
//! function Clock<T>(props: Props, ...: any): Element
//! for key: string, value in pairs(t) do
//! local n = value :: number
//! ```

use super::TransformError;
use super::scanner::{Prev, Transformer, is_ident_start};

impl Transformer {
    /// Names after `local` or `for`, each with an optional annotation.
    /// Locals also keep Lua 5.4 attributes such as `<const>`.
    pub(super) fn name_list(&mut self, attributes: bool) -> Result<(), TransformError> {
        loop {
            let next = self.next_non_ws();
            match self.ident_at(next) {
                Some(word) if word == "function" => return Ok(()),
                Some(word) => {
                    self.copy_ws();
                    self.pos += word.len();
                    self.push_token(&word, Prev::Value);
                }
                None => return Ok(()),
            }

            self.annotation()?;

            if attributes {
                let next = self.next_non_ws();
                if self.chars.get(next) == Some(&'<') {
                    self.copy_ws();
                    while self.peek().is_some_and(|c| c != '>') {
                        self.copy();
                    }
                    self.copy();
                }
            }

            let next = self.next_non_ws();
            if self.chars.get(next) != Some(&',') {
                return Ok(());
            }
            self.copy_ws();
            self.copy();
            self.prev = Prev::Operator;
        }
    }

    /// Strip `: Type` if it follows, leaving `::` alone.
    fn annotation(&mut self) -> Result<(), TransformError> {
        let next = self.next_non_ws();
        if self.chars.get(next) == Some(&':') && self.chars.get(next + 1) != Some(&':') {
            self.copy_ws();
            self.discard();
            self.skip_type()?;
        }
        Ok(())
    }

    /// Everything between `function` and the body: name, generics,
    /// annotated parameters and the return type.
    pub(super) fn function_signature(&mut self) -> Result<(), TransformError> {
        let next = self.next_non_ws();
        if let Some(first) = self.ident_at(next) {
            self.copy_ws();
            self.pos += first.len();
            self.out.push_str(&first);
            while matches!(self.peek(), Some('.' | ':')) && self.peek_at(1).is_some_and(is_ident_start)
            {
                self.copy();
                let part = self.take_ident();
                self.out.push_str(&part);
            }
        }

        let next = self.next_non_ws();
        if self.chars.get(next) == Some(&'<') {
            self.copy_ws();
            self.discard_balanced('<', '>')?;
        }

        let next = self.next_non_ws();
        if self.chars.get(next) != Some(&'(') {
            return Ok(());
        }
        self.copy_ws();
        self.copy();

        loop {
            self.copy_ws();
            match self.peek() {
                Some(')') => {
                    self.copy();
                    break;
                }
                Some('.') if self.starts_with("...") => self.copy_n(3),
                Some(c) if is_ident_start(c) => {
                    let name = self.take_ident();
                    self.out.push_str(&name);
                }
                _ => return Err(self.error("malformed parameter list")),
            }

            self.annotation()?;
            self.copy_ws();
            match self.peek() {
                Some(',') => self.copy(),
                Some(')') => {
                    self.copy();
                    break;
                }
                _ => return Err(self.error("malformed parameter list")),
            }
        }

        self.annotation()?;
        self.prev = Prev::Operator;
        Ok(())
    }

    /// `type Name<T> =` or `export type Name =` starting at `pos`.
    pub(super) fn type_alias_ahead(&self) -> bool {
        let mut i = self.pos;
        if self.ident_at(i).as_deref() == Some("export") {
            i = self.next_non_ws_from(i + "export".len());
            if i == self.pos + "export".len() {
                return false;
            }
        }
        if self.ident_at(i).as_deref() != Some("type") {
            return false;
        }

        let name_at = self.next_non_ws_from(i + "type".len());
        if name_at == i + "type".len() {
            return false;
        }
        let Some(name) = self.ident_at(name_at) else {
            return false;
        };

        let mut j = self.next_non_ws_from(name_at + name.len());
        if self.chars.get(j) == Some(&'<') {
            match (j..self.chars.len()).find(|&k| self.chars[k] == '>') {
                Some(close) => j = self.next_non_ws_from(close + 1),
                None => return false,
            }
        }
        self.chars.get(j) == Some(&'=') && self.chars.get(j + 1) != Some(&'=')
    }

    /// Remove a whole alias declaration, keeping its newlines.
    pub(super) fn skip_type_alias(&mut self) -> Result<(), TransformError> {
        while self.peek().is_some_and(|c| c != '=') {
            self.discard();
        }
        self.discard();
        self.skip_type()
    }

    /// Consume one type expression. Only its newlines are written.
    pub(super) fn skip_type(&mut self) -> Result<(), TransformError> {
        self.discard_ws();
        if matches!(self.peek(), Some('|' | '&')) {
            self.discard();
            self.discard_ws();
        }

        loop {
            self.skip_type_atom()?;
            if self.peek() == Some('?') {
                self.discard();
            }
            let next = self.next_non_ws();
            if !matches!(self.chars.get(next), Some('|' | '&')) {
                return Ok(());
            }
            self.discard_to(next + 1);
            self.discard_ws();
        }
    }

    fn skip_type_atom(&mut self) -> Result<(), TransformError> {
        match self.peek() {
            Some('(') => {
                self.discard_balanced('(', ')')?;
                let next = self.next_non_ws();
                if self.starts_with_at(next, "->") {
                    self.discard_to(next + 2);
                    self.skip_type()?;
                }
                Ok(())
            }
            Some('{') => self.discard_balanced('{', '}'),
            Some(quote @ ('"' | '\'')) => self.discard_string(quote),
            Some('.') if self.starts_with("...") => {
                self.discard_to(self.pos + 3);
                self.discard_ws();
                self.skip_type_atom()
            }
            Some(c) if is_ident_start(c) => {
                let name = self.take_ident();
                if name == "typeof" {
                    self.discard_ws();
                    if self.peek() != Some('(') {
                        return Err(self.error("expected `(` after typeof"));
                    }
                    return self.discard_balanced('(', ')');
                }
                while self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_start) {
                    self.discard();
                    self.take_ident();
                }
                if self.peek() == Some('<') {
                    self.discard_balanced('<', '>')?;
                }
                Ok(())
            }
            _ => Err(self.error("expected a type")),
        }
    }

    fn discard_balanced(&mut self, open: char, close: char) -> Result<(), TransformError> {
        let line = self.line;
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => {
                    return Err(TransformError {
                        line,
                        message: format!("unterminated `{open}` in type"),
                    });
                }
                Some('-') if close == '>' && self.peek_at(1) == Some('>') => {
                    self.discard();
                    self.discard();
                }
                Some(c) if c == open => {
                    depth += 1;
                    self.discard();
                }
                Some(c) if c == close => {
                    depth = depth.saturating_sub(1);
                    self.discard();
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(quote @ ('"' | '\'')) => self.discard_string(quote)?,
                Some(_) => self.discard(),
            }
        }
    }

    fn discard_string(&mut self, quote: char) -> Result<(), TransformError> {
        self.discard();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error("unterminated string in type")),
                Some('\\') => {
                    self.discard();
                    self.discard();
                }
                Some(c) if c == quote => {
                    self.discard();
                    return Ok(());
                }
                Some(_) => self.discard(),
            }
        }
    }
}
