//! Lua-aware copier that hands markup and annotations to their parsers.

use super::TransformError;

/// Lua 5.4 reserved words.
pub(super) const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Keywords after which an expression has just ended.
const VALUE_KEYWORDS: &[&str] = &["end", "false", "nil", "true"];

/// What the last significant token was. Decides whether `<` opens markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Prev {
    /// An operator, opening bracket, keyword or the start of input.
    Operator,
    /// A name, literal or closing bracket.
    Value,
    /// `.` or `:`; the next name is a field.
    Member,
}

pub(super) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(super) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(super) fn is_lua_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_ident_start)
        && chars.all(is_ident_char)
        && !LUA_KEYWORDS.contains(&s)
}

/// Single-pass rewriter from plugin source to Lua.
pub(super) struct Transformer {
    pub(super) chars: Vec<char>,
    pub(super) pos: usize,
    pub(super) line: usize,
    pub(super) typed: bool,
    pub(super) out: String,
    pub(super) prev: Prev,
    /// Significant tokens written so far.
    pub(super) tokens: usize,
    /// Newlines consumed inside markup that are not yet written.
    pub(super) pending_newlines: usize,
}

impl Transformer {
    pub(super) fn new(source: &str, typed: bool) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            typed,
            out: String::with_capacity(source.len() + source.len() / 4),
            prev: Prev::Operator,
            tokens: 0,
            pending_newlines: 0,
        }
    }

    pub(super) fn run(mut self) -> Result<String, TransformError> {
        self.lua(false)?;
        Ok(self.out)
    }

    pub(super) fn error(&self, message: impl Into<String>) -> TransformError {
        TransformError {
            line: self.line,
            message: message.into(),
        }
    }

    pub(super) fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub(super) fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub(super) fn starts_with(&self, s: &str) -> bool {
        self.starts_with_at(self.pos, s)
    }

    pub(super) fn starts_with_at(&self, at: usize, s: &str) -> bool {
        let mut i = at;
        for c in s.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    pub(super) fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    pub(super) fn copy(&mut self) {
        if let Some(c) = self.bump() {
            self.out.push(c);
        }
    }

    pub(super) fn copy_n(&mut self, n: usize) {
        for _ in 0..n {
            self.copy();
        }
    }

    /// Drop one character, keeping it only if it is a newline.
    pub(super) fn discard(&mut self) {
        if self.bump() == Some('\n') {
            self.out.push('\n');
        }
    }

    pub(super) fn discard_to(&mut self, index: usize) {
        while self.pos < index && self.pos < self.chars.len() {
            self.discard();
        }
    }

    pub(super) fn copy_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.copy();
        }
    }

    pub(super) fn discard_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.discard();
        }
    }

    /// Index of the next non-whitespace character at or after `pos`.
    pub(super) fn next_non_ws(&self) -> usize {
        self.next_non_ws_from(self.pos)
    }

    pub(super) fn next_non_ws_from(&self, mut i: usize) -> usize {
        while self.chars.get(i).is_some_and(|c| c.is_whitespace()) {
            i += 1;
        }
        i
    }

    /// The identifier starting at `i`, if any.
    pub(super) fn ident_at(&self, i: usize) -> Option<String> {
        if !self.chars.get(i).copied().is_some_and(is_ident_start) {
            return None;
        }
        let end = (i..self.chars.len())
            .find(|&j| !is_ident_char(self.chars[j]))
            .unwrap_or(self.chars.len());
        Some(self.chars[i..end].iter().collect())
    }

    /// Consume an identifier without writing it.
    pub(super) fn take_ident(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|&c| is_ident_char(c)) {
            word.push(c);
            self.pos += 1;
        }
        word
    }

    pub(super) fn push_token(&mut self, text: &str, prev: Prev) {
        self.out.push_str(text);
        self.tokens += 1;
        self.prev = prev;
    }

    /// Copy Lua code.
    ///
    /// When `nested`, stops before the `}` that closes an expression
    /// container and fails at end of input.
    pub(super) fn lua(&mut self, nested: bool) -> Result<(), TransformError> {
        let mut depth = 0usize;

        while let Some(c) = self.peek() {
            match c {
                c if c.is_whitespace() => self.copy(),
                '-' if self.peek_at(1) == Some('-') => self.comment()?,
                '"' | '\'' => {
                    self.quoted_string(c)?;
                    self.tokens += 1;
                    self.prev = Prev::Value;
                }
                '[' if self.long_bracket_level().is_some() => {
                    self.long_bracket()?;
                    self.tokens += 1;
                    self.prev = Prev::Value;
                }
                '0'..='9' => self.number(),
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number(),
                '.' if self.starts_with("...") => {
                    self.copy_n(3);
                    self.tokens += 1;
                    self.prev = Prev::Value;
                }
                '.' if self.starts_with("..") => {
                    self.copy_n(2);
                    self.prev = Prev::Operator;
                }
                '.' => {
                    self.copy();
                    self.prev = Prev::Member;
                }
                ':' if self.starts_with("::") => {
                    if self.label_ahead() {
                        self.label();
                    } else if self.typed && self.prev == Prev::Value {
                        self.discard();
                        self.discard();
                        self.skip_type()?;
                    } else {
                        self.copy_n(2);
                        self.prev = Prev::Operator;
                    }
                }
                ':' => {
                    self.copy();
                    self.prev = Prev::Member;
                }
                '<' if self.prev != Prev::Value
                    && self.peek_at(1).is_some_and(|n| is_ident_start(n) || n == '>') =>
                {
                    self.element()?;
                    self.tokens += 1;
                    self.prev = Prev::Value;
                }
                c if is_ident_start(c) => self.word()?,
                '{' => {
                    depth += 1;
                    self.copy();
                    self.tokens += 1;
                    self.prev = Prev::Operator;
                }
                '}' => {
                    if depth == 0 && nested {
                        return Ok(());
                    }
                    depth = depth.saturating_sub(1);
                    self.copy();
                    self.prev = Prev::Value;
                }
                ')' | ']' => {
                    self.copy();
                    self.prev = Prev::Value;
                }
                _ => {
                    self.copy();
                    self.tokens += 1;
                    self.prev = Prev::Operator;
                }
            }
        }

        if nested {
            Err(self.error("unterminated expression: missing `}`"))
        } else {
            Ok(())
        }
    }

    fn word(&mut self) -> Result<(), TransformError> {
        if self.prev == Prev::Member {
            let word = self.take_ident();
            self.push_token(&word, Prev::Value);
            return Ok(());
        }

        if self.typed && self.type_alias_ahead() {
            return self.skip_type_alias();
        }

        let word = self.take_ident();
        let prev = if VALUE_KEYWORDS.contains(&word.as_str()) || !LUA_KEYWORDS.contains(&word.as_str())
        {
            Prev::Value
        } else {
            Prev::Operator
        };
        self.push_token(&word, prev);

        if self.typed {
            match word.as_str() {
                "local" => self.name_list(true)?,
                "for" => self.name_list(false)?,
                "function" => self.function_signature()?,
                _ => {}
            }
        }
        Ok(())
    }

    fn comment(&mut self) -> Result<(), TransformError> {
        self.copy_n(2);
        if self.peek() == Some('[') && self.long_bracket_level().is_some() {
            return self.long_bracket();
        }
        while self.peek().is_some_and(|c| c != '\n') {
            self.copy();
        }
        Ok(())
    }

    /// `[[` or `[==[` at `pos`: the number of `=`.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some('[') {
            return None;
        }
        let level = (self.pos + 1..self.chars.len())
            .take_while(|&i| self.chars[i] == '=')
            .count();
        (self.chars.get(self.pos + 1 + level) == Some(&'[')).then_some(level)
    }

    fn long_bracket(&mut self) -> Result<(), TransformError> {
        let line = self.line;
        let level = self.long_bracket_level().unwrap_or(0);
        let close: String = std::iter::once(']')
            .chain(std::iter::repeat_n('=', level))
            .chain(std::iter::once(']'))
            .collect();

        self.copy_n(level + 2);
        loop {
            if self.starts_with(&close) {
                self.copy_n(close.len());
                return Ok(());
            }
            if self.peek().is_none() {
                return Err(TransformError {
                    line,
                    message: "unterminated long string or comment".into(),
                });
            }
            self.copy();
        }
    }

    fn quoted_string(&mut self, quote: char) -> Result<(), TransformError> {
        self.copy();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error("unterminated string")),
                Some('\\') => self.copy_n(2),
                Some(c) if c == quote => {
                    self.copy();
                    return Ok(());
                }
                Some(_) => self.copy(),
            }
        }
    }

    fn number(&mut self) {
        let hex = self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X'));
        let exponent: &[char] = if hex { &['p', 'P'] } else { &['e', 'E'] };
        let mut last = '\0';

        while let Some(c) = self.peek() {
            let sign = matches!(c, '+' | '-') && exponent.contains(&last);
            if !(c.is_ascii_alphanumeric() || c == '.' || sign) {
                break;
            }
            last = c;
            self.copy();
        }
        self.tokens += 1;
        self.prev = Prev::Value;
    }

    fn label(&mut self) {
        self.copy_n(2);
        self.copy_ws();
        let name = self.take_ident();
        self.push_token(&name, Prev::Operator);
        self.copy_ws();
        self.copy_n(2);
    }

    /// `::name::` goto label rather than a type cast.
    fn label_ahead(&self) -> bool {
        let i = self.next_non_ws_from(self.pos + 2);
        match self.ident_at(i) {
            Some(name) => {
                let j = self.next_non_ws_from(i + name.len());
                self.starts_with_at(j, "::")
            }
            None => false,
        }
    }
}
