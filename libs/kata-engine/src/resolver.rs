/// Entry-Point Resolver
///
/// Finds the function or class a submission wants to have tested.
///
/// **Policy:**
/// - The first top-level function declaration wins
/// - Otherwise the first top-level class declaration
/// - Functions take priority over classes regardless of textual order
///
/// **Scanning:**
/// This is a lexical pass, not a parse. It skips comments, string literals,
/// template literals (with `${}` nesting) and regular expression literals, and
/// tracks bracket depth so that nested helpers, methods and function
/// expressions are never picked up. Automatic semicolon insertion is
/// approximated by treating a newline after an operand as a statement break.

use kata_common::types::{EntryDescriptor, EntryKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Could not find function or class name in code")]
    EntryPointNotFound,
    #[error("Could not find a top-level function or class named '{0}' in code")]
    NamedEntryNotFound(String),
}

/// Resolve the entry point by declaration order.
pub fn resolve(source: &str) -> Result<EntryDescriptor, ResolveError> {
    let declarations = declarations(source);

    declarations
        .iter()
        .find(|d| d.kind == EntryKind::Function)
        .or_else(|| declarations.iter().find(|d| d.kind == EntryKind::Class))
        .cloned()
        .ok_or(ResolveError::EntryPointNotFound)
}

/// Resolve an entry point the task names explicitly.
pub fn resolve_named(source: &str, name: &str) -> Result<EntryDescriptor, ResolveError> {
    declarations(source)
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| ResolveError::NamedEntryNotFound(name.to_string()))
}

/// All top-level function and class declarations, in source order.
pub fn declarations(source: &str) -> Vec<EntryDescriptor> {
    let mut scanner = Scanner::new(source);
    scanner.scan(false);
    scanner.found
}

#[derive(Debug, Clone, PartialEq)]
enum Prev {
    Start,
    StatementEnd,
    Word(String),
    Operand,
    Punct,
}

/// Keywords after which a `/` starts a regular expression.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield", "await",
];

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    prev: Prev,
    newline_since_prev: bool,
    pending_async: bool,
    found: Vec<EntryDescriptor>,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            depth: 0,
            prev: Prev::Start,
            newline_since_prev: false,
            pending_async: false,
            found: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn set_prev(&mut self, prev: Prev) {
        self.prev = prev;
        self.newline_since_prev = false;
    }

    fn at_statement_start(&self) -> bool {
        match &self.prev {
            Prev::Start | Prev::StatementEnd => true,
            Prev::Word(w) if w == "export" || w == "default" => true,
            Prev::Word(w) if EXPRESSION_KEYWORDS.contains(&w.as_str()) => false,
            Prev::Word(_) | Prev::Operand => self.newline_since_prev,
            Prev::Punct => false,
        }
    }

    fn regex_allowed(&self) -> bool {
        match &self.prev {
            Prev::Start | Prev::StatementEnd | Prev::Punct => true,
            Prev::Word(w) => EXPRESSION_KEYWORDS.contains(&w.as_str()),
            Prev::Operand => false,
        }
    }

    /// Scan tokens until end of input, or until the `}` closing a template
    /// substitution when `in_substitution` is set.
    fn scan(&mut self, in_substitution: bool) {
        let mut local_braces = 0usize;

        while let Some(c) = self.peek() {
            let async_pending = std::mem::take(&mut self.pending_async);

            match c {
                '\n' => {
                    self.newline_since_prev = true;
                    self.pos += 1;
                    self.pending_async = async_pending;
                }
                c if c.is_whitespace() => {
                    self.pos += 1;
                    self.pending_async = async_pending;
                }
                '/' if self.peek_at(1) == Some('/') => {
                    self.skip_line_comment();
                    self.pending_async = async_pending;
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.skip_block_comment();
                    self.pending_async = async_pending;
                }
                '/' => {
                    if self.regex_allowed() {
                        self.skip_regex();
                        self.set_prev(Prev::Operand);
                    } else {
                        self.pos += 1;
                        self.set_prev(Prev::Punct);
                    }
                }
                '"' | '\'' => {
                    self.skip_string(c);
                    self.set_prev(Prev::Operand);
                }
                '`' => {
                    self.skip_template();
                    self.set_prev(Prev::Operand);
                }
                '{' => {
                    self.pos += 1;
                    self.depth += 1;
                    local_braces += 1;
                    self.set_prev(Prev::Punct);
                }
                '}' => {
                    self.pos += 1;
                    if in_substitution && local_braces == 0 {
                        return;
                    }
                    local_braces = local_braces.saturating_sub(1);
                    self.depth = self.depth.saturating_sub(1);
                    self.set_prev(Prev::StatementEnd);
                }
                '(' | '[' => {
                    self.pos += 1;
                    self.depth += 1;
                    self.set_prev(Prev::Punct);
                }
                ')' | ']' => {
                    self.pos += 1;
                    self.depth = self.depth.saturating_sub(1);
                    self.set_prev(Prev::Operand);
                }
                ';' => {
                    self.pos += 1;
                    self.set_prev(Prev::StatementEnd);
                }
                c if is_ident_start(c) => self.word(async_pending),
                c if c.is_ascii_digit() => {
                    while matches!(self.peek(), Some(d) if d.is_alphanumeric() || d == '.' || d == '_') {
                        self.pos += 1;
                    }
                    self.set_prev(Prev::Operand);
                }
                _ => {
                    self.pos += 1;
                    self.set_prev(Prev::Punct);
                }
            }
        }
    }

    fn word(&mut self, async_pending: bool) {
        let statement_start = self.at_statement_start();
        let word = self.read_identifier().unwrap_or_default();

        if self.depth == 0 {
            match word.as_str() {
                "function" if statement_start || async_pending => {
                    self.skip_trivia();
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        self.skip_trivia();
                    }
                    if let Some(name) = self.read_identifier() {
                        self.found.push(EntryDescriptor {
                            name,
                            kind: EntryKind::Function,
                        });
                        self.set_prev(Prev::Operand);
                        return;
                    }
                }
                "class" if statement_start => {
                    self.skip_trivia();
                    if let Some(name) = self.read_identifier() {
                        if name != "extends" {
                            self.found.push(EntryDescriptor {
                                name,
                                kind: EntryKind::Class,
                            });
                            self.set_prev(Prev::Operand);
                            return;
                        }
                    }
                }
                "async" if statement_start => {
                    self.set_prev(Prev::Word("async".to_string()));
                    self.pending_async = true;
                    return;
                }
                _ => {}
            }
        }

        self.set_prev(Prev::Word(word));
    }

    fn read_identifier(&mut self) -> Option<String> {
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return None,
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    /// Skip whitespace and comments between a keyword and its name.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('/') if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                _ => return,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                return;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek() {
            if c == '*' && self.peek_at(1) == Some('/') {
                self.pos += 2;
                return;
            }
            if c == '\n' {
                self.newline_since_prev = true;
            }
            self.pos += 1;
        }
    }

    fn skip_string(&mut self, quote: char) {
        self.pos += 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 2,
                '\n' => return,
                c if c == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_template(&mut self) {
        self.pos += 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 2,
                '`' => {
                    self.pos += 1;
                    return;
                }
                '$' if self.peek_at(1) == Some('{') => {
                    self.pos += 2;
                    // Unbalanced brackets inside the substitution must not leak out
                    let saved_prev = std::mem::replace(&mut self.prev, Prev::Punct);
                    let saved_depth = self.depth;
                    self.depth += 1;
                    self.scan(true);
                    self.depth = saved_depth;
                    self.prev = saved_prev;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_regex(&mut self) {
        self.pos += 1;
        let mut in_class = false;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 2,
                '\n' => return,
                '[' => {
                    in_class = true;
                    self.pos += 1;
                }
                ']' => {
                    in_class = false;
                    self.pos += 1;
                }
                '/' if !in_class => {
                    self.pos += 1;
                    while matches!(self.peek(), Some(f) if f.is_ascii_alphabetic()) {
                        self.pos += 1;
                    }
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
