//! Tokenizer for the script dialect.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and `Dedent`
//! tokens. Newlines inside brackets and after a trailing backslash are
//! swallowed.

use crate::ast::Line;
use crate::error::SafeError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Kw(Kw),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    And,
    As,
    Assert,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Exec,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Not,
    Or,
    Pass,
    Print,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Kw {
    fn lookup(word: &str) -> Option<Self> {
        Some(match word {
            "and" => Self::And,
            "as" => Self::As,
            "assert" => Self::Assert,
            "break" => Self::Break,
            "class" => Self::Class,
            "continue" => Self::Continue,
            "def" => Self::Def,
            "del" => Self::Del,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "except" => Self::Except,
            "exec" => Self::Exec,
            "finally" => Self::Finally,
            "for" => Self::For,
            "from" => Self::From,
            "global" => Self::Global,
            "if" => Self::If,
            "import" => Self::Import,
            "in" => Self::In,
            "is" => Self::Is,
            "lambda" => Self::Lambda,
            "not" => Self::Not,
            "or" => Self::Or,
            "pass" => Self::Pass,
            "print" => Self::Print,
            "raise" => Self::Raise,
            "return" => Self::Return,
            "try" => Self::Try,
            "while" => Self::While,
            "with" => Self::With,
            "yield" => Self::Yield,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::As => "as",
            Self::Assert => "assert",
            Self::Break => "break",
            Self::Class => "class",
            Self::Continue => "continue",
            Self::Def => "def",
            Self::Del => "del",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::Except => "except",
            Self::Exec => "exec",
            Self::Finally => "finally",
            Self::For => "for",
            Self::From => "from",
            Self::Global => "global",
            Self::If => "if",
            Self::Import => "import",
            Self::In => "in",
            Self::Is => "is",
            Self::Lambda => "lambda",
            Self::Not => "not",
            Self::Or => "or",
            Self::Pass => "pass",
            Self::Print => "print",
            Self::Raise => "raise",
            Self::Return => "return",
            Self::Try => "try",
            Self::While => "while",
            Self::With => "with",
            Self::Yield => "yield",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: Line,
}

/// Operators, longest first so that greedy matching works.
const OPERATORS: &[&str] = &[
    "**=", "//=", "<<=", ">>=", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "<>", "+=", "-=",
    "*=", "/=", "%=", "&=", "|=", "^=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@",
    "=", "+", "-", "*", "/", "%", "&", "|", "^", "~", "<", ">", "`",
];

/// Split source text into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SafeError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: Line,
    indents: Vec<usize>,
    paren_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> SafeError {
        SafeError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok, line: Line) {
        self.tokens.push(Token { tok, line });
    }

    fn run(mut self) -> Result<Vec<Token>, SafeError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.paren_depth == 0 {
                self.indentation()?;
                continue;
            }
            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' => {
                    let next = self.peek_at(1);
                    if next == Some('\n') {
                        self.pos += 2;
                        self.line += 1;
                    } else if next == Some('\r') {
                        self.pos += 2;
                        if self.peek() == Some('\n') {
                            self.pos += 1;
                        }
                        self.line += 1;
                    } else {
                        return Err(self.error("unexpected character after line continuation"));
                    }
                }
                '\n' | '\r' => {
                    self.pos += 1;
                    if c == '\r' && self.peek() == Some('\n') {
                        self.pos += 1;
                    }
                    if self.paren_depth == 0 {
                        self.push(Tok::Newline, self.line);
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                '\'' | '"' => {
                    let line = self.line;
                    let text = self.string(false)?;
                    self.push(Tok::Str(text), line);
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }

        let line = self.line;
        if self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.tok, Tok::Newline | Tok::Dedent))
        {
            self.push(Tok::Newline, line);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line);
        }
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    /// Measure the indentation of a logical line and emit INDENT/DEDENT.
    /// Blank and comment-only lines are skipped entirely.
    fn indentation(&mut self) -> Result<(), SafeError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(()),
            Some('#') => {
                self.skip_comment();
                return self.skip_newline();
            }
            Some('\n') | Some('\r') => return self.skip_newline(),
            _ => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, self.line);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Tok::Dedent, self.line);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(())
    }

    fn skip_newline(&mut self) -> Result<(), SafeError> {
        match self.peek() {
            Some('\r') => {
                self.pos += 1;
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                self.line += 1;
            }
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
            }
            _ => {}
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.pos += 1;
        }
    }

    fn word(&mut self) -> Result<(), SafeError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        // String prefixes: r"..", u'..', b"..", ur'..'
        if matches!(self.peek(), Some('\'') | Some('"'))
            && word.len() <= 2
            && word.chars().all(|c| matches!(c, 'r' | 'R' | 'u' | 'U' | 'b' | 'B'))
        {
            let raw = word.contains(['r', 'R']);
            let line = self.line;
            let text = self.string(raw)?;
            self.push(Tok::Str(text), line);
            return Ok(());
        }

        let tok = match Kw::lookup(&word) {
            Some(kw) => Tok::Kw(kw),
            None => Tok::Name(word),
        };
        self.push(tok, self.line);
        Ok(())
    }

    fn operator(&mut self) -> Result<(), SafeError> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.paren_depth += 1,
                    ")" | "]" | "}" => self.paren_depth = self.paren_depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op), self.line);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or('?');
        Err(self.error(format!("unexpected character {c:?}")))
    }

    fn number(&mut self) -> Result<(), SafeError> {
        let line = self.line;
        let start = self.pos;

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while self.peek().is_some_and(|c| c.is_digit(radix)) {
                    self.pos += 1;
                }
                let digits: String = self.chars[digits_start..self.pos].iter().collect();
                if digits.is_empty() {
                    return Err(self.error("invalid number literal"));
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("integer literal too large"))?;
                self.long_suffix();
                self.push(Tok::Int(value), line);
                return Ok(());
            }
        }

        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                return Err(self.error("invalid float exponent"));
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(self.error("complex literals are not supported"));
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal {text:?}")))?;
            self.push(Tok::Float(value), line);
        } else {
            // Legacy octal: 0755
            let value = if text.len() > 1 && text.starts_with('0') {
                if !text.chars().all(|c| c.is_digit(8)) {
                    return Err(self.error(format!("invalid octal literal {text:?}")));
                }
                i64::from_str_radix(&text[1..], 8)
            } else {
                text.parse::<i64>()
            }
            .map_err(|_| self.error("integer literal too large"))?;
            self.long_suffix();
            self.push(Tok::Int(value), line);
        }
        Ok(())
    }

    fn long_suffix(&mut self) {
        if matches!(self.peek(), Some('l') | Some('L')) {
            self.pos += 1;
        }
    }

    /// Read a string literal starting at the opening quote.
    fn string(&mut self, raw: bool) -> Result<String, SafeError> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("EOF while scanning string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\n' {
                if !triple {
                    return Err(self.error("EOL while scanning string literal"));
                }
                self.line += 1;
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\\' {
                self.escape(raw, &mut out)?;
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn escape(&mut self, raw: bool, out: &mut String) -> Result<(), SafeError> {
        let Some(next) = self.peek_at(1) else {
            return Err(self.error("EOF while scanning string literal"));
        };
        if next == '\n' {
            self.line += 1;
            self.pos += 2;
            if raw {
                out.push('\\');
                out.push('\n');
            }
            return Ok(());
        }
        if raw {
            out.push('\\');
            out.push(next);
            self.pos += 2;
            return Ok(());
        }
        self.pos += 2;
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' => {
                let code = self.hex_digits(2)?;
                out.push(char::from_u32(code).ok_or_else(|| self.error("invalid \\x escape"))?);
            }
            'u' => {
                let code = self.hex_digits(4)?;
                out.push(char::from_u32(code).ok_or_else(|| self.error("invalid \\u escape"))?);
            }
            '0'..='7' => {
                let mut code = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, SafeError> {
        let mut code = 0u32;
        for _ in 0..count {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("truncated escape sequence"))?;
            code = code * 16 + digit;
            self.pos += 1;
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            toks("x = 1 + 2"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Op("+"),
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let t = toks("if x:\n    y = 1\nz = 2\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        let indent = t.iter().position(|t| *t == Tok::Indent).unwrap();
        let dedent = t.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let t = toks("x = 1\n\n   # comment\n\ny = 2\n");
        assert!(!t.contains(&Tok::Indent));
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 2);
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let t = toks("x = [1,\n     2]\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn backslash_continuation() {
        let tokens = tokenize("x = 1 + \\\n    2\ny = 3").unwrap();
        let y = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("y".into()))
            .unwrap();
        assert_eq!(y.line, 3);
    }

    #[test]
    fn string_escapes_and_prefixes() {
        assert_eq!(toks(r#"'a\tb'"#)[0], Tok::Str("a\tb".into()));
        assert_eq!(toks(r#"r'a\tb'"#)[0], Tok::Str("a\\tb".into()));
        assert_eq!(toks(r#"u"\x41""#)[0], Tok::Str("A".into()));
    }

    #[test]
    fn triple_quoted_string_counts_lines() {
        let tokens = tokenize("s = '''a\nb'''\nt = 1").unwrap();
        assert_eq!(tokens[2].tok, Tok::Str("a\nb".into()));
        let t = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("t".into()))
            .unwrap();
        assert_eq!(t.line, 3);
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("0x1F")[0], Tok::Int(31));
        assert_eq!(toks("0755")[0], Tok::Int(493));
        assert_eq!(toks("10L")[0], Tok::Int(10));
        assert_eq!(toks("1.5e2")[0], Tok::Float(150.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn keywords_are_recognised() {
        assert_eq!(toks("import os")[0], Tok::Kw(Kw::Import));
        assert_eq!(toks("None")[0], Tok::Name("None".into()));
    }

    #[test]
    fn rejects_bad_dedent() {
        let err = tokenize("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert!(matches!(err, SafeError::Syntax { line: 3, .. }));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(
            tokenize("x = 'abc\n"),
            Err(SafeError::Syntax { .. })
        ));
    }

    #[test]
    fn rejects_integer_overflow() {
        assert!(tokenize("x = 99999999999999999999").is_err());
    }
}
