//! Lexical analysis (tokenization) of a single input line.
//!
//! The lexer knows about whitespace, the pipe operator, single and double quotes
//! and backslash-escaped quote characters. Everything else is word text.

/// A word produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Word text with quoting removed.
    pub value: String,
    /// `false` when any part of the word came from a single-quoted run, in which
    /// case `$` must not be expanded.
    pub substitutable: bool,
}

impl Token {
    pub fn new(value: impl Into<String>, substitutable: bool) -> Self {
        Self {
            value: value.into(),
            substitutable,
        }
    }
}

/// Represents a lexeme resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexeme {
    Word(Token),
    /// The pipe operator, `|`.
    PipeOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    substitutable: bool,
    /// Byte offset in `buffer` where the currently open quote started.
    quote_start: usize,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            substitutable: true,
            quote_start: 0,
        }
    }

    /// Performs lexical analysis on the input string and returns the lexemes.
    ///
    /// Malformed quoting never fails: an unterminated quote swallows the rest of
    /// the line and keeps the opening quote character in the word.
    fn make_lexemes(&mut self) -> Vec<Lexeme> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_quoted(ch, '\''),
                LexingState::ReadingDoubleQuote => self.handle_quoted(ch, '"'),
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote => self.buffer.insert(self.quote_start, '\''),
            LexingState::ReadingDoubleQuote => self.buffer.insert(self.quote_start, '"'),
            _ => {}
        }
        if self.state != LexingState::Start {
            self.finish_word(&mut out);
        }

        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<Lexeme>) {
        match ch {
            c if c.is_whitespace() => {}
            '|' => out.push(Lexeme::PipeOp),
            c => {
                self.state = LexingState::ReadingWord;
                self.handle_word(c, out);
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Lexeme>) {
        match ch {
            c if c.is_whitespace() => {
                self.finish_word(out);
            }
            '|' => {
                self.finish_word(out);
                out.push(Lexeme::PipeOp);
            }
            '\'' => {
                self.quote_start = self.buffer.len();
                self.substitutable = false;
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.quote_start = self.buffer.len();
                self.state = LexingState::ReadingDoubleQuote;
            }
            '\\' => self.handle_backslash(),
            c => self.buffer.push(c),
        }
    }

    fn handle_quoted(&mut self, ch: char, quote: char) {
        match ch {
            c if c == quote => self.state = LexingState::ReadingWord,
            '\\' => self.handle_backslash(),
            c => self.buffer.push(c),
        }
    }

    /// `\'` and `\"` produce the quote character itself; any other backslash is literal.
    fn handle_backslash(&mut self) {
        match self.peek_char() {
            Some(q @ ('\'' | '"')) => {
                self.read_char();
                self.buffer.push(q);
            }
            _ => self.buffer.push('\\'),
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Lexeme>) {
        out.push(Lexeme::Word(Token {
            value: std::mem::take(&mut self.buffer),
            substitutable: self.substitutable,
        }));
        self.substitutable = true;
        self.state = LexingState::Start;
    }
}

/// The main entry point function to perform lexical analysis.
///
/// Creates and runs the finite state machine to tokenize the input line.
pub fn split_into_lexemes(line: &str) -> Vec<Lexeme> {
    LexingFSM::new(line).make_lexemes()
}
