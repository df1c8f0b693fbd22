use crate::lexer::{self, Lexeme, Token};

/// A parsed input line: stages separated by unquoted `|`.
///
/// Every stage holds at least one token. A line with nothing to run parses to
/// an empty pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Vec<Token>>,
}

impl Pipeline {
    pub fn stages(&self) -> &[Vec<Token>] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

struct PipelineBuilder {
    stages: Vec<Vec<Token>>,
    current: Vec<Token>,
}

impl PipelineBuilder {
    fn new() -> Self {
        PipelineBuilder {
            stages: Vec::new(),
            current: Vec::new(),
        }
    }

    fn push(&mut self, lexeme: Lexeme) {
        match lexeme {
            Lexeme::Word(token) => self.current.push(token),
            Lexeme::PipeOp => self.end_stage(),
        }
    }

    /// A separator with nothing before it contributes no stage.
    fn end_stage(&mut self) {
        if !self.current.is_empty() {
            self.stages.push(std::mem::take(&mut self.current));
        }
    }

    fn build(mut self) -> Pipeline {
        self.end_stage();
        Pipeline {
            stages: self.stages,
        }
    }
}

/// Splits an input line into pipeline stages.
///
/// Parsing never fails; see [`lexer::split_into_lexemes`] for how malformed
/// quoting is handled.
pub fn parse(line: &str) -> Pipeline {
    let mut builder = PipelineBuilder::new();
    for lexeme in lexer::split_into_lexemes(line) {
        builder.push(lexeme);
    }
    builder.build()
}
