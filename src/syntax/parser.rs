use tree_sitter::{Language, Parser, Tree};

use crate::reader::FileReader;
use crate::syntax::errors::SyntaxError;

/// Incremental-parser wrapper bound to one grammar.
///
/// Not thread-safe; use one instance per thread (pool tasks each build
/// their own).
pub struct SyntaxParser {
    parser: Parser,
    language: Language,
}

impl SyntaxParser {
    /// Bind a parser to a caller-supplied grammar.
    pub fn new(language: Language) -> Result<Self, SyntaxError> {
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|_| SyntaxError::LanguageSet)?;
        Ok(Self { parser, language })
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Parse an in-memory string.
    pub fn parse_str(&mut self, source: &str) -> Result<Tree, SyntaxError> {
        self.parser
            .parse(source, None)
            .ok_or(SyntaxError::ParseFailed)
    }

    /// Parse a file by streaming its bytes out of the reader's buffer.
    ///
    /// The reader is synced first so the whole file is resident; the
    /// parser then pulls slices on demand through the reader's
    /// streaming-source callback.
    pub fn parse_reader(&mut self, reader: &mut FileReader) -> Result<Tree, SyntaxError> {
        reader.sync()?;
        let mut read = reader.parse_source();
        self.parser
            .parse_with_options(&mut read, None, None)
            .ok_or(SyntaxError::ParseFailed)
    }
}
