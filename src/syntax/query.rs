use std::collections::HashMap;

use tree_sitter::{Language, Node, Query, QueryCursor, StreamingIterator};

use crate::reader::{FileReader, MatchRange, MatchResult};
use crate::syntax::errors::SyntaxError;
use crate::syntax::parser::SyntaxParser;

/// A match from a tree-sitter query with captured nodes.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    /// The full match byte range (the hull of all captures).
    pub byte_start: usize,
    pub byte_end: usize,
    /// Named captures: capture name -> captured node.
    pub captures: HashMap<String, CapturedNode>,
}

#[derive(Debug, Clone)]
pub struct CapturedNode {
    pub byte_start: usize,
    pub byte_end: usize,
    pub text: String,
    pub kind: String,
}

/// Engine for executing one compiled tree-sitter query.
///
/// # Query syntax
///
/// Tree-sitter queries use S-expression syntax:
/// ```text
/// (function_item
///   name: (identifier) @func_name
///   body: (block) @body)
/// ```
///
/// Captures are prefixed with `@` and can be referenced by name.
#[derive(Debug)]
pub struct QueryEngine {
    query: Query,
    capture_names: Vec<String>,
}

impl QueryEngine {
    /// Compile a query for the given grammar.
    pub fn new(language: &Language, query_str: &str) -> Result<Self, SyntaxError> {
        let query = Query::new(language, query_str).map_err(|e| SyntaxError::InvalidQuery {
            message: e.to_string(),
        })?;
        let capture_names = query.capture_names().iter().map(|s| s.to_string()).collect();
        Ok(Self {
            query,
            capture_names,
        })
    }

    /// Execute the query against a parsed tree and return all matches.
    pub fn find_all(&self, root: Node<'_>, source: &[u8]) -> Vec<QueryMatch> {
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.query, root, source);

        let mut results = Vec::new();

        // tree-sitter 0.25+ uses StreamingIterator
        while let Some(m) = matches.next() {
            let mut captures = HashMap::new();
            let mut overall_start = usize::MAX;
            let mut overall_end = 0usize;

            for capture in m.captures {
                let node = capture.node;
                let name = &self.capture_names[capture.index as usize];
                let text = String::from_utf8_lossy(&source[node.byte_range()]).into_owned();

                overall_start = overall_start.min(node.start_byte());
                overall_end = overall_end.max(node.end_byte());

                captures.insert(
                    name.clone(),
                    CapturedNode {
                        byte_start: node.start_byte(),
                        byte_end: node.end_byte(),
                        text,
                        kind: node.kind().to_string(),
                    },
                );
            }

            if overall_start != usize::MAX {
                results.push(QueryMatch {
                    byte_start: overall_start,
                    byte_end: overall_end,
                    captures,
                });
            }
        }

        results
    }

    /// Execute the query and expect exactly one match.
    pub fn find_unique(&self, root: Node<'_>, source: &[u8]) -> Result<QueryMatch, SyntaxError> {
        let matches = self.find_all(root, source);
        match matches.len() {
            0 => Err(SyntaxError::NoMatch),
            1 => Ok(matches.into_iter().next().expect("len checked == 1")),
            n => Err(SyntaxError::AmbiguousMatch { count: n }),
        }
    }

    /// Run the query over a file and translate the hits into search
    /// results with row/column points, like
    /// [`FileReader::find`](crate::reader::FileReader::find) does for
    /// textual patterns. Captures are ordered by byte offset.
    pub fn find_in_reader(
        &self,
        reader: &mut FileReader,
        parser: &mut SyntaxParser,
    ) -> Result<Vec<MatchResult>, SyntaxError> {
        let tree = parser.parse_reader(reader)?;
        let matches = {
            let source = reader.sync()?;
            self.find_all(tree.root_node(), source)
        };

        Ok(matches
            .into_iter()
            .map(|m| {
                let mut captures: Vec<_> = m.captures.values().cloned().collect();
                captures.sort_by_key(|c| (c.byte_start, c.byte_end));
                MatchResult {
                    range: range_with_points(reader, m.byte_start, m.byte_end),
                    captures: captures
                        .into_iter()
                        .map(|c| range_with_points(reader, c.byte_start, c.byte_end))
                        .collect(),
                }
            })
            .collect())
    }

    /// Capture names defined in the query.
    pub fn capture_names(&self) -> &[String] {
        &self.capture_names
    }
}

fn range_with_points(reader: &FileReader, start: usize, end: usize) -> MatchRange {
    MatchRange {
        start_byte: start,
        end_byte: end,
        start_point: reader.point_at(start),
        end_point: reader.point_at(end),
    }
}
