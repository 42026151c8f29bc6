//! Reads the textual form of a translation unit: `declare` lines feeding the
//! procedure registry and typed `procedure` definitions forming the module.

use std::{path::PathBuf, rc::Rc};

use colored::Colorize;
use thiserror::Error;

use self::lexer::Span;
use crate::middle::{ast::Suite, registry::Registry};

pub mod intern;
pub mod lexer;
pub mod parser;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn in_memory(contents: &str) -> Self {
        Self {
            contents: contents.to_owned(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// 1-based line of a byte position
    pub fn row_for_position(&self, position: usize) -> usize {
        self.contents[..position.min(self.contents.len())]
            .matches('\n')
            .count()
            + 1
    }

    /// 1-based column of a byte position
    pub fn column_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());
        let line_start = self.contents[..position]
            .rfind('\n')
            .map(|n| n + 1)
            .unwrap_or(0);

        position - line_start + 1
    }

    /// The line holding the start of `span`, underlined where the span falls
    pub fn highlight_span(&self, span: Span) -> String {
        let row = self.row_for_position(span.start);
        let column = self.column_for_position(span.start);
        let line = self.contents.lines().nth(row - 1).unwrap_or("");
        let width = span
            .end
            .saturating_sub(span.start)
            .clamp(1, line.len().saturating_sub(column - 1).max(1));
        let gutter = format!("{row} | ");

        format!(
            "{}{line}\n{}{}",
            gutter.blue(),
            " ".repeat(gutter.len() + column - 1),
            "^".repeat(width).red().bold()
        )
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

/// A syntax or typing error in the source text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

/// A parsed translation unit: the procedures in source order and the registry
/// built from the default operators plus every `declare` line
#[derive(Debug, Clone)]
pub struct Unit {
    pub module: Rc<Suite>,
    pub registry: Registry,
}

pub fn parse_file(source: &SourceFile) -> Result<Unit, ParseError> {
    parser::Parser::parse_unit(source)
}

pub fn parse_str(source: &str) -> Result<Unit, ParseError> {
    parse_file(&SourceFile::in_memory(source))
}
