use std::fmt::Write as _;

use thiserror::Error;

/// Lines shown on either side of an offending line in error excerpts.
const EXCERPT_RADIUS: usize = 2;

/// Authoring-dialect input that could not be converted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {kind}\n{excerpt}")]
pub struct ConvertError {
    pub line: usize,
    pub kind: ConvertErrorKind,
    pub excerpt: String,
}

impl ConvertError {
    pub(crate) fn new(source: &str, line: usize, kind: ConvertErrorKind) -> Self {
        Self {
            line,
            kind,
            excerpt: excerpt(source, line),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConvertErrorKind {
    #[error("unterminated `{open}` tag")]
    UnterminatedTag { open: &'static str },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("empty block tag")]
    EmptyBlock,
    #[error("unsupported block tag `{tag}`")]
    UnsupportedTag { tag: String },
    #[error("call to unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("malformed `{tag}` tag: {reason}")]
    Malformed { tag: &'static str, reason: &'static str },
    #[error("`{found}` does not close `{expected}` opened on line {opened_at}")]
    MismatchedBlock {
        found: String,
        expected: &'static str,
        opened_at: usize,
    },
    #[error("`{found}` has no open block to close")]
    UnexpectedClose { found: String },
    #[error("`{keyword}` block opened on line {opened_at} is never closed")]
    Unclosed {
        keyword: &'static str,
        opened_at: usize,
    },
}

/// Failures while turning template text into an executable template or while
/// executing it. Every variant names the template and version it concerns.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("template `{name}` ({version}) failed to convert: {source}")]
    Convert {
        name: String,
        version: String,
        #[source]
        source: ConvertError,
    },
    #[error("template `{name}` ({version}) failed to compile at line {line}: {message}\n{excerpt}")]
    Compile {
        name: String,
        version: String,
        line: usize,
        message: String,
        excerpt: String,
    },
    #[error("template `{name}` ({version}) calls unbound function `{function}` on line {line}")]
    UnboundFunction {
        name: String,
        version: String,
        function: String,
        line: usize,
    },
    #[error("template `{name}` ({version}) failed to render at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string()))]
    Render {
        name: String,
        version: String,
        line: Option<usize>,
        message: String,
    },
}

/// Render the lines around `line` (1-based) with a marker on the line itself.
pub fn excerpt(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() || line == 0 {
        return String::new();
    }

    let target = line.min(lines.len());
    let first = target.saturating_sub(EXCERPT_RADIUS).max(1);
    let last = (target + EXCERPT_RADIUS).min(lines.len());
    let width = last.to_string().len();

    let mut output = String::new();
    for number in first..=last {
        let marker = if number == target { '>' } else { ' ' };
        let _ = writeln!(
            output,
            "{marker} {number:>width$} | {}",
            lines[number - 1],
            width = width
        );
    }
    output
}
