//! Authoring dialect → native dialect conversion.
//!
//! Page authors write `{{ title }}`, `{% loop 5 %}…{% endloop %}`,
//! `{% for i in range(3) %}` and bare calls such as `random_url()` or
//! `random_number(1, 100)`. The native dialect executed by minijinja reads
//! page fields from `page.*` and content functions from the per-render
//! function table `fx.*`, so the converter rewrites:
//!
//! | authoring                  | native                              |
//! |----------------------------|-------------------------------------|
//! | `title`                    | `page.title`                        |
//! | `random_url()`             | `fx.random_url()`                   |
//! | `range(a, b)`              | `fx.iterate(a, b)`                  |
//! | `{% loop n %}`             | `{% for _ in fx.iterate(n) %}`      |
//! | `{% endloop %}`            | `{% endfor %}`                      |
//! | `{% elseif c %}`           | `{% elif c %}`                      |
//!
//! Literal text, comments, string literals, filters, tests and attribute
//! access are copied verbatim. Output of the converter is a fixed point:
//! converting it again yields the same text.

use super::error::{ConvertError, ConvertErrorKind};

/// Root object holding per-page values in the native dialect.
pub const PAGE_ROOT: &str = "page";
/// Root object holding the per-render function table in the native dialect.
pub const FUNCTION_ROOT: &str = "fx";

/// Page fields reachable as bare identifiers in the authoring dialect.
pub const PAGE_FIELDS: &[&str] = &[
    "title",
    "site_id",
    "site_name",
    "domain",
    "path",
    "keyword",
    "analytics",
    "push_script",
    "content",
    "now",
];

/// Content functions bound into every render.
pub const BOUND_FUNCTIONS: &[&str] = &[
    "random_keyword",
    "random_title",
    "random_content",
    "random_url",
    "random_image",
    "random_number",
    "pinyin",
    "cls",
    "iterate",
];

/// Native globals that may be called bare.
const NATIVE_FUNCTIONS: &[&str] = &["dict", "namespace"];

/// Authoring name for the iteration helper.
const RANGE_ALIAS: &str = "range";
const ITERATE: &str = "iterate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    For,
    Loop,
    If,
    Set,
}

impl BlockKind {
    fn keyword(self) -> &'static str {
        match self {
            BlockKind::For => "for",
            BlockKind::Loop => "loop",
            BlockKind::If => "if",
            BlockKind::Set => "set",
        }
    }
}

#[derive(Debug)]
struct OpenBlock {
    kind: BlockKind,
    line: usize,
    locals: Vec<String>,
}

/// Converts authoring-dialect template text into the native dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateConverter;

impl TemplateConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn convert(&self, source: &str) -> Result<String, ConvertError> {
        Conversion::new(source).run()
    }
}

struct Conversion<'a> {
    source: &'a str,
    output: String,
    line: usize,
    blocks: Vec<OpenBlock>,
    globals: Vec<String>,
}

impl<'a> Conversion<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            output: String::with_capacity(source.len() + source.len() / 4),
            line: 1,
            blocks: Vec::new(),
            globals: Vec::new(),
        }
    }

    fn run(mut self) -> Result<String, ConvertError> {
        let source = self.source;
        let mut cursor = 0;

        while let Some((start, open)) = next_tag(source, cursor) {
            self.push_literal(&source[cursor..start]);
            let tag_line = self.line;

            let body_start = start + 2;
            let close = match open {
                TagOpen::Comment => source[body_start..].find("#}").map(|i| body_start + i),
                TagOpen::Output => find_close(&source[body_start..], "}}").map(|i| body_start + i),
                TagOpen::Block => find_close(&source[body_start..], "%}").map(|i| body_start + i),
            };
            let close = close.ok_or_else(|| {
                self.error(
                    tag_line,
                    ConvertErrorKind::UnterminatedTag {
                        open: open.delimiter(),
                    },
                )
            })?;
            let end = close + 2;
            let raw_tag = &source[start..end];

            match open {
                TagOpen::Comment => self.output.push_str(raw_tag),
                TagOpen::Output => {
                    let (lead, body, trail) = split_markers(&source[body_start..close]);
                    let converted = self.rewrite(body, tag_line)?;
                    self.output.push_str("{{");
                    self.output.push_str(lead);
                    self.output.push_str(&converted);
                    self.output.push_str(trail);
                    self.output.push_str("}}");
                }
                TagOpen::Block if is_raw_open(&source[body_start..close]) => {
                    let raw_end = find_endraw(source, end).ok_or_else(|| {
                        self.error(
                            tag_line,
                            ConvertErrorKind::Unclosed {
                                keyword: "raw",
                                opened_at: tag_line,
                            },
                        )
                    })?;
                    let verbatim = &source[start..raw_end];
                    self.output.push_str(verbatim);
                    self.line += verbatim.matches('\n').count();
                    cursor = raw_end;
                    continue;
                }
                TagOpen::Block => {
                    let (lead, body, trail) = split_markers(&source[body_start..close]);
                    let converted = self.convert_block(body, tag_line)?;
                    self.output.push_str("{%");
                    self.output.push_str(lead);
                    self.output.push_str(&converted);
                    self.output.push_str(trail);
                    self.output.push_str("%}");
                }
            }

            self.line += raw_tag.matches('\n').count();
            cursor = end;
        }

        self.push_literal(&source[cursor..]);

        if let Some(open) = self.blocks.pop() {
            return Err(self.error(
                open.line,
                ConvertErrorKind::Unclosed {
                    keyword: open.kind.keyword(),
                    opened_at: open.line,
                },
            ));
        }

        Ok(self.output)
    }

    fn push_literal(&mut self, text: &str) {
        self.line += text.matches('\n').count();
        self.output.push_str(text);
    }

    fn error(&self, line: usize, kind: ConvertErrorKind) -> ConvertError {
        ConvertError::new(self.source, line, kind)
    }

    /// Convert the inside of a `{% … %}` tag. `body` keeps its surrounding
    /// whitespace so the output preserves the author's spacing.
    fn convert_block(&mut self, body: &str, line: usize) -> Result<String, ConvertError> {
        let leading = &body[..body.len() - body.trim_start().len()];
        let trailing = &body[body.trim_end().len()..];
        let trimmed = body.trim();

        let (keyword, rest) = match trimmed.find(char::is_whitespace) {
            Some(index) => (&trimmed[..index], trimmed[index..].trim_start()),
            None => (trimmed, ""),
        };
        if keyword.is_empty() {
            return Err(self.error(line, ConvertErrorKind::EmptyBlock));
        }

        let converted = match keyword {
            "for" => self.convert_for(rest, line)?,
            "loop" => {
                if rest.is_empty() {
                    return Err(self.error(
                        line,
                        ConvertErrorKind::Malformed {
                            tag: "loop",
                            reason: "expected an iteration count",
                        },
                    ));
                }
                let count = self.rewrite(rest, line)?;
                self.blocks.push(OpenBlock {
                    kind: BlockKind::Loop,
                    line,
                    locals: Vec::new(),
                });
                format!("for _ in {FUNCTION_ROOT}.{ITERATE}({count})")
            }
            "if" => {
                let condition = self.rewrite(rest, line)?;
                self.blocks.push(OpenBlock {
                    kind: BlockKind::If,
                    line,
                    locals: Vec::new(),
                });
                format!("if {condition}")
            }
            "elif" | "elseif" | "elsif" => {
                self.expect_open(keyword, line, &[BlockKind::If])?;
                let condition = self.rewrite(rest, line)?;
                format!("elif {condition}")
            }
            "else" => {
                self.expect_open(
                    keyword,
                    line,
                    &[BlockKind::If, BlockKind::For, BlockKind::Loop],
                )?;
                "else".to_string()
            }
            "set" => self.convert_set(rest, line)?,
            "endfor" => {
                self.close(keyword, line, BlockKind::For)?;
                "endfor".to_string()
            }
            "endloop" => {
                self.close(keyword, line, BlockKind::Loop)?;
                "endfor".to_string()
            }
            "endif" => {
                self.close(keyword, line, BlockKind::If)?;
                "endif".to_string()
            }
            "endset" => {
                self.close(keyword, line, BlockKind::Set)?;
                "endset".to_string()
            }
            other => {
                return Err(self.error(
                    line,
                    ConvertErrorKind::UnsupportedTag {
                        tag: other.to_string(),
                    },
                ));
            }
        };

        Ok(format!("{leading}{converted}{trailing}"))
    }

    fn convert_for(&mut self, rest: &str, line: usize) -> Result<String, ConvertError> {
        let split = find_keyword(rest, "in").ok_or_else(|| {
            self.error(
                line,
                ConvertErrorKind::Malformed {
                    tag: "for",
                    reason: "expected `for <target> in <iterable>`",
                },
            )
        })?;
        let targets = rest[..split].trim_end();
        let iterable = rest[split + 2..].trim_start();
        if targets.is_empty() || iterable.is_empty() {
            return Err(self.error(
                line,
                ConvertErrorKind::Malformed {
                    tag: "for",
                    reason: "expected `for <target> in <iterable>`",
                },
            ));
        }

        // The iterable is evaluated in the enclosing scope.
        let iterable = self.rewrite(iterable, line)?;
        let locals = target_names(targets);
        self.blocks.push(OpenBlock {
            kind: BlockKind::For,
            line,
            locals,
        });

        Ok(format!("for {targets} in {iterable}"))
    }

    fn convert_set(&mut self, rest: &str, line: usize) -> Result<String, ConvertError> {
        match find_assignment(rest) {
            Some(eq) => {
                let targets = rest[..eq].trim_end();
                let value = self.rewrite(rest[eq + 1..].trim_start(), line)?;
                let names = target_names(targets);
                self.declare(names);
                Ok(format!("set {targets} = {value}"))
            }
            None => {
                let target = rest.trim();
                if target.is_empty() {
                    return Err(self.error(
                        line,
                        ConvertErrorKind::Malformed {
                            tag: "set",
                            reason: "expected a target name",
                        },
                    ));
                }
                self.declare(target_names(target));
                self.blocks.push(OpenBlock {
                    kind: BlockKind::Set,
                    line,
                    locals: Vec::new(),
                });
                Ok(format!("set {target}"))
            }
        }
    }

    fn declare(&mut self, names: Vec<String>) {
        // `if` does not open a scope in the native dialect.
        match self.blocks.iter_mut().rev().find(|b| b.kind != BlockKind::If) {
            Some(block) => block.locals.extend(names),
            None => self.globals.extend(names),
        }
    }

    fn expect_open(
        &self,
        found: &str,
        line: usize,
        allowed: &[BlockKind],
    ) -> Result<(), ConvertError> {
        match self.blocks.last() {
            Some(open) if allowed.contains(&open.kind) => Ok(()),
            Some(open) => Err(self.error(
                line,
                ConvertErrorKind::MismatchedBlock {
                    found: found.to_string(),
                    expected: open.kind.keyword(),
                    opened_at: open.line,
                },
            )),
            None => Err(self.error(
                line,
                ConvertErrorKind::UnexpectedClose {
                    found: found.to_string(),
                },
            )),
        }
    }

    fn close(&mut self, found: &str, line: usize, kind: BlockKind) -> Result<(), ConvertError> {
        self.expect_open(found, line, &[kind])?;
        self.blocks.pop();
        Ok(())
    }

    fn is_local(&self, name: &str) -> bool {
        self.globals.iter().any(|n| n == name)
            || self
                .blocks
                .iter()
                .any(|block| block.locals.iter().any(|n| n == name))
    }

    /// Rewrite page-field references and bound function calls inside an
    /// expression.
    fn rewrite(&self, expr: &str, line: usize) -> Result<String, ConvertError> {
        let bytes = expr.as_bytes();
        let mut output = String::with_capacity(expr.len() + 16);
        let mut last_significant: Option<u8> = None;
        // Set after `is` (and kept across `not`) so test names stay verbatim.
        let mut in_test = false;
        let mut index = 0;

        while index < bytes.len() {
            let byte = bytes[index];

            if byte == b'"' || byte == b'\'' {
                let end = string_end(bytes, index).ok_or_else(|| {
                    self.error(line, ConvertErrorKind::UnterminatedString)
                })?;
                output.push_str(&expr[index..end]);
                last_significant = Some(byte);
                in_test = false;
                index = end;
                continue;
            }

            if byte.is_ascii_digit() {
                let start = index;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_')
                {
                    index += 1;
                }
                output.push_str(&expr[start..index]);
                last_significant = Some(bytes[index - 1]);
                in_test = false;
                continue;
            }

            if is_ident_start(byte) {
                let start = index;
                while index < bytes.len() && is_ident_continue(bytes[index]) {
                    index += 1;
                }
                let word = &expr[start..index];
                let next = next_significant(bytes, index);
                let next_next = next.and_then(|pos| bytes.get(pos + 1).copied());
                let next = next.map(|pos| bytes[pos]);

                let replacement = self.rewrite_identifier(
                    word,
                    last_significant,
                    in_test,
                    next,
                    next_next,
                    line,
                )?;
                output.push_str(&replacement);
                last_significant = Some(bytes[index - 1]);
                in_test = word == "is" || (in_test && word == "not");
                continue;
            }

            // Multi-byte UTF-8 sequences are copied whole.
            let ch_len = utf8_len(byte);
            output.push_str(&expr[index..index + ch_len]);
            if !byte.is_ascii_whitespace() {
                last_significant = Some(byte);
                in_test = false;
            }
            index += ch_len;
        }

        Ok(output)
    }

    fn rewrite_identifier(
        &self,
        word: &str,
        previous: Option<u8>,
        in_test: bool,
        next: Option<u8>,
        next_next: Option<u8>,
        line: usize,
    ) -> Result<String, ConvertError> {
        // Attribute access, filters and tests are never rewritten.
        if matches!(previous, Some(b'.') | Some(b'|')) {
            return Ok(word.to_string());
        }
        if in_test {
            return Ok(word.to_string());
        }

        if next == Some(b'(') {
            if word == RANGE_ALIAS {
                return Ok(format!("{FUNCTION_ROOT}.{ITERATE}"));
            }
            if BOUND_FUNCTIONS.contains(&word) {
                return Ok(format!("{FUNCTION_ROOT}.{word}"));
            }
            if NATIVE_FUNCTIONS.contains(&word) || self.is_local(word) {
                return Ok(word.to_string());
            }
            return Err(self.error(
                line,
                ConvertErrorKind::UnknownFunction {
                    name: word.to_string(),
                },
            ));
        }

        // Keyword argument: `name=value` but not `name == value`.
        if next == Some(b'=') && next_next != Some(b'=') {
            return Ok(word.to_string());
        }

        if self.is_local(word) {
            return Ok(word.to_string());
        }

        if PAGE_FIELDS.contains(&word) {
            return Ok(format!("{PAGE_ROOT}.{word}"));
        }

        Ok(word.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagOpen {
    Output,
    Block,
    Comment,
}

impl TagOpen {
    fn delimiter(self) -> &'static str {
        match self {
            TagOpen::Output => "{{",
            TagOpen::Block => "{%",
            TagOpen::Comment => "{#",
        }
    }
}

fn next_tag(source: &str, from: usize) -> Option<(usize, TagOpen)> {
    let bytes = source.as_bytes();
    let mut index = from;
    while let Some(offset) = source[index..].find('{') {
        let position = index + offset;
        match bytes.get(position + 1) {
            Some(b'{') => return Some((position, TagOpen::Output)),
            Some(b'%') => return Some((position, TagOpen::Block)),
            Some(b'#') => return Some((position, TagOpen::Comment)),
            _ => index = position + 1,
        }
    }
    None
}

fn is_raw_open(body: &str) -> bool {
    split_markers(body).1.trim() == "raw"
}

/// Byte offset just past the `{% endraw %}` tag following `from`.
fn find_endraw(source: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while let Some((start, open)) = next_tag(source, cursor) {
        let body_start = start + 2;
        let close = body_start + source[body_start..].find("%}")?;
        if open == TagOpen::Block && split_markers(&source[body_start..close]).1.trim() == "endraw"
        {
            return Some(close + 2);
        }
        cursor = body_start;
    }
    None
}

/// Find `delimiter` outside string literals. Unterminated strings simply run
/// to the end and report no close.
fn find_close(body: &str, delimiter: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'"' || byte == b'\'' {
            index = string_end(bytes, index)?;
            continue;
        }
        if body[index..].starts_with(delimiter) {
            return Some(index);
        }
        index += 1;
    }
    None
}

/// Split whitespace-control markers (`-` / `+`) off a tag body.
fn split_markers(body: &str) -> (&str, &str, &str) {
    let lead_len = usize::from(body.starts_with('-') || body.starts_with('+'));
    let rest = &body[lead_len..];
    let trail_len = usize::from(rest.ends_with('-') || rest.ends_with('+'));
    let inner = &rest[..rest.len() - trail_len];
    (
        &body[..lead_len],
        inner,
        &rest[rest.len() - trail_len..],
    )
}

/// Byte offset just past the closing quote of the literal starting at `start`.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut index = start + 1;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            byte if byte == quote => return Some(index + 1),
            _ => index += 1,
        }
    }
    None
}

/// Position of a standalone keyword outside string literals.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'"' || byte == b'\'' {
            index = string_end(bytes, index)?;
            continue;
        }
        if text[index..].starts_with(keyword) {
            let before_ok = index == 0 || !is_ident_continue(bytes[index - 1]);
            let after = index + keyword.len();
            let after_ok = after >= bytes.len() || !is_ident_continue(bytes[after]);
            if before_ok && after_ok {
                return Some(index);
            }
        }
        index += 1;
    }
    None
}

/// Position of a single `=` assignment (not `==`, `!=`, `<=`, `>=`).
fn find_assignment(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'"' || byte == b'\'' {
            index = string_end(bytes, index)?;
            continue;
        }
        if byte == b'=' {
            let prev = index.checked_sub(1).map(|i| bytes[i]);
            let next = bytes.get(index + 1).copied();
            if !matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) && next != Some(b'=') {
                return Some(index);
            }
        }
        index += 1;
    }
    None
}

fn target_names(targets: &str) -> Vec<String> {
    targets
        .split(|c: char| c == ',' || c == '(' || c == ')')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn next_significant(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len()).find(|&i| !bytes[i].is_ascii_whitespace())
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_ident_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}
