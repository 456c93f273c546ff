//! Fail-fast compilation of converted templates.

use std::{collections::BTreeSet, error::Error as _};

use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};

use super::{
    convert::{BOUND_FUNCTIONS, FUNCTION_ROOT, TemplateConverter},
    error::{TemplateError, excerpt},
};
use crate::domain::entities::TemplateText;

/// A template that has been converted, parsed and checked against the
/// function table. Rendering it can still fail on data (empty pools, bad
/// arguments), never on syntax.
#[derive(Debug)]
pub struct CompiledTemplate {
    name: String,
    version: String,
    native_source: String,
    functions: BTreeSet<String>,
    env: Environment<'static>,
}

impl CompiledTemplate {
    /// Convert authoring-dialect text and compile the result.
    pub fn compile(text: &TemplateText) -> Result<Self, TemplateError> {
        let native = TemplateConverter::new()
            .convert(&text.body)
            .map_err(|source| TemplateError::Convert {
                name: text.name.clone(),
                version: text.version.clone(),
                source,
            })?;
        Self::from_native(&text.name, &text.version, native)
    }

    /// Compile text that is already in the native dialect.
    pub fn from_native(
        name: &str,
        version: &str,
        native_source: String,
    ) -> Result<Self, TemplateError> {
        let functions = referenced_functions(&native_source);
        if let Some((function, line)) = functions
            .iter()
            .find(|(function, _)| !BOUND_FUNCTIONS.contains(&function.as_str()))
        {
            return Err(TemplateError::UnboundFunction {
                name: name.to_string(),
                version: version.to_string(),
                function: function.clone(),
                line: *line,
            });
        }

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_template_owned(name.to_string(), native_source.clone())
            .map_err(|err| {
                let line = err.line().unwrap_or(1);
                TemplateError::Compile {
                    name: name.to_string(),
                    version: version.to_string(),
                    line,
                    message: err.to_string(),
                    excerpt: excerpt(&native_source, line),
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            native_source,
            functions: functions.into_iter().map(|(function, _)| function).collect(),
            env,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn native_source(&self) -> &str {
        &self.native_source
    }

    /// Content functions the template calls.
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }

    /// Execute the template against `context`.
    pub fn render(&self, context: Value) -> Result<String, TemplateError> {
        let render_error = |err: minijinja::Error| TemplateError::Render {
            name: self.name.clone(),
            version: self.version.clone(),
            line: err.line(),
            message: render_message(&err),
        };

        let template = self.env.get_template(&self.name).map_err(render_error)?;
        template.render(context).map_err(render_error)
    }
}

fn render_message(err: &minijinja::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Collect `fx.<name>(` call sites inside tags, with the line of their first
/// occurrence.
fn referenced_functions(native: &str) -> Vec<(String, usize)> {
    let needle = format!("{FUNCTION_ROOT}.");
    let bytes = native.as_bytes();
    let mut found: Vec<(String, usize)> = Vec::new();
    let mut cursor = 0;

    while let Some(open) = next_tag_open(native, cursor) {
        let body_start = open + 2;
        let closing = if bytes[open + 1] == b'{' { "}}" } else { "%}" };
        let Some(len) = native[body_start..].find(closing) else {
            break;
        };
        let body = &native[body_start..body_start + len];

        let mut search = 0;
        while let Some(offset) = body[search..].find(&needle) {
            let at = search + offset;
            search = at + needle.len();
            if at > 0 {
                let prev = body.as_bytes()[at - 1];
                if prev.is_ascii_alphanumeric() || prev == b'_' || prev == b'.' {
                    continue;
                }
            }
            let ident_len = body[search..]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count();
            let ident = &body[search..search + ident_len];
            let after = body[search + ident_len..].trim_start();
            if ident.is_empty() || !after.starts_with('(') {
                continue;
            }
            if found.iter().any(|(name, _)| name == ident) {
                continue;
            }
            let line = native[..body_start + at].matches('\n').count() + 1;
            found.push((ident.to_string(), line));
        }

        cursor = body_start + len + 2;
    }

    found
}

fn next_tag_open(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut index = from;
    while let Some(offset) = source[index..].find('{') {
        let position = index + offset;
        if matches!(bytes.get(position + 1), Some(b'{') | Some(b'%')) {
            return Some(position);
        }
        index = position + 1;
    }
    None
}
