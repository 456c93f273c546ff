//! Deterministic, human-friendly slugs.
//!
//! ASCII slugification (`slug` crate) is combined with Chinese
//! transliteration so keywords like “基线对齐” become `ji-xian-dui-qi`.
//! Used to build plausible internal links from keyword pools.

use slug::slugify;
use thiserror::Error;

use super::pinyin::transliterate_to_ascii;

/// Errors that can occur while generating a slug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Derive a slug from the provided human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let transliterated = transliterate_to_ascii(input);
    let candidate = slugify(&transliterated);

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}
