//! Han-character helpers built on the `pinyin` crate.

use ::pinyin::ToPinyin;

/// Annotate every Han character with its toned pinyin, e.g. `中国` becomes
/// `中(zhōng)国(guó)`. Characters without a reading pass through unchanged.
pub fn annotate(text: &str) -> String {
    let mut output = String::with_capacity(text.len() * 3);

    for ch in text.chars() {
        output.push(ch);
        if ch.is_ascii() {
            continue;
        }
        if let Some(py) = ch.to_pinyin() {
            output.push('(');
            output.push_str(py.with_tone());
            output.push(')');
        }
    }

    output
}

/// Replace Han characters with space-separated plain pinyin so the result can
/// be slugified.
pub fn transliterate_to_ascii(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
            continue;
        }

        match ch.to_pinyin() {
            Some(py) => {
                if !output.is_empty() && !output.ends_with(' ') {
                    output.push(' ');
                }
                output.push_str(py.plain());
            }
            None if ch.is_whitespace() => output.push(' '),
            // Left for slugify to filter.
            None => output.push(ch),
        }
    }

    output
}
