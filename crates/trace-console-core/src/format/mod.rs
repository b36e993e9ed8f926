//! Best-effort code formatting for captured payloads.
//!
//! [`format_code_light`] never fails: unknown languages and inputs the
//! formatters cannot make sense of come back unchanged.

mod css;
mod html;
mod js;
mod printer;

use thiserror::Error;

/// Formatter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Indent characters per level.
    pub indent_size: usize,
    pub indent_char: char,
    /// Keep line breaks found in the source.
    pub preserve_newlines: bool,
    /// Most consecutive line breaks kept from the source.
    pub max_preserve_newlines: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            indent_size: 2,
            indent_char: ' ',
            preserve_newlines: true,
            max_preserve_newlines: 2,
        }
    }
}

/// Languages with a formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    JavaScript,
    Html,
    Css,
}

impl Lang {
    /// Resolve a language tag. Unknown tags yield `None`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "javascript" | "js" => Some(Self::JavaScript),
            "html" => Some(Self::Html),
            "css" => Some(Self::Css),
            _ => None,
        }
    }
}

/// Formatter failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unterminated {what} starting on line {line}")]
    Unterminated { what: &'static str, line: usize },
    #[error("Unexpected '{close}' on line {line}")]
    UnexpectedCloser { close: char, line: usize },
    #[error("'{open}' opened on line {open_line} closed by a different bracket on line {line}")]
    Mismatched {
        open: char,
        open_line: usize,
        line: usize,
    },
    #[error("'{open}' opened on line {line} is never closed")]
    Unclosed { open: char, line: usize },
}

/// Format `code` as `lang`.
///
/// # Errors
/// Returns error if the input cannot be tokenized or its delimiters do not
/// balance.
pub fn format_with(code: &str, lang: Lang, opts: &FormatOptions) -> Result<String, FormatError> {
    match lang {
        Lang::JavaScript => js::format(code, opts),
        Lang::Html => html::format(code, opts),
        Lang::Css => css::format(code, opts),
    }
}

/// Pretty-print `code` for display.
///
/// `lang` is one of `javascript`/`js`, `html` or `css`; anything else returns
/// the input unchanged, as does any formatter failure.
#[must_use]
pub fn format_code_light(code: &str, lang: &str) -> String {
    if code.is_empty() {
        return String::new();
    }
    let Some(lang) = Lang::from_tag(lang) else {
        return code.to_string();
    };
    match format_with(code, lang, &FormatOptions::default()) {
        Ok(formatted) => formatted,
        Err(e) => {
            tracing::error!("Formatting failed: {e}");
            code.to_string()
        }
    }
}

/// Trim and collapse whitespace runs to one space, leaving quoted text alone.
pub(crate) fn collapse_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut quote = None;
    let mut pending_space = false;
    for c in raw.trim().chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                if matches!(c, '"' | '\'') {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}
