//! Filter expressions: plain substring queries and `/regex/flags` literals.
//!
//! A filter that looks like a delimited regex literal is compiled and tested
//! against the target. When compilation fails the call falls back to a
//! case-insensitive substring test, so a half-typed pattern never hides
//! every record.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::{CallKind, CallStatus, TraceRecord};

/// Flags accepted after the closing delimiter.
const FLAG_CHARS: &str = "gimyus";

/// Invalid filter syntax.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Empty regex pattern")]
    EmptyPattern,
    #[error("Duplicate regex flag '{0}'")]
    DuplicateFlag(char),
    #[error("Invalid regex /{pattern}/: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled regex literal.
#[derive(Debug, Clone)]
pub struct RegexLiteral {
    regex: Regex,
    sticky: bool,
}

impl RegexLiteral {
    /// Test the target. A sticky (`y`) literal only matches at offset 0.
    #[must_use]
    pub fn is_match(&self, target: &str) -> bool {
        if self.sticky {
            self.regex.find(target).is_some_and(|m| m.start() == 0)
        } else {
            self.regex.is_match(target)
        }
    }
}

/// Split `/body/flags` into body and flags.
///
/// The body is the shortest prefix after the opening `/` whose following
/// `/` is trailed only by flag characters.
fn split_literal(filter: &str) -> Option<(&str, &str)> {
    let rest = filter.strip_prefix('/')?;
    rest.match_indices('/').find_map(|(idx, _)| {
        let flags = &rest[idx + 1..];
        flags
            .chars()
            .all(|c| FLAG_CHARS.contains(c))
            .then(|| (&rest[..idx], flags))
    })
}

fn compile_literal(pattern: &str, flags: &str) -> Result<RegexLiteral, FilterError> {
    if pattern.is_empty() {
        return Err(FilterError::EmptyPattern);
    }

    let mut builder = RegexBuilder::new(pattern);
    let mut seen = String::with_capacity(flags.len());
    let mut sticky = false;
    for flag in flags.chars() {
        if seen.contains(flag) {
            return Err(FilterError::DuplicateFlag(flag));
        }
        seen.push(flag);
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'y' => sticky = true,
            // 'g' has no effect on a single test and unicode is always on.
            _ => {}
        }
    }

    let regex = builder.build().map_err(|source| FilterError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(RegexLiteral { regex, sticky })
}

/// A parsed filter expression.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    /// Empty filter: everything matches.
    Any,
    /// Case-insensitive substring. Holds the lowercased needle.
    Substring(String),
    /// Delimited regex literal.
    Regex(RegexLiteral),
}

impl FilterExpr {
    /// Parse a filter, falling back to substring semantics when a regex
    /// literal does not compile.
    #[must_use]
    pub fn parse(filter: &str) -> Self {
        if filter.is_empty() {
            return Self::Any;
        }
        if let Some((pattern, flags)) = split_literal(filter) {
            match compile_literal(pattern, flags) {
                Ok(literal) => return Self::Regex(literal),
                Err(e) => {
                    tracing::warn!("Invalid regex filter, falling back to substring match: {e}");
                }
            }
        }
        Self::Substring(filter.to_lowercase())
    }

    /// Test a possibly absent target.
    #[must_use]
    pub fn matches(&self, target: Option<&str>) -> bool {
        match (self, target) {
            (Self::Any, _) => true,
            (_, None | Some("")) => false,
            (Self::Substring(needle), Some(target)) => target.to_lowercase().contains(needle.as_str()),
            (Self::Regex(literal), Some(target)) => literal.is_match(target),
        }
    }
}

/// Does `target` satisfy `filter`?
///
/// An empty or absent filter always matches; an absent or empty target never
/// matches a non-empty filter.
#[must_use]
pub fn matches(target: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        None | Some("") => true,
        Some(filter) => FilterExpr::parse(filter).matches(target),
    }
}

/// Field-wise record filter. All populated criteria must hold.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    call_path: FilterExpr,
    params: FilterExpr,
    /// Restrict to one kind.
    pub kind: Option<CallKind>,
    /// Restrict to one status.
    pub status: Option<CallStatus>,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            call_path: FilterExpr::Any,
            params: FilterExpr::Any,
            kind: None,
            status: None,
        }
    }
}

impl RecordFilter {
    /// Filter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the call path only.
    #[must_use]
    pub fn call_path(filter: &str) -> Self {
        Self::new().with_call_path(filter)
    }

    /// Set the call path expression.
    #[must_use]
    pub fn with_call_path(mut self, filter: &str) -> Self {
        self.call_path = FilterExpr::parse(filter);
        self
    }

    /// Set the payload expression, tested against request and response.
    #[must_use]
    pub fn with_params(mut self, filter: &str) -> Self {
        self.params = FilterExpr::parse(filter);
        self
    }

    /// Restrict to one kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: CallKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to one status.
    #[must_use]
    pub const fn with_status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether `record` satisfies every criterion.
    #[must_use]
    pub fn accepts(&self, record: &TraceRecord) -> bool {
        if self.kind.is_some_and(|kind| record.kind != Some(kind)) {
            return false;
        }
        if self.status.is_some_and(|status| record.status != Some(status)) {
            return false;
        }
        self.call_path.matches(record.call_path.as_deref())
            && (self.params.matches(record.request_params.as_deref())
                || self.params.matches(record.response_params.as_deref()))
    }
}
