//! Light HTML beautifier.

use super::{FormatError, FormatOptions, collapse_whitespace, css, js, printer::Printer};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose content is not parsed as markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "pre", "textarea"];

#[derive(Debug)]
enum Node<'s> {
    Open {
        name: String,
        raw: &'s str,
        self_closing: bool,
    },
    Close {
        name: String,
        raw: &'s str,
    },
    RawElement {
        name: String,
        open: &'s str,
        content: &'s str,
        close: &'s str,
    },
    Markup(&'s str),
    Text(&'s str),
}

fn line_at(src: &str, pos: usize) -> usize {
    src[..pos].matches('\n').count() + 1
}

fn tag_name(raw: &str) -> String {
    raw.trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '_'))
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Byte offset of the `>` that ends the tag starting at `rest[0]`,
/// skipping quoted attribute values.
fn tag_end(rest: &str) -> Option<usize> {
    let mut quote = None;
    for (idx, c) in rest.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(idx),
            (None, _) => {}
        }
    }
    None
}

fn starts_tag(rest: &str) -> bool {
    let mut chars = rest.chars();
    chars.next() == Some('<')
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

fn tokenize(src: &str) -> Result<Vec<Node<'_>>, FormatError> {
    let mut nodes = Vec::new();
    let mut pos = 0;

    while pos < src.len() {
        let rest = &src[pos..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").ok_or(FormatError::Unterminated {
                what: "comment",
                line: line_at(src, pos),
            })?;
            nodes.push(Node::Markup(&rest[..end + 3]));
            pos += end + 3;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').ok_or(FormatError::Unterminated {
                what: "declaration",
                line: line_at(src, pos),
            })?;
            nodes.push(Node::Markup(&rest[..=end]));
            pos += end + 1;
            continue;
        }

        if starts_tag(rest) {
            let end = tag_end(rest).ok_or(FormatError::Unterminated {
                what: "tag",
                line: line_at(src, pos),
            })?;
            let raw = &rest[..=end];
            let name = tag_name(raw);
            pos += end + 1;

            if raw.starts_with("</") {
                nodes.push(Node::Close { name, raw });
                continue;
            }

            let self_closing = raw.ends_with("/>");
            if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                let body = &src[pos..];
                let content_len = body
                    .to_ascii_lowercase()
                    .find(&format!("</{name}"))
                    .ok_or(FormatError::Unterminated {
                        what: "raw text element",
                        line: line_at(src, pos),
                    })?;
                let close_rest = &body[content_len..];
                let close_end = tag_end(close_rest).ok_or(FormatError::Unterminated {
                    what: "tag",
                    line: line_at(src, pos + content_len),
                })?;
                nodes.push(Node::RawElement {
                    name,
                    open: raw,
                    content: &body[..content_len],
                    close: &close_rest[..=close_end],
                });
                pos += content_len + close_end + 1;
                continue;
            }

            nodes.push(Node::Open {
                name,
                raw,
                self_closing,
            });
            continue;
        }

        // Text runs until the next tag-like `<`.
        let mut end = rest.len();
        for (idx, _) in rest.match_indices('<').filter(|(idx, _)| *idx > 0) {
            if starts_tag(&rest[idx..]) {
                end = idx;
                break;
            }
        }
        nodes.push(Node::Text(&rest[..end]));
        pos += end;
    }

    Ok(nodes)
}

fn leading_breaks(text: &str) -> usize {
    text.chars()
        .take_while(|c| c.is_whitespace())
        .filter(|c| *c == '\n')
        .count()
}

pub(super) fn format(code: &str, opts: &FormatOptions) -> Result<String, FormatError> {
    let nodes = tokenize(code)?;
    let mut printer = Printer::new(opts);
    let mut open: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < nodes.len() {
        match &nodes[i] {
            Node::Text(text) => {
                let collapsed = collapse_whitespace(text);
                if collapsed.is_empty() {
                    printer.preserve_breaks(text.matches('\n').count());
                } else {
                    printer.preserve_breaks(leading_breaks(text));
                    printer.newline();
                    printer.write(&collapsed);
                }
            }
            Node::Markup(raw) => {
                printer.newline();
                printer.write_lines(raw);
            }
            Node::Open {
                name,
                raw,
                self_closing,
            } => {
                printer.newline();
                printer.write(&collapse_whitespace(raw));

                if *self_closing || VOID_ELEMENTS.contains(&name.as_str()) {
                    i += 1;
                    continue;
                }

                // Empty or text-only elements stay on one line.
                match (nodes.get(i + 1), nodes.get(i + 2)) {
                    (Some(Node::Close { name: close, raw }), _) if close == name => {
                        printer.write(&collapse_whitespace(raw));
                        i += 2;
                        continue;
                    }
                    (Some(Node::Text(text)), Some(Node::Close { name: close, raw }))
                        if close == name =>
                    {
                        printer.write(&collapse_whitespace(text));
                        printer.write(&collapse_whitespace(raw));
                        i += 3;
                        continue;
                    }
                    _ => {}
                }

                printer.indent();
                open.push(name);
            }
            Node::Close { name, raw } => {
                if let Some(depth) = open.iter().rposition(|n| *n == name.as_str()) {
                    for _ in depth..open.len() {
                        printer.dedent();
                    }
                    open.truncate(depth);
                }
                printer.newline();
                printer.write(&collapse_whitespace(raw));
            }
            Node::RawElement {
                name,
                open: open_tag,
                content,
                close,
            } => {
                printer.newline();
                printer.write(&collapse_whitespace(open_tag));
                match name.as_str() {
                    "script" | "style" => {
                        if content.trim().is_empty() {
                            printer.write(close);
                        } else {
                            let body = if name == "script" {
                                js::format(content, opts)
                            } else {
                                css::format(content, opts)
                            };
                            let body = body.unwrap_or_else(|e| {
                                tracing::debug!("Embedded {name} left unformatted: {e}");
                                content.trim().to_string()
                            });
                            printer.indent();
                            printer.write_lines(&body);
                            printer.dedent();
                            printer.newline();
                            printer.write(close);
                        }
                    }
                    _ => {
                        printer.write_verbatim(content);
                        printer.write_verbatim(close);
                    }
                }
            }
        }
        i += 1;
    }

    Ok(printer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(code: &str) -> String {
        format(code, &FormatOptions::default()).unwrap()
    }

    #[test]
    fn test_nesting_and_inline_text() {
        assert_eq!(
            fmt("<div><p>Hi</p><br><span>a</span></div>"),
            "<div>\n  <p>Hi</p>\n  <br>\n  <span>a</span>\n</div>"
        );
    }

    #[test]
    fn test_empty_element_and_attributes() {
        assert_eq!(
            fmt("<ul  class=\"a > b\"><li></li></ul>"),
            "<ul class=\"a > b\">\n  <li></li>\n</ul>"
        );
    }

    #[test]
    fn test_script_body_is_formatted() {
        assert_eq!(
            fmt("<script>var a=1;var b=2;</script>"),
            "<script>\n  var a=1;\n  var b=2;\n</script>"
        );
    }

    #[test]
    fn test_pre_is_verbatim() {
        assert_eq!(fmt("<div><pre>  x\n y</pre></div>"), "<div>\n  <pre>  x\n y</pre>\n</div>");
    }

    #[test]
    fn test_pre_keeps_trailing_whitespace() {
        assert_eq!(
            fmt("<div><pre>a  \n b  \n</pre></div>"),
            "<div>\n  <pre>a  \n b  \n</pre>\n</div>"
        );
        assert_eq!(fmt("<textarea>x \ny </textarea>"), "<textarea>x \ny </textarea>");
    }

    #[test]
    fn test_blank_lines_capped() {
        assert_eq!(fmt("<p>a</p>\n\n\n\n<p>b</p>"), "<p>a</p>\n\n<p>b</p>");
    }

    #[test]
    fn test_doctype_and_comment() {
        assert_eq!(
            fmt("<!DOCTYPE html><!-- c --><html></html>"),
            "<!DOCTYPE html>\n<!-- c -->\n<html></html>"
        );
    }

    #[test]
    fn test_stray_less_than_is_text() {
        assert_eq!(fmt("<p>a < b</p>"), "<p>a < b</p>");
    }

    #[test]
    fn test_errors() {
        let opts = FormatOptions::default();
        assert!(matches!(format("<div", &opts), Err(FormatError::Unterminated { .. })));
        assert!(matches!(format("<!-- x", &opts), Err(FormatError::Unterminated { .. })));
        assert!(matches!(format("<script>x", &opts), Err(FormatError::Unterminated { .. })));
    }
}
