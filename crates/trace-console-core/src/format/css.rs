//! Light CSS beautifier.

use super::{FormatError, FormatOptions, collapse_whitespace, printer::Printer};

/// `prop:value` becomes `prop: value`; at-rules and bare text are only
/// whitespace-collapsed.
fn declaration(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    if collapsed.starts_with('@') {
        return collapsed;
    }
    match collapsed.split_once(':') {
        Some((name, value)) => format!("{}: {}", name.trim_end(), value.trim_start()),
        None => collapsed,
    }
}

pub(super) fn format(code: &str, opts: &FormatOptions) -> Result<String, FormatError> {
    let chars: Vec<char> = code.chars().collect();
    let mut printer = Printer::new(opts);
    let mut blocks: Vec<usize> = Vec::new();
    let mut parens: Vec<usize> = Vec::new();
    let mut acc = String::new();
    let mut breaks = 0;
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = i;
                let start_line = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                        None => {
                            return Err(FormatError::Unterminated {
                                what: "comment",
                                line: start_line,
                            });
                        }
                    }
                    i += 1;
                }
                let comment: String = chars[start..=i].iter().collect();
                if acc.trim().is_empty() {
                    printer.preserve_breaks(breaks);
                    printer.newline();
                    printer.write_lines(&comment);
                    printer.newline();
                    acc.clear();
                    breaks = 0;
                } else {
                    acc.push_str(&comment);
                }
            }
            '"' | '\'' => {
                let start_line = line;
                acc.push(c);
                loop {
                    i += 1;
                    match chars.get(i) {
                        Some('\\') => {
                            acc.push('\\');
                            i += 1;
                            if let Some(&escaped) = chars.get(i) {
                                acc.push(escaped);
                            }
                        }
                        Some(&q) if q == c => {
                            acc.push(q);
                            break;
                        }
                        Some('\n') | None => {
                            return Err(FormatError::Unterminated {
                                what: "string",
                                line: start_line,
                            });
                        }
                        Some(&other) => acc.push(other),
                    }
                }
            }
            '(' => {
                parens.push(line);
                acc.push(c);
            }
            ')' => {
                if parens.pop().is_none() {
                    return Err(FormatError::UnexpectedCloser { close: ')', line });
                }
                acc.push(c);
            }
            '{' if parens.is_empty() => {
                let selector = collapse_whitespace(&acc);
                printer.preserve_breaks(breaks);
                printer.newline();
                if !selector.is_empty() {
                    printer.write(&selector);
                    printer.space();
                }
                printer.write("{");
                printer.indent();
                printer.newline();
                blocks.push(line);
                acc.clear();
                breaks = 0;
            }
            ';' if parens.is_empty() => {
                printer.preserve_breaks(breaks);
                printer.newline();
                printer.write(&declaration(&acc));
                printer.write(";");
                printer.newline();
                acc.clear();
                breaks = 0;
            }
            '}' if parens.is_empty() => {
                if blocks.pop().is_none() {
                    return Err(FormatError::UnexpectedCloser { close: '}', line });
                }
                if !acc.trim().is_empty() {
                    printer.preserve_breaks(breaks);
                    printer.newline();
                    printer.write(&declaration(&acc));
                }
                printer.dedent();
                printer.newline();
                printer.write("}");
                printer.newline();
                if blocks.is_empty() {
                    printer.blank_line();
                }
                acc.clear();
                breaks = 0;
            }
            '\n' => {
                line += 1;
                if acc.trim().is_empty() {
                    breaks += 1;
                }
                acc.push(c);
            }
            _ => acc.push(c),
        }
        i += 1;
    }

    if let Some(open_line) = parens.pop() {
        return Err(FormatError::Unclosed { open: '(', line: open_line });
    }
    if let Some(open_line) = blocks.pop() {
        return Err(FormatError::Unclosed { open: '{', line: open_line });
    }
    if !acc.trim().is_empty() {
        printer.preserve_breaks(breaks);
        printer.newline();
        printer.write(&declaration(&acc));
    }
    Ok(printer.finish())
}
