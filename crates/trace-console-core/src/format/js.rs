//! Light JavaScript beautifier.

use super::{FormatError, FormatOptions, printer::Printer};

const OPERATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Keywords that get a space before their parenthesized head.
const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "catch", "with"];

/// Keywords that stay on the line of a preceding `}`.
const CONTINUATION_KEYWORDS: &[&str] = &["else", "catch", "finally"];

/// Keywords after which a `/` starts a regex literal.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "in", "of", "delete", "void", "throw", "new", "do", "else",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Word,
    Literal,
    LineComment,
    BlockComment,
    Punct,
}

#[derive(Debug, Clone)]
struct Token<'s> {
    kind: Kind,
    text: &'s str,
    line_breaks: usize,
    space_before: bool,
    line: usize,
}

struct Lexer<'s> {
    src: &'s str,
    pos: usize,
    line: usize,
}

impl<'s> Lexer<'s> {
    const fn new(src: &'s str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<Token<'s>>, FormatError> {
        let mut tokens: Vec<Token<'s>> = Vec::new();
        loop {
            let mut line_breaks = 0;
            let mut space_before = false;
            while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
                if c == '\n' {
                    line_breaks += 1;
                }
                space_before = true;
                self.bump();
            }

            let Some(c) = self.peek() else { break };
            let start = self.pos;
            let line = self.line;
            let kind = match c {
                '/' if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                    Kind::LineComment
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(FormatError::Unterminated { what: "comment", line }),
                        }
                    }
                    Kind::BlockComment
                }
                '/' if regex_allowed(tokens.last()) => {
                    self.regex_literal(line)?;
                    Kind::Literal
                }
                '\'' | '"' | '`' => {
                    self.string_literal(c, line)?;
                    Kind::Literal
                }
                c if c.is_alphanumeric() || c == '_' || c == '$' => {
                    while self
                        .peek()
                        .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
                        || (c.is_ascii_digit() && self.peek() == Some('.'))
                    {
                        self.bump();
                    }
                    Kind::Word
                }
                _ => {
                    let rest = &self.src[self.pos..];
                    let len = OPERATORS
                        .iter()
                        .find(|op| rest.starts_with(**op))
                        .map_or(c.len_utf8(), |op| op.len());
                    while self.pos < start + len {
                        self.bump();
                    }
                    Kind::Punct
                }
            };

            tokens.push(Token {
                kind,
                text: &self.src[start..self.pos],
                line_breaks,
                space_before,
                line,
            });
        }
        Ok(tokens)
    }

    fn string_literal(&mut self, quote: char, line: usize) -> Result<(), FormatError> {
        self.bump();
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(()),
                Some('\n') if quote != '`' => break,
                Some(_) => {}
                None => break,
            }
        }
        Err(FormatError::Unterminated { what: "string", line })
    }

    fn regex_literal(&mut self, line: usize) -> Result<(), FormatError> {
        self.bump();
        let mut in_class = false;
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some('\n') | None => return Err(FormatError::Unterminated { what: "regex", line }),
                Some(_) => {}
            }
        }
        while self.peek().is_some_and(char::is_alphabetic) {
            self.bump();
        }
        Ok(())
    }
}

fn regex_allowed(prev: Option<&Token<'_>>) -> bool {
    let Some(prev) = prev.filter(|t| !matches!(t.kind, Kind::LineComment | Kind::BlockComment)) else {
        return true;
    };
    match prev.kind {
        Kind::Punct => !matches!(prev.text, ")" | "]" | "}" | "++" | "--"),
        Kind::Word => REGEX_PREFIX_KEYWORDS.contains(&prev.text),
        _ => false,
    }
}

pub(super) fn format(code: &str, opts: &FormatOptions) -> Result<String, FormatError> {
    let tokens = Lexer::new(code).tokenize()?;
    let mut printer = Printer::new(opts);
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut glued = false;

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1);

        if glued {
            glued = false;
        } else {
            printer.preserve_breaks(token.line_breaks);
            if token.space_before {
                printer.space();
            }
        }

        match (token.kind.clone(), token.text) {
            (Kind::Punct, "{") => {
                if i > 0 && !matches!(tokens[i - 1].text, "(" | "[") {
                    printer.space();
                }
                if next.is_some_and(|n| n.text == "}") {
                    // Empty block stays inline.
                    printer.write("{");
                    brackets.push(('{', token.line));
                    continue;
                }
                printer.write("{");
                brackets.push(('{', token.line));
                printer.indent();
                printer.newline();
            }
            (Kind::Punct, "}") => {
                let empty = i > 0 && tokens[i - 1].text == "{";
                close(&mut brackets, '{', token.line)?;
                if empty {
                    printer.join();
                } else {
                    printer.dedent();
                    printer.newline();
                }
                printer.write("}");
                match next {
                    Some(n) if n.kind == Kind::Word && CONTINUATION_KEYWORDS.contains(&n.text) => {
                        printer.join();
                        printer.space();
                        glued = true;
                    }
                    Some(n) if matches!(n.text, ")" | "]" | "," | ";" | "." | "?." | ":") => {
                        printer.join();
                        glued = true;
                    }
                    _ => printer.newline(),
                }
            }
            (Kind::Punct, open @ ("(" | "[")) => {
                if i > 0
                    && tokens[i - 1].kind == Kind::Word
                    && CONTROL_KEYWORDS.contains(&tokens[i - 1].text)
                {
                    printer.space();
                }
                printer.write(open);
                brackets.push((if open == "(" { '(' } else { '[' }, token.line));
            }
            (Kind::Punct, ")") => {
                close(&mut brackets, '(', token.line)?;
                printer.write(")");
            }
            (Kind::Punct, "]") => {
                close(&mut brackets, '[', token.line)?;
                printer.write("]");
            }
            (Kind::Punct, ";") => {
                printer.write(";");
                if !matches!(brackets.last(), Some(('(', _))) {
                    printer.newline();
                }
            }
            (Kind::Punct, ",") => {
                printer.write(",");
                if matches!(brackets.last(), Some(('{', _))) {
                    printer.newline();
                }
            }
            (Kind::LineComment, text) => {
                printer.write(text);
                printer.newline();
            }
            (Kind::BlockComment, text) if text.contains('\n') => {
                printer.newline();
                printer.write_lines(text);
                printer.newline();
            }
            (_, text) => printer.write(text),
        }
    }

    if let Some((open, line)) = brackets.pop() {
        return Err(FormatError::Unclosed { open, line });
    }
    Ok(printer.finish())
}

fn close(brackets: &mut Vec<(char, usize)>, expected: char, line: usize) -> Result<(), FormatError> {
    match brackets.pop() {
        Some((open, _)) if open == expected => Ok(()),
        Some((open, open_line)) => Err(FormatError::Mismatched {
            open,
            open_line,
            line,
        }),
        None => Err(FormatError::UnexpectedCloser {
            close: closer_for(expected),
            line,
        }),
    }
}

const fn closer_for(open: char) -> char {
    match open {
        '{' => '}',
        '(' => ')',
        _ => ']',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(code: &str) -> String {
        format(code, &FormatOptions::default()).unwrap()
    }

    #[test]
    fn test_statements_split() {
        assert_eq!(fmt("var x=1;var y=2;"), "var x=1;\nvar y=2;");
    }

    #[test]
    fn test_blocks_and_else() {
        assert_eq!(
            fmt("if(x){a()}else{b()}"),
            "if (x) {\n  a()\n} else {\n  b()\n}"
        );
    }

    #[test]
    fn test_object_literal_and_call() {
        assert_eq!(
            fmt("foo({a:1,b:[1,2]});"),
            "foo({\n  a:1,\n  b:[1,2]\n});"
        );
    }

    #[test]
    fn test_for_loop_semicolons_stay_inline() {
        assert_eq!(
            fmt("for(var i=0;i<3;i++){go(i)}"),
            "for (var i=0;i<3;i++) {\n  go(i)\n}"
        );
    }

    #[test]
    fn test_strings_and_regex_untouched() {
        assert_eq!(fmt("a('{;}');b(/[{]/g);"), "a('{;}');\nb(/[{]/g);");
        assert_eq!(fmt("x = a / b / c;"), "x = a / b / c;");
    }

    #[test]
    fn test_empty_block_inline() {
        assert_eq!(fmt("function f(){}"), "function f() {}");
    }

    #[test]
    fn test_blank_lines_capped() {
        assert_eq!(fmt("a();\n\n\n\n\nb();"), "a();\n\nb();");
        assert_eq!(fmt("a();\nb();"), "a();\nb();");
    }

    #[test]
    fn test_line_comment() {
        assert_eq!(fmt("// hi\nx();"), "// hi\nx();");
    }

    #[test]
    fn test_errors() {
        let opts = FormatOptions::default();
        assert!(matches!(format("a())", &opts), Err(FormatError::UnexpectedCloser { .. })));
        assert!(matches!(format("f(a]", &opts), Err(FormatError::Mismatched { .. })));
        assert!(matches!(format("{", &opts), Err(FormatError::Unclosed { .. })));
        assert!(matches!(format("'abc", &opts), Err(FormatError::Unterminated { .. })));
        assert!(matches!(format("/* x", &opts), Err(FormatError::Unterminated { .. })));
    }
}
