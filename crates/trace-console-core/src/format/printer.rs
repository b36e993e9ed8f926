//! Indentation-aware output buffer shared by the formatters.

use super::FormatOptions;

pub(super) struct Printer<'a> {
    opts: &'a FormatOptions,
    out: String,
    indent: usize,
    line_has_content: bool,
    pending_breaks: usize,
}

impl<'a> Printer<'a> {
    pub(super) const fn new(opts: &'a FormatOptions) -> Self {
        Self {
            opts,
            out: String::new(),
            indent: 0,
            line_has_content: false,
            pending_breaks: 0,
        }
    }

    pub(super) const fn indent(&mut self) {
        self.indent += 1;
    }

    pub(super) const fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// End the current line before the next write.
    pub(super) fn newline(&mut self) {
        if self.line_has_content {
            self.pending_breaks = self.pending_breaks.max(1);
        }
    }

    /// Request a blank line before the next write.
    pub(super) fn blank_line(&mut self) {
        if !self.out.is_empty() {
            self.pending_breaks = self.pending_breaks.max(2);
        }
    }

    /// Keep up to `max_preserve_newlines` of the `count` line breaks found in
    /// the source.
    pub(super) fn preserve_breaks(&mut self, count: usize) {
        if count == 0 || !self.opts.preserve_newlines || self.out.is_empty() {
            return;
        }
        let kept = count.min(self.opts.max_preserve_newlines.max(1));
        self.pending_breaks = self.pending_breaks.max(kept);
    }

    /// Drop pending line breaks so the next write joins the current line.
    pub(super) const fn join(&mut self) {
        self.pending_breaks = 0;
    }

    /// Single space, unless at the start of a line or after one.
    pub(super) fn space(&mut self) {
        if self.line_has_content && self.pending_breaks == 0 && !self.out.ends_with(' ') {
            self.out.push(' ');
        }
    }

    fn flush_breaks(&mut self) {
        if self.pending_breaks == 0 {
            return;
        }
        if !self.out.is_empty() {
            let trimmed = self.out.trim_end_matches([' ', '\t']).len();
            self.out.truncate(trimmed);
            for _ in 0..self.pending_breaks {
                self.out.push('\n');
            }
            self.line_has_content = false;
        }
        self.pending_breaks = 0;
    }

    /// Write a fragment that contains no line breaks.
    pub(super) fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.flush_breaks();
        if !self.line_has_content {
            for _ in 0..self.indent * self.opts.indent_size {
                self.out.push(self.opts.indent_char);
            }
            self.line_has_content = true;
        }
        self.out.push_str(text);
    }

    /// Write multi-line text, re-indenting every line at the current level.
    pub(super) fn write_lines(&mut self, text: &str) {
        let mut breaks = 0;
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                breaks += 1;
                continue;
            }
            self.preserve_breaks(breaks + 1);
            self.newline();
            self.write(line);
            breaks = 0;
        }
    }

    /// Write text exactly as given, with no re-indentation.
    pub(super) fn write_verbatim(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.flush_breaks();
        self.out.push_str(text);
        self.line_has_content = !text.ends_with('\n');
    }

    /// Emitted lines are already trimmed when broken, so only the tail is
    /// trimmed here. Verbatim text keeps its trailing whitespace.
    pub(super) fn finish(mut self) -> String {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
        self.out
    }
}
