//! Cut-point selection for chunk boundaries
//!
//! Positions are character indices into the source. A cut at `p` ends the
//! current chunk with `chars[p - 1]`.

use super::ContentKind;

/// Boundary finder over one piece of content
pub(crate) struct BoundaryFinder<'a> {
    chars: &'a [char],
    kind: ContentKind,
    /// Brace depth before each position, only computed for code
    depth: Vec<i64>,
}

impl<'a> BoundaryFinder<'a> {
    pub(crate) fn new(chars: &'a [char], kind: ContentKind) -> Self {
        let depth = if kind == ContentKind::Code {
            let mut depth = Vec::with_capacity(chars.len() + 1);
            let mut current = 0i64;
            depth.push(current);
            for c in chars {
                match c {
                    '{' | '[' | '(' => current += 1,
                    '}' | ']' | ')' => current -= 1,
                    _ => {}
                }
                depth.push(current);
            }
            depth
        } else {
            Vec::new()
        };

        Self { chars, kind, depth }
    }

    /// End of the chunk starting at `start`.
    ///
    /// The result is always greater than `start + overlap`, so the next
    /// chunk starts strictly after this one.
    pub(crate) fn find_cut(
        &self,
        start: usize,
        chunk_size: usize,
        overlap: usize,
        respect_boundaries: bool,
    ) -> usize {
        let len = self.chars.len();
        let hard_end = (start + chunk_size).min(len);
        if hard_end == len || !respect_boundaries {
            return hard_end;
        }

        let min_end = (start + (overlap + 1).max(chunk_size / 2)).min(hard_end);

        let cut = match self.kind {
            ContentKind::Text => self.text_cut(min_end, hard_end),
            ContentKind::Table => self.last_match(min_end, hard_end, |p| self.is_line_end(p)),
            ContentKind::Code => self
                .last_match(min_end, hard_end, |p| {
                    self.is_line_end(p) && self.depth[p] <= 0
                })
                .or_else(|| self.last_match(min_end, hard_end, |p| self.is_line_end(p))),
        };

        cut.unwrap_or(hard_end)
    }

    fn text_cut(&self, min_end: usize, hard_end: usize) -> Option<usize> {
        self.last_match(min_end, hard_end, |p| self.is_paragraph_end(p))
            .or_else(|| {
                self.last_match(min_end, hard_end, |p| {
                    self.is_sentence_end(p) && !self.inside_table_row(p)
                })
            })
            .or_else(|| self.last_match(min_end, hard_end, |p| self.is_line_end(p)))
            .or_else(|| {
                self.last_match(min_end, hard_end, |p| {
                    self.is_word_end(p) && !self.inside_table_row(p)
                })
            })
    }

    /// Largest position in `[min_end, hard_end]` accepted by `accept`
    fn last_match(
        &self,
        min_end: usize,
        hard_end: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Option<usize> {
        (min_end..=hard_end).rev().find(|&p| p > 0 && accept(p))
    }

    fn is_line_end(&self, p: usize) -> bool {
        self.chars[p - 1] == '\n'
    }

    fn is_paragraph_end(&self, p: usize) -> bool {
        p >= 2 && self.chars[p - 1] == '\n' && self.chars[p - 2] == '\n'
    }

    /// Cut after the whitespace that follows a terminator
    fn is_sentence_end(&self, p: usize) -> bool {
        p >= 2 && self.chars[p - 1].is_whitespace() && matches!(self.chars[p - 2], '.' | '!' | '?')
    }

    fn is_word_end(&self, p: usize) -> bool {
        self.chars[p - 1].is_whitespace()
    }

    /// Whether a cut at `p` falls inside a `|`-delimited row
    fn inside_table_row(&self, p: usize) -> bool {
        if self.is_line_end(p) {
            return false;
        }
        let line_start = self.chars[..p]
            .iter()
            .rposition(|c| *c == '\n')
            .map_or(0, |i| i + 1);
        self.chars[line_start..]
            .iter()
            .find(|c| !matches!(c, ' ' | '\t'))
            .is_some_and(|c| *c == '|')
    }
}
