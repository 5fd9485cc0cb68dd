//! Output stream with glue resolution
//!
//! Content is appended as pieces. Glue and function ends eat the newlines
//! and blank text before them; markers delimit strings being built for
//! choices and dynamic tags.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Piece {
    Text(String),
    Newline,
    Glue,
    StringMarker,
    TagMarker,
    FunctionStart,
    FunctionEnd,
}

impl Piece {
    fn is_blank(&self) -> bool {
        match self {
            Piece::Newline => true,
            Piece::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    fn is_marker(&self) -> bool {
        matches!(self, Piece::StringMarker | Piece::TagMarker)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStream {
    pieces: Vec<Piece>,
}

impl OutputStream {
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn append_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.pieces.push(Piece::Text(text.to_string()));
        }
    }

    pub fn append_newline(&mut self) {
        match self.pieces.last() {
            None | Some(Piece::Newline | Piece::FunctionStart) => {}
            Some(last) if last.is_marker() => {}
            Some(_) => self.pieces.push(Piece::Newline),
        }
    }

    pub fn append_glue(&mut self) {
        self.trim_trailing_blanks();
        self.pieces.push(Piece::Glue);
    }

    pub fn append_function_start(&mut self) {
        self.pieces.push(Piece::FunctionStart);
    }

    pub fn append_function_end(&mut self) {
        self.trim_trailing_blanks();
        self.pieces.push(Piece::FunctionEnd);
    }

    pub fn open_marker(&mut self, marker: Piece) {
        self.pieces.push(marker);
    }

    fn trim_trailing_blanks(&mut self) {
        while self.pieces.last().is_some_and(Piece::is_blank) {
            self.pieces.pop();
        }
    }

    /// True while a string or tag is being built.
    pub fn has_marker(&self) -> bool {
        self.pieces.iter().any(Piece::is_marker)
    }

    pub fn ends_with_newline(&self) -> bool {
        matches!(self.pieces.last(), Some(Piece::Newline))
    }

    /// Whether the piece at `index` is still the newline it was when saved.
    pub fn newline_at(&self, index: usize) -> bool {
        matches!(self.pieces.get(index), Some(Piece::Newline))
    }

    /// Whether visible text was appended at or after `index`.
    pub fn has_text_since(&self, index: usize) -> bool {
        self.pieces
            .get(index..)
            .is_some_and(|tail| tail.iter().any(|p| matches!(p, Piece::Text(t) if !t.trim().is_empty())))
    }

    /// Removes the innermost open `marker` and everything after it, returning
    /// the rendered content as a single trimmed line.
    pub fn close_marker(&mut self, marker: Piece) -> Option<String> {
        let start = self.pieces.iter().rposition(|p| *p == marker)?;
        let text = render(&self.pieces[start + 1..]);
        self.pieces.truncate(start);
        Some(text.trim_end_matches('\n').to_string())
    }

    /// Renders and clears the whole stream.
    pub fn take_line(&mut self) -> String {
        let text = render(&self.pieces);
        self.pieces.clear();
        text
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn from_pieces(pieces: Vec<Piece>) -> Self {
        Self { pieces }
    }
}

fn render(pieces: &[Piece]) -> String {
    let mut raw = String::new();
    let mut glued = false;
    for piece in pieces {
        match piece {
            Piece::Text(text) => {
                raw.push_str(text);
                glued = false;
            }
            Piece::Newline if !glued => raw.push('\n'),
            Piece::Glue => glued = true,
            _ => {}
        }
    }
    clean(&raw)
}

/// Collapses runs of spaces, trims every line and drops blank lines.
fn clean(raw: &str) -> String {
    let ends_with_newline = raw.trim_end_matches([' ', '\t']).ends_with('\n');
    let lines: Vec<String> = raw
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();
    let mut text = lines.join("\n");
    if ends_with_newline && !text.is_empty() {
        text.push('\n');
    }
    text
}
