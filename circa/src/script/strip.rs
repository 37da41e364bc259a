//! Comment stripping and line compaction.
//!
//! The loader never sees raw script text: this pass removes `;` comments and
//! blank lines while building a map from compacted-line numbers back to the
//! original `(file, line)` pairs for diagnostics.
//!
//! `\` escapes the character after it anywhere, including a would-be comment
//! marker, so `\;` survives into the compacted source (backslash included —
//! the extractor handles escapes at run time).

use super::loader::{LoadError, LoadErrorKind};

/// Where a compacted line came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
}

/// Compacted source: retained lines plus their origin map.
///
/// `lines[i]` originated at `map[i]`; compacted-line numbers used in
/// diagnostics are the 1-based indices into these vectors.
#[derive(Debug, Clone, Default)]
pub struct Compacted {
    pub lines: Vec<String>,
    pub map: Vec<SourceLoc>,
}

impl Compacted {
    /// Origin of a 1-based compacted line, for error messages.
    pub fn origin(&self, compacted_line: u32) -> Option<&SourceLoc> {
        self.map.get(compacted_line.saturating_sub(1) as usize)
    }
}

/// Strip `src` (the contents of `file`) down to its significant lines.
pub fn strip(file: &str, src: &str) -> Result<Compacted, LoadError> {
    let mut out = Compacted::default();

    for (idx, raw) in src.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let mut kept = String::with_capacity(raw.len());
        let mut chars = raw.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(next) => {
                        kept.push('\\');
                        kept.push(next);
                    }
                    // A lone backslash at end of line escapes nothing.
                    // This error carries the original line number already;
                    // it needs no compacted-line translation.
                    None => {
                        return Err(LoadError::new(
                            LoadErrorKind::UnterminatedEscape,
                            "\\",
                            line_no,
                        ));
                    }
                },
                ';' => break, // comment to end of line
                other => kept.push(other),
            }
        }

        let trimmed = kept.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.lines.push(trimmed.to_owned());
        out.map.push(SourceLoc {
            file: file.to_owned(),
            line: line_no,
        });
    }

    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
