//! Structure-aware text chunker.
//!
//! Splits extracted document text into ordered [`ChunkPiece`]s under a
//! configurable size budget. Markdown tables are atomic: a table block is
//! emitted as a single chunk no matter how large, and is never merged or
//! split. Oversized prose blocks are split at breakpoints chosen by an
//! optional LLM advisor, falling back deterministically to sentence and
//! paragraph boundaries.
//!
//! Chunking never fails: advisor errors fall back to the deterministic
//! path, and empty input yields an empty chunk list.

use regex::Regex;

use crate::advisor::BreakpointAdvisor;
use crate::models::ChunkPiece;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerOptions {
    pub max_size: usize,
    pub min_size: usize,
    pub overlap: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            max_size: 800,
            min_size: 100,
            overlap: 100,
        }
    }
}

impl ChunkerOptions {
    pub fn from_config(cfg: &crate::config::ChunkingConfig) -> Self {
        Self {
            max_size: cfg.max_size,
            min_size: cfg.min_size,
            overlap: cfg.overlap,
        }
    }
}

/// Split `text` into ordered chunk pieces.
///
/// Pass `advisor` to let an LLM suggest breakpoints inside oversized prose
/// blocks; `None` uses the deterministic fallback only.
pub async fn chunk_text(
    text: &str,
    opts: &ChunkerOptions,
    advisor: Option<&dyn BreakpointAdvisor>,
) -> Vec<ChunkPiece> {
    let clean = sanitize(text);
    if clean.is_empty() {
        return Vec::new();
    }

    let blocks = split_blocks(&clean);

    let mut pieces: Vec<ChunkPiece> = Vec::new();
    for block in blocks {
        if block.is_table {
            // Tables are stored whole regardless of size.
            pieces.push(ChunkPiece {
                content: block.content,
                is_table: true,
            });
        } else if block.content.len() <= opts.max_size {
            pieces.push(ChunkPiece {
                content: block.content,
                is_table: false,
            });
        } else {
            for part in split_long_block(&block.content, opts.max_size, advisor).await {
                pieces.push(ChunkPiece {
                    content: part,
                    is_table: false,
                });
            }
        }
    }

    // Blocks under min_size are deliberately not merged with neighbors:
    // merging was found to hurt retrieval quality. If re-enabled, only
    // merge when the combined size stays under max_size.

    if opts.overlap > 0 {
        apply_overlap(&mut pieces, opts.overlap);
    }

    pieces
}

/// Strip control noise and normalize whitespace. Chunk content must not
/// contain null bytes by the time it reaches the store.
pub fn sanitize(text: &str) -> String {
    let no_ansi = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]")
        .map(|re| re.replace_all(text, "").into_owned())
        .unwrap_or_else(|_| text.to_string());

    let mut out = String::with_capacity(no_ansi.len());
    let mut prev_cr = false;
    for ch in no_ansi.chars() {
        match ch {
            '\0' => {}
            '\r' => {
                out.push('\n');
                prev_cr = true;
            }
            '\n' => {
                if prev_cr {
                    prev_cr = false;
                } else {
                    out.push('\n');
                }
            }
            c if c.is_control() && c != '\n' && c != '\t' => {
                prev_cr = false;
            }
            c => {
                out.push(c);
                prev_cr = false;
            }
        }
    }

    // Collapse runs of 3+ newlines to a paragraph break.
    let collapsed = Regex::new(r"\n{3,}")
        .map(|re| re.replace_all(&out, "\n\n").into_owned())
        .unwrap_or(out);

    collapsed.trim().to_string()
}

struct Block {
    content: String,
    is_table: bool,
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_table_separator(line: &str) -> bool {
    let t = line.trim();
    is_table_row(t)
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn has_headings(text: &str) -> bool {
    text.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with('#') && t.trim_start_matches('#').starts_with(' ')
    })
}

fn has_table(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .windows(2)
        .any(|w| is_table_row(w[0]) && is_table_separator(w[1]))
}

/// Split sanitized text into ordered blocks, each tagged `is_table`.
///
/// A table block is a `|...|` header row followed by a dash separator row
/// and all contiguous `|...|` rows after it, extracted verbatim. Prose
/// between tables is split further at heading boundaries when the text
/// carries headings.
fn split_blocks(text: &str) -> Vec<Block> {
    if !has_headings(text) && !has_table(text) {
        return vec![Block {
            content: text.to_string(),
            is_table: false,
        }];
    }

    let lines: Vec<&str> = text.lines().collect();
    let split_headings = has_headings(text);
    let mut blocks: Vec<Block> = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut i = 0;

    let flush =
        |buf: &mut Vec<&str>, blocks: &mut Vec<Block>| {
            let joined = buf.join("\n");
            buf.clear();
            for piece in split_prose(&joined, split_headings) {
                blocks.push(Block {
                    content: piece,
                    is_table: false,
                });
            }
        };

    while i < lines.len() {
        if i + 1 < lines.len() && is_table_row(lines[i]) && is_table_separator(lines[i + 1]) {
            flush(&mut buf, &mut blocks);
            let start = i;
            i += 2;
            while i < lines.len() && is_table_row(lines[i]) {
                i += 1;
            }
            blocks.push(Block {
                content: lines[start..i].join("\n"),
                is_table: true,
            });
        } else {
            buf.push(lines[i]);
            i += 1;
        }
    }
    flush(&mut buf, &mut blocks);

    blocks
}

/// Split a prose region at heading boundaries. Each heading starts a new
/// block; text before the first heading forms its own block.
fn split_prose(text: &str, at_headings: bool) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if !at_headings {
        return vec![trimmed.to_string()];
    }

    let mut out: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in trimmed.lines() {
        let t = line.trim_start();
        let is_heading = t.starts_with('#') && t.trim_start_matches('#').starts_with(' ');
        if is_heading && !current.is_empty() {
            let piece = current.join("\n").trim().to_string();
            if !piece.is_empty() {
                out.push(piece);
            }
            current.clear();
        }
        current.push(line);
    }
    let piece = current.join("\n").trim().to_string();
    if !piece.is_empty() {
        out.push(piece);
    }
    out
}

/// Split an oversized prose block by repeatedly taking a window of up to
/// `max_size` characters and cutting at the best breakpoint inside it.
async fn split_long_block(
    text: &str,
    max_size: usize,
    advisor: Option<&dyn BreakpointAdvisor>,
) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_size {
            let t = remaining.trim();
            if !t.is_empty() {
                parts.push(t.to_string());
            }
            break;
        }

        let mut window_end = floor_char_boundary(remaining, max_size);
        if window_end == 0 {
            // max_size smaller than the first character's width
            window_end = remaining
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(remaining.len());
        }
        let window = &remaining[..window_end];

        let bp = pick_breakpoint(window, advisor).await;
        let mut bp = floor_char_boundary(remaining, bp.clamp(1, window_end));
        if bp == 0 {
            // Flooring a 1-byte offset into a multi-byte character yields
            // 0; the loop must always consume at least one character.
            bp = window_end;
        }

        let t = remaining[..bp].trim();
        if !t.is_empty() {
            parts.push(t.to_string());
        }
        remaining = &remaining[bp..];
    }

    parts
}

async fn pick_breakpoint(window: &str, advisor: Option<&dyn BreakpointAdvisor>) -> usize {
    if let Some(advisor) = advisor {
        if !looks_like_garbage(window) {
            match advisor.suggest_breakpoint(window).await {
                Ok(Some(pos)) if pos > 0 && pos <= window.len() => {
                    return pos;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("breakpoint advisor failed, using fallback: {e}");
                }
            }
        }
    }
    fallback_breakpoint(window)
}

/// Deterministic breakpoint: last sentence end, then last paragraph
/// break, then the raw window boundary.
fn fallback_breakpoint(window: &str) -> usize {
    if let Ok(re) = Regex::new(r"[.!?]\s+") {
        if let Some(m) = re.find_iter(window).last() {
            return m.end();
        }
    }
    if let Some(pos) = window.rfind("\n\n") {
        return pos + 2;
    }
    window.len()
}

/// Binary or base64-like input has no sentence structure worth asking an
/// LLM about: average whitespace-token length over 20 chars.
fn looks_like_garbage(window: &str) -> bool {
    let tokens: Vec<&str> = window.split_whitespace().collect();
    if tokens.is_empty() {
        return true;
    }
    let total: usize = tokens.iter().map(|t| t.len()).sum();
    total / tokens.len() > 20
}

/// Forward-context overlap: chunk `i` gets the first `overlap` characters
/// of chunk `i+1` appended. Pairs adjacent to a table get none, and the
/// last chunk gets none.
fn apply_overlap(pieces: &mut [ChunkPiece], overlap: usize) {
    let originals: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
    for i in 0..pieces.len().saturating_sub(1) {
        if pieces[i].is_table || pieces[i + 1].is_table {
            continue;
        }
        let next = &originals[i + 1];
        let take = floor_char_boundary(next, overlap.min(next.len()));
        pieces[i].content.push_str(&next[..take]);
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
