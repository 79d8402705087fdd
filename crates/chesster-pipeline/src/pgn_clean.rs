//! Normalises game-history files into the one-line-per-movetext layout the
//! data extraction job expects.

use std::path::Path;

use anyhow::{Context, Result};
use chesster_core::write_text_atomic;

const EVENT_TAG_PREFIX: &str = "[Event ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedPgn {
    pub text: String,
    pub games: usize,
}

/// Rewrites `raw` so each game is its header block, one blank line, and a single movetext line.
///
/// Chunks without both headers and moves are dropped. If no blank-line chunk
/// holds a whole game (the usual layout puts a blank line between headers and
/// moves), the text is split before every `[Event ` tag instead.
pub fn clean_pgn_text(raw: &str) -> CleanedPgn {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let content = normalized.trim();
    if content.is_empty() {
        return CleanedPgn {
            text: String::new(),
            games: 0,
        };
    }

    let mut games = split_on_blank_lines(content)
        .iter()
        .filter_map(|chunk| render_game(chunk))
        .collect::<Vec<_>>();
    if games.is_empty() && content.contains(EVENT_TAG_PREFIX) {
        games = split_before_event_tags(content)
            .iter()
            .filter_map(|chunk| render_game(chunk))
            .collect();
    }

    CleanedPgn {
        text: collapse_blank_runs(&games.join("\n")),
        games: games.len(),
    }
}

/// Cleans `input` into `output` and returns the number of games kept.
pub fn clean_pgn_file(input: &Path, output: &Path) -> Result<usize> {
    let raw = std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let cleaned = clean_pgn_text(&String::from_utf8_lossy(&raw));
    write_text_atomic(output, &cleaned.text)
        .with_context(|| format!("failed to write cleaned games to {}", output.display()))?;
    Ok(cleaned.games)
}

fn split_on_blank_lines(content: &str) -> Vec<Vec<&str>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    for line in content.split('\n') {
        if line.is_empty() {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_before_event_tags(content: &str) -> Vec<Vec<&str>> {
    let mut chunks: Vec<Vec<&str>> = Vec::new();
    for line in content.split('\n') {
        match chunks.last_mut() {
            Some(chunk) if !line.starts_with(EVENT_TAG_PREFIX) => chunk.push(line),
            _ => chunks.push(vec![line]),
        }
    }
    chunks
}

fn render_game(lines: &[&str]) -> Option<String> {
    let headers = lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| line.starts_with('['))
        .collect::<Vec<_>>();
    let moves = lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('['))
        .collect::<Vec<_>>();
    if headers.is_empty() || moves.is_empty() {
        return None;
    }
    Some(format!("{}\n\n{}\n", headers.join("\n"), moves.join(" ")))
}

fn collapse_blank_runs(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                collapsed.push(ch);
            }
        } else {
            newlines = 0;
            collapsed.push(ch);
        }
    }
    collapsed
}
