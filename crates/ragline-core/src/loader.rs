use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkSource};

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "json", "jsonl", "yaml", "yml", "toml", "html", "htm",
    "xml", "log",
];

/// Reads a directory (or a single file) of UTF-8 documents and splits them
/// into chunks no longer than `max_chunk_chars` characters.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    chunking: ChunkingSettings,
}

impl DocumentLoader {
    pub fn new(chunking: ChunkingSettings) -> Self {
        Self { chunking }
    }

    pub fn load(&self, path: &Path) -> Result<Vec<Chunk>> {
        self.load_limited(path, usize::MAX)
    }

    /// Like [`load`](Self::load) but reads at most `max_files` documents.
    pub fn load_limited(&self, path: &Path, max_files: usize) -> Result<Vec<Chunk>> {
        let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
        let (root, mut files) = if meta.is_file() {
            let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (root, vec![path.to_path_buf()])
        } else {
            (path.to_path_buf(), list_text_files(path)?)
        };
        if files.len() > max_files {
            info!(limit = max_files, found = files.len(), "limiting documents");
            files.truncate(max_files);
        }

        let mut all_chunks = Vec::new();
        let mut documents = 0usize;
        for (file_index, file_path) in files.iter().enumerate() {
            debug!("Processing file {}/{}: {}", file_index + 1, files.len(), file_path.display());
            let Some(content) = read_text(file_path)? else { continue };
            let doc_id = doc_id_for(file_path, &root);
            let chunks = self.chunk_content(&content, &doc_id, file_path);
            if !chunks.is_empty() {
                documents += 1;
            }
            all_chunks.extend(chunks);
        }

        if all_chunks.is_empty() {
            return Err(Error::EmptyInput(path.to_path_buf()));
        }
        info!(documents, chunks = all_chunks.len(), "loaded {}", path.display());
        Ok(all_chunks)
    }

    pub fn chunk_content(&self, content: &str, doc_id: &str, file_path: &Path) -> Vec<Chunk> {
        let path = file_path.to_string_lossy().to_string();
        let spans = split_spans(content, self.chunking.max_chunk_chars, self.chunking.chunk_overlap_chars);
        let total_chunks = spans.len();
        spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| {
                let source = ChunkSource { path: path.clone(), offset: start, chunk_index, total_chunks };
                Chunk::new(format!("{}:{}", doc_id, chunk_index), &content[start..end], source)
            })
            .collect()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn list_text_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
            Error::io(path, source)
        })?;
        if entry.file_type().is_file() && is_text_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// `None` for files that are not valid UTF-8; those are skipped.
fn read_text(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Some(text)),
        Err(_) => {
            warn!("skipping non UTF-8 file {}", path.display());
            Ok(None)
        }
    }
}

fn doc_id_for(file_path: &Path, root: &Path) -> String {
    let relative = file_path.strip_prefix(root).unwrap_or(file_path);
    relative.to_string_lossy().replace('\\', "/")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Non-empty paragraphs as `(start, end)` byte ranges, trimmed.
fn paragraphs(content: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    for part in content.split("\n\n") {
        let leading = part.len() - part.trim_start().len();
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let start = offset + leading;
            out.push((start, start + trimmed.len()));
        }
        offset += part.len() + 2;
    }
    out
}

/// Chunk byte ranges for `content`.
///
/// Paragraphs are packed greedily up to `max_chars`; oversize paragraphs are
/// windowed on word boundaries with up to `overlap_chars` of trailing words
/// repeated at the start of the next window.
pub fn split_spans(content: &str, max_chars: usize, overlap_chars: usize) -> Vec<(usize, usize)> {
    let max_chars = max_chars.max(1);
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (start, end) in paragraphs(content) {
        if char_len(&content[start..end]) > max_chars {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            spans.extend(window_words(content, start, end, max_chars, overlap_chars));
            continue;
        }
        current = match current {
            Some((s, _)) if char_len(&content[s..end]) <= max_chars => Some((s, end)),
            Some(span) => {
                spans.push(span);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

fn word_spans(content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut words = Vec::new();
    let mut word_start: Option<usize> = None;
    for (i, ch) in content[start..end].char_indices() {
        match (ch.is_whitespace(), word_start) {
            (true, Some(ws)) => {
                words.push((start + ws, start + i));
                word_start = None;
            }
            (false, None) => word_start = Some(i),
            _ => {}
        }
    }
    if let Some(ws) = word_start {
        words.push((start + ws, end));
    }
    words
}

fn window_words(
    content: &str,
    start: usize,
    end: usize,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<(usize, usize)> {
    let words = word_spans(content, start, end);
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < words.len() {
        let first = words[i].0;
        let mut j = i;
        while j < words.len() && char_len(&content[first..words[j].1]) <= max_chars {
            j += 1;
        }
        if j == i {
            out.extend(hard_split(content, words[i].0, words[i].1, max_chars));
            i += 1;
            continue;
        }
        out.push((first, words[j - 1].1));
        if j >= words.len() {
            break;
        }
        let mut k = j;
        while k > i + 1 && char_len(&content[words[k - 1].0..words[j - 1].1]) <= overlap_chars {
            k -= 1;
        }
        // The next window must reach past this one.
        while k < j && char_len(&content[words[k].0..words[j].1]) > max_chars {
            k += 1;
        }
        i = k;
    }
    out
}

fn hard_split(content: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut piece_start = start;
    let mut count = 0usize;
    for (i, _) in content[start..end].char_indices() {
        if count == max_chars {
            out.push((piece_start, start + i));
            piece_start = start + i;
            count = 0;
        }
        count += 1;
    }
    if piece_start < end {
        out.push((piece_start, end));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(content: &'a str, spans: &[(usize, usize)]) -> Vec<&'a str> {
        spans.iter().map(|&(s, e)| &content[s..e]).collect()
    }

    #[test]
    fn small_paragraphs_are_packed() {
        let content = "alpha beta\n\ngamma\n\n\n\ndelta";
        let spans = split_spans(content, 100, 10);
        assert_eq!(spans.len(), 1);
        assert_eq!(&content[spans[0].0..spans[0].1], content);
    }

    #[test]
    fn packing_respects_limit() {
        let content = "aaaa aaaa\n\nbbbb bbbb\n\ncccc";
        let spans = split_spans(content, 12, 0);
        assert_eq!(texts(content, &spans), vec!["aaaa aaaa", "bbbb bbbb", "cccc"]);
    }

    #[test]
    fn long_paragraph_is_windowed_with_overlap() {
        let content = "one two three four five six seven eight";
        let spans = split_spans(content, 14, 5);
        let chunks = texts(content, &spans);
        for c in &chunks {
            assert!(c.chars().count() <= 14, "{c:?} too long");
        }
        assert_eq!(chunks.first().copied(), Some("one two three"));
        // "three" (5 chars) is repeated at the start of the second window
        assert!(chunks[1].starts_with("three"));
        assert!(chunks.last().is_some_and(|c| c.ends_with("eight")));
    }

    #[test]
    fn overlap_is_dropped_when_the_next_word_would_not_fit() {
        let content = "aa bb cc dddddddddddd";
        let spans = split_spans(content, 12, 5);
        assert_eq!(texts(content, &spans), vec!["aa bb cc", "dddddddddddd"]);

        let content = "aa bb cc ddddddddd ee";
        let spans = split_spans(content, 12, 5);
        assert_eq!(texts(content, &spans), vec!["aa bb cc", "cc ddddddddd", "ee"]);
    }

    #[test]
    fn windows_always_advance() {
        let content = "x yy zzz wwww vvvvv uuuuuu ttttttt ssssssss rr q ppppppppppp oo";
        for max in 3..16 {
            for overlap in 0..max {
                let spans = split_spans(content, max, overlap);
                for pair in spans.windows(2) {
                    let (prev, next) = (pair[0], pair[1]);
                    assert!(
                        next.0 > prev.0 && next.1 > prev.1,
                        "{max}/{overlap}: {:?} does not advance past {:?}",
                        &content[next.0..next.1],
                        &content[prev.0..prev.1]
                    );
                }
            }
        }
    }

    #[test]
    fn oversize_word_is_hard_split_on_char_boundaries() {
        let content = "ééééééé";
        let spans = split_spans(content, 3, 0);
        assert_eq!(texts(content, &spans), vec!["ééé", "ééé", "é"]);
    }

    #[test]
    fn whitespace_only_produces_nothing() {
        assert!(split_spans("  \n\n \t ", 10, 2).is_empty());
    }
}
