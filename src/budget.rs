//! Token budgeting for prompts.
//!
//! Text is measured with the `o200k_base` encoding. When a text is over
//! budget it is cut down with a recursive character splitter, keeping the
//! leading chunk, until it fits.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Rough characters-per-token ratio used to size the first cut.
const CHARS_PER_TOKEN: usize = 3;
const MIN_CHUNK_SIZE: usize = 140;

const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", ".", ",", " ", ""];

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Splits text on the coarsest separator present, recursing into pieces that
/// are still too large, and merges small pieces back up to `chunk_size`
/// characters.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveCharacterTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(anyhow!("chunk_size must be positive"));
        }
        if chunk_overlap >= chunk_size {
            return Err(anyhow!("chunk_overlap must be smaller than chunk_size"));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separator = self
            .separators
            .iter()
            .find(|s| s.is_empty() || text.contains(s.as_str()))
            .cloned()
            .unwrap_or_default();

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator.as_str()).map(str::to_string).collect()
        };

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();

        for split in splits {
            // Single characters cannot be split further.
            if char_len(&split) < self.chunk_size || separator.is_empty() {
                good_splits.push(split);
            } else {
                if !good_splits.is_empty() {
                    final_chunks.extend(self.merge_splits(&good_splits, &separator));
                    good_splits.clear();
                }
                final_chunks.extend(self.split_text(&split));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, &separator));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        // Length of `current` joined with `separator`.
        let mut total = 0usize;

        for part in splits {
            let part_len = char_len(part);
            let joined_extra = if current.is_empty() { 0 } else { separator_len };

            if total + joined_extra + part_len > self.chunk_size && !current.is_empty() {
                let doc = current.iter().copied().collect::<Vec<_>>().join(separator);
                let doc = doc.trim();
                if !doc.is_empty() {
                    docs.push(doc.to_string());
                }
                while total > self.chunk_overlap {
                    let Some(removed) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(removed);
                    if !current.is_empty() {
                        total -= separator_len;
                    }
                }
            }

            if !current.is_empty() {
                total += separator_len;
            }
            current.push_back(part);
            total += part_len;
        }

        if !current.is_empty() {
            let doc = current.iter().copied().collect::<Vec<_>>().join(separator);
            let doc = doc.trim();
            if !doc.is_empty() {
                docs.push(doc.to_string());
            }
        }

        docs
    }
}

/// Measures and trims text against token budgets.
#[derive(Clone)]
pub struct TextBudgeter {
    bpe: Arc<CoreBPE>,
}

impl TextBudgeter {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::o200k_base()
            .map_err(|e| anyhow!("failed to load o200k_base encoding: {}", e))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Returns `text` unchanged when it fits `budget` tokens, otherwise its
    /// leading portion cut at the coarsest separator that makes it fit.
    pub fn trim(&self, text: &str, budget: usize) -> String {
        if text.is_empty() || budget == 0 {
            return String::new();
        }

        let mut current = text.to_string();
        loop {
            let length = self.count(&current);
            if length <= budget {
                return current;
            }

            let chars = char_len(&current);
            let overflow = length - budget;
            let chunk_size = chars
                .saturating_sub(overflow * CHARS_PER_TOKEN)
                .max(MIN_CHUNK_SIZE);

            let split = if chunk_size < chars {
                RecursiveCharacterTextSplitter::new(chunk_size, 0)
                    .ok()
                    .and_then(|splitter| splitter.split_text(&current).into_iter().next())
            } else {
                None
            };

            current = match split {
                Some(chunk) if !chunk.is_empty() && char_len(&chunk) < chars => chunk,
                // No separator made progress: cut proportionally.
                _ => truncate_chars(&current, chars * budget / length),
            };

            if current.is_empty() {
                return current;
            }
        }
    }

    /// How many leading items fit in `budget` tokens together.
    pub fn fit_leading<'a, I>(&self, items: I, budget: usize) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut used = 0;
        let mut fitted = 0;
        for item in items {
            let cost = self.count(item);
            if used + cost > budget {
                break;
            }
            used += cost;
            fitted += 1;
        }
        fitted
    }
}

impl std::fmt::Debug for TextBudgeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextBudgeter").field("encoding", &"o200k_base").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        assert!(RecursiveCharacterTextSplitter::new(10, 10).is_err());
        assert!(RecursiveCharacterTextSplitter::new(0, 0).is_err());
    }

    #[test]
    fn splits_on_paragraphs_first() {
        let splitter = RecursiveCharacterTextSplitter::new(20, 0).unwrap();
        let chunks = splitter.split_text("first paragraph\n\nsecond paragraph");
        assert_eq!(chunks, vec!["first paragraph", "second paragraph"]);
    }

    #[test]
    fn merges_small_pieces_up_to_chunk_size() {
        let splitter = RecursiveCharacterTextSplitter::new(11, 0).unwrap();
        let chunks = splitter.split_text("a b c d e f g h");
        assert_eq!(chunks, vec!["a b c d e f", "g h"]);
    }

    #[test]
    fn oversized_word_falls_back_to_characters() {
        let splitter = RecursiveCharacterTextSplitter::new(4, 0).unwrap();
        let chunks = splitter.split_text("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn trim_keeps_text_within_budget() {
        let budgeter = TextBudgeter::new().unwrap();
        let text = "Caffeine blocks adenosine receptors. ".repeat(400);
        assert!(budgeter.count(&text) > 200);

        let trimmed = budgeter.trim(&text, 200);
        assert!(budgeter.count(&trimmed) <= 200);
        assert!(!trimmed.is_empty());
        assert!(text.starts_with(trimmed.trim_end_matches('.')));
    }

    #[test]
    fn trim_returns_short_text_unchanged() {
        let budgeter = TextBudgeter::new().unwrap();
        assert_eq!(budgeter.trim("short text", 100), "short text");
        assert_eq!(budgeter.trim("", 100), "");
        assert_eq!(budgeter.trim("anything", 0), "");
    }

    #[test]
    fn trim_handles_text_without_separators() {
        let budgeter = TextBudgeter::new().unwrap();
        let text = "é".repeat(5000);
        let trimmed = budgeter.trim(&text, 50);
        assert!(budgeter.count(&trimmed) <= 50);
    }

    #[test]
    fn fit_leading_stops_at_budget() {
        let budgeter = TextBudgeter::new().unwrap();
        let items = ["- same fact\n"; 3];
        let per_item = budgeter.count(items[0]);
        let fitted = budgeter.fit_leading(items.iter().copied(), per_item * 2);
        assert_eq!(fitted, 2);
    }
}
