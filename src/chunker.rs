// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Splitting long answers into transport-sized chunks.
//!
//! A chunk never exceeds `max_len` characters. Within each window the splitter
//! scans backward for a break point, preferring a newline, then the space
//! after a sentence end, then any space. The break character itself is
//! dropped. When the window has no break point at all the text is cut hard at
//! `max_len`.
//!
//! Lengths are counted in `char`s so a cut never lands inside a UTF-8 sequence.

/// Kinds of break points, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    Newline,
    SentenceEnd,
    Space,
}

impl BreakKind {
    /// Break kinds from most to least preferred.
    pub const PRIORITY: [BreakKind; 3] = [Self::Newline, Self::SentenceEnd, Self::Space];

    fn matches(self, chars: &[char], index: usize) -> bool {
        match self {
            Self::Newline => chars[index] == '\n',
            Self::SentenceEnd => {
                chars[index] == ' ' && matches!(chars[index - 1], '.' | '!' | '?')
            }
            Self::Space => chars[index] == ' ',
        }
    }
}

/// Split `text` into chunks of at most `max_len` characters.
///
/// With `split_paragraphs` the text is first split on blank lines (`"\n\n"`)
/// and every paragraph is chunked on its own.
pub fn chunk(text: &str, max_len: usize, split_paragraphs: bool) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();

    if split_paragraphs {
        for paragraph in text.split("\n\n") {
            chunk_paragraph(paragraph, max_len, &mut chunks);
        }
    } else {
        chunk_paragraph(text, max_len, &mut chunks);
    }

    chunks
}

fn chunk_paragraph(paragraph: &str, max_len: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = paragraph.chars().collect();
    let mut start = 0;

    while chars.len() - start > max_len {
        let rest = &chars[start..];
        match find_break(rest, max_len) {
            Some((index, _)) => {
                out.push(rest[..index].iter().collect());
                start += index + 1;
            }
            None => {
                out.push(rest[..max_len].iter().collect());
                start += max_len;
            }
        }
    }

    out.push(chars[start..].iter().collect());
}

/// Find the break point for the window `chars[..=max_len]`.
///
/// The highest-priority kind that occurs anywhere in `[2, max_len]` wins, at
/// its highest index. `chars` must be longer than `max_len`.
pub fn find_break(chars: &[char], max_len: usize) -> Option<(usize, BreakKind)> {
    BreakKind::PRIORITY.iter().find_map(|&kind| {
        (2..=max_len)
            .rev()
            .find(|&index| kind.matches(chars, index))
            .map(|index| (index, kind))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walk `original` checking that `chunks` reproduce it with one dropped
    /// space or newline at each soft break. A hard cut never stops right
    /// before a separator, since that separator would have been a break.
    fn assert_lossless(original: &str, chunks: &[String], max_len: usize) {
        let chars: Vec<char> = original.chars().collect();
        let mut pos = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let piece: Vec<char> = chunk.chars().collect();
            assert!(piece.len() <= max_len, "chunk {:?} exceeds {}", chunk, max_len);
            assert_eq!(&chars[pos..pos + piece.len()], piece.as_slice());
            pos += piece.len();
            if i + 1 < chunks.len() && matches!(chars.get(pos), Some(' ') | Some('\n')) {
                pos += 1;
            }
        }
        assert_eq!(pos, chars.len());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(chunk("hello", 10, false), vec!["hello"]);
        assert_eq!(chunk("", 10, false), vec![""]);
    }

    #[test]
    fn test_breaks_on_spaces() {
        assert_eq!(chunk("hello world foo", 5, false), vec!["hello", "world", "foo"]);
    }

    #[test]
    fn test_remainder_that_fits_is_not_split() {
        // "world foo" is 9 characters and fits in the second window.
        assert_eq!(chunk("hello world foo", 10, false), vec!["hello", "world foo"]);
    }

    #[test]
    fn test_newline_beats_sentence_end() {
        let text = "Line one\nMore. Then more words";
        let chunks = chunk(text, 20, false);
        assert_eq!(chunks[0], "Line one");
    }

    #[test]
    fn test_sentence_end_beats_plain_space() {
        let text = "First one. Second sentence goes on";
        let chunks = chunk(text, 20, false);
        assert_eq!(chunks[0], "First one.");
        assert_eq!(chunks[1], "Second sentence goes");
    }

    #[test]
    fn test_hard_cut_without_break_points() {
        let chunks = chunk("abcdefghijklmnopqrstuvwxyz", 10, false);
        assert_eq!(chunks, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
    }

    #[test]
    fn test_break_at_index_below_two_is_ignored() {
        // Index 1 is a space but the scan stops at 2, so this is a hard cut.
        assert_eq!(chunk("a bcdef", 4, false), vec!["a bc", "def"]);
    }

    #[test]
    fn test_multibyte_characters() {
        let chunks = chunk("привет мир дом", 6, false);
        assert_eq!(chunks, vec!["привет", "мир", "дом"]);
    }

    #[test]
    fn test_split_paragraphs() {
        let text = "first paragraph\n\nsecond";
        assert_eq!(chunk(text, 100, true), vec!["first paragraph", "second"]);
        assert_eq!(chunk(text, 100, false), vec![text]);
    }

    #[test]
    fn test_zero_max_len_is_treated_as_one() {
        assert_eq!(chunk("abc", 0, false), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_find_break_reports_kind() {
        let chars: Vec<char> = "ab. cd ef".chars().collect();
        assert_eq!(find_break(&chars, 8), Some((3, BreakKind::SentenceEnd)));
        let chars: Vec<char> = "ab cd\nef gh".chars().collect();
        assert_eq!(find_break(&chars, 8), Some((5, BreakKind::Newline)));
    }

    #[test]
    fn test_lossless_and_bounded() {
        let words = ["alpha", "be", "gamma.", "delta!", "e", "zeta?", "\n", "supercalifragilistic"];
        let mut seed: u64 = 0x2545_f491;
        for round in 0..200 {
            let mut text = String::new();
            for _ in 0..(round % 40 + 1) {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let word = words[(seed >> 33) as usize % words.len()];
                if !text.is_empty() && word != "\n" && !text.ends_with('\n') {
                    text.push(' ');
                }
                text.push_str(word);
            }
            for max_len in [3, 7, 12, 50] {
                let chunks = chunk(&text, max_len, false);
                assert_lossless(&text, &chunks, max_len);
            }
        }
    }
}
