//! Breaks accumulated text into deliverable segments.

use std::ops::Range;

use crate::markdown;

/// Finished segments plus the tail that may still grow.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Split {
    pub segments: Vec<String>,
    pub rest: String,
}

/// Splits on blank lines outside fenced code blocks and hard-wraps
/// anything longer than `max_len` bytes at a newline or space.
///
/// Image references are never cut: an oversized one becomes a segment of its
/// own, and an unterminated one stays in the tail until it closes.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSplitter {
    max_len: usize,
}

impl SegmentSplitter {
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Split text that may still receive more input. The returned `rest`
    /// is the unfinished paragraph after the last boundary.
    #[must_use]
    pub fn split(&self, text: &str) -> Split {
        let mut segments = Vec::new();
        let mut seg_start = 0;
        let mut offset = 0;
        let mut in_fence = false;

        for line in text.split_inclusive('\n') {
            let line_end = offset + line.len();
            let complete = line.ends_with('\n');
            let trimmed = line.trim();
            if complete && trimmed.starts_with("```") {
                in_fence = !in_fence;
            }
            if complete && !in_fence && trimmed.is_empty() {
                self.push_segment(&text[seg_start..offset], &mut segments);
                seg_start = line_end;
            }
            offset = line_end;
        }

        let mut rest = text[seg_start..].to_string();
        if rest.len() > self.max_len {
            let images = markdown::image_spans(&rest);
            let held = open_image(&rest, &images).unwrap_or(rest.len());
            let (head, tail) = rest.split_at(held);
            let mut pieces = self.pieces(head);
            let tail = if tail.is_empty() {
                let trailing = &head[head.trim_end().len()..];
                pieces
                    .pop()
                    .map(|last| last + trailing)
                    .unwrap_or_default()
            } else {
                tail.to_string()
            };
            segments.extend(pieces);
            rest = tail;
        }

        Split { segments, rest }
    }

    /// Split text that will receive no more input.
    #[must_use]
    pub fn split_final(&self, text: &str) -> Vec<String> {
        let Split { mut segments, rest } = self.split(text);
        self.push_segment(&rest, &mut segments);
        segments
    }

    /// Cut an unfinished paragraph at its last newline, or else its last
    /// space, outside fenced code blocks and image references.
    ///
    /// With `force`, a paragraph without such a break is cut before its first
    /// unterminated fence or image reference instead. Text that cannot be cut
    /// comes back whole as `rest`.
    #[must_use]
    pub fn cut(&self, text: &str, force: bool) -> Split {
        let (mut spans, open_fence) = fence_spans(text);
        let images = markdown::image_spans(text);
        let held = [open_fence, open_image(text, &images)]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(text.len());
        spans.extend(images);

        let open = &text[..held];
        let covered = |pos: usize| spans.iter().any(|s| s.start < pos && pos < s.end);
        let break_at = |sep: char| {
            open.rmatch_indices(sep)
                .map(|(pos, _)| pos)
                .find(|&pos| pos > 0 && !covered(pos))
        };
        let at = break_at('\n')
            .or_else(|| break_at(' '))
            .or(force.then_some(held))
            .filter(|&at| at > 0);
        let Some(at) = at else {
            return Split {
                segments: Vec::new(),
                rest: text.to_string(),
            };
        };

        let rest = &text[at..];
        let rest = rest
            .strip_prefix('\n')
            .or_else(|| rest.strip_prefix(' '))
            .unwrap_or(rest);
        let mut segments = Vec::new();
        self.push_segment(&text[..at], &mut segments);
        Split {
            segments,
            rest: rest.to_string(),
        }
    }

    fn push_segment(&self, raw: &str, out: &mut Vec<String>) {
        let segment = raw.trim_matches('\n').trim_end();
        if segment.trim().is_empty() {
            return;
        }
        if segment.len() <= self.max_len {
            out.push(segment.to_string());
        } else {
            out.extend(self.pieces(segment));
        }
    }

    /// Pieces of at most `max_len` bytes, with every image reference kept
    /// whole as a piece of its own.
    fn pieces(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut start = 0;
        for span in markdown::image_spans(text) {
            push_wrapped(&text[start..span.start], self.max_len, &mut out);
            out.push(text[span.clone()].to_string());
            start = span.end;
        }
        push_wrapped(&text[start..], self.max_len, &mut out);
        out
    }
}

fn push_wrapped(raw: &str, max_len: usize, out: &mut Vec<String>) {
    let text = raw.trim_matches(['\n', ' ']);
    if text.trim().is_empty() {
        return;
    }
    if text.len() <= max_len {
        out.push(text.to_string());
    } else {
        out.extend(hard_split(text, max_len));
    }
}

/// Closed fenced code blocks (without their final newline), and where an
/// unclosed one starts.
fn fence_spans(text: &str) -> (Vec<Range<usize>>, Option<usize>) {
    let mut spans = Vec::new();
    let mut open = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_end = offset + line.len();
        if line.ends_with('\n') && line.trim().starts_with("```") {
            match open.take() {
                Some(start) => spans.push(start..line_end - 1),
                None => open = Some(offset),
            }
        }
        offset = line_end;
    }
    (spans, open)
}

/// Start of a trailing `![` that has not closed into a complete reference.
fn open_image(text: &str, images: &[Range<usize>]) -> Option<usize> {
    let pos = text.rfind("![")?;
    (!images.iter().any(|s| s.start <= pos && pos < s.end)).then_some(pos)
}

/// Split `text` into chunks of at most `max_len` bytes, preferring to break
/// at a newline, then a space.
#[must_use]
pub fn hard_split(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window_end = remaining.floor_char_boundary(max_len);
        if window_end == 0 {
            window_end = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }

        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|pos| *pos > 0)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
        if let Some(stripped) = remaining.strip_prefix(' ') {
            remaining = stripped;
        }
    }

    chunks
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn splits_on_blank_lines_and_keeps_tail() {
        let split = SegmentSplitter::new(100).split("first\n\nsecond\n\nthi");
        assert_eq!(split.segments, vec!["first", "second"]);
        assert_eq!(split.rest, "thi");
    }

    #[rstest]
    #[case::single_newline("line one\nline two", &[], "line one\nline two")]
    #[case::fenced_blank_line(
        "```\nfn a() {}\n\nfn b() {}\n```\n\nafter",
        &["```\nfn a() {}\n\nfn b() {}\n```"],
        "after"
    )]
    #[case::open_fence("```\na\n\nb", &[], "```\na\n\nb")]
    #[case::repeated_blank_lines("a\n\n\n\nb\n\n", &["a", "b"], "")]
    fn split_boundaries(#[case] text: &str, #[case] segments: &[&str], #[case] rest: &str) {
        let split = SegmentSplitter::new(100).split(text);
        assert_eq!(split.segments, segments);
        assert_eq!(split.rest, rest);
    }

    #[test]
    fn oversized_tail_is_hard_split() {
        let split = SegmentSplitter::new(10).split("aaaa bbbb cccc dddd");
        assert_eq!(split.segments, vec!["aaaa bbbb"]);
        assert_eq!(split.rest, "cccc dddd");
    }

    #[test]
    fn oversized_tail_keeps_trailing_space() {
        let split = SegmentSplitter::new(10).split("aaaa bbbb cccc ");
        assert_eq!(split.segments, vec!["aaaa bbbb"]);
        assert_eq!(split.rest, "cccc ");
    }

    #[test]
    fn oversized_image_reference_is_never_cut() {
        let image = format!("![](data:image/png;base64,{})", "A".repeat(200));
        let segments = SegmentSplitter::new(50).split_final(&format!("see {image} done"));
        assert_eq!(segments, vec!["see".to_string(), image, "done".to_string()]);
    }

    #[test]
    fn unterminated_image_reference_stays_in_tail() {
        let streaming = format!("intro text ![](data:image/png;base64,{}", "A".repeat(100));
        let split = SegmentSplitter::new(50).split(&streaming);
        assert_eq!(split.segments, vec!["intro text"]);
        assert!(split.rest.starts_with("![](data:"));
        assert_eq!(split.rest.len(), streaming.len() - "intro text ".len());
    }

    #[rstest]
    #[case::at_last_newline("one two\nthree fo", false, &["one two"], "three fo")]
    #[case::at_last_space("one two thr", false, &["one two"], "thr")]
    #[case::no_break("unbroken", false, &[], "unbroken")]
    #[case::forced_without_break("unbroken", true, &["unbroken"], "")]
    #[case::before_open_fence("intro\n```\nlet a = 1;\nlet b", false, &["intro"], "```\nlet a = 1;\nlet b")]
    #[case::around_closed_fence("```\na b\nc\n```\nafter", false, &["```\na b\nc\n```"], "after")]
    #[case::before_open_image("look ![](https://e.com/x", false, &["look"], "![](https://e.com/x")]
    #[case::forced_keeps_open_image("![](https://e.com/x", true, &[], "![](https://e.com/x")]
    fn cut_boundaries(
        #[case] text: &str,
        #[case] force: bool,
        #[case] segments: &[&str],
        #[case] rest: &str,
    ) {
        let split = SegmentSplitter::new(100).cut(text, force);
        assert_eq!(split.segments, segments);
        assert_eq!(split.rest, rest);
    }

    #[test]
    fn split_final_includes_tail() {
        let segments = SegmentSplitter::new(100).split_final("a\n\nb\n");
        assert_eq!(segments, vec!["a", "b"]);
    }

    #[test]
    fn hard_split_prefers_newline() {
        assert_eq!(hard_split("abc\ndef ghi", 8), vec!["abc", "def ghi"]);
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let chunks = hard_split("ééééé", 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), "ééééé");
    }
}
