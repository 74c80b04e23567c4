//! Coalesces finished segments into delivery units.

use std::time::Duration;

use tokio::time::Instant;

/// How segments are batched before rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeStrategy {
    /// Hold segments for `delay` after the first one arrives, then flush together.
    Buffered { delay: Duration },
    /// Flush as soon as the buffered text reaches `threshold` bytes.
    Length { threshold: usize },
}

impl MergeStrategy {
    /// Buffered when `buffer_delay` is positive, otherwise length-based.
    #[must_use]
    pub fn from_settings(buffer_delay_secs: f64, length_threshold: usize) -> Self {
        if buffer_delay_secs > 0.0 {
            Self::Buffered {
                delay: Duration::from_secs_f64(buffer_delay_secs),
            }
        } else {
            Self::Length {
                threshold: length_threshold,
            }
        }
    }
}

const JOINER: &str = "\n\n";

/// Per-turn merge state.
#[derive(Debug)]
pub struct Merger {
    strategy: MergeStrategy,
    max_len: usize,
    buffer: String,
    deadline: Option<Instant>,
}

impl Merger {
    #[must_use]
    pub fn new(strategy: MergeStrategy, max_len: usize) -> Self {
        Self {
            strategy,
            max_len,
            buffer: String::new(),
            deadline: None,
        }
    }

    /// Add a finished segment. Returns units that must be delivered now.
    pub fn push(&mut self, segment: String, now: Instant) -> Vec<String> {
        let mut ready = Vec::new();

        if !self.buffer.is_empty() && self.buffer.len() + JOINER.len() + segment.len() > self.max_len
        {
            ready.extend(self.drain());
        }
        if !self.buffer.is_empty() {
            self.buffer.push_str(JOINER);
        }
        self.buffer.push_str(&segment);

        match self.strategy {
            MergeStrategy::Buffered { delay } => {
                if self.deadline.is_none() {
                    self.deadline = Some(now + delay);
                }
            },
            MergeStrategy::Length { threshold } => {
                if self.buffer.len() >= threshold {
                    ready.extend(self.drain());
                }
            },
        }
        ready
    }

    /// When the buffered unit must be flushed, if anything is buffered.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Open the buffering window for content that has arrived but is not a
    /// finished segment yet. No effect for the length strategy.
    pub fn start_window(&mut self, now: Instant) {
        if let MergeStrategy::Buffered { delay } = self.strategy
            && self.deadline.is_none()
        {
            self.deadline = Some(now + delay);
        }
    }

    /// Whether the buffering window has elapsed.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Everything buffered, regardless of timing.
    pub fn drain(&mut self) -> Option<String> {
        self.deadline = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
