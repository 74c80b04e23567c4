//! The per-turn response pipeline: split → merge → render → sink.

use std::sync::Arc;

use {
    async_trait::async_trait,
    futures::{Stream, StreamExt},
    parley_common::types::RenderedFragment,
    parley_config::{RenderMode, ResponseConfig},
    tokio::time::Instant,
    tracing::{debug, trace},
};

use crate::{
    error::{Error, Result},
    merger::{MergeStrategy, Merger},
    renderer::{
        MarkdownImageRenderer, MixedContentRenderer, PlainTextRenderer, Rasterizer, Renderer,
    },
    splitter::SegmentSplitter,
};

/// Receives rendered fragments in order.
#[async_trait]
pub trait FragmentSink: Send + Sync {
    async fn deliver(&self, fragment: RenderedFragment) -> Result<()>;
}

/// The splitter, merge strategy and renderer active for a conversation.
#[derive(Clone)]
pub struct RenderStack {
    splitter: SegmentSplitter,
    strategy: MergeStrategy,
    renderer: Arc<dyn Renderer>,
}

impl std::fmt::Debug for RenderStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStack")
            .field("mode", &self.renderer.mode())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl RenderStack {
    /// Build the stack for `mode`, deriving splitter and merger from `response`.
    #[must_use]
    pub fn new(
        mode: RenderMode,
        response: &ResponseConfig,
        rasterizer: Option<Arc<dyn Rasterizer>>,
    ) -> Self {
        let renderer: Arc<dyn Renderer> = match mode {
            RenderMode::Image => Arc::new(MarkdownImageRenderer::new(rasterizer)),
            RenderMode::Mixed => Arc::new(MixedContentRenderer),
            RenderMode::Text => Arc::new(PlainTextRenderer),
        };
        Self {
            splitter: SegmentSplitter::new(response.segment_max_len),
            strategy: MergeStrategy::from_settings(response.buffer_delay, response.length_threshold),
            renderer,
        }
    }

    #[must_use]
    pub fn with_parts(
        splitter: SegmentSplitter,
        strategy: MergeStrategy,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            splitter,
            strategy,
            renderer,
        }
    }

    #[must_use]
    pub fn mode(&self) -> RenderMode {
        self.renderer.mode()
    }

    #[must_use]
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Start a pipeline run for one turn.
    #[must_use]
    pub fn begin<'a>(&'a self, sink: &'a dyn FragmentSink) -> PipelineRun<'a> {
        PipelineRun {
            stack: self,
            sink,
            merger: Merger::new(self.strategy, self.splitter.max_len()),
            pending: String::new(),
            full: String::new(),
        }
    }
}

/// Why a driven run stopped early.
#[derive(Debug, thiserror::Error)]
pub enum DriveError<E> {
    /// The upstream stream failed after `partial` had been received and flushed.
    #[error("{error}")]
    Upstream { partial: String, error: E },
    #[error(transparent)]
    Render(#[from] Error),
}

/// One turn's pass through the pipeline.
///
/// Buffered content is flushed exactly once by [`PipelineRun::finish`];
/// dropping the run without finishing discards it.
pub struct PipelineRun<'a> {
    stack: &'a RenderStack,
    sink: &'a dyn FragmentSink,
    merger: Merger,
    pending: String,
    full: String,
}

impl PipelineRun<'_> {
    /// Feed one text increment.
    ///
    /// With the length strategy an unfinished paragraph that reaches the
    /// threshold is cut at its last break and delivered without waiting for
    /// the paragraph to end.
    pub async fn push(&mut self, delta: &str) -> Result<()> {
        self.full.push_str(delta);
        self.pending.push_str(delta);
        let split = self.stack.splitter.split(&self.pending);
        self.pending = split.rest;
        let mut segments = split.segments;

        if let MergeStrategy::Length { threshold } = self.stack.strategy
            && self.pending.len() >= threshold
        {
            let cut = self.stack.splitter.cut(&self.pending, false);
            self.pending = cut.rest;
            segments.extend(cut.segments);
        }

        let now = Instant::now();
        self.merge(segments, now).await?;
        self.hold_pending(now);
        Ok(())
    }

    /// When buffered content falls due, if any is buffered.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.merger.deadline()
    }

    /// Flush everything held once the buffering window has elapsed,
    /// including the unfinished paragraph up to its last break.
    pub async fn flush_due(&mut self) -> Result<()> {
        let now = Instant::now();
        if !self.merger.is_due(now) {
            return Ok(());
        }
        let cut = self.stack.splitter.cut(&self.pending, true);
        self.pending = cut.rest;
        self.merge(cut.segments, now).await?;
        if let Some(unit) = self.merger.drain() {
            self.emit(&unit).await?;
        }
        self.hold_pending(now);
        Ok(())
    }

    /// Flush everything still held and return the full text of the turn.
    pub async fn finish(mut self) -> Result<String> {
        let tail = std::mem::take(&mut self.pending);
        let segments = self.stack.splitter.split_final(&tail);
        self.merge(segments, Instant::now()).await?;
        if let Some(unit) = self.merger.drain() {
            self.emit(&unit).await?;
        }
        debug!(chars = self.full.len(), mode = %self.stack.mode(), "pipeline finished");
        Ok(self.full)
    }

    /// Consume `stream` to the end, flushing buffered units when they fall due.
    ///
    /// On an upstream error, buffered content is flushed before the error is returned.
    pub async fn drive<S, E>(mut self, stream: S) -> std::result::Result<String, DriveError<E>>
    where
        S: Stream<Item = std::result::Result<String, E>>,
    {
        let mut stream = std::pin::pin!(stream);
        loop {
            let next = match self.deadline() {
                Some(deadline) => tokio::select! {
                    item = stream.next() => Some(item),
                    () = tokio::time::sleep_until(deadline) => None,
                },
                None => Some(stream.next().await),
            };

            match next {
                None => self.flush_due().await?,
                Some(Some(Ok(delta))) => self.push(&delta).await?,
                Some(Some(Err(error))) => {
                    let partial = self.finish().await?;
                    return Err(DriveError::Upstream { partial, error });
                },
                Some(None) => return Ok(self.finish().await?),
            }
        }
    }

    async fn merge(&mut self, segments: Vec<String>, now: Instant) -> Result<()> {
        for segment in segments {
            for unit in self.merger.push(segment, now) {
                self.emit(&unit).await?;
            }
        }
        Ok(())
    }

    /// Text still waiting for a boundary counts toward the buffering window.
    fn hold_pending(&mut self, now: Instant) {
        if !self.pending.trim().is_empty() {
            self.merger.start_window(now);
        }
    }

    async fn emit(&self, unit: &str) -> Result<()> {
        trace!(len = unit.len(), "rendering unit");
        for fragment in self.stack.renderer.render(unit).await? {
            if fragment.is_blank() {
                continue;
            }
            self.sink.deliver(fragment).await?;
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        futures::stream,
        std::{sync::Mutex, time::Duration},
    };

    #[derive(Default)]
    struct Collect(Mutex<Vec<(Instant, RenderedFragment)>>);

    impl Collect {
        fn texts(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(_, f)| f.as_text().map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl FragmentSink for Collect {
        async fn deliver(&self, fragment: RenderedFragment) -> Result<()> {
            self.0.lock().unwrap().push((Instant::now(), fragment));
            Ok(())
        }
    }

    fn stack(strategy: MergeStrategy) -> RenderStack {
        RenderStack::with_parts(
            SegmentSplitter::new(1000),
            strategy,
            Arc::new(PlainTextRenderer),
        )
    }

    fn ok_stream(parts: &[&str]) -> impl Stream<Item = std::result::Result<String, String>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok::<_, String>((*p).to_string()))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn mode_selects_renderer() {
        let response = ResponseConfig::default();
        assert_eq!(RenderStack::new(RenderMode::Text, &response, None).mode(), RenderMode::Text);
        assert_eq!(RenderStack::new(RenderMode::Image, &response, None).mode(), RenderMode::Image);
        let length = ResponseConfig {
            buffer_delay: 0.0,
            length_threshold: 42,
            ..Default::default()
        };
        assert_eq!(
            RenderStack::new(RenderMode::Mixed, &length, None).strategy(),
            MergeStrategy::Length { threshold: 42 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fast_increments_are_coalesced() {
        let stack = stack(MergeStrategy::Buffered {
            delay: Duration::from_secs(15),
        });
        let sink = Collect::default();
        let increments = ["one\n", "\n", "two\n\n", "thr", "ee\n\nfour"];
        let full = stack.begin(&sink).drive(ok_stream(&increments)).await.unwrap();
        assert_eq!(full, "one\n\ntwo\n\nthree\n\nfour");
        let texts = sink.texts();
        assert!(texts.len() < increments.len());
        assert_eq!(texts.join("\n\n"), "one\n\ntwo\n\nthree\n\nfour");
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_unit_flushes_at_deadline_while_stream_is_idle() {
        let stack = stack(MergeStrategy::Buffered {
            delay: Duration::from_secs(15),
        });
        let sink = Collect::default();
        let start = Instant::now();
        let slow = async_stream::stream! {
            yield Ok::<_, String>("first\n\n".to_string());
            tokio::time::sleep(Duration::from_secs(60)).await;
            yield Ok("second".to_string());
        };
        stack.begin(&sink).drive(slow).await.unwrap();

        let delivered = sink.0.lock().unwrap().clone();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0 - start, Duration::from_secs(15));
        assert_eq!(delivered[0].1, RenderedFragment::text("first"));
        assert_eq!(delivered[1].0 - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn length_strategy_flushes_without_waiting() {
        let stack = stack(MergeStrategy::Length { threshold: 5 });
        let sink = Collect::default();
        let mut run = stack.begin(&sink);
        run.push("hello world\n\n").await.unwrap();
        assert_eq!(sink.texts(), vec!["hello world"]);
        run.push("tail").await.unwrap();
        assert_eq!(sink.texts().len(), 1);
        run.finish().await.unwrap();
        assert_eq!(sink.texts(), vec!["hello world", "tail"]);
    }

    #[tokio::test(start_paused = true)]
    async fn length_strategy_flushes_long_paragraph_before_it_ends() {
        let stack = stack(MergeStrategy::Length { threshold: 5 });
        let sink = Collect::default();
        let mut run = stack.begin(&sink);
        run.push("hello world, this sentence is well past five bytes")
            .await
            .unwrap();
        assert_eq!(sink.texts(), vec!["hello world, this sentence is well past five"]);
        run.push(" and keeps growing").await.unwrap();
        assert_eq!(sink.texts().len(), 2);
        assert_eq!(sink.texts()[1], "bytes and keeps");
        let full = run.finish().await.unwrap();
        assert_eq!(sink.texts()[2], "growing");
        assert_eq!(
            full,
            "hello world, this sentence is well past five bytes and keeps growing"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_window_starts_with_unfinished_paragraph() {
        let stack = stack(MergeStrategy::Buffered {
            delay: Duration::from_secs(15),
        });
        let sink = Collect::default();
        let start = Instant::now();
        let slow = async_stream::stream! {
            yield Ok::<_, String>("first part of a paragraph ".to_string());
            tokio::time::sleep(Duration::from_secs(60)).await;
            yield Ok("and its end".to_string());
        };
        stack.begin(&sink).drive(slow).await.unwrap();

        let delivered = sink.0.lock().unwrap().clone();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0 - start, Duration::from_secs(15));
        assert_eq!(delivered[0].1, RenderedFragment::text("first part of a paragraph"));
        assert_eq!(delivered[1].0 - start, Duration::from_secs(60));
        assert_eq!(delivered[1].1, RenderedFragment::text("and its end"));
    }

    #[tokio::test(start_paused = true)]
    async fn large_embedded_image_survives_splitting() {
        let stack = RenderStack::new(RenderMode::Mixed, &ResponseConfig::default(), None);
        let sink = Collect::default();
        let answer = format!("see ![](data:image/png;base64,{}) done", "A".repeat(8000));
        stack.begin(&sink).drive(ok_stream(&[&answer])).await.unwrap();

        let delivered = sink.0.lock().unwrap().clone();
        let images = delivered
            .iter()
            .filter(|(_, f)| matches!(f, RenderedFragment::Image(_)))
            .count();
        assert_eq!(images, 1);
        assert_eq!(sink.texts(), vec!["see", "done"]);
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_error_flushes_partial_once() {
        let stack = stack(MergeStrategy::Buffered {
            delay: Duration::from_secs(15),
        });
        let sink = Collect::default();
        let failing = stream::iter(vec![
            Ok("partial answer".to_string()),
            Err("connection reset".to_string()),
        ]);
        let err = stack.begin(&sink).drive(failing).await.unwrap_err();
        match err {
            DriveError::Upstream { partial, error } => {
                assert_eq!(partial, "partial answer");
                assert_eq!(error, "connection reset");
            },
            DriveError::Render(e) => panic!("unexpected render error: {e}"),
        }
        assert_eq!(sink.texts(), vec!["partial answer"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_discards_buffer() {
        let stack = stack(MergeStrategy::Buffered {
            delay: Duration::from_secs(15),
        });
        let sink = Collect::default();
        {
            let mut run = stack.begin(&sink);
            run.push("buffered\n\n").await.unwrap();
        }
        assert!(sink.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn blank_output_is_not_delivered() {
        let stack = stack(MergeStrategy::Length { threshold: 1 });
        let sink = Collect::default();
        let full = stack.begin(&sink).drive(ok_stream(&["  ", "\n\n"])).await.unwrap();
        assert_eq!(full, "  \n\n");
        assert!(sink.texts().is_empty());
    }
}
