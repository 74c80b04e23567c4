//! Response rendering: segment splitting, merging, and fragment rendering.

pub mod error;
pub mod markdown;
pub mod merger;
pub mod pipeline;
pub mod renderer;
pub mod splitter;

pub use {
    error::{Error, Result},
    merger::{MergeStrategy, Merger},
    pipeline::{DriveError, FragmentSink, PipelineRun, RenderStack},
    renderer::{
        MarkdownImageRenderer, MixedContentRenderer, PlainTextRenderer, Rasterizer, Renderer,
        WkhtmlRasterizer,
    },
    splitter::{SegmentSplitter, Split, hard_split},
};
