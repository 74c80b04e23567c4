#![allow(dead_code, clippy::unwrap_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    chrono::{Local, TimeZone},
    parley_chat::{BackendRegistry, Orchestrator, ReplySink, Result},
    parley_common::{
        clock::ManualClock,
        types::{AudioClip, AudioFormat, ImageData, RenderedFragment},
    },
    parley_config::ParleyConfig,
    parley_render::Rasterizer,
    parley_service_traits::{
        BackendError, ChatBackend, DrawingBackend, ServiceResult, Services, TextStream,
        TtsService, TtsVoice,
    },
};

// ── Chat backend ────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    reply: Mutex<Option<Vec<String>>>,
    delay: Mutex<Duration>,
    failures: Mutex<VecDeque<BackendError>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    resets: AtomicUsize,
    model: Mutex<String>,
}

/// Echoes prompts back, optionally after a delay or a scripted set of failures.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = delay;
        self
    }

    pub fn with_reply(self, chunks: &[&str]) -> Self {
        *self.state.reply.lock().unwrap() = Some(chunks.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Fail the next attempts with these errors, in order.
    pub fn failing_with(self, errors: Vec<BackendError>) -> Self {
        self.state.failures.lock().unwrap().extend(errors);
        self
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    /// `start <prompt>` / `end <prompt>` in execution order.
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    pub fn model(&self) -> String {
        self.state.model.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn ask(&self, prompt: &str) -> TextStream {
        let state = Arc::clone(&self.state);
        let prompt = prompt.to_string();
        Box::pin(async_stream::stream! {
            state.calls.fetch_add(1, Ordering::SeqCst);
            state.prompts.lock().unwrap().push(prompt.clone());
            let failure = state.failures.lock().unwrap().pop_front();
            if let Some(error) = failure {
                yield Err(error);
                return;
            }

            let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_active.fetch_max(active, Ordering::SeqCst);
            state.log.lock().unwrap().push(format!("start {prompt}"));
            let delay = *state.delay.lock().unwrap();
            tokio::time::sleep(delay).await;

            let reply = state.reply.lock().unwrap().clone();
            let chunks = reply.unwrap_or_else(|| vec![format!("echo: {prompt}")]);
            for chunk in chunks {
                yield Ok(chunk);
            }
            state.log.lock().unwrap().push(format!("end {prompt}"));
            state.active.fetch_sub(1, Ordering::SeqCst);
        })
    }

    async fn rollback(&self) -> bool {
        false
    }

    async fn on_reset(&self) {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn switch_model(&self, model: &str) {
        *self.state.model.lock().unwrap() = model.to_string();
    }

    fn current_model(&self) -> String {
        self.model()
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["mock-small".into(), "gpt-3.5-turbo-1106".into()]
    }
}

// ── Drawing / rasterizing ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDrawing {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl DrawingBackend for MockDrawing {
    async fn text_to_img(&self, prompt: &str) -> ServiceResult<Vec<ImageData>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(vec![ImageData::from_url("https://images.test/1.png")])
    }

    async fn img_to_img(&self, _init: &ImageData, prompt: &str) -> ServiceResult<Vec<ImageData>> {
        self.prompts.lock().unwrap().push(format!("img2img:{prompt}"));
        Ok(vec![ImageData::from_url("https://images.test/2.png")])
    }
}

pub struct FakeRasterizer;

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(&self, _html: &str) -> parley_render::Result<Bytes> {
        Ok(Bytes::from_static(b"\x89PNG\r\n\x1a\nfake"))
    }
}

// ── Speech ──────────────────────────────────────────────────────────────────

/// Azure-style TTS that returns `voice:<text>` as audio, or fails on demand.
#[derive(Default)]
pub struct MockTts {
    fail: AtomicBool,
    requests: Mutex<Vec<(String, String, AudioFormat)>>,
}

impl MockTts {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// `(text, voice full name, format)` per synthesis attempt.
    pub fn requests(&self) -> Vec<(String, String, AudioFormat)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsService for MockTts {
    fn engine(&self) -> &str {
        "azure"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &TtsVoice,
        format: AudioFormat,
    ) -> ServiceResult<AudioClip> {
        self.requests
            .lock()
            .unwrap()
            .push((text.to_string(), voice.full_name.clone(), format));
        if self.fail.load(Ordering::SeqCst) {
            return Err("speech backend unavailable".into());
        }
        Ok(AudioClip {
            data: Bytes::from(format!("voice:{text}")),
            format,
        })
    }

    async fn list_voices(&self, _prefixes: &[String]) -> Vec<TtsVoice> {
        TtsVoice::parse("azure", "en-US-JennyNeural").into_iter().collect()
    }
}

// ── Sink ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Collect {
    fragments: Mutex<Vec<RenderedFragment>>,
    completed: AtomicUsize,
}

impl Collect {
    pub fn fragments(&self) -> Vec<RenderedFragment> {
        self.fragments.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.fragments()
            .iter()
            .filter_map(|f| f.as_text().map(str::to_string))
            .collect()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplySink for Collect {
    async fn deliver(&self, fragment: RenderedFragment) -> Result<()> {
        self.fragments.lock().unwrap().push(fragment);
        Ok(())
    }

    async fn complete(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Setup ───────────────────────────────────────────────────────────────────

/// Plain-text replies from the `mock` backend, flushed once per turn.
pub fn config() -> ParleyConfig {
    let mut config = ParleyConfig::default();
    config.response.mode = "text".into();
    config.response.default_ai = "mock".into();
    config.response.buffer_delay = 0.0;
    config
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Local.with_ymd_and_hms(2024, 5, 10, 14, 5, 0).unwrap(),
    ))
}

pub fn registry(backend: &MockBackend) -> BackendRegistry {
    let backend = backend.clone();
    BackendRegistry::new().with("mock", move |_| {
        Ok(Arc::new(backend.clone()) as Arc<dyn ChatBackend>)
    })
}

pub fn orchestrator(config: ParleyConfig, backend: &MockBackend) -> Orchestrator {
    Orchestrator::builder(config, registry(backend))
        .clock(clock())
        .build()
        .unwrap()
}

pub fn orchestrator_with(
    config: ParleyConfig,
    backend: &MockBackend,
    services: Services,
    clock: Arc<ManualClock>,
) -> Orchestrator {
    Orchestrator::builder(config, registry(backend))
        .services(services)
        .clock(clock)
        .rasterizer(Arc::new(FakeRasterizer))
        .build()
        .unwrap()
}
