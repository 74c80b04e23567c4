//! Speech on the respond path: voice selection and synthesized replies.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use {
    common::{Collect, MockBackend, MockTts, clock, config, orchestrator_with},
    parley_chat::{DirPresetStore, InboundMessage, Orchestrator, TurnOutcome},
    parley_common::types::{AudioFormat, Platform, RenderedFragment},
    parley_config::{ParleyConfig, PresetConfig},
    parley_service_traits::Services,
};

const JENNY: &str = "en-US-JennyNeural";

fn speaking(config: ParleyConfig, tts: &Arc<MockTts>, services: Services) -> Orchestrator {
    let services = Services {
        tts: Arc::clone(tts) as _,
        ..services
    };
    orchestrator_with(config, &MockBackend::new(), services, clock())
}

async fn send_from(
    orchestrator: &Orchestrator,
    platform: Platform,
    text: &str,
) -> (TurnOutcome, Collect) {
    let sink = Collect::default();
    let outcome = orchestrator
        .handle_message(
            InboundMessage::new("friend-1", text).with_platform(platform),
            &sink,
        )
        .await
        .unwrap();
    (outcome, sink)
}

/// `t:<text>` or `v:<text>/<format>` per fragment, in delivery order.
fn kinds(sink: &Collect) -> Vec<String> {
    sink.fragments()
        .iter()
        .map(|fragment| match fragment {
            RenderedFragment::Text(text) => format!("t:{text}"),
            RenderedFragment::Voice(clip) => format!(
                "v:{}/{}",
                String::from_utf8_lossy(&clip.data),
                clip.format.mime_type()
            ),
            RenderedFragment::Image(_) => "image".to_string(),
        })
        .collect()
}

#[tokio::test]
async fn switched_voice_speaks_after_each_text_reply() {
    let tts = Arc::new(MockTts::default());
    let orchestrator = speaking(config(), &tts, Services::default());

    let (outcome, sink) =
        send_from(&orchestrator, Platform::Console, &format!("switch_voice {JENNY}")).await;
    assert_eq!(outcome, TurnOutcome::Switched);
    let switched = format!("Switched to {JENNY} Voice, let's keep chatting!");
    assert_eq!(kinds(&sink), vec![
        format!("t:{switched}"),
        format!("v:voice:{switched}/audio/wav"),
    ]);

    let (outcome, sink) = send_from(&orchestrator, Platform::Console, "hello").await;
    assert_eq!(outcome, TurnOutcome::Forwarded);
    assert_eq!(kinds(&sink), vec![
        "t:echo: hello".to_string(),
        "v:voice:echo: hello/audio/wav".to_string(),
    ]);
    assert_eq!(tts.requests().last().unwrap().1, JENNY);
}

#[tokio::test]
async fn http_callers_get_mp3_speech() {
    let tts = Arc::new(MockTts::default());
    let orchestrator = speaking(config(), &tts, Services::default());

    send_from(&orchestrator, Platform::Http, &format!("switch_voice {JENNY}")).await;
    let (_, sink) = send_from(&orchestrator, Platform::Http, "hello").await;

    let fragments = sink.fragments();
    let [RenderedFragment::Text(_), RenderedFragment::Voice(clip)] = fragments.as_slice() else {
        panic!("expected text then voice, got {fragments:?}");
    };
    assert_eq!(clip.format, AudioFormat::Mp3);
    assert_eq!(tts.requests().last().unwrap().2, AudioFormat::Mp3);
}

#[tokio::test]
async fn failed_synthesis_is_skipped() {
    let tts = Arc::new(MockTts::failing());
    let orchestrator = speaking(config(), &tts, Services::default());

    let (outcome, _) =
        send_from(&orchestrator, Platform::Console, &format!("switch_voice {JENNY}")).await;
    assert_eq!(outcome, TurnOutcome::Switched);

    let (outcome, sink) = send_from(&orchestrator, Platform::Console, "hello").await;
    assert_eq!(outcome, TurnOutcome::Forwarded);
    assert_eq!(kinds(&sink), vec!["t:echo: hello".to_string()]);
    assert_eq!(sink.completed(), 1);
    assert_eq!(tts.requests().len(), 2);
}

#[tokio::test]
async fn voice_can_be_turned_off_again() {
    let tts = Arc::new(MockTts::default());
    let orchestrator = speaking(config(), &tts, Services::default());

    send_from(&orchestrator, Platform::Console, &format!("switch_voice {JENNY}")).await;
    let (outcome, _) = send_from(&orchestrator, Platform::Console, "switch_voice None").await;
    assert_eq!(outcome, TurnOutcome::Switched);
    let spoken = tts.requests().len();

    let (_, sink) = send_from(&orchestrator, Platform::Console, "hello").await;
    assert_eq!(kinds(&sink), vec!["t:echo: hello".to_string()]);
    assert_eq!(tts.requests().len(), spoken);
}

#[tokio::test]
async fn preset_voice_line_selects_the_voice() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("cat.txt"),
        format!("system: You are a cat.\n\nvoice: {JENNY}\n\nassistant: Meow!"),
    )
    .unwrap();
    let presets = DirPresetStore::from_config(&PresetConfig {
        scan_dir: dir.path().display().to_string(),
        ..Default::default()
    });
    let tts = Arc::new(MockTts::default());
    let orchestrator = speaking(config(), &tts, Services {
        presets: Arc::new(presets),
        ..Default::default()
    });

    let (outcome, sink) = send_from(&orchestrator, Platform::Console, "Load cat").await;
    assert_eq!(outcome, TurnOutcome::Answered);
    assert_eq!(kinds(&sink), vec![
        "t:Meow!".to_string(),
        "v:voice:Meow!/audio/wav".to_string(),
    ]);
}

#[tokio::test]
async fn always_on_speech_uses_the_default_voice() {
    let mut config = config();
    config.text_to_speech.always = true;
    config.text_to_speech.default = JENNY.into();
    let tts = Arc::new(MockTts::default());
    let orchestrator = speaking(config, &tts, Services::default());

    let (_, sink) = send_from(&orchestrator, Platform::Console, "hello").await;
    assert_eq!(kinds(&sink), vec![
        "t:echo: hello".to_string(),
        "v:voice:echo: hello/audio/wav".to_string(),
    ]);
    assert_eq!(tts.requests(), vec![(
        "echo: hello".to_string(),
        JENNY.to_string(),
        AudioFormat::Wav
    )]);
}
