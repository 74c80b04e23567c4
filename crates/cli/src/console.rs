//! Interactive console adapter: one line in, one turn out.

use std::{io::Write, sync::Arc};

use {
    anyhow::Result,
    async_trait::async_trait,
    parley_chat::{DirPresetStore, InboundMessage, Orchestrator, ReplySink},
    parley_common::types::{ImageSource, Platform, RenderedFragment},
    parley_config::ParleyConfig,
    parley_service_traits::Services,
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::{error, warn},
};

#[derive(clap::Args, Debug)]
pub struct ChatArgs {
    /// Session identity (`friend-<id>` or `group-<id>`), used for quotas and history.
    #[arg(long, default_value = "friend-console")]
    pub session: String,

    /// Name shown to presets and decorations.
    #[arg(long, default_value = "console")]
    pub nickname: String,

    /// Treat the console user as an administrator.
    #[arg(long, default_value_t = false)]
    pub admin: bool,
}

impl Default for ChatArgs {
    fn default() -> Self {
        Self {
            session: "friend-console".into(),
            nickname: "console".into(),
            admin: false,
        }
    }
}

/// Prints fragments to stdout as they arrive.
struct ConsoleSink;

#[async_trait]
impl ReplySink for ConsoleSink {
    async fn deliver(&self, fragment: RenderedFragment) -> parley_chat::Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", describe(&fragment))?;
        stdout.flush()?;
        Ok(())
    }

    async fn complete(&self) {
        println!();
    }
}

/// Console rendering of a fragment; media is summarized, not dumped.
fn describe(fragment: &RenderedFragment) -> String {
    match fragment {
        RenderedFragment::Text(text) => text.clone(),
        RenderedFragment::Image(image) => match &image.source {
            ImageSource::Url(url) => format!("[image] {url}"),
            ImageSource::Bytes(bytes) => format!(
                "[image] {} bytes ({})",
                bytes.len(),
                image.mime_type.as_deref().unwrap_or("unknown type")
            ),
        },
        RenderedFragment::Voice(clip) => format!(
            "[voice] {} bytes ({})",
            clip.data.len(),
            clip.format.mime_type()
        ),
    }
}

pub async fn run(mut config: ParleyConfig, args: ChatArgs) -> Result<()> {
    let registry = parley_providers::builtin_registry(&config.openai);
    if !registry.contains(&config.response.default_ai) {
        warn!(
            requested = %config.response.default_ai,
            "default backend unavailable, falling back to echo"
        );
        config.response.default_ai = parley_providers::echo::BACKEND_TYPE.into();
    }

    let services = Services {
        presets: Arc::new(DirPresetStore::from_config(&config.presets)),
        ..Default::default()
    };
    let orchestrator = Orchestrator::builder(config, registry)
        .services(services)
        .build()?;

    eprintln!(
        "parley console: session {} ({}). Ctrl-D to quit.",
        args.session, args.nickname
    );

    let sink = ConsoleSink;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = InboundMessage::new(&args.session, line)
            .with_nickname(&args.nickname)
            .with_admin(args.admin)
            .with_platform(Platform::Console);
        if let Err(e) = orchestrator.handle_message(message, &sink).await {
            error!(session_id = %args.session, error = %e, "turn failed");
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        bytes::Bytes,
        parley_common::types::{AudioClip, AudioFormat, ImageData},
    };

    #[test]
    fn describes_each_fragment_kind() {
        assert_eq!(describe(&RenderedFragment::text("hi")), "hi");
        assert_eq!(
            describe(&RenderedFragment::Image(ImageData::from_url("https://x/1.png"))),
            "[image] https://x/1.png"
        );
        assert_eq!(
            describe(&RenderedFragment::Image(ImageData::from_bytes(
                Bytes::from_static(b"1234"),
                Some("image/png".into())
            ))),
            "[image] 4 bytes (image/png)"
        );
        assert_eq!(
            describe(&RenderedFragment::Voice(AudioClip {
                data: Bytes::from_static(b"RIFF"),
                format: AudioFormat::Wav,
            })),
            "[voice] 4 bytes (audio/wav)"
        );
    }
}
