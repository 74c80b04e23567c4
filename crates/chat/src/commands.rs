//! Recognizing control commands in an inbound message.

use {
    parley_config::{PresetConfig, RenderMode, TriggerConfig},
    regex::Regex,
};

use crate::error::{Error, Result};

/// What a message asks for, in dispatch priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SwitchBackend(String),
    Reset,
    Rollback,
    Ping,
    SwitchVoice(String),
    SwitchRenderer(RenderMode),
    SwitchModel(String),
    LoadPreset(String),
    Draw { prompt: String },
    Chat,
}

/// Trigger configuration with its regexes compiled.
#[derive(Debug, Clone)]
pub struct Triggers {
    config: TriggerConfig,
    switch_backend: Regex,
    switch_model: Regex,
    switch_voice: Regex,
    load_preset: Regex,
    ignore: Vec<Regex>,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::external(format!("invalid regex for {name}"), e))
}

impl Triggers {
    pub fn compile(trigger: &TriggerConfig, presets: &PresetConfig) -> Result<Self> {
        Ok(Self {
            config: trigger.clone(),
            switch_backend: compile("trigger.switch_command", &trigger.switch_command)?,
            switch_model: compile("trigger.switch_model", &trigger.switch_model)?,
            switch_voice: compile("trigger.switch_voice", &trigger.switch_voice)?,
            load_preset: compile("presets.command", &presets.command)?,
            ignore: trigger
                .ignore_regex
                .iter()
                .map(|pattern| compile("trigger.ignore_regex", pattern))
                .collect::<Result<_>>()?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Whether the message should be dropped without a reply.
    ///
    /// Patterns must match at the start of the message.
    #[must_use]
    pub fn is_ignored(&self, message: &str) -> bool {
        self.ignore
            .iter()
            .any(|re| re.find(message).is_some_and(|m| m.start() == 0))
    }

    /// Classify a trimmed message.
    #[must_use]
    pub fn parse(&self, prompt: &str) -> Command {
        let cfg = &self.config;
        let matches = |list: &[String]| list.iter().any(|c| c == prompt);

        if let Some(backend) = capture(&self.switch_backend, prompt) {
            return Command::SwitchBackend(backend);
        }
        if matches(&cfg.reset_command) {
            return Command::Reset;
        }
        if matches(&cfg.rollback_command) {
            return Command::Rollback;
        }
        if matches(&cfg.ping_command) {
            return Command::Ping;
        }
        if let Some(voice) = capture(&self.switch_voice, prompt) {
            return Command::SwitchVoice(voice);
        }
        if matches(&cfg.mixed_only_command) {
            return Command::SwitchRenderer(RenderMode::Mixed);
        }
        if matches(&cfg.image_only_command) {
            return Command::SwitchRenderer(RenderMode::Image);
        }
        if matches(&cfg.text_only_command) {
            return Command::SwitchRenderer(RenderMode::Text);
        }
        if let Some(model) = capture(&self.switch_model, prompt) {
            return Command::SwitchModel(model);
        }
        if let Some(keyword) = capture(&self.load_preset, prompt) {
            return Command::LoadPreset(keyword);
        }
        if let Some(rest) = cfg
            .prefix_image
            .iter()
            .find_map(|prefix| prompt.strip_prefix(prefix.as_str()))
        {
            return Command::Draw {
                prompt: rest.to_string(),
            };
        }
        Command::Chat
    }

    /// The first configured reset command, used in hints.
    #[must_use]
    pub fn reset_hint(&self) -> &str {
        self.config
            .reset_command
            .first()
            .map_or("reset", String::as_str)
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn triggers() -> Triggers {
        let trigger = TriggerConfig {
            ignore_regex: vec![r"/\w+".into()],
            ..Default::default()
        };
        Triggers::compile(&trigger, &PresetConfig::default()).unwrap()
    }

    #[rstest]
    #[case("switch_command openai-api", Command::SwitchBackend("openai-api".into()))]
    #[case("reset", Command::Reset)]
    #[case("rollback", Command::Rollback)]
    #[case("ping", Command::Ping)]
    #[case("switch_voice None", Command::SwitchVoice("None".into()))]
    #[case("mixed_", Command::SwitchRenderer(RenderMode::Mixed))]
    #[case("image", Command::SwitchRenderer(RenderMode::Image))]
    #[case("text_", Command::SwitchRenderer(RenderMode::Text))]
    #[case("switch_model gpt-4 ", Command::SwitchModel("gpt-4".into()))]
    #[case("Load catgirl", Command::LoadPreset("catgirl".into()))]
    #[case("draw a cat", Command::Draw { prompt: " a cat".into() })]
    #[case("hello there", Command::Chat)]
    #[case("reset please", Command::Chat)]
    fn parses_commands(#[case] input: &str, #[case] expected: Command) {
        assert_eq!(triggers().parse(input), expected);
    }

    #[test]
    fn backend_switch_wins_over_everything() {
        assert_eq!(
            triggers().parse("draw switch_command x"),
            Command::SwitchBackend("x".into())
        );
    }

    #[test]
    fn ignore_patterns_anchor_at_start() {
        let t = triggers();
        assert!(t.is_ignored("/start"));
        assert!(!t.is_ignored("say /start"));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let trigger = TriggerConfig {
            switch_model: "(".into(),
            ..Default::default()
        };
        assert!(Triggers::compile(&trigger, &PresetConfig::default()).is_err());
    }

    #[test]
    fn reset_hint_uses_first_command() {
        assert_eq!(triggers().reset_hint(), "reset");
    }
}
