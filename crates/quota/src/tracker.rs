use std::sync::Arc;

use {
    parley_common::{clock::Clock, template},
    parley_config::RatelimitConfig,
    tracing::info,
};

use crate::{key::SessionKey, ledger::QuotaLedger};

/// Which quota a request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaAxis {
    Chat,
    Draw,
}

impl QuotaAxis {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Draw => "draw",
        }
    }
}

/// Chat and drawing ledgers sharing one clock.
pub struct QuotaTracker {
    chat: QuotaLedger,
    draw: QuotaLedger,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            chat: QuotaLedger::new(Arc::clone(&clock)),
            draw: QuotaLedger::new(Arc::clone(&clock)),
            clock,
        }
    }

    /// Build a tracker with the limits listed in config.
    #[must_use]
    pub fn from_config(config: &RatelimitConfig, clock: Arc<dyn Clock>) -> Self {
        let tracker = Self::new(clock);
        for entry in &config.limits {
            tracker.chat.set_limit(&entry.category, &entry.id, entry.rate);
        }
        for entry in &config.draw_limits {
            tracker.draw.set_limit(&entry.category, &entry.id, entry.rate);
        }
        info!(
            chat_limits = config.limits.len(),
            draw_limits = config.draw_limits.len(),
            "quota limits seeded"
        );
        tracker
    }

    #[must_use]
    pub fn ledger(&self, axis: QuotaAxis) -> &QuotaLedger {
        match axis {
            QuotaAxis::Chat => &self.chat,
            QuotaAxis::Draw => &self.draw,
        }
    }

    #[must_use]
    pub fn chat(&self) -> &QuotaLedger {
        &self.chat
    }

    #[must_use]
    pub fn draw(&self) -> &QuotaLedger {
        &self.draw
    }

    /// Usage ratio for `key` on `axis`.
    #[must_use]
    pub fn ratio(&self, axis: QuotaAxis, key: &SessionKey) -> f64 {
        self.ledger(axis).check_exceed(&key.category, &key.id)
    }

    pub fn record(&self, axis: QuotaAxis, key: &SessionKey) {
        self.ledger(axis).increment_usage(&key.category, &key.id);
    }

    /// Fill a warning template with the caller's usage, limit and the current time.
    ///
    /// Returns `None` when no limit applies to `key`.
    #[must_use]
    pub fn warning_text(
        &self,
        axis: QuotaAxis,
        key: &SessionKey,
        template_text: &str,
    ) -> Option<String> {
        let ledger = self.ledger(axis);
        let limit = ledger.get_limit(&key.category, &key.id)?;
        let usage = ledger.get_usage(&key.category, &key.id);
        let now = self.clock.now().format("%H:%M").to_string();
        Some(template::fill(template_text, &[
            ("usage", &usage.count.to_string()),
            ("limit", &limit.rate.to_string()),
            ("current_time", &now),
        ]))
    }
}
