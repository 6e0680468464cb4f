//! Session-layer settings.
//!
//! Consumed by the compactor and session controller. Values come from a
//! builder or from the environment (the application loads `.env` with
//! dotenvy before calling [`Settings::from_env`]).

/// Tunable settings for one adventure's session layer.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum entries kept live after compaction. Zero is valid and
    /// means "archive everything".
    pub retained_count: usize,

    /// Character budget for the retained window. Zero is valid when
    /// `retained_count` is also zero.
    pub target_retained_char_count: usize,

    /// Transcript size (in characters) past which `should_compact`
    /// reports true.
    pub compaction_threshold_chars: usize,

    /// Opaque model name recorded in generated summaries.
    pub model: String,

    /// Use the scripted mock engine instead of a real backend.
    pub mock_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retained_count: 20,
            target_retained_char_count: 40_000,
            compaction_threshold_chars: 100_000,
            model: "default".to_string(),
            mock_mode: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retained_count(mut self, count: usize) -> Self {
        self.retained_count = count;
        self
    }

    pub fn with_target_retained_char_count(mut self, chars: usize) -> Self {
        self.target_retained_char_count = chars;
        self
    }

    pub fn with_compaction_threshold_chars(mut self, chars: usize) -> Self {
        self.compaction_threshold_chars = chars;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_mock_mode(mut self, mock: bool) -> Self {
        self.mock_mode = mock;
        self
    }

    /// Read settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retained_count: env_usize("SAGA_RETAINED_COUNT", defaults.retained_count),
            target_retained_char_count: env_usize(
                "SAGA_TARGET_RETAINED_CHARS",
                defaults.target_retained_char_count,
            ),
            compaction_threshold_chars: env_usize(
                "SAGA_COMPACTION_THRESHOLD_CHARS",
                defaults.compaction_threshold_chars,
            ),
            model: std::env::var("SAGA_MODEL").unwrap_or(defaults.model),
            mock_mode: std::env::var("SAGA_MOCK_MODE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.mock_mode),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
