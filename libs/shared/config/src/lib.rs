use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub consultation: ConsultationConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            consultation: ConsultationConfig::from_env(),
        };

        if !config.is_configured() {
            warn!("Persistence not configured - session notes and prescriptions will be rejected");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

/// Timing and threshold settings for a live consultation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationConfig {
    pub session_length_secs: u32,
    pub ten_minute_mark_secs: u32,
    pub five_minute_mark_secs: u32,
    pub tick_interval_ms: u64,
    pub network_delay_threshold_ms: u32,
    pub network_warning_cooldown_ms: u64,
    pub start_with_audio: bool,
    pub start_with_video: bool,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            session_length_secs: 1800,
            ten_minute_mark_secs: 600,
            five_minute_mark_secs: 300,
            tick_interval_ms: 1000,
            network_delay_threshold_ms: 300,
            network_warning_cooldown_ms: 60_000,
            start_with_audio: true,
            start_with_video: true,
        }
    }
}

impl ConsultationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            session_length_secs: env_or(
                "CONSULTATION_SESSION_LENGTH_SECS",
                defaults.session_length_secs,
            ),
            ten_minute_mark_secs: env_or(
                "CONSULTATION_TEN_MINUTE_MARK_SECS",
                defaults.ten_minute_mark_secs,
            ),
            five_minute_mark_secs: env_or(
                "CONSULTATION_FIVE_MINUTE_MARK_SECS",
                defaults.five_minute_mark_secs,
            ),
            tick_interval_ms: env_or("CONSULTATION_TICK_INTERVAL_MS", defaults.tick_interval_ms),
            network_delay_threshold_ms: env_or(
                "CONSULTATION_NETWORK_DELAY_THRESHOLD_MS",
                defaults.network_delay_threshold_ms,
            ),
            network_warning_cooldown_ms: env_or(
                "CONSULTATION_NETWORK_WARNING_COOLDOWN_MS",
                defaults.network_warning_cooldown_ms,
            ),
            start_with_audio: env_or("CONSULTATION_START_WITH_AUDIO", defaults.start_with_audio),
            start_with_video: env_or("CONSULTATION_START_WITH_VIDEO", defaults.start_with_video),
        };

        if let Err(reason) = config.validate() {
            warn!("Invalid consultation configuration ({}), using defaults", reason);
            return defaults;
        }

        config
    }

    /// Checks that the warning marks are non-zero and in descending order,
    /// and that the tick interval is non-zero. Marks may exceed the session
    /// length; the countdown then skips those warnings.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_length_secs == 0 {
            return Err("session length must be greater than zero".to_string());
        }
        if self.five_minute_mark_secs >= self.ten_minute_mark_secs {
            return Err(format!(
                "five minute mark {} must be below ten minute mark {}",
                self.five_minute_mark_secs, self.ten_minute_mark_secs
            ));
        }
        if self.five_minute_mark_secs == 0 {
            return Err("five minute mark must be greater than zero".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick interval must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn network_warning_cooldown(&self) -> Duration {
        Duration::from_millis(self.network_warning_cooldown_ms)
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparsable value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
