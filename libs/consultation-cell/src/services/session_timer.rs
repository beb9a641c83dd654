// libs/consultation-cell/src/services/session_timer.rs
use shared_config::ConsultationConfig;

use crate::models::{CountdownWarning, WarningFlags};

/// Consultation countdown with one-shot threshold warnings.
///
/// `remaining_seconds` never increases and clamps at zero. Reaching zero
/// only raises the time-up warning; ending the call stays a user action.
#[derive(Debug, Clone)]
pub struct SessionTimer {
    remaining_seconds: u32,
    ten_minute_mark: u32,
    five_minute_mark: u32,
    flags: WarningFlags,
}

impl SessionTimer {
    pub fn new(length_secs: u32, ten_minute_mark: u32, five_minute_mark: u32) -> Self {
        Self {
            remaining_seconds: length_secs,
            ten_minute_mark,
            five_minute_mark,
            flags: WarningFlags::default(),
        }
    }

    pub fn from_config(config: &ConsultationConfig) -> Self {
        Self::new(
            config.session_length_secs,
            config.ten_minute_mark_secs,
            config.five_minute_mark_secs,
        )
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn flags(&self) -> WarningFlags {
        self.flags
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_seconds == 0
    }

    /// Advances the countdown by one second.
    pub fn tick(&mut self) -> Option<CountdownWarning> {
        let previous = self.remaining_seconds;
        self.remaining_seconds = previous.saturating_sub(1);
        let current = self.remaining_seconds;

        if current == 0 && self.flags.set_once(CountdownWarning::TimeUp) {
            return Some(CountdownWarning::TimeUp);
        }
        if previous > self.five_minute_mark
            && current <= self.five_minute_mark
            && self.flags.set_once(CountdownWarning::FiveMinutes)
        {
            return Some(CountdownWarning::FiveMinutes);
        }
        if previous > self.ten_minute_mark
            && current <= self.ten_minute_mark
            && self.flags.set_once(CountdownWarning::TenMinutes)
        {
            return Some(CountdownWarning::TenMinutes);
        }
        None
    }
}
