// libs/consultation-cell/src/services/network_quality.rs
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{NetworkQualitySample, Notification};

pub const NETWORK_WARNING_KEY: &str = "network-quality";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityWarning {
    pub delay_ms: u32,
    pub observed_at: DateTime<Utc>,
}

impl QualityWarning {
    pub fn notification(&self) -> Notification {
        Notification::warning(format!(
            "Poor network connection detected ({} ms delay). Video quality may be affected",
            self.delay_ms
        ))
        .with_key(NETWORK_WARNING_KEY)
    }
}

#[derive(Default)]
struct MonitorState {
    last_warning_at: Option<DateTime<Utc>>,
    latest: Option<NetworkQualitySample>,
}

/// Raises at most one degraded-network warning per cooldown window.
pub struct NetworkQualityMonitor {
    delay_threshold_ms: u32,
    cooldown: Duration,
    state: Mutex<MonitorState>,
}

impl NetworkQualityMonitor {
    pub fn new(delay_threshold_ms: u32, cooldown: Duration) -> Self {
        Self {
            delay_threshold_ms,
            cooldown,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Records the sample and returns a warning if it breaches the threshold
    /// and the cooldown since the previous warning has fully elapsed.
    pub async fn observe(&self, sample: NetworkQualitySample) -> Option<QualityWarning> {
        let mut state = self.state.lock().await;
        state.latest = Some(sample);

        if sample.delay_ms <= self.delay_threshold_ms {
            return None;
        }

        let cooled_down = match state.last_warning_at {
            None => true,
            Some(last) => (sample.observed_at - last)
                .to_std()
                .map(|elapsed| elapsed > self.cooldown)
                .unwrap_or(false),
        };

        if !cooled_down {
            debug!(
                "Suppressing network warning ({} ms), still in cooldown",
                sample.delay_ms
            );
            return None;
        }

        state.last_warning_at = Some(sample.observed_at);
        warn!("Network delay {} ms exceeds {} ms", sample.delay_ms, self.delay_threshold_ms);

        Some(QualityWarning {
            delay_ms: sample.delay_ms,
            observed_at: sample.observed_at,
        })
    }

    pub async fn latest_sample(&self) -> Option<NetworkQualitySample> {
        self.state.lock().await.latest
    }

    pub async fn last_warning_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_warning_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64, delay_ms: u32) -> NetworkQualitySample {
        NetworkQualitySample {
            delay_ms,
            observed_at: Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap(),
        }
    }

    fn monitor() -> NetworkQualityMonitor {
        NetworkQualityMonitor::new(300, Duration::from_millis(60_000))
    }

    #[tokio::test]
    async fn test_cooldown_scenario() {
        let monitor = monitor();

        let first = monitor.observe(at(0, 350)).await;
        let second = monitor.observe(at(10, 400)).await;
        let third = monitor.observe(at(65, 320)).await;

        assert_eq!(first.map(|w| w.delay_ms), Some(350));
        assert!(second.is_none());
        assert_eq!(third.map(|w| w.observed_at), Some(at(65, 320).observed_at));
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let monitor = monitor();
        assert!(monitor.observe(at(0, 300)).await.is_none());
        assert!(monitor.observe(at(1, 301)).await.is_some());
    }

    #[tokio::test]
    async fn test_exact_cooldown_boundary_is_suppressed() {
        let monitor = monitor();
        assert!(monitor.observe(at(0, 500)).await.is_some());
        assert!(monitor.observe(at(60, 500)).await.is_none());
        assert!(monitor.observe(at(61, 500)).await.is_some());
    }

    #[tokio::test]
    async fn test_sustained_breach_warns_once_per_window() {
        let monitor = monitor();
        let mut warnings = Vec::new();

        // one sample every 2 seconds for five minutes
        for second in (0..300).step_by(2) {
            if let Some(warning) = monitor.observe(at(second, 900)).await {
                warnings.push(warning.observed_at);
            }
        }

        assert_eq!(warnings.len(), 5);
        for pair in warnings.windows(2) {
            assert!((pair[1] - pair[0]).num_milliseconds() > 60_000);
        }
    }

    #[tokio::test]
    async fn test_healthy_samples_are_retained_without_warning() {
        let monitor = monitor();
        assert!(monitor.observe(at(0, 40)).await.is_none());

        assert_eq!(monitor.latest_sample().await, Some(at(0, 40)));
        assert!(monitor.last_warning_at().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_samples_raise_single_warning() {
        let monitor = std::sync::Arc::new(monitor());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move { monitor.observe(at(5, 800)).await }));
        }

        let mut raised = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
    }

    #[test]
    fn test_warning_notification_is_keyed() {
        let warning = QualityWarning {
            delay_ms: 420,
            observed_at: Utc::now(),
        };
        let notification = warning.notification();
        assert_eq!(notification.dedup_key.as_deref(), Some(NETWORK_WARNING_KEY));
        assert!(notification.message.contains("420"));
    }
}
