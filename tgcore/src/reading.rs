//! Human-like reading pace.

use crate::api::MessageContent;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fallback for content kinds without a specific cost.
pub const DEFAULT_READ_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanBehaviour {
    /// Mean seconds between read sessions.
    pub read_msg_frequency_mean: f64,
    pub read_msg_frequency_std_dev: f64,
    pub read_msg_min_wait_sec: f64,
    pub text_read_speed_wpm: f64,
    pub photo_read_speed_sec: f64,
}

impl Default for HumanBehaviour {
    fn default() -> Self {
        Self {
            read_msg_frequency_mean: 300.0,
            read_msg_frequency_std_dev: 120.0,
            read_msg_min_wait_sec: 30.0,
            text_read_speed_wpm: 230.0,
            photo_read_speed_sec: 3.0,
        }
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl HumanBehaviour {
    /// How long a person would spend on `content`.
    pub fn read_time(&self, content: &MessageContent) -> Duration {
        match content {
            MessageContent::MessageText { text } => self.text_time(&text.text),
            MessageContent::MessageVideo { video, .. } => seconds(f64::from(video.duration)),
            MessageContent::MessagePhoto { .. } => seconds(self.photo_read_speed_sec),
            _ => DEFAULT_READ_TIME,
        }
    }

    fn text_time(&self, text: &str) -> Duration {
        if self.text_read_speed_wpm <= 0.0 {
            return DEFAULT_READ_TIME;
        }
        let words = text.split_whitespace().count() as f64;
        seconds(words * 60.0 / self.text_read_speed_wpm)
    }

    /// Pause before the next read session: normally distributed around the
    /// configured mean, never below the configured minimum.
    pub fn next_activity_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let sample = self.read_msg_frequency_mean + self.read_msg_frequency_std_dev * standard_normal(rng);
        seconds(sample.max(self.read_msg_min_wait_sec))
    }
}

/// Box–Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // u1 in (0, 1] keeps ln() finite
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
