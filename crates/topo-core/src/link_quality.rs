//! Link quality estimation
//!
//! Each neighbor keeps a short rolling history of the received signal
//! strength of its frames. From that history the estimator derives:
//!
//! - **Average RSS**: mean of the retained samples (dBm)
//! - **Link margin**: average RSS above the noise floor, clamped at zero (dB)
//! - **Link quality**: margin quantized into four bands, used for link cost
//!
//! The history is a ring: once full, each new sample evicts the oldest one.

use serde::{Deserialize, Serialize};

/// Number of RSS samples retained per neighbor
pub const HISTORY_DEPTH: usize = 8;

/// Default receiver noise floor (dBm)
pub const DEFAULT_NOISE_FLOOR: i8 = -100;

/// Link quality band, derived from link margin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LinkQuality {
    /// Unusable or unknown link
    #[default]
    Zero,
    /// Margin above 2 dB
    One,
    /// Margin above 10 dB
    Two,
    /// Margin above 20 dB
    Three,
}

impl LinkQuality {
    const THRESHOLD_ONE: u8 = 2;
    const THRESHOLD_TWO: u8 = 10;
    const THRESHOLD_THREE: u8 = 20;

    /// Quantize a link margin (dB) into a quality band
    pub fn from_margin(margin: u8) -> Self {
        if margin > Self::THRESHOLD_THREE {
            LinkQuality::Three
        } else if margin > Self::THRESHOLD_TWO {
            LinkQuality::Two
        } else if margin > Self::THRESHOLD_ONE {
            LinkQuality::One
        } else {
            LinkQuality::Zero
        }
    }

    /// Band as its numeric value (0-3)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Band from its numeric value, saturating above 3
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkQuality::Zero,
            1 => LinkQuality::One,
            2 => LinkQuality::Two,
            _ => LinkQuality::Three,
        }
    }

    /// Routing cost of a single hop at this quality
    pub fn cost(self) -> u8 {
        match self {
            LinkQuality::Three => 1,
            LinkQuality::Two => 2,
            LinkQuality::One => 4,
            LinkQuality::Zero => crate::router::COST_INFINITE,
        }
    }
}

/// Rolling RSS history and the metrics derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkQualityEstimator {
    samples: [i8; HISTORY_DEPTH],
    /// Next slot to write
    head: u8,
    /// Number of valid samples (saturates at HISTORY_DEPTH)
    count: u8,
    noise_floor: i8,
}

impl LinkQualityEstimator {
    /// Create an empty estimator against the given noise floor
    pub fn new(noise_floor: i8) -> Self {
        Self {
            samples: [0; HISTORY_DEPTH],
            head: 0,
            count: 0,
            noise_floor,
        }
    }

    /// Record the RSS of a received frame
    pub fn add_sample(&mut self, rss: i8) {
        self.samples[self.head as usize] = rss;
        self.head = ((self.head as usize + 1) % HISTORY_DEPTH) as u8;
        if (self.count as usize) < HISTORY_DEPTH {
            self.count += 1;
        }
    }

    /// Number of retained samples
    pub fn sample_count(&self) -> usize {
        self.count as usize
    }

    /// Iterate the retained samples, oldest first
    pub fn samples(&self) -> impl Iterator<Item = i8> + '_ {
        let count = self.count as usize;
        let start = (self.head as usize + HISTORY_DEPTH - count) % HISTORY_DEPTH;
        (0..count).map(move |i| self.samples[(start + i) % HISTORY_DEPTH])
    }

    /// Mean of the retained samples, `None` until a sample is recorded
    pub fn average_rss(&self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        let sum: i32 = self.samples().map(i32::from).sum();
        Some(sum as f32 / self.count as f32)
    }

    /// Average RSS above the noise floor, clamped at zero
    pub fn link_margin(&self) -> u8 {
        match self.average_rss() {
            Some(avg) => (avg - self.noise_floor as f32).round().clamp(0.0, u8::MAX as f32) as u8,
            None => 0,
        }
    }

    /// Quality band; the lowest band until a sample is recorded
    pub fn link_quality(&self) -> LinkQuality {
        LinkQuality::from_margin(self.link_margin())
    }

    /// Configured noise floor (dBm)
    pub fn noise_floor(&self) -> i8 {
        self.noise_floor
    }

    /// Forget all samples
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

impl Default for LinkQualityEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_FLOOR)
    }
}
