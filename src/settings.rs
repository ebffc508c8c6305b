//! Runtime configuration.

use dasp_graph::Buffer;
use serde::Deserialize;

/// Audio settings of a [`Runtime`](crate::Runtime).
///
/// The block size is not configurable: every block is one
/// [`dasp_graph::Buffer`] (`Buffer::LEN` samples) per channel.
///
/// ```
/// use patchbay::Settings;
///
/// let settings = Settings::default().with_sample_rate(48000).with_channel_count(1);
/// assert_eq!(settings.channel_count, 1);
///
/// let parsed: Settings = serde_json::from_str(r#"{ "sample_rate": 48000 }"#).unwrap();
/// assert_eq!(parsed.channel_count, 2);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of output channels (`dac~` inlets)
    pub channel_count: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
        }
    }
}

impl Settings {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    /// Samples per block.
    #[inline]
    pub fn block_size(&self) -> usize {
        Buffer::LEN
    }

    /// Duration of one block in ms. Also the clock's lookahead window.
    #[inline]
    pub fn block_duration(&self) -> f64 {
        Buffer::LEN as f64 * 1000.0 / self.sample_rate as f64
    }
}
