//! Microphone level feed and bar visualization
//!
//! A feed holds only the latest level sample of the active track. Consumers
//! poll it or turn it into a stream; a feed with no track behind it stays
//! silent.

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Create a connected sender/feed pair starting at silence
#[must_use]
pub fn level_channel() -> (LevelSender, LevelFeed) {
    let (tx, rx) = watch::channel(0.0);
    (LevelSender { tx }, LevelFeed { rx: Some(rx) })
}

/// Producer side, owned by whatever captures the audio
#[derive(Debug)]
pub struct LevelSender {
    tx: watch::Sender<f32>,
}

impl LevelSender {
    /// Publish a level in `0.0..=1.0`
    pub fn push(&self, level: f32) {
        let level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
        // Keep the value even with no receivers so later feeds start current
        self.tx.send_replace(level);
    }

    /// Publish the RMS level of a block of samples
    pub fn push_samples(&self, samples: &[f32]) {
        self.push(rms(samples));
    }

    /// Create another feed on this sender
    #[must_use]
    pub fn feed(&self) -> LevelFeed {
        LevelFeed {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Consumer side of a track's level samples
#[derive(Debug, Clone, Default)]
pub struct LevelFeed {
    rx: Option<watch::Receiver<f32>>,
}

impl LevelFeed {
    /// A feed with no track behind it
    #[must_use]
    pub const fn inert() -> Self {
        Self { rx: None }
    }

    /// Whether a track is feeding this level
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| rx.has_changed().is_ok())
    }

    /// Latest level, `0.0` when inert
    #[must_use]
    pub fn current(&self) -> f32 {
        self.rx.as_ref().map_or(0.0, |rx| *rx.borrow())
    }

    /// Wait for the next level sample
    ///
    /// Returns `None` when the feed is inert or the track ended.
    pub async fn next(&mut self) -> Option<f32> {
        let rx = self.rx.as_mut()?;
        match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        }
    }

    /// Stream of levels: the current value, then every change
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, f32> {
        match self.rx {
            Some(rx) => WatchStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

/// Root mean square of a block of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Maps a level to bar heights for a small visualizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarLevels {
    /// Number of bars
    pub bar_count: usize,
    /// Height of a silent bar
    pub min_height: f32,
    /// Height of a bar at full level
    pub max_height: f32,
}

impl Default for BarLevels {
    fn default() -> Self {
        Self {
            bar_count: 10,
            min_height: 3.0,
            max_height: 6.0,
        }
    }
}

impl BarLevels {
    /// Bar heights for `level`, tallest in the middle
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn heights(&self, level: f32) -> Vec<f32> {
        let level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = self.max_height - self.min_height;
        let center = (self.bar_count.saturating_sub(1)) as f32 / 2.0;

        (0..self.bar_count)
            .map(|i| {
                let distance = if center > 0.0 {
                    (i as f32 - center).abs() / center
                } else {
                    0.0
                };
                let weight = 1.0 - 0.5 * distance;
                self.min_height + span * level * weight
            })
            .collect()
    }
}
