//! Typing Animation Driver
//!
//! Reveals an already-complete assistant message a little at a time so the
//! reply appears to stream in. Each animation runs as its own task; stopping
//! it, starting another one, or dropping the driver aborts the task and
//! shows the full text of the message that was animating.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::{ChatEvent, EventBus};

/// How fast text is revealed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingSpeed {
    /// No animation, reveal at once
    Instant,
    /// Same tick for every message
    Fixed(Duration),
    /// Spread the reveal over `budget`, keeping the tick within bounds
    Scaled {
        /// Target duration of the whole reveal
        budget: Duration,
        /// Shortest tick (long messages)
        min_tick: Duration,
        /// Longest tick (short messages)
        max_tick: Duration,
    },
}

impl TypingSpeed {
    /// Fixed tick from a millisecond setting; zero means no animation
    #[must_use]
    pub fn from_tick_ms(ms: u64) -> Self {
        if ms == 0 {
            Self::Instant
        } else {
            Self::Fixed(Duration::from_millis(ms))
        }
    }

    /// Tick for a reveal of `steps` steps; `None` means reveal at once
    ///
    /// A zero tick also reveals at once.
    #[must_use]
    pub fn tick_for(&self, steps: usize) -> Option<Duration> {
        if steps == 0 {
            return None;
        }
        let tick = match *self {
            Self::Instant => None,
            Self::Fixed(tick) => Some(tick),
            Self::Scaled {
                budget,
                min_tick,
                max_tick,
            } => {
                let steps = u32::try_from(steps).unwrap_or(u32::MAX);
                // max/min rather than clamp: clamp panics when min_tick > max_tick
                Some((budget / steps).max(min_tick).min(max_tick))
            }
        };
        tick.filter(|tick| !tick.is_zero())
    }
}

impl Default for TypingSpeed {
    fn default() -> Self {
        Self::Scaled {
            budget: Duration::from_secs(3),
            min_tick: Duration::from_millis(5),
            max_tick: Duration::from_millis(30),
        }
    }
}

/// Typing animation settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingConfig {
    /// Reveal speed
    pub speed: TypingSpeed,
    /// Characters revealed per tick
    pub chars_per_tick: usize,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            speed: TypingSpeed::default(),
            chars_per_tick: 1,
        }
    }
}

/// Message key → currently revealed prefix
///
/// Only messages still being revealed have an entry; a finished message is
/// removed and renders in full. Transient; never persisted.
#[derive(Clone, Debug, Default)]
pub struct DisplayedText {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl DisplayedText {
    /// Revealed prefix for `key`, if it is still being revealed
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    /// Text to render for a message: the revealed prefix, or all of it
    #[must_use]
    pub fn visible(&self, key: &str, full: &str) -> String {
        self.get(key).unwrap_or_else(|| full.to_string())
    }

    /// Number of messages mid-reveal
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no message is mid-reveal
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn set(&self, key: &str, text: String) {
        self.inner.lock().insert(key.to_string(), text);
    }

    fn finish(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    /// Forget every entry (e.g. when the conversation is replaced)
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

struct ActiveTyping {
    key: String,
    full: String,
    handle: JoinHandle<()>,
}

/// Drives one typing animation at a time
pub struct TypingAnimator {
    config: TypingConfig,
    displayed: DisplayedText,
    events: Option<EventBus>,
    active: Option<ActiveTyping>,
}

impl TypingAnimator {
    /// Create a driver
    #[must_use]
    pub fn new(config: TypingConfig) -> Self {
        Self {
            config,
            displayed: DisplayedText::default(),
            events: None,
            active: None,
        }
    }

    /// Publish progress as [`ChatEvent::Typing`]
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Shared view of the revealed text
    #[must_use]
    pub fn displayed(&self) -> &DisplayedText {
        &self.displayed
    }

    /// Whether an animation task is still running
    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Start revealing `full` under `key`
    ///
    /// Any animation already running is finished first.
    pub fn start(&mut self, key: impl Into<String>, full: impl Into<String>) {
        self.stop();

        let key = key.into();
        let full = full.into();
        let points = reveal_points(&full, self.config.chars_per_tick);

        let Some(tick) = self.config.speed.tick_for(points.len()) else {
            self.reveal(&key, &full);
            return;
        };

        self.displayed.set(&key, String::new());
        let handle = tokio::spawn(run_typing(
            key.clone(),
            full.clone(),
            points,
            tick,
            self.displayed.clone(),
            self.events.clone(),
        ));
        self.active = Some(ActiveTyping { key, full, handle });
    }

    /// Stop the running animation and reveal its full text
    ///
    /// Returns the key of the message that was animating.
    pub fn stop(&mut self) -> Option<String> {
        let active = self.active.take()?;
        let was_running = !active.handle.is_finished();
        active.handle.abort();
        if was_running {
            tracing::debug!(key = %active.key, "Typing animation interrupted");
        }
        self.reveal(&active.key, &active.full);
        Some(active.key)
    }

    fn reveal(&self, key: &str, full: &str) {
        self.displayed.finish(key);
        if let Some(ref events) = self.events {
            events.emit(ChatEvent::Typing {
                key: key.to_string(),
                revealed: full.to_string(),
                done: true,
            });
        }
    }
}

impl Drop for TypingAnimator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_typing(
    key: String,
    full: String,
    points: Vec<usize>,
    tick: Duration,
    displayed: DisplayedText,
    events: Option<EventBus>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let total = points.len();
    for (step, end) in points.into_iter().enumerate() {
        interval.tick().await;
        let revealed = full[..end].to_string();
        let done = step + 1 == total;
        if done {
            displayed.finish(&key);
        } else {
            displayed.set(&key, revealed.clone());
        }
        if let Some(ref events) = events {
            events.emit(ChatEvent::Typing {
                key: key.clone(),
                revealed,
                done,
            });
        }
    }
}

/// Byte offsets at which the revealed prefix ends after each tick
fn reveal_points(text: &str, chars_per_tick: usize) -> Vec<usize> {
    let per_tick = chars_per_tick.max(1);
    let mut points: Vec<usize> = text
        .char_indices()
        .map(|(idx, _)| idx)
        .skip(1)
        .chain(std::iter::once(text.len()))
        .enumerate()
        .filter(|(n, _)| (n + 1) % per_tick == 0)
        .map(|(_, end)| end)
        .collect();
    if !text.is_empty() && points.last() != Some(&text.len()) {
        points.push(text.len());
    }
    points
}
