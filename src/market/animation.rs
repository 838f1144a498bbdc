use crate::market::types::Candle;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationFrame {
    pub candle: Candle,
    pub progress: f64,
    pub step: u32,
    pub steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationSettings {
    pub step_count: u32,
    pub total_duration: Duration,
}

impl AnimationSettings {
    pub fn new(step_count: u32, total_duration: Duration) -> Self {
        Self {
            step_count: step_count.max(1),
            total_duration,
        }
    }

    pub fn step_interval(&self) -> Duration {
        self.total_duration / self.step_count.max(1)
    }
}

/// Linear interpolation of high/low/close/volume; everything else is taken
/// from `target`. Progress is clamped to [0, 1] and 1.0 yields `target` exactly.
pub fn interpolate(start: &Candle, target: &Candle, progress: f64) -> Candle {
    let progress = if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    };
    if progress >= 1.0 {
        return target.clone();
    }

    let lerp = |from: f64, to: f64| from + (to - from) * progress;
    Candle {
        high: lerp(start.high, target.high),
        low: lerp(start.low, target.low),
        close: lerp(start.close, target.close),
        volume: lerp(start.volume, target.volume),
        ..target.clone()
    }
}

#[derive(Debug)]
struct AnimationSequence {
    start: Candle,
    target: Candle,
    steps: u32,
    next_step: u32,
    token: CancellationToken,
}

impl AnimationSequence {
    fn frame(&self, step: u32) -> AnimationFrame {
        let candle = if step >= self.steps {
            self.target.clone()
        } else {
            interpolate(
                &self.start,
                &self.target,
                f64::from(step) / f64::from(self.steps),
            )
        };
        AnimationFrame {
            candle,
            progress: f64::from(step.min(self.steps)) / f64::from(self.steps),
            step,
            steps: self.steps,
        }
    }

    /// Final frame of a sequence whose bucket has since been closed.
    fn closing_frame(&self) -> AnimationFrame {
        AnimationFrame {
            candle: Candle {
                is_closed: true,
                ..self.target.clone()
            },
            progress: 1.0,
            step: self.steps,
            steps: self.steps,
        }
    }
}

/// Produces the frames between the last rendered candle and the newest
/// consolidated one. A sequence superseded mid-flight restarts from whatever
/// was rendered last, never from the superseded sequence's start. When the
/// superseding target belongs to a later bucket, the abandoned bucket still
/// gets its final frame before the new sequence starts.
#[derive(Debug)]
pub struct Animator {
    settings: AnimationSettings,
    sequence: Option<AnimationSequence>,
    closing: VecDeque<AnimationFrame>,
    last_rendered: Option<Candle>,
}

impl Animator {
    pub fn new(settings: AnimationSettings) -> Self {
        Self {
            settings,
            sequence: None,
            closing: VecDeque::new(),
            last_rendered: None,
        }
    }

    pub fn settings(&self) -> AnimationSettings {
        self.settings
    }

    pub fn step_interval(&self) -> Duration {
        self.settings.step_interval()
    }

    pub fn is_in_flight(&self) -> bool {
        !self.closing.is_empty() || self.active_sequence().is_some()
    }

    fn active_sequence(&self) -> Option<&AnimationSequence> {
        self.sequence
            .as_ref()
            .filter(|sequence| !sequence.token.is_cancelled())
    }

    pub fn last_rendered(&self) -> Option<&Candle> {
        self.last_rendered.as_ref()
    }

    /// Token of the in-flight sequence, cancelled when it is superseded.
    pub fn current_token(&self) -> Option<CancellationToken> {
        self.sequence.as_ref().map(|sequence| sequence.token.clone())
    }

    /// Starts animating towards `target`, abandoning any in-flight sequence.
    /// Returns true when an in-flight sequence was superseded.
    pub fn start(&mut self, target: Candle) -> bool {
        let closing = self
            .active_sequence()
            .filter(|sequence| sequence.target.bucket_start != target.bucket_start)
            .map(AnimationSequence::closing_frame);
        let superseded = self.active_sequence().is_some();
        if let Some(sequence) = self.sequence.take() {
            sequence.token.cancel();
        }
        self.closing.extend(closing);

        let (start, steps) = match self.last_rendered.as_ref() {
            Some(rendered) if rendered.bucket_start == target.bucket_start => {
                (rendered.clone(), self.settings.step_count)
            }
            _ => (target.clone(), 1),
        };

        self.sequence = Some(AnimationSequence {
            start,
            target,
            steps,
            next_step: 1,
            token: CancellationToken::new(),
        });
        superseded
    }

    /// Emits the next frame of the in-flight sequence and records it as
    /// rendered. The sequence ends after its final frame.
    pub fn next_frame(&mut self) -> Option<AnimationFrame> {
        if let Some(frame) = self.closing.pop_front() {
            self.last_rendered = Some(frame.candle.clone());
            return Some(frame);
        }

        let sequence = self.sequence.as_mut()?;
        if sequence.token.is_cancelled() {
            self.sequence = None;
            return None;
        }

        let frame = sequence.frame(sequence.next_step);
        sequence.next_step = sequence.next_step.saturating_add(1);
        if frame.step >= sequence.steps {
            self.sequence = None;
        }
        self.last_rendered = Some(frame.candle.clone());
        Some(frame)
    }

    pub fn cancel(&mut self) {
        self.closing.clear();
        if let Some(sequence) = self.sequence.take() {
            sequence.token.cancel();
        }
    }

    /// Drops any in-flight sequence and treats `rendered` as what is on screen,
    /// used after the host received a full series bootstrap.
    pub fn reset(&mut self, rendered: Option<Candle>) {
        self.cancel();
        self.last_rendered = rendered;
    }
}
