#![forbid(unsafe_code)]

//! Time-based progress for layout transitions.
//!
//! A [`Tween`] accumulates elapsed time and reports eased progress in
//! `[0.0, 1.0]`. Item positions are blended with [`lerp`] while a
//! transition runs; the viewport crate ends the transition once the tween
//! is done.

use std::time::Duration;

/// Shape of the progress curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Easing {
    /// Constant velocity.
    Linear,
    /// Quadratic, decelerating into the target.
    #[default]
    EaseOut,
    /// Cubic, decelerating harder than [`Easing::EaseOut`].
    EaseOutCubic,
}

impl Easing {
    /// Map raw progress to eased progress. Input is clamped to `[0, 1]`.
    #[must_use]
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseOut => 1.0 - (1.0 - t).powi(2),
            Self::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
        }
    }
}

/// Blend `from` towards `to` by progress `t` (clamped).
#[inline]
#[must_use]
pub fn lerp(from: f64, to: f64, t: f32) -> f64 {
    from + (to - from) * f64::from(t.clamp(0.0, 1.0))
}

/// Eased progress over a fixed duration.
///
/// Elapsed time is a [`Duration`], so many small ticks sum exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    elapsed: Duration,
    duration: Duration,
    easing: Easing,
}

impl Tween {
    /// A tween over `duration`. A zero duration is done after any tick.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            elapsed: Duration::ZERO,
            duration: duration.max(Duration::from_nanos(1)),
            easing: Easing::default(),
        }
    }

    #[must_use]
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn advance(&mut self, dt: Duration) {
        self.elapsed = self.elapsed.saturating_add(dt);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Uneased share of the duration that has passed.
    #[must_use]
    pub fn raw_progress(&self) -> f32 {
        let t = self.elapsed.as_secs_f64() / self.duration.as_secs_f64();
        (t as f32).clamp(0.0, 1.0)
    }

    /// Eased progress in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.easing.apply(self.raw_progress())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easings_pin_both_ends() {
        for easing in [Easing::Linear, Easing::EaseOut, Easing::EaseOutCubic] {
            assert_eq!(easing.apply(-1.0), 0.0);
            assert_eq!(easing.apply(0.0), 0.0);
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-6);
            assert!(easing.apply(0.5) >= 0.5);
        }
    }

    #[test]
    fn tween_reaches_end() {
        let mut tween = Tween::new(Duration::from_millis(300)).with_easing(Easing::Linear);
        assert_eq!(tween.progress(), 0.0);
        tween.advance(Duration::from_millis(100));
        assert!((tween.progress() - 1.0 / 3.0).abs() < 1e-3);
        assert!(!tween.is_done());
        tween.advance(Duration::from_millis(300));
        assert!(tween.is_done());
        assert_eq!(tween.progress(), 1.0);
    }

    #[test]
    fn zero_duration_finishes_on_first_advance() {
        let mut tween = Tween::new(Duration::ZERO);
        assert!(!tween.is_done());
        tween.advance(Duration::from_nanos(1));
        assert!(tween.is_done());
    }

    #[test]
    fn lerp_blends_positions() {
        assert_eq!(lerp(-100.0, -130.0, 0.0), -100.0);
        assert_eq!(lerp(-100.0, -130.0, 1.0), -130.0);
        assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
        assert_eq!(lerp(0.0, 10.0, 7.0), 10.0);
    }
}
