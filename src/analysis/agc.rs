//! Auto gain control.
//!
//! A rate-limited proportional controller: it compares a measured luminance
//! with a target and nudges the camera's exposure controls, walking an
//! ordered chain of effects. When the first effect reaches the end of its
//! range the next one takes over.

use super::histogram::Histogram;
use crate::capture::{CameraControls, ConfigError, FrameInfo};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Where the controller gets its luminance measurement from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgcMode {
    /// Control disabled.
    #[default]
    None,
    /// Average luminance reported by the camera in its chunk headers.
    ProvidedAverage,
    /// Luminance histogram of the decoded image.
    Histogram,
}

/// A camera control the controller may adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgcEffect {
    Gain,
    Offset,
    Shutter,
    Brightness,
}

impl AgcEffect {
    /// Reads the control's current value in `[0, 1]`.
    pub fn read(self, controls: &dyn CameraControls) -> f32 {
        match self {
            Self::Gain => controls.gain(),
            Self::Offset => controls.offset(),
            Self::Shutter => controls.shutter(),
            Self::Brightness => controls.brightness(),
        }
    }

    /// Writes the control, clamped to `[0, 1]`.
    pub fn write(self, controls: &dyn CameraControls, value: f32) {
        let value = value.clamp(0.0, 1.0);
        match self {
            Self::Gain => controls.set_gain(value),
            Self::Offset => controls.set_offset(value),
            Self::Shutter => controls.set_shutter(value),
            Self::Brightness => controls.set_brightness(value),
        }
    }

    /// Fast effects have no visible flicker and may be updated more often.
    pub fn is_fast(self) -> bool {
        matches!(self, Self::Brightness | Self::Offset)
    }
}

/// Which histogram statistic is compared against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgcMeasure {
    #[default]
    Median,
    Centroid,
}

/// Auto gain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcConfig {
    pub mode: AgcMode,
    /// Luminance to converge to.
    pub target: u8,
    /// Dead band around the target.
    pub delta: u8,
    /// Effects in priority order.
    pub effects: Vec<AgcEffect>,
    pub measure: AgcMeasure,
    /// Minimum time between updates after adjusting a fast effect.
    pub fast_update_ms: u64,
    /// Minimum time between updates otherwise.
    pub slow_update_ms: u64,
    /// Largest change applied to a control in one update.
    pub max_step: f32,
    /// Control change per unit of normalized luminance error.
    pub proportional: f32,
    /// Derive the target from the brightness control.
    pub brightness_tracking: bool,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            mode: AgcMode::None,
            target: 128,
            delta: 8,
            effects: vec![AgcEffect::Gain, AgcEffect::Shutter, AgcEffect::Brightness],
            measure: AgcMeasure::Median,
            fast_update_ms: 100,
            slow_update_ms: 500,
            max_step: 0.1,
            proportional: 0.5,
            brightness_tracking: false,
        }
    }
}

impl AgcConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != AgcMode::None && self.effects.is_empty() {
            return Err(ConfigError::InvalidAgc("no effects to adjust".into()));
        }
        if !(self.max_step > 0.0 && self.max_step <= 1.0) {
            return Err(ConfigError::InvalidAgc(format!(
                "max_step {} outside (0, 1]",
                self.max_step
            )));
        }
        if !(self.proportional > 0.0) {
            return Err(ConfigError::InvalidAgc(format!(
                "proportional {} must be positive",
                self.proportional
            )));
        }
        for (i, effect) in self.effects.iter().enumerate() {
            if self.effects[..i].contains(effect) {
                return Err(ConfigError::InvalidAgc(format!("{effect:?} listed twice")));
            }
        }
        Ok(())
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgcState {
    Disabled,
    /// The first effect in the chain has headroom.
    Tracking,
    /// Earlier effects are at their limits; the carried effect is in control.
    /// With every effect at its limit it names the last one.
    Saturated(AgcEffect),
}

/// One control change made by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgcAdjustment {
    pub effect: AgcEffect,
    pub from: f32,
    pub to: f32,
}

/// Auto gain controller, owned by the decode thread.
#[derive(Debug)]
pub struct Agc {
    config: AgcConfig,
    state: AgcState,
    last_update: Option<Instant>,
    last_effect: Option<AgcEffect>,
}

impl Agc {
    pub fn new(config: AgcConfig) -> Self {
        let state = if config.mode == AgcMode::None {
            AgcState::Disabled
        } else {
            AgcState::Tracking
        };
        Self {
            config,
            state,
            last_update: None,
            last_effect: None,
        }
    }

    pub fn config(&self) -> &AgcConfig {
        &self.config
    }

    pub fn state(&self) -> AgcState {
        self.state
    }

    pub fn set_mode(&mut self, mode: AgcMode) {
        self.config.mode = mode;
        self.state = if mode == AgcMode::None {
            AgcState::Disabled
        } else {
            AgcState::Tracking
        };
        self.last_update = None;
    }

    pub fn set_target(&mut self, target: u8) {
        self.config.target = target;
    }

    pub fn set_brightness_tracking(&mut self, on: bool) {
        self.config.brightness_tracking = on;
    }

    /// Follows the brightness control with the target, if tracking is on.
    pub fn track_brightness(&mut self, brightness: f32) {
        if self.config.brightness_tracking {
            self.config.target = (brightness.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }

    /// Interval that must pass before the next update.
    fn interval(&self) -> Duration {
        match self.last_effect {
            Some(effect) if effect.is_fast() => Duration::from_millis(self.config.fast_update_ms),
            _ => Duration::from_millis(self.config.slow_update_ms),
        }
    }

    pub fn update(
        &mut self,
        histogram: &Histogram,
        info: &FrameInfo,
        controls: &dyn CameraControls,
    ) -> Option<AgcAdjustment> {
        self.update_at(Instant::now(), histogram, info, controls)
    }

    /// Runs one control step if the update interval has elapsed.
    ///
    /// `histogram` must already hold the current image.
    pub fn update_at(
        &mut self,
        now: Instant,
        histogram: &Histogram,
        info: &FrameInfo,
        controls: &dyn CameraControls,
    ) -> Option<AgcAdjustment> {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < self.interval() {
                return None;
            }
        }

        let current = match self.config.mode {
            AgcMode::None => return None,
            AgcMode::ProvidedAverage => info.average_luminance?,
            AgcMode::Histogram => {
                let stats = histogram.calculate_statistics();
                if stats.total == 0 {
                    return None;
                }
                match self.config.measure {
                    AgcMeasure::Median => stats.median,
                    AgcMeasure::Centroid => stats.centroid,
                }
            }
        };
        self.last_update = Some(now);

        if self.config.brightness_tracking {
            self.track_brightness(controls.brightness());
        }
        self.apply(current, controls)
    }

    /// Compares `current` with the target and adjusts one control.
    pub fn apply(&mut self, current: u8, controls: &dyn CameraControls) -> Option<AgcAdjustment> {
        if self.config.mode == AgcMode::None {
            self.state = AgcState::Disabled;
            return None;
        }

        let error = i32::from(self.config.target) - i32::from(current);
        if error.unsigned_abs() <= u32::from(self.config.delta) {
            return None;
        }

        let step = (error as f32 / 255.0 * self.config.proportional)
            .clamp(-self.config.max_step, self.config.max_step);

        let tracking = self.config.brightness_tracking;
        let chain = self
            .config
            .effects
            .iter()
            .copied()
            .filter(|&effect| !(tracking && effect == AgcEffect::Brightness));

        let mut last = None;
        for (position, effect) in chain.enumerate() {
            last = Some(effect);
            let from = effect.read(controls);
            let headroom = if step > 0.0 { from < 1.0 } else { from > 0.0 };
            if !headroom {
                continue;
            }

            let to = (from + step).clamp(0.0, 1.0);
            effect.write(controls, to);
            self.last_effect = Some(effect);
            self.state = if position == 0 {
                AgcState::Tracking
            } else {
                AgcState::Saturated(effect)
            };
            tracing::debug!(?effect, from, to, current, target = self.config.target, "AGC step");
            return Some(AgcAdjustment { effect, from, to });
        }

        if let Some(effect) = last {
            if self.state != AgcState::Saturated(effect) {
                tracing::debug!(?effect, "AGC saturated on every effect");
            }
            self.state = AgcState::Saturated(effect);
        }
        None
    }
}
