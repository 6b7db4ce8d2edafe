use glam::Vec3;
use smallvec::SmallVec;
use std::fmt;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlayState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayState::Stopped => "STOPPED",
            PlayState::Playing => "PLAYING",
            PlayState::Paused => "PAUSED",
        }
    }

    pub fn parse(value: &str) -> ApiResult<Self> {
        match value.to_ascii_uppercase().as_str() {
            "STOPPED" => Ok(PlayState::Stopped),
            "PLAYING" => Ok(PlayState::Playing),
            "PAUSED" => Ok(PlayState::Paused),
            other => Err(ApiError::invalid(format!("invalid play state '{other}'"))),
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Once,
    Loop,
    Hold,
}

impl LoopMode {
    /// Lenient parse; anything unrecognised plays once.
    pub fn from_str(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "LOOP" => LoopMode::Loop,
            "HOLD" => LoopMode::Hold,
            _ => LoopMode::Once,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoopMode::Once => "ONCE",
            LoopMode::Loop => "LOOP",
            LoopMode::Hold => "HOLD",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: Vec3,
}

#[derive(Clone, Debug)]
pub struct Vec3Curve {
    pub interpolation: Interpolation,
    pub keyframes: Vec<Keyframe>,
}

impl Vec3Curve {
    pub fn new(interpolation: Interpolation, keyframes: Vec<Keyframe>) -> Self {
        Self { interpolation, keyframes }
    }

    pub fn sample(&self, time: f32) -> Vec3 {
        let frames = self.keyframes.as_slice();
        let Some(first) = frames.first() else {
            return Vec3::ZERO;
        };
        if frames.len() == 1 || time.is_nan() || time <= first.time {
            return first.value;
        }
        let last = frames[frames.len() - 1];
        if time >= last.time {
            return last.value;
        }
        let next = frames.partition_point(|frame| frame.time <= time);
        let start = frames[next - 1];
        let end = frames[next];
        match self.interpolation {
            Interpolation::Step => start.value,
            Interpolation::Linear => {
                let span = (end.time - start.time).max(f32::EPSILON);
                let t = ((time - start.time) / span).clamp(0.0, 1.0);
                start.value.lerp(end.value, t)
            }
        }
    }
}

/// Keyframed motion of one model part within a track.
#[derive(Clone, Debug)]
pub struct PartChannel {
    pub part: usize,
    pub position: Option<Vec3Curve>,
    pub rotation: Option<Vec3Curve>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelSample {
    pub position: Option<Vec3>,
    pub rotation: Option<Vec3>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Fade {
    Steady,
    In,
    Out,
}

/// One independently timed, independently controlled timeline.
#[derive(Clone, Debug)]
pub struct AnimationTrack {
    name: String,
    state: PlayState,
    loop_mode: LoopMode,
    length: f32,
    elapsed: f32,
    speed: f32,
    inverted: bool,
    start_offset: f32,
    start_delay: f32,
    loop_delay: f32,
    blend_weight: f32,
    blend_time: f32,
    override_base: bool,
    replace: bool,
    priority: i32,
    delay_remaining: f32,
    gap_remaining: f32,
    fade: Fade,
    blend_factor: f32,
    finished: bool,
    channels: SmallVec<[PartChannel; 4]>,
}

impl AnimationTrack {
    pub fn new(name: impl Into<String>, length: f32) -> Self {
        Self {
            name: name.into(),
            state: PlayState::Stopped,
            loop_mode: LoopMode::Once,
            length: sanitize_non_negative(length),
            elapsed: 0.0,
            speed: 1.0,
            inverted: false,
            start_offset: 0.0,
            start_delay: 0.0,
            loop_delay: 0.0,
            blend_weight: 1.0,
            blend_time: 0.0,
            override_base: false,
            replace: false,
            priority: 0,
            delay_remaining: 0.0,
            gap_remaining: 0.0,
            fade: Fade::Steady,
            blend_factor: 0.0,
            finished: false,
            channels: SmallVec::new(),
        }
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = PartChannel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> &[PartChannel] {
        &self.channels
    }

    pub fn touches(&self, part: usize) -> bool {
        self.channels.iter().any(|channel| channel.part == part)
    }

    pub fn play_state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn play(&mut self) {
        match self.state {
            PlayState::Playing => {}
            PlayState::Paused => self.state = PlayState::Playing,
            PlayState::Stopped => {
                self.state = PlayState::Playing;
                self.delay_remaining = self.start_delay;
                self.gap_remaining = 0.0;
                self.finished = false;
                if self.blend_time > 0.0 {
                    if self.fade != Fade::Out {
                        self.blend_factor = 0.0;
                    }
                    self.fade = Fade::In;
                } else {
                    self.blend_factor = 1.0;
                    self.fade = Fade::Steady;
                }
            }
        }
    }

    /// Plays only when not already playing.
    pub fn start(&mut self) {
        if !self.is_playing() {
            self.play();
        }
    }

    pub fn pause(&mut self) {
        if self.state == PlayState::Playing {
            self.state = PlayState::Paused;
        }
    }

    /// Stops without rewinding; fades out over the blend time when one is set.
    pub fn stop(&mut self) {
        let was_playing = self.state == PlayState::Playing;
        self.state = PlayState::Stopped;
        self.delay_remaining = 0.0;
        self.gap_remaining = 0.0;
        if was_playing && self.blend_time > 0.0 && self.blend_factor > 0.0 {
            self.fade = Fade::Out;
        } else {
            self.fade = Fade::Steady;
            self.blend_factor = 0.0;
        }
    }

    /// Stops and rewinds to zero immediately.
    pub fn cease(&mut self) {
        self.state = PlayState::Stopped;
        self.elapsed = 0.0;
        self.delay_remaining = 0.0;
        self.gap_remaining = 0.0;
        self.fade = Fade::Steady;
        self.blend_factor = 0.0;
        self.finished = false;
    }

    pub fn set_play_state(&mut self, state: PlayState) {
        match state {
            PlayState::Playing => self.play(),
            PlayState::Paused => {
                if self.state == PlayState::Stopped {
                    self.play();
                }
                self.pause();
            }
            PlayState::Stopped => self.stop(),
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        self.elapsed = self.bounded(self.elapsed);
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn set_length(&mut self, length: f32) {
        self.length = sanitize_non_negative(length);
        self.elapsed = self.bounded(self.elapsed);
    }

    /// Signed speed; negative while inverted.
    pub fn speed(&self) -> f32 {
        if self.inverted {
            -self.speed
        } else {
            self.speed
        }
    }

    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            return;
        }
        self.speed = speed.abs();
        self.inverted = speed < 0.0;
    }

    pub fn inverted(&self) -> bool {
        self.inverted
    }

    pub fn start_offset(&self) -> f32 {
        self.start_offset
    }

    pub fn set_start_offset(&mut self, offset: f32) {
        if offset.is_finite() {
            self.start_offset = offset;
        }
    }

    pub fn start_delay(&self) -> f32 {
        self.start_delay
    }

    pub fn set_start_delay(&mut self, delay: f32) {
        self.start_delay = sanitize_non_negative(delay);
    }

    pub fn loop_delay(&self) -> f32 {
        self.loop_delay
    }

    pub fn set_loop_delay(&mut self, delay: f32) {
        self.loop_delay = sanitize_non_negative(delay);
    }

    pub fn blend_weight(&self) -> f32 {
        self.blend_weight
    }

    pub fn set_blend_weight(&mut self, weight: f32) {
        if weight.is_finite() {
            self.blend_weight = weight;
        }
    }

    pub fn blend_time(&self) -> f32 {
        self.blend_time
    }

    pub fn set_blend_time(&mut self, seconds: f32) {
        self.blend_time = sanitize_non_negative(seconds);
    }

    pub fn override_base(&self) -> bool {
        self.override_base
    }

    pub fn set_override(&mut self, value: bool) {
        self.override_base = value;
    }

    pub fn replace(&self) -> bool {
        self.replace
    }

    pub fn set_replace(&mut self, value: bool) {
        self.replace = value;
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// True while the track takes part in composition: playing, or fading out after a stop.
    pub fn is_contributing(&self) -> bool {
        self.state == PlayState::Playing || (self.fade == Fade::Out && self.blend_factor > 0.0)
    }

    /// Crossfade ramp in `[0, 1]`.
    pub fn blend_factor(&self) -> f32 {
        match self.fade {
            Fade::Steady if self.state == PlayState::Playing => 1.0,
            Fade::Steady => 0.0,
            Fade::In | Fade::Out => self.blend_factor.clamp(0.0, 1.0),
        }
    }

    /// Blend weight scaled by the crossfade ramp.
    pub fn effective_weight(&self) -> f32 {
        self.blend_weight * self.blend_factor()
    }

    /// Set once when a `Once` run reaches its boundary; cleared by the read.
    pub fn take_finished(&mut self) -> bool {
        std::mem::take(&mut self.finished)
    }

    pub fn advance(&mut self, dt: f32) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        if self.state != PlayState::Playing {
            self.advance_fade(dt);
            return;
        }

        let mut budget = dt;
        if self.delay_remaining > 0.0 {
            let used = budget.min(self.delay_remaining);
            self.delay_remaining -= used;
            budget -= used;
        }
        // The fade-in ramp waits for the start delay.
        self.advance_fade(budget);
        if self.length <= 0.0 {
            self.elapsed = 0.0;
            return;
        }
        if budget <= 0.0 || self.speed <= 0.0 {
            return;
        }

        let direction = if self.inverted { -1.0 } else { 1.0 };
        match self.loop_mode {
            LoopMode::Once => {
                let next = self.elapsed + budget * self.speed * direction;
                if next >= self.length || (next <= 0.0 && self.inverted) {
                    self.elapsed = next.clamp(0.0, self.length);
                    self.finish_once();
                } else {
                    self.elapsed = next.clamp(0.0, self.length);
                }
            }
            LoopMode::Hold => {
                self.elapsed = (self.elapsed + budget * self.speed * direction).clamp(0.0, self.length);
            }
            LoopMode::Loop if self.loop_delay <= 0.0 => {
                // Step reduced modulo length in f64; the raw f32 product can overflow.
                let length = f64::from(self.length);
                let step = (f64::from(budget) * f64::from(self.speed)).rem_euclid(length) * f64::from(direction);
                self.elapsed = ((f64::from(self.elapsed) + step).rem_euclid(length)) as f32;
                if self.elapsed >= self.length {
                    self.elapsed = 0.0;
                }
            }
            LoopMode::Loop => self.advance_loop_with_gap(budget, direction),
        }
    }

    fn advance_fade(&mut self, dt: f32) {
        if self.blend_time <= 0.0 {
            if self.fade == Fade::Out {
                self.blend_factor = 0.0;
            }
            self.fade = Fade::Steady;
            return;
        }
        let step = dt / self.blend_time;
        match self.fade {
            Fade::In if self.state == PlayState::Playing => {
                self.blend_factor = (self.blend_factor + step).min(1.0);
                if self.blend_factor >= 1.0 {
                    self.fade = Fade::Steady;
                }
            }
            Fade::Out => {
                self.blend_factor = (self.blend_factor - step).max(0.0);
                if self.blend_factor <= 0.0 {
                    self.fade = Fade::Steady;
                }
            }
            _ => {}
        }
    }

    fn finish_once(&mut self) {
        self.stop();
        self.finished = true;
    }

    /// Loop playback with a held gap at the end of every iteration.
    fn advance_loop_with_gap(&mut self, budget: f32, direction: f32) {
        let run_time = self.length / self.speed;
        let period = run_time + self.loop_delay;
        let mut remaining = if budget > period { budget.rem_euclid(period) } else { budget };
        let (begin, end) = if direction > 0.0 { (0.0, self.length) } else { (self.length, 0.0) };

        while remaining > 0.0 {
            if self.gap_remaining > 0.0 {
                let used = remaining.min(self.gap_remaining);
                self.gap_remaining -= used;
                remaining -= used;
                if self.gap_remaining <= 0.0 {
                    self.elapsed = begin;
                }
                continue;
            }
            let distance = (end - self.elapsed).abs();
            let needed = distance / self.speed;
            if remaining < needed {
                self.elapsed += remaining * self.speed * direction;
                break;
            }
            remaining -= needed;
            self.elapsed = end;
            self.gap_remaining = self.loop_delay;
        }
    }

    /// Timeline position used for sampling, with the start offset applied.
    pub fn sample_time(&self) -> f32 {
        if self.length <= 0.0 {
            return 0.0;
        }
        let time = self.elapsed + self.start_offset;
        match self.loop_mode {
            LoopMode::Loop => {
                if time >= 0.0 && time <= self.length {
                    time
                } else {
                    time.rem_euclid(self.length)
                }
            }
            LoopMode::Once | LoopMode::Hold => time.clamp(0.0, self.length),
        }
    }

    pub fn sample(&self, part: usize) -> Option<ChannelSample> {
        let channel = self.channels.iter().find(|channel| channel.part == part)?;
        let time = self.sample_time();
        Some(ChannelSample {
            position: channel.position.as_ref().map(|curve| curve.sample(time)),
            rotation: channel.rotation.as_ref().map(|curve| curve.sample(time)),
        })
    }

    fn bounded(&self, elapsed: f32) -> f32 {
        if self.length <= 0.0 {
            return 0.0;
        }
        match self.loop_mode {
            LoopMode::Loop if elapsed > self.length => elapsed.rem_euclid(self.length),
            _ => elapsed.clamp(0.0, self.length),
        }
    }
}

fn sanitize_non_negative(value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-4
    }

    fn looping(length: f32) -> AnimationTrack {
        let mut track = AnimationTrack::new("loop", length);
        track.set_loop_mode(LoopMode::Loop);
        track
    }

    #[test]
    fn wave_loops_modulo_length() {
        let mut track = looping(2.0);
        track.start();
        for _ in 0..50 {
            track.advance(0.1);
        }
        assert!(approx(track.elapsed(), 1.0), "elapsed {}", track.elapsed());
        assert!(track.is_playing());
    }

    #[test]
    fn loop_is_periodic_over_whole_lengths() {
        let mut track = looping(1.5);
        track.play();
        track.advance(0.4);
        let before = track.elapsed();
        track.advance(1.5 * 3.0);
        assert!(approx(track.elapsed(), before), "{} vs {before}", track.elapsed());
    }

    #[test]
    fn once_stops_exactly_at_length() {
        let mut track = AnimationTrack::new("once", 1.0);
        track.play();
        track.advance(0.75);
        assert!(track.is_playing());
        track.advance(0.75);
        assert_eq!(track.play_state(), PlayState::Stopped);
        assert_eq!(track.elapsed(), 1.0);
        assert!(track.take_finished());
        track.advance(1.0);
        assert_eq!(track.elapsed(), 1.0);
        assert!(!track.take_finished(), "finish is reported once");
    }

    #[test]
    fn inverted_once_stops_at_zero() {
        let mut track = AnimationTrack::new("rewind", 1.0);
        track.set_loop_mode(LoopMode::Hold);
        track.play();
        track.advance(0.5);
        track.set_loop_mode(LoopMode::Once);
        track.set_speed(-2.0);
        track.advance(1.0);
        assert_eq!(track.elapsed(), 0.0);
        assert_eq!(track.play_state(), PlayState::Stopped);
    }

    #[test]
    fn hold_freezes_on_last_frame_while_playing() {
        let mut track = AnimationTrack::new("hold", 0.5);
        track.set_loop_mode(LoopMode::Hold);
        track.play();
        track.advance(2.0);
        assert_eq!(track.elapsed(), 0.5);
        assert!(track.is_playing());
    }

    #[test]
    fn zero_length_never_advances() {
        for mode in [LoopMode::Once, LoopMode::Loop, LoopMode::Hold] {
            let mut track = AnimationTrack::new("empty", 0.0);
            track.set_loop_mode(mode);
            track.play();
            track.advance(3.0);
            assert_eq!(track.elapsed(), 0.0, "{mode:?}");
        }
    }

    #[test]
    fn negative_speed_sets_inverted_flag() {
        let mut track = AnimationTrack::new("speed", 1.0);
        track.set_speed(-0.5);
        assert!(track.inverted());
        assert_eq!(track.speed(), -0.5);
        track.set_speed(2.0);
        assert!(!track.inverted());
        assert_eq!(track.speed(), 2.0);
    }

    #[test]
    fn play_while_playing_keeps_elapsed() {
        let mut track = looping(4.0);
        track.play();
        track.advance(1.0);
        track.play();
        track.start();
        assert!(approx(track.elapsed(), 1.0));
    }

    #[test]
    fn stop_keeps_position_and_cease_rewinds() {
        let mut track = looping(4.0);
        track.play();
        track.advance(1.25);
        track.stop();
        assert_eq!(track.play_state(), PlayState::Stopped);
        assert!(approx(track.elapsed(), 1.25));
        track.play();
        assert!(approx(track.elapsed(), 1.25));
        track.cease();
        assert_eq!(track.elapsed(), 0.0);
        assert_eq!(track.play_state(), PlayState::Stopped);
    }

    #[test]
    fn pause_freezes_time() {
        let mut track = looping(4.0);
        track.play();
        track.advance(0.5);
        track.pause();
        track.advance(1.0);
        assert!(approx(track.elapsed(), 0.5));
        assert_eq!(track.play_state(), PlayState::Paused);
    }

    #[test]
    fn start_delay_postpones_first_advance() {
        let mut track = looping(4.0);
        track.set_start_delay(0.5);
        track.play();
        track.advance(0.3);
        assert_eq!(track.elapsed(), 0.0);
        track.advance(0.3);
        assert!(approx(track.elapsed(), 0.1));
    }

    #[test]
    fn loop_delay_holds_between_iterations() {
        let mut track = looping(1.0);
        track.set_loop_delay(0.5);
        track.play();
        track.advance(1.2);
        assert!(approx(track.elapsed(), 1.0), "held at end, got {}", track.elapsed());
        track.advance(0.4);
        assert!(approx(track.elapsed(), 0.1), "resumed, got {}", track.elapsed());
    }

    #[test]
    fn blend_time_ramps_in_and_out() {
        let mut track = looping(4.0);
        track.set_blend_time(0.5);
        track.play();
        assert_eq!(track.blend_factor(), 0.0);
        track.advance(0.25);
        assert!(approx(track.blend_factor(), 0.5));
        track.advance(0.5);
        assert_eq!(track.blend_factor(), 1.0);
        track.stop();
        assert!(track.is_contributing());
        track.advance(0.25);
        assert!(approx(track.blend_factor(), 0.5));
        track.advance(0.25);
        assert!(!track.is_contributing());
    }

    #[test]
    fn fade_in_waits_for_the_start_delay() {
        let mut track = looping(4.0);
        track.set_start_delay(0.5);
        track.set_blend_time(0.5);
        track.play();
        track.advance(0.5);
        assert_eq!(track.blend_factor(), 0.0);
        assert_eq!(track.elapsed(), 0.0);
        track.advance(0.25);
        assert!(approx(track.blend_factor(), 0.5), "factor {}", track.blend_factor());
        assert!(approx(track.elapsed(), 0.25));
    }

    #[test]
    fn extreme_speed_keeps_loop_time_in_range() {
        for speed in [f32::MAX, -f32::MAX] {
            let mut track = looping(2.0).with_channels([PartChannel {
                part: 0,
                position: None,
                rotation: Some(Vec3Curve::new(
                    Interpolation::Linear,
                    vec![
                        Keyframe { time: 0.0, value: Vec3::ZERO },
                        Keyframe { time: 2.0, value: Vec3::new(0.0, 0.0, 90.0) },
                    ],
                )),
            }]);
            track.set_speed(speed);
            track.play();
            track.advance(1.5);
            track.advance(1.5);
            let elapsed = track.elapsed();
            assert!(elapsed.is_finite() && (0.0..=2.0).contains(&elapsed), "elapsed {elapsed}");
            let sample = track.sample(0).expect("channel");
            assert!(sample.rotation.expect("rotation").is_finite());
        }
    }

    #[test]
    fn curves_tolerate_nan_time() {
        let curve = Vec3Curve::new(
            Interpolation::Linear,
            vec![Keyframe { time: 0.0, value: Vec3::X }, Keyframe { time: 1.0, value: Vec3::Y }],
        );
        assert_eq!(curve.sample(f32::NAN), Vec3::X);
    }

    #[test]
    fn negative_blend_time_clamps_to_zero() {
        let mut track = AnimationTrack::new("blend", 1.0);
        track.set_blend_time(-3.0);
        assert_eq!(track.blend_time(), 0.0);
    }

    #[test]
    fn invalid_play_state_is_rejected() {
        assert!(PlayState::parse("dancing").is_err());
        assert_eq!(PlayState::parse("paused").ok(), Some(PlayState::Paused));
        assert_eq!(LoopMode::from_str("sideways"), LoopMode::Once);
    }

    #[test]
    fn linear_curve_interpolates_between_keys() {
        let curve = Vec3Curve::new(
            Interpolation::Linear,
            vec![
                Keyframe { time: 0.0, value: Vec3::ZERO },
                Keyframe { time: 1.0, value: Vec3::new(2.0, 0.0, -2.0) },
            ],
        );
        assert_eq!(curve.sample(0.5), Vec3::new(1.0, 0.0, -1.0));
        assert_eq!(curve.sample(4.0), Vec3::new(2.0, 0.0, -2.0));
        let step = Vec3Curve::new(Interpolation::Step, curve.keyframes.clone());
        assert_eq!(step.sample(0.99), Vec3::ZERO);
    }
}
