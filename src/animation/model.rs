use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::track::{AnimationTrack, Interpolation, Keyframe, LoopMode, PartChannel, Vec3Curve};

/// Additional position/rotation written on top of a part's base transform.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PartPose {
    pub position: Vec3,
    pub rotation: Vec3,
}

impl PartPose {
    pub const ZERO: PartPose = PartPose { position: Vec3::ZERO, rotation: Vec3::ZERO };

    pub fn is_zero(&self) -> bool {
        self.position == Vec3::ZERO && self.rotation == Vec3::ZERO
    }
}

#[derive(Debug, Clone)]
pub struct ModelPart {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub base_position: Vec3,
    pub base_rotation: Vec3,
    pub additional: PartPose,
}

impl ModelPart {
    /// Base transform with the additional pose merged in.
    pub fn final_pose(&self) -> PartPose {
        PartPose {
            position: self.base_position + self.additional.position,
            rotation: self.base_rotation + self.additional.rotation,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationDescription {
    Step,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyframeDescription {
    pub time: f32,
    pub value: [f32; 3],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelDescription {
    pub part: String,
    #[serde(default)]
    pub interpolation: InterpolationDescription,
    #[serde(default)]
    pub position: Vec<KeyframeDescription>,
    #[serde(default)]
    pub rotation: Vec<KeyframeDescription>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackDescription {
    pub name: String,
    pub length: f32,
    #[serde(default = "TrackDescription::default_loop_mode")]
    pub loop_mode: String,
    #[serde(default = "TrackDescription::default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, rename = "override")]
    pub override_base: bool,
    #[serde(default)]
    pub replace: bool,
    #[serde(default = "TrackDescription::default_blend_weight")]
    pub blend_weight: f32,
    #[serde(default)]
    pub blend_time: f32,
    #[serde(default)]
    pub start_offset: f32,
    #[serde(default)]
    pub start_delay: f32,
    #[serde(default)]
    pub loop_delay: f32,
    #[serde(default)]
    pub channels: Vec<ChannelDescription>,
}

impl TrackDescription {
    fn default_loop_mode() -> String {
        LoopMode::Once.as_str().to_string()
    }

    const fn default_speed() -> f32 {
        1.0
    }

    const fn default_blend_weight() -> f32 {
        1.0
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartDescription {
    pub name: String,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default)]
    pub children: Vec<PartDescription>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelDescription {
    #[serde(default)]
    pub parts: Vec<PartDescription>,
    #[serde(default)]
    pub animations: Vec<TrackDescription>,
}

impl ModelDescription {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read model file {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse model file {}", path.display()))
    }
}

/// Part tree plus the ordered set of animation tracks driving it.
#[derive(Debug, Clone, Default)]
pub struct Model {
    parts: Vec<ModelPart>,
    roots: Vec<usize>,
    part_index: HashMap<String, usize>,
    tracks: IndexMap<String, AnimationTrack>,
}

impl Model {
    pub fn from_description(desc: &ModelDescription) -> Result<Self> {
        let mut model = Model::default();
        for part in &desc.parts {
            let root = model.push_part(part, None)?;
            model.roots.push(root);
        }
        for track in &desc.animations {
            let built = model.build_track(track).with_context(|| format!("Invalid animation '{}'", track.name))?;
            if model.tracks.contains_key(&track.name) {
                bail!("Duplicate animation name '{}'", track.name);
            }
            model.tracks.insert(track.name.clone(), built);
        }
        Ok(model)
    }

    fn push_part(&mut self, desc: &PartDescription, parent: Option<usize>) -> Result<usize> {
        if self.part_index.contains_key(&desc.name) {
            bail!("Duplicate model part name '{}'", desc.name);
        }
        let position = Vec3::from_array(desc.position);
        let rotation = Vec3::from_array(desc.rotation);
        if !position.is_finite() || !rotation.is_finite() {
            bail!("Model part '{}' has a non-finite base transform", desc.name);
        }
        let index = self.parts.len();
        self.parts.push(ModelPart {
            name: desc.name.clone(),
            parent,
            children: Vec::new(),
            base_position: position,
            base_rotation: rotation,
            additional: PartPose::ZERO,
        });
        self.part_index.insert(desc.name.clone(), index);
        for child in &desc.children {
            let child_index = self.push_part(child, Some(index))?;
            self.parts[index].children.push(child_index);
        }
        Ok(index)
    }

    fn build_track(&self, desc: &TrackDescription) -> Result<AnimationTrack> {
        if !desc.length.is_finite() || desc.length < 0.0 {
            bail!("length must be a finite, non-negative number of seconds");
        }
        let mut channels = Vec::with_capacity(desc.channels.len());
        for channel in &desc.channels {
            let part = self
                .part_index(&channel.part)
                .ok_or_else(|| anyhow!("channel targets unknown part '{}'", channel.part))?;
            if channels.iter().any(|existing: &PartChannel| existing.part == part) {
                bail!("part '{}' is targeted by more than one channel", channel.part);
            }
            let interpolation = match channel.interpolation {
                InterpolationDescription::Step => Interpolation::Step,
                InterpolationDescription::Linear => Interpolation::Linear,
            };
            channels.push(PartChannel {
                part,
                position: build_curve(interpolation, &channel.position)?,
                rotation: build_curve(interpolation, &channel.rotation)?,
            });
        }

        let mut track = AnimationTrack::new(desc.name.clone(), desc.length).with_channels(channels);
        track.set_loop_mode(LoopMode::from_str(&desc.loop_mode));
        track.set_speed(desc.speed);
        track.set_priority(desc.priority);
        track.set_override(desc.override_base);
        track.set_replace(desc.replace);
        track.set_blend_weight(desc.blend_weight);
        track.set_blend_time(desc.blend_time);
        track.set_start_offset(desc.start_offset);
        track.set_start_delay(desc.start_delay);
        track.set_loop_delay(desc.loop_delay);
        Ok(track)
    }

    pub fn parts(&self) -> &[ModelPart] {
        &self.parts
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn part(&self, index: usize) -> Option<&ModelPart> {
        self.parts.get(index)
    }

    pub fn part_index(&self, name: &str) -> Option<usize> {
        self.part_index.get(name).copied()
    }

    pub fn part_pose(&self, name: &str) -> Option<PartPose> {
        self.part_index(name).map(|index| self.parts[index].additional)
    }

    /// Additional poses in depth-first tree order.
    pub fn poses(&self) -> Vec<(&str, PartPose)> {
        let mut out = Vec::with_capacity(self.parts.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            let part = &self.parts[index];
            out.push((part.name.as_str(), part.additional));
            stack.extend(part.children.iter().rev().copied());
        }
        out
    }

    pub fn reset_pose(&mut self) {
        for part in &mut self.parts {
            part.additional = PartPose::ZERO;
        }
    }

    pub(crate) fn parts_mut(&mut self) -> &mut [ModelPart] {
        &mut self.parts
    }

    pub fn track(&self, name: &str) -> Option<&AnimationTrack> {
        self.tracks.get(name)
    }

    pub fn track_mut(&mut self, name: &str) -> Option<&mut AnimationTrack> {
        self.tracks.get_mut(name)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &AnimationTrack> {
        self.tracks.values()
    }

    pub(crate) fn tracks_mut(&mut self) -> impl Iterator<Item = &mut AnimationTrack> {
        self.tracks.values_mut()
    }

    /// Adds a track; an existing track with the same name keeps its slot and is replaced.
    pub fn insert_track(&mut self, track: AnimationTrack) {
        self.tracks.insert(track.name().to_string(), track);
    }

    pub fn list_tracks(&self) -> Vec<String> {
        self.tracks.keys().cloned().collect()
    }

    pub fn stop_all(&mut self) {
        self.tracks.values_mut().for_each(AnimationTrack::stop);
    }

    pub fn cease_all(&mut self) {
        self.tracks.values_mut().for_each(AnimationTrack::cease);
    }
}

fn build_curve(interpolation: Interpolation, raw: &[KeyframeDescription]) -> Result<Option<Vec3Curve>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut frames: Vec<(usize, Keyframe)> = Vec::with_capacity(raw.len());
    for (index, kf) in raw.iter().enumerate() {
        if !kf.time.is_finite() {
            bail!("keyframe time must be finite");
        }
        if kf.time < 0.0 {
            bail!("keyframe time cannot be negative");
        }
        let value = Vec3::from_array(kf.value);
        if !value.is_finite() {
            bail!("keyframe at {} has a non-finite value", kf.time);
        }
        frames.push((index, Keyframe { time: kf.time, value }));
    }
    frames.sort_by(|a, b| match a.1.time.partial_cmp(&b.1.time).unwrap_or(Ordering::Equal) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    let mut deduped: Vec<Keyframe> = Vec::with_capacity(frames.len());
    for (_, frame) in frames {
        if let Some(last) = deduped.last_mut() {
            if (frame.time - last.time).abs() <= f32::EPSILON {
                *last = frame;
                continue;
            }
        }
        deduped.push(frame);
    }
    Ok(Some(Vec3Curve::new(interpolation, deduped)))
}
