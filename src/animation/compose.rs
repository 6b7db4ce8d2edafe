use glam::Vec3;

use super::model::{Model, PartPose};

/// Advances every track by `dt` and returns the names of `Once` tracks that finished.
pub fn advance_tracks(model: &mut Model, dt: f32) -> Vec<String> {
    let mut finished = Vec::new();
    for track in model.tracks_mut() {
        track.advance(dt);
        if track.take_finished() {
            finished.push(track.name().to_string());
        }
    }
    finished
}

/// Writes the blended additional pose of every part.
///
/// Contributing tracks are visited from highest to lowest priority, ties in
/// insertion order. A `replace` track masks every track after it for the parts
/// it touches. Override tracks blend the sampled value against the part's base
/// transform so a full-weight override lands exactly on the keyframe value.
/// Parts no contributing track touches return to the zero pose.
pub fn compose(model: &mut Model) {
    let mut order: Vec<(i32, usize)> = model
        .tracks()
        .enumerate()
        .filter(|(_, track)| track.is_contributing())
        .map(|(index, track)| (track.priority(), index))
        .collect();
    order.sort_by(|a, b| b.0.cmp(&a.0));

    let tracks: Vec<_> = model.tracks().collect();
    let part_count = model.parts().len();
    let mut poses = vec![PartPose::ZERO; part_count];
    let mut masked = vec![false; part_count];

    for &(_, track_index) in &order {
        let track = tracks[track_index];
        let factor = track.effective_weight();
        for channel in track.channels() {
            let part_index = channel.part;
            if part_index >= part_count || masked[part_index] {
                continue;
            }
            let Some(sample) = track.sample(part_index) else {
                continue;
            };
            let part = &model.parts()[part_index];
            let pose = &mut poses[part_index];
            if let Some(position) = sample.position {
                pose.position += contribution(position, part.base_position, factor, track.override_base());
            }
            if let Some(rotation) = sample.rotation {
                pose.rotation += contribution(rotation, part.base_rotation, factor, track.override_base());
            }
            if track.replace() {
                masked[part_index] = true;
            }
        }
    }

    for (part, pose) in model.parts_mut().iter_mut().zip(poses) {
        part.additional = pose;
    }
}

fn contribution(value: Vec3, base: Vec3, factor: f32, override_base: bool) -> Vec3 {
    if override_base {
        (value - base) * factor
    } else {
        value * factor
    }
}

/// One frame of animation: advance, then compose.
pub fn step(model: &mut Model, dt: f32) -> Vec<String> {
    let finished = advance_tracks(model, dt);
    compose(model);
    finished
}
