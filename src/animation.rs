pub mod compose;
pub mod model;
pub mod track;

pub use compose::{advance_tracks, compose, step};
pub use model::{Model, ModelDescription, ModelPart, PartPose};
pub use track::{AnimationTrack, ChannelSample, Interpolation, Keyframe, LoopMode, PartChannel, PlayState, Vec3Curve};
