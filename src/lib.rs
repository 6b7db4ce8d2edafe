pub mod animation;
pub mod avatar;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod script_harness;
pub mod scripts;
pub mod store;
pub mod trust;
pub mod world;

pub use avatar::{Avatar, AvatarManager};
pub use error::{ApiError, ApiResult};
pub use scripts::{CallStatus, LifecyclePhase, ScriptFault, ScriptHost, ScriptSource};
