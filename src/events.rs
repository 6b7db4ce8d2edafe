use std::fmt;
use uuid::Uuid;

use crate::scripts::LifecyclePhase;

#[derive(Debug, Clone, PartialEq)]
pub enum AvatarEvent {
    ScriptLoaded { avatar: Uuid, digest: String },
    ScriptFault { avatar: Uuid, phase: LifecyclePhase, message: String },
    ScriptDisabled { avatar: Uuid, faults: u32 },
    ScriptLog { avatar: Uuid, message: String },
    TrackFinished { avatar: Uuid, track: String },
}

impl AvatarEvent {
    pub fn avatar(&self) -> Uuid {
        match self {
            AvatarEvent::ScriptLoaded { avatar, .. }
            | AvatarEvent::ScriptFault { avatar, .. }
            | AvatarEvent::ScriptDisabled { avatar, .. }
            | AvatarEvent::ScriptLog { avatar, .. }
            | AvatarEvent::TrackFinished { avatar, .. } => *avatar,
        }
    }
}

impl fmt::Display for AvatarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarEvent::ScriptLoaded { avatar, digest } => {
                write!(f, "ScriptLoaded avatar={avatar} digest={}", &digest[..digest.len().min(12)])
            }
            AvatarEvent::ScriptFault { avatar, phase, message } => {
                write!(f, "ScriptFault avatar={avatar} phase={phase} message={message}")
            }
            AvatarEvent::ScriptDisabled { avatar, faults } => {
                write!(f, "ScriptDisabled avatar={avatar} faults={faults}")
            }
            AvatarEvent::ScriptLog { avatar, message } => write!(f, "ScriptLog avatar={avatar} {message}"),
            AvatarEvent::TrackFinished { avatar, track } => {
                write!(f, "TrackFinished avatar={avatar} track={track}")
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<AvatarEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: AvatarEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = AvatarEvent>) {
        self.events.extend(events);
    }

    pub fn drain(&mut self) -> Vec<AvatarEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
