pub mod backend;
pub mod conversation;
pub mod event;
pub mod message;
pub mod ordered_set;

pub use backend::*;
pub use conversation::{Conversation, ModelRef, ModelType, PlaybackState, ReplayState};
pub use message::{
    Attachment, CustomContent, Like, Message, MessageModel, MessageSettings, Role, Stage,
    StageStatus, clear_state_for_messages, filter_unfinished_stages,
};
pub use ordered_set::OrderedSet;

pub use event::{ArcEventTx, Event, EventTx, NoopEventTx};
