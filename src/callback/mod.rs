// src/callback/mod.rs

//! Native callback bridging
//!
//! libalpm reports progress, lifecycle events, interactive questions and
//! file-fetch requests through four synchronous callbacks. This module
//! decodes their payloads into [`CallbackEvent`] values and dispatches them
//! to application handlers registered on a [`CallbackRelay`].

mod bridge;
pub mod decode;
mod event;
mod relay;

pub use bridge::{PendingQuestion, question_bridge};
pub use decode::NativeAccessors;
pub use event::{
    CallbackEvent, EventKind, FetchOutcome, FetchRequest, OperationEvent, PackageOperation,
    PackageRef, ProgressEvent, ProgressKind, Question, QuestionKind,
};
pub use relay::CallbackRelay;
