// src/callback/relay.rs

//! Synchronous dispatch of native callbacks to application handlers
//!
//! Handlers run on the thread executing the native call. Every handler
//! invocation is wrapped in `catch_unwind`; a panic or an error is logged
//! and the native default is kept, so nothing unwinds into native frames.

use super::decode::{self, NativeAccessors};
use super::event::{CallbackEvent, FetchOutcome, FetchRequest, OperationEvent, ProgressEvent, Question};
use crate::alpm::ffi::alpm_question_t;
use crate::error::Result;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, trace, warn};

type ProgressHandler = Box<dyn Fn(&ProgressEvent) + Send + Sync>;
type EventHandler = Box<dyn Fn(&OperationEvent) + Send + Sync>;
type QuestionHandler = Box<dyn Fn(&Question) -> Result<i32> + Send + Sync>;

/// Application handlers for the progress, event and question callbacks
///
/// Fetch requests are answered by the fetch resolver; the relay only
/// provides fault isolation for them.
#[derive(Default)]
pub struct CallbackRelay {
    progress: Option<ProgressHandler>,
    event: Option<EventHandler>,
    question: Option<QuestionHandler>,
}

impl CallbackRelay {
    /// Relay with no handlers registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the progress handler
    pub fn on_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(handler));
        self
    }

    /// Register the lifecycle event handler
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&OperationEvent) + Send + Sync + 'static,
    {
        self.event = Some(Box::new(handler));
        self
    }

    /// Register the question handler
    ///
    /// The handler returns 0/1 for yes/no questions or a zero-based index
    /// for provider selection.
    pub fn on_question<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Question) -> Result<i32> + Send + Sync + 'static,
    {
        self.question = Some(Box::new(handler));
        self
    }

    /// True if a question handler is registered
    pub fn answers_questions(&self) -> bool {
        self.question.is_some()
    }

    /// Deliver a progress notification
    pub fn progress(&self, event: &ProgressEvent) {
        trace!(?event, "progress");
        if let Some(handler) = &self.progress
            && catch_unwind(AssertUnwindSafe(|| handler(event))).is_err()
        {
            warn!("Progress handler panicked; notification dropped");
        }
    }

    /// Deliver a lifecycle event
    pub fn event(&self, event: &OperationEvent) {
        debug!(?event, "event");
        if let Some(handler) = &self.event
            && catch_unwind(AssertUnwindSafe(|| handler(event))).is_err()
        {
            warn!("Event handler panicked; notification dropped");
        }
    }

    /// Answer for a question
    ///
    /// Returns the native default if no handler is registered, or if the
    /// handler fails, panics or returns an answer the question does not
    /// accept.
    pub fn answer(&self, question: &Question) -> i32 {
        let Some(handler) = &self.question else {
            return question.default_answer;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(question))) {
            Ok(Ok(answer)) if question.accepts(answer) => answer,
            Ok(Ok(answer)) => {
                warn!(
                    "Ignoring out-of-range answer {} to '{}'",
                    answer, question.prompt
                );
                question.default_answer
            }
            Ok(Err(e)) => {
                warn!("Question handler failed: {}", e);
                question.default_answer
            }
            Err(_) => {
                warn!("Question handler panicked; keeping default answer");
                question.default_answer
            }
        }
    }

    /// Decode a native question and write the handler's answer back
    ///
    /// The answer field is written at most once, and only when a handler is
    /// registered; otherwise the native default stays untouched.
    ///
    /// # Safety
    /// `raw` must point to a live native question (see [`decode::question`]).
    pub unsafe fn handle_native_question<A: NativeAccessors + ?Sized>(
        &self,
        access: &A,
        raw: *mut alpm_question_t,
    ) {
        if raw.is_null() || !self.answers_questions() {
            return;
        }
        // SAFETY: forwarded from the caller.
        let Some(question) = (unsafe { decode::question(access, raw) }) else {
            debug!("Ignoring question with unknown discriminator");
            return;
        };
        debug!(kind = ?question.kind, prompt = %question.prompt, "question");
        let answer = self.answer(&question);
        // SAFETY: forwarded from the caller.
        unsafe { decode::write_answer(raw, answer) };
    }

    /// Deliver an already decoded notification
    ///
    /// Questions get the registered handler's answer; fetch requests need a
    /// resolver and are refused with -1. Notifications return 0.
    pub fn dispatch(&self, event: &CallbackEvent) -> i32 {
        match event {
            CallbackEvent::Progress(event) => self.progress(event),
            CallbackEvent::Operation(event) => self.event(event),
            CallbackEvent::Question(question) => return self.answer(question),
            CallbackEvent::Fetch(request) => {
                warn!("No resolver for {}", request.identifier);
                return -1;
            }
        }
        0
    }

    /// Run a fetch resolution and translate it to a native status code
    ///
    /// Returns 0 after a transfer, 1 when the file was already up to date
    /// and -1 on failure or panic.
    pub fn fetch<F>(&self, request: &FetchRequest, resolve: F) -> i32
    where
        F: FnOnce(&FetchRequest) -> Result<FetchOutcome>,
    {
        debug!(identifier = %request.identifier, force = request.force, "fetch");
        match catch_unwind(AssertUnwindSafe(|| resolve(request))) {
            Ok(Ok(outcome)) => outcome.status(),
            Ok(Err(e)) => {
                warn!("Failed to fetch {}: {}", request.identifier, e);
                -1
            }
            Err(_) => {
                warn!("Fetch of {} panicked", request.identifier);
                -1
            }
        }
    }
}

impl fmt::Debug for CallbackRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRelay")
            .field("progress", &self.progress.is_some())
            .field("event", &self.event.is_some())
            .field("question", &self.question.is_some())
            .finish()
    }
}
