// src/callback/bridge.rs

//! Question redispatch across threads
//!
//! Question callbacks arrive on the thread blocked inside a native call.
//! The bridge hands each question to a designated answering thread (for
//! example the one that owns the terminal) and blocks until that thread
//! replies. The answering thread must not be the one running the native
//! call.

use super::event::Question;
use crate::error::{Error, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// A question waiting for an answer on the answering thread
#[derive(Debug)]
pub struct PendingQuestion {
    pub question: Question,
    reply: Sender<i32>,
}

impl PendingQuestion {
    /// Send the answer back to the blocked native thread
    pub fn answer(self, answer: i32) {
        if self.reply.send(answer).is_err() {
            debug!("Question asker went away before the answer arrived");
        }
    }

    /// Reply with the native default
    pub fn answer_default(self) {
        let answer = self.question.default_answer;
        self.answer(answer);
    }
}

/// Create a question handler and the receiving end of its queue
///
/// Register the handler with
/// [`CallbackRelay::on_question`](super::CallbackRelay::on_question) and
/// drain the receiver on the answering thread. If the receiver is dropped,
/// questions fail and the relay falls back to the native default.
pub fn question_bridge() -> (
    impl Fn(&Question) -> Result<i32> + Send + Sync + 'static,
    Receiver<PendingQuestion>,
) {
    let (tx, rx) = mpsc::channel::<PendingQuestion>();
    let handler = move |question: &Question| {
        let (reply, answer) = mpsc::channel();
        tx.send(PendingQuestion {
            question: question.clone(),
            reply,
        })
        .map_err(|_| Error::Callback("question receiver is gone".to_string()))?;
        answer
            .recv()
            .map_err(|_| Error::Callback("question was dropped without an answer".to_string()))
    };
    (handler, rx)
}
