// src/alpm/callbacks.rs

//! `extern "C"` trampolines registered with libalpm
//!
//! Each trampoline recovers the [`CallbackContext`] from the context
//! pointer, decodes the payload and hands it to the relay. Panics are
//! caught here as well as in the relay; unwinding into native frames is
//! undefined behavior.

use super::ffi::{AlpmApi, alpm_event_t, alpm_question_t, string_from};
use super::handle::NativeMirrors;
use crate::callback::{CallbackRelay, FetchRequest, decode};
use crate::repository::FetchResolver;
use libc::{c_char, c_int, c_void, size_t};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

/// State reachable from every callback of one handle
pub(crate) struct CallbackContext {
    pub relay: Arc<CallbackRelay>,
    pub fetcher: FetchResolver<NativeMirrors>,
    pub api: &'static AlpmApi,
}

/// Recover the context from a native context pointer
///
/// # Safety
/// `ctx` must be null or the pointer registered by the owning handle, which
/// keeps the boxed context alive until after the handle is released.
unsafe fn context<'a>(ctx: *mut c_void) -> Option<&'a CallbackContext> {
    // SAFETY: guaranteed by the caller.
    unsafe { ctx.cast::<CallbackContext>().as_ref() }
}

pub(crate) unsafe extern "C" fn on_event(ctx: *mut c_void, event: *mut alpm_event_t) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: registered by Handle::install_callbacks.
        let Some(ctx) = (unsafe { context(ctx) }) else {
            return;
        };
        // SAFETY: libalpm passes a live event for the duration of the call.
        if let Some(decoded) = unsafe { decode::event(ctx.api, event) } {
            ctx.relay.event(&decoded);
        }
    }));
    if result.is_err() {
        error!("Panic in event callback");
    }
}

pub(crate) unsafe extern "C" fn on_question(ctx: *mut c_void, question: *mut alpm_question_t) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: registered by Handle::install_callbacks.
        let Some(ctx) = (unsafe { context(ctx) }) else {
            return;
        };
        // SAFETY: libalpm passes a live question and reads the answer after we return.
        unsafe { ctx.relay.handle_native_question(ctx.api, question) };
    }));
    if result.is_err() {
        error!("Panic in question callback; native default kept");
    }
}

pub(crate) unsafe extern "C" fn on_progress(
    ctx: *mut c_void,
    kind: c_int,
    package: *const c_char,
    percent: c_int,
    howmany: size_t,
    current: size_t,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: registered by Handle::install_callbacks.
        let Some(ctx) = (unsafe { context(ctx) }) else {
            return;
        };
        // SAFETY: package is null or a NUL-terminated name owned by libalpm.
        if let Some(event) = unsafe { decode::progress(kind, package, percent, howmany, current) } {
            ctx.relay.progress(&event);
        }
    }));
    if result.is_err() {
        error!("Panic in progress callback");
    }
}

pub(crate) unsafe extern "C" fn on_fetch(
    ctx: *mut c_void,
    url: *const c_char,
    localpath: *const c_char,
    force: c_int,
) -> c_int {
    catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: registered by Handle::install_callbacks.
        let Some(ctx) = (unsafe { context(ctx) }) else {
            return -1;
        };
        // SAFETY: both strings are owned by libalpm for the duration of the call.
        let (identifier, destination) = unsafe { (string_from(url), string_from(localpath)) };
        let Some(identifier) = identifier else {
            return -1;
        };
        let request = FetchRequest {
            identifier,
            destination: destination.map(PathBuf::from),
            force: force != 0,
        };
        ctx.relay.fetch(&request, |request| ctx.fetcher.resolve(request))
    }))
    .unwrap_or_else(|_| {
        error!("Panic in fetch callback");
        -1
    })
}
