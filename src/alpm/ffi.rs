// src/alpm/ffi.rs

//! Raw libalpm ABI and the dynamically loaded function table
//!
//! Only the subset of `alpm.h` that shelly drives is declared here. The
//! layouts follow libalpm 13 and later. The library is opened once per
//! process with `dlopen`, trying the unversioned name first and then the
//! versioned sonames, and is never closed.

#![allow(non_camel_case_types)]

use crate::error::{Error, Result};
use libc::{c_char, c_int, c_void, off_t, size_t};
use std::ffi::{CStr, CString};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Library names tried in order
pub const LIBRARY_NAMES: &[&str] = &[
    "libalpm.so",
    "libalpm.so.15",
    "libalpm.so.14",
    "libalpm.so.13",
];

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(alpm_handle_t, alpm_db_t, alpm_pkg_t, alpm_depend_t, alpm_event_t, alpm_question_t);

/// Doubly linked list node (`alpm_list_t`)
#[repr(C)]
pub struct alpm_list_t {
    pub data: *mut c_void,
    pub prev: *mut alpm_list_t,
    pub next: *mut alpm_list_t,
}

// -----------------------------------------------------------------------------
// Events: every variant starts with the `type` discriminator
// -----------------------------------------------------------------------------

#[repr(C)]
pub struct alpm_event_any_t {
    pub kind: c_int,
}

#[repr(C)]
pub struct alpm_event_package_operation_t {
    pub kind: c_int,
    pub operation: c_int,
    pub oldpkg: *mut alpm_pkg_t,
    pub newpkg: *mut alpm_pkg_t,
}

#[repr(C)]
pub struct alpm_event_optdep_removal_t {
    pub kind: c_int,
    pub pkg: *mut alpm_pkg_t,
    pub optdep: *mut alpm_depend_t,
}

#[repr(C)]
pub struct alpm_event_scriptlet_info_t {
    pub kind: c_int,
    pub line: *const c_char,
}

#[repr(C)]
pub struct alpm_event_database_missing_t {
    pub kind: c_int,
    pub dbname: *const c_char,
}

#[repr(C)]
pub struct alpm_event_pkg_retrieve_t {
    pub kind: c_int,
    pub num: size_t,
    pub total_size: off_t,
}

#[repr(C)]
pub struct alpm_event_pacnew_created_t {
    pub kind: c_int,
    pub from_noupgrade: c_int,
    pub oldpkg: *mut alpm_pkg_t,
    pub newpkg: *mut alpm_pkg_t,
    pub file: *const c_char,
}

#[repr(C)]
pub struct alpm_event_pacsave_created_t {
    pub kind: c_int,
    pub oldpkg: *mut alpm_pkg_t,
    pub file: *const c_char,
}

#[repr(C)]
pub struct alpm_event_hook_run_t {
    pub kind: c_int,
    pub name: *const c_char,
    pub desc: *const c_char,
    pub position: size_t,
    pub total: size_t,
}

// -----------------------------------------------------------------------------
// Questions: every variant starts with `type` followed by the answer field
// -----------------------------------------------------------------------------

#[repr(C)]
pub struct alpm_question_any_t {
    pub kind: c_int,
    pub answer: c_int,
}

#[repr(C)]
pub struct alpm_question_install_ignorepkg_t {
    pub kind: c_int,
    pub install: c_int,
    pub pkg: *mut alpm_pkg_t,
}

#[repr(C)]
pub struct alpm_question_replace_t {
    pub kind: c_int,
    pub replace: c_int,
    pub oldpkg: *mut alpm_pkg_t,
    pub newpkg: *mut alpm_pkg_t,
    pub newdb: *mut alpm_db_t,
}

#[repr(C)]
pub struct alpm_conflict_t {
    pub package1: *mut alpm_pkg_t,
    pub package2: *mut alpm_pkg_t,
    pub reason: *mut alpm_depend_t,
}

#[repr(C)]
pub struct alpm_question_conflict_t {
    pub kind: c_int,
    pub remove: c_int,
    pub conflict: *mut alpm_conflict_t,
}

#[repr(C)]
pub struct alpm_question_corrupted_t {
    pub kind: c_int,
    pub remove: c_int,
    pub filepath: *const c_char,
    pub reason: c_int,
}

#[repr(C)]
pub struct alpm_question_remove_pkgs_t {
    pub kind: c_int,
    pub skip: c_int,
    pub packages: *mut alpm_list_t,
}

#[repr(C)]
pub struct alpm_question_select_provider_t {
    pub kind: c_int,
    pub use_index: c_int,
    pub providers: *mut alpm_list_t,
    pub depend: *mut alpm_depend_t,
}

#[repr(C)]
pub struct alpm_question_import_key_t {
    pub kind: c_int,
    pub import: c_int,
    pub uid: *const c_char,
    pub fingerprint: *const c_char,
}

// -----------------------------------------------------------------------------
// Callback signatures
// -----------------------------------------------------------------------------

pub type alpm_cb_event = unsafe extern "C" fn(ctx: *mut c_void, event: *mut alpm_event_t);
pub type alpm_cb_question = unsafe extern "C" fn(ctx: *mut c_void, question: *mut alpm_question_t);
pub type alpm_cb_progress = unsafe extern "C" fn(
    ctx: *mut c_void,
    progress: c_int,
    pkg: *const c_char,
    percent: c_int,
    howmany: size_t,
    current: size_t,
);
pub type alpm_cb_fetch = unsafe extern "C" fn(
    ctx: *mut c_void,
    url: *const c_char,
    localpath: *const c_char,
    force: c_int,
) -> c_int;

// -----------------------------------------------------------------------------
// Function table
// -----------------------------------------------------------------------------

macro_rules! alpm_api {
    ($( $field:ident : fn($($arg:ty),* $(,)?) $(-> $ret:ty)? ; )*) => {
        /// Resolved libalpm entry points
        ///
        /// Field names are the C symbol names without the `alpm_` prefix.
        pub struct AlpmApi {
            $( pub $field: unsafe extern "C" fn($($arg),*) $(-> $ret)?, )*
        }

        impl AlpmApi {
            fn resolve(library: &DynamicLibrary) -> Result<Self> {
                Ok(Self {
                    $(
                        $field: {
                            let symbol = library.symbol(concat!("alpm_", stringify!($field)))?;
                            // SAFETY: the symbol was resolved from libalpm and has this C signature.
                            unsafe {
                                std::mem::transmute::<*mut c_void, unsafe extern "C" fn($($arg),*) $(-> $ret)?>(symbol)
                            }
                        },
                    )*
                })
            }
        }
    };
}

alpm_api! {
    initialize: fn(*const c_char, *const c_char, *mut c_int) -> *mut alpm_handle_t;
    release: fn(*mut alpm_handle_t) -> c_int;
    errno: fn(*mut alpm_handle_t) -> c_int;
    strerror: fn(c_int) -> *const c_char;

    option_add_architecture: fn(*mut alpm_handle_t, *const c_char) -> c_int;
    option_add_cachedir: fn(*mut alpm_handle_t, *const c_char) -> c_int;
    option_add_hookdir: fn(*mut alpm_handle_t, *const c_char) -> c_int;
    option_set_default_siglevel: fn(*mut alpm_handle_t, c_int) -> c_int;
    option_set_local_file_siglevel: fn(*mut alpm_handle_t, c_int) -> c_int;
    option_set_remote_file_siglevel: fn(*mut alpm_handle_t, c_int) -> c_int;
    option_get_local_file_siglevel: fn(*mut alpm_handle_t) -> c_int;
    option_get_remote_file_siglevel: fn(*mut alpm_handle_t) -> c_int;
    option_set_checkspace: fn(*mut alpm_handle_t, c_int) -> c_int;
    option_set_eventcb: fn(*mut alpm_handle_t, Option<alpm_cb_event>, *mut c_void) -> c_int;
    option_set_questioncb: fn(*mut alpm_handle_t, Option<alpm_cb_question>, *mut c_void) -> c_int;
    option_set_progresscb: fn(*mut alpm_handle_t, Option<alpm_cb_progress>, *mut c_void) -> c_int;
    option_set_fetchcb: fn(*mut alpm_handle_t, Option<alpm_cb_fetch>, *mut c_void) -> c_int;

    get_localdb: fn(*mut alpm_handle_t) -> *mut alpm_db_t;
    get_syncdbs: fn(*mut alpm_handle_t) -> *mut alpm_list_t;
    register_syncdb: fn(*mut alpm_handle_t, *const c_char, c_int) -> *mut alpm_db_t;
    db_add_server: fn(*mut alpm_db_t, *const c_char) -> c_int;
    db_get_servers: fn(*mut alpm_db_t) -> *mut alpm_list_t;
    db_get_name: fn(*mut alpm_db_t) -> *const c_char;
    db_set_usage: fn(*mut alpm_db_t, c_int) -> c_int;
    db_get_pkg: fn(*mut alpm_db_t, *const c_char) -> *mut alpm_pkg_t;
    db_get_pkgcache: fn(*mut alpm_db_t) -> *mut alpm_list_t;
    db_update: fn(*mut alpm_handle_t, *mut alpm_list_t, c_int) -> c_int;

    pkg_get_name: fn(*mut alpm_pkg_t) -> *const c_char;
    pkg_get_version: fn(*mut alpm_pkg_t) -> *const c_char;
    pkg_get_desc: fn(*mut alpm_pkg_t) -> *const c_char;
    pkg_get_url: fn(*mut alpm_pkg_t) -> *const c_char;
    pkg_get_filename: fn(*mut alpm_pkg_t) -> *const c_char;
    pkg_get_size: fn(*mut alpm_pkg_t) -> off_t;
    pkg_get_isize: fn(*mut alpm_pkg_t) -> off_t;
    pkg_get_replaces: fn(*mut alpm_pkg_t) -> *mut alpm_list_t;
    pkg_get_db: fn(*mut alpm_pkg_t) -> *mut alpm_db_t;
    pkg_vercmp: fn(*const c_char, *const c_char) -> c_int;
    dep_compute_string: fn(*const alpm_depend_t) -> *mut c_char;
    sync_get_new_version: fn(*mut alpm_pkg_t, *mut alpm_list_t) -> *mut alpm_pkg_t;

    trans_init: fn(*mut alpm_handle_t, c_int) -> c_int;
    trans_prepare: fn(*mut alpm_handle_t, *mut *mut alpm_list_t) -> c_int;
    trans_commit: fn(*mut alpm_handle_t, *mut *mut alpm_list_t) -> c_int;
    trans_release: fn(*mut alpm_handle_t) -> c_int;
    trans_get_add: fn(*mut alpm_handle_t) -> *mut alpm_list_t;
    trans_get_remove: fn(*mut alpm_handle_t) -> *mut alpm_list_t;
    add_pkg: fn(*mut alpm_handle_t, *mut alpm_pkg_t) -> c_int;
    remove_pkg: fn(*mut alpm_handle_t, *mut alpm_pkg_t) -> c_int;
    sync_sysupgrade: fn(*mut alpm_handle_t, c_int) -> c_int;
}

impl AlpmApi {
    /// Native description of an error code
    pub fn error_message(&self, code: c_int) -> Option<String> {
        // SAFETY: alpm_strerror returns a static string (or null) for any code.
        unsafe { string_from((self.strerror)(code)) }.filter(|message| !message.is_empty())
    }
}

impl std::fmt::Debug for AlpmApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpmApi").finish_non_exhaustive()
    }
}

static API: OnceLock<std::result::Result<AlpmApi, String>> = OnceLock::new();

/// Process-wide function table, loading libalpm on first use
pub fn api() -> Result<&'static AlpmApi> {
    API.get_or_init(|| load().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|message| Error::Library(message.clone()))
}

fn load() -> Result<AlpmApi> {
    let library = DynamicLibrary::open_first(LIBRARY_NAMES)?;
    let api = AlpmApi::resolve(&library)?;
    info!("Loaded {}", library.name);
    // The table outlives every handle; keep the library mapped for the process lifetime.
    std::mem::forget(library);
    Ok(api)
}

/// A `dlopen`ed shared object
struct DynamicLibrary {
    handle: *mut c_void,
    name: String,
}

impl DynamicLibrary {
    fn open_first(names: &[&str]) -> Result<Self> {
        let mut failures = Vec::new();
        for name in names {
            match Self::open(name) {
                Ok(library) => return Ok(library),
                Err(e) => {
                    debug!("dlopen({}) failed: {}", name, e);
                    failures.push(format!("{name}: {e}"));
                }
            }
        }
        Err(Error::Library(format!(
            "could not load libalpm ({})",
            failures.join("; ")
        )))
    }

    fn open(name: &str) -> std::result::Result<Self, String> {
        let c_name = CString::new(name).map_err(|e| e.to_string())?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(last_dl_error());
        }
        Ok(Self {
            handle,
            name: name.to_string(),
        })
    }

    fn symbol(&self, name: &str) -> Result<*mut c_void> {
        let c_name = CString::new(name).map_err(|e| Error::Library(e.to_string()))?;
        // SAFETY: handle came from a successful dlopen and c_name is NUL-terminated.
        let symbol = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if symbol.is_null() {
            return Err(Error::Library(format!(
                "{} is missing symbol {}: {}",
                self.name,
                name,
                last_dl_error()
            )));
        }
        Ok(symbol)
    }
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a thread-local NUL-terminated string.
    unsafe { string_from(libc::dlerror()) }.unwrap_or_else(|| "unknown dlopen error".to_string())
}

/// Decode a borrowed, NUL-terminated foreign string
///
/// Invalid UTF-8 is replaced rather than rejected; null yields `None`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub unsafe fn string_from(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Convert a Rust string for a native call
pub fn c_string(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| Error::InvalidState(format!("string contains a NUL byte: {value:?}")))
}
