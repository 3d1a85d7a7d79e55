// src/callback/decode.rs

//! Decoders for native callback payloads
//!
//! Each payload starts with an integer discriminator. The decoder reads the
//! discriminator first and only then reinterprets the pointer as the layout
//! that belongs to that value. Unrecognized discriminators decode to `None`.

use super::event::{
    EventKind, OperationEvent, PackageOperation, PackageRef, ProgressEvent, ProgressKind,
    Question, QuestionKind,
};
use crate::alpm::ffi::{self, *};
use crate::alpm::list;
use libc::{c_char, c_int};

/// Field accessors needed to describe packages named in callbacks
///
/// The native function table implements this; tests substitute a fake that
/// stores Rust values behind the opaque pointers.
pub trait NativeAccessors {
    /// # Safety
    /// `pkg` must be null or a live package record.
    unsafe fn package_name(&self, pkg: *mut alpm_pkg_t) -> Option<String>;

    /// # Safety
    /// `pkg` must be null or a live package record.
    unsafe fn package_version(&self, pkg: *mut alpm_pkg_t) -> Option<String>;

    /// # Safety
    /// `db` must be null or a live database record.
    unsafe fn database_name(&self, db: *mut alpm_db_t) -> Option<String>;

    /// # Safety
    /// `dep` must be null or a live dependency record.
    unsafe fn dependency_string(&self, dep: *const alpm_depend_t) -> Option<String>;

    /// Native description of an error code
    fn error_message(&self, code: c_int) -> Option<String>;
}

impl NativeAccessors for AlpmApi {
    unsafe fn package_name(&self, pkg: *mut alpm_pkg_t) -> Option<String> {
        if pkg.is_null() {
            return None;
        }
        // SAFETY: pkg is a live package per the caller.
        unsafe { string_from((self.pkg_get_name)(pkg)) }
    }

    unsafe fn package_version(&self, pkg: *mut alpm_pkg_t) -> Option<String> {
        if pkg.is_null() {
            return None;
        }
        // SAFETY: pkg is a live package per the caller.
        unsafe { string_from((self.pkg_get_version)(pkg)) }
    }

    unsafe fn database_name(&self, db: *mut alpm_db_t) -> Option<String> {
        if db.is_null() {
            return None;
        }
        // SAFETY: db is a live database per the caller.
        unsafe { string_from((self.db_get_name)(db)) }
    }

    unsafe fn dependency_string(&self, dep: *const alpm_depend_t) -> Option<String> {
        if dep.is_null() {
            return None;
        }
        // SAFETY: dep is live; the result is heap allocated and owned by us.
        unsafe {
            let raw = (self.dep_compute_string)(dep);
            let value = string_from(raw);
            if !raw.is_null() {
                libc::free(raw.cast());
            }
            value.filter(|s| !s.is_empty())
        }
    }

    fn error_message(&self, code: c_int) -> Option<String> {
        AlpmApi::error_message(self, code)
    }
}

/// Decode a progress callback
///
/// # Safety
/// `package` must be null or a NUL-terminated string.
pub unsafe fn progress(
    kind: c_int,
    package: *const c_char,
    percent: c_int,
    howmany: usize,
    current: usize,
) -> Option<ProgressEvent> {
    let kind = ProgressKind::from_raw(kind)?;
    // SAFETY: forwarded from the caller.
    let package = unsafe { ffi::string_from(package) };
    Some(ProgressEvent::new(kind, package, percent, current, howmany))
}

unsafe fn package_ref<A: NativeAccessors + ?Sized>(
    access: &A,
    pkg: *mut alpm_pkg_t,
) -> Option<PackageRef> {
    // SAFETY: forwarded from the caller.
    unsafe {
        Some(PackageRef {
            name: access.package_name(pkg)?,
            version: access.package_version(pkg).unwrap_or_default(),
        })
    }
}

/// Decode a lifecycle event
///
/// # Safety
/// `raw` must be null or point to a native event whose layout matches its
/// discriminator, with every referenced record still alive.
pub unsafe fn event<A: NativeAccessors + ?Sized>(
    access: &A,
    raw: *const alpm_event_t,
) -> Option<OperationEvent> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: every event starts with the discriminator; the variant cast
    // below happens only for the matching discriminator values.
    unsafe {
        let any = &*raw.cast::<alpm_event_any_t>();
        let kind = EventKind::from_raw(any.kind)?;

        let decoded = match kind {
            EventKind::PackageOperationStart | EventKind::PackageOperationDone => {
                let e = &*raw.cast::<alpm_event_package_operation_t>();
                OperationEvent::PackageOperation {
                    kind,
                    operation: PackageOperation::from_raw(e.operation)?,
                    old_package: package_ref(access, e.oldpkg),
                    new_package: package_ref(access, e.newpkg),
                }
            }
            EventKind::ScriptletInfo => {
                let e = &*raw.cast::<alpm_event_scriptlet_info_t>();
                let line = string_from(e.line).unwrap_or_default();
                OperationEvent::ScriptletInfo {
                    line: line.trim_end_matches('\n').to_string(),
                }
            }
            EventKind::DatabaseMissing => {
                let e = &*raw.cast::<alpm_event_database_missing_t>();
                OperationEvent::DatabaseMissing {
                    database: string_from(e.dbname).unwrap_or_default(),
                }
            }
            EventKind::PkgRetrieveStart
            | EventKind::PkgRetrieveDone
            | EventKind::PkgRetrieveFailed => {
                let e = &*raw.cast::<alpm_event_pkg_retrieve_t>();
                OperationEvent::Retrieve {
                    kind,
                    count: e.num,
                    total_size: e.total_size as i64,
                }
            }
            EventKind::HookRunStart | EventKind::HookRunDone => {
                let e = &*raw.cast::<alpm_event_hook_run_t>();
                OperationEvent::HookRun {
                    kind,
                    name: string_from(e.name).unwrap_or_default(),
                    description: string_from(e.desc),
                    position: e.position,
                    total: e.total,
                }
            }
            EventKind::PacnewCreated => {
                let e = &*raw.cast::<alpm_event_pacnew_created_t>();
                OperationEvent::ConfigSaved {
                    kind,
                    package: access.package_name(e.newpkg),
                    file: string_from(e.file).unwrap_or_default(),
                }
            }
            EventKind::PacsaveCreated => {
                let e = &*raw.cast::<alpm_event_pacsave_created_t>();
                OperationEvent::ConfigSaved {
                    kind,
                    package: access.package_name(e.oldpkg),
                    file: string_from(e.file).unwrap_or_default(),
                }
            }
            EventKind::OptdepRemoval => {
                let e = &*raw.cast::<alpm_event_optdep_removal_t>();
                OperationEvent::OptionalDependencyRemoval {
                    package: access.package_name(e.pkg),
                    dependency: access.dependency_string(e.optdep),
                }
            }
            _ => OperationEvent::Phase { kind },
        };
        Some(decoded)
    }
}

/// Decode a question
///
/// # Safety
/// `raw` must be null or point to a native question whose layout matches
/// its discriminator, with every referenced record still alive.
pub unsafe fn question<A: NativeAccessors + ?Sized>(
    access: &A,
    raw: *const alpm_question_t,
) -> Option<Question> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: see `event`; the answer field sits right after the
    // discriminator in every variant.
    unsafe {
        let any = &*raw.cast::<alpm_question_any_t>();
        let kind = QuestionKind::from_raw(any.kind)?;
        let default_answer = any.answer;
        let mut providers = Vec::new();

        let prompt = match kind {
            QuestionKind::InstallIgnorePkg => {
                let q = &*raw.cast::<alpm_question_install_ignorepkg_t>();
                let name = access.package_name(q.pkg).unwrap_or_default();
                format!("{name} is in IgnorePkg/IgnoreGroup. Install anyway?")
            }
            QuestionKind::ReplacePkg => {
                let q = &*raw.cast::<alpm_question_replace_t>();
                let old = access.package_name(q.oldpkg).unwrap_or_default();
                let new = access.package_name(q.newpkg).unwrap_or_default();
                match access.database_name(q.newdb) {
                    Some(db) => format!("Replace {old} with {db}/{new}?"),
                    None => format!("Replace {old} with {new}?"),
                }
            }
            QuestionKind::ConflictPkg => {
                let q = &*raw.cast::<alpm_question_conflict_t>();
                let (first, second, reason) = if q.conflict.is_null() {
                    (String::new(), String::new(), None)
                } else {
                    let c = &*q.conflict;
                    (
                        access.package_name(c.package1).unwrap_or_default(),
                        access.package_name(c.package2).unwrap_or_default(),
                        access.dependency_string(c.reason),
                    )
                };
                match reason {
                    Some(reason) if reason != first && reason != second => format!(
                        "{first} and {second} are in conflict ({reason}). Remove {second}?"
                    ),
                    _ => format!("{first} and {second} are in conflict. Remove {second}?"),
                }
            }
            QuestionKind::CorruptedPkg => {
                let q = &*raw.cast::<alpm_question_corrupted_t>();
                let file = string_from(q.filepath).unwrap_or_default();
                let reason = access
                    .error_message(q.reason)
                    .unwrap_or_else(|| format!("unknown error({})", q.reason));
                format!("File {file} is corrupted ({reason}). Do you want to delete it?")
            }
            QuestionKind::RemovePkgs => {
                let q = &*raw.cast::<alpm_question_remove_pkgs_t>();
                let names: Vec<String> = list::collect::<alpm_pkg_t>(q.packages)
                    .filter_map(|pkg| access.package_name(pkg.as_ptr()))
                    .collect();
                format!(
                    "The following packages cannot be upgraded due to unresolvable dependencies: {}. Skip them for this upgrade?",
                    names.join(" ")
                )
            }
            QuestionKind::SelectProvider => {
                let q = &*raw.cast::<alpm_question_select_provider_t>();
                let dependency = access.dependency_string(q.depend).unwrap_or_default();
                providers = list::collect::<alpm_pkg_t>(q.providers)
                    .map(|pkg| provider_label(access, pkg.as_ptr()))
                    .collect();
                format!(
                    "There are {} providers available for {}",
                    providers.len(),
                    dependency
                )
            }
            QuestionKind::ImportKey => {
                let q = &*raw.cast::<alpm_question_import_key_t>();
                let fingerprint = string_from(q.fingerprint).unwrap_or_default();
                let uid = string_from(q.uid).unwrap_or_default();
                format!("Import PGP key {fingerprint}, \"{uid}\"?")
            }
        };

        Some(Question {
            kind,
            prompt,
            default_answer,
            providers,
        })
    }
}

unsafe fn provider_label<A: NativeAccessors + ?Sized>(access: &A, pkg: *mut alpm_pkg_t) -> String {
    // SAFETY: pkg comes from a live provider list.
    unsafe {
        let name = access.package_name(pkg).unwrap_or_default();
        match access.package_version(pkg) {
            Some(version) => format!("{name} {version}"),
            None => name,
        }
    }
}

/// Overwrite the answer field of a native question
///
/// # Safety
/// `raw` must point to a live native question.
pub unsafe fn write_answer(raw: *mut alpm_question_t, answer: i32) {
    // SAFETY: the answer field follows the discriminator in every variant.
    unsafe {
        (*raw.cast::<alpm_question_any_t>()).answer = answer;
    }
}
