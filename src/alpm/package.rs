// src/alpm/package.rs

//! Non-owning view over a native package record

use super::ffi::{AlpmApi, alpm_depend_t, alpm_pkg_t, string_from};
use super::list;
use crate::callback::NativeAccessors;
use crate::package::{LOCAL_REPOSITORY, PackageView};
use std::fmt;
use std::ptr::NonNull;

/// Reference to a package owned by a native database or transaction
///
/// The handle never frees the record. It is only valid while the owning
/// session is alive, which the borrow on [`Handle`](super::Handle) methods
/// that hand these out does not express; callers snapshot with
/// [`PackageView::to_info`] before releasing the session.
#[derive(Clone, Copy)]
pub struct PackageHandle {
    ptr: NonNull<alpm_pkg_t>,
    api: &'static AlpmApi,
}

impl PackageHandle {
    /// Wrap a native package pointer; null yields `None`
    pub(crate) fn new(api: &'static AlpmApi, ptr: *mut alpm_pkg_t) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, api })
    }

    pub(crate) fn as_ptr(self) -> *mut alpm_pkg_t {
        self.ptr.as_ptr()
    }

    /// File name of the package archive in its repository
    pub fn filename(&self) -> Option<String> {
        // SAFETY: the record is live while the session is.
        unsafe { string_from((self.api.pkg_get_filename)(self.as_ptr())) }
    }

    /// Installed size in bytes
    pub fn installed_size(&self) -> i64 {
        // SAFETY: the record is live while the session is.
        unsafe { (self.api.pkg_get_isize)(self.as_ptr()) as i64 }
    }
}

impl PackageView for PackageHandle {
    fn name(&self) -> String {
        // SAFETY: the record is live while the session is.
        unsafe { self.api.package_name(self.as_ptr()) }.unwrap_or_default()
    }

    fn version(&self) -> String {
        // SAFETY: the record is live while the session is.
        unsafe { self.api.package_version(self.as_ptr()) }.unwrap_or_default()
    }

    fn size(&self) -> i64 {
        // SAFETY: the record is live while the session is.
        unsafe { (self.api.pkg_get_size)(self.as_ptr()) as i64 }
    }

    fn description(&self) -> Option<String> {
        // SAFETY: the record is live while the session is.
        unsafe { string_from((self.api.pkg_get_desc)(self.as_ptr())) }
    }

    fn url(&self) -> Option<String> {
        // SAFETY: the record is live while the session is.
        unsafe { string_from((self.api.pkg_get_url)(self.as_ptr())) }
    }

    fn replaces(&self) -> Vec<String> {
        // SAFETY: the list and its dependency records belong to the package.
        unsafe {
            list::collect::<alpm_depend_t>((self.api.pkg_get_replaces)(self.as_ptr()))
                .filter_map(|dep| self.api.dependency_string(dep.as_ptr()))
                .collect()
        }
    }

    fn repository(&self) -> String {
        // SAFETY: the owning database outlives the package record.
        unsafe {
            let db = (self.api.pkg_get_db)(self.as_ptr());
            self.api.database_name(db)
        }
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| LOCAL_REPOSITORY.to_string())
    }
}

impl fmt::Debug for PackageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageHandle")
            .field("ptr", &self.ptr)
            .finish()
    }
}
