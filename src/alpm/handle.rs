// src/alpm/handle.rs

//! Native library handle
//!
//! [`Handle`] owns one `alpm_handle_t` and implements [`Session`] and
//! [`TransactionBackend`] over it. Dropping the handle calls
//! `alpm_release`; databases and packages reached through it are owned by
//! libalpm and never freed here.

use super::callbacks::{self, CallbackContext};
use super::ffi::{
    self, AlpmApi, alpm_db_t, alpm_handle_t, alpm_list_t, alpm_pkg_t, c_string, string_from,
};
use super::list;
use super::package::PackageHandle;
use crate::callback::{CallbackRelay, NativeAccessors};
use crate::config::{DbUsage, SigLevel, SignatureLevels};
use crate::error::{Error, Result};
use crate::repository::{CachePaths, FetchResolver, MirrorSource, RepositoryMirrors};
use crate::session::{Connector, Session};
use crate::transaction::{TransFlags, TransactionBackend};
use libc::c_void;
use std::cmp::Ordering;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens native handles
#[derive(Debug, Clone, Copy, Default)]
pub struct AlpmConnector;

impl Connector for AlpmConnector {
    type Session = Handle;

    fn connect(&self, root: &Path, db_path: &Path) -> Result<Handle> {
        Handle::open(root, db_path)
    }
}

/// File signature levels saved while `NoPkgSig` is in effect
#[derive(Debug, Clone, Copy)]
struct SavedFileLevels {
    local: i32,
    remote: i32,
}

/// An open libalpm handle
pub struct Handle {
    api: &'static AlpmApi,
    raw: NonNull<alpm_handle_t>,
    callbacks: Option<Box<CallbackContext>>,
    saved_levels: Option<SavedFileLevels>,
}

impl Handle {
    /// Initialize a handle for an installation root and database directory
    pub fn open(root: &Path, db_path: &Path) -> Result<Self> {
        let api = ffi::api()?;
        let c_root = c_string(&root.to_string_lossy())?;
        let c_db = c_string(&db_path.to_string_lossy())?;
        let mut err: libc::c_int = 0;

        // SAFETY: both paths are valid C strings; err receives the failure code.
        let raw = unsafe { (api.initialize)(c_root.as_ptr(), c_db.as_ptr(), &mut err) };
        let raw = NonNull::new(raw).ok_or_else(|| {
            Error::native(
                "initialize library handle",
                api.error_message(err)
                    .unwrap_or_else(|| format!("unknown error({err})")),
            )
        })?;

        info!("Opened library handle for {}", root.display());
        Ok(Self {
            api,
            raw,
            callbacks: None,
            saved_levels: None,
        })
    }

    fn raw(&self) -> *mut alpm_handle_t {
        self.raw.as_ptr()
    }

    fn last_error(&self, operation: &str) -> Error {
        // SAFETY: the handle is live.
        let code = unsafe { (self.api.errno)(self.raw()) };
        Error::native(
            operation,
            self.api
                .error_message(code)
                .unwrap_or_else(|| format!("unknown error({code})")),
        )
    }

    fn check(&self, code: libc::c_int, operation: &str) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(self.last_error(operation))
        }
    }

    fn sync_dbs(&self) -> *mut alpm_list_t {
        // SAFETY: the handle is live; the list is owned by the handle.
        unsafe { (self.api.get_syncdbs)(self.raw()) }
    }

    fn sync_db(&self, name: &str) -> Option<*mut alpm_db_t> {
        // SAFETY: the database list belongs to the live handle.
        unsafe {
            list::collect::<alpm_db_t>(self.sync_dbs())
                .map(NonNull::as_ptr)
                .find(|db| self.api.database_name(*db).as_deref() == Some(name))
        }
    }

    fn package(&self, ptr: *mut alpm_pkg_t) -> Option<PackageHandle> {
        PackageHandle::new(self.api, ptr)
    }

    fn apply_session_options(&mut self, flags: TransFlags) {
        let checkspace = if flags.contains(TransFlags::NO_CHECK_SPACE) { 0 } else { 1 };
        // SAFETY: the handle is live.
        unsafe { (self.api.option_set_checkspace)(self.raw(), checkspace) };

        if flags.contains(TransFlags::NO_PKG_SIG) && self.saved_levels.is_none() {
            // SAFETY: the handle is live.
            let saved = unsafe {
                SavedFileLevels {
                    local: (self.api.option_get_local_file_siglevel)(self.raw()),
                    remote: (self.api.option_get_remote_file_siglevel)(self.raw()),
                }
            };
            debug!("Disabling package signature checks for this transaction");
            // SAFETY: the handle is live.
            unsafe {
                (self.api.option_set_local_file_siglevel)(
                    self.raw(),
                    SigLevel(saved.local).without_package_checks().bits(),
                );
                (self.api.option_set_remote_file_siglevel)(
                    self.raw(),
                    SigLevel(saved.remote).without_package_checks().bits(),
                );
            }
            self.saved_levels = Some(saved);
        }
    }

    fn restore_session_options(&mut self) {
        if let Some(saved) = self.saved_levels.take() {
            // SAFETY: the handle is live.
            unsafe {
                (self.api.option_set_local_file_siglevel)(self.raw(), saved.local);
                (self.api.option_set_remote_file_siglevel)(self.raw(), saved.remote);
            }
        }
    }
}

impl TransactionBackend for Handle {
    type Package = PackageHandle;

    fn trans_init(&mut self, flags: TransFlags) -> i32 {
        self.apply_session_options(flags);
        // SAFETY: the handle is live.
        unsafe { (self.api.trans_init)(self.raw(), flags.native_bits()) }
    }

    fn trans_add_package(&mut self, package: &PackageHandle) -> i32 {
        // SAFETY: package belongs to a database of this handle.
        unsafe { (self.api.add_pkg)(self.raw(), package.as_ptr()) }
    }

    fn trans_remove_package(&mut self, package: &PackageHandle) -> i32 {
        // SAFETY: package belongs to the local database of this handle.
        unsafe { (self.api.remove_pkg)(self.raw(), package.as_ptr()) }
    }

    fn trans_sysupgrade(&mut self, enable_downgrade: bool) -> i32 {
        // SAFETY: the handle is live.
        unsafe { (self.api.sync_sysupgrade)(self.raw(), libc::c_int::from(enable_downgrade)) }
    }

    fn trans_has_targets(&self) -> bool {
        // SAFETY: the handle is live; the lists belong to the open transaction.
        unsafe {
            list::count((self.api.trans_get_add)(self.raw())) > 0
                || list::count((self.api.trans_get_remove)(self.raw())) > 0
        }
    }

    fn trans_prepare(&mut self) -> i32 {
        // SAFETY: a null data pointer asks libalpm to free the failure list itself.
        unsafe { (self.api.trans_prepare)(self.raw(), ptr::null_mut()) }
    }

    fn trans_commit(&mut self) -> i32 {
        // SAFETY: as for prepare.
        unsafe { (self.api.trans_commit)(self.raw(), ptr::null_mut()) }
    }

    fn trans_release(&mut self) -> i32 {
        // SAFETY: the handle is live.
        let code = unsafe { (self.api.trans_release)(self.raw()) };
        self.restore_session_options();
        code
    }

    fn errno(&self) -> i32 {
        // SAFETY: the handle is live.
        unsafe { (self.api.errno)(self.raw()) }
    }

    fn strerror(&self, code: i32) -> Option<String> {
        self.api.error_message(code)
    }
}

impl Session for Handle {
    fn set_architecture(&mut self, arch: &str) -> Result<()> {
        let c_arch = c_string(arch)?;
        // SAFETY: the handle is live; libalpm copies the string.
        let code = unsafe { (self.api.option_add_architecture)(self.raw(), c_arch.as_ptr()) };
        self.check(code, "set architecture")
    }

    fn add_cache_dir(&mut self, dir: &Path) -> Result<()> {
        let c_dir = c_string(&dir.to_string_lossy())?;
        // SAFETY: the handle is live; libalpm copies the string.
        let code = unsafe { (self.api.option_add_cachedir)(self.raw(), c_dir.as_ptr()) };
        self.check(code, "add cache directory")
    }

    fn add_hook_dir(&mut self, dir: &Path) -> Result<()> {
        let c_dir = c_string(&dir.to_string_lossy())?;
        // SAFETY: the handle is live; libalpm copies the string.
        let code = unsafe { (self.api.option_add_hookdir)(self.raw(), c_dir.as_ptr()) };
        self.check(code, "add hook directory")
    }

    fn set_signature_levels(&mut self, levels: SignatureLevels) -> Result<()> {
        // SAFETY: the handle is live.
        unsafe {
            self.check(
                (self.api.option_set_default_siglevel)(self.raw(), levels.default.bits()),
                "set default signature level",
            )?;
            self.check(
                (self.api.option_set_local_file_siglevel)(self.raw(), levels.local_file.bits()),
                "set local file signature level",
            )?;
            self.check(
                (self.api.option_set_remote_file_siglevel)(self.raw(), levels.remote_file.bits()),
                "set remote file signature level",
            )
        }
    }

    fn install_callbacks(&mut self, relay: Arc<CallbackRelay>, caches: CachePaths) -> Result<()> {
        let mirrors = NativeMirrors {
            api: self.api,
            handle: self.raw(),
        };
        let context = Box::new(CallbackContext {
            relay,
            fetcher: FetchResolver::new(mirrors, caches)?,
            api: self.api,
        });
        let ctx = (&*context as *const CallbackContext).cast_mut().cast::<c_void>();

        // SAFETY: ctx stays valid until after alpm_release (see Drop); the
        // previous context, if any, is dropped only after being replaced.
        unsafe {
            self.check(
                (self.api.option_set_eventcb)(self.raw(), Some(callbacks::on_event), ctx),
                "register event callback",
            )?;
            self.check(
                (self.api.option_set_questioncb)(self.raw(), Some(callbacks::on_question), ctx),
                "register question callback",
            )?;
            self.check(
                (self.api.option_set_progresscb)(self.raw(), Some(callbacks::on_progress), ctx),
                "register progress callback",
            )?;
            self.check(
                (self.api.option_set_fetchcb)(self.raw(), Some(callbacks::on_fetch), ctx),
                "register fetch callback",
            )?;
        }
        self.callbacks = Some(context);
        Ok(())
    }

    fn register_repository(&mut self, name: &str, sig_level: SigLevel, usage: DbUsage) -> Result<()> {
        let c_name = c_string(name)?;
        // SAFETY: the handle is live; the database is owned by the handle.
        let db = unsafe { (self.api.register_syncdb)(self.raw(), c_name.as_ptr(), sig_level.bits()) };
        if db.is_null() {
            return Err(self.last_error(&format!("register repository '{name}'")));
        }
        // SAFETY: db was just returned by the handle.
        let code = unsafe { (self.api.db_set_usage)(db, usage.bits()) };
        self.check(code, &format!("set usage of repository '{name}'"))?;
        debug!("Registered repository {}", name);
        Ok(())
    }

    fn add_server(&mut self, repository: &str, url: &str) -> Result<()> {
        let db = self
            .sync_db(repository)
            .ok_or_else(|| Error::NotFound(format!("repository '{repository}'")))?;
        let c_url = c_string(url)?;
        // SAFETY: db belongs to the live handle; libalpm copies the URL.
        let code = unsafe { (self.api.db_add_server)(db, c_url.as_ptr()) };
        self.check(code, &format!("add mirror to '{repository}'"))
    }

    fn update_databases(&mut self, force: bool) -> Result<()> {
        // SAFETY: the handle and its database list are live.
        let code = unsafe {
            (self.api.db_update)(self.raw(), self.sync_dbs(), libc::c_int::from(force))
        };
        if code < 0 {
            return Err(self.last_error("update databases"));
        }
        Ok(())
    }

    fn find_sync_package(&self, name: &str) -> Option<PackageHandle> {
        let c_name = c_string(name).ok()?;
        // SAFETY: databases and packages belong to the live handle.
        unsafe {
            list::collect::<alpm_db_t>(self.sync_dbs())
                .find_map(|db| self.package((self.api.db_get_pkg)(db.as_ptr(), c_name.as_ptr())))
        }
    }

    fn find_local_package(&self, name: &str) -> Option<PackageHandle> {
        let c_name = c_string(name).ok()?;
        // SAFETY: the local database belongs to the live handle.
        unsafe {
            let local = (self.api.get_localdb)(self.raw());
            if local.is_null() {
                return None;
            }
            self.package((self.api.db_get_pkg)(local, c_name.as_ptr()))
        }
    }

    fn installed_packages(&self) -> Vec<PackageHandle> {
        // SAFETY: the local database and its cache belong to the live handle.
        unsafe {
            let local = (self.api.get_localdb)(self.raw());
            if local.is_null() {
                return Vec::new();
            }
            list::collect::<alpm_pkg_t>((self.api.db_get_pkgcache)(local))
                .filter_map(|pkg| self.package(pkg.as_ptr()))
                .collect()
        }
    }

    fn newer_version(&self, installed: &PackageHandle) -> Option<PackageHandle> {
        // SAFETY: the package and the database list belong to the live handle.
        unsafe { self.package((self.api.sync_get_new_version)(installed.as_ptr(), self.sync_dbs())) }
    }

    fn compare_versions(&self, a: &str, b: &str) -> Ordering {
        let (Ok(c_a), Ok(c_b)) = (c_string(a), c_string(b)) else {
            return a.cmp(b);
        };
        // SAFETY: both arguments are valid C strings.
        unsafe { (self.api.pkg_vercmp)(c_a.as_ptr(), c_b.as_ptr()) }.cmp(&0)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // SAFETY: the handle is live and released exactly once here.
        let code = unsafe { (self.api.release)(self.raw()) };
        if code != 0 {
            warn!("Releasing library handle returned {}", code);
        }
        // Callbacks cannot fire after release.
        self.callbacks = None;
        debug!("Released library handle");
    }
}

/// Mirror information read from the handle's registered databases
pub struct NativeMirrors {
    api: &'static AlpmApi,
    handle: *mut alpm_handle_t,
}

impl NativeMirrors {
    fn databases(&self) -> std::vec::IntoIter<NonNull<alpm_db_t>> {
        // SAFETY: the handle outlives its callback context, which owns self.
        unsafe { list::collect::<alpm_db_t>((self.api.get_syncdbs)(self.handle)) }
    }
}

impl MirrorSource for NativeMirrors {
    fn repositories(&self) -> Vec<RepositoryMirrors> {
        self.databases()
            .filter_map(|db| {
                // SAFETY: see `databases`.
                unsafe {
                    Some(RepositoryMirrors {
                        name: self.api.database_name(db.as_ptr())?,
                        servers: list::collect_strings((self.api.db_get_servers)(db.as_ptr())),
                    })
                }
            })
            .collect()
    }

    fn repository_for_file(&self, file_name: &str) -> Option<String> {
        self.databases().find_map(|db| {
            // SAFETY: see `databases`.
            unsafe {
                let listed = list::collect::<alpm_pkg_t>((self.api.db_get_pkgcache)(db.as_ptr()))
                    .any(|pkg| {
                        string_from((self.api.pkg_get_filename)(pkg.as_ptr())).as_deref()
                            == Some(file_name)
                    });
                if listed {
                    self.api.database_name(db.as_ptr())
                } else {
                    None
                }
            }
        })
    }
}
