// src/transaction/flags.rs

//! Transaction flag set
//!
//! The low bits mirror libalpm's `alpm_transflag_t`. `NO_EXTRACT`,
//! `NO_PKG_SIG` and `NO_CHECK_SPACE` have no native transaction bit; the
//! native session turns them into session options when the transaction
//! is initialized.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of transaction flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransFlags(u32);

impl TransFlags {
    pub const NONE: Self = Self(0);
    pub const NO_DEPS: Self = Self(1);
    pub const NO_SAVE: Self = Self(1 << 2);
    pub const NO_DEP_VERSION: Self = Self(1 << 3);
    pub const CASCADE: Self = Self(1 << 4);
    pub const RECURSE: Self = Self(1 << 5);
    pub const DB_ONLY: Self = Self(1 << 6);
    pub const NO_HOOKS: Self = Self(1 << 7);
    pub const ALL_DEPS: Self = Self(1 << 8);
    pub const DOWNLOAD_ONLY: Self = Self(1 << 9);
    pub const NO_SCRIPTLET: Self = Self(1 << 10);
    pub const NO_CONFLICTS: Self = Self(1 << 11);
    pub const NEEDED: Self = Self(1 << 13);
    pub const ALL_EXPLICIT: Self = Self(1 << 14);
    pub const UNNEEDED: Self = Self(1 << 15);
    pub const RECURSE_ALL: Self = Self(1 << 16);
    pub const NO_LOCK: Self = Self(1 << 17);

    pub const NO_EXTRACT: Self = Self(1 << 24);
    pub const NO_PKG_SIG: Self = Self(1 << 25);
    pub const NO_CHECK_SPACE: Self = Self(1 << 26);

    const NATIVE_MASK: u32 = (1 << 18) - 1;

    /// Flags implied by `DB_ONLY`
    pub const DB_ONLY_IMPLIES: Self = Self(
        Self::NO_DEPS.0 | Self::NO_EXTRACT.0 | Self::NO_PKG_SIG.0 | Self::NO_CHECK_SPACE.0,
    );

    const NAMES: &'static [(&'static str, TransFlags)] = &[
        ("NoDeps", Self::NO_DEPS),
        ("NoSave", Self::NO_SAVE),
        ("NoDepVersion", Self::NO_DEP_VERSION),
        ("Cascade", Self::CASCADE),
        ("Recurse", Self::RECURSE),
        ("DbOnly", Self::DB_ONLY),
        ("NoHooks", Self::NO_HOOKS),
        ("AllDeps", Self::ALL_DEPS),
        ("DownloadOnly", Self::DOWNLOAD_ONLY),
        ("NoScriptlet", Self::NO_SCRIPTLET),
        ("NoConflicts", Self::NO_CONFLICTS),
        ("Needed", Self::NEEDED),
        ("AllExplicit", Self::ALL_EXPLICIT),
        ("Unneeded", Self::UNNEEDED),
        ("RecurseAll", Self::RECURSE_ALL),
        ("NoLock", Self::NO_LOCK),
        ("NoExtract", Self::NO_EXTRACT),
        ("NoPkgSig", Self::NO_PKG_SIG),
        ("NoCheckSpace", Self::NO_CHECK_SPACE),
    ];

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Bits understood by the native transaction init call
    pub fn native_bits(self) -> i32 {
        (self.0 & Self::NATIVE_MASK) as i32
    }

    /// True if every flag in `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flag is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flag set with implications applied
    ///
    /// `DB_ONLY` also sets `NO_DEPS`, `NO_EXTRACT`, `NO_PKG_SIG` and
    /// `NO_CHECK_SPACE`.
    pub fn effective(self) -> Self {
        if self.contains(Self::DB_ONLY) {
            self | Self::DB_ONLY_IMPLIES
        } else {
            self
        }
    }

    /// Parse a single flag name (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self> {
        Self::NAMES
            .iter()
            .find(|(flag_name, _)| flag_name.eq_ignore_ascii_case(name))
            .map(|(_, flag)| *flag)
            .ok_or_else(|| Error::Config(format!("unknown transaction flag '{name}'")))
    }

    /// Parse a list of flag names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names.iter().try_fold(Self::NONE, |acc, name| {
            Ok(acc | Self::from_name(name.as_ref())?)
        })
    }

    /// Names of the set flags, in declaration order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl BitOr for TransFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TransFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TransFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "TransFlags(NONE)");
        }
        write!(f, "TransFlags({})", self.names().join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_only_implications() {
        let effective = TransFlags::DB_ONLY.effective();
        assert!(effective.contains(TransFlags::DB_ONLY));
        assert!(effective.contains(TransFlags::NO_DEPS));
        assert!(effective.contains(TransFlags::NO_EXTRACT));
        assert!(effective.contains(TransFlags::NO_PKG_SIG));
        assert!(effective.contains(TransFlags::NO_CHECK_SPACE));
    }

    #[test]
    fn test_effective_without_db_only_is_identity() {
        let flags = TransFlags::NO_SCRIPTLET | TransFlags::NO_HOOKS;
        assert_eq!(flags.effective(), flags);
    }

    #[test]
    fn test_native_bits_strip_session_flags() {
        let flags = TransFlags::DB_ONLY.effective();
        assert_eq!(
            flags.native_bits(),
            (TransFlags::DB_ONLY.bits() | TransFlags::NO_DEPS.bits()) as i32
        );
    }

    #[test]
    fn test_names_round_trip() {
        let flags = TransFlags::from_names(&["noscriptlet", "NoHooks"]).unwrap();
        assert_eq!(flags, TransFlags::NO_SCRIPTLET | TransFlags::NO_HOOKS);
        assert_eq!(flags.names(), vec!["NoHooks", "NoScriptlet"]);
        assert!(TransFlags::from_name("Bogus").is_err());
    }
}
