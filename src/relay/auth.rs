// src/relay/auth.rs

//! Privilege elevation for worker and sideband child processes
//!
//! Elevation through `sudo` takes two steps. `sudo -S -p "" -v` validates
//! the password read from its own standard input, which is closed right
//! after the secret so a wrong password ends the process instead of
//! waiting for another attempt. The child then starts with `sudo -n` on
//! the cached credentials, so nothing it reads is ever taken as a
//! password. When already running as root the child is spawned directly.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Name of the elevation front end looked up on `PATH`
pub const ELEVATION_PROGRAM: &str = "sudo";

/// How a privileged child is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    /// The current process is already root
    AlreadyRoot,
    /// Elevate through a password-prompting front end
    Sudo { program: PathBuf },
}

impl Elevation {
    /// Pick the elevation method for the current process
    pub fn detect() -> Result<Self> {
        // SAFETY: geteuid has no preconditions.
        if unsafe { libc::geteuid() } == 0 {
            return Ok(Self::AlreadyRoot);
        }
        let program = which::which(ELEVATION_PROGRAM).map_err(|e| {
            Error::Authentication(format!("{ELEVATION_PROGRAM} is not available: {e}"))
        })?;
        Ok(Self::Sudo { program })
    }

    /// True if a secret must be supplied
    pub fn needs_secret(&self) -> bool {
        matches!(self, Self::Sudo { .. })
    }

    /// Command line that runs `program args...` with elevated privileges
    pub fn command(&self, program: &Path, args: &[OsString]) -> Command {
        match self {
            Self::AlreadyRoot => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Self::Sudo { program: sudo } => {
                let mut cmd = Command::new(sudo);
                cmd.args(["-n", "--"]).arg(program).args(args);
                cmd
            }
        }
    }

    /// Validate `secret` and cache the credentials for [`Elevation::command`]
    ///
    /// A rejected password is an authentication failure.
    pub fn authenticate(&self, secret: &Zeroizing<String>) -> Result<()> {
        let Self::Sudo { program } = self else {
            return Ok(());
        };

        let mut validate = Command::new(program);
        validate
            .args(["-S", "-p", "", "-v"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = validate.spawn().map_err(|e| {
            Error::Authentication(format!("failed to start {}: {e}", program.display()))
        })?;

        // Dropping the pipe gives sudo end of input for any retry.
        if let Some(mut stdin) = child.stdin.take() {
            match write_secret(&mut stdin, secret) {
                Ok(()) => {}
                // Already-cached credentials: sudo exits without reading
                Err(Error::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!("{} did not read the password", program.display());
                }
                Err(e) => return Err(e),
            }
        }

        let output = child.wait_with_output().map_err(|e| {
            Error::Authentication(format!("failed to wait for {}: {e}", program.display()))
        })?;
        if output.status.success() {
            debug!("Credentials validated");
            return Ok(());
        }

        let reason = String::from_utf8_lossy(&output.stderr);
        let reason = reason.lines().last().unwrap_or_default().trim();
        warn!("Privilege elevation refused ({})", output.status);
        Err(Error::Authentication(if reason.is_empty() {
            format!("authentication failed ({})", output.status)
        } else {
            format!("authentication failed: {reason}")
        }))
    }
}

/// Write the elevation secret as one line
pub fn write_secret<W: Write>(input: &mut W, secret: &Zeroizing<String>) -> Result<()> {
    let mut line = Zeroizing::new(String::with_capacity(secret.len() + 1));
    line.push_str(secret);
    line.push('\n');
    input.write_all(line.as_bytes())?;
    input.flush()?;
    Ok(())
}

/// Authenticate, then spawn `program args...` elevated with piped standard input
///
/// `stdout`/`stderr` select which stream carries the protocol.
pub fn spawn_elevated(
    elevation: &Elevation,
    program: &Path,
    args: &[OsString],
    stdout: Stdio,
    stderr: Stdio,
    secret: Option<&Zeroizing<String>>,
) -> Result<Child> {
    if elevation.needs_secret() {
        let secret = secret.ok_or_else(|| {
            Error::Authentication("no password available for privilege elevation".to_string())
        })?;
        elevation.authenticate(secret)?;
    }

    let mut command = elevation.command(program, args);
    command.stdin(Stdio::piped()).stdout(stdout).stderr(stderr);
    debug!("Spawning {:?}", command);

    let child = command.spawn().map_err(|e| {
        Error::Authentication(format!("failed to start {}: {e}", program.display()))
    })?;

    info!("Started privileged {}", program.display());
    Ok(child)
}
