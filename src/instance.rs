//! Single running instance, enforced with a PID marker file
//!
//! A new instance terminates whatever process the marker names and takes the
//! marker over. Clean shutdown deletes it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::data_dir;
use crate::error::{Error, Result};

/// Sends a terminate request to another process
pub trait ProcessTerminator {
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Terminates processes through the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTerminator;

#[cfg(unix)]
impl ProcessTerminator for SystemTerminator {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
impl ProcessTerminator for SystemTerminator {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        use windows::Win32::Foundation::{CloseHandle, BOOL};
        use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

        // No handlers run in the target; its keyboard hook goes away with it.
        unsafe {
            let process = OpenProcess(PROCESS_TERMINATE, BOOL(0), pid)?;
            let result = TerminateProcess(process, 1);
            let _ = CloseHandle(process);
            result?;
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
impl ProcessTerminator for SystemTerminator {
    fn terminate(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "cannot terminate processes"))
    }
}

pub struct InstanceGuard<T = SystemTerminator> {
    path: PathBuf,
    terminator: T,
}

impl InstanceGuard<SystemTerminator> {
    pub fn new(path: PathBuf) -> Self {
        Self::with_terminator(path, SystemTerminator)
    }

    /// ~/.catlock/catlock.lock
    pub fn default_path() -> PathBuf {
        data_dir().join("catlock.lock")
    }
}

impl<T: ProcessTerminator> InstanceGuard<T> {
    pub fn with_terminator(path: PathBuf, terminator: T) -> Self {
        Self { path, terminator }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Terminate any previous instance and write our own PID to the marker
    pub fn acquire(&self) -> Result<()> {
        let own_pid = std::process::id();

        match read_marker(&self.path) {
            Ok(Some(pid)) if pid == own_pid => debug!("Marker already names this process"),
            Ok(Some(pid)) => {
                info!("Terminating previous instance (pid {})", pid);
                if let Err(e) = self.terminator.terminate(pid) {
                    debug!("Previous instance {} already gone: {}", pid, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable marker {}: {}", self.path.display(), e),
        }

        self.write_marker(own_pid)
    }

    /// Delete the marker; a missing marker is fine
    pub fn release(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed instance marker {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::MarkerWrite {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_marker(&self, pid: u32) -> Result<()> {
        let marker_err = |source| Error::MarkerWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(marker_err)?;
        }
        fs::write(&self.path, pid.to_string()).map_err(marker_err)
    }
}

/// PID named by the marker; `None` when there is no usable marker
///
/// PID 0 is never a process of ours: `kill(0, ..)` addresses the whole
/// process group.
fn read_marker(path: &Path) -> io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok().filter(|pid| *pid != 0)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
