//! Whole-group termination for shell children.
//!
//! Every command is spawned as the leader of a new process group, so the group id equals
//! the child's pid. Killing the group reaches subshells, pipeline members and background
//! jobs that a plain `kill` on the shell would leave running.

use std::io;

/// Send `SIGKILL` to every process in group `pgid`. An already empty group is not an error.
#[cfg(unix)]
pub(crate) fn kill_process_group(pgid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "process group id out of range"))?;
    // SAFETY: killpg has no memory-safety preconditions.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}
