// Ties the supervised server's lifetime to ours so a crashed control plane
// never leaves an orphaned game server holding the world lock.

/// Runs in the forked child before `exec`: asks the kernel to deliver SIGTERM
/// when the parent exits, and terminates right away if the parent is already
/// gone.
///
/// # Arguments
///
/// * `parent_pid` - PID of the supervisor captured before fork.
#[cfg(target_os = "linux")]
pub(crate) fn set_parent_death(parent_pid: libc::pid_t) {
    // SAFETY: prctl/getppid/kill/getpid are async-signal-safe.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
        if libc::getppid() != parent_pid {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
    }
}
