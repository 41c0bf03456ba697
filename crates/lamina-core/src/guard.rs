/// Remembers which process opened a mount session.
///
/// A child forked while a session is open inherits the session. If that child
/// reaches the session's exit it must not unmount the parent's stack or keep
/// running the parent's code, so it is terminated on the spot.
#[derive(Debug, Clone, Copy)]
pub struct ProcessGuard {
    owner: u32,
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self {
            owner: std::process::id(),
        }
    }
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn with_owner(owner: u32) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn is_foreign(&self) -> bool {
        std::process::id() != self.owner
    }

    /// Terminate immediately if the current process is not the owner.
    pub fn exit_if_foreign(&self) {
        if self.is_foreign() {
            terminate_leaked_process();
        }
    }
}

/// Leave without running destructors, atexit handlers, or flushing buffers
/// the child shares with its parent.
#[allow(unsafe_code)]
fn terminate_leaked_process() -> ! {
    // SAFETY: _exit takes no pointers and is async-signal-safe, so it is sound
    // to call from a forked child in any state.
    unsafe { libc::_exit(0) }
}
