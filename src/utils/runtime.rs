use std::process;

/// The relay relies on POSIX signals for shutdown and socket read timeouts
/// for its receive loop.
pub fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: bugzilla2bus needs POSIX signals and sockets");
        process::exit(2);
    }
}
