use std::sync::OnceLock;

use log::warn;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use solarman2mqtt::shutdown::Shutdown;

static SHUTDOWN: OnceLock<Shutdown> = OnceLock::new();

extern "C" fn request_shutdown(_signal: nix::libc::c_int) {
    if let Some(shutdown) = SHUTDOWN.get() {
        shutdown.request();
    }
}

/// Routes SIGINT and SIGTERM to the returned shutdown flag.
pub fn install() -> Shutdown {
    let shutdown = SHUTDOWN.get_or_init(Shutdown::new).clone();
    let action = SigAction::new(
        SigHandler::Handler(request_shutdown),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        if let Err(e) = unsafe { signal::sigaction(sig, &action) } {
            warn!("could not install {sig} handler: {e}");
        }
    }
    shutdown
}
