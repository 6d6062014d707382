//! Post-store notification boundary toward the preview collaborator

use std::path::Path;
use std::thread;
use std::time::Duration;

/// Called with the final path after each successful store. Implementations
/// run on the worker thread that performed the store and must be safe to
/// call from any of them; the ingest pipeline never waits on anything
/// beyond the call itself.
pub trait StoreHook: Send + Sync {
    fn on_stored(&self, _path: &Path) {}
}

/// No notification.
pub struct NoopHook;
impl StoreHook for NoopHook {}

/// Console stand-in for the external display collaborator. Holds the
/// calling worker for a fixed duration after every store, so a busy
/// display step shows up as reduced worker throughput instead of hiding
/// inside a collaborator.
pub struct DisplayHook {
    delay: Duration,
}

impl DisplayHook {
    pub fn new(delay: Duration) -> Self {
        DisplayHook { delay }
    }
}

impl StoreHook for DisplayHook {
    fn on_stored(&self, path: &Path) {
        eprintln!("displaying {} (previewing)...", path.display());
        thread::sleep(self.delay);
        eprintln!("{} previewed", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn display_hook_occupies_the_caller_for_the_delay() {
        let hook = DisplayHook::new(Duration::from_millis(50));
        let start = Instant::now();
        hook.on_stored(Path::new("clip.mp4"));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
