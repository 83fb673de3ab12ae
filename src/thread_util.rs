/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Bounded thread joins for worker teardown.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Join `handle` but give up after `timeout`.
///
/// Workers observe their cooperative stop flags within one wait timeout, so
/// a join normally completes well inside the bound. A worker that misses
/// the bound is abandoned (the handle is dropped, the thread detaches) so
/// teardown never blocks a caller indefinitely; native handles are
/// destroyed only after a successful join.
///
/// Returns `true` when the thread finished within the bound.
pub(crate) fn join_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} thread did not stop within {timeout:?}; abandoning it");
            return false;
        }
        std::thread::sleep(JOIN_POLL);
    }
    if let Err(e) = handle.join() {
        warn!("{name} thread panicked: {e:?}");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn joins_a_finished_thread() {
        let handle = std::thread::spawn(|| {});
        assert!(join_timeout(handle, Duration::from_secs(1), "test"));
    }

    #[test]
    fn abandons_a_stuck_thread() {
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop2.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        assert!(!join_timeout(handle, Duration::from_millis(50), "test"));
        stop.store(true, Ordering::Relaxed);
    }
}
