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

//! Cross-module scenario tests over the public API with mock
//! collaborators.

mod receiver_loop;
mod recording;
mod reconnect;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::receiver::NdiReceiver;
use crate::runtime::{NdiRuntime, ReceiverOptions};
use crate::system::NdiSystem;
use crate::testing::{MockMediaEngine, MockRuntime, TestSurface};

pub(crate) struct Harness {
    pub runtime: Arc<MockRuntime>,
    /// Keeps the runtime initialized for the test's lifetime.
    #[allow(dead_code)]
    pub system: NdiSystem,
    pub engine: Arc<MockMediaEngine>,
    pub surface: Arc<TestSurface>,
    pub receiver: Arc<NdiReceiver>,
    _dir: tempfile::TempDir,
}

/// Wire a receiver to mock runtime, engine, and surface.
pub(crate) fn harness() -> Harness {
    let runtime = MockRuntime::new();
    let dyn_runtime: Arc<dyn NdiRuntime> = runtime.clone();
    let system = NdiSystem::new(dyn_runtime);
    system.initialize().unwrap();
    let engine = Arc::new(MockMediaEngine::new());
    let surface = Arc::new(TestSurface::new());
    let dir = tempfile::tempdir().unwrap();
    let receiver = Arc::new(
        system
            .create_receiver(
                ReceiverOptions::default(),
                engine.clone(),
                dir.path().join("recordings"),
            )
            .unwrap(),
    );
    receiver.set_display_surface(Some(surface.clone()));
    Harness {
        runtime,
        system,
        engine,
        surface,
        receiver,
        _dir: dir,
    }
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
