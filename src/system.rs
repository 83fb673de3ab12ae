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

//! Runtime lifecycle: the process-wide owner of the native NDI runtime.
//!
//! One `NdiSystem` exists per process. It is the only component allowed to
//! initialize or destroy the runtime, and the factory for finders and
//! receivers, so nothing can touch the native layer uninitialized.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::IngestError;
use crate::finder::{FinderOptions, SourceFinder};
use crate::media::MediaEngine;
use crate::receiver::NdiReceiver;
use crate::runtime::{NdiRuntime, ReceiverOptions};

pub struct NdiSystem {
    runtime: Arc<dyn NdiRuntime>,
    initialized: AtomicBool,
}

impl NdiSystem {
    pub fn new(runtime: Arc<dyn NdiRuntime>) -> Self {
        Self {
            runtime,
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize the native runtime. Fatal when this fails at process
    /// start; everything else in the pipeline is recoverable.
    pub fn initialize(&self) -> Result<(), IngestError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.runtime.initialize() {
            return Err(IngestError::HandleCreationFailed(
                "NDI runtime initialization failed".to_string(),
            ));
        }
        self.initialized.store(true, Ordering::Release);
        info!(version = %self.runtime.version(), "NDI runtime initialized");
        Ok(())
    }

    /// Tear the runtime down. All finders and receivers must be gone.
    pub fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.runtime.destroy();
            info!("NDI runtime destroyed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn version(&self) -> String {
        self.runtime.version()
    }

    pub fn runtime(&self) -> Arc<dyn NdiRuntime> {
        self.runtime.clone()
    }

    pub fn create_finder(&self, options: FinderOptions) -> Result<SourceFinder, IngestError> {
        if !self.is_initialized() {
            return Err(IngestError::RuntimeNotInitialized);
        }
        Ok(SourceFinder::new(self.runtime.clone(), options))
    }

    pub fn create_receiver(
        &self,
        options: ReceiverOptions,
        engine: Arc<dyn MediaEngine>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Result<NdiReceiver, IngestError> {
        if !self.is_initialized() {
            return Err(IngestError::RuntimeNotInitialized);
        }
        Ok(NdiReceiver::new(
            self.runtime.clone(),
            options,
            engine,
            recordings_dir,
        ))
    }
}

impl Drop for NdiSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRuntime;

    #[test]
    fn factories_require_initialization() {
        let runtime: Arc<dyn NdiRuntime> = MockRuntime::uninitialized();
        let system = NdiSystem::new(runtime);
        assert!(matches!(
            system.create_finder(FinderOptions::default()),
            Err(IngestError::RuntimeNotInitialized)
        ));
        system.initialize().unwrap();
        assert!(system.is_initialized());
        assert!(system.create_finder(FinderOptions::default()).is_ok());
        system.shutdown();
        assert!(!system.is_initialized());
    }

    #[test]
    fn initialize_is_idempotent() {
        let runtime: Arc<dyn NdiRuntime> = MockRuntime::new();
        let system = NdiSystem::new(runtime);
        system.initialize().unwrap();
        system.initialize().unwrap();
        system.shutdown();
        system.shutdown();
    }
}
