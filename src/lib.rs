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

//! A live video ingest core for NDI publishers.
//!
//! The crate discovers publishers on the LAN, subscribes to one of them,
//! fans captured frames out to a renderer, a surface-mode hardware decoder,
//! and an MP4 recorder, and layers connection-health policy on top. The
//! native NDI runtime, the host codec/muxer framework, and the display
//! surface are consumed through traits; the embedding shell supplies them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ndi_ingest::{FinderOptions, NdiSystem, ReceiverOptions};
//!
//! # fn main() -> Result<(), ndi_ingest::IngestError> {
//! # let runtime: Arc<dyn ndi_ingest::NdiRuntime> = unimplemented!();
//! # let engine: Arc<dyn ndi_ingest::MediaEngine> = unimplemented!();
//! let system = NdiSystem::new(runtime);
//! system.initialize()?;
//!
//! let finder = system.create_finder(FinderOptions::default())?;
//! let mut sources = finder.start_discovery()?;
//! let snapshot = sources.blocking_recv().unwrap_or_default();
//!
//! let receiver =
//!     system.create_receiver(ReceiverOptions::default(), engine, "recordings")?;
//! receiver.connect(snapshot[0].clone())?;
//! receiver.start_recording()?;
//! # Ok(())
//! # }
//! ```

pub mod decode;
pub mod error;
pub mod finder;
pub mod frame;
pub mod health;
pub mod media;
pub mod prefs;
pub mod receiver;
pub mod record;
pub mod render;
pub mod router;
pub mod runtime;
pub mod source;
pub mod surface;
pub mod system;
mod thread_util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use error::IngestError;
pub use finder::{FinderOptions, SourceFinder};
pub use frame::{FourCc, FrameInfo, FrameLease, VideoFrameCopy};
pub use health::ReconnectPolicy;
pub use media::{MediaEngine, MediaFormat, SampleMuxer, VideoCodec};
pub use prefs::{JsonPreferences, MemoryPreferences, Preferences};
pub use receiver::{ConnectionState, NdiReceiver, ReceiverStats};
pub use record::{list_recordings, RecordingFile, RecordingState, StreamRecorder};
pub use render::UncompressedRenderer;
pub use router::FrameRouter;
pub use runtime::{Bandwidth, ColorFormat, NdiRuntime, ReceiverOptions};
pub use source::{SourceDescriptor, SourceRepository};
pub use surface::{Canvas, DisplaySurface};
pub use system::NdiSystem;
