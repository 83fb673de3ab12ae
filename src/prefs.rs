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

//! Typed preferences consumed by the pipeline.
//!
//! `auto_reconnect` drives the reconnect policy; `screen_always_on` and
//! `show_osd` are read by the embedding shell only; the last-source pair is
//! persisted on every successful connection.

use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::source::SourceDescriptor;

/// The typed key/value store behind the settings screen.
pub trait Preferences: Send + Sync {
    fn auto_reconnect(&self) -> bool;
    fn set_auto_reconnect(&self, enabled: bool);

    fn screen_always_on(&self) -> bool;
    fn set_screen_always_on(&self, enabled: bool);

    fn show_osd(&self) -> bool;
    fn set_show_osd(&self, enabled: bool);

    fn last_source(&self) -> Option<SourceDescriptor>;
    fn set_last_source(&self, source: &SourceDescriptor);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrefValues {
    auto_reconnect: bool,
    screen_always_on: bool,
    show_osd: bool,
    last_source_name: Option<String>,
    last_source_url: Option<String>,
}

impl Default for PrefValues {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            screen_always_on: true,
            show_osd: true,
            last_source_name: None,
            last_source_url: None,
        }
    }
}

impl PrefValues {
    fn last_source(&self) -> Option<SourceDescriptor> {
        self.last_source_name.as_ref().map(|name| SourceDescriptor {
            name: name.clone(),
            url: self.last_source_url.clone(),
        })
    }
}

/// In-memory preferences, for tests and embedders with their own store.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<PrefValues>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn auto_reconnect(&self) -> bool {
        self.values.read().unwrap().auto_reconnect
    }

    fn set_auto_reconnect(&self, enabled: bool) {
        self.values.write().unwrap().auto_reconnect = enabled;
    }

    fn screen_always_on(&self) -> bool {
        self.values.read().unwrap().screen_always_on
    }

    fn set_screen_always_on(&self, enabled: bool) {
        self.values.write().unwrap().screen_always_on = enabled;
    }

    fn show_osd(&self) -> bool {
        self.values.read().unwrap().show_osd
    }

    fn set_show_osd(&self, enabled: bool) {
        self.values.write().unwrap().show_osd = enabled;
    }

    fn last_source(&self) -> Option<SourceDescriptor> {
        self.values.read().unwrap().last_source()
    }

    fn set_last_source(&self, source: &SourceDescriptor) {
        let mut values = self.values.write().unwrap();
        values.last_source_name = Some(source.name.clone());
        values.last_source_url = source.url.clone();
    }
}

/// File-backed preferences serialized as JSON.
///
/// Writes are flushed immediately; a missing or unreadable file falls back
/// to defaults with a warning.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    values: RwLock<PrefValues>,
}

impl JsonPreferences {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("preferences file {path:?} is malformed ({e}); using defaults");
                PrefValues::default()
            }),
            Err(_) => PrefValues::default(),
        };
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    fn save(&self, values: &PrefValues) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(values) {
            Ok(text) => {
                if let Err(e) = fs::write(&self.path, text) {
                    warn!("could not persist preferences to {:?}: {e}", self.path);
                }
            }
            Err(e) => warn!("could not serialize preferences: {e}"),
        }
    }

    fn update(&self, f: impl FnOnce(&mut PrefValues)) {
        let mut values = self.values.write().unwrap();
        f(&mut values);
        self.save(&values);
    }
}

impl Preferences for JsonPreferences {
    fn auto_reconnect(&self) -> bool {
        self.values.read().unwrap().auto_reconnect
    }

    fn set_auto_reconnect(&self, enabled: bool) {
        self.update(|v| v.auto_reconnect = enabled);
    }

    fn screen_always_on(&self) -> bool {
        self.values.read().unwrap().screen_always_on
    }

    fn set_screen_always_on(&self, enabled: bool) {
        self.update(|v| v.screen_always_on = enabled);
    }

    fn show_osd(&self) -> bool {
        self.values.read().unwrap().show_osd
    }

    fn set_show_osd(&self, enabled: bool) {
        self.update(|v| v.show_osd = enabled);
    }

    fn last_source(&self) -> Option<SourceDescriptor> {
        self.values.read().unwrap().last_source()
    }

    fn set_last_source(&self, source: &SourceDescriptor) {
        self.update(|v| {
            v.last_source_name = Some(source.name.clone());
            v.last_source_url = source.url.clone();
        });
    }
}
