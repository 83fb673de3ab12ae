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

//! NDI source identity and the process-wide source repository.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// Identifier of a publisher discovered on the LAN.
///
/// The name uniquely identifies the source (NDI convention:
/// `"MACHINE (Source Name)"`); the URL is present only for sources that
/// advertise one. Equality and hashing are by name.
#[derive(Debug, Clone, Eq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: Option<String>,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    pub fn with_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
        }
    }
}

impl PartialEq for SourceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for SourceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{}@{}", self.name, url),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Process-wide repository of the most recent discovery snapshot.
///
/// The discovery consumer writes it, the player reads it. Readers get
/// owned snapshots so no lock is held across UI work.
#[derive(Debug, Default)]
pub struct SourceRepository {
    sources: RwLock<Vec<SourceDescriptor>>,
}

impl SourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot with the latest one from the finder.
    pub fn update(&self, sources: Vec<SourceDescriptor>) {
        *self.sources.write().unwrap() = sources;
    }

    pub fn snapshot(&self) -> Vec<SourceDescriptor> {
        self.sources.read().unwrap().clone()
    }

    /// Look up a source by its (unique) name.
    pub fn find(&self, name: &str) -> Option<SourceDescriptor> {
        self.sources
            .read()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().unwrap().is_empty()
    }
}

/// Compare two snapshots by the set of source names.
pub(crate) fn same_source_set(a: &[SourceDescriptor], b: &[SourceDescriptor]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let names: HashSet<&str> = a.iter().map(|s| s.name.as_str()).collect();
    b.iter().all(|s| names.contains(s.name.as_str()))
}
