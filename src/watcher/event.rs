use std::path::{Path, PathBuf};

use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use serde::Serialize;

/// Raw change flags, laid out like FSEvents item flags.
///
/// Backends other than FSEvents are translated onto the same bits by [`raw_flags`],
/// so classification is independent of the platform.
pub mod flags {
    pub const MUST_SCAN_SUBDIRS: u32 = 0x0000_0001;
    pub const ITEM_CREATED: u32 = 0x0000_0100;
    pub const ITEM_REMOVED: u32 = 0x0000_0200;
    pub const ITEM_INODE_META_MOD: u32 = 0x0000_0400;
    pub const ITEM_RENAMED: u32 = 0x0000_0800;
    pub const ITEM_MODIFIED: u32 = 0x0000_1000;
    pub const ITEM_CHANGE_OWNER: u32 = 0x0000_4000;
    pub const ITEM_XATTR_MOD: u32 = 0x0000_8000;
    pub const ITEM_IS_FILE: u32 = 0x0001_0000;
    pub const ITEM_IS_DIR: u32 = 0x0002_0000;
}

/// Normalized kind of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Deleted,
    Modified,
    Renamed,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Deleted => "deleted",
            EventKind::Modified => "modified",
            EventKind::Renamed => "renamed",
            EventKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change as observed on the watcher thread, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub flags: u32,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, flags: u32) -> Self {
        Self {
            path: path.into(),
            flags,
        }
    }

    /// Expand a `notify` event into one raw event per affected path.
    ///
    /// Returns an empty vec for events that carry no change (access notifications).
    pub fn from_notify(event: &notify::Event) -> Vec<RawEvent> {
        let Some(flags) = raw_flags(event) else {
            return Vec::new();
        };
        event
            .paths
            .iter()
            .map(|path| RawEvent::new(path.clone(), flags))
            .collect()
    }

    pub fn normalize(self) -> NormalizedEvent {
        NormalizedEvent {
            kind: classify(self.flags),
            path: self.path,
            raw_flags: self.flags,
        }
    }
}

/// The payload handed to user callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub raw_flags: u32,
}

impl NormalizedEvent {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Classify a raw flag bitmask.
///
/// Several bits may be set at once; the first match wins in the order
/// created, deleted, modified, renamed.
pub fn classify(raw: u32) -> EventKind {
    if raw & flags::ITEM_CREATED != 0 {
        EventKind::Created
    } else if raw & flags::ITEM_REMOVED != 0 {
        EventKind::Deleted
    } else if raw & flags::ITEM_MODIFIED != 0 {
        EventKind::Modified
    } else if raw & flags::ITEM_RENAMED != 0 {
        EventKind::Renamed
    } else {
        EventKind::Unknown
    }
}

/// Translate a `notify` event kind into raw flags, or `None` for access-only events.
pub fn raw_flags(event: &notify::Event) -> Option<u32> {
    use notify::EventKind as Kind;

    let mut bits = match &event.kind {
        Kind::Access(_) => return None,
        Kind::Create(kind) => {
            flags::ITEM_CREATED
                | match kind {
                    CreateKind::File => flags::ITEM_IS_FILE,
                    CreateKind::Folder => flags::ITEM_IS_DIR,
                    _ => 0,
                }
        }
        Kind::Remove(kind) => {
            flags::ITEM_REMOVED
                | match kind {
                    RemoveKind::File => flags::ITEM_IS_FILE,
                    RemoveKind::Folder => flags::ITEM_IS_DIR,
                    _ => 0,
                }
        }
        Kind::Modify(ModifyKind::Name(_)) => flags::ITEM_RENAMED,
        Kind::Modify(ModifyKind::Metadata(MetadataKind::Ownership)) => flags::ITEM_CHANGE_OWNER,
        Kind::Modify(ModifyKind::Metadata(MetadataKind::Extended)) => flags::ITEM_XATTR_MOD,
        Kind::Modify(ModifyKind::Metadata(_)) => flags::ITEM_INODE_META_MOD,
        Kind::Modify(_) => flags::ITEM_MODIFIED,
        Kind::Any | Kind::Other => 0,
    };
    if event.need_rescan() {
        bits |= flags::MUST_SCAN_SUBDIRS;
    }
    Some(bits)
}
