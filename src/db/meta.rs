use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::db::{Color, CustomData};

/// Database metadata: settings that apply to the database as a whole rather
/// than to any particular entry or group.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct Meta {
    /// Name of the application that last wrote this database
    pub generator: Option<String>,

    pub database_name: Option<String>,
    pub database_name_changed: Option<NaiveDateTime>,

    pub database_description: Option<String>,
    pub database_description_changed: Option<NaiveDateTime>,

    pub default_username: Option<String>,
    pub default_username_changed: Option<NaiveDateTime>,

    /// Number of days of history to keep, or -1 for unlimited
    pub maintenance_history_days: Option<usize>,

    /// Accent color used by some KeePass clients to distinguish this database
    pub color: Option<Color>,

    pub master_key_changed: Option<NaiveDateTime>,
    /// Number of days after which the user should be reminded to change the master key
    pub master_key_change_rec: Option<i64>,
    /// Number of days after which the user is forced to change the master key
    pub master_key_change_force: Option<i64>,

    pub memory_protection: MemoryProtection,

    pub custom_icons: CustomIcons,

    pub recycle_bin_enabled: Option<bool>,
    pub recycle_bin_uuid: Option<Uuid>,
    pub recycle_bin_changed: Option<NaiveDateTime>,

    pub entry_templates_group: Option<Uuid>,
    pub entry_templates_group_changed: Option<NaiveDateTime>,

    pub last_selected_group: Option<Uuid>,
    pub last_top_visible_group: Option<Uuid>,

    /// Maximum number of history entries to keep per entry, or -1 for unlimited
    pub history_max_items: Option<usize>,
    /// Maximum total size in bytes of an entry's history, or -1 for unlimited
    pub history_max_size: Option<usize>,

    pub settings_changed: Option<NaiveDateTime>,

    pub binaries: BinaryAttachments,

    pub custom_data: CustomData,
}

/// Which fields of newly created entries should be memory-protected by default
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct MemoryProtection {
    pub protect_title: bool,
    pub protect_username: bool,
    pub protect_password: bool,
    pub protect_url: bool,
    pub protect_notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        MemoryProtection {
            protect_title: false,
            protect_username: false,
            protect_password: true,
            protect_url: false,
            protect_notes: false,
        }
    }
}

/// The set of custom icons available to Groups and Entries in this database
#[derive(Debug, Default, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct CustomIcons {
    pub icons: Vec<Icon>,
}

/// A custom icon, referenced by Groups/Entries through its UUID
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct Icon {
    pub uuid: Uuid,
    /// PNG-encoded image data
    pub data: Vec<u8>,
}

/// The set of binary attachments referenced by Entries in this database,
/// keyed by their index in the inner header / XML `Binaries` block.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct BinaryAttachments {
    pub binaries: Vec<BinaryAttachment>,
}

impl BinaryAttachments {
    pub fn get(&self, id: usize) -> Option<&BinaryAttachment> {
        self.binaries.get(id)
    }

    pub fn push(&mut self, value: BinaryAttachment) {
        self.binaries.push(value);
    }
}

/// A binary attachment, either stored inline in the XML or (KDBX4) in the
/// inner header and merely referenced from the XML by index.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct BinaryAttachment {
    /// Whether the KeePass client should treat this attachment as protected
    /// memory while it is open
    pub identifier: Option<String>,
    pub flags: u8,
    pub compressed: bool,
    pub content: Vec<u8>,
}
