use std::{collections::HashMap, fmt};

use chrono::NaiveDateTime;
use secrecy::{ExposeSecret, SecretBox};
use uuid::Uuid;

use crate::db::{Color, CustomData, Times};

#[cfg(feature = "totp")]
use crate::db::otp::{TOTPError, TOTP};

/// A database entry containing several key-value fields.
#[derive(Debug, Default, Eq, PartialEq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct Entry {
    pub uuid: Uuid,
    pub fields: HashMap<String, Value>,
    pub autotype: Option<AutoType>,
    pub tags: Vec<String>,

    pub times: Times,

    pub custom_data: CustomData,

    pub icon_id: Option<usize>,
    pub custom_icon_uuid: Option<Uuid>,

    pub foreground_color: Option<Color>,
    pub background_color: Option<Color>,

    pub override_url: Option<String>,
    pub quality_check: Option<bool>,

    pub history: Option<History>,
}

impl Entry {
    pub fn new() -> Entry {
        Entry {
            uuid: Uuid::new_v4(),
            times: Times::new(),
            ..Default::default()
        }
    }
}

impl<'a> Entry {
    /// Get a field by name, taking care of unprotecting Protected values automatically
    pub fn get(&'a self, key: &str) -> Option<&'a str> {
        match self.fields.get(key) {
            Some(&Value::Bytes(_)) => None,
            Some(&Value::Protected(ref pv)) => std::str::from_utf8(pv.expose_bytes()).ok(),
            Some(&Value::Unprotected(ref uv)) => Some(uv),
            None => None,
        }
    }

    /// Get a bytes field by name
    pub fn get_bytes(&'a self, key: &str) -> Option<&'a [u8]> {
        match self.fields.get(key) {
            Some(&Value::Bytes(ref b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_uuid(&'a self) -> &'a Uuid {
        &self.uuid
    }

    /// Get a timestamp field by name
    ///
    /// Returning the chrono::NaiveDateTime which does not include timezone
    /// or UTC offset because KeePass clients typically store timestamps
    /// relative to the local time on the machine writing the data without
    /// including accurate UTC offset or timezone information.
    pub fn get_time(&self, key: &str) -> Option<&chrono::NaiveDateTime> {
        self.times.get(key)
    }

    /// Convenience method for getting the time that the entry expires.
    /// This value is usually only meaningful/useful when expires == true
    pub fn get_expiry_time(&self) -> Option<&chrono::NaiveDateTime> {
        self.times.get_expiry()
    }

    /// Convenience method for getting a TOTP from this entry
    #[cfg(feature = "totp")]
    pub fn get_otp(&'a self) -> Result<TOTP, TOTPError> {
        self.get_raw_otp_value().ok_or(TOTPError::NoRecord)?.parse()
    }

    /// Convenience method for getting the raw value of the 'otp' field
    pub fn get_raw_otp_value(&'a self) -> Option<&'a str> {
        self.get("otp")
    }

    /// Convenience method for getting the value of the 'Title' field
    pub fn get_title(&'a self) -> Option<&'a str> {
        self.get(crate::db::fields::TITLE)
    }

    /// Convenience method for getting the value of the 'UserName' field
    pub fn get_username(&'a self) -> Option<&'a str> {
        self.get(crate::db::fields::USERNAME)
    }

    /// Convenience method for getting the value of the 'Password' field
    pub fn get_password(&'a self) -> Option<&'a str> {
        self.get(crate::db::fields::PASSWORD)
    }

    /// Convenience method for getting the value of the 'URL' field
    pub fn get_url(&'a self) -> Option<&'a str> {
        self.get(crate::db::fields::URL)
    }

    /// Adds the current version of the entry to the entry's history
    /// and updates the last modification timestamp.
    /// The history will only be updated if the entry has
    /// uncommitted changes.
    ///
    /// `history_max_items` and `history_max_size` bound the resulting
    /// history, evicting the oldest entries first; pass `usize::MAX` for
    /// either to leave it unconstrained. Callers normally pass these straight
    /// through from `Meta::history_max_items` / `Meta::history_max_size`.
    ///
    /// Returns whether or not a new history entry was added.
    pub fn update_history(&mut self, history_max_items: usize, history_max_size: usize) -> bool {
        if self.history.is_none() {
            self.history = Some(History::default());
        }

        if !self.has_uncommitted_changes() {
            return false;
        }

        let mut new_history_entry = self.clone();
        new_history_entry.history.take().unwrap();

        let history = self.history.as_mut().unwrap();
        history.add_entry(new_history_entry);
        history.enforce_limits(history_max_items, history_max_size);

        self.times.set_last_modification(Times::now());
        true
    }

    /// Rough estimate of this entry's serialized size: the byte length of
    /// every field name and value, not counting XML structure or encryption
    /// overhead.
    pub(crate) fn approximate_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(name, value)| {
                name.len()
                    + match value {
                        Value::Bytes(b) => b.len(),
                        Value::Unprotected(s) => s.len(),
                        Value::Protected(p) => p.expose_bytes().len(),
                    }
            })
            .sum()
    }

    /// Determines if the entry was modified since the last
    /// history update.
    pub(crate) fn has_uncommitted_changes(&self) -> bool {
        if let Some(history) = self.history.as_ref() {
            if history.entries.is_empty() {
                return true;
            }

            let mut sanitized_entry = self.clone();
            sanitized_entry
                .times
                .set_last_modification(NaiveDateTime::default());
            sanitized_entry.history.take();

            let mut last_history_entry = history.entries.first().unwrap().clone();
            last_history_entry
                .times
                .set_last_modification(NaiveDateTime::default());
            last_history_entry.history.take();

            if sanitized_entry.eq(&last_history_entry) {
                return false;
            }
        }
        true
    }
}

/// A value that can be a raw string, byte array, or protected memory region
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Value {
    Bytes(Vec<u8>),
    Unprotected(String),
    Protected(ProtectedValue),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Bytes(b) => b.is_empty(),
            Value::Unprotected(u) => u.is_empty(),
            Value::Protected(p) => p.expose_bytes().is_empty(),
        }
    }
}

#[cfg(feature = "serialization")]
impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Unprotected(u) => serializer.serialize_str(u),
            Value::Protected(p) => {
                serializer.serialize_str(String::from_utf8_lossy(p.expose_bytes()).as_ref())
            }
        }
    }
}

/// A byte string held in memory that is zeroed out on drop, used for the
/// contents of `Protected` fields (passwords and other sensitive values).
///
/// Wraps `secrecy::SecretBox` since KeePass's protected values are raw byte
/// strings rather than `String`s (they may be non-UTF8 while still encrypted
/// in the XML document).
pub struct ProtectedValue(SecretBox<[u8]>);

impl ProtectedValue {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        ProtectedValue(SecretBox::new(bytes.into()))
    }

    pub fn expose_bytes(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl Clone for ProtectedValue {
    fn clone(&self) -> Self {
        ProtectedValue::new(self.expose_bytes().to_vec())
    }
}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedValue(REDACTED)")
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        self.expose_bytes() == other.expose_bytes()
    }
}

impl Eq for ProtectedValue {}

impl From<String> for ProtectedValue {
    fn from(s: String) -> Self {
        ProtectedValue::new(s.into_bytes())
    }
}

impl From<&str> for ProtectedValue {
    fn from(s: &str) -> Self {
        ProtectedValue::new(s.as_bytes().to_vec())
    }
}

/// An AutoType setting associated with an Entry
#[derive(Debug, Default, Eq, PartialEq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct AutoType {
    pub enabled: bool,
    pub sequence: Option<String>,
    pub data_transfer_obfuscation: Option<isize>,
    pub associations: Vec<AutoTypeAssociation>,
}

/// A window association associated with an AutoType setting
#[derive(Debug, Default, Eq, PartialEq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct AutoTypeAssociation {
    pub window: Option<String>,
    pub sequence: Option<String>,
}

/// An entry's history
#[derive(Debug, Default, Eq, PartialEq, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize))]
pub struct History {
    pub(crate) entries: Vec<Entry>,
}
impl History {
    pub fn add_entry(&mut self, mut entry: Entry) {
        if entry.history.is_some() {
            // Remove the history from the new history entry to avoid having
            // an exponential number of history entries.
            entry.history.take().unwrap();
        }
        self.entries.insert(0, entry);
    }

    pub fn get_entries(&self) -> &Vec<Entry> {
        &self.entries
    }

    /// Evicts the oldest entries (from the back of the list, since index 0
    /// is the newest) until at most `max_items` remain and the approximate
    /// serialized size of the remaining entries is at most `max_size` bytes.
    /// Pass `usize::MAX` for either bound to leave it unconstrained.
    pub fn enforce_limits(&mut self, max_items: usize, max_size: usize) {
        while self.entries.len() > max_items {
            self.entries.pop();
        }

        while self.entries.len() > 1 && self.approximate_size() > max_size {
            self.entries.pop();
        }
    }

    /// Rough estimate of this history's serialized size in bytes.
    pub fn approximate_size(&self) -> usize {
        self.entries.iter().map(Entry::approximate_size).sum()
    }
}

#[cfg(test)]
mod entry_tests {
    use std::{thread, time};

    use super::{Entry, ProtectedValue, Value};

    #[test]
    fn byte_values() {
        let mut entry = Entry::new();
        entry
            .fields
            .insert("a-bytes".to_string(), Value::Bytes(vec![1, 2, 3]));

        entry.fields.insert(
            "a-unprotected".to_string(),
            Value::Unprotected("asdf".to_string()),
        );

        entry.fields.insert(
            "a-protected".to_string(),
            Value::Protected(ProtectedValue::new("asdf".as_bytes().to_vec())),
        );

        assert_eq!(entry.get_bytes("a-bytes"), Some(&[1, 2, 3][..]));
        assert_eq!(entry.get_bytes("a-unprotected"), None);
        assert_eq!(entry.get_bytes("a-protected"), None);

        assert_eq!(entry.get("a-bytes"), None);

        assert_eq!(entry.fields["a-bytes"].is_empty(), false);
    }

    #[test]
    fn update_history() {
        let mut entry = Entry::new();
        let mut last_modification_time = entry.times.get_last_modification().unwrap().clone();

        entry.fields.insert(
            "Username".to_string(),
            Value::Unprotected("user".to_string()),
        );
        // Making sure to wait 1 sec before update the history, to make
        // sure that we get a different modification timestamp.
        thread::sleep(time::Duration::from_secs(1));

        assert!(entry.update_history(usize::MAX, usize::MAX));
        assert!(entry.history.is_some());
        assert_eq!(entry.history.as_ref().unwrap().entries.len(), 1);
        assert_ne!(
            entry.times.get_last_modification().unwrap(),
            &last_modification_time
        );
        last_modification_time = entry.times.get_last_modification().unwrap().clone();
        thread::sleep(time::Duration::from_secs(1));

        // Updating the history without making any changes
        // should not do anything.
        assert!(!entry.update_history(usize::MAX, usize::MAX));
        assert!(entry.history.is_some());
        assert_eq!(entry.history.as_ref().unwrap().entries.len(), 1);
        assert_eq!(
            entry.times.get_last_modification().unwrap(),
            &last_modification_time
        );

        entry.fields.insert(
            "Title".to_string(),
            Value::Unprotected("first title".to_string()),
        );

        assert!(entry.update_history(usize::MAX, usize::MAX));
        assert!(entry.history.is_some());
        assert_eq!(entry.history.as_ref().unwrap().entries.len(), 2);
        assert_ne!(
            entry.times.get_last_modification().unwrap(),
            &last_modification_time
        );
        last_modification_time = entry.times.get_last_modification().unwrap().clone();
        thread::sleep(time::Duration::from_secs(1));

        assert!(!entry.update_history(usize::MAX, usize::MAX));
        assert!(entry.history.is_some());
        assert_eq!(entry.history.as_ref().unwrap().entries.len(), 2);
        assert_eq!(
            entry.times.get_last_modification().unwrap(),
            &last_modification_time
        );

        entry.fields.insert(
            "Title".to_string(),
            Value::Unprotected("second title".to_string()),
        );

        assert!(entry.update_history(usize::MAX, usize::MAX));
        assert!(entry.history.is_some());
        assert_eq!(entry.history.as_ref().unwrap().entries.len(), 3);
        assert_ne!(
            entry.times.get_last_modification().unwrap(),
            &last_modification_time
        );
        last_modification_time = entry.times.get_last_modification().unwrap().clone();
        thread::sleep(time::Duration::from_secs(1));

        assert!(!entry.update_history(usize::MAX, usize::MAX));
        assert!(entry.history.is_some());
        assert_eq!(entry.history.as_ref().unwrap().entries.len(), 3);
        assert_eq!(
            entry.times.get_last_modification().unwrap(),
            &last_modification_time
        );

        let last_history_entry = entry.history.as_ref().unwrap().entries.get(0).unwrap();
        assert_eq!(last_history_entry.get_title().unwrap(), "second title");

        for history_entry in &entry.history.unwrap().entries {
            assert!(history_entry.history.is_none());
        }
    }

    #[test]
    fn history_is_bounded_by_item_count() {
        let mut entry = Entry::new();
        for i in 0..5 {
            entry.fields.insert(
                "Title".to_string(),
                Value::Unprotected(format!("title {i}")),
            );
            thread::sleep(time::Duration::from_secs(1));
            entry.update_history(2, usize::MAX);
        }

        let history = entry.history.as_ref().unwrap();
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries[0].get_title().unwrap(), "title 4");
    }

    #[test]
    fn history_is_bounded_by_serialized_size() {
        let mut entry = Entry::new();
        for i in 0..5 {
            entry.fields.insert(
                "Notes".to_string(),
                Value::Unprotected("x".repeat(100)),
            );
            entry.fields.insert("Title".to_string(), Value::Unprotected(format!("{i}")));
            thread::sleep(time::Duration::from_secs(1));
            entry.update_history(usize::MAX, 250);
        }

        let history = entry.history.as_ref().unwrap();
        assert!(history.approximate_size() <= 250);
        assert!(history.entries.len() < 5);
    }

    #[cfg(feature = "totp")]
    #[test]
    fn totp() {
        let mut entry = Entry::new();
        entry.fields.insert("otp".to_string(), Value::Unprotected("otpauth://totp/ACME%20Co:john.doe@email.com?secret=HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ&issuer=ACME%20Co&algorithm=SHA1&digits=6&period=30".to_string()));

        assert!(entry.get_otp().is_ok());
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn serialization() {
        assert_eq!(
            serde_json::to_string(&Value::Bytes(vec![65, 66, 67])).unwrap(),
            "[65,66,67]".to_string()
        );

        assert_eq!(
            serde_json::to_string(&Value::Unprotected("ABC".to_string())).unwrap(),
            "\"ABC\"".to_string()
        );

        assert_eq!(
            serde_json::to_string(&Value::Protected(ProtectedValue::new(
                "ABC".as_bytes().to_vec()
            )))
            .unwrap(),
            "\"ABC\"".to_string()
        );
    }
}
