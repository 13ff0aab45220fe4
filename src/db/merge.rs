use std::{
    collections::{HashMap, VecDeque},
    thread, time,
};

use thiserror::Error;
use uuid::Uuid;

use crate::db::{
    entry::{Entry, History, Value},
    group::{Group, NodeLocation},
    node::Node,
    DeletedObject, Times,
};

/// Errors while merging two databases
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Could not find group at {0:?}")]
    FindGroupError(NodeLocation),

    #[error("Could not find entry at {0:?}")]
    FindEntryError(NodeLocation),

    #[error("Group {0} was updated without updating the last modification timestamp.")]
    GroupModificationTimeNotUpdated(String),

    #[error("Entry {0} was updated without updating the last modification timestamp.")]
    EntryModificationTimeNotUpdated(String),

    #[error("{0}")]
    GenericError(String),
}

/// The kind of change a `MergeEvent` records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeEventType {
    EntryCreated,
    EntryUpdated,
    EntryDeleted,
    EntryDuplicated,
    EntryLocationUpdated,
    GroupCreated,
    GroupUpdated,
    GroupDeleted,
    GroupLocationUpdated,
}

/// Policy for resolving a conflict between two replicas of the same entry.
///
/// A group may pin a mode via [`crate::db::Group::merge_mode`]; entries in a
/// group with no preference inherit the mode their ancestor group used, down
/// to the mode passed to [`crate::db::Database::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Keep the destination entry. The source's state is appended to
    /// history only if it is newer than every existing history entry.
    KeepLocal,
    /// Overwrite the destination with the source entry, pushing the
    /// destination's former state into history.
    KeepRemote,
    /// Keep whichever side has the newer last-modification timestamp.
    KeepNewer,
    /// Merge histories by last-modification, deduplicating identical
    /// snapshots; the newest snapshot becomes the current state. Location
    /// changes are resolved by the newer `location_changed` timestamp.
    #[default]
    Synchronize,
    /// On conflict, keep the destination entry untouched and insert the
    /// source entry as a new sibling entry with a freshly generated UUID.
    Duplicate,
}

/// What applying [`Entry::merge`] to a conflicting pair of entries produces.
pub(crate) enum MergeOutcome {
    NoChange,
    Replace(Entry),
    Duplicate(Entry),
}

/// A single change applied while merging two databases
#[derive(Debug, Clone, Copy)]
pub struct MergeEvent {
    pub event_type: MergeEventType,
    pub node_uuid: Uuid,
}

/// The outcome of a merge operation: every change that was applied, plus
/// any warnings about data that could not be merged unambiguously.
#[derive(Debug, Clone, Default)]
pub struct MergeLog {
    pub events: Vec<MergeEvent>,
    pub warnings: Vec<String>,
}

impl MergeLog {
    pub fn append(&mut self, other: &MergeLog) {
        self.events.extend(other.events.iter().cloned());
        self.warnings.extend(other.warnings.iter().cloned());
    }

    pub fn merge_with(&self, other: &MergeLog) -> MergeLog {
        let mut response = self.clone();
        response.append(other);
        response
    }
}

impl super::Database {
    /// Merge this database with another version of this same database.
    /// This function will use the UUIDs to detect that entries and groups are
    /// the same.
    ///
    /// `mode` is the default merge policy, used by any group that has no
    /// [`crate::db::Group::merge_mode`] preference of its own.
    pub fn merge(&mut self, other: &super::Database, mode: MergeMode) -> Result<MergeLog, MergeError> {
        let mut log = MergeLog::default();
        log.append(&self.merge_group(vec![], &other.root, false, mode)?);
        log.append(&self.merge_deletions(other)?);
        self.enforce_history_limits();
        Ok(log)
    }

    /// Evicts history entries beyond `meta.history_max_items` /
    /// `meta.history_max_size` across the whole tree. Run after a merge,
    /// since merging can combine two histories into one that is over budget.
    fn enforce_history_limits(&mut self) {
        let max_items = self.meta.history_max_items.unwrap_or(usize::MAX);
        let max_size = self.meta.history_max_size.unwrap_or(usize::MAX);

        fn walk(group: &mut Group, max_items: usize, max_size: usize) {
            for entry in group.entries_mut() {
                if let Some(history) = entry.history.as_mut() {
                    history.enforce_limits(max_items, max_size);
                }
            }
            for child in group.groups_mut() {
                walk(child, max_items, max_size);
            }
        }

        walk(&mut self.root, max_items, max_size);
    }

    fn merge_deletions(&mut self, other: &super::Database) -> Result<MergeLog, MergeError> {
        // Utility function to search for a UUID in the VecDeque of deleted objects.
        let is_in_deleted_queue = |uuid: Uuid, deleted_groups_queue: &VecDeque<DeletedObject>| -> bool {
            for deleted_object in deleted_groups_queue {
                if deleted_object.uuid == uuid {
                    return true;
                }
            }
            false
        };

        let mut log = MergeLog::default();

        let mut new_deleted_objects = self.deleted_objects.clone();

        // We start by deleting the entries, since we will only remove groups if they are empty.
        for deleted_object in &other.deleted_objects.objects {
            if new_deleted_objects.contains(deleted_object.uuid) {
                continue;
            }
            let entry_location = match self.find_node_location(deleted_object.uuid) {
                Some(l) => l,
                None => continue,
            };

            let parent_group = match self.root.find_group_mut(&entry_location) {
                Some(g) => g,
                None => return Err(MergeError::FindGroupError(entry_location)),
            };

            let entry = match parent_group.find_entry(&[deleted_object.uuid]) {
                Some(e) => e,
                None => continue,
            };

            let entry_last_modification = match entry.times.get_last_modification() {
                Some(t) => *t,
                None => {
                    log.warnings.push(format!(
                        "Entry {} did not have a last modification timestamp",
                        entry.uuid
                    ));
                    Times::now()
                }
            };

            if entry_last_modification < deleted_object.deletion_time {
                parent_group.remove_node(&deleted_object.uuid)?;
                log.events.push(MergeEvent {
                    event_type: MergeEventType::EntryDeleted,
                    node_uuid: deleted_object.uuid,
                });

                new_deleted_objects.objects.push(deleted_object.clone());
            }
        }

        let mut deleted_groups_queue: VecDeque<DeletedObject> = vec![].into();
        for deleted_object in &other.deleted_objects.objects {
            if new_deleted_objects.contains(deleted_object.uuid) {
                continue;
            }
            deleted_groups_queue.push_back(deleted_object.clone());
        }

        while !deleted_groups_queue.is_empty() {
            let deleted_object = deleted_groups_queue.pop_front().unwrap();
            if new_deleted_objects.contains(deleted_object.uuid) {
                continue;
            }
            let group_location = match self.find_node_location(deleted_object.uuid) {
                Some(l) => l,
                None => continue,
            };

            let parent_group = match self.root.find_group_mut(&group_location) {
                Some(g) => g,
                None => return Err(MergeError::FindGroupError(group_location)),
            };

            let group = match parent_group.find_group(&[deleted_object.uuid]) {
                Some(e) => e,
                None => continue,
            };

            if !group.entries().is_empty() {
                continue;
            }

            if !group
                .groups()
                .iter()
                .filter(|g| !is_in_deleted_queue(g.uuid, &deleted_groups_queue))
                .collect::<Vec<_>>()
                .is_empty()
            {
                deleted_groups_queue.push_back(deleted_object.clone());
                continue;
            }

            if !group.groups().is_empty() {
                continue;
            }

            let group_last_modification = match group.times.get_last_modification() {
                Some(t) => *t,
                None => {
                    log.warnings.push(format!(
                        "Group {} did not have a last modification timestamp",
                        group.uuid
                    ));
                    Times::now()
                }
            };

            if group_last_modification < deleted_object.deletion_time {
                parent_group.remove_node(&deleted_object.uuid)?;
                log.events.push(MergeEvent {
                    event_type: MergeEventType::GroupDeleted,
                    node_uuid: deleted_object.uuid,
                });

                new_deleted_objects.objects.push(deleted_object.clone());
            }
        }

        self.deleted_objects = new_deleted_objects;
        Ok(log)
    }

    pub(crate) fn find_node_location(&self, id: Uuid) -> Option<NodeLocation> {
        for node in &self.root.children {
            match node {
                Node::Entry(e) => {
                    if e.uuid == id {
                        return Some(vec![]);
                    }
                }
                Node::Group(g) => {
                    if g.uuid == id {
                        return Some(vec![]);
                    }
                    if let Some(location) = g.find_node_location(id) {
                        return Some(location);
                    }
                }
            }
        }
        None
    }

    fn merge_group(
        &mut self,
        current_group_path: NodeLocation,
        current_group: &Group,
        is_in_deleted_group: bool,
        mode: MergeMode,
    ) -> Result<MergeLog, MergeError> {
        let mut log = MergeLog::default();
        let mode = current_group.merge_mode.unwrap_or(mode);

        if let Some(destination_group_location) = self.find_node_location(current_group.uuid) {
            let mut destination_group_path = destination_group_location.clone();
            destination_group_path.push(current_group.uuid);
            let destination_group = match self.root.find_group_mut(&destination_group_path) {
                Some(g) => g,
                None => return Err(MergeError::FindGroupError(destination_group_path)),
            };
            let group_update_merge_events = destination_group.merge_with(current_group)?;
            log.append(&group_update_merge_events);
        }

        for other_entry in &current_group.entries() {
            let destination_entry_location = self.find_node_location(other_entry.uuid);

            if let Some(destination_entry_location) = destination_entry_location {
                let mut existing_entry_parent_path = destination_entry_location.clone();
                let mut existing_entry_location = destination_entry_location.clone();
                existing_entry_location.push(other_entry.uuid);

                let mut existing_entry = self.root.find_entry(&existing_entry_location).unwrap().clone();

                if current_group_path.last() != destination_entry_location.last() && !is_in_deleted_group {
                    let source_location_changed_time = match other_entry.times.get_location_changed() {
                        Some(t) => *t,
                        None => {
                            log.warnings.push(format!(
                                "Entry {} did not have a location updated timestamp",
                                other_entry.uuid
                            ));
                            Times::epoch()
                        }
                    };
                    let destination_location_changed = match existing_entry.times.get_location_changed() {
                        Some(t) => *t,
                        None => {
                            log.warnings.push(format!(
                                "Entry {} did not have a location updated timestamp",
                                other_entry.uuid
                            ));
                            Times::now()
                        }
                    };
                    if source_location_changed_time > destination_location_changed {
                        log.events.push(MergeEvent {
                            event_type: MergeEventType::EntryLocationUpdated,
                            node_uuid: other_entry.uuid,
                        });
                        self.relocate_node(
                            &other_entry.uuid,
                            &destination_entry_location,
                            &current_group_path,
                            source_location_changed_time,
                        )?;
                        existing_entry_parent_path = current_group_path.clone();
                        existing_entry_location = current_group_path.clone();
                        existing_entry_location.push(other_entry.uuid);
                        existing_entry
                            .times
                            .set_location_changed(source_location_changed_time);
                    }
                }

                if !existing_entry.has_diverged_from(other_entry) {
                    continue;
                }

                let (outcome, entry_merge_log) = existing_entry.merge(other_entry, mode)?;
                log.append(&entry_merge_log);

                match outcome {
                    MergeOutcome::NoChange => continue,
                    MergeOutcome::Replace(merged_entry) => {
                        if existing_entry.eq(&merged_entry) {
                            continue;
                        }

                        let existing_entry = match self.root.find_entry_mut(&existing_entry_location) {
                            Some(e) => e,
                            None => return Err(MergeError::FindEntryError(existing_entry_location)),
                        };
                        *existing_entry = merged_entry.clone();

                        log.events.push(MergeEvent {
                            event_type: MergeEventType::EntryUpdated,
                            node_uuid: merged_entry.uuid,
                        });
                    }
                    MergeOutcome::Duplicate(mut duplicate_entry) => {
                        duplicate_entry.uuid = Uuid::new_v4();
                        duplicate_entry.times.set_location_changed(Times::now());

                        let parent_group = match self.root.find_group_mut(&existing_entry_parent_path) {
                            Some(g) => g,
                            None => return Err(MergeError::FindGroupError(existing_entry_parent_path)),
                        };
                        parent_group.add_child(duplicate_entry.clone());

                        log.events.push(MergeEvent {
                            event_type: MergeEventType::EntryDuplicated,
                            node_uuid: duplicate_entry.uuid,
                        });
                    }
                }
                continue;
            }

            if self.deleted_objects.contains(other_entry.uuid) {
                continue;
            }

            if is_in_deleted_group {
                continue;
            }

            let new_entry = other_entry.to_owned().clone();

            let new_entry_parent_group = match self.root.find_group_mut(&current_group_path) {
                Some(g) => g,
                None => return Err(MergeError::FindGroupError(current_group_path)),
            };
            new_entry_parent_group.add_child(new_entry.clone());

            log.events.push(MergeEvent {
                event_type: MergeEventType::EntryCreated,
                node_uuid: new_entry.uuid,
            });
        }

        for other_group in &current_group.groups() {
            let mut new_group_location = current_group_path.clone();
            let other_group_uuid = other_group.uuid;
            new_group_location.push(other_group_uuid);

            if self.deleted_objects.contains(other_group.uuid) || is_in_deleted_group {
                let new_merge_log = self.merge_group(new_group_location, other_group, true, mode)?;
                log.append(&new_merge_log);
                continue;
            }

            let destination_group_location = self.find_node_location(other_group.uuid);

            if let Some(destination_group_location) = destination_group_location {
                if current_group_path != destination_group_location {
                    let mut existing_group_location = destination_group_location.clone();
                    existing_group_location.push(other_group_uuid);

                    let existing_group = self.root.find_group(&existing_group_location).unwrap();
                    let existing_group_location_changed = match existing_group.times.get_location_changed() {
                        Some(t) => *t,
                        None => {
                            log.warnings.push(format!(
                                "Entry {} did not have a location changed timestamp",
                                existing_group.uuid
                            ));
                            Times::now()
                        }
                    };
                    let other_group_location_changed = match other_group.times.get_location_changed() {
                        Some(t) => *t,
                        None => {
                            log.warnings.push(format!(
                                "Entry {} did not have a location changed timestamp",
                                other_group.uuid
                            ));
                            Times::epoch()
                        }
                    };
                    if existing_group_location_changed < other_group_location_changed {
                        self.relocate_node(
                            &other_group.uuid,
                            &destination_group_location,
                            &current_group_path,
                            other_group_location_changed,
                        )?;

                        log.events.push(MergeEvent {
                            event_type: MergeEventType::GroupLocationUpdated,
                            node_uuid: other_group.uuid,
                        });

                        let new_merge_log =
                            self.merge_group(new_group_location, other_group, is_in_deleted_group, mode)?;
                        log.append(&new_merge_log);
                        continue;
                    }
                }

                let new_merge_log = self.merge_group(new_group_location, other_group, is_in_deleted_group, mode)?;
                log.append(&new_merge_log);
                continue;
            }

            let mut new_group = other_group.to_owned().clone();
            new_group.children = vec![];
            log.events.push(MergeEvent {
                event_type: MergeEventType::GroupCreated,
                node_uuid: new_group.uuid,
            });
            let new_group_parent_group = match self.root.find_group_mut(&current_group_path) {
                Some(g) => g,
                None => return Err(MergeError::FindGroupError(current_group_path)),
            };
            new_group_parent_group.add_child(new_group.clone());

            let new_merge_log = self.merge_group(new_group_location, other_group, is_in_deleted_group, mode)?;
            log.append(&new_merge_log);
        }

        Ok(log)
    }

    fn relocate_node(
        &mut self,
        node_uuid: &Uuid,
        from: &NodeLocation,
        to: &NodeLocation,
        new_location_changed_timestamp: chrono::NaiveDateTime,
    ) -> Result<(), MergeError> {
        let source_group = match self.root.find_group_mut(from) {
            Some(g) => g,
            None => return Err(MergeError::FindGroupError(from.to_vec())),
        };

        let mut relocated_node = source_group.remove_node(node_uuid)?;
        match relocated_node {
            Node::Group(ref mut g) => g.times.set_location_changed(new_location_changed_timestamp),
            Node::Entry(ref mut e) => e.times.set_location_changed(new_location_changed_timestamp),
        };

        let destination_group = match self.root.find_group_mut(to) {
            Some(g) => g,
            None => return Err(MergeError::FindGroupError(to.to_vec())),
        };
        destination_group.children.push(relocated_node);
        Ok(())
    }
}

impl Entry {
    pub(crate) fn merge(&self, other: &Entry, mode: MergeMode) -> Result<(MergeOutcome, MergeLog), MergeError> {
        let mut log = MergeLog::default();

        let source_last_modification = match other.times.get_last_modification() {
            Some(t) => *t,
            None => {
                log.warnings.push(format!(
                    "Entry {} did not have a last modification timestamp",
                    other.uuid
                ));
                Times::epoch()
            }
        };
        let destination_last_modification = match self.times.get_last_modification() {
            Some(t) => *t,
            None => {
                log.warnings.push(format!(
                    "Entry {} did not have a last modification timestamp",
                    self.uuid
                ));
                Times::now()
            }
        };

        // Duplicate always materializes a new sibling entry on conflict, regardless of
        // which side is newer, so it is exempt from the "timestamp must move" invariant
        // the other modes rely on.
        if mode != MergeMode::Duplicate && destination_last_modification == source_last_modification {
            if !self.has_diverged_from(other) {
                return Err(MergeError::EntryModificationTimeNotUpdated(
                    other.uuid.to_string(),
                ));
            }
            return Ok((MergeOutcome::NoChange, log));
        }

        let (outcome, entry_merge_log) = match mode {
            MergeMode::KeepLocal => self.merge_keep_local(other)?,
            MergeMode::KeepRemote => self.merge_keep_remote(other)?,
            MergeMode::KeepNewer => {
                if destination_last_modification >= source_last_modification {
                    (MergeOutcome::NoChange, MergeLog::default())
                } else {
                    self.merge_keep_remote(other)?
                }
            }
            MergeMode::Synchronize => {
                let (entry, log) = match destination_last_modification > source_last_modification {
                    true => self.merge_history(other)?,
                    false => other.clone().merge_history(self)?,
                };
                (MergeOutcome::Replace(entry), log)
            }
            MergeMode::Duplicate => {
                let mut duplicate = other.clone();
                duplicate.history = None;
                (MergeOutcome::Duplicate(duplicate), MergeLog::default())
            }
        };

        // The location changed timestamp is handled separately when merging two databases.
        let outcome = match outcome {
            MergeOutcome::Replace(mut merged_entry) => {
                if let Some(location_changed_timestamp) = self.times.get_location_changed() {
                    merged_entry
                        .times
                        .set_location_changed(*location_changed_timestamp);
                }
                MergeOutcome::Replace(merged_entry)
            }
            other => other,
        };

        Ok((outcome, log.merge_with(&entry_merge_log)))
    }

    /// Keep this entry as-is; append `other` into history only if it postdates
    /// every snapshot already recorded there.
    fn merge_keep_local(&self, other: &Entry) -> Result<(MergeOutcome, MergeLog), MergeError> {
        let log = MergeLog::default();
        let mut response = self.clone();

        let newest_history_time = self
            .history
            .as_ref()
            .and_then(|h| h.entries.first())
            .and_then(|e| e.times.get_last_modification())
            .copied();
        let other_last_modification = other.times.get_last_modification().copied();

        let should_append = match (newest_history_time, other_last_modification) {
            (Some(newest), Some(candidate)) => candidate > newest,
            (None, Some(_)) => true,
            (_, None) => false,
        };

        if should_append {
            let mut history = self.history.clone().unwrap_or_default();
            history.add_entry(other.clone());
            response.history = Some(history);
        }

        Ok((MergeOutcome::Replace(response), log))
    }

    /// Overwrite this entry with `other`, pushing this entry's former state
    /// (merged with `other`'s own history, for completeness) into history.
    fn merge_keep_remote(&self, other: &Entry) -> Result<(MergeOutcome, MergeLog), MergeError> {
        let mut log = MergeLog::default();
        let mut response = other.clone();

        let mut history = self.history.clone().unwrap_or_default();
        let mut former_self = self.clone();
        former_self.history = None;
        history.add_entry(former_self);

        if let Some(other_history) = &other.history {
            log.append(&history.merge_with(other_history)?);
        }

        response.history = Some(history);

        Ok((MergeOutcome::Replace(response), log))
    }

    pub(crate) fn merge_history(&self, other: &Entry) -> Result<(Entry, MergeLog), MergeError> {
        let mut log = MergeLog::default();

        let mut source_history = match &other.history {
            Some(h) => h.clone(),
            None => {
                log.warnings.push(format!(
                    "Entry {} from source database had no history.",
                    self.uuid
                ));
                History::default()
            }
        };
        let mut destination_history = match &self.history {
            Some(h) => h.clone(),
            None => {
                log.warnings.push(format!(
                    "Entry {} from destination database had no history.",
                    self.uuid
                ));
                History::default()
            }
        };
        let mut response = self.clone();

        if other.has_uncommitted_changes() {
            log.warnings.push(format!(
                "Entry {} from source database has uncommitted changes.",
                self.uuid
            ));
            source_history.add_entry(other.clone());
        }

        let history_merge_log = destination_history.merge_with(&source_history)?;
        response.history = Some(destination_history);

        Ok((response, log.merge_with(&history_merge_log)))
    }

    #[cfg(test)]
    // Convenience function used in unit tests, to make sure that:
    // 1. The history gets updated after changing a field
    // 2. We wait a second before commiting the changes so that the timestamp is not the same
    //    as it previously was. This is necessary since the timestamps in the KDBX format
    //    do not preserve the msecs.
    pub(crate) fn set_field_and_commit(&mut self, field_name: &str, field_value: &str) {
        self.fields.insert(
            field_name.to_string(),
            Value::Unprotected(field_value.to_string()),
        );
        thread::sleep(time::Duration::from_secs(1));
        self.update_history(usize::MAX, usize::MAX);
    }

    // Convenience function used in when merging two entries
    pub(crate) fn has_diverged_from(&self, other_entry: &Entry) -> bool {
        let new_times = Times::default();

        let mut self_without_times = self.clone();
        self_without_times.times = new_times.clone();

        let mut other_without_times = other_entry.clone();
        other_without_times.times = new_times.clone();

        !self_without_times.eq(&other_without_times)
    }
}

impl History {
    /// Merges another entry's history into this one, deduplicating entries that
    /// share a last-modification timestamp and keeping the most recent snapshot
    /// at the front of the list.
    pub(crate) fn merge_with(&mut self, other: &History) -> Result<MergeLog, MergeError> {
        let mut log = MergeLog::default();

        let mut by_modification_time: HashMap<chrono::NaiveDateTime, Entry> = HashMap::new();

        for history_entry in self.entries.drain(..) {
            let modification_time = match history_entry.times.get_last_modification() {
                Some(t) => *t,
                None => {
                    log.warnings
                        .push(format!("History entry {} had no last modification time", history_entry.uuid));
                    continue;
                }
            };
            by_modification_time.insert(modification_time, history_entry);
        }

        for history_entry in &other.entries {
            let modification_time = match history_entry.times.get_last_modification() {
                Some(t) => *t,
                None => {
                    log.warnings
                        .push(format!("History entry {} had no last modification time", history_entry.uuid));
                    continue;
                }
            };

            match by_modification_time.get(&modification_time) {
                Some(existing) if existing.eq(history_entry) => {}
                Some(_) => {
                    log.warnings.push(format!(
                        "Two history entries for {} shared a modification time but differed",
                        history_entry.uuid
                    ));
                }
                None => {
                    by_modification_time.insert(modification_time, history_entry.clone());
                }
            }
        }

        let mut merged: Vec<Entry> = by_modification_time.into_values().collect();
        merged.sort_by(|a, b| {
            b.times
                .get_last_modification()
                .cmp(&a.times.get_last_modification())
        });

        self.entries = merged;

        Ok(log)
    }
}
