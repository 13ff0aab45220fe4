#![cfg(feature = "_merge")]

use kdbx_core::{
    db::{fields, DeletedObject, Entry, Group, MergeMode, Node, Times, Value},
    Database,
};

fn entry_with_title(title: &str) -> Entry {
    let mut entry = Entry::new();
    entry
        .fields
        .insert(fields::TITLE.to_string(), Value::Unprotected(title.to_string()));
    entry
}

#[test]
fn merge_adds_entry_created_only_on_the_other_side() {
    let mut local = Database::new(Default::default());
    let mut remote = local.clone();

    let new_entry = entry_with_title("Added remotely");
    let new_uuid = new_entry.uuid;
    remote.root.add_child(new_entry);

    let log = local.merge(&remote, MergeMode::Synchronize).unwrap();
    assert!(log.warnings.is_empty());

    let found = local
        .root
        .entries()
        .into_iter()
        .find(|e| e.uuid == new_uuid)
        .expect("entry created on the other replica should be merged in");
    assert_eq!(found.get(fields::TITLE), Some("Added remotely"));
}

#[test]
fn merge_prefers_the_newer_modification() {
    let mut local = Database::new(Default::default());
    let mut entry = entry_with_title("Original");
    entry.times.set_last_modification(Times::epoch());
    let uuid = entry.uuid;
    local.root.add_child(entry);

    let mut remote = local.clone();

    // Local makes an edit with an older timestamp than remote's edit below.
    if let Some(Node::Entry(e)) = local.root.children.iter_mut().find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid)) {
        e.fields
            .insert(fields::TITLE.to_string(), Value::Unprotected("Edited locally".to_string()));
        e.times
            .set_last_modification(Times::epoch() + chrono::Duration::seconds(10));
    }

    if let Some(Node::Entry(e)) = remote.root.children.iter_mut().find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid)) {
        e.fields
            .insert(fields::TITLE.to_string(), Value::Unprotected("Edited remotely".to_string()));
        e.times
            .set_last_modification(Times::epoch() + chrono::Duration::seconds(20));
    }

    local.merge(&remote, MergeMode::Synchronize).unwrap();

    let merged = local
        .root
        .entries()
        .into_iter()
        .find(|e| e.uuid == uuid)
        .unwrap();
    assert_eq!(merged.get(fields::TITLE), Some("Edited remotely"));
}

#[test]
fn tombstone_wins_over_an_older_modification() {
    let mut local = Database::new(Default::default());
    let mut entry = entry_with_title("Soon to be deleted");
    entry.times.set_last_modification(Times::epoch());
    let uuid = entry.uuid;
    local.root.add_child(entry);

    let mut remote = local.clone();

    // Remote permanently deletes the entry at t=20.
    remote.root.children.retain(|n| !matches!(n, Node::Entry(e) if e.uuid == uuid));
    remote.deleted_objects.objects.push(DeletedObject {
        uuid,
        deletion_time: Times::epoch() + chrono::Duration::seconds(20),
    });

    // Local modifies the entry at t=15, which is before the tombstone.
    if let Some(Node::Entry(e)) = local.root.children.iter_mut().find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid)) {
        e.times
            .set_last_modification(Times::epoch() + chrono::Duration::seconds(15));
    }

    local.merge(&remote, MergeMode::Synchronize).unwrap();

    assert!(local.root.entries().into_iter().all(|e| e.uuid != uuid));
    assert!(local.deleted_objects.contains(uuid));
}

#[test]
fn merge_is_idempotent() {
    let mut local = Database::new(Default::default());
    let mut remote = local.clone();

    let mut group = Group::new("Shared");
    group.add_child(entry_with_title("Shared entry"));
    remote.root.add_child(group);

    let mut once = local.clone();
    once.merge(&remote, MergeMode::Synchronize).unwrap();

    let mut twice = once.clone();
    twice.merge(&remote, MergeMode::Synchronize).unwrap();

    assert_eq!(once.root.entries().len(), twice.root.entries().len());
    assert_eq!(once.deleted_objects, twice.deleted_objects);
}

/// Builds a local/remote pair that both edited the same entry, with the
/// remote edit timestamped later than the local one.
fn diverged_pair() -> (Database, Database, uuid::Uuid) {
    let mut local = Database::new(Default::default());
    let mut entry = entry_with_title("Original");
    entry.times.set_last_modification(Times::epoch());
    let uuid = entry.uuid;
    local.root.add_child(entry);

    let mut remote = local.clone();

    if let Some(Node::Entry(e)) = local
        .root
        .children
        .iter_mut()
        .find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid))
    {
        e.fields
            .insert(fields::TITLE.to_string(), Value::Unprotected("Edited locally".to_string()));
        e.times
            .set_last_modification(Times::epoch() + chrono::Duration::seconds(10));
    }

    if let Some(Node::Entry(e)) = remote
        .root
        .children
        .iter_mut()
        .find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid))
    {
        e.fields
            .insert(fields::TITLE.to_string(), Value::Unprotected("Edited remotely".to_string()));
        e.times
            .set_last_modification(Times::epoch() + chrono::Duration::seconds(20));
    }

    (local, remote, uuid)
}

#[test]
fn keep_local_ignores_remote_edits() {
    let (mut local, remote, uuid) = diverged_pair();

    local.merge(&remote, MergeMode::KeepLocal).unwrap();

    let merged = local.root.entries().into_iter().find(|e| e.uuid == uuid).unwrap();
    assert_eq!(merged.get(fields::TITLE), Some("Edited locally"));
}

#[test]
fn keep_remote_always_takes_the_source_entry() {
    let (mut local, remote, uuid) = diverged_pair();

    local.merge(&remote, MergeMode::KeepRemote).unwrap();

    let merged = local.root.entries().into_iter().find(|e| e.uuid == uuid).unwrap();
    assert_eq!(merged.get(fields::TITLE), Some("Edited remotely"));
    // Local's former state should have been pushed into history.
    let history = merged.history.as_ref().expect("history should exist after KeepRemote");
    assert!(history
        .get_entries()
        .iter()
        .any(|e| e.get(fields::TITLE) == Some("Edited locally")));
}

#[test]
fn keep_newer_picks_the_later_modification_regardless_of_side() {
    let (mut local, remote, uuid) = diverged_pair();

    local.merge(&remote, MergeMode::KeepNewer).unwrap();

    let merged = local.root.entries().into_iter().find(|e| e.uuid == uuid).unwrap();
    assert_eq!(merged.get(fields::TITLE), Some("Edited remotely"));
}

#[test]
fn duplicate_mode_keeps_both_versions_as_separate_entries() {
    let (mut local, remote, uuid) = diverged_pair();

    local.merge(&remote, MergeMode::Duplicate).unwrap();

    let titles: Vec<&str> = local
        .root
        .entries()
        .into_iter()
        .filter_map(|e| e.get(fields::TITLE))
        .collect();
    assert!(titles.contains(&"Edited locally"));
    assert!(titles.contains(&"Edited remotely"));
    assert_eq!(local.root.entries().len(), 2);

    let original = local.root.entries().into_iter().find(|e| e.uuid == uuid).unwrap();
    assert_eq!(original.get(fields::TITLE), Some("Edited locally"));
}

#[test]
fn group_merge_mode_preference_overrides_the_database_default() {
    let mut local = Database::new(Default::default());
    let mut group = Group::new("Pinned");
    group.merge_mode = Some(MergeMode::KeepLocal);
    let mut entry = entry_with_title("Original");
    entry.times.set_last_modification(Times::epoch());
    let uuid = entry.uuid;
    group.add_child(entry);
    local.root.add_child(group);

    let mut remote = local.clone();

    // Local edits its copy; remote edits its own copy with a later timestamp.
    if let Some(Node::Group(g)) = local.root.children.iter_mut().find(|n| matches!(n, Node::Group(g) if g.name == "Pinned")) {
        if let Some(Node::Entry(e)) = g.children.iter_mut().find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid)) {
            e.fields
                .insert(fields::TITLE.to_string(), Value::Unprotected("Edited locally".to_string()));
            e.times
                .set_last_modification(Times::epoch() + chrono::Duration::seconds(10));
        }
    }
    if let Some(Node::Group(g)) = remote.root.children.iter_mut().find(|n| matches!(n, Node::Group(g) if g.name == "Pinned")) {
        if let Some(Node::Entry(e)) = g.children.iter_mut().find(|n| matches!(n, Node::Entry(e) if e.uuid == uuid)) {
            e.fields
                .insert(fields::TITLE.to_string(), Value::Unprotected("Edited remotely".to_string()));
            e.times
                .set_last_modification(Times::epoch() + chrono::Duration::seconds(20));
        }
    }

    // Database-level default is Synchronize, which would take the remote's
    // newer edit; the group's own KeepLocal preference should win instead.
    local.merge(&remote, MergeMode::Synchronize).unwrap();

    let merged = local
        .root
        .iter()
        .find_map(|n| match n {
            kdbx_core::db::NodeRef::Entry(e) if e.uuid == uuid => Some(e),
            _ => None,
        })
        .unwrap();
    assert_eq!(merged.get(fields::TITLE), Some("Edited locally"));
}
