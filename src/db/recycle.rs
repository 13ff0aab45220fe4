//! Recycle-bin operations and `{REF:...}` reference resolution.

use thiserror::Error;
use uuid::Uuid;

use crate::db::{
    entry::Entry,
    node::{Node, NodeRef},
    Database, DeletedObject, Group, Times,
};

/// Errors raised by recycle-bin operations
#[derive(Debug, Error)]
pub enum RecycleError {
    #[error("No group or entry with UUID {0} found")]
    NotFound(Uuid),
}

impl Database {
    /// Returns the entry anywhere in the tree with the given UUID.
    pub fn find_entry_by_uuid(&self, uuid: Uuid) -> Option<&Entry> {
        self.root.iter().find_map(|n| match n {
            NodeRef::Entry(e) if e.uuid == uuid => Some(e),
            _ => None,
        })
    }

    /// Path of ancestor group UUIDs (not including `uuid` itself) leading from
    /// the root to the group or entry with the given UUID.
    fn locate(&self, uuid: Uuid) -> Option<Vec<Uuid>> {
        fn walk(group: &Group, target: Uuid, path: &mut Vec<Uuid>) -> bool {
            for node in &group.children {
                match node {
                    Node::Entry(e) if e.uuid == target => return true,
                    Node::Group(g) if g.uuid == target => return true,
                    Node::Group(g) => {
                        path.push(g.uuid);
                        if walk(g, target, path) {
                            return true;
                        }
                        path.pop();
                    }
                    _ => {}
                }
            }
            false
        }

        let mut path = Vec::new();
        if walk(&self.root, uuid, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn group_at_path_mut(&mut self, path: &[Uuid]) -> Option<&mut Group> {
        let mut group = &mut self.root;
        for uuid in path {
            group = group.groups_mut().into_iter().find(|g| g.uuid == *uuid)?;
        }
        Some(group)
    }

    fn take_node(&mut self, path: &[Uuid], uuid: Uuid) -> Option<Node> {
        let parent = self.group_at_path_mut(path)?;
        let index = parent.children.iter().position(|n| match n {
            Node::Entry(e) => e.uuid == uuid,
            Node::Group(g) => g.uuid == uuid,
        })?;
        Some(parent.children.remove(index))
    }

    fn in_recycle_bin(&self, path: &[Uuid]) -> bool {
        match self.meta.recycle_bin_uuid {
            Some(bin_uuid) => path.contains(&bin_uuid),
            None => false,
        }
    }

    fn ensure_recycle_bin(&mut self) -> Uuid {
        if let Some(uuid) = self.meta.recycle_bin_uuid {
            if self.locate(uuid).is_some() {
                return uuid;
            }
        }

        let bin = Group::new("Recycle Bin");
        let uuid = bin.uuid;
        self.root.add_child(bin);
        self.meta.recycle_bin_enabled = Some(true);
        self.meta.recycle_bin_uuid = Some(uuid);
        self.meta.recycle_bin_changed = Some(Times::now());
        uuid
    }

    fn delete_permanently(&mut self, path: &[Uuid], uuid: Uuid) -> Result<(), RecycleError> {
        self.take_node(path, uuid).ok_or(RecycleError::NotFound(uuid))?;
        self.deleted_objects.objects.push(DeletedObject {
            uuid,
            deletion_time: Times::now(),
        });
        Ok(())
    }

    fn recycle_node(&mut self, uuid: Uuid) -> Result<(), RecycleError> {
        let path = self.locate(uuid).ok_or(RecycleError::NotFound(uuid))?;

        if self.in_recycle_bin(&path) {
            return self.delete_permanently(&path, uuid);
        }

        let bin_uuid = self.ensure_recycle_bin();

        let mut node = self.take_node(&path, uuid).ok_or(RecycleError::NotFound(uuid))?;
        let now = Times::now();
        match &mut node {
            Node::Group(g) => g.times.set_location_changed(now),
            Node::Entry(e) => e.times.set_location_changed(now),
        }

        let bin = self
            .group_at_path_mut(&[bin_uuid])
            .ok_or(RecycleError::NotFound(bin_uuid))?;
        bin.children.push(node);
        Ok(())
    }

    /// Moves the entry with the given UUID into the recycle bin, creating the
    /// recycle bin group under root if it does not exist yet. An entry already
    /// inside the recycle bin is instead permanently deleted, recording a
    /// tombstone for its UUID.
    pub fn recycle_entry(&mut self, uuid: Uuid) -> Result<(), RecycleError> {
        self.recycle_node(uuid)
    }

    /// Moves the group with the given UUID into the recycle bin, creating it if
    /// necessary. A group already inside the recycle bin is permanently deleted
    /// instead, taking its descendants with it.
    pub fn recycle_group(&mut self, uuid: Uuid) -> Result<(), RecycleError> {
        self.recycle_node(uuid)
    }

    /// Permanently deletes every descendant of the recycle bin, recording a
    /// tombstone for each. The recycle bin group itself is left in place, empty.
    pub fn empty_recycle_bin(&mut self) -> Result<(), RecycleError> {
        let bin_uuid = match self.meta.recycle_bin_uuid {
            Some(uuid) => uuid,
            None => return Ok(()),
        };

        let bin = match self.group_at_path_mut(&[bin_uuid]) {
            Some(g) => g,
            None => return Ok(()),
        };

        fn collect(group: &Group, uuids: &mut Vec<Uuid>) {
            for node in &group.children {
                match node {
                    Node::Entry(e) => uuids.push(e.uuid),
                    Node::Group(g) => {
                        uuids.push(g.uuid);
                        collect(g, uuids);
                    }
                }
            }
        }

        let mut uuids = Vec::new();
        collect(bin, &mut uuids);
        bin.children.clear();

        let now = Times::now();
        for uuid in uuids {
            self.deleted_objects.objects.push(DeletedObject {
                uuid,
                deletion_time: now,
            });
        }

        Ok(())
    }

    /// Resolves `{REF:X@I:UUID}` placeholders found anywhere in `text` against
    /// this database's entries. `X` selects the field to substitute from the
    /// referenced entry (`T`=Title, `U`=UserName, `P`=Password, `A`=URL,
    /// `N`=Notes). A reference that cannot be resolved — unknown UUID, unknown
    /// field, or a cycle back to an entry already being resolved — is left as
    /// the original placeholder text.
    pub fn resolve_reference(&self, text: &str) -> String {
        self.resolve_reference_inner(text, &mut Vec::new())
    }

    fn resolve_reference_inner(&self, text: &str, visiting: &mut Vec<Uuid>) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        loop {
            let start = match rest.to_ascii_uppercase().find("{REF:") {
                Some(i) => i,
                None => {
                    result.push_str(rest);
                    break;
                }
            };
            let end = match rest[start..].find('}') {
                Some(i) => start + i,
                None => {
                    result.push_str(rest);
                    break;
                }
            };

            result.push_str(&rest[..start]);
            let token = &rest[start..=end];
            result.push_str(&self.resolve_reference_token(token, visiting));
            rest = &rest[end + 1..];
        }

        result
    }

    fn resolve_reference_token(&self, token: &str, visiting: &mut Vec<Uuid>) -> String {
        let upper = token.to_ascii_uppercase();
        let inner = match upper.strip_prefix("{REF:").and_then(|s| s.strip_suffix('}')) {
            Some(inner) => inner,
            None => return token.to_string(),
        };

        let mut parts = inner.splitn(2, '@');
        let field = match parts.next().and_then(|f| f.chars().next()) {
            Some(f) => f,
            None => return token.to_string(),
        };

        let uuid_str = match parts.next().and_then(|s| s.strip_prefix("I:")) {
            Some(u) => u,
            None => return token.to_string(),
        };

        let uuid = match Uuid::parse_str(uuid_str) {
            Ok(u) => u,
            Err(_) => return token.to_string(),
        };

        if visiting.contains(&uuid) {
            return token.to_string();
        }

        let field_key = match field {
            'T' => crate::db::fields::TITLE,
            'U' => crate::db::fields::USERNAME,
            'P' => crate::db::fields::PASSWORD,
            'A' => crate::db::fields::URL,
            'N' => crate::db::fields::NOTES,
            _ => return token.to_string(),
        };

        let value = match self.find_entry_by_uuid(uuid).and_then(|e| e.get(field_key)) {
            Some(v) => v.to_string(),
            None => return token.to_string(),
        };

        visiting.push(uuid);
        let resolved = self.resolve_reference_inner(&value, visiting);
        visiting.pop();
        resolved
    }
}

#[cfg(test)]
mod recycle_tests {
    use super::*;
    use crate::db::{fields, Value};

    fn entry_with_title(title: &str) -> Entry {
        let mut entry = Entry::new();
        entry
            .fields
            .insert(fields::TITLE.to_string(), Value::Unprotected(title.to_string()));
        entry
    }

    #[test]
    fn recycle_entry_creates_bin_and_moves_entry() {
        let mut db = Database::new(Default::default());
        let entry = entry_with_title("Bank");
        let uuid = entry.uuid;
        db.root.add_child(entry);

        db.recycle_entry(uuid).unwrap();

        let bin_uuid = db.meta.recycle_bin_uuid.expect("recycle bin should have been created");
        assert!(db.root.groups().iter().any(|g| g.uuid == bin_uuid));
        assert!(db.root.entries().is_empty());
        assert!(db.deleted_objects.objects.is_empty());

        let bin = db.root.groups().into_iter().find(|g| g.uuid == bin_uuid).unwrap();
        assert_eq!(bin.entries().len(), 1);
        assert_eq!(bin.entries()[0].uuid, uuid);
    }

    #[test]
    fn recycling_twice_permanently_deletes() {
        let mut db = Database::new(Default::default());
        let entry = entry_with_title("Bank");
        let uuid = entry.uuid;
        db.root.add_child(entry);

        db.recycle_entry(uuid).unwrap();
        db.recycle_entry(uuid).unwrap();

        assert!(db.find_entry_by_uuid(uuid).is_none());
        assert!(db.deleted_objects.contains(uuid));
        assert_eq!(db.deleted_objects.objects.len(), 1);
    }

    #[test]
    fn empty_recycle_bin_tombstones_every_descendant() {
        let mut db = Database::new(Default::default());
        let e1 = entry_with_title("One");
        let e2 = entry_with_title("Two");
        let u1 = e1.uuid;
        let u2 = e2.uuid;
        db.root.add_child(e1);
        db.root.add_child(e2);

        db.recycle_entry(u1).unwrap();
        db.recycle_entry(u2).unwrap();
        db.empty_recycle_bin().unwrap();

        assert!(db.find_entry_by_uuid(u1).is_none());
        assert!(db.find_entry_by_uuid(u2).is_none());
        assert!(db.deleted_objects.contains(u1));
        assert!(db.deleted_objects.contains(u2));

        let bin_uuid = db.meta.recycle_bin_uuid.unwrap();
        let bin = db.root.groups().into_iter().find(|g| g.uuid == bin_uuid).unwrap();
        assert!(bin.entries().is_empty());
    }

    #[test]
    fn resolve_reference_substitutes_field() {
        let mut db = Database::new(Default::default());
        let mut referenced = Entry::new();
        referenced
            .fields
            .insert(fields::PASSWORD.to_string(), Value::Protected("hunter2".into()));
        let referenced_uuid = referenced.uuid;
        db.root.add_child(referenced);

        let text = format!("{{REF:P@I:{}}}", referenced_uuid);
        assert_eq!(db.resolve_reference(&text), "hunter2");
    }

    #[test]
    fn resolve_reference_breaks_cycles() {
        let mut db = Database::new(Default::default());

        let mut a = Entry::new();
        let mut b = Entry::new();
        let a_uuid = a.uuid;
        let b_uuid = b.uuid;

        a.fields.insert(
            fields::PASSWORD.to_string(),
            Value::Unprotected(format!("{{REF:P@I:{}}}", b_uuid)),
        );
        b.fields.insert(
            fields::PASSWORD.to_string(),
            Value::Unprotected(format!("{{REF:P@I:{}}}", a_uuid)),
        );

        db.root.add_child(a);
        db.root.add_child(b);

        let text = format!("{{REF:P@I:{}}}", b_uuid);
        let resolved = db.resolve_reference(&text);
        assert_eq!(resolved, format!("{{REF:P@I:{}}}", b_uuid));
    }

    #[test]
    fn resolve_reference_unknown_uuid_is_left_unchanged() {
        let db = Database::new(Default::default());
        let text = format!("{{REF:P@I:{}}}", Uuid::new_v4());
        assert_eq!(db.resolve_reference(&text), text);
    }
}
