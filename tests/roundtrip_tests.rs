#![cfg(feature = "save_kdbx4")]

use kdbx_core::{
    db::{fields, Database, Entry, Value},
    DatabaseKey,
};

const ENTRY_COUNT: usize = 2_000;

/// Writing and reading back a database with many entries should round-trip
/// every field, including protected ones.
#[test]
fn write_and_read_large_database() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = Database::new(Default::default());
    db.meta.database_name = Some("Demo database".to_string());

    for i in 0..ENTRY_COUNT {
        let mut entry = Entry::new();
        entry.fields.insert(
            fields::TITLE.to_string(),
            Value::Unprotected(format!("Entry_{i}")),
        );
        entry.fields.insert(
            fields::USERNAME.to_string(),
            Value::Unprotected(format!("UserName_{i}")),
        );
        entry.fields.insert(
            fields::PASSWORD.to_string(),
            Value::Protected(format!("Password_{i}").into()),
        );
        db.root.add_child(entry);
    }

    let key = DatabaseKey::new().with_password("demopass");

    let mut encrypted = Vec::new();
    db.save(&mut encrypted, key.clone())?;

    let reopened = Database::open(&mut encrypted.as_slice(), key)?;

    let entries = reopened.root.entries();
    assert_eq!(entries.len(), ENTRY_COUNT);

    for i in 0..ENTRY_COUNT {
        let entry = entries
            .iter()
            .find(|e| e.get(fields::TITLE) == Some(format!("Entry_{i}").as_str()))
            .expect("entry should round-trip");

        assert_eq!(entry.get(fields::USERNAME), Some(format!("UserName_{i}").as_str()));
        assert_eq!(entry.get(fields::PASSWORD), Some(format!("Password_{i}").as_str()));
    }

    Ok(())
}
