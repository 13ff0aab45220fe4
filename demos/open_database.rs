use kdbx_core::{
    db::{Entry, Group, NodeRef, Value},
    Database, DatabaseKey,
};

#[cfg(feature = "save_kdbx4")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Build a small database in memory and round-trip it through a temp file,
    // since this demo has no fixture database to open.
    let mut db = Database::new(Default::default());
    db.meta.database_name = Some("Demo database".to_string());

    let mut group = Group::new("Demo group");
    let mut entry = Entry::new();
    entry
        .fields
        .insert("Title".to_string(), Value::Unprotected("Demo entry".to_string()));
    entry
        .fields
        .insert("UserName".to_string(), Value::Unprotected("jdoe".to_string()));
    entry
        .fields
        .insert("Password".to_string(), Value::Protected("hunter2".as_bytes().into()));
    group.add_child(entry);
    db.root.add_child(group);

    let key = DatabaseKey::new().with_password("demopass");

    let path = std::env::temp_dir().join("kdbx-core-demo.kdbx");
    db.save(&mut std::fs::File::create(&path)?, key.clone())?;

    let opened = Database::open(&mut std::fs::File::open(&path)?, key)?;

    // Iterate over all `Group`s and `Entry`s
    for node in &opened.root {
        match node {
            NodeRef::Group(g) => {
                println!("Saw group '{0}'", g.name);
            }
            NodeRef::Entry(e) => {
                let title = e.get_title().unwrap_or("(no title)");
                let user = e.get_username().unwrap_or("(no username)");
                let pass = e.get_password().unwrap_or("(no password)");
                println!("Entry '{0}': '{1}' : '{2}'", title, user, pass);
            }
        }
    }

    std::fs::remove_file(&path).ok();

    Ok(())
}

#[cfg(not(feature = "save_kdbx4"))]
fn main() {
    eprintln!("this example requires the \"save_kdbx4\" feature");
}
