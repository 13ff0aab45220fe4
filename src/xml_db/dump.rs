//! Event-driven writer for the inner KeePass XML document.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use base64::{engine::general_purpose as base64_engine, Engine as _};

use crate::{
    crypt::ciphers::Cipher,
    db::{
        entry::{AutoType, AutoTypeAssociation, Entry, History, Value},
        group::Group,
        meta::Meta,
        CustomData, Database, DeletedObjects, HeaderAttachment, Node, Times,
    },
    error::DatabaseSaveError,
};

use super::times::format_time;

type XmlWriter = Writer<Vec<u8>>;

/// Serializes a [`Database`] into its inner XML document, encrypting
/// protected fields with `inner_cipher` in the order they're written.
///
/// Binary attachments referenced by entries are collected along the way and
/// returned alongside the XML so the caller can write them into the inner
/// header before this payload.
pub(crate) fn dump(
    db: &Database,
    inner_cipher: &mut dyn Cipher,
) -> Result<(Vec<u8>, Vec<HeaderAttachment>), DatabaseSaveError> {
    let mut writer = Writer::new(Vec::new());
    let mut attachments: Vec<HeaderAttachment> = Vec::new();

    writer.write_event(Event::Start(BytesStart::new("KeePassFile")))?;

    write_meta(&mut writer, &db.meta)?;

    writer.write_event(Event::Start(BytesStart::new("Root")))?;
    write_group(&mut writer, &db.root, inner_cipher, &mut attachments)?;
    write_deleted_objects(&mut writer, &db.deleted_objects)?;
    writer.write_event(Event::End(BytesEnd::new("Root")))?;

    writer.write_event(Event::End(BytesEnd::new("KeePassFile")))?;

    Ok((writer.into_inner(), attachments))
}

fn escaped_text(writer: &mut XmlWriter, text: &str) -> Result<(), DatabaseSaveError> {
    let escaped = quick_xml::escape::escape(text);
    writer.write_event(Event::Text(BytesText::from_escaped(escaped)))?;
    Ok(())
}

fn write_text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    escaped_text(writer, text)?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_opt_text_element(
    writer: &mut XmlWriter,
    name: &str,
    text: Option<&str>,
) -> Result<(), DatabaseSaveError> {
    write_text_element(writer, name, text.unwrap_or(""))
}

fn write_bool_element(writer: &mut XmlWriter, name: &str, value: bool) -> Result<(), DatabaseSaveError> {
    write_text_element(writer, name, if value { "True" } else { "False" })
}

fn write_opt_bool_element(
    writer: &mut XmlWriter,
    name: &str,
    value: Option<bool>,
) -> Result<(), DatabaseSaveError> {
    match value {
        Some(v) => write_bool_element(writer, name, v),
        None => write_text_element(writer, name, "null"),
    }
}

fn write_time_element(
    writer: &mut XmlWriter,
    name: &str,
    time: Option<&chrono::NaiveDateTime>,
) -> Result<(), DatabaseSaveError> {
    write_text_element(writer, name, &time.map(format_time).unwrap_or_default())
}

fn uuid_text(uuid: &uuid::Uuid) -> String {
    base64_engine::STANDARD.encode(uuid.as_bytes())
}

fn write_uuid_element(writer: &mut XmlWriter, name: &str, uuid: &uuid::Uuid) -> Result<(), DatabaseSaveError> {
    write_text_element(writer, name, &uuid_text(uuid))
}

fn write_meta(writer: &mut XmlWriter, meta: &Meta) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("Meta")))?;

    write_opt_text_element(writer, "Generator", meta.generator.as_deref())?;
    write_opt_text_element(writer, "DatabaseName", meta.database_name.as_deref())?;
    write_time_element(writer, "DatabaseNameChanged", meta.database_name_changed.as_ref())?;
    write_opt_text_element(writer, "DatabaseDescription", meta.database_description.as_deref())?;
    write_time_element(
        writer,
        "DatabaseDescriptionChanged",
        meta.database_description_changed.as_ref(),
    )?;
    write_opt_text_element(writer, "DefaultUserName", meta.default_username.as_deref())?;
    write_time_element(writer, "DefaultUserNameChanged", meta.default_username_changed.as_ref())?;
    write_text_element(
        writer,
        "MaintenanceHistoryDays",
        &size_or_unlimited(meta.maintenance_history_days),
    )?;
    write_text_element(writer, "Color", &meta.color.as_ref().map(|c| c.to_string()).unwrap_or_default())?;
    write_time_element(writer, "MasterKeyChanged", meta.master_key_changed.as_ref())?;
    write_text_element(
        writer,
        "MasterKeyChangeRec",
        &meta.master_key_change_rec.unwrap_or(-1).to_string(),
    )?;
    write_text_element(
        writer,
        "MasterKeyChangeForce",
        &meta.master_key_change_force.unwrap_or(-1).to_string(),
    )?;

    writer.write_event(Event::Start(BytesStart::new("MemoryProtection")))?;
    write_bool_element(writer, "ProtectTitle", meta.memory_protection.protect_title)?;
    write_bool_element(writer, "ProtectUserName", meta.memory_protection.protect_username)?;
    write_bool_element(writer, "ProtectPassword", meta.memory_protection.protect_password)?;
    write_bool_element(writer, "ProtectURL", meta.memory_protection.protect_url)?;
    write_bool_element(writer, "ProtectNotes", meta.memory_protection.protect_notes)?;
    writer.write_event(Event::End(BytesEnd::new("MemoryProtection")))?;

    writer.write_event(Event::Start(BytesStart::new("CustomIcons")))?;
    for icon in &meta.custom_icons.icons {
        writer.write_event(Event::Start(BytesStart::new("Icon")))?;
        write_uuid_element(writer, "UUID", &icon.uuid)?;
        write_text_element(writer, "Data", &base64_engine::STANDARD.encode(&icon.data))?;
        writer.write_event(Event::End(BytesEnd::new("Icon")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("CustomIcons")))?;

    write_opt_bool_element(writer, "RecycleBinEnabled", meta.recycle_bin_enabled)?;
    write_uuid_element(
        writer,
        "RecycleBinUUID",
        meta.recycle_bin_uuid.as_ref().unwrap_or(&uuid::Uuid::nil()),
    )?;
    write_time_element(writer, "RecycleBinChanged", meta.recycle_bin_changed.as_ref())?;
    write_uuid_element(
        writer,
        "EntryTemplatesGroup",
        meta.entry_templates_group.as_ref().unwrap_or(&uuid::Uuid::nil()),
    )?;
    write_time_element(
        writer,
        "EntryTemplatesGroupChanged",
        meta.entry_templates_group_changed.as_ref(),
    )?;
    write_uuid_element(
        writer,
        "LastSelectedGroup",
        meta.last_selected_group.as_ref().unwrap_or(&uuid::Uuid::nil()),
    )?;
    write_uuid_element(
        writer,
        "LastTopVisibleGroup",
        meta.last_top_visible_group.as_ref().unwrap_or(&uuid::Uuid::nil()),
    )?;
    write_text_element(writer, "HistoryMaxItems", &size_or_unlimited(meta.history_max_items))?;
    write_text_element(writer, "HistoryMaxSize", &size_or_unlimited(meta.history_max_size))?;
    write_time_element(writer, "SettingsChanged", meta.settings_changed.as_ref())?;

    writer.write_event(Event::Start(BytesStart::new("Binaries")))?;
    for (index, binary) in meta.binaries.binaries.iter().enumerate() {
        let mut tag = BytesStart::new("Binary");
        tag.push_attribute(("ID", index.to_string().as_str()));
        if binary.compressed {
            tag.push_attribute(("Compressed", "True"));
        }
        writer.write_event(Event::Start(tag))?;
        escaped_text(writer, &base64_engine::STANDARD.encode(&binary.content))?;
        writer.write_event(Event::End(BytesEnd::new("Binary")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("Binaries")))?;

    write_custom_data(writer, &meta.custom_data)?;

    writer.write_event(Event::End(BytesEnd::new("Meta")))?;
    Ok(())
}

fn size_or_unlimited(value: Option<usize>) -> String {
    match value {
        Some(usize::MAX) | None => "-1".to_string(),
        Some(v) => v.to_string(),
    }
}

fn write_custom_data(writer: &mut XmlWriter, custom_data: &CustomData) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("CustomData")))?;
    for (key, item) in &custom_data.items {
        writer.write_event(Event::Start(BytesStart::new("Item")))?;
        write_text_element(writer, "Key", key)?;
        if let Some(value) = &item.value {
            write_text_element(writer, "Value", &value_as_str(value))?;
        }
        write_time_element(writer, "LastModificationTime", item.last_modification_time.as_ref())?;
        writer.write_event(Event::End(BytesEnd::new("Item")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("CustomData")))?;
    Ok(())
}

fn value_as_str(value: &Value) -> String {
    match value {
        Value::Unprotected(s) => s.clone(),
        Value::Bytes(_) => String::new(),
        Value::Protected(p) => String::from_utf8_lossy(p.expose_bytes()).into_owned(),
    }
}

fn write_times(writer: &mut XmlWriter, times: &Times) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("Times")))?;
    write_bool_element(writer, "Expires", times.expires)?;
    write_text_element(writer, "UsageCount", &times.usage_count.to_string())?;
    for (name, value) in &times.times {
        write_text_element(writer, name, &format_time(value))?;
    }
    writer.write_event(Event::End(BytesEnd::new("Times")))?;
    Ok(())
}

fn write_group(
    writer: &mut XmlWriter,
    group: &Group,
    cipher: &mut dyn Cipher,
    attachments: &mut Vec<HeaderAttachment>,
) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("Group")))?;

    write_uuid_element(writer, "UUID", &group.uuid)?;
    write_text_element(writer, "Name", &group.name)?;
    write_opt_text_element(writer, "Notes", group.notes.as_deref())?;
    write_text_element(writer, "IconID", &group.icon_id.unwrap_or(0).to_string())?;
    if let Some(icon_uuid) = &group.custom_icon_uuid {
        write_uuid_element(writer, "CustomIconUUID", icon_uuid)?;
    }
    write_times(writer, &group.times)?;
    write_bool_element(writer, "IsExpanded", group.is_expanded)?;
    write_opt_text_element(writer, "DefaultAutoTypeSequence", group.default_autotype_sequence.as_deref())?;
    write_opt_bool_element(writer, "EnableAutoType", group.enable_autotype)?;
    write_opt_bool_element(writer, "EnableSearching", group.enable_searching)?;
    write_uuid_element(
        writer,
        "LastTopVisibleEntry",
        group.last_top_visible_entry.as_ref().unwrap_or(&uuid::Uuid::nil()),
    )?;
    write_custom_data(writer, &group.custom_data)?;

    for child in &group.children {
        match child {
            Node::Group(g) => write_group(writer, g, cipher, attachments)?,
            Node::Entry(e) => write_entry(writer, e, cipher, attachments)?,
        }
    }

    writer.write_event(Event::End(BytesEnd::new("Group")))?;
    Ok(())
}

fn write_deleted_objects(writer: &mut XmlWriter, deleted_objects: &DeletedObjects) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("DeletedObjects")))?;
    for deleted_object in &deleted_objects.objects {
        writer.write_event(Event::Start(BytesStart::new("DeletedObject")))?;
        write_uuid_element(writer, "UUID", &deleted_object.uuid)?;
        write_time_element(writer, "DeletionTime", Some(&deleted_object.deletion_time))?;
        writer.write_event(Event::End(BytesEnd::new("DeletedObject")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("DeletedObjects")))?;
    Ok(())
}

fn write_entry(
    writer: &mut XmlWriter,
    entry: &Entry,
    cipher: &mut dyn Cipher,
    attachments: &mut Vec<HeaderAttachment>,
) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("Entry")))?;

    write_uuid_element(writer, "UUID", &entry.uuid)?;
    write_text_element(writer, "IconID", &entry.icon_id.unwrap_or(0).to_string())?;
    if let Some(icon_uuid) = &entry.custom_icon_uuid {
        write_uuid_element(writer, "CustomIconUUID", icon_uuid)?;
    }
    write_text_element(
        writer,
        "ForegroundColor",
        &entry.foreground_color.as_ref().map(|c| c.to_string()).unwrap_or_default(),
    )?;
    write_text_element(
        writer,
        "BackgroundColor",
        &entry.background_color.as_ref().map(|c| c.to_string()).unwrap_or_default(),
    )?;
    write_opt_text_element(writer, "OverrideURL", entry.override_url.as_deref())?;
    if let Some(quality_check) = entry.quality_check {
        write_bool_element(writer, "QualityCheck", quality_check)?;
    }
    write_text_element(writer, "Tags", &entry.tags.join(";"))?;
    write_times(writer, &entry.times)?;
    write_custom_data(writer, &entry.custom_data)?;

    for (key, value) in &entry.fields {
        match value {
            Value::Bytes(content) => write_binary_field(writer, key, content, attachments)?,
            _ => write_string_field(writer, key, value, cipher)?,
        }
    }

    if let Some(autotype) = &entry.autotype {
        write_autotype(writer, autotype)?;
    }

    if let Some(history) = &entry.history {
        write_history(writer, history, cipher, attachments)?;
    }

    writer.write_event(Event::End(BytesEnd::new("Entry")))?;
    Ok(())
}

fn write_string_field(
    writer: &mut XmlWriter,
    key: &str,
    value: &Value,
    cipher: &mut dyn Cipher,
) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("String")))?;
    write_text_element(writer, "Key", key)?;

    match value {
        Value::Protected(p) => {
            let ciphertext = cipher.encrypt(p.expose_bytes());
            let mut tag = BytesStart::new("Value");
            tag.push_attribute(("Protected", "True"));
            writer.write_event(Event::Start(tag))?;
            escaped_text(writer, &base64_engine::STANDARD.encode(ciphertext))?;
            writer.write_event(Event::End(BytesEnd::new("Value")))?;
        }
        Value::Unprotected(s) => write_text_element(writer, "Value", s)?,
        Value::Bytes(_) => unreachable!("binary fields are written via write_binary_field"),
    }

    writer.write_event(Event::End(BytesEnd::new("String")))?;
    Ok(())
}

fn write_binary_field(
    writer: &mut XmlWriter,
    key: &str,
    content: &[u8],
    attachments: &mut Vec<HeaderAttachment>,
) -> Result<(), DatabaseSaveError> {
    let index = attachments
        .iter()
        .position(|a| a.content == content)
        .unwrap_or_else(|| {
            attachments.push(HeaderAttachment {
                flags: 1,
                content: content.to_vec(),
            });
            attachments.len() - 1
        });

    writer.write_event(Event::Start(BytesStart::new("Binary")))?;
    write_text_element(writer, "Key", key)?;

    let mut tag = BytesStart::new("Value");
    tag.push_attribute(("Ref", index.to_string().as_str()));
    writer.write_event(Event::Empty(tag))?;

    writer.write_event(Event::End(BytesEnd::new("Binary")))?;
    Ok(())
}

fn write_autotype(writer: &mut XmlWriter, autotype: &AutoType) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("AutoType")))?;
    write_bool_element(writer, "Enabled", autotype.enabled)?;
    write_text_element(
        writer,
        "DataTransferObfuscation",
        &autotype.data_transfer_obfuscation.unwrap_or(0).to_string(),
    )?;
    write_opt_text_element(writer, "DefaultSequence", autotype.sequence.as_deref())?;
    for association in &autotype.associations {
        write_association(writer, association)?;
    }
    writer.write_event(Event::End(BytesEnd::new("AutoType")))?;
    Ok(())
}

fn write_association(writer: &mut XmlWriter, association: &AutoTypeAssociation) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("Association")))?;
    write_opt_text_element(writer, "Window", association.window.as_deref())?;
    write_opt_text_element(writer, "KeystrokeSequence", association.sequence.as_deref())?;
    writer.write_event(Event::End(BytesEnd::new("Association")))?;
    Ok(())
}

fn write_history(
    writer: &mut XmlWriter,
    history: &History,
    cipher: &mut dyn Cipher,
    attachments: &mut Vec<HeaderAttachment>,
) -> Result<(), DatabaseSaveError> {
    writer.write_event(Event::Start(BytesStart::new("History")))?;
    // `entries` is stored newest-first; the XML convention is oldest-first.
    for entry in history.get_entries().iter().rev() {
        write_entry(writer, entry, cipher, attachments)?;
    }
    writer.write_event(Event::End(BytesEnd::new("History")))?;
    Ok(())
}
