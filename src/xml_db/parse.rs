//! Event-driven reader for the inner KeePass XML document.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use uuid::Uuid;

use base64::{engine::general_purpose as base64_engine, Engine as _};
use flate2::read::GzDecoder;
use std::io::Read;

use crate::{
    crypt::ciphers::Cipher,
    db::{
        entry::{AutoType, AutoTypeAssociation, Entry, History, ProtectedValue, Value},
        group::Group,
        meta::{BinaryAttachment, BinaryAttachments, CustomIcons, Icon, MemoryProtection, Meta},
        Color, CustomData, CustomDataItem, DeletedObject, DeletedObjects, HeaderAttachment, Times,
    },
    error::{CryptographyError, XmlParseError},
};

use super::times::parse_time;
use super::{DatabaseContent, RootContent};

type XmlReader<'a> = Reader<&'a [u8]>;

pub(crate) fn parse(
    xml: &[u8],
    inner_decryptor: &mut dyn Cipher,
    header_attachments: &[HeaderAttachment],
) -> Result<DatabaseContent, XmlParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut meta = Meta::default();
    let mut root_content = RootContent {
        group: Group::new("Root"),
        deleted_objects: DeletedObjects::default(),
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"Meta" => meta = parse_meta(&mut reader)?,
                    b"Root" => {
                        root_content = parse_root(&mut reader, inner_decryptor, header_attachments, &meta.binaries)?
                    }
                    _ => skip_to_end(&mut reader, &name)?,
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(DatabaseContent {
        root: root_content,
        meta,
    })
}

fn decrypt(cipher: &mut dyn Cipher, ciphertext: &[u8]) -> Result<Vec<u8>, XmlParseError> {
    cipher
        .decrypt(ciphertext)
        .map_err(|e| CryptographyError::from(e).into())
}

fn parse_uuid(s: &str) -> Result<Uuid, XmlParseError> {
    let bytes = base64_engine::STANDARD.decode(s.trim())?;
    Ok(Uuid::from_slice(&bytes)?)
}

fn parse_bool(s: &str) -> Result<bool, XmlParseError> {
    Ok(s.trim().to_ascii_lowercase().parse::<bool>()?)
}

fn get_attribute(e: &BytesStart, name: &[u8]) -> Result<Option<String>, XmlParseError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Skip over an element's subtree once its `Start` event has been consumed.
fn skip_to_end(reader: &mut XmlReader, tag: &[u8]) -> Result<(), XmlParseError> {
    let mut depth = 0u32;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == tag => depth += 1,
            Event::End(e) if e.name().as_ref() == tag => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => return Err(XmlParseError::MissingField("unexpected end of document")),
            _ => {}
        }
    }
}

/// Read the text content of a leaf element once its `Start` event has been consumed.
fn read_text(reader: &mut XmlReader, tag: &[u8]) -> Result<String, XmlParseError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::End(e) if e.name().as_ref() == tag => break,
            Event::Eof => return Err(XmlParseError::MissingField("unexpected end of document")),
            _ => {}
        }
    }
    Ok(text)
}

fn parse_meta(reader: &mut XmlReader) -> Result<Meta, XmlParseError> {
    let mut meta = Meta::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"Generator" => meta.generator = non_empty(read_text(reader, &name)?),
                    b"DatabaseName" => meta.database_name = non_empty(read_text(reader, &name)?),
                    b"DatabaseNameChanged" => {
                        meta.database_name_changed = Some(parse_time(&read_text(reader, &name)?)?)
                    }
                    b"DatabaseDescription" => meta.database_description = non_empty(read_text(reader, &name)?),
                    b"DatabaseDescriptionChanged" => {
                        meta.database_description_changed = Some(parse_time(&read_text(reader, &name)?)?)
                    }
                    b"DefaultUserName" => meta.default_username = non_empty(read_text(reader, &name)?),
                    b"DefaultUserNameChanged" => {
                        meta.default_username_changed = Some(parse_time(&read_text(reader, &name)?)?)
                    }
                    b"MaintenanceHistoryDays" => {
                        meta.maintenance_history_days = Some(parse_usize_or_unlimited(&read_text(reader, &name)?)?)
                    }
                    b"Color" => {
                        let t = read_text(reader, &name)?;
                        meta.color = if t.is_empty() { None } else { Some(t.parse()?) };
                    }
                    b"MasterKeyChanged" => meta.master_key_changed = Some(parse_time(&read_text(reader, &name)?)?),
                    b"MasterKeyChangeRec" => meta.master_key_change_rec = Some(read_text(reader, &name)?.parse()?),
                    b"MasterKeyChangeForce" => {
                        meta.master_key_change_force = Some(read_text(reader, &name)?.parse()?)
                    }
                    b"MemoryProtection" => meta.memory_protection = parse_memory_protection(reader)?,
                    b"CustomIcons" => meta.custom_icons = parse_custom_icons(reader)?,
                    b"RecycleBinEnabled" => meta.recycle_bin_enabled = Some(parse_bool(&read_text(reader, &name)?)?),
                    b"RecycleBinUUID" => meta.recycle_bin_uuid = Some(parse_uuid(&read_text(reader, &name)?)?),
                    b"RecycleBinChanged" => meta.recycle_bin_changed = Some(parse_time(&read_text(reader, &name)?)?),
                    b"EntryTemplatesGroup" => meta.entry_templates_group = Some(parse_uuid(&read_text(reader, &name)?)?),
                    b"EntryTemplatesGroupChanged" => {
                        meta.entry_templates_group_changed = Some(parse_time(&read_text(reader, &name)?)?)
                    }
                    b"LastSelectedGroup" => meta.last_selected_group = Some(parse_uuid(&read_text(reader, &name)?)?),
                    b"LastTopVisibleGroup" => meta.last_top_visible_group = Some(parse_uuid(&read_text(reader, &name)?)?),
                    b"HistoryMaxItems" => {
                        meta.history_max_items = Some(parse_usize_or_unlimited(&read_text(reader, &name)?)?)
                    }
                    b"HistoryMaxSize" => {
                        meta.history_max_size = Some(parse_usize_or_unlimited(&read_text(reader, &name)?)?)
                    }
                    b"SettingsChanged" => meta.settings_changed = Some(parse_time(&read_text(reader, &name)?)?),
                    b"Binaries" => meta.binaries = parse_meta_binaries(reader)?,
                    b"CustomData" => meta.custom_data = parse_custom_data(reader)?,
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"Meta" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Meta")),
            _ => {}
        }
    }

    Ok(meta)
}

/// `-1` conventionally means "unlimited" for the history/maintenance size
/// fields, even though they're otherwise stored as unsigned counts.
fn parse_usize_or_unlimited(s: &str) -> Result<usize, XmlParseError> {
    let s = s.trim();
    if s == "-1" {
        return Ok(usize::MAX);
    }
    Ok(s.parse()?)
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_memory_protection(reader: &mut XmlReader) -> Result<MemoryProtection, XmlParseError> {
    let mut mp = MemoryProtection {
        protect_title: false,
        protect_username: false,
        protect_password: true,
        protect_url: false,
        protect_notes: false,
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"ProtectTitle" => mp.protect_title = parse_bool(&read_text(reader, &name)?)?,
                    b"ProtectUserName" => mp.protect_username = parse_bool(&read_text(reader, &name)?)?,
                    b"ProtectPassword" => mp.protect_password = parse_bool(&read_text(reader, &name)?)?,
                    b"ProtectURL" => mp.protect_url = parse_bool(&read_text(reader, &name)?)?,
                    b"ProtectNotes" => mp.protect_notes = parse_bool(&read_text(reader, &name)?)?,
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"MemoryProtection" => break,
            Event::Eof => return Err(XmlParseError::MissingField("MemoryProtection")),
            _ => {}
        }
    }

    Ok(mp)
}

fn parse_custom_icons(reader: &mut XmlReader) -> Result<CustomIcons, XmlParseError> {
    let mut icons = CustomIcons::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Icon" => {
                let mut uuid = None;
                let mut data = Vec::new();
                loop {
                    match reader.read_event()? {
                        Event::Start(e) => {
                            let name = e.name().as_ref().to_vec();
                            match name.as_slice() {
                                b"UUID" => uuid = Some(parse_uuid(&read_text(reader, &name)?)?),
                                b"Data" => data = base64_engine::STANDARD.decode(read_text(reader, &name)?.trim())?,
                                _ => skip_to_end(reader, &name)?,
                            }
                        }
                        Event::End(e) if e.name().as_ref() == b"Icon" => break,
                        Event::Eof => return Err(XmlParseError::MissingField("Icon")),
                        _ => {}
                    }
                }
                icons.icons.push(Icon {
                    uuid: uuid.ok_or(XmlParseError::MissingField("Icon/UUID"))?,
                    data,
                });
            }
            Event::End(e) if e.name().as_ref() == b"CustomIcons" => break,
            Event::Eof => return Err(XmlParseError::MissingField("CustomIcons")),
            _ => {}
        }
    }

    Ok(icons)
}

fn parse_meta_binaries(reader: &mut XmlReader) -> Result<BinaryAttachments, XmlParseError> {
    let mut binaries = BinaryAttachments::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Binary" => {
                let identifier = get_attribute(&e, b"ID")?;
                let compressed = get_attribute(&e, b"Compressed")?
                    .map(|v| parse_bool(&v))
                    .transpose()?
                    .unwrap_or(false);

                let raw = base64_engine::STANDARD.decode(read_text(reader, b"Binary")?.trim())?;
                let content = if compressed {
                    let mut decompressed = Vec::new();
                    GzDecoder::new(raw.as_slice())
                        .read_to_end(&mut decompressed)
                        .map_err(XmlParseError::Compression)?;
                    decompressed
                } else {
                    raw
                };

                binaries.push(BinaryAttachment {
                    identifier,
                    flags: 0,
                    compressed,
                    content,
                });
            }
            Event::Empty(e) if e.name().as_ref() == b"Binary" => {
                binaries.push(BinaryAttachment {
                    identifier: get_attribute(&e, b"ID")?,
                    flags: 0,
                    compressed: false,
                    content: Vec::new(),
                });
            }
            Event::End(e) if e.name().as_ref() == b"Binaries" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Binaries")),
            _ => {}
        }
    }

    Ok(binaries)
}

fn parse_custom_data(reader: &mut XmlReader) -> Result<CustomData, XmlParseError> {
    let mut custom_data = CustomData::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Item" => {
                let mut key = None;
                let mut value = None;
                let mut last_modification_time = None;
                loop {
                    match reader.read_event()? {
                        Event::Start(e) => {
                            let name = e.name().as_ref().to_vec();
                            match name.as_slice() {
                                b"Key" => key = Some(read_text(reader, &name)?),
                                b"Value" => value = Some(Value::Unprotected(read_text(reader, &name)?)),
                                b"LastModificationTime" => {
                                    last_modification_time = Some(parse_time(&read_text(reader, &name)?)?)
                                }
                                _ => skip_to_end(reader, &name)?,
                            }
                        }
                        Event::End(e) if e.name().as_ref() == b"Item" => break,
                        Event::Eof => return Err(XmlParseError::MissingField("CustomData/Item")),
                        _ => {}
                    }
                }
                custom_data.items.insert(
                    key.ok_or(XmlParseError::MissingField("CustomData/Item/Key"))?,
                    CustomDataItem {
                        value,
                        last_modification_time,
                    },
                );
            }
            Event::End(e) if e.name().as_ref() == b"CustomData" => break,
            Event::Eof => return Err(XmlParseError::MissingField("CustomData")),
            _ => {}
        }
    }

    Ok(custom_data)
}

fn parse_times(reader: &mut XmlReader) -> Result<Times, XmlParseError> {
    let mut times = Times::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"Expires" => times.expires = parse_bool(&read_text(reader, &name)?)?,
                    b"UsageCount" => times.usage_count = read_text(reader, &name)?.parse()?,
                    _ => {
                        let tag_name = String::from_utf8_lossy(&name).into_owned();
                        let value = parse_time(&read_text(reader, &name)?)?;
                        times.times.insert(tag_name, value);
                    }
                }
            }
            Event::End(e) if e.name().as_ref() == b"Times" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Times")),
            _ => {}
        }
    }

    Ok(times)
}

fn parse_root(
    reader: &mut XmlReader,
    cipher: &mut dyn Cipher,
    header_attachments: &[HeaderAttachment],
    meta_binaries: &BinaryAttachments,
) -> Result<RootContent, XmlParseError> {
    let mut group = None;
    let mut deleted_objects = DeletedObjects::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"Group" => group = Some(parse_group(reader, cipher, header_attachments, meta_binaries)?),
                    b"DeletedObjects" => deleted_objects = parse_deleted_objects(reader)?,
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"Root" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Root")),
            _ => {}
        }
    }

    Ok(RootContent {
        group: group.ok_or(XmlParseError::MissingField("Root/Group"))?,
        deleted_objects,
    })
}

fn parse_deleted_objects(reader: &mut XmlReader) -> Result<DeletedObjects, XmlParseError> {
    let mut deleted_objects = DeletedObjects::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"DeletedObject" => {
                let mut uuid = None;
                let mut deletion_time = None;
                loop {
                    match reader.read_event()? {
                        Event::Start(e) => {
                            let name = e.name().as_ref().to_vec();
                            match name.as_slice() {
                                b"UUID" => uuid = Some(parse_uuid(&read_text(reader, &name)?)?),
                                b"DeletionTime" => deletion_time = Some(parse_time(&read_text(reader, &name)?)?),
                                _ => skip_to_end(reader, &name)?,
                            }
                        }
                        Event::End(e) if e.name().as_ref() == b"DeletedObject" => break,
                        Event::Eof => return Err(XmlParseError::MissingField("DeletedObject")),
                        _ => {}
                    }
                }
                deleted_objects.objects.push(DeletedObject {
                    uuid: uuid.ok_or(XmlParseError::MissingField("DeletedObject/UUID"))?,
                    deletion_time: deletion_time.ok_or(XmlParseError::MissingField("DeletedObject/DeletionTime"))?,
                });
            }
            Event::End(e) if e.name().as_ref() == b"DeletedObjects" => break,
            Event::Eof => return Err(XmlParseError::MissingField("DeletedObjects")),
            _ => {}
        }
    }

    Ok(deleted_objects)
}

fn parse_group(
    reader: &mut XmlReader,
    cipher: &mut dyn Cipher,
    header_attachments: &[HeaderAttachment],
    meta_binaries: &BinaryAttachments,
) -> Result<Group, XmlParseError> {
    let mut group = Group::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"UUID" => group.uuid = parse_uuid(&read_text(reader, &name)?)?,
                    b"Name" => group.name = read_text(reader, &name)?,
                    b"Notes" => group.notes = non_empty(read_text(reader, &name)?),
                    b"IconID" => group.icon_id = Some(read_text(reader, &name)?.parse()?),
                    b"CustomIconUUID" => group.custom_icon_uuid = Some(parse_uuid(&read_text(reader, &name)?)?),
                    b"Times" => group.times = parse_times(reader)?,
                    b"IsExpanded" => group.is_expanded = parse_bool(&read_text(reader, &name)?)?,
                    b"DefaultAutoTypeSequence" => {
                        group.default_autotype_sequence = non_empty(read_text(reader, &name)?)
                    }
                    b"EnableAutoType" => {
                        group.enable_autotype = parse_opt_bool(&read_text(reader, &name)?)?
                    }
                    b"EnableSearching" => {
                        group.enable_searching = parse_opt_bool(&read_text(reader, &name)?)?
                    }
                    b"LastTopVisibleEntry" => {
                        group.last_top_visible_entry = Some(parse_uuid(&read_text(reader, &name)?)?)
                    }
                    b"CustomData" => group.custom_data = parse_custom_data(reader)?,
                    b"Group" => group.add_child(parse_group(reader, cipher, header_attachments, meta_binaries)?),
                    b"Entry" => group.add_child(parse_entry(reader, cipher, header_attachments, meta_binaries)?),
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"Group" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Group")),
            _ => {}
        }
    }

    Ok(group)
}

/// `None`/`Inherit` means "inherit from the parent group"
fn parse_opt_bool(s: &str) -> Result<Option<bool>, XmlParseError> {
    match s.trim() {
        "null" | "Inherit" | "" => Ok(None),
        other => Ok(Some(parse_bool(other)?)),
    }
}

fn parse_entry(
    reader: &mut XmlReader,
    cipher: &mut dyn Cipher,
    header_attachments: &[HeaderAttachment],
    meta_binaries: &BinaryAttachments,
) -> Result<Entry, XmlParseError> {
    let mut entry = Entry::default();
    let mut history = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"UUID" => entry.uuid = parse_uuid(&read_text(reader, &name)?)?,
                    b"IconID" => entry.icon_id = Some(read_text(reader, &name)?.parse()?),
                    b"CustomIconUUID" => entry.custom_icon_uuid = Some(parse_uuid(&read_text(reader, &name)?)?),
                    b"ForegroundColor" => {
                        let t = read_text(reader, &name)?;
                        entry.foreground_color = if t.is_empty() { None } else { Some(t.parse()?) };
                    }
                    b"BackgroundColor" => {
                        let t = read_text(reader, &name)?;
                        entry.background_color = if t.is_empty() { None } else { Some(t.parse()?) };
                    }
                    b"OverrideURL" => entry.override_url = non_empty(read_text(reader, &name)?),
                    b"QualityCheck" => entry.quality_check = Some(parse_bool(&read_text(reader, &name)?)?),
                    b"Tags" => {
                        let t = read_text(reader, &name)?;
                        entry.tags = t.split(|c| c == ',' || c == ';').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect();
                    }
                    b"Times" => entry.times = parse_times(reader)?,
                    b"CustomData" => entry.custom_data = parse_custom_data(reader)?,
                    b"String" => {
                        let (key, value) = parse_field(reader, cipher)?;
                        entry.fields.insert(key, value);
                    }
                    b"Binary" => {
                        let (key, content) = parse_binary_ref(reader, header_attachments, meta_binaries)?;
                        entry.fields.insert(key, Value::Bytes(content));
                    }
                    b"AutoType" => entry.autotype = Some(parse_autotype(reader)?),
                    b"History" => {
                        history = Some(parse_history(reader, cipher, header_attachments, meta_binaries)?)
                    }
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"Entry" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Entry")),
            _ => {}
        }
    }

    entry.history = history;
    Ok(entry)
}

fn parse_field(reader: &mut XmlReader, cipher: &mut dyn Cipher) -> Result<(String, Value), XmlParseError> {
    let mut key = None;
    let mut value = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Key" => key = Some(read_text(reader, b"Key")?),
            Event::Start(e) if e.name().as_ref() == b"Value" => {
                let protected = get_attribute(&e, b"Protected")?
                    .map(|v| parse_bool(&v))
                    .transpose()?
                    .unwrap_or(false);
                let text = read_text(reader, b"Value")?;
                value = Some(if protected {
                    let ciphertext = base64_engine::STANDARD.decode(text.trim())?;
                    let plaintext = decrypt(cipher, &ciphertext)?;
                    Value::Protected(ProtectedValue::new(plaintext))
                } else {
                    Value::Unprotected(text)
                });
            }
            Event::Empty(e) if e.name().as_ref() == b"Value" => {
                let protected = get_attribute(&e, b"Protected")?
                    .map(|v| parse_bool(&v))
                    .transpose()?
                    .unwrap_or(false);
                value = Some(if protected {
                    let plaintext = decrypt(cipher, &[])?;
                    Value::Protected(ProtectedValue::new(plaintext))
                } else {
                    Value::Unprotected(String::new())
                });
            }
            Event::End(e) if e.name().as_ref() == b"String" => break,
            Event::Eof => return Err(XmlParseError::MissingField("String")),
            _ => {}
        }
    }

    Ok((
        key.ok_or(XmlParseError::MissingField("String/Key"))?,
        value.unwrap_or_else(|| Value::Unprotected(String::new())),
    ))
}

fn parse_binary_ref(
    reader: &mut XmlReader,
    header_attachments: &[HeaderAttachment],
    meta_binaries: &BinaryAttachments,
) -> Result<(String, Vec<u8>), XmlParseError> {
    let mut key = None;
    let mut content = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Key" => key = Some(read_text(reader, b"Key")?),
            Event::Empty(e) if e.name().as_ref() == b"Value" => {
                content = resolve_binary_ref(&e, header_attachments, meta_binaries)?;
            }
            Event::Start(e) if e.name().as_ref() == b"Value" => {
                content = resolve_binary_ref(&e, header_attachments, meta_binaries)?;
                skip_to_end(reader, b"Value")?;
            }
            Event::End(e) if e.name().as_ref() == b"Binary" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Binary")),
            _ => {}
        }
    }

    Ok((key.ok_or(XmlParseError::MissingField("Binary/Key"))?, content))
}

fn resolve_binary_ref(
    e: &BytesStart,
    header_attachments: &[HeaderAttachment],
    meta_binaries: &BinaryAttachments,
) -> Result<Vec<u8>, XmlParseError> {
    let Some(reference) = get_attribute(e, b"Ref")? else {
        return Ok(Vec::new());
    };
    let index: usize = reference.parse()?;
    Ok(header_attachments
        .get(index)
        .map(|a| a.content.clone())
        .or_else(|| meta_binaries.get(index).map(|a| a.content.clone()))
        .unwrap_or_default())
}

fn parse_autotype(reader: &mut XmlReader) -> Result<AutoType, XmlParseError> {
    let mut autotype = AutoType::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"Enabled" => autotype.enabled = parse_bool(&read_text(reader, &name)?)?,
                    b"DataTransferObfuscation" => {
                        autotype.data_transfer_obfuscation = Some(read_text(reader, &name)?.parse()?)
                    }
                    b"DefaultSequence" => autotype.sequence = non_empty(read_text(reader, &name)?),
                    b"Association" => autotype.associations.push(parse_association(reader)?),
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"AutoType" => break,
            Event::Eof => return Err(XmlParseError::MissingField("AutoType")),
            _ => {}
        }
    }

    Ok(autotype)
}

fn parse_association(reader: &mut XmlReader) -> Result<AutoTypeAssociation, XmlParseError> {
    let mut association = AutoTypeAssociation::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"Window" => association.window = non_empty(read_text(reader, &name)?),
                    b"KeystrokeSequence" => association.sequence = non_empty(read_text(reader, &name)?),
                    _ => skip_to_end(reader, &name)?,
                }
            }
            Event::End(e) if e.name().as_ref() == b"Association" => break,
            Event::Eof => return Err(XmlParseError::MissingField("Association")),
            _ => {}
        }
    }

    Ok(association)
}

fn parse_history(
    reader: &mut XmlReader,
    cipher: &mut dyn Cipher,
    header_attachments: &[HeaderAttachment],
    meta_binaries: &BinaryAttachments,
) -> Result<History, XmlParseError> {
    let mut history = History::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Entry" => {
                history.add_entry(parse_entry(reader, cipher, header_attachments, meta_binaries)?);
            }
            Event::End(e) if e.name().as_ref() == b"History" => break,
            Event::Eof => return Err(XmlParseError::MissingField("History")),
            _ => {}
        }
    }

    Ok(history)
}
