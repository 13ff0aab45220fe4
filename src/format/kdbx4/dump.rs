use std::convert::TryInto;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    crypt,
    db::{Database, HeaderAttachment},
    error::DatabaseSaveError,
    format::kdbx4::{
        HEADER_COMPRESSION_ID, HEADER_ENCRYPTION_IV, HEADER_END, HEADER_KDF_PARAMS, HEADER_MASTER_SEED,
        HEADER_OUTER_ENCRYPTION_ID, INNER_HEADER_BINARY_ATTACHMENTS, INNER_HEADER_END,
        INNER_HEADER_RANDOM_STREAM_ID, INNER_HEADER_RANDOM_STREAM_KEY,
    },
    hmac_block_stream,
    key::DatabaseKey,
};

/// Dump a KeePass KDBX4 database using the given key, writing the encrypted container to
/// `destination`.
pub(crate) fn dump_kdbx4(
    db: &Database,
    key: &DatabaseKey,
    destination: &mut dyn std::io::Write,
) -> Result<(), DatabaseSaveError> {
    let config = &db.config;

    let mut master_seed = vec![0; 32];
    getrandom::fill(&mut master_seed)?;

    let mut outer_iv = vec![0; config.outer_cipher_config.get_iv_size()];
    getrandom::fill(&mut outer_iv)?;

    let (kdf, kdf_seed) = config.kdf_config.get_kdf_and_seed()?;

    let key_elements = key.get_key_elements()?;
    let key_elements: Vec<&[u8]> = key_elements.iter().map(|v| &v[..]).collect();
    let composite_key = crypt::calculate_sha256(&key_elements)?;
    let transformed_key = kdf.transform_key(&composite_key)?;
    let master_key = crypt::calculate_sha256(&[master_seed.as_ref(), &transformed_key])?;

    let header_data = dump_outer_header(db, &master_seed, &outer_iv, &kdf_seed)?;

    let header_sha256 = crypt::calculate_sha256(&[&header_data])?;

    // verify credentials
    let hmac_key = crypt::calculate_sha512(&[&master_seed, &transformed_key, &hmac_block_stream::HMAC_KEY_END])?;
    let header_hmac_key = hmac_block_stream::get_hmac_block_key(u64::MAX, &hmac_key)?;
    let header_hmac = crypt::calculate_hmac(&[&header_data], &header_hmac_key)?;

    destination.write_all(&header_data)?;
    destination.write_all(&header_sha256)?;
    destination.write_all(&header_hmac)?;

    let inner_random_stream_key = {
        let mut key = vec![0; config.inner_cipher_config.get_key_size()];
        getrandom::fill(&mut key)?;
        key
    };

    let mut inner_cipher = config.inner_cipher_config.get_cipher(&inner_random_stream_key)?;

    // after inner header is one XML document
    let (xml, attachments) = crate::xml_db::dump::dump(db, inner_cipher.as_mut())?;

    let mut payload: Vec<u8> = dump_inner_header(&config.inner_cipher_config, &inner_random_stream_key, &attachments);
    payload.extend_from_slice(&xml);

    let payload_compressed = config.compression_config.get_compression().compress(&payload)?;

    let payload_encrypted = config
        .outer_cipher_config
        .get_cipher(&master_key, &outer_iv)?
        .encrypt(&payload_compressed);

    let payload_hmac = hmac_block_stream::write_hmac_block_stream(&payload_encrypted, &hmac_key)?;
    destination.write_all(&payload_hmac)?;

    Ok(())
}

fn write_header_field(header_data: &mut Vec<u8>, field_id: u8, field_value: &[u8]) {
    header_data.push(field_id);
    let pos = header_data.len();
    header_data.resize(pos + 4, 0);
    LittleEndian::write_u32(&mut header_data[pos..pos + 4], field_value.len().try_into().unwrap());
    header_data.extend_from_slice(field_value);
}

fn dump_outer_header(
    db: &Database,
    master_seed: &[u8],
    outer_iv: &[u8],
    kdf_seed: &[u8],
) -> Result<Vec<u8>, DatabaseSaveError> {
    let config = &db.config;

    let mut header_data: Vec<u8> = vec![];
    config.version.dump(&mut header_data)?;

    write_header_field(
        &mut header_data,
        HEADER_OUTER_ENCRYPTION_ID,
        &config.outer_cipher_config.dump(),
    );

    write_header_field(
        &mut header_data,
        HEADER_COMPRESSION_ID,
        &config.compression_config.dump(),
    );

    write_header_field(&mut header_data, HEADER_ENCRYPTION_IV, outer_iv);

    write_header_field(&mut header_data, HEADER_MASTER_SEED, master_seed);

    let vd = config.kdf_config.to_variant_dictionary(kdf_seed);
    let mut vd_data = Vec::new();
    vd.dump(&mut vd_data)?;
    write_header_field(&mut header_data, HEADER_KDF_PARAMS, &vd_data);

    write_header_field(&mut header_data, HEADER_END, &[]);

    Ok(header_data)
}

fn dump_inner_header(
    inner_cipher_config: &crate::config::InnerCipherConfig,
    inner_random_stream_key: &[u8],
    binaries: &[HeaderAttachment],
) -> Vec<u8> {
    let mut header_data: Vec<u8> = vec![];

    let mut random_stream_data = vec![0; 4];
    LittleEndian::write_u32(&mut random_stream_data[0..4], inner_cipher_config.dump());
    write_header_field(&mut header_data, INNER_HEADER_RANDOM_STREAM_ID, &random_stream_data);

    write_header_field(
        &mut header_data,
        INNER_HEADER_RANDOM_STREAM_KEY,
        inner_random_stream_key,
    );

    for binary in binaries {
        let mut attachment = vec![binary.flags];
        attachment.extend_from_slice(&binary.content);
        write_header_field(&mut header_data, INNER_HEADER_BINARY_ATTACHMENTS, &attachment);
    }

    write_header_field(&mut header_data, INNER_HEADER_END, &[]);

    header_data
}
