use std::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    config::{CompressionConfig, DatabaseConfig, InnerCipherConfig, KdfConfig, OuterCipherConfig},
    crypt::{self, ciphers::Cipher},
    db::{Database, HeaderAttachment},
    error::{DatabaseIntegrityError, DatabaseKeyError, DatabaseOpenError},
    format::kdbx4::{
        HEADER_COMMENT, HEADER_COMPRESSION_ID, HEADER_ENCRYPTION_IV, HEADER_END, HEADER_KDF_PARAMS,
        HEADER_MASTER_SEED, HEADER_OUTER_ENCRYPTION_ID, HEADER_PUBLIC_CUSTOM_DATA,
        INNER_HEADER_BINARY_ATTACHMENTS, INNER_HEADER_END, INNER_HEADER_RANDOM_STREAM_ID,
        INNER_HEADER_RANDOM_STREAM_KEY,
    },
    format::DatabaseVersion,
    hmac_block_stream,
    key::DatabaseKey,
    variant_dictionary::VariantDictionary,
};

/// Parsed KDBX4 outer header.
#[derive(Debug)]
pub(crate) struct KDBX4OuterHeader {
    pub version: DatabaseVersion,
    pub outer_cipher_config: OuterCipherConfig,
    pub compression_config: CompressionConfig,
    pub master_seed: Vec<u8>,
    pub outer_iv: Vec<u8>,
    pub kdf_config: KdfConfig,
    pub kdf_seed: Vec<u8>,
}

/// Parsed KDBX4 inner header.
#[derive(Debug)]
pub(crate) struct KDBX4InnerHeader {
    pub inner_cipher_config: InnerCipherConfig,
    pub inner_random_stream_key: Vec<u8>,
    pub binaries: Vec<HeaderAttachment>,
}

impl From<&[u8]> for HeaderAttachment {
    fn from(data: &[u8]) -> Self {
        HeaderAttachment {
            flags: data[0],
            content: data[1..].to_vec(),
        }
    }
}

/// Open, decrypt and parse a KeePass KDBX4 database from a source and a key
pub(crate) fn parse_kdbx4(data: &[u8], key: &DatabaseKey) -> Result<Database, DatabaseOpenError> {
    let (outer_header, inner_header, mut inner_decryptor, xml) = decrypt_kdbx4(data, key)?;

    let database_content = crate::xml_db::parse::parse(&xml, inner_decryptor.as_mut(), &inner_header.binaries)
        .map_err(DatabaseIntegrityError::from)?;

    let config = DatabaseConfig {
        version: outer_header.version,
        outer_cipher_config: outer_header.outer_cipher_config,
        compression_config: outer_header.compression_config,
        inner_cipher_config: inner_header.inner_cipher_config,
        kdf_config: outer_header.kdf_config,
    };

    Ok(Database {
        config,
        header_attachments: inner_header.binaries,
        root: database_content.root.group,
        deleted_objects: database_content.root.deleted_objects,
        meta: database_content.meta,
    })
}

/// Open and decrypt a KeePass KDBX4 database, returning its outer header, inner header, the
/// inner stream cipher used to unobfuscate protected fields, and the decompressed inner XML
/// document.
pub(crate) fn decrypt_kdbx4(
    data: &[u8],
    key: &DatabaseKey,
) -> Result<(KDBX4OuterHeader, KDBX4InnerHeader, Box<dyn Cipher>, Vec<u8>), DatabaseOpenError> {
    let (header, inner_header_start) = parse_outer_header(data)?;

    // split file into segments:
    //      header_data         - The outer header data
    //      header_sha256       - A Sha256 hash of header_data (for verification of header integrity)
    //      header_hmac         - A HMAC of the header_data (for verification of the key_elements)
    //      hmac_block_stream   - A HMAC-verified block stream of encrypted and compressed blocks
    let header_data = &data[0..inner_header_start];
    let header_sha256 = &data[inner_header_start..(inner_header_start + 32)];
    let header_hmac = &data[(inner_header_start + 32)..(inner_header_start + 64)];
    let hmac_block_stream = &data[(inner_header_start + 64)..];

    // derive master key from composite key, KDF and master_seed
    let key_elements = key.get_key_elements()?;
    let key_elements: Vec<&[u8]> = key_elements.iter().map(|v| &v[..]).collect();
    let composite_key = crypt::calculate_sha256(&key_elements)?;
    let transformed_key = header
        .kdf_config
        .get_kdf_seeded(&header.kdf_seed)
        .transform_key(&composite_key)?;
    let master_key = crypt::calculate_sha256(&[header.master_seed.as_ref(), &transformed_key])?;

    // verify header
    if header_sha256 != crypt::calculate_sha256(&[&data[0..inner_header_start]])?.as_slice() {
        return Err(DatabaseIntegrityError::HeaderHashMismatch.into());
    }

    // verify credentials
    let hmac_key = crypt::calculate_sha512(&[
        &header.master_seed,
        &transformed_key,
        &hmac_block_stream::HMAC_KEY_END,
    ])?;
    let header_hmac_key = hmac_block_stream::get_hmac_block_key(u64::MAX, &hmac_key)?;
    if header_hmac != crypt::calculate_hmac(&[header_data], &header_hmac_key)?.as_slice() {
        return Err(DatabaseKeyError::IncorrectKey.into());
    }

    // read encrypted payload from hmac-verified block stream
    let payload_encrypted = hmac_block_stream::read_hmac_block_stream(hmac_block_stream, &hmac_key)?;

    // Decrypt and decompress encrypted payload
    let payload_compressed = header
        .outer_cipher_config
        .get_cipher(&master_key, header.outer_iv.as_ref())?
        .decrypt(&payload_encrypted)
        .map_err(crate::error::CryptographyError::from)?;
    let payload = header
        .compression_config
        .get_compression()
        .decompress(&payload_compressed)?;

    // KDBX4 has an inner header, too - parse it
    let (inner_header, body_start) = parse_inner_header(&payload)?;

    // after inner header is one XML document
    let xml = payload[body_start..].to_vec();

    let stream_key = inner_header.inner_random_stream_key.clone();
    let inner_decryptor = inner_header.inner_cipher_config.get_cipher(&stream_key)?;

    Ok((header, inner_header, inner_decryptor, xml))
}

fn parse_outer_header(data: &[u8]) -> Result<(KDBX4OuterHeader, usize), DatabaseOpenError> {
    let version = DatabaseVersion::parse(data)?;
    // skip over the version header
    let mut pos = DatabaseVersion::get_version_header_size();

    let mut outer_cipher_config: Option<OuterCipherConfig> = None;
    let mut compression_config: Option<CompressionConfig> = None;
    let mut master_seed: Option<Vec<u8>> = None;
    let mut outer_iv: Option<Vec<u8>> = None;
    let mut kdf: Option<(KdfConfig, Vec<u8>)> = None;

    loop {
        // parse header blocks.
        //
        // every block is a triplet of (5 + entry_length) bytes with this structure:
        //
        // (
        //   entry_type: u8,                        // a numeric entry type identifier
        //   entry_length: u32,                     // length of the entry buffer
        //   entry_buffer: [u8; entry_length]       // the entry buffer
        // )

        let entry_type = data[pos];
        let entry_length: usize = LittleEndian::read_u32(&data[pos + 1..(pos + 5)]) as usize;
        let entry_buffer = &data[(pos + 5)..(pos + 5 + entry_length)];

        pos += 5 + entry_length;

        match entry_type {
            HEADER_END => {
                break;
            }

            HEADER_COMMENT => {}

            HEADER_OUTER_ENCRYPTION_ID => {
                outer_cipher_config = Some(OuterCipherConfig::try_from(entry_buffer)?);
            }

            HEADER_COMPRESSION_ID => {
                compression_config = Some(CompressionConfig::try_from(LittleEndian::read_u32(entry_buffer))?);
            }

            HEADER_MASTER_SEED => master_seed = Some(entry_buffer.to_vec()),

            HEADER_ENCRYPTION_IV => outer_iv = Some(entry_buffer.to_vec()),

            HEADER_KDF_PARAMS => {
                let vd = VariantDictionary::parse(entry_buffer)?;
                kdf = Some(<(KdfConfig, Vec<u8>)>::try_from(vd)?);
            }

            HEADER_PUBLIC_CUSTOM_DATA => {
                // Custom data reserved for plugins/forks; this library does not round-trip it.
            }

            _ => {
                return Err(DatabaseIntegrityError::InvalidOuterHeaderEntry { entry_type }.into());
            }
        };
    }

    // at this point, the header needs to be fully defined - unwrap options and return errors if
    // something is missing

    fn get_or_err<T>(v: Option<T>, err: &str) -> Result<T, DatabaseIntegrityError> {
        v.ok_or_else(|| DatabaseIntegrityError::IncompleteOuterHeader {
            missing_field: err.into(),
        })
    }

    let outer_cipher_config = get_or_err(outer_cipher_config, "Outer Cipher ID")?;
    let compression_config = get_or_err(compression_config, "Compression ID")?;
    let master_seed = get_or_err(master_seed, "Master seed")?;
    let outer_iv = get_or_err(outer_iv, "Outer IV")?;
    let (kdf_config, kdf_seed) = get_or_err(kdf, "Key Derivation Function Parameters")?;

    Ok((
        KDBX4OuterHeader {
            version,
            outer_cipher_config,
            compression_config,
            master_seed,
            outer_iv,
            kdf_config,
            kdf_seed,
        },
        pos,
    ))
}

fn parse_inner_header(data: &[u8]) -> Result<(KDBX4InnerHeader, usize), DatabaseOpenError> {
    let mut pos = 0;

    let mut inner_cipher_config = None;
    let mut inner_random_stream_key = None;
    let mut binaries = Vec::new();

    loop {
        let entry_type = data[pos];
        let entry_length: usize = LittleEndian::read_u32(&data[pos + 1..(pos + 5)]) as usize;
        let entry_buffer = &data[(pos + 5)..(pos + 5 + entry_length)];

        pos += 5 + entry_length;

        match entry_type {
            INNER_HEADER_END => break,

            INNER_HEADER_RANDOM_STREAM_ID => {
                inner_cipher_config = Some(InnerCipherConfig::try_from(LittleEndian::read_u32(entry_buffer))?);
            }

            INNER_HEADER_RANDOM_STREAM_KEY => inner_random_stream_key = Some(entry_buffer.to_vec()),

            INNER_HEADER_BINARY_ATTACHMENTS => {
                binaries.push(HeaderAttachment::from(entry_buffer));
            }

            _ => {
                return Err(DatabaseIntegrityError::InvalidInnerHeaderEntry { entry_type }.into());
            }
        }
    }

    fn get_or_err<T>(v: Option<T>, err: &str) -> Result<T, DatabaseIntegrityError> {
        v.ok_or_else(|| DatabaseIntegrityError::IncompleteInnerHeader {
            missing_field: err.into(),
        })
    }

    let inner_cipher_config = get_or_err(inner_cipher_config, "Inner random stream UUID")?;
    let inner_random_stream_key = get_or_err(inner_random_stream_key, "Inner random stream key")?;

    Ok((
        KDBX4InnerHeader {
            inner_cipher_config,
            inner_random_stream_key,
            binaries,
        },
        pos,
    ))
}
