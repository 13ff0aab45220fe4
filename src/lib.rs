#![doc = include_str!("../README.md")]
#![recursion_limit = "1024"]

mod compression;
mod config;
pub(crate) mod crypt;
mod db;
pub(crate) mod error;
pub(crate) mod format;
pub(crate) mod hmac_block_stream;
mod io;
pub(crate) mod key;
pub(crate) mod variant_dictionary;
pub(crate) mod xml_db;

pub use self::config::*;
pub use self::db::*;
pub use self::error::*;
pub use self::key::DatabaseKey;
#[cfg(feature = "challenge_response")]
pub use self::key::ChallengeResponseKey;
// see https://gist.github.com/msmuenchen/9318327 for file format details
