pub mod chunk;
pub mod crypto;
pub mod reader;
pub mod writer;

pub use reader::{parse_itl, parse_itl_bytes, validate_itl, ItlLibrary, ItlPlaylist, ItlTrack};
pub use writer::{insert_playlist, insert_tracks, rewrite_extensions, update_locations, NewItlTrack};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ItlError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Not an itl file, bad magic: {found:02x?}")]
    BadMagic { found: [u8; 4] },

    #[error("Unexpected end of data at offset {offset}.")]
    UnexpectedEof { offset: usize },

    #[error("Malformed chunk at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("zlib inflate failed: {0}")]
    Inflate(std::io::Error),

    #[error("Unknown string encoding flag {flag} at offset {offset}.")]
    BadStringEncoding { flag: u8, offset: usize },

    #[error("Decrypted payload does not start with a known chunk tag: {found:02x?}")]
    UnknownPayloadStart { found: [u8; 4] },

    #[error("Library file does not exist: {0}")]
    NotFound(PathBuf)
}
