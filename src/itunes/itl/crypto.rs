use std::io::{Read, Write};

use aes::Aes128;
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::ItlError;

/// Fixed AES-128 key every iTunes build uses for the itl body. Part of the
/// format contract, not configuration.
pub const ITL_AES_KEY: &[u8; 16] = b"BHUILuilfghuila3";

/// Library versions 10 and later only encrypt this many leading bytes.
pub const MAX_CRYPT_SIZE: usize = 102_400;

pub const ZLIB_MAGIC: u8 = 0x78;

/// How many leading body bytes are AES-encrypted for a given library
/// version: the whole body for old versions, capped at 100 KiB from version
/// 10 on, always aligned down to the 16-byte block size.
pub fn crypt_window(major_version: u32, body_len: usize) -> usize {
    let limit = if major_version >= 10 {
        body_len.min(MAX_CRYPT_SIZE)
    } else {
        body_len
    };

    limit & !0xF
}

pub fn decrypt_body(body: &mut [u8], major_version: u32) {
    let window = crypt_window(major_version, body.len());
    let cipher = Aes128::new(GenericArray::from_slice(ITL_AES_KEY));

    for block in body[..window].chunks_exact_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn encrypt_body(body: &mut [u8], major_version: u32) {
    let window = crypt_window(major_version, body.len());
    let cipher = Aes128::new(GenericArray::from_slice(ITL_AES_KEY));

    for block in body[..window].chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>, ItlError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(ItlError::Inflate)?;
    Ok(out)
}

pub fn deflate(data: &[u8]) -> Result<Vec<u8>, ItlError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
