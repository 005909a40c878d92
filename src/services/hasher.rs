use std::{fs::File, io::{BufReader, Read}, path::Path};

use sha2::{Digest, Sha256};

/// SHA-256 of the whole file as lowercase hex, read in a streaming fashion.
/// This is the sole content-identity primitive of the catalog.
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<String, std::io::Error> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64, std::io::Error> {
    Ok(std::fs::metadata(path.as_ref())?.len())
}
