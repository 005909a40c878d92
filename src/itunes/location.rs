use std::path::{Path, PathBuf};

use urlencoding::{decode, encode};

pub const LOCALHOST_PREFIX: &str = "file://localhost";
pub const FILE_PREFIX: &str = "file://";

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Empty location string.")]
    Empty,

    #[error("Location is not valid UTF-8 after percent-decoding: {0}")]
    BadEncoding(String)
}

/// Turns an iTunes location URL into a filesystem path.
///
/// `file://localhost/Users/x/Book.m4b` -> `/Users/x/Book.m4b`; on Windows
/// the single leading `/` in front of the drive letter is stripped.
pub fn decode_location(url: &str) -> Result<PathBuf, LocationError> {
    decode_location_for(url, cfg!(windows))
}

/// Turns a filesystem path into an iTunes location URL. `/` survives as a
/// literal separator; everything else is percent-encoded per component.
pub fn encode_location<P: AsRef<Path>>(path: P) -> String {
    encode_location_for(path, cfg!(windows))
}

pub(crate) fn decode_location_for(url: &str, windows_paths: bool) -> Result<PathBuf, LocationError> {
    if url.is_empty() {
        return Err(LocationError::Empty);
    }

    let stripped = url
        .strip_prefix(LOCALHOST_PREFIX)
        .or_else(|| url.strip_prefix(FILE_PREFIX))
        .unwrap_or(url);

    let decoded = decode(stripped)
        .map_err(|_| LocationError::BadEncoding(stripped.to_string()))?
        .into_owned();

    let path = if windows_paths {
        decoded.strip_prefix('/').unwrap_or(&decoded).to_string()
    } else {
        decoded
    };

    Ok(PathBuf::from(path))
}

pub(crate) fn encode_location_for<P: AsRef<Path>>(path: P, windows_paths: bool) -> String {
    let raw = path.as_ref().to_string_lossy().replace('\\', "/");

    let rooted = if windows_paths && !raw.starts_with('/') {
        format!("/{}", raw)
    } else {
        raw
    };

    let encoded = rooted
        .split('/')
        .map(|segment| encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    format!("{}{}", LOCALHOST_PREFIX, encoded)
}

/// True when the string already looks like an iTunes file URL and needs no
/// further encoding.
pub fn is_file_url(value: &str) -> bool {
    value.starts_with(FILE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_localhost_url() {
        let path = decode_location_for("file://localhost/Users/x/Music/Book.m4b", false).unwrap();
        assert_eq!(path, PathBuf::from("/Users/x/Music/Book.m4b"));
    }

    #[test]
    fn test_decode_plain_file_url() {
        let path = decode_location_for("file:///Users/x/Book.m4b", false).unwrap();
        assert_eq!(path, PathBuf::from("/Users/x/Book.m4b"));
    }

    #[test]
    fn test_decode_percent_escapes() {
        let path = decode_location_for("file://localhost/Users/x/My%20Books/B%26N.m4b", false).unwrap();
        assert_eq!(path, PathBuf::from("/Users/x/My Books/B&N.m4b"));
    }

    #[test]
    fn test_decode_windows_strips_leading_slash() {
        let path = decode_location_for("file://localhost/C:/Audiobooks/Book.m4b", true).unwrap();
        assert_eq!(path, PathBuf::from("C:/Audiobooks/Book.m4b"));
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(matches!(decode_location_for("", false), Err(LocationError::Empty)));
    }

    #[test]
    fn test_encode_posix_path() {
        let url = encode_location_for("/Users/x/My Books/Book One.m4b", false);
        assert_eq!(url, "file://localhost/Users/x/My%20Books/Book%20One.m4b");
    }

    #[test]
    fn test_encode_windows_path_gets_leading_slash() {
        let url = encode_location_for("C:/Audiobooks/Book.m4b", true);
        assert_eq!(url, "file://localhost/C%3A/Audiobooks/Book.m4b");
    }

    #[test]
    fn test_round_trip_posix() {
        let originals = [
            "/Users/x/Music/Book.m4b",
            "/srv/audio books/Dan Simmons/Hyperion (1989).m4b",
            "/books/Ü北京 & rain.mp3"
        ];

        for original in originals {
            let encoded = encode_location_for(original, false);
            let decoded = decode_location_for(&encoded, false).unwrap();
            assert_eq!(decoded, PathBuf::from(original));
        }
    }

    #[test]
    fn test_round_trip_windows() {
        let originals = [
            "C:/Users/x/Music/Book.m4b",
            "D:/Audio Books/Series #2/Part 1.m4b"
        ];

        for original in originals {
            let encoded = encode_location_for(original, true);
            let decoded = decode_location_for(&encoded, true).unwrap();
            assert_eq!(decoded, PathBuf::from(original));
        }
    }

    #[test]
    fn test_is_file_url() {
        assert!(is_file_url("file://localhost/x"));
        assert!(!is_file_url("/plain/path"));
    }
}
