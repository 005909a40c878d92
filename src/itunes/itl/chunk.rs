use encoding_rs::WINDOWS_1252;

use super::ItlError;

pub const TAG_HDFM: &[u8; 4] = b"hdfm";
pub const TAG_HDSM: &[u8; 4] = b"hdsm";
pub const TAG_HTIM: &[u8; 4] = b"htim";
pub const TAG_HPIM: &[u8; 4] = b"hpim";
pub const TAG_HPTM: &[u8; 4] = b"hptm";
pub const TAG_HOHM: &[u8; 4] = b"hohm";
/// Little-endian start marker. Noted, not fully supported.
pub const TAG_MSDH: &[u8; 4] = b"msdh";

// hohm field types.
pub const HOHM_NAME: u32 = 0x02;
pub const HOHM_ALBUM: u32 = 0x03;
pub const HOHM_ARTIST: u32 = 0x04;
pub const HOHM_GENRE: u32 = 0x05;
pub const HOHM_KIND: u32 = 0x06;
pub const HOHM_LOCAL_URL: u32 = 0x0B;
pub const HOHM_FILE_LOCATION: u32 = 0x0D;
pub const HOHM_PLAYLIST_TITLE: u32 = 0x64;
pub const HOHM_SMART_CRITERIA: u32 = 0x65;
pub const HOHM_SMART_INFO: u32 = 0x66;

/// Seconds between 1904-01-01 (Mac HFS epoch) and 1970-01-01.
pub const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

pub fn read_bytes<'a>(data: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8], ItlError> {
    data.get(offset..offset + len)
        .ok_or(ItlError::UnexpectedEof { offset })
}

pub fn read_tag(data: &[u8], offset: usize) -> Result<[u8; 4], ItlError> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ItlError> {
    Ok(read_bytes(data, offset, 1)?[0])
}

pub fn read_u16_be(data: &[u8], offset: usize) -> Result<u16, ItlError> {
    let bytes = read_bytes(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_i16_be(data: &[u8], offset: usize) -> Result<i16, ItlError> {
    let bytes = read_bytes(data, offset, 2)?;
    Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32_be(data: &[u8], offset: usize) -> Result<u32, ItlError> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn write_u32_be(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn write_u16_be(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn write_i16_be(buffer: &mut [u8], offset: usize, value: i16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn mac_to_naive(mac_seconds: u32) -> Option<chrono::NaiveDateTime> {
    if mac_seconds == 0 {
        return None;
    }

    chrono::DateTime::from_timestamp(i64::from(mac_seconds) - MAC_EPOCH_OFFSET, 0)
        .map(|dt| dt.naive_utc())
}

pub fn naive_to_mac(naive: chrono::NaiveDateTime) -> u32 {
    let mac = naive.and_utc().timestamp() + MAC_EPOCH_OFFSET;
    u32::try_from(mac).unwrap_or(0)
}

// hohm string encoding flags.
pub const ENC_ASCII: u8 = 0;
pub const ENC_UTF16_BE: u8 = 1;
pub const ENC_UTF8: u8 = 2;
pub const ENC_WINDOWS_1252: u8 = 3;

/// Decodes an hohm string payload per its encoding flag byte.
pub fn decode_field(flag: u8, bytes: &[u8], offset: usize) -> Result<String, ItlError> {
    match flag {
        ENC_ASCII | ENC_UTF8 => {
            String::from_utf8(bytes.to_vec()).map_err(|_| ItlError::Parse {
                offset,
                message: "string field is not valid UTF-8".to_string()
            })
        },
        ENC_UTF16_BE => {
            if bytes.len() % 2 != 0 {
                return Err(ItlError::Parse {
                    offset,
                    message: "odd byte count in UTF-16 string field".to_string()
                });
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|_| ItlError::Parse {
                offset,
                message: "invalid UTF-16 string field".to_string()
            })
        },
        ENC_WINDOWS_1252 => {
            let (decoded, _, _) = WINDOWS_1252.decode(bytes);
            Ok(decoded.into_owned())
        },
        other => Err(ItlError::BadStringEncoding { flag: other, offset })
    }
}

/// Picks the write encoding: Windows-1252 when it can represent every
/// codepoint, UTF-16 big-endian otherwise.
pub fn encode_field(value: &str) -> (u8, Vec<u8>) {
    if value.chars().all(|c| (c as u32) <= 0xFF) {
        let (encoded, _, had_unmappable) = WINDOWS_1252.encode(value);
        if !had_unmappable {
            return (ENC_WINDOWS_1252, encoded.into_owned());
        }
    }

    let bytes = value
        .encode_utf16()
        .flat_map(|unit| unit.to_be_bytes())
        .collect();

    (ENC_UTF16_BE, bytes)
}

/// hohm layout: tag, u32 total length, 4 reserved bytes, u32 field type, a
/// 12-byte subheader whose last byte is the encoding flag, u32 string byte
/// length, 8 zero bytes, then the string data at +40.
pub const HOHM_DATA_OFFSET: usize = 40;
pub const HOHM_TYPE_OFFSET: usize = 12;
pub const HOHM_ENCODING_OFFSET: usize = 27;
pub const HOHM_STRLEN_OFFSET: usize = 28;

pub fn build_hohm(field_type: u32, value: &str) -> Vec<u8> {
    let (flag, data) = encode_field(value);
    build_hohm_raw(field_type, flag, &data)
}

pub fn build_hohm_raw(field_type: u32, flag: u8, data: &[u8]) -> Vec<u8> {
    let total = HOHM_DATA_OFFSET + data.len();
    let mut chunk = vec![0u8; total];

    chunk[0..4].copy_from_slice(TAG_HOHM);
    write_u32_be(&mut chunk, 4, total as u32);
    write_u32_be(&mut chunk, HOHM_TYPE_OFFSET, field_type);
    chunk[HOHM_ENCODING_OFFSET] = flag;
    write_u32_be(&mut chunk, HOHM_STRLEN_OFFSET, data.len() as u32);
    chunk[HOHM_DATA_OFFSET..].copy_from_slice(data);

    chunk
}

/// The hdfm file header. `unknown` and everything after the version string
/// are opaque and survive rewrites verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct HdfmHeader {
    pub header_len: u32,
    pub file_len: u32,
    pub unknown: u32,
    pub version: String,
    pub remainder: Vec<u8>
}

impl HdfmHeader {

    pub fn parse(data: &[u8]) -> Result<Self, ItlError> {
        let magic = read_tag(data, 0)?;
        if &magic != TAG_HDFM {
            return Err(ItlError::BadMagic { found: magic });
        }

        let header_len = read_u32_be(data, 4)?;
        let file_len = read_u32_be(data, 8)?;
        let unknown = read_u32_be(data, 12)?;
        let version_len = read_u8(data, 16)? as usize;

        let header_len_usize = header_len as usize;
        if header_len_usize < 17 + version_len || header_len_usize > data.len() {
            return Err(ItlError::Parse {
                offset: 4,
                message: format!("implausible header length {}", header_len)
            });
        }

        let version_bytes = read_bytes(data, 17, version_len)?;
        let version = String::from_utf8_lossy(version_bytes).into_owned();
        let remainder = data[17 + version_len..header_len_usize].to_vec();

        Ok(
            Self {
                header_len,
                file_len,
                unknown,
                version,
                remainder
            }
        )
    }

    /// Leading integer of the version string, 0 when unparsable.
    pub fn major_version(&self) -> u32 {
        let digits: String = self.version.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().unwrap_or(0)
    }

    pub fn to_bytes(&self, file_len: u32) -> Vec<u8> {
        let mut out = vec![0u8; 17];

        out[0..4].copy_from_slice(TAG_HDFM);
        write_u32_be(&mut out, 4, self.header_len);
        write_u32_be(&mut out, 8, file_len);
        write_u32_be(&mut out, 12, self.unknown);
        out[16] = self.version.len() as u8;
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(&self.remainder);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hdfm_round_trip() {
        let header = HdfmHeader {
            header_len: 17 + 4 + 5,
            file_len: 9999,
            unknown: 0xDEAD_BEEF,
            version: "12.9".to_string(),
            remainder: vec![1, 2, 3, 4, 5]
        };

        let bytes = header.to_bytes(9999);
        let reparsed = HdfmHeader::parse(&bytes).unwrap();

        assert_eq!(reparsed, header);
        assert_eq!(reparsed.major_version(), 12);
    }

    #[test]
    fn test_hdfm_bad_magic() {
        let result = HdfmHeader::parse(b"nope\x00\x00\x00\x11\x00\x00\x00\x11\x00\x00\x00\x00\x00");
        assert!(matches!(result, Err(ItlError::BadMagic { .. })));
    }

    #[test]
    fn test_hdfm_truncated() {
        assert!(matches!(HdfmHeader::parse(b"hdfm\x00"), Err(ItlError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_major_version_parsing() {
        let mut header = HdfmHeader {
            header_len: 17,
            file_len: 0,
            unknown: 0,
            version: "9.2.1".to_string(),
            remainder: Vec::new()
        };
        assert_eq!(header.major_version(), 9);

        header.version = "garbage".to_string();
        assert_eq!(header.major_version(), 0);
    }

    #[test]
    fn test_string_field_ascii_range_uses_windows_1252() {
        let (flag, bytes) = encode_field("Hyperion");
        assert_eq!(flag, ENC_WINDOWS_1252);
        assert_eq!(bytes, b"Hyperion");
    }

    #[test]
    fn test_string_field_latin1_uses_windows_1252() {
        let (flag, bytes) = encode_field("Böll");
        assert_eq!(flag, ENC_WINDOWS_1252);
        assert_eq!(decode_field(flag, &bytes, 0).unwrap(), "Böll");
    }

    #[test]
    fn test_string_field_wide_chars_use_utf16() {
        let (flag, bytes) = encode_field("北京");
        assert_eq!(flag, ENC_UTF16_BE);
        assert_eq!(decode_field(flag, &bytes, 0).unwrap(), "北京");
    }

    #[test]
    fn test_decode_utf8_flag() {
        assert_eq!(decode_field(ENC_UTF8, "grüße".as_bytes(), 0).unwrap(), "grüße");
    }

    #[test]
    fn test_decode_unknown_flag_fails() {
        assert!(matches!(
            decode_field(9, b"x", 0),
            Err(ItlError::BadStringEncoding { flag: 9, .. })
        ));
    }

    #[test]
    fn test_build_hohm_layout() {
        let chunk = build_hohm(HOHM_NAME, "Hyperion");

        assert_eq!(&chunk[0..4], TAG_HOHM);
        assert_eq!(read_u32_be(&chunk, 4).unwrap() as usize, chunk.len());
        assert_eq!(read_u32_be(&chunk, HOHM_TYPE_OFFSET).unwrap(), HOHM_NAME);
        assert_eq!(chunk[HOHM_ENCODING_OFFSET], ENC_WINDOWS_1252);
        assert_eq!(read_u32_be(&chunk, HOHM_STRLEN_OFFSET).unwrap(), 8);
        assert_eq!(&chunk[HOHM_DATA_OFFSET..], b"Hyperion");
    }

    #[test]
    fn test_mac_epoch_conversion() {
        // 2082844800 seconds past the Mac epoch is the Unix epoch.
        let unix_epoch = mac_to_naive(MAC_EPOCH_OFFSET as u32).unwrap();
        assert_eq!(unix_epoch.and_utc().timestamp(), 0);

        assert_eq!(mac_to_naive(0), None);

        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap().naive_utc();
        assert_eq!(mac_to_naive(naive_to_mac(now)), Some(now));
    }
}
