//! Binary encoding of compiled units, and the trailer format used to embed
//! one in a host executable.
//!
//! Unit layout: `BRKU` magic, one format version byte, MessagePack body.
//! Trailer layout: `<host bytes><unit bytes><u64 LE unit length><marker>`.

use std::fs;
use std::path::Path;

use crate::error::SerializeError;

use super::chunk::CompiledUnit;

const MAGIC: &[u8; 4] = b"BRKU";
pub const FORMAT_VERSION: u8 = 1;

/// Fixed marker at the very end of a self-contained executable.
pub const PAYLOAD_MARKER: &[u8; 16] = b"~brook~payload~\x01";
const LENGTH_BYTES: usize = 8;
const TRAILER_LEN: usize = LENGTH_BYTES + PAYLOAD_MARKER.len();

pub fn serialize(unit: &CompiledUnit) -> Result<Vec<u8>, SerializeError> {
    let body = rmp_serde::to_vec(unit)?;
    let mut bytes = Vec::with_capacity(MAGIC.len() + 1 + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

pub fn deserialize(bytes: &[u8]) -> Result<CompiledUnit, SerializeError> {
    if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(SerializeError::BadHeader);
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(SerializeError::UnsupportedVersion(version));
    }
    Ok(rmp_serde::from_slice(&bytes[MAGIC.len() + 1..])?)
}

/// Append `unit` to `host` so the result can locate it at runtime.
pub fn append_payload(host: &[u8], unit: &CompiledUnit) -> Result<Vec<u8>, SerializeError> {
    let payload = serialize(unit)?;
    let mut out = Vec::with_capacity(host.len() + payload.len() + TRAILER_LEN);
    out.extend_from_slice(host);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(PAYLOAD_MARKER);
    Ok(out)
}

/// Offset where an embedded unit starts, which is also the length of the
/// host executable in front of it.
///
/// `Ok(None)` when there is no marker; an error when the marker is present
/// but the recorded length does not fit.
pub fn payload_offset(bytes: &[u8]) -> Result<Option<usize>, SerializeError> {
    if bytes.len() < TRAILER_LEN || !bytes.ends_with(PAYLOAD_MARKER) {
        return Ok(None);
    }
    let length_at = bytes.len() - TRAILER_LEN;
    let mut length = [0u8; LENGTH_BYTES];
    length.copy_from_slice(&bytes[length_at..length_at + LENGTH_BYTES]);
    let length = u64::from_le_bytes(length);

    let available = length_at as u64;
    if length > available {
        return Err(SerializeError::Truncated {
            needed: length,
            available,
        });
    }
    Ok(Some(length_at - length as usize))
}

/// Find an embedded unit at the end of `bytes`.
pub fn extract_payload(bytes: &[u8]) -> Result<Option<CompiledUnit>, SerializeError> {
    match payload_offset(bytes)? {
        Some(start) => deserialize(&bytes[start..bytes.len() - TRAILER_LEN]).map(Some),
        None => Ok(None),
    }
}

/// Read the file at `path` (normally the running executable) and extract
/// its embedded unit, if any.
pub fn read_embedded(path: impl AsRef<Path>) -> Result<Option<CompiledUnit>, SerializeError> {
    let bytes = fs::read(path)?;
    extract_payload(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::vm::compiler::compile;
    use pretty_assertions::assert_eq;

    fn sample_unit() -> CompiledUnit {
        compile(&program(vec![
            let_("greeting", string("hi")),
            fn_decl(
                "scale",
                &["x"],
                vec![ret(mul(var("x"), float(1.5)))],
            ),
            struct_decl("Point", &["x", "y"]),
            try_catch(
                vec![throw(int(1))],
                Some("e"),
                vec![expr_stmt(call(var("scale"), vec![var("e")]))],
            ),
        ]))
        .unwrap()
    }

    #[test]
    fn test_roundtrip_is_byte_identical() {
        let unit = sample_unit();
        let bytes = serialize(&unit).unwrap();
        let decoded = deserialize(&bytes).unwrap();
        assert_eq!(decoded, unit);
        assert_eq!(serialize(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_bad_header_and_version() {
        assert!(matches!(deserialize(b"nope"), Err(SerializeError::BadHeader)));
        let mut bytes = serialize(&sample_unit()).unwrap();
        bytes[4] = 99;
        assert!(matches!(
            deserialize(&bytes),
            Err(SerializeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_payload_trailer() {
        let unit = sample_unit();
        let host = b"\x7fELF pretend host binary".to_vec();
        let exe = append_payload(&host, &unit).unwrap();

        assert!(exe.starts_with(&host));
        assert!(exe.ends_with(PAYLOAD_MARKER));
        assert_eq!(extract_payload(&exe).unwrap(), Some(unit));
        assert_eq!(extract_payload(&host).unwrap(), None);
        assert_eq!(payload_offset(&exe).unwrap(), Some(host.len()));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = 1000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(PAYLOAD_MARKER);
        assert!(matches!(
            extract_payload(&bytes),
            Err(SerializeError::Truncated { needed: 1000, .. })
        ));
    }
}
