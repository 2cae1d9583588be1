//! Minimal TIFF/DNG IFD reader.
//!
//! Enough of a parser to inspect input DNG sequences: locate IFD0, resolve
//! tag values (inline or out-of-line), and hand the OpcodeList2 payload to
//! the opcode parser. Both byte orders are accepted since DNGs in the wild
//! come in either.

use std::collections::BTreeMap;

use super::writer::DngError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            ByteOrder::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        }
    }
}

/// One resolved IFD entry: field type, logical count, raw payload bytes.
#[derive(Debug, Clone)]
pub struct IfdEntry {
    pub field_type: u16,
    pub count: u32,
    payload: Vec<u8>,
}

/// IFD0 of a parsed TIFF/DNG.
#[derive(Debug, Clone)]
pub struct Ifd {
    order: ByteOrder,
    entries: BTreeMap<u16, IfdEntry>,
}

fn type_size(field_type: u16) -> usize {
    match field_type {
        1 | 2 | 6 | 7 => 1, // BYTE, ASCII, SBYTE, UNDEFINED
        3 | 8 => 2,         // SHORT, SSHORT
        4 | 9 | 11 => 4,    // LONG, SLONG, FLOAT
        5 | 10 | 12 => 8,   // RATIONAL, SRATIONAL, DOUBLE
        _ => 1,
    }
}

impl Ifd {
    /// Parse IFD0 out of a complete TIFF/DNG byte buffer.
    pub fn parse(data: &[u8]) -> Result<Ifd, DngError> {
        if data.len() < 8 {
            return Err(DngError::Malformed("file shorter than TIFF header".into()));
        }

        let order = match &data[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return Err(DngError::Malformed("bad byte-order mark".into())),
        };
        if order.u16(&data[2..4]) != 42 {
            return Err(DngError::Malformed("bad TIFF magic".into()));
        }

        let ifd_offset = order.u32(&data[4..8]) as usize;
        if ifd_offset + 2 > data.len() {
            return Err(DngError::Malformed("IFD offset out of bounds".into()));
        }

        let entry_count = order.u16(&data[ifd_offset..ifd_offset + 2]) as usize;
        let entries_end = ifd_offset + 2 + entry_count * 12;
        if entries_end + 4 > data.len() {
            return Err(DngError::Malformed("IFD truncated".into()));
        }

        let mut entries = BTreeMap::new();
        for i in 0..entry_count {
            let at = ifd_offset + 2 + i * 12;
            let tag = order.u16(&data[at..at + 2]);
            let field_type = order.u16(&data[at + 2..at + 4]);
            let count = order.u32(&data[at + 4..at + 8]);

            let byte_len = count as usize * type_size(field_type);
            let payload = if byte_len <= 4 {
                data[at + 8..at + 8 + byte_len].to_vec()
            } else {
                let offset = order.u32(&data[at + 8..at + 12]) as usize;
                if offset + byte_len > data.len() {
                    return Err(DngError::Malformed(format!(
                        "value for tag {} out of bounds",
                        tag
                    )));
                }
                data[offset..offset + byte_len].to_vec()
            };

            entries.insert(
                tag,
                IfdEntry {
                    field_type,
                    count,
                    payload,
                },
            );
        }

        Ok(Ifd { order, entries })
    }

    /// Tags present, in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Raw bytes of a BYTE/UNDEFINED entry.
    pub fn byte_values(&self, tag: u16) -> Option<Vec<u8>> {
        self.entries.get(&tag).map(|e| e.payload.clone())
    }

    /// SHORT values of an entry.
    pub fn u16_values(&self, tag: u16) -> Option<Vec<u16>> {
        let entry = self.entries.get(&tag)?;
        Some(
            entry
                .payload
                .chunks_exact(2)
                .map(|c| self.order.u16(c))
                .collect(),
        )
    }

    /// SHORT or LONG values widened to u32.
    pub fn u32_values(&self, tag: u16) -> Option<Vec<u32>> {
        let entry = self.entries.get(&tag)?;
        match entry.field_type {
            3 => Some(
                entry
                    .payload
                    .chunks_exact(2)
                    .map(|c| self.order.u16(c) as u32)
                    .collect(),
            ),
            4 => Some(
                entry
                    .payload
                    .chunks_exact(4)
                    .map(|c| self.order.u32(c))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// SRATIONAL values as (numerator, denominator) pairs.
    pub fn srational_values(&self, tag: u16) -> Option<Vec<(i32, i32)>> {
        let entry = self.entries.get(&tag)?;
        if entry.field_type != 10 {
            return None;
        }
        Some(
            entry
                .payload
                .chunks_exact(8)
                .map(|c| {
                    (
                        self.order.u32(&c[0..4]) as i32,
                        self.order.u32(&c[4..8]) as i32,
                    )
                })
                .collect(),
        )
    }

    /// ASCII value with the trailing NUL removed.
    pub fn ascii_value(&self, tag: u16) -> Option<String> {
        let entry = self.entries.get(&tag)?;
        let end = entry
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(entry.payload.len());
        String::from_utf8(entry.payload[..end].to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage() {
        assert!(Ifd::parse(b"not a tiff").is_err());
        assert!(Ifd::parse(b"II").is_err());
    }

    #[test]
    fn test_parses_big_endian_header() {
        // MM, magic 42, IFD at 8 with zero entries and no next IFD.
        let mut data = Vec::new();
        data.extend_from_slice(b"MM");
        data.extend_from_slice(&42u16.to_be_bytes());
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());

        let ifd = Ifd::parse(&data).unwrap();
        assert_eq!(ifd.tags().count(), 0);
    }
}
