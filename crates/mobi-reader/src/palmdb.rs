//! Palm Database container: 78-byte prelude plus the section offset table.

use mobi_core::error::{MobiError, Result};

/// Size of the fixed PalmDB header preceding the section table.
pub const HEADER_LEN: usize = 78;
const ENTRY_LEN: usize = 8;

/// One row of the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    pub offset: usize,
    pub flags: u8,
    pub unique_id: u32,
}

/// A parsed PalmDB file. Owns the raw buffer; sections borrow from it.
#[derive(Debug, Clone)]
pub struct PalmDb {
    data: Vec<u8>,
    name: String,
    sections: Vec<SectionEntry>,
}

impl PalmDb {
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(MobiError::MalformedContainer(format!(
                "file is {} bytes, shorter than the {}-byte PalmDB header",
                data.len(),
                HEADER_LEN
            )));
        }

        let name_bytes: Vec<u8> = data[..32].iter().copied().filter(|&b| b != 0).collect();
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        let count = be_u16(&data, 76).unwrap_or(0) as usize;
        if count == 0 {
            return Err(MobiError::MalformedContainer(
                "section count is zero".to_string(),
            ));
        }

        let table_end = HEADER_LEN + count * ENTRY_LEN;
        if table_end > data.len() {
            return Err(MobiError::MalformedContainer(format!(
                "section table for {} sections overruns the file",
                count
            )));
        }

        let mut sections = Vec::with_capacity(count);
        let mut previous = 0usize;
        for i in 0..count {
            let pos = HEADER_LEN + i * ENTRY_LEN;
            let offset = be_u32(&data, pos).unwrap_or(0) as usize;
            let flags = data[pos + 4];
            let unique_id = u32::from_be_bytes([0, data[pos + 5], data[pos + 6], data[pos + 7]]);

            if offset > data.len() {
                return Err(MobiError::MalformedContainer(format!(
                    "section {} offset {} exceeds file size {}",
                    i,
                    offset,
                    data.len()
                )));
            }
            if offset < previous {
                return Err(MobiError::MalformedContainer(format!(
                    "section {} offset {} precedes section {} offset {}",
                    i,
                    offset,
                    i - 1,
                    previous
                )));
            }
            previous = offset;
            sections.push(SectionEntry {
                offset,
                flags,
                unique_id,
            });
        }

        Ok(Self {
            data,
            name,
            sections,
        })
    }

    /// Database name with NUL padding removed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The eight-byte type/creator identifier at 0x3C, upper-cased.
    pub fn identifier(&self) -> [u8; 8] {
        let mut ident = [0u8; 8];
        ident.copy_from_slice(&self.data[0x3C..0x44]);
        ident.make_ascii_uppercase();
        ident
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn entries(&self) -> &[SectionEntry] {
        &self.sections
    }

    /// Bytes of section `i`; it ends where the next section starts.
    pub fn section(&self, i: usize) -> Option<&[u8]> {
        let start = self.sections.get(i)?.offset;
        let end = self
            .sections
            .get(i + 1)
            .map(|s| s.offset)
            .unwrap_or(self.data.len());
        Some(&self.data[start..end])
    }

    /// Total size of the underlying file.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Read a big-endian u16 at `offset`, if in bounds.
pub(crate) fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32 at `offset`, if in bounds.
pub(crate) fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a PalmDB file from raw sections.
    pub(crate) fn build_pdb(name: &str, ident: &[u8; 8], sections: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        let name_bytes = name.as_bytes();
        out[..name_bytes.len().min(31)].copy_from_slice(&name_bytes[..name_bytes.len().min(31)]);
        out[0x3C..0x44].copy_from_slice(ident);
        out[76..78].copy_from_slice(&(sections.len() as u16).to_be_bytes());

        let mut offset = HEADER_LEN + sections.len() * ENTRY_LEN + 2;
        for (i, s) in sections.iter().enumerate() {
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.push(0);
            out.extend_from_slice(&[0, 0, (i * 2) as u8]);
            offset += s.len();
        }
        out.extend_from_slice(&[0, 0]);
        for s in sections {
            out.extend_from_slice(s);
        }
        out
    }

    #[test]
    fn test_parse_sections() {
        let data = build_pdb(
            "My_Book",
            b"BOOKMOBI",
            &[b"header".to_vec(), b"text one".to_vec(), b"xy".to_vec()],
        );
        let pdb = PalmDb::parse(data).unwrap();
        assert_eq!(pdb.name(), "My_Book");
        assert_eq!(&pdb.identifier(), b"BOOKMOBI");
        assert_eq!(pdb.section_count(), 3);
        assert_eq!(pdb.section(0).unwrap(), b"header");
        assert_eq!(pdb.section(1).unwrap(), b"text one");
        // Last section runs to end of file
        assert_eq!(pdb.section(2).unwrap(), b"xy");
        assert!(pdb.section(3).is_none());
        assert_eq!(pdb.entries()[2].unique_id, 4);
    }

    #[test]
    fn test_identifier_is_case_folded() {
        let data = build_pdb("x", b"TEXtREAd", &[b"h".to_vec()]);
        let pdb = PalmDb::parse(data).unwrap();
        assert_eq!(&pdb.identifier(), b"TEXTREAD");
    }

    #[test]
    fn test_too_short() {
        let err = PalmDb::parse(vec![0u8; 40]).unwrap_err();
        assert_eq!(err.kind(), "MalformedContainer");
    }

    #[test]
    fn test_zero_sections() {
        let mut data = vec![0u8; HEADER_LEN];
        data[0x3C..0x44].copy_from_slice(b"BOOKMOBI");
        let err = PalmDb::parse(data).unwrap_err();
        assert!(matches!(err, MobiError::MalformedContainer(_)));
    }

    #[test]
    fn test_offset_past_end() {
        let mut data = build_pdb("x", b"BOOKMOBI", &[b"aaaa".to_vec(), b"bbbb".to_vec()]);
        // Point section 1 beyond the file
        let pos = HEADER_LEN + ENTRY_LEN;
        data[pos..pos + 4].copy_from_slice(&10_000u32.to_be_bytes());
        assert!(matches!(
            PalmDb::parse(data),
            Err(MobiError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_non_monotonic_offsets() {
        let mut data = build_pdb("x", b"BOOKMOBI", &[b"aaaa".to_vec(), b"bbbb".to_vec()]);
        let pos = HEADER_LEN + ENTRY_LEN;
        data[pos..pos + 4].copy_from_slice(&10u32.to_be_bytes());
        assert!(matches!(
            PalmDb::parse(data),
            Err(MobiError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_be_readers_bounds() {
        let data = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(be_u16(&data, 2), Some(0x5678));
        assert_eq!(be_u32(&data, 0), Some(0x12345678));
        assert_eq!(be_u32(&data, 1), None);
    }
}
