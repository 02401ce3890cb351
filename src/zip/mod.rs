//! ZIP archive parsing, streaming and writing.
//!
//! This module provides everything needed to read entries out of a ZIP
//! archive and to produce new archives, supporting both the standard
//! format and the ZIP64 extensions for large archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`reader`]: Streaming, CRC-checked access to one entry's content
//! - [`writer`]: Front-to-back archive writer with data descriptors
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Readers here consult the EOCD first (from the end of the file),
//! then the Central Directory; the local headers are only touched to
//! locate an entry's data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB and more than 65534 entries
//! - STORED (no compression) and DEFLATE compression methods
//! - Extended timestamp extra field for second-precision mtimes
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod parser;
mod reader;
mod structures;
mod writer;

pub use parser::ZipParser;
pub use reader::EntryReader;
pub use structures::*;
pub use writer::ZipWriter;

#[cfg(test)]
pub(crate) mod testing {
    use crate::io::ReadAt;
    use async_trait::async_trait;
    use std::io;

    /// In-memory archive source for codec tests.
    pub struct MemoryReader(pub Vec<u8>);

    #[async_trait]
    impl ReadAt for MemoryReader {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let start = (offset as usize).min(self.0.len());
            let n = buf.len().min(self.0.len() - start);
            buf[..n].copy_from_slice(&self.0[start..start + n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }
}
