//! Mapped module images and raw memory access.
//!
//! Everything in this crate works against virtual addresses of a loaded (or loadable) PE
//! module. The [`MemoryReader`] trait is the only way raw bytes are fetched - jump-table
//! slots, guard hashes and padding are read through it without going through a full
//! instruction decode. [`ModuleImage`] is the stock implementation: a memory-mapped PE
//! file whose section table is used to translate virtual addresses to file offsets.
//!
//! [`ModuleBounds`] is the cheap, copyable summary of a module's address layout (base,
//! bitness, header span, executable ranges) that the discovery walk consults on every
//! branch target.
//!
//! # Example
//!
//! ```rust,no_run
//! use codescope::{MemoryReader, ModuleImage};
//! use std::path::Path;
//!
//! let image = ModuleImage::from_file(Path::new("module.dll"))?;
//! let entry = image.bounds().base() + 0x1000;
//! let prolog = image.read_bytes(entry, 16)?;
//! println!("{:02x?}", prolog);
//! # Ok::<(), codescope::Error>(())
//! ```

use std::{fs, path::Path};

use goblin::pe::{section_table::IMAGE_SCN_MEM_EXECUTE, PE};
use memmap2::Mmap;

use crate::Result;

/// Read-only access to the raw bytes of an analyzed module.
///
/// Implementations must be cheap to call repeatedly with small lengths; the jump-table
/// detector reads one slot at a time through this trait.
pub trait MemoryReader {
    /// Read `len` bytes starting at the virtual address `address`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if any byte of the requested range is not
    /// backed by the module.
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>>;
}

/// The address layout of a module, as needed by the discovery walk.
///
/// All ranges are inclusive of their last byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBounds {
    base: u64,
    end: u64,
    header_end: u64,
    is_32bit: bool,
    executable: Vec<(u64, u64)>,
}

impl ModuleBounds {
    /// Create bounds from explicit values.
    ///
    /// ## Arguments
    /// * 'base'        - The virtual address the module is loaded at
    /// * 'size'        - The size of the mapped image in bytes
    /// * 'header_size' - The number of bytes occupied by the image headers
    /// * 'is_32bit'    - Whether pointers in this module are 4 bytes wide
    /// * 'executable'  - Inclusive (start, end) virtual address ranges holding code
    pub fn new(
        base: u64,
        size: u64,
        header_size: u64,
        is_32bit: bool,
        executable: Vec<(u64, u64)>,
    ) -> ModuleBounds {
        ModuleBounds {
            base,
            end: base + size.max(1) - 1,
            header_end: base + header_size.max(1) - 1,
            is_32bit,
            executable,
        }
    }

    /// The virtual address the module is loaded at.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The last virtual address occupied by the module.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// The last virtual address occupied by the image headers.
    pub fn header_end(&self) -> u64 {
        self.header_end
    }

    /// Whether pointers in this module are 4 bytes wide.
    pub fn is_32bit(&self) -> bool {
        self.is_32bit
    }

    /// The pointer width of the module in bytes (4 or 8).
    pub fn pointer_size(&self) -> u64 {
        if self.is_32bit {
            4
        } else {
            8
        }
    }

    /// Whether `address` falls anywhere inside the mapped image.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address <= self.end
    }

    /// Whether `address` falls inside one of the module's executable ranges.
    pub fn is_executable(&self, address: u64) -> bool {
        self.executable
            .iter()
            .any(|&(start, end)| address >= start && address <= end)
    }
}

/// A PE module mapped for analysis.
///
/// Wraps either a memory-mapped file or an owned byte buffer, plus the parsed section
/// table needed to translate virtual addresses into offsets in the raw file data.
pub struct ModuleImage {
    data: ImageData,
    bounds: ModuleBounds,
    sections: Vec<SectionRange>,
}

enum ImageData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl ImageData {
    fn bytes(&self) -> &[u8] {
        match self {
            ImageData::Mapped(mmap) => mmap,
            ImageData::Owned(vec) => vec,
        }
    }
}

struct SectionRange {
    rva: u64,
    virtual_size: u64,
    offset: u64,
    raw_size: u64,
}

impl ModuleImage {
    /// Map a PE file from disk and parse its layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or if its PE
    /// structure cannot be parsed.
    pub fn from_file(path: &Path) -> Result<ModuleImage> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;

        ModuleImage::from_data(ImageData::Mapped(mmap))
    }

    /// Take ownership of an in-memory PE file and parse its layout.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] for an empty buffer, or a parse error if the
    /// buffer does not hold a valid PE image.
    pub fn from_mem(data: Vec<u8>) -> Result<ModuleImage> {
        ModuleImage::from_data(ImageData::Owned(data))
    }

    fn from_data(data: ImageData) -> Result<ModuleImage> {
        if data.bytes().is_empty() {
            return Err(crate::Error::Empty);
        }

        let pe = PE::parse(data.bytes())?;

        let Some(optional_header) = pe.header.optional_header else {
            return Err(crate::Error::NotSupported);
        };

        let base = pe.image_base as u64;
        let size = u64::from(optional_header.windows_fields.size_of_image);
        let header_size = u64::from(optional_header.windows_fields.size_of_headers);
        let is_64 = pe.is_64;

        let mut executable = Vec::new();
        let mut sections = Vec::new();

        for section in &pe.sections {
            let rva = u64::from(section.virtual_address);
            let virtual_size = u64::from(section.virtual_size);

            if virtual_size == 0 {
                continue;
            }

            if section.characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
                executable.push((base + rva, base + rva + virtual_size - 1));
            }

            sections.push(SectionRange {
                rva,
                virtual_size,
                offset: u64::from(section.pointer_to_raw_data),
                raw_size: u64::from(section.size_of_raw_data),
            });
        }

        // Everything needed from the parse is owned now, so `data` can move
        let bounds = ModuleBounds::new(base, size, header_size, !is_64, executable);

        Ok(ModuleImage {
            data,
            bounds,
            sections,
        })
    }

    /// The address layout of this module.
    pub fn bounds(&self) -> &ModuleBounds {
        &self.bounds
    }

    /// The raw file data backing this image.
    pub fn data(&self) -> &[u8] {
        self.data.bytes()
    }

    /// Converts a relative virtual address to an offset into the raw file data.
    ///
    /// RVAs below the end of the headers map 1:1; everything else is resolved through
    /// the section table. Reads must stay within a section's raw data, virtual-only
    /// bytes (zero padding past the raw size) are not readable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if no section backs the RVA.
    pub fn rva_to_offset(&self, rva: u64) -> Result<u64> {
        if rva <= self.bounds.header_end - self.bounds.base {
            return Ok(rva);
        }

        for section in &self.sections {
            if rva >= section.rva && rva < section.rva + section.virtual_size {
                let within = rva - section.rva;
                if within < section.raw_size {
                    return Ok(section.offset + within);
                }

                return Err(crate::Error::OutOfBounds);
            }
        }

        Err(crate::Error::OutOfBounds)
    }
}

impl MemoryReader for ModuleImage {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 || !self.bounds.contains(address) {
            return Err(crate::Error::OutOfBounds);
        }

        let offset = self.rva_to_offset(address - self.bounds.base)?;
        let offset = usize::try_from(offset)
            .map_err(|_| malformed_error!("Offset too large to fit in usize: {}", offset))?;

        let Some(end) = offset.checked_add(len) else {
            return Err(crate::Error::OutOfBounds);
        };

        if end > self.data.bytes().len() {
            return Err(crate::Error::OutOfBounds);
        }

        Ok(self.data.bytes()[offset..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_contains() {
        let bounds = ModuleBounds::new(0x1000, 0x4000, 0x400, false, vec![(0x2000, 0x2fff)]);

        assert!(bounds.contains(0x1000));
        assert!(bounds.contains(0x4fff));
        assert!(!bounds.contains(0xfff));
        assert!(!bounds.contains(0x5000));
    }

    #[test]
    fn bounds_executable() {
        let bounds = ModuleBounds::new(0x1000, 0x4000, 0x400, false, vec![(0x2000, 0x2fff)]);

        assert!(bounds.is_executable(0x2000));
        assert!(bounds.is_executable(0x2fff));
        assert!(!bounds.is_executable(0x1fff));
        assert!(!bounds.is_executable(0x3000));
    }

    #[test]
    fn bounds_header_span() {
        let bounds = ModuleBounds::new(0x1000, 0x4000, 0x400, false, vec![]);

        assert_eq!(bounds.header_end(), 0x13ff);
    }

    #[test]
    fn bounds_pointer_size() {
        let wide = ModuleBounds::new(0, 0x1000, 0x400, false, vec![]);
        let narrow = ModuleBounds::new(0, 0x1000, 0x400, true, vec![]);

        assert_eq!(wide.pointer_size(), 8);
        assert_eq!(narrow.pointer_size(), 4);
    }

    #[test]
    fn from_mem_empty() {
        assert!(matches!(
            ModuleImage::from_mem(Vec::new()),
            Err(crate::Error::Empty)
        ));
    }

    #[test]
    fn from_mem_garbage() {
        assert!(ModuleImage::from_mem(vec![0xCC; 64]).is_err());
    }
}
