use std::fmt::{Debug, Formatter};
use std::io::{Cursor, Error, ErrorKind, Seek, SeekFrom};
use std::mem::size_of;
use std::ops::Range;

use crate::utilities::{impl_from_byte_stream, FromByteStream};

#[derive(Debug, Clone)]
pub struct PEFile<'l> {
	pub dos_header: DOSHeader,
	pub pe_header: PEHeader,
	pub sections: Vec<Section<'l>>,
}

impl<'l> PEFile<'l> {
	/// Resolves a relative virtual address to the section that contains it,
	/// the section's raw data, and the byte offset into that data.
	pub fn resolve_rva(&self, rva: u32) -> Option<(&Section<'l>, &'l [u8], usize)> {
		let section = self.sections.iter().find(|s| s.virtual_data_range().contains(&rva))?;
		let offset = (rva - section.header.virtual_address) as usize;
		Some((section, section.data, offset))
	}
}

impl<'l> FromByteStream for PEFile<'l> {
	type Deps = ();
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	fn read(stream: &mut Cursor<&'l [u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let dos_header = DOSHeader::read(stream, &())?;
		stream.seek(SeekFrom::Start(dos_header.new_header_start as u64))?;

		let pe_header = PEHeader::read(stream, &())?;

		let mut sections = Vec::with_capacity(pe_header.image_file_header.number_of_sections as usize);
		for _ in 0..pe_header.image_file_header.number_of_sections {
			let header = SectionHeader::read(stream, &())?;
			let data = stream.get_ref();
			let start = header.pointer_to_raw_data as usize;
			let end = start + header.size_of_raw_data as usize;
			let section_data = data.get(start..end).ok_or(Error::from(ErrorKind::UnexpectedEof))?;
			sections.push(Section { header, data: section_data });
		}

		Ok(Self { dos_header, pe_header, sections })
	}
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DOSHeader {
	pub magic: u16, // Must be 0x5A4D
	pub last_page_bytes: u16,
	pub file_pages: u16,
	pub relocations: u16,
	pub header_size: u16,
	pub min_alloc: u16,
	pub max_alloc: u16,
	pub ss: u16,
	pub sp: u16,
	pub checksum: u16,
	pub ip: u16,
	pub cs: u16,
	pub relocation_table_address: u16,
	pub overlay_number: u16,
	pub reserved: [u16; 4],
	pub oem_id: u16,
	pub oem_info: u16,
	pub reserved_2: [u16; 10],
	pub new_header_start: u32,
}

impl_from_byte_stream!(DOSHeader, 0x5A4D);

#[derive(Debug, Clone)]
pub struct PEHeader {
	pub magic: u32, // Must be 0x4550
	pub image_file_header: ImageFileHeader,
	pub image_optional_header: ImageOptionalHeader,
}

impl FromByteStream for PEHeader {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let magic = u32::read(stream, &())?;
		if magic != 0x4550 {
			return Err(ErrorKind::InvalidData.into());
		}
		let image_file_header = ImageFileHeader::read(stream, &())?;
		let end_of_optional = stream.position() + image_file_header.size_of_optional_header as u64;
		let image_optional_header = ImageOptionalHeader::read(stream, &())?;
		// Some toolchains pad the optional header beyond the last data directory.
		stream.seek(SeekFrom::Start(end_of_optional))?;
		Ok(Self { magic, image_file_header, image_optional_header })
	}
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageFileHeader {
	pub machine: u16,
	pub number_of_sections: u16,
	pub time_date_stamp: u32,
	pub pointer_to_symbol_table: u32,
	pub number_of_symbols: u32,
	pub size_of_optional_header: u16,
	pub characteristics: u16,
}

impl_from_byte_stream!(ImageFileHeader);

#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageOptionalHeader32 {
	pub magic: u16, // Must be 0x010B
	pub major_linker_version: u8,
	pub minor_linker_version: u8,
	pub size_of_code: u32,
	pub size_of_initialized_data: u32,
	pub size_of_uninitialized_data: u32,
	pub address_of_entry_point: u32,
	pub base_of_code: u32,
	pub base_of_data: u32,
	pub image_base: u32,
	pub section_alignment: u32,
	pub file_alignment: u32,
	pub major_operating_system_version: u16,
	pub minor_operating_system_version: u16,
	pub major_image_version: u16,
	pub minor_image_version: u16,
	pub major_subsystem_version: u16,
	pub minor_subsystem_version: u16,
	pub win32_version_value: u32,
	pub size_of_image: u32,
	pub size_of_headers: u32,
	pub check_sum: u32,
	pub subsystem: u16,
	pub dll_characteristics: u16,
	pub size_of_stack_reserve: u32,
	pub size_of_stack_commit: u32,
	pub size_of_heap_reserve: u32,
	pub size_of_heap_commit: u32,
	pub loader_flags: u32,
	pub number_of_rva_and_sizes: u32,
	pub data_directories: [DataDirectory; 16],
}

impl_from_byte_stream!(ImageOptionalHeader32, 0x010B);

#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageOptionalHeader64 {
	pub magic: u16, // Must be 0x020B
	pub major_linker_version: u8,
	pub minor_linker_version: u8,
	pub size_of_code: u32,
	pub size_of_initialized_data: u32,
	pub size_of_uninitialized_data: u32,
	pub address_of_entry_point: u32,
	pub base_of_code: u32,
	pub image_base: u64,
	pub section_alignment: u32,
	pub file_alignment: u32,
	pub major_operating_system_version: u16,
	pub minor_operating_system_version: u16,
	pub major_image_version: u16,
	pub minor_image_version: u16,
	pub major_subsystem_version: u16,
	pub minor_subsystem_version: u16,
	pub win32_version_value: u32,
	pub size_of_image: u32,
	pub size_of_headers: u32,
	pub check_sum: u32,
	pub subsystem: u16,
	pub dll_characteristics: u16,
	pub size_of_stack_reserve: u64,
	pub size_of_stack_commit: u64,
	pub size_of_heap_reserve: u64,
	pub size_of_heap_commit: u64,
	pub loader_flags: u32,
	pub number_of_rva_and_sizes: u32,
	pub data_directories: [DataDirectory; 16],
}

impl_from_byte_stream!(ImageOptionalHeader64, 0x020B);

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ImageOptionalHeader {
	None,
	PE32(ImageOptionalHeader32),
	PE64(ImageOptionalHeader64),
}

impl FromByteStream for ImageOptionalHeader {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let remaining = stream.get_ref().len() as u64 - stream.position();
		if remaining < 2 {
			return Ok(Self::None);
		}
		let magic = u16::read(stream, &())?;
		stream.seek(SeekFrom::Current(-2))?;
		match magic {
			0x010B => Ok(Self::PE32(ImageOptionalHeader32::read(stream, &())?)),
			0x020B => Ok(Self::PE64(ImageOptionalHeader64::read(stream, &())?)),
			_ => Err(ErrorKind::InvalidData.into()),
		}
	}
}

impl ImageOptionalHeader {
	pub fn data_directory(&self, index: usize) -> Option<&DataDirectory> {
		match self {
			Self::None => None,
			Self::PE32(hdr) => hdr.data_directories.get(index),
			Self::PE64(hdr) => hdr.data_directories.get(index),
		}
	}
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DataDirectory {
	pub virtual_address: u32,
	pub size: u32,
}

impl_from_byte_stream!(DataDirectory);

#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SectionName([u8; 8]);

impl AsRef<str> for SectionName {
	fn as_ref(&self) -> &str {
		match std::str::from_utf8(&self.0) {
			Err(_) => "INVALID UTF8",
			Ok(name) => name.trim_end_matches('\0'),
		}
	}
}

impl Debug for SectionName {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, r#""{}""#, self.as_ref())
	}
}

impl FromByteStream for SectionName {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		Ok(Self(<[u8; 8]>::read(stream, &())?))
	}
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SectionHeader {
	pub name: SectionName,
	pub physical_address_or_virtual_size: u32,
	pub virtual_address: u32,
	pub size_of_raw_data: u32,
	pub pointer_to_raw_data: u32,
	pub pointer_to_relocations: u32,
	pub pointer_to_line_numbers: u32,
	pub number_of_relocations: u16,
	pub number_of_line_numbers: u16,
	pub characteristics: u32,
}

impl FromByteStream for SectionHeader {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		unsafe { crate::utilities::read_pod_from_stream(stream) }
	}
}

#[derive(Clone, Eq, PartialEq)]
pub struct Section<'l> {
	pub header: SectionHeader,
	pub data: &'l [u8],
}

impl<'l> Section<'l> {
	pub fn raw_data_range(&self) -> Range<u32> {
		self.header.pointer_to_raw_data..self.header.pointer_to_raw_data + self.header.size_of_raw_data
	}

	pub fn virtual_data_range(&self) -> Range<u32> {
		self.header.virtual_address..self.header.virtual_address + self.header.size_of_raw_data
	}
}

impl Debug for Section<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("Section");
		dbg.field("header", &self.header);
		dbg.field("data", &format_args!("[u8; {:#X}]", self.data.len()));
		dbg.finish()
	}
}

const _: () = assert!(size_of::<DOSHeader>() == 62);
