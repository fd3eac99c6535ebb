use std::io;
use std::sync::Arc;

use bumpalo::Bump;
use derivative::Derivative;

use crate::raw::assembly::Assembly as RawAssembly;
use crate::raw::heaps::table::AssemblyFlags;
use crate::raw::indices::sizes::IndexSizes;
use crate::raw::pe::{PEFile, Section};
use crate::structured::methods::load_methods;
use crate::structured::types::{load_type_defs, populate_type_defs, Type};
use crate::utilities::FromByteStream;

#[derive(Clone, Eq, PartialEq, Hash, Derivative)]
#[derivative(Debug)]
pub struct AssemblyName<'l> {
	pub major_version: u16,
	pub minor_version: u16,
	pub build_number: u16,
	pub revision_number: u16,
	pub flags: AssemblyFlags,
	pub public_key: &'l [u8],
	pub name: &'l str,
	pub culture: &'l str,
}

#[derive(Debug)]
pub struct Assembly<'l> {
	name: AssemblyName<'l>,
	types: &'l [Type<'l>],
	sections: &'l [Section<'l>],
	index_sizes: Arc<IndexSizes>,
}

#[derive(Debug)]
pub enum AssemblyLoadingError {
	IoError(io::Error),
	MissingMetadataHeap(&'static str),
	MissingMetadataTable(&'static str),
	InvalidStringToken,
}

impl From<io::Error> for AssemblyLoadingError {
	fn from(value: io::Error) -> Self {
		Self::IoError(value)
	}
}

impl From<std::io::ErrorKind> for AssemblyLoadingError {
	fn from(value: std::io::ErrorKind) -> Self {
		Self::IoError(value.into())
	}
}

impl<'l> Assembly<'l> {
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn load(bump: &'l Bump, data: &'l [u8]) -> Result<&'l Assembly<'l>, AssemblyLoadingError> {
		let mut cursor = std::io::Cursor::new(data);
		let pe = PEFile::read(&mut cursor, &())?;
		let raw = RawAssembly::try_from(pe)?;
		Self::from_raw(bump, raw)
	}

	pub(crate) fn from_raw(bump: &'l Bump, raw: RawAssembly<'l>) -> Result<&'l Assembly<'l>, AssemblyLoadingError> {
		let metadata = raw.metadata_root();
		let strings: &crate::raw::heaps::StringHeap = metadata.get_heap().ok_or(AssemblyLoadingError::MissingMetadataHeap("#Strings"))?;
		let blobs: &crate::raw::heaps::BlobHeap = metadata.get_heap().ok_or(AssemblyLoadingError::MissingMetadataHeap("#Blob"))?;
		let tables: &crate::raw::heaps::table::TableHeap = metadata.get_heap().ok_or(AssemblyLoadingError::MissingMetadataHeap("#~"))?;

		let assembly_row = tables
			.get_table::<crate::raw::heaps::table::AssemblyTable>()
			.and_then(|t| t.rows().next())
			.ok_or(AssemblyLoadingError::MissingMetadataTable("Assembly"))?;

		let name = AssemblyName {
			major_version: assembly_row.major_version,
			minor_version: assembly_row.minor_version,
			build_number: assembly_row.build_number,
			revision_number: assembly_row.revision_number,
			flags: assembly_row.flags,
			public_key: blobs.get(assembly_row.public_key.0).unwrap_or(&[]),
			name: strings.get(assembly_row.name).ok_or(AssemblyLoadingError::InvalidStringToken)?,
			culture: strings.get(assembly_row.culture).unwrap_or(""),
		};

		let types = load_type_defs(bump, tables, strings)?;
		let sections = bump.alloc_slice_clone(&raw.pe_file().sections);
		let index_sizes = tables.index_sizes().clone();
		let assembly = bump.alloc(Assembly { name, types, sections, index_sizes });

		populate_type_defs(bump, blobs, strings, tables, assembly)?;
		load_methods(bump, strings, blobs, tables, assembly)?;

		Ok(assembly)
	}

	pub fn name(&self) -> &AssemblyName<'l> {
		&self.name
	}

	pub fn types(&self) -> &'l [Type<'l>] {
		self.types
	}

	pub(crate) fn pe_sections(&self) -> &'l [Section<'l>] {
		self.sections
	}

	pub(crate) fn index_sizes(&self) -> &Arc<IndexSizes> {
		&self.index_sizes
	}
}
