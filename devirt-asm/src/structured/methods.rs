use std::io::{Cursor, ErrorKind};

use bumpalo::Bump;
use derivative::Derivative;

use crate::raw::heaps::table::{MethodAttributes, MethodDefTable, MethodImplAttributes, StandAloneSigTable, TableHeap, TypeDefTable};
use crate::raw::heaps::{BlobHeap, StringHeap};
use crate::raw::il::MethodBody;
use crate::raw::indices::sizes::IndexSizes;
use crate::structured::assembly::AssemblyLoadingError;
use crate::structured::types::Type;
use crate::structured::Assembly;
use crate::utilities::FromByteStream;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Method<'l> {
	pub name: &'l str,
	pub flags: MethodAttributes,
	pub impl_flags: MethodImplAttributes,
	pub rva: u32,
	#[derivative(Debug = "ignore")]
	pub body: Option<MethodBody<'l>>,
}

impl<'l> Method<'l> {
	pub fn body(&self) -> Option<&MethodBody<'l>> {
		self.body.as_ref()
	}
}

/// Loads every method of every type, reading and parsing the method body
/// (header, locals signature, exception clauses) for any method with a non-zero RVA.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(super) fn load_methods<'l>(
	bump: &'l Bump,
	strings: &StringHeap<'l>,
	blobs: &BlobHeap<'l>,
	tables: &TableHeap<'l>,
	assembly: &'l Assembly<'l>,
) -> Result<(), AssemblyLoadingError> {
	let Some(method_table) = tables.get_table::<MethodDefTable>() else {
		return Ok(());
	};
	let signatures = tables.get_table::<StandAloneSigTable>();
	let Some(type_table) = tables.get_table::<TypeDefTable>() else {
		return Ok(());
	};

	let sections = assembly.pe_sections();
	let index_sizes = assembly.index_sizes();
	let empty_sigs = StandAloneSigTable::empty();
	let sigs = signatures.unwrap_or(&empty_sigs);

	let mut methods = bumpalo::vec![in bump];
	methods.reserve_exact(method_table.len());
	for row in method_table.rows() {
		let name = strings.get(row.name).ok_or(AssemblyLoadingError::InvalidStringToken)?;
		let body = match row.rva {
			0 => None,
			rva => {
				let data = resolve_rva(sections, rva).ok_or(ErrorKind::InvalidData)?;
				let mut cursor = Cursor::new(data);
				Some(MethodBody::read(&mut cursor, blobs, sigs, index_sizes)?)
			},
		};

		methods.push(Method {
			name: bump.alloc_str(name),
			flags: row.flags,
			impl_flags: row.impl_flags,
			rva: row.rva,
			body,
		});
	}
	let methods = methods.into_bump_slice();

	let mut rows = type_table.rows();
	rows.next();

	let mut start = 0;
	for ty in assembly.types() {
		let end = match rows.next() {
			None => methods.len(),
			Some(row) => row.method_list.0,
		};
		let range = start..end;
		match ty {
			Type::Class(class) => class.set_methods(&methods[range]),
			Type::Interface(interface) => interface.set_methods(&methods[range]),
			Type::Primitive(_) => assert_eq!(range.len(), 0),
		}
		start = end;
	}

	Ok(())
}

fn resolve_rva<'l>(sections: &[crate::raw::pe::Section<'l>], rva: u32) -> Option<&'l [u8]> {
	let section = sections.iter().find(|s| s.virtual_data_range().contains(&rva))?;
	let offset = (rva - section.header.virtual_address) as usize;
	section.data.get(offset..)
}

impl StandAloneSigTable {
	fn empty() -> Self {
		// SAFETY net for methods with no locals: an empty table is never indexed into.
		Self::read(&mut Cursor::new(&[]), IndexSizes::ZERO, 0).expect("empty table read cannot fail")
	}
}
