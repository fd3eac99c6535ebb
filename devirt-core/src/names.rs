//! Shared token→name resolution helpers used by `ResourceLocator`,
//! `HandlerMatcher`, and `pattern`'s `MatchContext`: mapping a `MethodDef`/
//! `Field` row back to its owning `TypeDef` (the RID-range technique
//! `devirt_asm::structured::methods::load_methods` uses), and rendering
//! `call`/`callvirt`/`ldfld` operand tokens as `Namespace.Type::member`.

use devirt_asm::raw::heaps::table::{FieldTable, MemberRefTable, MethodDefTable, TableHeap, TypeDefTable};
use devirt_asm::raw::heaps::{BlobHeap, StringHeap};
use devirt_asm::raw::il::{MethodBody, OpCodeIterator};
use devirt_asm::raw::indices::metadata_token::{MetadataToken, MetadataTokenKind};
use devirt_asm::raw::pe::PEFile;

use crate::pattern::DecodedInstr;
use crate::type_name::{resolve_token, TypeName};

/// The `TypeDef` row index owning `MethodDef` row `method_index`, by the
/// standard ECMA-335 "next row's `method_list` is this row's end" rule.
pub fn owning_type_of_method(type_defs: &TypeDefTable, method_index: usize) -> Option<usize> {
	for row in 0..type_defs.len() {
		let start = type_defs.get(row)?.method_list.0;
		let end = match type_defs.get(row + 1) {
			Some(next) => next.method_list.0,
			None => usize::MAX,
		};
		if (start..end).contains(&method_index) {
			return Some(row);
		}
	}
	None
}

/// Same rule, for `Field` rows via `TypeDef.field_list` (used for
/// `ClassLayout`/`FieldRVA` field ownership).
pub fn owning_type_of_field(type_defs: &TypeDefTable, field_index: usize) -> Option<usize> {
	for row in 0..type_defs.len() {
		let start = type_defs.get(row)?.field_list.0;
		let end = match type_defs.get(row + 1) {
			Some(next) => next.field_list.0,
			None => usize::MAX,
		};
		if (start..end).contains(&field_index) {
			return Some(row);
		}
	}
	None
}

fn type_name_of_def_row<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, type_def_row: usize) -> Option<TypeName> {
	let token = MetadataToken::try_from(0x0200_0000 | type_def_row as u32).ok()?;
	resolve_token(tables, strings, token)
}

/// `Namespace.Type::member` for a `MethodDef` token, resolved via its owning
/// `TypeDef`.
pub fn method_def_full_name<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, method_index: usize) -> Option<String> {
	let methods = tables.get_table::<MethodDefTable>()?;
	let type_defs = tables.get_table::<TypeDefTable>()?;
	let row = methods.get(method_index)?;
	let name = strings.get(row.name)?;
	let owner = owning_type_of_method(type_defs, method_index)?;
	let type_name = type_name_of_def_row(tables, strings, owner)?;
	Some(type_name.member_full_name(name))
}

/// `Namespace.Type::member` for a `MemberRef` token (an external or
/// forward-declared member reference).
pub fn member_ref_full_name<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, member_index: usize) -> Option<String> {
	let members = tables.get_table::<MemberRefTable>()?;
	let row = members.get(member_index)?;
	let name = strings.get(row.name)?;
	let class_token: MetadataToken = row.class.into();
	let type_name = resolve_token(tables, strings, class_token)?;
	Some(type_name.member_full_name(name))
}

/// Resolves any `call`/`callvirt`/`newobj` operand token (`MethodDef` or
/// `MemberRef`) to its fully-qualified member name.
pub fn resolve_method_token_full_name<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, token: MetadataToken) -> Option<String> {
	match token.kind() {
		MetadataTokenKind::MethodDef => method_def_full_name(tables, strings, token.index()),
		MetadataTokenKind::MemberRef => member_ref_full_name(tables, strings, token.index()),
		_ => None,
	}
}

/// Resolves a `TypeDef`/`TypeRef` operand token (e.g. `castclass`, `ldtoken`)
/// to its fully-qualified type name.
pub fn resolve_type_token_full_name<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, token: MetadataToken) -> Option<String> {
	resolve_token(tables, strings, token).map(|n| n.full_name())
}

/// `Namespace.Type::field` for an `ldfld`/`ldsfld`/`stfld`/`stsfld` operand
/// (always a `Field` token; devirt's own targets never use `MemberRef` fields).
pub fn field_full_name<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, field_index: usize) -> Option<String> {
	let fields = tables.get_table::<FieldTable>()?;
	let type_defs = tables.get_table::<TypeDefTable>()?;
	let row = fields.get(field_index)?;
	let name = strings.get(row.name)?;
	let owner = owning_type_of_field(type_defs, field_index)?;
	let type_name = type_name_of_def_row(tables, strings, owner)?;
	Some(type_name.member_full_name(name))
}

/// Decodes a `MethodDef`'s IL body into [`DecodedInstr`]s for sub-pattern
/// matching (`pattern::MatchContext::callee_body`). Returns `None` for
/// abstract/extern methods (no RVA) or unresolvable bodies.
pub fn method_body_instructions<'l>(
	tables: &TableHeap<'l>,
	blobs: &'l BlobHeap<'l>,
	pe: &PEFile<'l>,
	token: MetadataToken,
) -> Option<Vec<DecodedInstr<'l>>> {
	if token.kind() != MetadataTokenKind::MethodDef {
		return None;
	}
	let methods = tables.get_table::<MethodDefTable>()?;
	let row = methods.get(token.index())?;
	if row.rva == 0 {
		return None;
	}
	let (_, data, offset) = pe.resolve_rva(row.rva)?;
	let body = MethodBody::read(&mut std::io::Cursor::new(data.get(offset..)?), blobs, &empty_signatures(), tables.index_sizes()).ok()?;
	decode_body(body)
}

fn decode_body<'l>(body: MethodBody<'l>) -> Option<Vec<DecodedInstr<'l>>> {
	let mut out = Vec::new();
	for (offset, opcode) in OpCodeIterator::new(body.code) {
		out.push(DecodedInstr { offset, opcode: opcode.ok()? });
	}
	Some(out)
}

fn empty_signatures() -> devirt_asm::raw::heaps::table::StandAloneSigTable {
	devirt_asm::raw::heaps::table::StandAloneSigTable::read(&mut std::io::Cursor::new(&[]), devirt_asm::raw::indices::sizes::IndexSizes::ZERO, 0)
		.expect("empty table read cannot fail")
}
