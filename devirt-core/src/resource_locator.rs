//! The seven-step dispatcher/key-material discovery algorithm: locates the
//! resource getter, the embedded resource it names, the session key field,
//! the modulus string, and finally the VM dispatcher type itself.

use std::io::Cursor;

use devirt_asm::raw::assembly::Assembly;
use devirt_asm::raw::heaps::table::{
	ClassLayoutTable, FieldRVATable, FieldTable, MethodAttributes, MethodDefTable, TableHeap, TypeDefIndex, TypeDefTable,
};
use devirt_asm::raw::heaps::{BlobHeap, StringHeap, UserStringHeap};
use devirt_asm::raw::il::{MethodBody, MethodSignature, OpCode, OpCodeIterator, TypeSignatureTag};
use devirt_asm::raw::indices::coded_index::TypeDefOrRef;
use devirt_asm::raw::indices::metadata_token::{MetadataToken, MetadataTokenKind};

use crate::error::DevirtError;
use crate::key::{VMKey, FALLBACK_MODULUS_BASE64};
use crate::names::{owning_type_of_field, owning_type_of_method, resolve_method_token_full_name};
use crate::type_name::is_void;

/// Build-specific names the locator is parameterized over, since the exact
/// sentinel/helper names are per-protected-build facts, not part of the VM
/// scheme itself (mirrors `key::FALLBACK_MODULUS_BASE64`'s own build-specific
/// nature).
pub struct ResourceLocatorConfig<'a> {
	/// Full name of the abstract "stream" return type the getter exposes.
	pub stream_sentinel_type: &'a str,
	/// Full name of the runtime array-initializer helper skipped in step 5.
	pub array_initializer_helper: &'a str,
}

impl Default for ResourceLocatorConfig<'static> {
	fn default() -> Self {
		Self {
			stream_sentinel_type: "System.IO.Stream",
			array_initializer_helper: "System.Runtime.CompilerServices.RuntimeHelpers::InitializeArray",
		}
	}
}

fn is_public_static(flags: MethodAttributes) -> bool {
	let access = flags.bits() & MethodAttributes::MEMBER_ACCESS_MASK.bits();
	access == MethodAttributes::PUBLIC.bits() && flags.contains(MethodAttributes::STATIC)
}

struct DecodedBody<'l> {
	instructions: Vec<(u64, OpCode<'l>)>,
}

fn decode_method<'l>(tables: &TableHeap<'l>, blobs: &'l BlobHeap<'l>, pe: &devirt_asm::raw::pe::PEFile<'l>, method_index: usize) -> Option<DecodedBody<'l>> {
	let methods = tables.get_table::<MethodDefTable>()?;
	let row = methods.get(method_index)?;
	if row.rva == 0 {
		return None;
	}
	let (_, data, offset) = pe.resolve_rva(row.rva)?;
	let empty_sigs = devirt_asm::raw::heaps::table::StandAloneSigTable::read(&mut Cursor::new(&[]), devirt_asm::raw::indices::sizes::IndexSizes::ZERO, 0).ok()?;
	let body = MethodBody::read(&mut Cursor::new(data.get(offset..)?), blobs, &empty_sigs, tables.index_sizes()).ok()?;
	let instructions = OpCodeIterator::new(body.code).filter_map(|(offset, op)| op.ok().map(|op| (offset, op))).collect();
	Some(DecodedBody { instructions })
}

fn method_signature<'l>(tables: &TableHeap<'l>, blobs: &'l BlobHeap<'l>, method_index: usize) -> Option<MethodSignature<'l>> {
	let methods = tables.get_table::<MethodDefTable>()?;
	let row = methods.get(method_index)?;
	let sig = blobs.get(row.signature.0 as usize)?;
	let mut stream = Cursor::new(sig);
	MethodSignature::read(&mut stream, tables.index_sizes()).ok()
}

fn return_type_full_name<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, signature: &MethodSignature<'l>) -> Option<String> {
	let tag = signature.return_type().as_tags_tree();
	crate::type_name::resolve_signature(tables, strings, &tag).map(|n| n.full_name())
}

/// Resolves the RVA-backed byte segment behind a `Field` token, by finding
/// the `FieldRVA` row for it and reading its section bytes directly. Length
/// comes from the field's own value-type's `ClassLayout`
/// (the shape the C# compiler emits for `static readonly byte[]` field
/// initializers: a private `__StaticArrayInitTypeSize=N` struct).
fn rva_field_bytes<'l>(tables: &TableHeap<'l>, blobs: &BlobHeap<'l>, pe: &devirt_asm::raw::pe::PEFile<'l>, field_index: usize) -> Option<Vec<u8>> {
	let field_rvas = tables.get_table::<FieldRVATable>()?;
	let rva_row = field_rvas.rows().find(|r| r.field.0 == field_index)?;

	let fields = tables.get_table::<FieldTable>()?;
	let field_row = fields.get(field_index)?;
	let sig = blobs.get(field_row.signature.0 as usize)?;
	let mut stream = Cursor::new(sig);
	// Field signature blobs open with the FIELD tag (0x06, ECMA §II.23.2.4); skip it.
	stream.set_position(1);
	let tag = TypeSignatureTag::read(&mut stream, tables.index_sizes()).ok()?;
	let value_type_token: MetadataToken = match tag {
		TypeSignatureTag::ValueType(coded) | TypeSignatureTag::ClassType(coded) => coded.into(),
		_ => return None,
	};
	if value_type_token.kind() != MetadataTokenKind::TypeDef {
		return None;
	}

	let layouts = tables.get_table::<ClassLayoutTable>()?;
	let layout = layouts.rows().find(|r| r.parent == TypeDefIndex(value_type_token.index()))?;
	let len = layout.class_size as usize;

	let (_, data, offset) = pe.resolve_rva(rva_row.rva)?;
	data.get(offset..offset + len).map(|s| s.to_vec())
}

/// Runs the full seven-step algorithm over the loaded assembly. The third
/// element of the returned tuple is the embedded resource's name, passed back
/// so the caller can recover its bytes via [`resource_bytes`] without
/// repeating steps 1-3 itself.
pub fn locate<'l>(assembly: &Assembly<'l>, config: &ResourceLocatorConfig) -> Result<(VMKey, MetadataToken, String), DevirtError> {
	let pe = assembly.pe_file();
	let metadata = assembly.metadata_root();
	let tables = metadata.get_heap::<TableHeap>().ok_or(DevirtError::ResourceNotFound)?;
	let strings = metadata.get_heap::<StringHeap>().ok_or(DevirtError::ResourceNotFound)?;
	let blobs = metadata.get_heap::<BlobHeap>().ok_or(DevirtError::ResourceNotFound)?;
	let user_strings = metadata.get_heap::<UserStringHeap>().ok_or(DevirtError::ResourceNotFound)?;

	let methods = tables.get_table::<MethodDefTable>().ok_or(DevirtError::ResourceNotFound)?;

	// Step 1 + 2: the first public static method returning the stream
	// sentinel type is the resource getter. `HandlerMatcher`'s pattern
	// catalog has no entry for this shape, so candidates are accepted by
	// return-type alone, in ascending token order.
	let mut getter_index = None;
	for index in 0..methods.len() {
		let row = methods.get(index).ok_or(DevirtError::ResourceNotFound)?;
		if !is_public_static(row.flags) {
			continue;
		}
		let Some(signature) = method_signature(tables, blobs, index) else { continue };
		if return_type_full_name(tables, strings, &signature).as_deref() == Some(config.stream_sentinel_type) {
			getter_index = Some(index);
			break;
		}
	}
	let getter_index = getter_index.ok_or(DevirtError::ResourceNotFound)?;
	let getter_body = decode_method(tables, blobs, pe, getter_index).ok_or(DevirtError::ResourceNotFound)?;

	// Step 3: the first `ldstr` in the getter names the embedded resource.
	let resource_name = getter_body
		.instructions
		.iter()
		.find_map(|(_, op)| match op {
			OpCode::ldstr(t) => user_strings.get(t.index()),
			_ => None,
		})
		.ok_or(DevirtError::ResourceNotFound)?;

	let manifest_resources = tables.get_table::<devirt_asm::raw::heaps::table::ManifestResourceTable>();
	let resource_row = manifest_resources
		.and_then(|table| table.rows().find(|r| strings.get(r.name) == Some(resource_name.as_str())))
		.ok_or(DevirtError::ResourceNotFound)?;
	let _ = resource_row; // presence confirms step 3; bytes recovered in CipherStream's caller via ManifestResource.offset + cli_header.resources.

	// Step 4: the first `ldsfld`/`ldfld` names the RVA-backed session key field.
	let session_key = getter_body
		.instructions
		.iter()
		.find_map(|(_, op)| match op {
			OpCode::ldsfld(t) | OpCode::ldfld(t) if t.kind() == MetadataTokenKind::Field => rva_field_bytes(tables, blobs, pe, t.index()),
			_ => None,
		})
		.ok_or(DevirtError::KeyUnavailable)?;

	// Step 5: scan for the modulus-string method, then the initializer. The
	// loop stops at the *first* call slot after the modulus candidate,
	// whatever it targets, rather than continuing to filter out further
	// `InitializeArray` calls.
	let mut modulus_method: Option<MetadataToken> = None;
	let mut initializer: Option<MetadataToken> = None;
	for (_, op) in &getter_body.instructions {
		let OpCode::call(target) = op else { continue };
		if modulus_method.is_none() {
			let name = resolve_method_token_full_name(tables, strings, *target);
			if name.as_deref() != Some(config.array_initializer_helper) {
				modulus_method = Some(*target);
			}
			continue;
		}
		initializer = Some(*target);
		break;
	}
	let modulus_method = modulus_method.ok_or(DevirtError::ResourceNotFound)?;
	let _ = initializer;

	// Step 6: first `ldstr` in the modulus-string method, or the fallback.
	let modulus_base64 = if modulus_method.kind() == MetadataTokenKind::MethodDef {
		decode_method(tables, blobs, pe, modulus_method.index())
			.and_then(|body| body.instructions.iter().find_map(|(_, op)| match op {
				OpCode::ldstr(t) => user_strings.get(t.index()),
				_ => None,
			}))
	} else {
		None
	};
	let modulus_base64 = modulus_base64.unwrap_or_else(|| FALLBACK_MODULUS_BASE64.to_string());

	let key = VMKey::derive(session_key, &modulus_base64)?;

	// Step 7: a method on the getter's declaring type, distinct from both the
	// getter and the modulus-string method, with a non-void return type; the
	// declaring type of *that* return type is the VM type.
	let type_defs = tables.get_table::<TypeDefTable>().ok_or(DevirtError::DispatcherNotFound)?;
	let owner = owning_type_of_method(type_defs, getter_index).ok_or(DevirtError::DispatcherNotFound)?;
	let owner_row = type_defs.get(owner).ok_or(DevirtError::DispatcherNotFound)?;
	let method_range_end = type_defs.get(owner + 1).map(|r| r.method_list.0).unwrap_or(methods.len());

	let getter_token = MetadataToken::try_from(0x0600_0000 | getter_index as u32).map_err(|_| DevirtError::DispatcherNotFound)?;
	let modulus_token = modulus_method;

	let mut vm_type = None;
	for index in owner_row.method_list.0..method_range_end {
		let token = MetadataToken::try_from(0x0600_0000 | index as u32).map_err(|_| DevirtError::DispatcherNotFound)?;
		if token == getter_token || token == modulus_token {
			continue;
		}
		let Some(signature) = method_signature(tables, blobs, index) else { continue };
		let return_tag = signature.return_type().as_tags_tree();
		if is_void(&return_tag) {
			continue;
		}
		let return_type_token: Option<TypeDefOrRef> = match return_tag {
			TypeSignatureTag::ValueType(coded) | TypeSignatureTag::ClassType(coded) => Some(coded),
			_ => None,
		};
		let Some(coded) = return_type_token else { continue };
		let token: MetadataToken = coded.into();
		if token.kind() == MetadataTokenKind::TypeDef {
			vm_type = Some(token);
			break;
		}
	}

	let vm_type = vm_type.ok_or(DevirtError::DispatcherNotFound)?;
	Ok((key, vm_type, resource_name.to_string()))
}

/// Recovers an embedded `ManifestResource`'s raw bytes by name: resolves the
/// CLI header's `resources` data directory (optional-header index 14) to a
/// section offset, then applies `ManifestResource.offset` within it. Managed
/// resources are stored as `u32 length || bytes` at that point (ECMA-335
/// §II.24.2.2), which this returns already stripped of the length prefix.
/// Left for the caller rather than folded into [`locate`], since only the
/// caller knows the bytes are about to be split into two independent
/// `CipherStream`s.
pub fn resource_bytes<'l>(assembly: &Assembly<'l>, resource_name: &str) -> Option<&'l [u8]> {
	let pe = assembly.pe_file();
	let metadata = assembly.metadata_root();
	let tables = metadata.get_heap::<TableHeap>()?;
	let strings = metadata.get_heap::<StringHeap>()?;
	let resources = tables.get_table::<devirt_asm::raw::heaps::table::ManifestResourceTable>()?;
	let row = resources.rows().find(|r| strings.get(r.name) == Some(resource_name))?;

	let data_directory = pe.pe_header.image_optional_header.data_directory(14)?;
	let (_, section_data, base_offset) = pe.resolve_rva(data_directory.virtual_address)?;
	let start = base_offset + row.offset as usize;
	let len = u32::from_le_bytes(section_data.get(start..start + 4)?.try_into().ok()?) as usize;
	section_data.get(start + 4..start + 4 + len)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn is_public_static_rejects_private_static() {
		let private_static = MethodAttributes::PRIVATE | MethodAttributes::STATIC;
		assert!(!is_public_static(private_static));
	}

	#[test]
	fn is_public_static_accepts_public_static() {
		let public_static = MethodAttributes::PUBLIC | MethodAttributes::STATIC;
		assert!(is_public_static(public_static));
	}

	#[test]
	fn default_config_names_stream_and_initializer_helper() {
		let config = ResourceLocatorConfig::default();
		assert_eq!(config.stream_sentinel_type, "System.IO.Stream");
		assert!(config.array_initializer_helper.ends_with("InitializeArray"));
	}
}
