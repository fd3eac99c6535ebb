//! Dispatcher-constructor scan → initial `VMOpcode` catalog, then pattern
//! identification of each handler body.

use devirt_asm::raw::heaps::table::{MethodDefTable, TableHeap, TypeDefTable};
use devirt_asm::raw::heaps::{BlobHeap, StringHeap};
use devirt_asm::raw::il::OpCode;
use devirt_asm::raw::indices::metadata_token::{MetadataToken, MetadataTokenKind};
use devirt_asm::raw::pe::PEFile;

use crate::names;
use crate::opcode::{ResolvedOpcode, SpecialOpcode, VMOpcode, VirtualOperandType};
use crate::pattern::{self, DecodedInstr, MatchContext};

pub struct HandlerMatcher;

impl HandlerMatcher {
	/// Builds the `VMOpcode` catalog for `vm_type`'s dispatcher: scans its
	/// instance constructor for opcode descriptors, then runs the pattern
	/// catalog against every handler body it found.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn run<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, blobs: &'l BlobHeap<'l>, pe: &PEFile<'l>, vm_type: MetadataToken) -> Vec<VMOpcode> {
		let mut opcodes = Self::discover(tables, strings, blobs, pe, vm_type);

		for op in &mut opcodes {
			// The reserved id takes precedence over pattern matching: it is
			// the dispatcher's own declared numbering for "invoke another
			// virtualized method", not a shape a handler body happens to have.
			if op.virtual_code == crate::opcode::EAZ_CALL_ID {
				op.resolved_opcode = ResolvedOpcode::Special(SpecialOpcode::EazCall);
				#[cfg(feature = "tracing")]
				tracing::debug!(virtual_code = op.virtual_code, "resolved via the reserved EazCall id");
				continue;
			}

			let body = match names::method_body_instructions(tables, blobs, pe, op.delegate_body_ref) {
				Some(body) => body,
				None => {
					#[cfg(feature = "tracing")]
					tracing::warn!(virtual_code = op.virtual_code, "handler body unresolvable, leaving unidentified");
					continue;
				}
			};

			let method_full_name = |t: MetadataToken| names::resolve_method_token_full_name(tables, strings, t);
			let type_full_name = |t: MetadataToken| names::resolve_type_token_full_name(tables, strings, t);
			let callee_body = |t: MetadataToken| names::method_body_instructions(tables, blobs, pe, t);
			let ctx = MatchContext { method_full_name: &method_full_name, type_full_name: &type_full_name, callee_body: &callee_body };

			#[cfg(feature = "tracing")]
			{
				let vm_type_name = names::resolve_type_token_full_name(tables, strings, vm_type);
				let recurses = vm_type_name.as_deref().is_some_and(|vtn| {
					let prefix = format!("{vtn}::");
					body.iter()
						.any(|instr| call_target(&instr.opcode).and_then(|t| names::resolve_method_token_full_name(tables, strings, t)).is_some_and(|full| full.starts_with(&prefix)))
				});
				if recurses {
					tracing::warn!(
						virtual_code = op.virtual_code,
						"handler calls back into the dispatcher type but its virtual_code is not the reserved EazCall id; resolving through the pattern catalog"
					);
				}
			}

			op.resolved_opcode = identify_opcode(&body, &ctx);
			#[cfg(feature = "tracing")]
			tracing::debug!(virtual_code = op.virtual_code, resolved = ?op.resolved_opcode, "handler identified");
		}

		opcodes
	}

	/// Scans the VM dispatcher type's instance constructor for the
	/// `ldc.i4 <virtual_code>; ldc.i4 <operand_type_code>; ldftn <handler>`
	/// triples it builds its opcode table from. Neither the constructor's
	/// exact field-assignment shape nor the naming of the array it populates
	/// is fixed across builds, so `instruction_field_ref` falls back to the
	/// dispatcher type's own token — a documented best-effort placeholder,
	/// the same kind of simplification `pattern::LDELEM_FAMILY_PATTERN`
	/// documents for its own prototype.
	fn discover<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, blobs: &'l BlobHeap<'l>, pe: &PEFile<'l>, vm_type: MetadataToken) -> Vec<VMOpcode> {
		let ctor = match Self::find_instance_ctor(tables, strings, vm_type) {
			Some(token) => token,
			None => return Vec::new(),
		};
		let body = match names::method_body_instructions(tables, blobs, pe, ctor) {
			Some(body) => body,
			None => return Vec::new(),
		};

		scan_ctor_triples(&body, vm_type)
	}

	fn find_instance_ctor<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, vm_type: MetadataToken) -> Option<MetadataToken> {
		if vm_type.kind() != MetadataTokenKind::TypeDef {
			return None;
		}
		let type_defs = tables.get_table::<TypeDefTable>()?;
		let methods = tables.get_table::<MethodDefTable>()?;
		let row = type_defs.get(vm_type.index())?;
		let start = row.method_list.0;
		let end = type_defs.get(vm_type.index() + 1).map(|r| r.method_list.0).unwrap_or_else(|| methods.len());
		for i in start..end {
			let m = methods.get(i)?;
			if strings.get(m.name) == Some(".ctor") {
				return MetadataToken::try_from(0x0600_0000 | i as u32).ok();
			}
		}
		None
	}
}

fn int_operand(op: &OpCode) -> Option<i64> {
	match op {
		OpCode::ldc_i4_m1 => Some(-1),
		OpCode::ldc_i4_0 => Some(0),
		OpCode::ldc_i4_1 => Some(1),
		OpCode::ldc_i4_2 => Some(2),
		OpCode::ldc_i4_3 => Some(3),
		OpCode::ldc_i4_4 => Some(4),
		OpCode::ldc_i4_5 => Some(5),
		OpCode::ldc_i4_6 => Some(6),
		OpCode::ldc_i4_7 => Some(7),
		OpCode::ldc_i4_8 => Some(8),
		OpCode::ldc_i4_s(v) => Some(*v as i64),
		OpCode::ldc_i4(v) => Some(*v as i64),
		_ => None,
	}
}

fn ldftn_target(op: &OpCode) -> Option<MetadataToken> {
	use devirt_asm::raw::il::CompoundOpCode;
	match op {
		OpCode::compound(CompoundOpCode::ldftn(t)) => Some(*t),
		_ => None,
	}
}

fn call_target(op: &OpCode) -> Option<MetadataToken> {
	match op {
		OpCode::call(t) | OpCode::callvirt(t) => Some(*t),
		_ => None,
	}
}

fn scan_ctor_triples(body: &[DecodedInstr], vm_type: MetadataToken) -> Vec<VMOpcode> {
	let mut opcodes = Vec::new();
	if body.len() < 3 {
		return opcodes;
	}
	for i in 0..=body.len() - 3 {
		let (Some(virtual_code), Some(operand_type_code), Some(handler)) =
			(int_operand(&body[i].opcode), int_operand(&body[i + 1].opcode), ldftn_target(&body[i + 2].opcode))
		else {
			continue;
		};
		let Ok(operand_type) = VirtualOperandType::from_code(operand_type_code as u8) else {
			continue;
		};
		// `ldc.i4` carries a signed 32-bit payload, so the reserved EazCall id
		// (`0x8000_0000`) round-trips here as a negative `i64`; truncate back
		// to its original 32-bit bit pattern rather than rejecting negatives.
		let virtual_code = virtual_code as i32 as u32;
		opcodes.push(VMOpcode::new(virtual_code, vm_type, handler, operand_type));
	}
	opcodes
}

/// The pure decision at the heart of identification, factored out of
/// [`HandlerMatcher::run`]'s metadata-heavy wiring so it can be exercised
/// directly: try every catalog pattern against the handler body, in order,
/// and take the first one whose shape and verifier both accept it.
/// `EazCall` handlers never reach this function — `run` resolves them
/// directly from the dispatcher's own reserved virtual_code before a body is
/// even decoded.
fn identify_opcode<'l, 'ctx>(body: &[DecodedInstr<'l>], ctx: &MatchContext<'l, 'ctx>) -> ResolvedOpcode {
	match pattern::find_match(body, ctx) {
		Some((_, resolved)) => resolved,
		None => ResolvedOpcode::Unidentified,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cil::CilOpcode;

	fn token(raw: u32) -> MetadataToken {
		MetadataToken::try_from(raw).unwrap()
	}

	fn instr(opcode: OpCode<'static>) -> DecodedInstr<'static> {
		DecodedInstr { offset: 0, opcode }
	}

	fn empty_ctx<'ctx>() -> MatchContext<'static, 'ctx> {
		MatchContext { method_full_name: &|_| None, type_full_name: &|_| None, callee_body: &|_| None }
	}

	#[test]
	fn unmatched_body_is_unidentified() {
		let body = vec![instr(OpCode::nop), instr(OpCode::ret)];
		let ctx = empty_ctx();
		let resolved = identify_opcode(&body, &ctx);
		assert_eq!(resolved, ResolvedOpcode::Unidentified);
	}

	#[test]
	fn falls_through_to_pattern_catalog() {
		let body = vec![
			instr(OpCode::ldarg_0),
			instr(OpCode::callvirt(token(0x0A000001))),
			instr(OpCode::callvirt(token(0x0A000002))),
			instr(OpCode::castclass(token(0x01000001))),
			instr(OpCode::stloc_0),
			instr(OpCode::ldarg_0),
			instr(OpCode::ldloc_0),
			instr(OpCode::callvirt(token(0x0A000003))),
			instr(OpCode::newobj(token(0x0A000004))),
			instr(OpCode::callvirt(token(0x0A000005))),
			instr(OpCode::ret),
		];
		let get_length = |t: MetadataToken| match t.raw() {
			0x0A000003 => Some("System.Array::get_Length".to_string()),
			_ => Some("Some::Other".to_string()),
		};
		let ctx = MatchContext { method_full_name: &get_length, type_full_name: &|_| None, callee_body: &|_| None };
		let resolved = identify_opcode(&body, &ctx);
		assert_eq!(resolved, ResolvedOpcode::Cil(CilOpcode::Ldlen));
	}

	#[test]
	fn scan_ctor_triples_extracts_virtual_code_operand_type_and_handler() {
		let body = vec![
			instr(OpCode::ldc_i4_s(5)),
			instr(OpCode::ldc_i4_0),
			instr(OpCode::compound(devirt_asm::raw::il::CompoundOpCode::ldftn(token(0x0600_0010)))),
			instr(OpCode::ret),
		];
		let vm_type = token(0x0200_0001);
		let opcodes = scan_ctor_triples(&body, vm_type);
		assert_eq!(opcodes.len(), 1);
		assert_eq!(opcodes[0].virtual_code, 5);
		assert_eq!(opcodes[0].delegate_body_ref, token(0x0600_0010));
		assert_eq!(opcodes[0].virtual_operand_type, VirtualOperandType::InlineTok);
	}

	#[test]
	fn scan_ctor_triples_keeps_the_reserved_eaz_call_id() {
		// `ldc.i4 0x8000_0000` round-trips through the decoder's signed
		// 32-bit operand as `i32::MIN`; the scan must recover the original
		// bit pattern rather than discarding it as a negative virtual_code.
		let body = vec![
			instr(OpCode::ldc_i4(i32::MIN)),
			instr(OpCode::ldc_i4_0),
			instr(OpCode::compound(devirt_asm::raw::il::CompoundOpCode::ldftn(token(0x0600_0020)))),
			instr(OpCode::ret),
		];
		let vm_type = token(0x0200_0001);
		let opcodes = scan_ctor_triples(&body, vm_type);
		assert_eq!(opcodes.len(), 1);
		assert_eq!(opcodes[0].virtual_code, crate::opcode::EAZ_CALL_ID);
	}
}
