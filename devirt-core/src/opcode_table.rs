//! `virtual_code → VMOpcode` lookup, plus its reverse index.

use fxhash::FxHashMap;

use crate::opcode::{ResolvedOpcode, VMOpcode};

/// Built once, after `HandlerMatcher` has run over every dispatcher entry;
/// immutable for the rest of the pipeline.
pub struct OpcodeTable {
	by_code: FxHashMap<u32, VMOpcode>,
	by_resolved: FxHashMap<ResolvedOpcode, Vec<u32>>,
}

impl OpcodeTable {
	pub fn build(opcodes: Vec<VMOpcode>) -> Self {
		let mut by_code = FxHashMap::default();
		let mut by_resolved: FxHashMap<ResolvedOpcode, Vec<u32>> = FxHashMap::default();
		for op in opcodes {
			by_resolved.entry(op.resolved_opcode).or_default().push(op.virtual_code);
			by_code.insert(op.virtual_code, op);
		}
		Self { by_code, by_resolved }
	}

	/// Looks up a virtual code, falling back to [`VMOpcode::nop_sentinel`] for
	/// codes the dispatcher scan never produced: an unrecognized code never
	/// aborts translation.
	pub fn get(&self, virtual_code: u32) -> VMOpcode {
		self.by_code.get(&virtual_code).cloned().unwrap_or_else(|| VMOpcode::nop_sentinel(virtual_code))
	}

	/// Every virtual code that resolved to `resolved` (diagnostics: "which
	/// opcodes does this build use for `ldelem.i4`?").
	pub fn resolved_codes(&self, resolved: ResolvedOpcode) -> &[u32] {
		self.by_resolved.get(&resolved).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn len(&self) -> usize {
		self.by_code.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_code.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use devirt_asm::raw::indices::metadata_token::MetadataToken;

	use super::*;
	use crate::cil::CilOpcode;
	use crate::opcode::VirtualOperandType;

	fn token(raw: u32) -> MetadataToken {
		MetadataToken::try_from(raw).unwrap()
	}

	fn identified(virtual_code: u32, resolved: ResolvedOpcode) -> VMOpcode {
		let mut op = VMOpcode::new(virtual_code, token(0x0400_0001), token(0x0600_0001), VirtualOperandType::InlineNone);
		op.resolved_opcode = resolved;
		op
	}

	#[test]
	fn get_returns_nop_sentinel_for_unknown_code() {
		let table = OpcodeTable::build(vec![identified(1, ResolvedOpcode::Cil(CilOpcode::Ldlen))]);
		let missing = table.get(0xFF);
		assert_eq!(missing.resolved_opcode, ResolvedOpcode::Cil(CilOpcode::Nop));
	}

	#[test]
	fn get_returns_the_built_entry() {
		let table = OpcodeTable::build(vec![identified(7, ResolvedOpcode::Cil(CilOpcode::Ldlen))]);
		assert_eq!(table.get(7).resolved_opcode, ResolvedOpcode::Cil(CilOpcode::Ldlen));
	}

	#[test]
	fn resolved_codes_indexes_by_resolved_opcode() {
		let table = OpcodeTable::build(vec![
			identified(1, ResolvedOpcode::Cil(CilOpcode::Ldelem_I4)),
			identified(2, ResolvedOpcode::Cil(CilOpcode::Ldelem_I4)),
			identified(3, ResolvedOpcode::Cil(CilOpcode::Ldelem_I8)),
		]);
		let mut i4 = table.resolved_codes(ResolvedOpcode::Cil(CilOpcode::Ldelem_I4)).to_vec();
		i4.sort();
		assert_eq!(i4, vec![1, 2]);
		assert_eq!(table.resolved_codes(ResolvedOpcode::Cil(CilOpcode::Ldelem_I8)), &[3]);
	}
}
