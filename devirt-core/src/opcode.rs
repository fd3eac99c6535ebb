//! `VMOpcode`, `VirtualOperandType`, and the resolved-opcode tagged variant.

use devirt_asm::raw::indices::metadata_token::MetadataToken;

use crate::cil::CilOpcode;
use crate::error::MethodError;

/// Numeric id of the special "invoke another virtualized method" opcode. A
/// dispatcher reserves this value out of its own virtual_code space, so it
/// never collides with a real `VirtualOperandType`-carrying opcode.
pub const EAZ_CALL_ID: u32 = 0x8000_0000;

/// How an instruction's operand bytes are laid out on the virtual bytecode
/// stream, mirroring ECMA-335's `OperandType` enum. The numeric codes a given
/// build assigns to these kinds are not fixed across builds, so this is
/// decoded per build via [`VirtualOperandType::from_code`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VirtualOperandType {
	InlineTok,
	InlineBrTarget,
	InlineSwitch,
	ShortInlineI,
	InlineI8,
	InlineI,
	InlineR,
	ShortInlineVar,
	InlineNone,
}

impl VirtualOperandType {
	/// The fixed `virtual_operand_type` → operand-kind table. Code 2 and any
	/// code above 12 are not assigned to any kind and are rejected with
	/// [`MethodError::UnknownOperandType`].
	pub fn from_code(code: u8) -> Result<Self, MethodError> {
		match code {
			0 | 12 => Ok(Self::InlineTok),
			1 => Ok(Self::InlineBrTarget),
			3 => Ok(Self::InlineSwitch),
			4 | 5 | 11 => Ok(Self::ShortInlineI),
			6 => Ok(Self::InlineI8),
			7 => Ok(Self::InlineI),
			8 => Ok(Self::InlineR),
			9 => Ok(Self::ShortInlineVar),
			10 => Ok(Self::InlineNone),
			other => Err(MethodError::UnknownOperandType(other)),
		}
	}
}

/// A special (non-CIL) action a virtual opcode can resolve to. Currently
/// only `EazCall` is documented; the tag exists so the translator's match on
/// [`ResolvedOpcode::Special`] stays exhaustive as more are identified.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SpecialOpcode {
	EazCall,
}

/// What a virtual opcode was identified as, once `HandlerMatcher` has run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResolvedOpcode {
	Cil(CilOpcode),
	Special(SpecialOpcode),
	/// No catalog pattern matched this opcode's handler body. Not fatal: the
	/// opcode is still usable, its output instructions just stay unannotated.
	Unidentified,
}

impl ResolvedOpcode {
	pub fn is_identified(&self) -> bool {
		!matches!(self, Self::Unidentified)
	}
}

/// One virtual instruction discovered in the protected binary. Built during
/// dispatcher discovery, mutated only by `HandlerMatcher`, immutable once
/// `identified` is set.
#[derive(Debug, Clone)]
pub struct VMOpcode {
	pub virtual_code: u32,
	/// The dispatcher-type field holding this opcode's instruction descriptor.
	pub instruction_field_ref: MetadataToken,
	/// The handler delegate's IL body, addressed by its method token rather
	/// than an owning pointer — the dispatcher type and its handlers
	/// reference each other, so neither side can own the other outright.
	pub delegate_body_ref: MetadataToken,
	pub virtual_operand_type: VirtualOperandType,
	pub resolved_opcode: ResolvedOpcode,
}

impl VMOpcode {
	pub fn new(
		virtual_code: u32,
		instruction_field_ref: MetadataToken,
		delegate_body_ref: MetadataToken,
		virtual_operand_type: VirtualOperandType,
	) -> Self {
		Self { virtual_code, instruction_field_ref, delegate_body_ref, virtual_operand_type, resolved_opcode: ResolvedOpcode::Unidentified }
	}

	pub fn identified(&self) -> bool {
		self.resolved_opcode.is_identified()
	}

	/// The canonical sentinel `OpcodeTable::get` falls back to for unknown
	/// virtual codes: `nop`-shaped, carrying no operand, so a lookup miss
	/// degrades gracefully instead of panicking mid-translation.
	pub fn nop_sentinel(virtual_code: u32) -> Self {
		Self {
			virtual_code,
			instruction_field_ref: MetadataToken::try_from(0x0400_0000).expect("Field token kind"),
			delegate_body_ref: MetadataToken::try_from(0x0600_0000).expect("MethodDef token kind"),
			virtual_operand_type: VirtualOperandType::InlineNone,
			resolved_opcode: ResolvedOpcode::Cil(CilOpcode::Nop),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn operand_type_mapping_matches_the_documented_table() {
		assert_eq!(VirtualOperandType::from_code(0).unwrap(), VirtualOperandType::InlineTok);
		assert_eq!(VirtualOperandType::from_code(12).unwrap(), VirtualOperandType::InlineTok);
		assert_eq!(VirtualOperandType::from_code(4).unwrap(), VirtualOperandType::ShortInlineI);
		assert_eq!(VirtualOperandType::from_code(5).unwrap(), VirtualOperandType::ShortInlineI);
		assert_eq!(VirtualOperandType::from_code(11).unwrap(), VirtualOperandType::ShortInlineI);
	}

	#[test]
	fn unmapped_code_is_unknown_operand_type() {
		assert_eq!(VirtualOperandType::from_code(2), Err(MethodError::UnknownOperandType(2)));
		assert_eq!(VirtualOperandType::from_code(13), Err(MethodError::UnknownOperandType(13)));
	}

	#[test]
	fn eaz_call_id_matches_the_documented_constant() {
		assert_eq!(EAZ_CALL_ID, 0x8000_0000);
	}

	#[test]
	fn nop_sentinel_is_never_identified_as_missing() {
		let sentinel = VMOpcode::nop_sentinel(0xFFFF);
		assert!(sentinel.identified());
		assert_eq!(sentinel.resolved_opcode, ResolvedOpcode::Cil(CilOpcode::Nop));
	}
}
