//! A data-less mirror of the concrete IL opcodes the devirtualizer can
//! resolve a virtual opcode or emit a translated instruction as.
//!
//! `devirt_asm::raw::il::OpCode` carries its operand payload inline (it is
//! built to *decode* real method bodies), which makes it awkward to use as a
//! "which opcode is this" tag: a `VMOpcode::resolved_opcode` or a
//! `TranslatedInstruction::opcode` needs to name an opcode before its operand
//! (read separately, from the virtual bytecode stream) is known. `CilOpcode`
//! is that tag; `devirt_asm`'s opcode reader remains the thing that decodes
//! real IL bytes when handler bodies are scanned for pattern matching.

use devirt_asm::raw::il::{CompoundOpCode, OpCode};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[allow(non_camel_case_types)]
pub enum CilOpcode {
	Nop,
	Dup,
	Pop,
	Ret,
	Throw,
	Rethrow,
	Ldnull,
	Ldc_I4,
	Ldc_I8,
	Ldc_R4,
	Ldc_R8,
	Ldstr,
	Ldarg,
	Starg,
	Ldloc,
	Stloc,
	Ldfld,
	Ldflda,
	Stfld,
	Ldsfld,
	Ldsflda,
	Stsfld,
	Call,
	Callvirt,
	Newobj,
	Newarr,
	Castclass,
	Isinst,
	Box,
	Unbox,
	Unbox_Any,
	Ldlen,
	Ldelem_I1,
	Ldelem_U1,
	Ldelem_I2,
	Ldelem_U2,
	Ldelem_I4,
	Ldelem_U4,
	Ldelem_I8,
	Ldelem_R4,
	Ldelem_R8,
	Ldelem_Ref,
	Ldelem,
	Stelem_I1,
	Stelem_I2,
	Stelem_I4,
	Stelem_I8,
	Stelem_R4,
	Stelem_R8,
	Stelem_Ref,
	Stelem,
	Ldelema,
	Ldtoken,
	Add,
	Sub,
	Mul,
	Div,
	Div_Un,
	Rem,
	Rem_Un,
	And,
	Or,
	Xor,
	Shl,
	Shr,
	Shr_Un,
	Neg,
	Not,
	Ceq,
	Cgt,
	Cgt_Un,
	Clt,
	Clt_Un,
	Conv_I1,
	Conv_I2,
	Conv_I4,
	Conv_I8,
	Conv_U1,
	Conv_U2,
	Conv_U4,
	Conv_U8,
	Conv_R4,
	Conv_R8,
	Conv_I,
	Conv_U,
	Br,
	Brfalse,
	Brtrue,
	Beq,
	Bge,
	Bgt,
	Ble,
	Blt,
	Bne_Un,
	Bge_Un,
	Bgt_Un,
	Ble_Un,
	Blt_Un,
	Switch,
	Leave,
	Endfinally,
	Endfilter,
	Initobj,
	Constrained,
	Sizeof,
}

impl CilOpcode {
	/// Lowercase dotted mnemonic, as it would be printed in an IL listing.
	pub fn mnemonic(&self) -> &'static str {
		use CilOpcode::*;
		match self {
			Nop => "nop",
			Dup => "dup",
			Pop => "pop",
			Ret => "ret",
			Throw => "throw",
			Rethrow => "rethrow",
			Ldnull => "ldnull",
			Ldc_I4 => "ldc.i4",
			Ldc_I8 => "ldc.i8",
			Ldc_R4 => "ldc.r4",
			Ldc_R8 => "ldc.r8",
			Ldstr => "ldstr",
			Ldarg => "ldarg",
			Starg => "starg",
			Ldloc => "ldloc",
			Stloc => "stloc",
			Ldfld => "ldfld",
			Ldflda => "ldflda",
			Stfld => "stfld",
			Ldsfld => "ldsfld",
			Ldsflda => "ldsflda",
			Stsfld => "stsfld",
			Call => "call",
			Callvirt => "callvirt",
			Newobj => "newobj",
			Newarr => "newarr",
			Castclass => "castclass",
			Isinst => "isinst",
			Box => "box",
			Unbox => "unbox",
			Unbox_Any => "unbox.any",
			Ldlen => "ldlen",
			Ldelem_I1 => "ldelem.i1",
			Ldelem_U1 => "ldelem.u1",
			Ldelem_I2 => "ldelem.i2",
			Ldelem_U2 => "ldelem.u2",
			Ldelem_I4 => "ldelem.i4",
			Ldelem_U4 => "ldelem.u4",
			Ldelem_I8 => "ldelem.i8",
			Ldelem_R4 => "ldelem.r4",
			Ldelem_R8 => "ldelem.r8",
			Ldelem_Ref => "ldelem.ref",
			Ldelem => "ldelem",
			Stelem_I1 => "stelem.i1",
			Stelem_I2 => "stelem.i2",
			Stelem_I4 => "stelem.i4",
			Stelem_I8 => "stelem.i8",
			Stelem_R4 => "stelem.r4",
			Stelem_R8 => "stelem.r8",
			Stelem_Ref => "stelem.ref",
			Stelem => "stelem",
			Ldelema => "ldelema",
			Ldtoken => "ldtoken",
			Add => "add",
			Sub => "sub",
			Mul => "mul",
			Div => "div",
			Div_Un => "div.un",
			Rem => "rem",
			Rem_Un => "rem.un",
			And => "and",
			Or => "or",
			Xor => "xor",
			Shl => "shl",
			Shr => "shr",
			Shr_Un => "shr.un",
			Neg => "neg",
			Not => "not",
			Ceq => "ceq",
			Cgt => "cgt",
			Cgt_Un => "cgt.un",
			Clt => "clt",
			Clt_Un => "clt.un",
			Conv_I1 => "conv.i1",
			Conv_I2 => "conv.i2",
			Conv_I4 => "conv.i4",
			Conv_I8 => "conv.i8",
			Conv_U1 => "conv.u1",
			Conv_U2 => "conv.u2",
			Conv_U4 => "conv.u4",
			Conv_U8 => "conv.u8",
			Conv_R4 => "conv.r4",
			Conv_R8 => "conv.r8",
			Conv_I => "conv.i",
			Conv_U => "conv.u",
			Br => "br",
			Brfalse => "brfalse",
			Brtrue => "brtrue",
			Beq => "beq",
			Bge => "bge",
			Bgt => "bgt",
			Ble => "ble",
			Blt => "blt",
			Bne_Un => "bne.un",
			Bge_Un => "bge.un",
			Bgt_Un => "bgt.un",
			Ble_Un => "ble.un",
			Blt_Un => "blt.un",
			Switch => "switch",
			Leave => "leave",
			Endfinally => "endfinally",
			Endfilter => "endfilter",
			Initobj => "initobj",
			Constrained => "constrained",
			Sizeof => "sizeof",
		}
	}

	/// Does this opcode consume a branch-target operand (single target or switch table)?
	pub fn is_branch(&self) -> bool {
		matches!(self, CilOpcode::Br | CilOpcode::Brfalse | CilOpcode::Brtrue
			| CilOpcode::Beq | CilOpcode::Bge | CilOpcode::Bgt | CilOpcode::Ble | CilOpcode::Blt
			| CilOpcode::Bne_Un | CilOpcode::Bge_Un | CilOpcode::Bgt_Un | CilOpcode::Ble_Un | CilOpcode::Blt_Un
			| CilOpcode::Leave | CilOpcode::Switch)
	}
}

impl std::fmt::Display for CilOpcode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.mnemonic())
	}
}

/// Opcode-identity comparison used by the pattern matcher: matches the
/// *shape* of a decoded IL instruction against a prototype entry, ignoring
/// whatever operand it carries.
pub fn kind_matches(op: &OpCode, kind: CilOpcode) -> bool {
	use CilOpcode as K;
	match kind {
		K::Nop => matches!(op, OpCode::nop),
		K::Dup => matches!(op, OpCode::dup),
		K::Pop => matches!(op, OpCode::pop),
		K::Ret => matches!(op, OpCode::ret),
		K::Throw => matches!(op, OpCode::throw),
		K::Rethrow => matches!(op, OpCode::compound(CompoundOpCode::rethrow)),
		K::Ldnull => matches!(op, OpCode::ldnull),
		K::Ldc_I4 => is_ldc_i4_family(op),
		K::Ldc_I8 => matches!(op, OpCode::ldc_i8(_)),
		K::Ldc_R4 => matches!(op, OpCode::ldc_r4(_)),
		K::Ldc_R8 => matches!(op, OpCode::ldc_r8(_)),
		K::Ldstr => matches!(op, OpCode::ldstr(_)),
		K::Ldarg => matches!(op, OpCode::ldarg_0 | OpCode::ldarg_1 | OpCode::ldarg_2 | OpCode::ldarg_3 | OpCode::ldarg_s(_) | OpCode::compound(CompoundOpCode::ldarg(_))),
		K::Starg => matches!(op, OpCode::starg_s(_) | OpCode::compound(CompoundOpCode::starg(_))),
		K::Ldloc => is_ldloc_family(op),
		K::Stloc => is_stloc_family(op),
		K::Ldfld => matches!(op, OpCode::ldfld(_)),
		K::Ldflda => matches!(op, OpCode::ldflda(_)),
		K::Stfld => matches!(op, OpCode::stfld(_)),
		K::Ldsfld => matches!(op, OpCode::ldsfld(_)),
		K::Ldsflda => matches!(op, OpCode::ldsflda(_)),
		K::Stsfld => matches!(op, OpCode::stsfld(_)),
		K::Call => matches!(op, OpCode::call(_)),
		K::Callvirt => matches!(op, OpCode::callvirt(_)),
		K::Newobj => matches!(op, OpCode::newobj(_)),
		K::Newarr => matches!(op, OpCode::newarr(_)),
		K::Castclass => matches!(op, OpCode::castclass(_)),
		K::Isinst => matches!(op, OpCode::isinst(_)),
		K::Box => matches!(op, OpCode::box_val(_)),
		K::Unbox => matches!(op, OpCode::unbox(_)),
		K::Unbox_Any => matches!(op, OpCode::unbox_any(_)),
		K::Ldlen => matches!(op, OpCode::ldlen),
		K::Ldelem_I1 => matches!(op, OpCode::ldelem_i1),
		K::Ldelem_U1 => matches!(op, OpCode::ldelem_u1),
		K::Ldelem_I2 => matches!(op, OpCode::ldelem_i2),
		K::Ldelem_U2 => matches!(op, OpCode::ldelem_u2),
		K::Ldelem_I4 => matches!(op, OpCode::ldelem_i4),
		K::Ldelem_U4 => matches!(op, OpCode::ldelem_u4),
		K::Ldelem_I8 => matches!(op, OpCode::ldelem_i8),
		K::Ldelem_R4 => matches!(op, OpCode::ldelem_r4),
		K::Ldelem_R8 => matches!(op, OpCode::ldelem_r8),
		K::Ldelem_Ref => matches!(op, OpCode::ldelem_ref),
		K::Ldelem => matches!(op, OpCode::ldelem(_)),
		K::Stelem_I1 => matches!(op, OpCode::stelem_i1),
		K::Stelem_I2 => matches!(op, OpCode::stelem_i2),
		K::Stelem_I4 => matches!(op, OpCode::stelem_i4),
		K::Stelem_I8 => matches!(op, OpCode::stelem_i8),
		K::Stelem_R4 => matches!(op, OpCode::stelem_r4),
		K::Stelem_R8 => matches!(op, OpCode::stelem_r8),
		K::Stelem_Ref => matches!(op, OpCode::stelem_ref),
		K::Stelem => matches!(op, OpCode::stelem(_)),
		K::Ldelema => matches!(op, OpCode::ldelema(_)),
		K::Ldtoken => matches!(op, OpCode::ldtoken(_)),
		K::Add => matches!(op, OpCode::add),
		K::Sub => matches!(op, OpCode::sub),
		K::Mul => matches!(op, OpCode::mul),
		K::Div => matches!(op, OpCode::div),
		K::Div_Un => matches!(op, OpCode::div_un),
		K::Rem => matches!(op, OpCode::rem),
		K::Rem_Un => matches!(op, OpCode::rem_un),
		K::And => matches!(op, OpCode::and),
		K::Or => matches!(op, OpCode::or),
		K::Xor => matches!(op, OpCode::xor),
		K::Shl => matches!(op, OpCode::shl),
		K::Shr => matches!(op, OpCode::shr),
		K::Shr_Un => matches!(op, OpCode::shr_un),
		K::Neg => matches!(op, OpCode::neg),
		K::Not => matches!(op, OpCode::not),
		K::Ceq => matches!(op, OpCode::compound(CompoundOpCode::ceq)),
		K::Cgt => matches!(op, OpCode::compound(CompoundOpCode::cgt)),
		K::Cgt_Un => matches!(op, OpCode::compound(CompoundOpCode::cgt_un)),
		K::Clt => matches!(op, OpCode::compound(CompoundOpCode::clt)),
		K::Clt_Un => matches!(op, OpCode::compound(CompoundOpCode::clt_un)),
		K::Conv_I1 => matches!(op, OpCode::conv_i1),
		K::Conv_I2 => matches!(op, OpCode::conv_i2),
		K::Conv_I4 => matches!(op, OpCode::conv_i4),
		K::Conv_I8 => matches!(op, OpCode::conv_i8),
		K::Conv_U1 => matches!(op, OpCode::conv_u1),
		K::Conv_U2 => matches!(op, OpCode::conv_u2),
		K::Conv_U4 => matches!(op, OpCode::conv_u4),
		K::Conv_U8 => matches!(op, OpCode::conv_u8),
		K::Conv_R4 => matches!(op, OpCode::conv_r4),
		K::Conv_R8 => matches!(op, OpCode::conv_r8),
		K::Conv_I => matches!(op, OpCode::conv_i),
		K::Conv_U => matches!(op, OpCode::conv_u),
		K::Br => matches!(op, OpCode::br(_) | OpCode::br_s(_)),
		K::Brfalse => matches!(op, OpCode::brfalse(_) | OpCode::brfalse_s(_)),
		K::Brtrue => matches!(op, OpCode::brtrue(_) | OpCode::brtrue_s(_)),
		K::Beq => matches!(op, OpCode::beq(_) | OpCode::beq_s(_)),
		K::Bge => matches!(op, OpCode::bge(_) | OpCode::bge_s(_)),
		K::Bgt => matches!(op, OpCode::bgt(_) | OpCode::bgt_s(_)),
		K::Ble => matches!(op, OpCode::ble(_) | OpCode::ble_s(_)),
		K::Blt => matches!(op, OpCode::blt(_) | OpCode::blt_s(_)),
		K::Bne_Un => matches!(op, OpCode::bne_un(_) | OpCode::bne_un_s(_)),
		K::Bge_Un => matches!(op, OpCode::bge_un(_) | OpCode::bge_un_s(_)),
		K::Bgt_Un => matches!(op, OpCode::bgt_un(_) | OpCode::bgt_un_s(_)),
		K::Ble_Un => matches!(op, OpCode::ble_un(_) | OpCode::ble_un_s(_)),
		K::Blt_Un => matches!(op, OpCode::blt_un(_) | OpCode::blt_un_s(_)),
		K::Switch => matches!(op, OpCode::switch(_)),
		K::Leave => matches!(op, OpCode::leave(_) | OpCode::leave_s(_)),
		K::Endfinally => matches!(op, OpCode::endfinally),
		K::Endfilter => matches!(op, OpCode::compound(CompoundOpCode::endfilter)),
		K::Initobj => matches!(op, OpCode::compound(CompoundOpCode::initobj(_))),
		K::Constrained => matches!(op, OpCode::compound(CompoundOpCode::constrained(_))),
		K::Sizeof => matches!(op, OpCode::compound(CompoundOpCode::sizeof(_))),
	}
}

pub fn is_ldc_i4_family(op: &OpCode) -> bool {
	matches!(
		op,
		OpCode::ldc_i4_m1
			| OpCode::ldc_i4_0 | OpCode::ldc_i4_1 | OpCode::ldc_i4_2 | OpCode::ldc_i4_3
			| OpCode::ldc_i4_4 | OpCode::ldc_i4_5 | OpCode::ldc_i4_6 | OpCode::ldc_i4_7 | OpCode::ldc_i4_8
			| OpCode::ldc_i4_s(_) | OpCode::ldc_i4(_)
	)
}

pub fn is_ldloc_family(op: &OpCode) -> bool {
	matches!(
		op,
		OpCode::ldloc_0 | OpCode::ldloc_1 | OpCode::ldloc_2 | OpCode::ldloc_3
			| OpCode::ldloc_s(_) | OpCode::compound(CompoundOpCode::ldloc(_))
	)
}

pub fn is_stloc_family(op: &OpCode) -> bool {
	matches!(
		op,
		OpCode::stloc_0 | OpCode::stloc_1 | OpCode::stloc_2 | OpCode::stloc_3
			| OpCode::stloc_s(_) | OpCode::compound(CompoundOpCode::stloc(_))
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ldc_i4_family_covers_all_short_forms() {
		assert!(is_ldc_i4_family(&OpCode::ldc_i4_0));
		assert!(is_ldc_i4_family(&OpCode::ldc_i4_s(5)));
		assert!(is_ldc_i4_family(&OpCode::ldc_i4(1000)));
		assert!(!is_ldc_i4_family(&OpCode::ldc_i8(1000)));
	}

	#[test]
	fn kind_matches_ignores_operand_value() {
		assert!(kind_matches(&OpCode::callvirt(make_token()), CilOpcode::Callvirt));
		assert!(!kind_matches(&OpCode::call(make_token()), CilOpcode::Callvirt));
	}

	fn make_token() -> devirt_asm::raw::indices::metadata_token::MetadataToken {
		devirt_asm::raw::indices::metadata_token::MetadataToken::try_from(0x0A000001u32).unwrap()
	}
}
