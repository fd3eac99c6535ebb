//! The opcode-handler pattern catalog and its matching predicate.
//!
//! Patterns are exposed as a static table of tagged values rather than
//! discovered through reflection: a new handler shape is added by appending
//! a `const OpcodePattern` and listing it in [`CATALOG`], not by registering
//! a new type at runtime.

use devirt_asm::raw::il::OpCode;
use devirt_asm::raw::indices::metadata_token::MetadataToken;

use crate::cil::{self, CilOpcode};
use crate::opcode::ResolvedOpcode;

/// One decoded instruction at its byte offset within a handler body.
#[derive(Copy, Clone)]
pub struct DecodedInstr<'l> {
	pub offset: u64,
	pub opcode: OpCode<'l>,
}

bitflags::bitflags! {
	/// Which opcode families a pattern accepts in place of an exact prototype
	/// match. Three independent bits; note that a load-local `b` is *always*
	/// interchangeable regardless of whether `LDLOC` is set — the bit exists
	/// for symmetry with the other two families but the matcher never
	/// consults it. Kept rather than dropped, since patterns still declare
	/// it for readability.
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct InterchangePolicy: u8 {
		const LDC_I4 = 0b001;
		const LDLOC  = 0b010;
		const STLOC  = 0b100;
	}
}

/// Lookups a pattern's verifier needs but that only `HandlerMatcher` (which
/// owns the assembly arena and token resolution) can provide. Plain `dyn Fn`
/// references rather than a trait keep this module free of a dependency on
/// the rest of the pipeline's wiring.
pub struct MatchContext<'l, 'ctx> {
	/// Resolves a `call`/`callvirt` operand token to `"Namespace.Type::Method"`.
	pub method_full_name: &'ctx dyn Fn(MetadataToken) -> Option<String>,
	/// Resolves an `ldtoken` operand token to `"Namespace.Type"`.
	pub type_full_name: &'ctx dyn Fn(MetadataToken) -> Option<String>,
	/// Decodes the IL body of the method a token refers to, for sub-pattern recursion.
	pub callee_body: &'ctx dyn Fn(MetadataToken) -> Option<Vec<DecodedInstr<'l>>>,
}

type VerifyFn = for<'l, 'ctx> fn(&[DecodedInstr<'l>], usize, &MatchContext<'l, 'ctx>) -> Option<ResolvedOpcode>;

/// Tags which concrete catalog entry a given `OpcodePattern` is, mostly for
/// diagnostics (`HandlerMatcher` logs which pattern identified an opcode).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PatternKind {
	Ldlen,
	LdelemFamily,
}

/// One catalog entry: a fixed instruction shape plus a semantic verifier.
/// Values are `const`, never mutated.
pub struct OpcodePattern {
	pub kind: PatternKind,
	pub prototype: &'static [CilOpcode],
	pub match_entire_body: bool,
	pub interchange_policy: InterchangePolicy,
	pub verify: VerifyFn,
}

/// The shape a compiled `ldlen` handler takes: `ldarg.0; callvirt
/// VM::PopStack; callvirt VMOperandType::vmethod_0; castclass System.Array;
/// stloc.0; ldarg.0; ldloc.0; callvirt System.Array::get_Length; newobj
/// VMIntOperand::.ctor(i32); callvirt VM::PushStack; ret`.
const LDLEN_PROTOTYPE: &[CilOpcode] = &[
	CilOpcode::Ldarg,
	CilOpcode::Callvirt,
	CilOpcode::Callvirt,
	CilOpcode::Castclass,
	CilOpcode::Stloc,
	CilOpcode::Ldarg,
	CilOpcode::Ldloc,
	CilOpcode::Callvirt,
	CilOpcode::Newobj,
	CilOpcode::Callvirt,
	CilOpcode::Ret,
];

fn verify_ldlen<'l, 'ctx>(body: &[DecodedInstr<'l>], index: usize, ctx: &MatchContext<'l, 'ctx>) -> Option<ResolvedOpcode> {
	let get_length_call = operand_token(&body[index + 7].opcode)?;
	let name = (ctx.method_full_name)(get_length_call)?;
	match name.as_str() {
		"System.Array::get_Length" => Some(ResolvedOpcode::Cil(CilOpcode::Ldlen)),
		// "System.Array::get_LongLength" and anything else: shape matched but
		// the call target isn't actually array length, so the verifier rejects it.
		_ => None,
	}
}

pub const LDLEN_PATTERN: OpcodePattern = OpcodePattern {
	kind: PatternKind::Ldlen,
	prototype: LDLEN_PROTOTYPE,
	match_entire_body: true,
	interchange_policy: InterchangePolicy::empty(),
	verify: verify_ldlen,
};

/// The canonical inner shape `LdelemInner` must itself match before any
/// `Ldelem_I*` handler is accepted. Only the *outer* handler's prototype is
/// pinned down precisely; the inner callee's own shape varies with the
/// element type it was compiled for, so this sub-pattern is a deliberate
/// simplification: it only requires the callee to end in a generic
/// `ldelem <token>; ret`, which is the one shape every concrete `Ldelem_I*`
/// family necessarily funnels through.
const LDELEM_INNER_PROTOTYPE: &[CilOpcode] = &[CilOpcode::Ldarg, CilOpcode::Ldarg, CilOpcode::Ldelem, CilOpcode::Ret];

fn ldelem_inner_matches(body: &[DecodedInstr]) -> bool {
	if body.len() < LDELEM_INNER_PROTOTYPE.len() {
		return false;
	}
	let start = body.len() - LDELEM_INNER_PROTOTYPE.len();
	LDELEM_INNER_PROTOTYPE.iter().enumerate().all(|(k, p)| cil::kind_matches(&body[start + k].opcode, *p))
}

/// Prefix `ldarg.0; ldtoken <Type>; call GetTypeFromHandle; callvirt
/// VM::LdelemInner; ret`.
const LDELEM_FAMILY_PROTOTYPE: &[CilOpcode] = &[CilOpcode::Ldarg, CilOpcode::Ldtoken, CilOpcode::Call, CilOpcode::Callvirt, CilOpcode::Ret];

fn verify_ldelem_family<'l, 'ctx>(body: &[DecodedInstr<'l>], index: usize, ctx: &MatchContext<'l, 'ctx>) -> Option<ResolvedOpcode> {
	let callee_token = operand_token(&body[index + 3].opcode)?;
	let callee_body = (ctx.callee_body)(callee_token)?;
	if !ldelem_inner_matches(&callee_body) {
		return None;
	}

	let element_type_token = operand_token(&body[index + 1].opcode)?;
	let element_type = (ctx.type_full_name)(element_type_token)?;
	match element_type.as_str() {
		"System.Int32" => Some(ResolvedOpcode::Cil(CilOpcode::Ldelem_I4)),
		"System.Int64" => Some(ResolvedOpcode::Cil(CilOpcode::Ldelem_I8)),
		_ => None,
	}
}

pub const LDELEM_FAMILY_PATTERN: OpcodePattern = OpcodePattern {
	kind: PatternKind::LdelemFamily,
	prototype: LDELEM_FAMILY_PROTOTYPE,
	match_entire_body: true,
	interchange_policy: InterchangePolicy::empty(),
	verify: verify_ldelem_family,
};

/// The full catalog, in the order `HandlerMatcher` tries candidates: first
/// accepted pattern wins, patterns are never consumed.
pub const CATALOG: &[&OpcodePattern] = &[&LDLEN_PATTERN, &LDELEM_FAMILY_PATTERN];

fn operand_token(op: &OpCode) -> Option<MetadataToken> {
	match op {
		OpCode::call(t)
		| OpCode::callvirt(t)
		| OpCode::newobj(t)
		| OpCode::castclass(t)
		| OpCode::ldtoken(t)
		| OpCode::ldfld(t)
		| OpCode::ldsfld(t)
		| OpCode::stfld(t)
		| OpCode::stsfld(t) => Some(*t),
		_ => None,
	}
}

/// The matching predicate: does `pattern` match `body` starting at `index`?
/// Returns the resolved opcode the verifier computed, or `None` if the shape
/// or the verifier rejected the candidate.
pub fn matches_at<'l, 'ctx>(pattern: &OpcodePattern, body: &[DecodedInstr<'l>], index: usize, ctx: &MatchContext<'l, 'ctx>) -> Option<ResolvedOpcode> {
	// `match_entire_body` only bounds that enough instructions remain (`≤`),
	// it is not an equality check against the handler's trailing length.
	// `find_match` is what actually confines `match_entire_body` patterns to
	// a single starting index (0).
	let proto = pattern.prototype;
	if proto.len() > body.len() - index {
		return None;
	}

	for (k, p) in proto.iter().enumerate() {
		let b = &body[index + k].opcode;
		if *p == CilOpcode::Nop {
			continue;
		}
		if cil::kind_matches(b, *p) {
			continue;
		}
		// The interchange escape hatch is keyed off what `b` looks like, not
		// what `p` was — see `InterchangePolicy`.
		if cil::is_ldc_i4_family(b) && pattern.interchange_policy.contains(InterchangePolicy::LDC_I4) {
			continue;
		}
		if cil::is_ldloc_family(b) {
			continue;
		}
		if cil::is_stloc_family(b) && pattern.interchange_policy.contains(InterchangePolicy::STLOC) {
			continue;
		}
		return None;
	}

	(pattern.verify)(body, index, ctx)
}

/// Tries every catalog entry in order at every valid starting index.
/// Returns the first accepted `(pattern, resolved)`.
pub fn find_match<'l, 'ctx>(body: &[DecodedInstr<'l>], ctx: &MatchContext<'l, 'ctx>) -> Option<(PatternKind, ResolvedOpcode)> {
	for pattern in CATALOG {
		let starts: Box<dyn Iterator<Item = usize>> = match pattern.match_entire_body {
			true => Box::new(std::iter::once(0)),
			false => Box::new(0..body.len()),
		};
		for i in starts {
			if i + pattern.prototype.len() > body.len() {
				continue;
			}
			if let Some(resolved) = matches_at(pattern, body, i, ctx) {
				return Some((pattern.kind, resolved));
			}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	fn token(raw: u32) -> MetadataToken {
		MetadataToken::try_from(raw).unwrap()
	}

	fn instr(opcode: OpCode<'static>) -> DecodedInstr<'static> {
		DecodedInstr { offset: 0, opcode }
	}

	#[test]
	fn ldlen_prototype_matches_and_rejects_longlength() {
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
		let no_types = |_: MetadataToken| None;
		let no_callees = |_: MetadataToken| None;
		let ctx = MatchContext { method_full_name: &get_length, type_full_name: &no_types, callee_body: &no_callees };

		assert_eq!(matches_at(&LDLEN_PATTERN, &body, 0, &ctx), Some(ResolvedOpcode::Cil(CilOpcode::Ldlen)));

		let get_long_length = |t: MetadataToken| match t.raw() {
			0x0A000003 => Some("System.Array::get_LongLength".to_string()),
			_ => Some("Some::Other".to_string()),
		};
		let ctx_rejected = MatchContext { method_full_name: &get_long_length, type_full_name: &no_types, callee_body: &no_callees };
		assert_eq!(matches_at(&LDLEN_PATTERN, &body, 0, &ctx_rejected), None);
	}

	#[test]
	fn ldelem_family_resolves_i4_and_i8_by_element_type() {
		let ldelem_inner_body = vec![instr(OpCode::ldarg_0), instr(OpCode::ldarg_1), instr(OpCode::ldelem(token(0x01000002))), instr(OpCode::ret)];

		let body = vec![
			instr(OpCode::ldarg_0),
			instr(OpCode::ldtoken(token(0x01000003))),
			instr(OpCode::call(token(0x0A000006))),
			instr(OpCode::callvirt(token(0x0A000007))),
			instr(OpCode::ret),
		];

		let no_methods = |_: MetadataToken| None;
		let int32_type = |t: MetadataToken| match t.raw() {
			0x01000003 => Some("System.Int32".to_string()),
			_ => None,
		};
		let callees = |t: MetadataToken| match t.raw() {
			0x0A000007 => Some(ldelem_inner_body.clone()),
			_ => None,
		};
		let ctx = MatchContext { method_full_name: &no_methods, type_full_name: &int32_type, callee_body: &callees };

		assert_eq!(matches_at(&LDELEM_FAMILY_PATTERN, &body, 0, &ctx), Some(ResolvedOpcode::Cil(CilOpcode::Ldelem_I4)));

		let int64_type = |t: MetadataToken| match t.raw() {
			0x01000003 => Some("System.Int64".to_string()),
			_ => None,
		};
		let ctx64 = MatchContext { method_full_name: &no_methods, type_full_name: &int64_type, callee_body: &callees };
		assert_eq!(matches_at(&LDELEM_FAMILY_PATTERN, &body, 0, &ctx64), Some(ResolvedOpcode::Cil(CilOpcode::Ldelem_I8)));
	}

	#[test]
	fn ldelem_family_rejects_when_inner_callee_does_not_match() {
		let wrong_inner = vec![instr(OpCode::nop), instr(OpCode::ret)];
		let body = vec![
			instr(OpCode::ldarg_0),
			instr(OpCode::ldtoken(token(0x01000003))),
			instr(OpCode::call(token(0x0A000006))),
			instr(OpCode::callvirt(token(0x0A000007))),
			instr(OpCode::ret),
		];
		let no_methods = |_: MetadataToken| None;
		let int32_type = |_: MetadataToken| Some("System.Int32".to_string());
		let callees = |_: MetadataToken| Some(wrong_inner.clone());
		let ctx = MatchContext { method_full_name: &no_methods, type_full_name: &int32_type, callee_body: &callees };

		assert_eq!(matches_at(&LDELEM_FAMILY_PATTERN, &body, 0, &ctx), None);
	}
}
