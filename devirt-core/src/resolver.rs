//! Operand token resolution against the resolver `CipherStream`.
//!
//! Unlike `devirt_asm`'s raw metadata tokens, an operand offset on the
//! virtual bytecode stream does not index any metadata table directly — it
//! points into the resolver stream's own wire format, a sequence of
//! length-prefixed UTF-8 records (one per distinct operand the original
//! compiler emitted). `TokenResolver` reads and parses that record, and
//! `ResolvedOperand` is the parsed result a `MethodTranslator` embeds
//! directly in its output, so the devirtualized IL never needs to go back
//! through metadata resolution again.

use crate::cipher::{CipherStream, SeekOrigin};
use crate::error::MethodError;

/// What kind of record precedes the payload, tagged by a single byte so the
/// resolver stream can carry heterogeneous operand kinds back to back.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RecordKind {
	Type,
	Member,
	String,
	Method,
}

impl RecordKind {
	fn from_tag(tag: u8) -> Result<Self, MethodError> {
		match tag {
			0 => Ok(Self::Type),
			1 => Ok(Self::Member),
			2 => Ok(Self::String),
			3 => Ok(Self::Method),
			other => Err(MethodError::UnknownOperandType(other)),
		}
	}
}

/// A resolved `InlineTok`-shaped operand, carrying names rather than raw
/// metadata tokens: the resolver stream is a separate namespace from the
/// protected assembly's own metadata tables, so there is no token to hand
/// back.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResolvedOperand {
	Type(String),
	Member { owner: String, name: String },
	String(String),
	Method(u32),
}

/// Reads records from a resolver `CipherStream` by absolute byte offset.
/// Stateless beyond the stream itself: every call seeks first, so callers
/// may resolve offsets in any order, including out of the order the
/// original instructions appear in (`MethodTranslator` resolves operands as
/// it decodes each instruction, one seek+read pair at a time).
pub struct TokenResolver {
	stream: CipherStream,
}

impl TokenResolver {
	pub fn new(stream: CipherStream) -> Self {
		Self { stream }
	}

	/// Reads one length-prefixed UTF-8 string starting at the stream's
	/// current position.
	fn read_record_string(&mut self) -> Result<String, MethodError> {
		let len = self.stream.read_u32()? as usize;
		let bytes = self.stream.read_vec(len)?;
		String::from_utf8(bytes).map_err(|_| MethodError::DecryptionOverflow)
	}

	/// Resolves the record at `offset`, a value a virtual instruction's
	/// `InlineTok`-shaped operand carries verbatim.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
	pub fn resolve_at(&mut self, offset: u32) -> Result<ResolvedOperand, MethodError> {
		self.stream.seek(offset as i64, SeekOrigin::Begin)?;
		let tag = self.stream.read_u8()?;
		match RecordKind::from_tag(tag)? {
			RecordKind::Type => Ok(ResolvedOperand::Type(self.read_record_string()?)),
			RecordKind::Member => {
				let owner = self.read_record_string()?;
				let name = self.read_record_string()?;
				Ok(ResolvedOperand::Member { owner, name })
			}
			RecordKind::String => Ok(ResolvedOperand::String(self.read_record_string()?)),
			RecordKind::Method => Ok(ResolvedOperand::Method(self.stream.read_u32()?)),
		}
	}
}

#[cfg(test)]
mod tests {
	use num_bigint::BigUint;

	use super::*;
	use crate::key::VMKey;

	/// Mirrors `cipher::tests::identity_key`: `exponent = 1` makes `modpow`
	/// the identity, so ciphertext bytes can be written as plaintext blocks
	/// directly.
	fn identity_key(block_size: usize) -> VMKey {
		let modulus = BigUint::from(256u32).pow(block_size as u32 + 1);
		VMKey { modulus, exponent: BigUint::from(1u32), session_key: vec![] }
	}

	fn blocks(payloads: &[&[u8]], block_size: usize) -> Vec<u8> {
		let mut out = Vec::new();
		for payload in payloads {
			assert!(payload.len() < block_size);
			let mut block = vec![0u8; block_size];
			block[0] = payload.len() as u8;
			block[1..1 + payload.len()].copy_from_slice(payload);
			out.extend(block);
		}
		out
	}

	fn record_string_bytes(s: &str) -> Vec<u8> {
		let mut out = (s.len() as u32).to_le_bytes().to_vec();
		out.extend(s.as_bytes());
		out
	}

	#[test]
	fn resolves_a_type_record() {
		let key = identity_key(24);
		let mut record = vec![0u8];
		record.extend(record_string_bytes("System.String"));
		let payloads: Vec<&[u8]> = record.chunks(23).collect();
		let ciphertext = blocks(&payloads, key.block_size());
		let mut resolver = TokenResolver::new(CipherStream::new(ciphertext, &key));
		assert_eq!(resolver.resolve_at(0).unwrap(), ResolvedOperand::Type("System.String".into()));
	}

	#[test]
	fn resolves_a_method_record() {
		let key = identity_key(24);
		let mut record = vec![3u8];
		record.extend(42u32.to_le_bytes());
		let payloads: Vec<&[u8]> = record.chunks(23).collect();
		let ciphertext = blocks(&payloads, key.block_size());
		let mut resolver = TokenResolver::new(CipherStream::new(ciphertext, &key));
		assert_eq!(resolver.resolve_at(0).unwrap(), ResolvedOperand::Method(42));
	}

	#[test]
	fn unknown_record_tag_is_unknown_operand_type() {
		let key = identity_key(4);
		let ciphertext = blocks(&[&[9u8]], key.block_size());
		let mut resolver = TokenResolver::new(CipherStream::new(ciphertext, &key));
		assert_eq!(resolver.resolve_at(0), Err(MethodError::UnknownOperandType(9)));
	}
}
