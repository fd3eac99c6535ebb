use std::fmt::{Debug, Display, Formatter};

/// A failure that aborts the whole pipeline: without these, no method can be
/// translated at all.
#[derive(Debug)]
pub enum DevirtError {
	/// No embedded resource matched the name read from the getter method.
	ResourceNotFound,
	/// The RVA-bound session key field could not be located or read.
	KeyUnavailable,
	/// The modulus string was absent and the build-specific fallback was also empty.
	ModulusMissing,
	/// The VM's declaring type could not be located.
	DispatcherNotFound,
	IoError(std::io::Error),
}

impl From<std::io::Error> for DevirtError {
	fn from(value: std::io::Error) -> Self {
		Self::IoError(value)
	}
}

impl Display for DevirtError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::ResourceNotFound => write!(f, "no embedded resource matches the VM stream getter"),
			Self::KeyUnavailable => write!(f, "RVA-bound session key bytes are unavailable"),
			Self::ModulusMissing => write!(f, "modulus string is missing and no fallback applies"),
			Self::DispatcherNotFound => write!(f, "VM dispatcher type could not be located"),
			Self::IoError(e) => write!(f, "I/O error: {e}"),
		}
	}
}

impl std::error::Error for DevirtError {}

/// A failure confined to a single virtualized method. The offending method is
/// skipped and recorded in a [`MethodReport`]; every other method still
/// translates.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MethodError {
	UnknownOperandType(u8),
	BranchMisaligned(u32),
	UnsupportedHandlerKind(u8),
	DecryptionOverflow,
	/// The method references a virtual opcode that [`HandlerMatcher`](crate::handler_matcher::HandlerMatcher)
	/// left [`Unidentified`](crate::opcode::ResolvedOpcode::Unidentified).
	UnidentifiedOpcode(u32),
}

impl Display for MethodError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::UnknownOperandType(code) => write!(f, "unknown virtual_operand_type {code:#04x}"),
			Self::BranchMisaligned(offset) => write!(f, "branch target {offset:#010x} does not land on an instruction boundary"),
			Self::UnsupportedHandlerKind(kind) => write!(f, "unsupported exception handler kind {kind}"),
			Self::DecryptionOverflow => write!(f, "decrypted block payload exceeds the block's plaintext capacity"),
			Self::UnidentifiedOpcode(code) => write!(f, "virtual opcode {code:#04x} was never identified by the handler matcher"),
		}
	}
}

/// Accumulates per-method failures across a translation run so they can be
/// rendered once translation completes, instead of interrupting it.
#[derive(Default)]
pub struct MethodReport {
	failures: Vec<(u32, MethodError)>,
}

impl MethodReport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record(&mut self, method_token: u32, error: MethodError) {
		self.failures.push((method_token, error));
	}

	pub fn failures(&self) -> &[(u32, MethodError)] {
		&self.failures
	}

	pub fn is_empty(&self) -> bool {
		self.failures.is_empty()
	}

	pub fn merge(&mut self, other: MethodReport) {
		self.failures.extend(other.failures);
	}
}

impl Debug for MethodReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_list().entries(self.failures.iter().map(|(token, err)| format_args!("{token:#010X}: {err:?}"))).finish()
	}
}
