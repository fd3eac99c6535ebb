//! Bundles the state `ResourceLocator` → `HandlerMatcher` → `OpcodeTable`
//! produce once, so `MethodTranslator::translate`'s callers don't have to
//! carry four separate values across every per-method call.

use devirt_asm::raw::assembly::Assembly;
use devirt_asm::raw::indices::metadata_token::MetadataToken;

use crate::key::VMKey;
use crate::opcode_table::OpcodeTable;

/// Everything identification produced for one protected assembly, before any
/// method is translated. Built once per run; translation only reads from it.
pub struct DevirtContext<'l> {
	pub assembly: &'l Assembly<'l>,
	pub key: VMKey,
	/// The VM dispatcher's own `TypeDef` token (`ResourceLocator::locate`'s
	/// second return value).
	pub vm_type: MetadataToken,
	pub opcode_table: OpcodeTable,
}

impl<'l> DevirtContext<'l> {
	pub fn new(assembly: &'l Assembly<'l>, key: VMKey, vm_type: MetadataToken, opcode_table: OpcodeTable) -> Self {
		Self { assembly, key, vm_type, opcode_table }
	}
}
