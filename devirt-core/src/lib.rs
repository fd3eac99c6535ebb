//! VM identification and bytecode translation pipeline for
//! Eazfuscator.NET-protected assemblies, built on the raw ECMA-335 reader in
//! `devirt_asm`.
//!
//! The pipeline runs in five stages, each module named for the stage it
//! implements: [`resource_locator`] finds the VM's key material and
//! dispatcher type, [`handler_matcher`] identifies its opcode catalog,
//! [`opcode_table`] indexes that catalog for lookup, [`resolver`] resolves
//! operand tokens against the resolver stream, and [`translator`] decodes
//! each virtualized method's body into concrete IL. [`context`] bundles the
//! state the first three stages produce for the last two to consume.

pub mod cil;
pub mod cipher;
pub mod context;
pub mod error;
pub mod handler_matcher;
pub mod key;
pub mod names;
pub mod opcode;
pub mod opcode_table;
pub mod pattern;
pub mod resolver;
pub mod resource_locator;
pub mod translator;
pub mod type_name;

pub use cipher::{CipherStream, SeekOrigin};
pub use context::DevirtContext;
pub use error::{DevirtError, MethodError, MethodReport};
pub use handler_matcher::HandlerMatcher;
pub use key::VMKey;
pub use opcode::{ResolvedOpcode, SpecialOpcode, VMOpcode, VirtualOperandType};
pub use opcode_table::OpcodeTable;
pub use resolver::{ResolvedOperand, TokenResolver};
pub use resource_locator::{locate, resource_bytes, ResourceLocatorConfig};
pub use translator::{translate_all, MethodTranslator, Operand, TranslatedInstruction, TranslatedMethod, VMExceptionHandler, VMHandlerKind};
