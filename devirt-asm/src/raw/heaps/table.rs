use std::any::Any;
use std::fmt::Debug;
use std::io::{Cursor, Error, ErrorKind, Read};

use bitflags::bitflags;

use devirt_asm_derive::{FromRepr, Table};

use crate::raw::heaps::{BlobIndex, GuidIndex, StringIndex};
use crate::raw::indices::coded_index::{
	CustomAttributeType, HasConstant, HasCustomAttribute, HasDeclSecurity, HasFieldMarshal, HasSemantics, Implementation, MemberForwarded,
	MemberRefParent, MethodDefOrRef, ResolutionScope, TypeDefOrRef, TypeOrMethodDef,
};
use crate::raw::indices::sizes::*;
use crate::utilities::{enumerate_set_bits, impl_from_byte_stream, FromByteStream};

/// Reads a single table-row field. Plain POD fields forward to [`FromByteStream`]
/// with `()` deps; heap indices and coded indices need the shared [`IndexSizes`]
/// to know how many bytes to consume, so they get a dedicated impl below.
pub trait TableFieldRead: Sized {
	fn read_field(stream: &mut Cursor<&[u8]>, sizes: &IndexSizes) -> std::io::Result<Self>;
}

macro_rules! impl_table_field_read_plain {
	($($ty: ty),*) => {$(
		impl TableFieldRead for $ty {
			#[inline]
			fn read_field(stream: &mut Cursor<&[u8]>, _: &IndexSizes) -> std::io::Result<Self> {
				<$ty as FromByteStream>::read(stream, &())
			}
		}
	)*};
}

macro_rules! impl_table_field_read_sized {
	($($ty: ty),*) => {$(
		impl TableFieldRead for $ty {
			#[inline]
			fn read_field(stream: &mut Cursor<&[u8]>, sizes: &IndexSizes) -> std::io::Result<Self> {
				<$ty as FromByteStream>::read(stream, sizes)
			}
		}
	)*};
}

impl_table_field_read_plain!(u8, u16, u32, u64, i8, i16, i32, i64, [u8; 2]);
impl_table_field_read_sized!(
	StringIndex, BlobIndex, GuidIndex, TypeDefOrRef, HasConstant, HasCustomAttribute, HasFieldMarshal, HasSemantics, Implementation,
	MemberForwarded, MemberRefParent, MethodDefOrRef, TypeOrMethodDef, CustomAttributeType, ResolutionScope, HasDeclSecurity
);

macro_rules! define_row_index {
	($($id: ident => $table: ident),* $(,)?) => {$(
		#[repr(transparent)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
		pub struct $id(pub usize);

		impl TableFieldRead for $id {
			fn read_field(stream: &mut Cursor<&[u8]>, sizes: &IndexSizes) -> std::io::Result<Self> {
				let size = sizes.tables[TableKind::$table as usize];
				let mut bytes = 0usize.to_ne_bytes();
				stream.read_exact(&mut bytes[..size])?;
				Ok(Self(usize::from_le_bytes(bytes)))
			}
		}
	)*};
}

define_row_index! {
	FieldIndex => Field,
	MethodDefIndex => MethodDef,
	ParamIndex => Param,
	TypeDefIndex => TypeDef,
	EventIndex => Event,
	PropertyIndex => Property,
	ModuleRefIndex => ModuleRef,
	GenericParamIndex => GenericParam,
	AssemblyRefIndex => AssemblyRef,
}

#[derive(Debug)]
pub struct TableHeap<'l> {
	major_version: u8,
	minor_version: u8,
	idx_sizes: std::sync::Arc<IndexSizes>,
	tables: Vec<Box<dyn Table + 'l>>,
}

impl<'l> TableHeap<'l> {
	pub fn minor_version(&self) -> u8 {
		self.minor_version
	}
	pub fn major_version(&self) -> u8 {
		self.major_version
	}
	pub fn index_sizes(&self) -> &std::sync::Arc<IndexSizes> {
		&self.idx_sizes
	}
	pub fn get_table<T: Table + 'static>(&self) -> Option<&T> {
		self.tables.iter().find_map(|table| table.as_any().downcast_ref::<T>())
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn read(data: &'l [u8]) -> std::io::Result<Self> {
		#[repr(C)]
		#[derive(Copy, Clone)]
		struct Header {
			reserved_0: u32,
			major_version: u8,
			minor_version: u8,
			heap_sizes: u8,
			reserved_1: u8,
			valid: u64,
			sorted: u64,
		}

		impl_from_byte_stream!(Header);

		let mut stream = Cursor::new(data);
		let Header { heap_sizes, valid, minor_version, major_version, .. } = Header::read(&mut stream, &())?;

		let table_count = valid.count_ones() as usize;
		let mut table_sizes = vec![0u32; 64];

		for i in enumerate_set_bits(valid) {
			let mut bytes = 0u32.to_ne_bytes();
			stream.read_exact(&mut bytes)?;
			table_sizes[i] = u32::from_le_bytes(bytes);
		}

		let idx_sizes = std::sync::Arc::new(IndexSizes::new(heap_sizes, table_sizes[..55].try_into().unwrap()));

		let mut tables: Vec<Box<dyn Table>> = Vec::with_capacity(table_count);
		for i in enumerate_set_bits(valid) {
			let len = table_sizes[i] as usize;
			let Some(kind) = TableKind::from_repr(i) else {
				return Err(ErrorKind::InvalidData.into());
			};

			tables.push(match kind {
				TableKind::Module => Box::new(ModuleTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::TypeRef => Box::new(TypeRefTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::TypeDef => Box::new(TypeDefTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::FieldPtr => Box::new(FieldPtrTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::Field => Box::new(FieldTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::MethodPtr => Box::new(MethodPtrTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::MethodDef => Box::new(MethodDefTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::ParamPtr => Box::new(ParamPtrTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::Param => Box::new(ParamTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::InterfaceImpl => Box::new(InterfaceImplTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::MemberRef => Box::new(MemberRefTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::Constant => Box::new(ConstantTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::CustomAttribute => Box::new(CustomAttributeTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::FieldMarshal => Box::new(FieldMarshalTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::DeclSecurity => Box::new(DeclSecurityTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::ClassLayout => Box::new(ClassLayoutTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::FieldLayout => Box::new(FieldLayoutTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::StandAloneSig => Box::new(StandAloneSigTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::EventMap => Box::new(EventMapTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::EventPtr => Box::new(EventPtrTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::Event => Box::new(EventTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::PropertyMap => Box::new(PropertyMapTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::PropertyPtr => Box::new(PropertyPtrTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::Property => Box::new(PropertyTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::MethodSemantics => Box::new(MethodSemanticsTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::MethodImpl => Box::new(MethodImplTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::ModuleRef => Box::new(ModuleRefTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::TypeSpec => Box::new(TypeSpecTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::ImplMap => Box::new(ImplMapTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::FieldRVA => Box::new(FieldRVATable::read(&mut stream, &idx_sizes, len)?),
				TableKind::EncLog => Box::new(EncLogTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::EncMap => Box::new(EncMapTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::Assembly => Box::new(AssemblyTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::AssemblyProcessor => Box::new(AssemblyProcessorTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::AssemblyOS => Box::new(AssemblyOSTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::AssemblyRef => Box::new(AssemblyRefTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::AssemblyRefProcessor => Box::new(AssemblyRefProcessorTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::AssemblyRefOS => Box::new(AssemblyRefOSTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::File => Box::new(FileTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::ExportedType => Box::new(ExportedTypeTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::ManifestResource => Box::new(ManifestResourceTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::NestedClass => Box::new(NestedClassTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::GenericParam => Box::new(GenericParamTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::MethodSpec => Box::new(MethodSpecTable::read(&mut stream, &idx_sizes, len)?),
				TableKind::GenericParamConstraint => Box::new(GenericParamConstraintTable::read(&mut stream, &idx_sizes, len)?),
				// Portable PDB tables: Eazfuscator.NET targets release builds, which never
				// carry embedded debug metadata, so these are out of scope.
				TableKind::Document
				| TableKind::MethodDebugInformation
				| TableKind::LocalScope
				| TableKind::LocalVariable
				| TableKind::LocalConstant
				| TableKind::ImportScope
				| TableKind::StateMachineMethod
				| TableKind::CustomDebugInformation => {
					return Err(Error::new(ErrorKind::Unsupported, "portable PDB metadata tables are not supported"));
				},
			});
		}

		Ok(Self { major_version, minor_version, idx_sizes, tables })
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum TableKind {
	Module = 0x00,
	TypeRef = 0x01,
	TypeDef = 0x02,
	FieldPtr = 0x03,
	Field = 0x04,
	MethodPtr = 0x05,
	MethodDef = 0x06,
	ParamPtr = 0x07,
	Param = 0x08,
	InterfaceImpl = 0x09,
	MemberRef = 0x0a,
	Constant = 0x0b,
	CustomAttribute = 0x0c,
	FieldMarshal = 0x0d,
	DeclSecurity = 0x0e,
	ClassLayout = 0x0f,
	FieldLayout = 0x10,
	StandAloneSig = 0x11,
	EventMap = 0x12,
	EventPtr = 0x13,
	Event = 0x14,
	PropertyMap = 0x15,
	PropertyPtr = 0x16,
	Property = 0x17,
	MethodSemantics = 0x18,
	MethodImpl = 0x19,
	ModuleRef = 0x1a,
	TypeSpec = 0x1b,
	ImplMap = 0x1c,
	FieldRVA = 0x1d,
	EncLog = 0x1e,
	EncMap = 0x1f,
	Assembly = 0x20,
	AssemblyProcessor = 0x21,
	AssemblyOS = 0x22,
	AssemblyRef = 0x23,
	AssemblyRefProcessor = 0x24,
	AssemblyRefOS = 0x25,
	File = 0x26,
	ExportedType = 0x27,
	ManifestResource = 0x28,
	NestedClass = 0x29,
	GenericParam = 0x2a,
	MethodSpec = 0x2b,
	GenericParamConstraint = 0x2c,

	Document = 0x30,
	MethodDebugInformation = 0x31,
	LocalScope = 0x32,
	LocalVariable = 0x33,
	LocalConstant = 0x34,
	ImportScope = 0x35,
	StateMachineMethod = 0x36,
	CustomDebugInformation = 0x37,
}

#[allow(clippy::len_without_is_empty)]
pub trait Table: Debug {
	fn len(&self) -> usize;
	fn kind(&self) -> TableKind;
	fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Table)]
pub struct Module {
	pub generation: u16,
	pub name: StringIndex,
	pub mv_id: GuidIndex,
	pub enc_id: GuidIndex,
	pub enc_base_id: GuidIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct TypeAttributes: u32 {
		const VISIBILITY_MASK = 0x00000007;
		const NOT_PUBLIC = 0x00000000;
		const PUBLIC = 0x00000001;
		const NESTED_PUBLIC = 0x00000002;
		const NESTED_PRIVATE = 0x00000003;
		const NESTED_FAMILY = 0x00000004;
		const NESTED_ASSEMBLY = 0x00000005;
		const NESTED_FAMILY_AND_ASSEMBLY = 0x00000006;
		const NESTED_FAMILY_OR_ASSEMBLY = 0x00000007;

		const LAYOUT_MASK = 0x00000018;
		const AUTO_LAYOUT = 0x00000000;
		const SEQUENTIAL_LAYOUT = 0x00000008;
		const EXPLICIT_LAYOUT = 0x00000010;

		const CLASS_SEMANTICS_MASK = 0x00000020;
		const CLASS = 0x00000000;
		const INTERFACE = 0x00000020;

		const ABSTRACT =  0x00000080;
		const SEALED =  0x00000100;
		const SPECIAL_NAME =  0x00000400;

		const IMPORTED = 0x00001000;
		const SERIALIZABLE = 0x00002000;

		const STRING_FORMAT_MASK = 0x00030000;
		const ANSI_CLASS =  0x00000000;
		const UNICODE_CLASS =  0x00010000;
		const AUTO_CLASS =  0x00020000;
		const CUSTOM_FORMAT_CLASS = 0x00030000;
		const CUSTOM_STRING_FORMAT_MASK = 0x00C00000;

		const BeforeFieldInit = 0x00100000;

		const RTSpecialName = 0x00000800;
		const HasSecurity = 0x00040000;
		const IsTypeForwarder = 0x00200000;
	}
}

impl_from_byte_stream!(TypeAttributes);
impl_table_field_read_plain!(TypeAttributes);

#[derive(Debug, Clone, Table)]
pub struct TypeDef {
	pub flags: TypeAttributes,
	pub type_name: StringIndex,
	pub type_namespace: StringIndex,
	pub extends: TypeDefOrRef,
	pub field_list: FieldIndex,
	pub method_list: MethodDefIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct FieldAttributes: u16 {
		const FIELD_ACCESS_MASK = 0x0007;
		const COMPILER_CONTROLLED = 0x0000;
		const PRIVATE = 0x0001;
		const FAMILY_AND_ASSEMBLY = 0x0002;
		const ASSEMBLY = 0x0003;
		const FAMILY = 0x0004;
		const FAMILY_OR_ASSEMBLY = 0x0005;
		const PUBLIC = 0x0006;
		const STATIC = 0x0010;
		const INIT_ONLY = 0x0020;
		const LITERAL = 0x0040;
		const NOT_SERIALIZED = 0x0080;
		const SPECIAL_NAME = 0x0200;

		const PINVOKE_IMPL = 0x2000;

		const RT_SPECIAL_NAME = 0x0400;
		const HAS_FIELD_MARSHAL = 0x1000;
		const HAS_DEFAULT = 0x8000;
		const HAS_FIELD_RVA = 0x0100;
	}
}

impl_from_byte_stream!(FieldAttributes);
impl_table_field_read_plain!(FieldAttributes);

#[derive(Debug, Clone, Table)]
pub struct Field {
	pub flags: FieldAttributes,
	pub name: StringIndex,
	pub signature: BlobIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodAttributes: u16 {
		const MEMBER_ACCESS_MASK = 0x0007;
		const PRIVATE_SCOPE = 0x0000;
		const PRIVATE = 0x0001;
		const FAM_AND_ASSEM = 0x0002;
		const ASSEM = 0x0003;
		const FAMILY = 0x0004;
		const FAM_OR_ASSEM = 0x0005;
		const PUBLIC = 0x0006;
		const STATIC = 0x0010;
		const FINAL = 0x0020;
		const VIRTUAL = 0x0040;
		const HIDE_BY_SIG = 0x0080;
		const VTABLE_LAYOUT_MASK = 0x0100;
		const REUSE_SLOT = 0x0000;
		const NEW_SLOT = 0x0100;
		const STRICT = 0x0200;
		const ABSTRACT = 0x0400;
		const SPECIAL_NAME = 0x0800;
		const PINVOKE_IMPL = 0x2000;
		const RT_SPECIAL_NAME = 0x1000;
		const HAS_SECURITY = 0x4000;
		const REQUIRE_SEC_OBJECT = 0x8000;
	}

	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodImplAttributes: u16 {
		const CODE_TYPE_MASK = 0x0003;
		const IL = 0x0000;
		const NATIVE = 0x0001;
		const OPTIL = 0x0002;
		const RUNTIME = 0x0003;
		const MANAGED_MASK = 0x0004;
		const UNMANAGED = 0x0004;
		const MANAGED = 0x0000;
		const FORWARD_REF = 0x0010;
		const PRESERVE_SIG = 0x0080;
		const INTERNAL_CALL = 0x1000;
		const SYNCHRONIZED = 0x0020;
		const NO_INLINING = 0x0008;
		const MAX_METHOD_IMPL_VAL = 0xffff;
		const NO_OPTIMIZATION = 0x0040;
	}
}

impl_from_byte_stream!(MethodAttributes);
impl_from_byte_stream!(MethodImplAttributes);
impl_table_field_read_plain!(MethodAttributes, MethodImplAttributes);

#[derive(Debug, Clone, Table)]
pub struct MethodDef {
	pub rva: u32,
	pub impl_flags: MethodImplAttributes,
	pub flags: MethodAttributes,
	pub name: StringIndex,
	pub signature: BlobIndex,
	pub param_list: ParamIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ParamAttributes: u16 {
		const IN = 0x0001;
		const OUT = 0x0002;
		const OPTIONAL = 0x0010;
		const HAS_DEFAULT = 0x1000;
		const HAS_FIELD_MARSHAL = 0x2000;
	}
}

impl_from_byte_stream!(ParamAttributes);
impl_table_field_read_plain!(ParamAttributes);

#[derive(Debug, Clone, Table)]
pub struct Param {
	pub flags: ParamAttributes,
	pub sequence: u16,
	pub name: StringIndex,
}

#[derive(Debug, Clone, Table)]
pub struct InterfaceImpl {
	pub class: TypeDefIndex,
	pub interface: TypeDefOrRef,
}

#[derive(Debug, Clone, Table)]
pub struct MemberRef {
	pub class: MemberRefParent,
	pub name: StringIndex,
	pub signature: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct Constant {
	pub ty: [u8; 2],
	pub parent: HasConstant,
	pub value: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct CustomAttribute {
	pub parent: HasCustomAttribute,
	pub ty: CustomAttributeType,
	pub value: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct FieldMarshal {
	pub parent: HasFieldMarshal,
	pub native_type: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct ClassLayout {
	pub packing_size: u16,
	pub class_size: u32,
	pub parent: TypeDefIndex,
}

#[derive(Debug, Clone, Table)]
pub struct FieldLayout {
	pub offset: u32,
	pub field: FieldIndex,
}

#[derive(Debug, Clone, Table)]
pub struct StandAloneSig {
	pub signature: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct EventMap {
	pub parent: TypeDefIndex,
	pub event_list: EventIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct EventAttributes: u16 {
		const SPECIAL_NAME = 0x0200;
		const RT_SPECIAL_NAME = 0x0400;
	}
}

impl_from_byte_stream!(EventAttributes);
impl_table_field_read_plain!(EventAttributes);

#[derive(Debug, Clone, Table)]
pub struct Event {
	pub flags: EventAttributes,
	pub name: StringIndex,
	pub ty: TypeDefOrRef,
}

#[derive(Debug, Clone, Table)]
pub struct PropertyMap {
	pub parent: TypeDefIndex,
	pub property_list: PropertyIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct PropertyAttributes: u16 {
		const SPECIAL_NAME = 0x0200;
		const RT_SPECIAL_NAME = 0x0400;
		const HAS_DEFAULT = 0x1000;
	}
}

impl_from_byte_stream!(PropertyAttributes);
impl_table_field_read_plain!(PropertyAttributes);

#[derive(Debug, Clone, Table)]
pub struct Property {
	pub flags: PropertyAttributes,
	pub name: StringIndex,
	pub ty: BlobIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodSemanticsAttributes: u16 {
		const SETTER = 0x0001;
		const GETTER = 0x0002;
		const OTHER = 0x0004;
		const ADD_ON = 0x0008;
		const REMOVE_ON = 0x0010;
		const FIRE = 0x0020;
	}
}

impl_from_byte_stream!(MethodSemanticsAttributes);
impl_table_field_read_plain!(MethodSemanticsAttributes);

#[derive(Debug, Clone, Table)]
pub struct MethodSemantics {
	pub flags: MethodSemanticsAttributes,
	pub method: MethodDefIndex,
	pub association: HasSemantics,
}

#[derive(Debug, Clone, Table)]
pub struct MethodImpl {
	pub class: TypeDefIndex,
	pub body: MethodDefOrRef,
	pub declaration: MethodDefOrRef,
}

#[derive(Debug, Clone, Table)]
pub struct ModuleRef {
	pub name: StringIndex,
}

#[derive(Debug, Clone, Table)]
pub struct TypeSpec {
	pub signature: BlobIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct PInvokeAttributes: u16 {
		const NO_MANGLE = 0x0001;
		const CHAR_SET_ANSI = 0x0002;
		const CHAR_SET_UNICODE = 0x0004;
		const CHAR_SET_AUTO = 0x0006;
		const SUPPORTS_LAST_ERROR = 0x0040;
		const CALL_CONV_WINAPI = 0x0100;
		const CALL_CONV_CDECL = 0x0200;
		const CALL_CONV_STDCALL = 0x0300;
		const CALL_CONV_THISCALL = 0x0400;
		const CALL_CONV_FASTCALL = 0x0500;
	}
}

impl_from_byte_stream!(PInvokeAttributes);
impl_table_field_read_plain!(PInvokeAttributes);

#[derive(Debug, Clone, Table)]
pub struct ImplMap {
	pub flags: PInvokeAttributes,
	pub member_forwarded: MemberForwarded,
	pub import_name: StringIndex,
	pub import_scope: ModuleRefIndex,
}

#[derive(Debug, Clone, Table)]
pub struct FieldRVA {
	pub rva: u32,
	pub field: FieldIndex,
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum AssemblyHashAlgorithm {
	None = 0x0000,
	MD5 = 0x8003,
	SHA1 = 0x8004,
	SHA256 = 0x800C,
	SHA384 = 0x800D,
	SHA512 = 0x800E,
}

impl FromByteStream for AssemblyHashAlgorithm {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let value = u32::read(stream, &())?;
		Self::from_repr(value).ok_or(Error::from(ErrorKind::InvalidData))
	}
}
impl_table_field_read_plain!(AssemblyHashAlgorithm);

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct AssemblyFlags: u32 {
		const PUBLIC_KEY = 0x0001;
		const RETARGETABLE = 0x0100;
		const DISABLE_JIT_COMPILE_OPTIMIZER = 0x4000;
		const ENABLE_JIT_COMPILE_TRACKING = 0x8000;
	}
}

impl_from_byte_stream!(AssemblyFlags);
impl_table_field_read_plain!(AssemblyFlags);

#[derive(Debug, Clone, Table)]
pub struct Assembly {
	pub hash_algorithm: AssemblyHashAlgorithm,
	pub major_version: u16,
	pub minor_version: u16,
	pub build_number: u16,
	pub revision_number: u16,
	pub flags: AssemblyFlags,
	pub public_key: BlobIndex,
	pub name: StringIndex,
	pub culture: StringIndex,
}

#[derive(Debug, Clone, Table)]
pub struct AssemblyRef {
	pub major_version: u16,
	pub minor_version: u16,
	pub build_number: u16,
	pub revision_number: u16,
	pub flags: AssemblyFlags,
	pub public_key_or_token: BlobIndex,
	pub name: StringIndex,
	pub culture: StringIndex,
	pub hash_value: BlobIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ManifestResourceAttributes: u32 {
		const VISIBILITY_MASK = 0x0007;
		const PUBLIC = 0x0001;
		const PRIVATE = 0x0002;
	}
}

impl_from_byte_stream!(ManifestResourceAttributes);
impl_table_field_read_plain!(ManifestResourceAttributes);

#[derive(Debug, Clone, Table)]
pub struct ManifestResource {
	pub offset: u32,
	pub flags: ManifestResourceAttributes,
	pub name: StringIndex,
	pub implementation: Implementation,
}

#[derive(Debug, Clone, Table)]
pub struct NestedClass {
	pub nested_class: TypeDefIndex,
	pub enclosing_class: TypeDefIndex,
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct GenericParamAttributes: u16 {
		const VARIANCE_MASK = 0x0003;
		const NONE = 0x0000;
		const COVARIANT = 0x0001;
		const CONTRAVARIANT = 0x0002;
		const SPECIAL_CONSTRAINT_MASK = 0x001C;
		const REFERENCE_TYPE_CONSTRAINT = 0x0004;
		const NOT_NULLABLE_VALUE_TYPE_CONSTRAINT = 0x0008;
		const DEFAULT_CONSTRUCTOR_CONSTRAINT = 0x0010;
	}
}

impl_from_byte_stream!(GenericParamAttributes);
impl_table_field_read_plain!(GenericParamAttributes);

#[derive(Debug, Clone, Table)]
pub struct GenericParam {
	pub number: u16,
	pub flags: GenericParamAttributes,
	pub owner: TypeOrMethodDef,
	pub name: StringIndex,
}

#[derive(Debug, Clone, Table)]
pub struct MethodSpec {
	pub method: MethodDefOrRef,
	pub instantiation: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct GenericParamConstraint {
	pub owner: GenericParamIndex,
	pub constraint: TypeDefOrRef,
}

#[derive(Debug, Clone, Table)]
pub struct TypeRef {
	pub resolution_scope: ResolutionScope,
	pub type_name: StringIndex,
	pub type_namespace: StringIndex,
}

#[derive(Debug, Clone, Table)]
pub struct FieldPtr {
	pub field: FieldIndex,
}

#[derive(Debug, Clone, Table)]
pub struct MethodPtr {
	pub method: MethodDefIndex,
}

#[derive(Debug, Clone, Table)]
pub struct ParamPtr {
	pub param: ParamIndex,
}

#[derive(Debug, Clone, Table)]
pub struct EventPtr {
	pub event: EventIndex,
}

#[derive(Debug, Clone, Table)]
pub struct PropertyPtr {
	pub property: PropertyIndex,
}

#[derive(Debug, Clone, Table)]
pub struct DeclSecurity {
	pub action: u16,
	pub parent: HasDeclSecurity,
	pub permission_set: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct EncLog {
	pub token: u32,
	pub func_code: u32,
}

#[derive(Debug, Clone, Table)]
pub struct EncMap {
	pub token: u32,
}

#[derive(Debug, Clone, Table)]
pub struct AssemblyProcessor {
	pub processor: u32,
}

#[derive(Debug, Clone, Table)]
pub struct AssemblyOS {
	pub os_platform_id: u32,
	pub os_major_version: u32,
	pub os_minor_version: u32,
}

#[derive(Debug, Clone, Table)]
pub struct AssemblyRefProcessor {
	pub processor: u32,
	pub assembly_ref: AssemblyRefIndex,
}

#[derive(Debug, Clone, Table)]
pub struct AssemblyRefOS {
	pub os_platform_id: u32,
	pub os_major_version: u32,
	pub os_minor_version: u32,
	pub assembly_ref: AssemblyRefIndex,
}

#[derive(Debug, Clone, Table)]
pub struct File {
	pub flags: u32,
	pub name: StringIndex,
	pub hash_value: BlobIndex,
}

#[derive(Debug, Clone, Table)]
pub struct ExportedType {
	pub flags: TypeAttributes,
	pub type_def_id: u32,
	pub type_name: StringIndex,
	pub type_namespace: StringIndex,
	pub implementation: Implementation,
}
