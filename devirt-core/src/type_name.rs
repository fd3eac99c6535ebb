//! Assembly-qualified type names and the modifier stack used to resolve
//! operand tokens back to concrete types.

use devirt_asm::raw::heaps::table::{AssemblyRefTable, NestedClassTable, TableHeap, TypeDefTable, TypeRefTable};
use devirt_asm::raw::heaps::StringHeap;
use devirt_asm::raw::il::TypeSignatureTag;
use devirt_asm::raw::indices::metadata_token::{MetadataToken, MetadataTokenKind};

/// One modifier applied to a type in declaration order (`[]`, `*`, `&`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeModifier {
	SzArray,
	Pointer,
	Reference,
}

impl TypeModifier {
	fn suffix(self) -> &'static str {
		match self {
			Self::SzArray => "[]",
			Self::Pointer => "*",
			Self::Reference => "&",
		}
	}
}

/// A parsed, assembly-qualified type name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TypeName {
	/// Owning assembly's simple name, when known (a `TypeRef` resolved through
	/// an `AssemblyRef`); `None` for types declared in the current assembly.
	pub assembly: Option<String>,
	pub namespace: String,
	/// Enclosing-to-innermost chain of simple names; a non-nested type has
	/// exactly one entry. Joined with `+`, matching ECMA-335's nested-type
	/// naming convention.
	pub nested_path: Vec<String>,
	/// Applied in declaration order, outermost modifier last (so rendering
	/// appends them in the order they were pushed).
	pub modifiers: Vec<TypeModifier>,
}

impl TypeName {
	fn simple(namespace: String, name: String) -> Self {
		Self { assembly: None, namespace, nested_path: vec![name], modifiers: Vec::new() }
	}

	pub fn push_modifier(&mut self, modifier: TypeModifier) {
		self.modifiers.push(modifier);
	}

	/// `Namespace.Outer+Inner[]*`, the form operand verifiers compare against.
	pub fn full_name(&self) -> String {
		let mut out = String::new();
		if !self.namespace.is_empty() {
			out.push_str(&self.namespace);
			out.push('.');
		}
		out.push_str(&self.nested_path.join("+"));
		for modifier in &self.modifiers {
			out.push_str(modifier.suffix());
		}
		out
	}

	/// `Namespace.Type::Member`, the form `pattern::verify_*` checks a
	/// resolved `call`/`callvirt` operand against.
	pub fn member_full_name(&self, member: &str) -> String {
		format!("{}::{member}", self.full_name())
	}
}

/// Resolves a `TypeDef` or `TypeRef` token (a bare [`MetadataToken`], not the
/// coded-index wrapper, since callers already convert via `Into<MetadataToken>`)
/// to its [`TypeName`]. `TypeSpec` tokens (generic instantiations, arrays
/// expressed as signatures) are out of scope here; see [`resolve_signature`].
pub fn resolve_token<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, token: MetadataToken) -> Option<TypeName> {
	match token.kind() {
		MetadataTokenKind::TypeDef => resolve_type_def(tables, strings, token.index()),
		MetadataTokenKind::TypeRef => resolve_type_ref(tables, strings, token.index()),
		_ => None,
	}
}

fn resolve_type_def(tables: &TableHeap, strings: &StringHeap, index: usize) -> Option<TypeName> {
	let type_defs = tables.get_table::<TypeDefTable>()?;
	let row = type_defs.get(index)?;
	let name = strings.get(row.type_name)?.to_string();
	let namespace = strings.get(row.type_namespace)?.to_string();

	let mut name = TypeName::simple(namespace, name);
	if let Some(nested) = tables.get_table::<NestedClassTable>() {
		let mut current = index;
		while let Some(entry) = nested.rows().find(|n| n.nested_class.0 == current) {
			let enclosing = type_defs.get(entry.enclosing_class.0)?;
			let enclosing_name = strings.get(enclosing.type_name)?.to_string();
			name.nested_path.insert(0, enclosing_name);
			current = entry.enclosing_class.0;
		}
	}
	Some(name)
}

fn resolve_type_ref(tables: &TableHeap, strings: &StringHeap, index: usize) -> Option<TypeName> {
	let type_refs = tables.get_table::<TypeRefTable>()?;
	let row = type_refs.get(index)?;
	let name = strings.get(row.type_name)?.to_string();
	let namespace = strings.get(row.type_namespace)?.to_string();
	let mut name = TypeName::simple(namespace, name);

	let scope: MetadataToken = row.resolution_scope.into();
	match scope.kind() {
		MetadataTokenKind::AssemblyRef => {
			let refs = tables.get_table::<AssemblyRefTable>()?;
			let assembly_row = refs.get(scope.index())?;
			name.assembly = strings.get(assembly_row.name).map(str::to_string);
		}
		MetadataTokenKind::TypeRef => {
			// Nested external type: the scope is the enclosing TypeRef.
			if let Some(mut enclosing) = resolve_type_ref(tables, strings, scope.index()) {
				enclosing.nested_path.append(&mut name.nested_path);
				name.nested_path = enclosing.nested_path;
				name.assembly = enclosing.assembly;
			}
		}
		_ => {}
	}
	Some(name)
}

/// Applies a signature's modifier stack (`[]`/`*`/`&`/pinned) and resolves the
/// innermost named type, mirroring `TypeSignatureTag`'s recursive shape
/// (`devirt_asm::raw::il::TypeSignatureTag`).
pub fn resolve_signature<'l>(tables: &TableHeap<'l>, strings: &StringHeap<'l>, tag: &TypeSignatureTag<'l>) -> Option<TypeName> {
	match tag {
		TypeSignatureTag::SzArray(inner) => {
			let mut name = resolve_signature(tables, strings, &inner.as_tags_tree())?;
			name.push_modifier(TypeModifier::SzArray);
			Some(name)
		}
		TypeSignatureTag::Pointer(inner) => {
			let mut name = resolve_signature(tables, strings, &inner.as_tags_tree())?;
			name.push_modifier(TypeModifier::Pointer);
			Some(name)
		}
		TypeSignatureTag::Reference(inner) => {
			let mut name = resolve_signature(tables, strings, &inner.as_tags_tree())?;
			name.push_modifier(TypeModifier::Reference);
			Some(name)
		}
		TypeSignatureTag::Pinned(inner) => resolve_signature(tables, strings, &inner.as_tags_tree()),
		TypeSignatureTag::ValueType(coded) | TypeSignatureTag::ClassType(coded) => resolve_token(tables, strings, (*coded).into()),
		TypeSignatureTag::Object => Some(TypeName::simple("System".into(), "Object".into())),
		TypeSignatureTag::String => Some(TypeName::simple("System".into(), "String".into())),
		TypeSignatureTag::Int4 => Some(TypeName::simple("System".into(), "Int32".into())),
		TypeSignatureTag::Int8 => Some(TypeName::simple("System".into(), "Int64".into())),
		TypeSignatureTag::Void => Some(TypeName::simple(String::new(), "Void".into())),
		_ => None,
	}
}

/// `true` for the void return-type tag, the check `ResourceLocator` step 7
/// needs ("whose return type is non-void").
pub fn is_void(tag: &TypeSignatureTag) -> bool {
	matches!(tag, TypeSignatureTag::Void)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn full_name_joins_namespace_nested_path_and_modifiers() {
		let mut name = TypeName::simple("System".into(), "Array".into());
		name.nested_path = vec!["Outer".into(), "Inner".into()];
		name.push_modifier(TypeModifier::SzArray);
		assert_eq!(name.full_name(), "System.Outer+Inner[]");
	}

	#[test]
	fn member_full_name_appends_double_colon_member() {
		let name = TypeName::simple("System".into(), "Array".into());
		assert_eq!(name.member_full_name("get_Length"), "System.Array::get_Length");
	}

	#[test]
	fn is_void_recognizes_only_the_void_tag() {
		assert!(is_void(&TypeSignatureTag::Void));
		assert!(!is_void(&TypeSignatureTag::Object));
	}
}
