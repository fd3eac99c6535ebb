use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field};

/// Derives a `#[name]Table` wrapper around `Vec<Self>` plus a `Table` impl,
/// reading each row field through `TableFieldRead` so that string/blob/guid
/// heap indices pick up their width from the shared `IndexSizes`.
pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let DeriveInput {
		vis,
		ident,
		data,
		..
	} = syn::parse(tokens).unwrap();

	let data = match data {
		Data::Struct(data) => data,
		Data::Enum(_) => panic!("Enums are not supported"),
		Data::Union(_) => panic!("Unions are not supported"),
	};

	let table = format_ident!("{}Table", ident);
	let reads = data.fields.iter().map(|Field { ident, ty, .. }| {
		quote! { #ident: <#ty as crate::raw::heaps::table::TableFieldRead>::read_field(stream, sizes)? }
	});

	quote! {
		#[derive(Debug)]
		#vis struct #table {
			rows: Vec<#ident>,
		}

		impl #table {
			pub fn read(stream: &mut std::io::Cursor<&[u8]>, sizes: &crate::raw::indices::sizes::IndexSizes, len: usize) -> std::io::Result<Self> {
				let mut rows = Vec::with_capacity(len);
				for _ in 0..len {
					rows.push(#ident { #(#reads),* });
				}
				Ok(Self { rows })
			}

			pub fn rows(&self) -> impl Iterator<Item = &#ident> {
				self.rows.iter()
			}

			pub fn get(&self, index: usize) -> Option<&#ident> {
				self.rows.get(index)
			}

			pub fn len(&self) -> usize {
				self.rows.len()
			}

			pub fn is_empty(&self) -> bool {
				self.rows.is_empty()
			}
		}

		impl crate::raw::heaps::table::Table for #table {
			fn len(&self) -> usize {
				self.rows.len()
			}

			fn kind(&self) -> crate::raw::heaps::table::TableKind {
				crate::raw::heaps::table::TableKind::#ident
			}

			fn as_any(&self) -> &dyn std::any::Any {
				self
			}
		}
	}
}
