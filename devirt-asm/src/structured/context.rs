use std::pin::Pin;

use bumpalo::Bump;
use derivative::Derivative;

use crate::structured::assembly::{Assembly, AssemblyLoadingError};

/// Owns the arena backing a single loaded assembly.
///
/// Unlike a process-wide metadata cache, a `Context` is scoped to exactly one
/// assembly: the devirtualizer only ever needs to resolve tokens within the
/// obfuscated module it was pointed at, so there is no assembly resolver or
/// cross-module loading here.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Context<'l> {
	#[derivative(Debug = "ignore")]
	bump: Pin<Box<Bump>>,
	assembly: Option<&'l Assembly<'l>>,
}

impl<'l> Context<'l> {
	pub fn new() -> Self {
		Context {
			bump: Pin::new(Box::new(Bump::new())),
			assembly: None,
		}
	}

	#[inline]
	pub fn assembly(&self) -> Option<&'l Assembly<'l>> {
		self.assembly
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn load_assembly(&mut self, data: &'l [u8]) -> Result<&'l Assembly<'l>, AssemblyLoadingError> {
		let assembly = Assembly::load(self.bump(), data)?;
		self.assembly = Some(assembly);
		Ok(assembly)
	}

	#[inline]
	pub(crate) fn bump(&self) -> &'l Bump {
		// SAFETY: `bump` is pinned for the lifetime of the Context and never
		// moved or reallocated; references handed out from it remain valid
		// for as long as the Context itself is alive.
		unsafe { std::mem::transmute(&*self.bump) }
	}
}

impl<'l> Default for Context<'l> {
	fn default() -> Self {
		Self::new()
	}
}
