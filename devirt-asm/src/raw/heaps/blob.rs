use std::fmt::{Debug, Formatter};
use std::io::{Error, ErrorKind};

use crate::raw::heaps::SizeDebugWrapper;

#[derive(Copy, Clone)]
pub struct BlobHeap<'l> {
	data: &'l [u8],
}

impl<'l> TryFrom<&'l [u8]> for BlobHeap<'l> {
	type Error = Error;
	fn try_from(data: &'l [u8]) -> Result<Self, Self::Error> {
		Ok(Self { data })
	}
}

impl<'l> BlobHeap<'l> {
	/// Reads the ECMA-335 §II.23.2 compressed length prefix followed by that many bytes.
	pub fn get(&self, offset: usize) -> Option<&'l [u8]> {
		let slice = self.data.get(offset..)?;
		let (len, header_size) = match *slice {
			[b0, ..] if b0 & 0x80 == 0 => (b0 as usize, 1),
			[b0, b1, ..] if b0 & 0xC0 == 0x80 => ((((b0 & 0x3F) as usize) << 8) | b1 as usize, 2),
			[b0, b1, b2, b3, ..] => ((((b0 & 0x1F) as usize) << 24) | ((b1 as usize) << 16) | ((b2 as usize) << 8) | b3 as usize, 4),
			_ => return None,
		};
		slice.get(header_size..header_size + len)
	}
}

impl Debug for BlobHeap<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("BlobHeap");
		dbg.field("data", &SizeDebugWrapper(self.data.len()));
		dbg.finish()
	}
}
