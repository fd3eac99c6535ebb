use std::fmt::{Debug, Formatter};
use std::io::{Error, ErrorKind};

use crate::raw::heaps::{SizeDebugWrapper, StringIndex};

#[derive(Copy, Clone)]
pub struct StringHeap<'l> {
	data: &'l [u8],
}

impl<'l> TryFrom<&'l [u8]> for StringHeap<'l> {
	type Error = Error;
	fn try_from(data: &'l [u8]) -> Result<Self, Self::Error> {
		match data {
			[0, ..] => Ok(Self { data }),
			_ => Err(ErrorKind::InvalidData.into()),
		}
	}
}

impl<'l> StringHeap<'l> {
	pub fn get(&self, idx: StringIndex) -> Option<&'l str> {
		let slice = self.data.get(idx.0..)?;
		let end = slice.iter().position(|c| *c == 0)?;
		std::str::from_utf8(&slice[..end]).ok()
	}
}

impl Debug for StringHeap<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("StringHeap");
		dbg.field("data", &SizeDebugWrapper(self.data.len()));
		dbg.finish()
	}
}

#[derive(Copy, Clone)]
pub struct UserStringHeap<'l> {
	data: &'l [u8],
}

impl<'l> From<&'l [u8]> for UserStringHeap<'l> {
	fn from(data: &'l [u8]) -> Self {
		Self { data }
	}
}

impl<'l> UserStringHeap<'l> {
	/// User strings are UTF-16LE, length-prefixed, with a trailing byte that
	/// signals whether the string contains any non-ASCII or control characters.
	pub fn get(&self, offset: usize) -> Option<String> {
		let slice = self.data.get(offset..)?;
		let (len, header_size) = match *slice {
			[b0, ..] if b0 & 0x80 == 0 => (b0 as usize, 1),
			[b0, b1, ..] if b0 & 0xC0 == 0x80 => ((((b0 & 0x3F) as usize) << 8) | b1 as usize, 2),
			[b0, b1, b2, b3, ..] => ((((b0 & 0x1F) as usize) << 24) | ((b1 as usize) << 16) | ((b2 as usize) << 8) | b3 as usize, 4),
			_ => return None,
		};
		let bytes = slice.get(header_size..header_size + len.saturating_sub(1))?;
		let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
		String::from_utf16(&units).ok()
	}
}

impl Debug for UserStringHeap<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("UserStringHeap");
		dbg.field("data", &SizeDebugWrapper(self.data.len()));
		dbg.finish()
	}
}
