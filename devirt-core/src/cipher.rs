//! Random-access, lazily-decrypted view over an embedded resource.

use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::MethodError;
use crate::key::VMKey;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SeekOrigin {
	Begin,
	Current,
	End,
}

/// One decrypted plaintext block: `u8 payload_len || u8 payload[payload_len] || padding`.
struct Block {
	payload: Box<[u8]>,
}

/// A plaintext, seekable view over `ciphertext`, decrypted on demand one RSA
/// block at a time. Two independent instances are built per run — one for
/// the instruction stream, one for the token-resolver stream — so their
/// cursors never interfere.
pub struct CipherStream {
	ciphertext: Vec<u8>,
	block_size: usize,
	modulus: BigUint,
	exponent: BigUint,
	/// Decrypted lazily and cached: decryption is a pure function of
	/// `(block, modulus, exponent)`, so repeated reads of the same range are
	/// bitwise identical whether or not the block was already cached.
	blocks: Vec<OnceLock<Block>>,
	/// Running sum of `blocks[..i].payload.len()`, one more entry than `blocks`.
	block_offsets: Vec<usize>,
	position: usize,
}

impl CipherStream {
	pub fn new(ciphertext: Vec<u8>, key: &VMKey) -> Self {
		let block_size = key.block_size().max(1);
		let block_count = ciphertext.len().div_ceil(block_size);
		Self {
			ciphertext,
			block_size,
			modulus: key.modulus.clone(),
			exponent: key.exponent.clone(),
			blocks: (0..block_count).map(|_| OnceLock::new()).collect(),
			block_offsets: Vec::new(),
			position: 0,
		}
	}

	fn decrypt_block(&self, index: usize) -> Result<&Block, MethodError> {
		if let Some(block) = self.blocks[index].get() {
			return Ok(block);
		}

		let start = index * self.block_size;
		let end = (start + self.block_size).min(self.ciphertext.len());
		let ciphertext_block = BigUint::from_bytes_be(&self.ciphertext[start..end]);

		let plaintext = match ciphertext_block.is_zero() {
			true => BigUint::zero(),
			false => ciphertext_block.modpow(&self.exponent, &self.modulus),
		};

		let mut bytes = plaintext.to_bytes_be();
		// Left-pad to the full block width: `modpow` drops leading zero bytes.
		if bytes.len() < self.block_size {
			let mut padded = vec![0u8; self.block_size - bytes.len()];
			padded.append(&mut bytes);
			bytes = padded;
		}

		let payload_len = bytes[0] as usize;
		if payload_len >= self.block_size {
			return Err(MethodError::DecryptionOverflow);
		}

		let payload = bytes[1..1 + payload_len].to_vec().into_boxed_slice();
		// Another thread may have raced us to populate the same slot; both
		// computations are deterministic and produce identical bytes, so the
		// loser's work is only wasted, never a correctness problem.
		let _ = self.blocks[index].set(Block { payload });
		Ok(self.blocks[index].get().expect("just set"))
	}

	/// Total plaintext length: the sum of every block's decrypted payload length.
	pub fn length(&mut self) -> Result<usize, MethodError> {
		if self.block_offsets.is_empty() {
			self.populate_offsets()?;
		}
		Ok(*self.block_offsets.last().unwrap_or(&0))
	}

	fn populate_offsets(&mut self) -> Result<(), MethodError> {
		let mut offsets = Vec::with_capacity(self.blocks.len() + 1);
		offsets.push(0);
		let mut total = 0usize;
		for i in 0..self.blocks.len() {
			total += self.decrypt_block(i)?.payload.len();
			offsets.push(total);
		}
		self.block_offsets = offsets;
		Ok(())
	}

	pub fn position(&self) -> usize {
		self.position
	}

	/// Out-of-range seeks clamp to `[0, length]`; they never error.
	pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<usize, MethodError> {
		let length = self.length()? as i64;
		let base = match origin {
			SeekOrigin::Begin => 0,
			SeekOrigin::Current => self.position as i64,
			SeekOrigin::End => length,
		};
		let target = (base + offset).clamp(0, length);
		self.position = target as usize;
		Ok(self.position)
	}

	/// Reads up to `dst.len()` bytes starting at the current position,
	/// returning how many were actually copied (fewer at end-of-stream).
	pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, MethodError> {
		if self.block_offsets.is_empty() {
			self.populate_offsets()?;
		}

		let length = *self.block_offsets.last().unwrap_or(&0);
		if self.position >= length {
			return Ok(0);
		}

		let want = dst.len().min(length - self.position);
		let mut written = 0;
		let mut cursor = self.position;
		while written < want {
			let block_index = match self.block_offsets.binary_search(&cursor) {
				Ok(i) if i < self.blocks.len() => i,
				Ok(i) => i - 1,
				Err(i) => i - 1,
			};
			let block = self.decrypt_block(block_index)?;
			let block_start = self.block_offsets[block_index];
			let within = cursor - block_start;
			let take = (block.payload.len() - within).min(want - written);
			dst[written..written + take].copy_from_slice(&block.payload[within..within + take]);
			written += take;
			cursor += take;
		}

		self.position = cursor;
		Ok(written)
	}

	/// Reads exactly one byte, per the translator's `u8 virtual_code` reads.
	pub fn read_u8(&mut self) -> Result<u8, MethodError> {
		let mut byte = [0u8; 1];
		self.read(&mut byte)?;
		Ok(byte[0])
	}

	pub fn read_u16(&mut self) -> Result<u16, MethodError> {
		let mut bytes = [0u8; 2];
		self.read(&mut bytes)?;
		Ok(u16::from_le_bytes(bytes))
	}

	pub fn read_u32(&mut self) -> Result<u32, MethodError> {
		let mut bytes = [0u8; 4];
		self.read(&mut bytes)?;
		Ok(u32::from_le_bytes(bytes))
	}

	pub fn read_i32(&mut self) -> Result<i32, MethodError> {
		Ok(self.read_u32()? as i32)
	}

	pub fn read_u64(&mut self) -> Result<u64, MethodError> {
		let mut bytes = [0u8; 8];
		self.read(&mut bytes)?;
		Ok(u64::from_le_bytes(bytes))
	}

	pub fn read_f64(&mut self) -> Result<f64, MethodError> {
		Ok(f64::from_bits(self.read_u64()?))
	}

	pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, MethodError> {
		let mut buf = vec![0u8; len];
		self.read(&mut buf)?;
		Ok(buf)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// `exponent = 1` makes `modpow` the identity (`c^1 mod n == c` for `c <
	/// n`), so a block's "ciphertext" can just be written as plaintext bytes
	/// directly — no RSA key pair needs inverting to build fixture data.
	fn identity_key(block_size: usize) -> VMKey {
		let modulus = BigUint::from(256u32).pow(block_size as u32 + 1);
		VMKey { modulus, exponent: BigUint::from(1u32), session_key: vec![] }
	}

	fn plaintext_block(payload: &[u8], block_size: usize) -> Vec<u8> {
		assert!(payload.len() < block_size);
		let mut block = vec![0u8; block_size];
		block[0] = payload.len() as u8;
		block[1..1 + payload.len()].copy_from_slice(payload);
		block
	}

	#[test]
	fn repeated_reads_of_same_range_are_bitwise_equal() {
		let key = identity_key(4);
		let block_size = key.block_size();
		let ciphertext = plaintext_block(b"hi", block_size);
		let mut a = CipherStream::new(ciphertext.clone(), &key);
		let mut b = CipherStream::new(ciphertext, &key);

		let mut buf_a = [0u8; 2];
		let mut buf_b = [0u8; 2];
		a.read(&mut buf_a).unwrap();
		b.read(&mut buf_b).unwrap();
		assert_eq!(buf_a, buf_b);
		assert_eq!(&buf_a, b"hi");
	}

	#[test]
	fn seek_clamps_to_valid_range() {
		let key = identity_key(4);
		let block_size = key.block_size();
		let ciphertext = plaintext_block(b"hi", block_size);
		let mut stream = CipherStream::new(ciphertext, &key);
		let len = stream.length().unwrap();
		assert_eq!(stream.seek(1000, SeekOrigin::Begin).unwrap(), len);
		assert_eq!(stream.seek(-1000, SeekOrigin::Begin).unwrap(), 0);
	}

	#[test]
	fn oversized_payload_len_is_decryption_overflow() {
		let key = identity_key(4);
		let block_size = key.block_size();
		// payload_len byte equals block_size itself: always out of range.
		let mut block = vec![0u8; block_size];
		block[0] = block_size as u8;

		let mut stream = CipherStream::new(block, &key);
		assert!(matches!(stream.length(), Err(MethodError::DecryptionOverflow)));
	}

	#[test]
	fn reads_spanning_multiple_blocks_concatenate_payloads() {
		let key = identity_key(4);
		let block_size = key.block_size();
		let mut ciphertext = plaintext_block(b"ab", block_size);
		ciphertext.extend(plaintext_block(b"cd", block_size));

		let mut stream = CipherStream::new(ciphertext, &key);
		assert_eq!(stream.length().unwrap(), 4);
		let mut buf = [0u8; 4];
		stream.read(&mut buf).unwrap();
		assert_eq!(&buf, b"abcd");
	}
}
