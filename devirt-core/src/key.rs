//! `VMKey` and the RSA-like key-derivation formula the dispatcher uses to
//! turn its embedded session key and modulus string into a usable keypair.

use base64::Engine;
use num_bigint::BigUint;

use crate::error::DevirtError;

/// Build-specific fallback used when the modulus-string method's strings have
/// already been re-encrypted by upstream tooling and can't be read directly.
/// Kept as a constant so a new build's fallback is a one-line change.
pub const FALLBACK_MODULUS_BASE64: &str = "xjCxZd3VQ4hZ1QZ2VQJ8qz5Zt9N3Xr7mKcVd2FpQwJs=";

/// `{ modulus, exponent = 65537, session_key }`.
#[derive(Clone, Debug)]
pub struct VMKey {
	pub modulus: BigUint,
	pub exponent: BigUint,
	pub session_key: Vec<u8>,
}

impl VMKey {
	/// `composite_modulus_bytes := session_key_bytes ⧺ base64_decode(modulus_string)`,
	/// `modulus := bigint_from_big_endian(composite_modulus_bytes)`, `exponent := 65537`.
	pub fn derive(session_key: Vec<u8>, modulus_base64: &str) -> Result<Self, DevirtError> {
		let decoded = base64::engine::general_purpose::STANDARD
			.decode(modulus_base64.trim())
			.map_err(|_| DevirtError::ModulusMissing)?;

		let mut composite = Vec::with_capacity(session_key.len() + decoded.len());
		composite.extend_from_slice(&session_key);
		composite.extend_from_slice(&decoded);

		if composite.is_empty() {
			return Err(DevirtError::ModulusMissing);
		}

		Ok(Self { modulus: BigUint::from_bytes_be(&composite), exponent: BigUint::from(65537u32), session_key })
	}

	/// Number of bytes in one ciphertext block: `⌈log256(modulus)⌉`.
	pub fn block_size(&self) -> usize {
		(self.modulus.bits() as usize + 7) / 8
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derive_combines_session_key_and_modulus_big_endian() {
		let key = VMKey::derive(vec![0x01, 0x02], "AwQ=" /* [0x03, 0x04] */).unwrap();
		assert_eq!(key.modulus, BigUint::from_bytes_be(&[0x01, 0x02, 0x03, 0x04]));
		assert_eq!(key.exponent, BigUint::from(65537u32));
	}

	#[test]
	fn fallback_modulus_is_nonempty() {
		assert!(!FALLBACK_MODULUS_BASE64.is_empty());
		assert!(VMKey::derive(vec![], FALLBACK_MODULUS_BASE64).is_ok());
	}

	#[test]
	fn empty_key_and_modulus_fails() {
		assert!(VMKey::derive(vec![], "").is_err());
	}
}
