//! AES-128 helpers for the encryption stage
//!
//! The bootloader decrypts the whole artifact block by block with a single
//! key, so the cipher runs in ECB mode over a PKCS#7 padded buffer.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::error::{PackError, Result};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// AES-128 key length in bytes
pub const AES128_KEY_SIZE: usize = 16;

/// Take the AES-128 key from the raw bytes of a key file.
///
/// Only the first 16 bytes are used; anything after them is ignored.
pub fn derive_key(material: &[u8]) -> Result<[u8; AES128_KEY_SIZE]> {
    if material.len() < AES128_KEY_SIZE {
        return Err(PackError::InvalidKeyMaterial(format!(
            "key file holds {} bytes, AES-128 needs {}",
            material.len(),
            AES128_KEY_SIZE
        )));
    }

    let mut key = [0u8; AES128_KEY_SIZE];
    key.copy_from_slice(&material[..AES128_KEY_SIZE]);
    Ok(key)
}

/// PKCS#7 pad to a whole number of blocks.
///
/// Padding is never empty: input that is already block aligned gets a full
/// extra block of `0x10` bytes.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = AES_BLOCK_SIZE - data.len() % AES_BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Strip PKCS#7 padding, validating every pad byte
pub fn unpad(data: &[u8]) -> Result<&[u8]> {
    if data.is_empty() || data.len() % AES_BLOCK_SIZE != 0 {
        return Err(PackError::EncryptionFailed(format!(
            "padded length {} is not a positive multiple of {}",
            data.len(),
            AES_BLOCK_SIZE
        )));
    }

    let pad_len = data[data.len() - 1] as usize;
    if pad_len == 0 || pad_len > AES_BLOCK_SIZE {
        return Err(PackError::EncryptionFailed(format!(
            "invalid pad length {pad_len}"
        )));
    }

    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b as usize != pad_len) {
        return Err(PackError::EncryptionFailed("corrupt padding".to_string()));
    }
    Ok(body)
}

/// Encrypt a padded buffer in place, block by block
pub fn encrypt_ecb(key: &[u8; AES128_KEY_SIZE], data: &mut [u8]) -> Result<()> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(PackError::EncryptionFailed(format!(
            "buffer length {} is not block aligned",
            data.len()
        )));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// Decrypt a buffer produced by [`encrypt_ecb`] in place
pub fn decrypt_ecb(key: &[u8; AES128_KEY_SIZE], data: &mut [u8]) -> Result<()> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(PackError::EncryptionFailed(format!(
            "buffer length {} is not block aligned",
            data.len()
        )));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// Pad and encrypt a whole artifact
pub fn encrypt_artifact(key: &[u8; AES128_KEY_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = pad(data);
    encrypt_ecb(key, &mut buffer)?;
    Ok(buffer)
}
