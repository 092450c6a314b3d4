//! Wallet manager: encrypted keypair storage and the decrypt collaborator
//! C10/C11 call before signing.
//!
//! AES-256-GCM + PBKDF2-HMAC-SHA256 (100k iterations, per-wallet random
//! salt) follow `secure_wallet_manager.rs`'s `encrypt_keypair`/
//! `decrypt_wallet`/`derive_key_from_password` exactly, including its
//! nonce-based salt generator. New here: a `zeroize`-guarded scratch
//! buffer around decrypted key material, since the original never
//! zeroized its decrypted bytes before drop.

use crate::constants::{AES_NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};
use crate::errors::{CoreError, CoreResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use zeroize::Zeroize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedWallet {
    pub wallet_id: String,
    pub public_key: Pubkey,
    pub encrypted_private_key: Vec<u8>,
    pub nonce: [u8; AES_NONCE_SIZE],
    pub key_derivation_salt: [u8; SALT_SIZE],
}

/// Scoped guard around decrypted key bytes. Zeroizes on drop regardless
/// of the path the caller took out of the scope that holds it.
struct KeyMaterialGuard(Vec<u8>);

impl Drop for KeyMaterialGuard {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub struct WalletManager {
    master_key: [u8; 32],
}

impl WalletManager {
    pub fn new(master_password: &str) -> Self {
        Self { master_key: derive_master_key(master_password) }
    }

    pub fn encrypt_wallet(&self, wallet_id: &str, keypair: &Keypair) -> CoreResult<EncryptedWallet> {
        let salt = generate_salt();
        let derived_key = derive_key_from_password(&self.master_key, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived_key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut private_key_bytes = KeyMaterialGuard(keypair.to_bytes().to_vec());
        let encrypted_private_key = cipher
            .encrypt(&nonce, private_key_bytes.0.as_slice())
            .map_err(|e| CoreError::fatal(format!("wallet encryption failed: {e}")))?;
        private_key_bytes.0.zeroize();

        Ok(EncryptedWallet {
            wallet_id: wallet_id.to_string(),
            public_key: keypair.pubkey(),
            encrypted_private_key,
            nonce: nonce.as_slice().try_into().expect("gcm nonce is 12 bytes"),
            key_derivation_salt: salt,
        })
    }

    /// Decrypt a wallet and verify the recovered public key matches the
    /// stored one before handing back a signable keypair. Abort on
    /// mismatch rather than silently signing with the wrong key.
    pub fn decrypt_wallet(&self, wallet: &EncryptedWallet) -> CoreResult<Keypair> {
        let derived_key = derive_key_from_password(&self.master_key, &wallet.key_derivation_salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived_key));
        let nonce = Nonce::from_slice(&wallet.nonce);

        let mut decrypted = KeyMaterialGuard(
            cipher
                .decrypt(nonce, wallet.encrypted_private_key.as_slice())
                .map_err(|e| CoreError::rejected(format!("wallet decryption failed: {e}")))?,
        );

        let keypair_result = Keypair::from_bytes(&decrypted.0)
            .map_err(|e| CoreError::rejected(format!("decrypted key material is not a valid keypair: {e}")));
        decrypted.0.zeroize();
        let keypair = keypair_result?;

        if keypair.pubkey() != wallet.public_key {
            return Err(CoreError::fatal(format!(
                "decrypted keypair for wallet {} does not match stored public key",
                wallet.wallet_id
            )));
        }

        Ok(keypair)
    }
}

fn derive_key_from_password(password: &[u8; 32], salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Generate 32 bytes of salt from three AES-GCM nonces, same construction
/// `secure_wallet_manager.rs` uses for its per-wallet salt.
fn generate_salt() -> [u8; SALT_SIZE] {
    let nonce1 = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce2 = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce3 = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut salt = [0u8; SALT_SIZE];
    salt[0..12].copy_from_slice(&nonce1);
    salt[12..24].copy_from_slice(&nonce2);
    salt[24..32].copy_from_slice(&nonce3[0..8]);
    salt
}

fn derive_master_key(master_password: &str) -> [u8; 32] {
    let salt = format!("migration-sniper-wallet-manager-v1:{master_password}");
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(master_password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_public_key() {
        let manager = WalletManager::new("test-master-password");
        let keypair = Keypair::new();
        let encrypted = manager.encrypt_wallet("w1", &keypair).unwrap();
        let decrypted = manager.decrypt_wallet(&encrypted).unwrap();
        assert_eq!(decrypted.pubkey(), keypair.pubkey());
    }

    #[test]
    fn tampered_public_key_is_rejected() {
        let manager = WalletManager::new("test-master-password");
        let keypair = Keypair::new();
        let mut encrypted = manager.encrypt_wallet("w1", &keypair).unwrap();
        encrypted.public_key = Keypair::new().pubkey();
        assert!(manager.decrypt_wallet(&encrypted).is_err());
    }
}
