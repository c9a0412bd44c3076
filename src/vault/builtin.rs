use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

/// Envelope-encrypted secret as stored in `integration_secrets`.
#[derive(Clone)]
pub struct SealedSecret {
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub secret_nonce: Vec<u8>,
}

/// AES-256-GCM envelope encryption with a master KEK.
///
/// Every secret gets a fresh DEK. The integration id is bound as associated
/// data so a sealed secret cannot be replayed onto another record.
pub struct VaultCrypto {
    kek: Zeroizing<[u8; 32]>,
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self {
            kek: Zeroizing::new(kek),
        })
    }

    /// Random, process-local KEK. Secrets sealed with it die with the process.
    pub fn ephemeral() -> Self {
        let mut kek = [0u8; 32];
        OsRng.fill_bytes(&mut kek);
        Self {
            kek: Zeroizing::new(kek),
        }
    }

    /// Encrypts `plaintext` under a new DEK, then wraps the DEK with the KEK.
    pub fn seal(&self, plaintext: &str, aad: &[u8]) -> anyhow::Result<SealedSecret> {
        let mut dek = [0u8; 32];
        OsRng.fill_bytes(&mut dek);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce_bytes = generate_nonce();
        let encrypted_secret = secret_cipher
            .encrypt(
                Nonce::from_slice(&secret_nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce_bytes = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce_bytes), &dek[..])
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        dek.zeroize();

        Ok(SealedSecret {
            encrypted_dek,
            dek_nonce: dek_nonce_bytes.to_vec(),
            encrypted_secret,
            secret_nonce: secret_nonce_bytes.to_vec(),
        })
    }

    /// Unwraps the DEK and decrypts the secret. `aad` must match what was sealed.
    pub fn open(&self, sealed: &SealedSecret, aad: &[u8]) -> anyhow::Result<Zeroizing<String>> {
        if sealed.dek_nonce.len() != 12 || sealed.secret_nonce.len() != 12 {
            anyhow::bail!("malformed sealed secret: bad nonce length");
        }

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_bytes = Zeroizing::new(
            kek_cipher
                .decrypt(
                    Nonce::from_slice(&sealed.dek_nonce),
                    sealed.encrypted_dek.as_slice(),
                )
                .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?,
        );

        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let plaintext = secret_cipher
            .decrypt(
                Nonce::from_slice(&sealed.secret_nonce),
                Payload {
                    msg: &sealed.encrypted_secret,
                    aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        Ok(Zeroizing::new(String::from_utf8(plaintext)?))
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "ATERGES_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
