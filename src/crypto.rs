//! Block Signatures
//!
//! The writer signs the hash of every block it serves with an ed25519
//! key; followers verify against the writer's public key before they
//! accept anything. Keys are stored on disk as a single base64 line.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::chain::{Block, SignedBlock};
use crate::error::{Error, Result};

/// Signs blocks with the writer's secret key
#[derive(Clone)]
pub struct BlockSigner(SigningKey);

impl BlockSigner {
    pub fn new(signing_key: SigningKey) -> Self {
        Self(signing_key)
    }

    /// Generate a fresh key pair
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Load a secret key written by [`BlockSigner::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = read_key_file(path)?;
        Ok(Self(SigningKey::from_bytes(&bytes)))
    }

    /// Write the secret key to `path`, readable by the owner only
    pub fn save(&self, path: &Path) -> Result<()> {
        write_key_file(path, self.0.as_bytes(), true)
    }

    /// Sign the hash of `block`
    pub fn sign_block(&self, block: &Block) -> Vec<u8> {
        self.0.sign(&block.hash()).to_bytes().to_vec()
    }

    /// Sign `block` and pair it with the signature
    pub fn sign(&self, block: Block) -> SignedBlock {
        let signature = self.sign_block(&block);
        SignedBlock { block, signature }
    }

    /// Matching verifier
    pub fn verifier(&self) -> BlockVerifier {
        BlockVerifier(self.0.verifying_key())
    }
}

/// Checks block signatures against the writer's public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockVerifier(VerifyingKey);

impl BlockVerifier {
    pub fn new(verifying_key: VerifyingKey) -> Self {
        Self(verifying_key)
    }

    /// Load a public key written by [`BlockVerifier::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = read_key_file(path)?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::Key(format!("invalid public key in {:?}: {}", path, e)))?;
        Ok(Self(key))
    }

    /// Write the public key to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        write_key_file(path, self.0.as_bytes(), false)
    }

    /// Verify the signature carried by `signed` over its block hash
    pub fn verify(&self, signed: &SignedBlock) -> Result<()> {
        let id = signed.block.id;
        let signature =
            Signature::from_slice(&signed.signature).map_err(|_| Error::SignatureInvalid(id))?;
        self.0
            .verify(&signed.block.hash(), &signature)
            .map_err(|_| Error::SignatureInvalid(id))
    }
}

fn read_key_file(path: &Path) -> Result<[u8; 32]> {
    let content = std::fs::read_to_string(path)?;
    let bytes = STANDARD
        .decode(content.trim())
        .map_err(|e| Error::Key(format!("{:?} is not base64: {}", path, e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::Key(format!("{:?} holds {} bytes, expected 32", path, b.len())))
}

fn write_key_file(path: &Path, bytes: &[u8], secret: bool) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    if secret {
        restrict_to_owner(&file)?;
    }
    file.write_all(format!("{}\n", STANDARD.encode(bytes)).as_bytes())?;
    Ok(())
}

/// Set owner-only permissions before any key material is written
#[cfg(unix)]
fn restrict_to_owner(file: &std::fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &std::fs::File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sign_and_verify() {
        let signer = BlockSigner::generate();
        let signed = signer.sign(Block::new(0, vec![0], "create table T (x int)"));
        signer.verifier().verify(&signed).unwrap();
    }

    #[test]
    fn test_tampered_block_fails_verification() {
        let signer = BlockSigner::generate();
        let mut signed = signer.sign(Block::new(0, vec![0], "create table T (x int)"));
        signed.block.data = "create table U (x int)".into();
        assert!(matches!(signer.verifier().verify(&signed), Err(Error::SignatureInvalid(0))));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signed = BlockSigner::generate().sign(Block::new(2, vec![1; 32], "x"));
        let other = BlockSigner::generate().verifier();
        assert!(other.verify(&signed).is_err());
    }

    #[test]
    fn test_malformed_signature() {
        let signer = BlockSigner::generate();
        let signed = SignedBlock {
            block: Block::new(1, vec![], "x"),
            signature: vec![1, 2, 3],
        };
        assert!(matches!(signer.verifier().verify(&signed), Err(Error::SignatureInvalid(1))));
    }

    #[test]
    fn test_key_files_round_trip() {
        let dir = tempdir().unwrap();
        let signer = BlockSigner::generate();
        signer.save(&dir.path().join("server.key")).unwrap();
        signer.verifier().save(&dir.path().join("server.pub")).unwrap();

        let loaded = BlockSigner::load(&dir.path().join("server.key")).unwrap();
        let verifier = BlockVerifier::load(&dir.path().join("server.pub")).unwrap();
        assert_eq!(verifier, signer.verifier());

        let signed = loaded.sign(Block::new(0, vec![0], "x"));
        verifier.verify(&signed).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let key_path = dir.path().join("server.key");
        let pub_path = dir.path().join("server.pub");

        // A pre-existing loose file is tightened on save
        std::fs::write(&key_path, "old").unwrap();
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let signer = BlockSigner::generate();
        signer.save(&key_path).unwrap();
        signer.verifier().save(&pub_path).unwrap();

        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(BlockSigner::load(&key_path).unwrap().verifier(), signer.verifier());
    }

    #[test]
    fn test_bad_key_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.pub");
        std::fs::write(&path, STANDARD.encode([1u8; 5])).unwrap();
        assert!(matches!(BlockVerifier::load(&path), Err(Error::Key(_))));
    }
}
