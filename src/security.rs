use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::SecurityError;

const SESSION_PUBLIC: &str = "session.pem.pub";
const SESSION_PRIVATE: &str = "session.pem";

#[cfg(feature = "generate-security")]
const SESSION_KEY_BITS: usize = 2048;

#[derive(Debug, Clone)]
pub struct KeySet {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

/// Key material used to sign and check session cookies.
#[derive(Debug, Clone)]
pub struct Security {
    pub jwt_keys: KeySet,
}

#[inline]
pub fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SecurityError + '_ {
    move |source| SecurityError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl Security {
    pub fn load(dir: impl AsRef<Path>) -> Result<Security, SecurityError> {
        let dir = dir.as_ref();

        if cfg!(feature = "generate-security") {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
        }

        tracing::info!("Loading session signing keys...");
        let pub_key = fs::read(dir.join(SESSION_PUBLIC)).ok();
        let priv_key = fs::read(dir.join(SESSION_PRIVATE)).ok();

        let jwt_keys = match (pub_key, priv_key) {
            (Some(public), Some(private)) if !public.is_empty() && !private.is_empty() => {
                tracing::info!("Loaded session signing keys.");
                KeySet { public, private }
            }
            #[cfg(feature = "generate-security")]
            _ => generate_keys(dir)?,
            #[cfg(not(feature = "generate-security"))]
            _ => return Err(SecurityError::MissingKeys(dir.to_path_buf())),
        };

        Ok(Security { jwt_keys })
    }
}

#[cfg(feature = "generate-security")]
fn generate_keys(dir: &Path) -> Result<KeySet, SecurityError> {
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs8::EncodePublicKey;

    tracing::info!(
        "Unable to load session signing key(s) from '{}'. Generating a new pair.",
        dir.display()
    );

    tracing::info!("Generating a private RSA key. This may take a while...");
    let mut rng = rand::thread_rng();
    let rsa_sk = rsa::RsaPrivateKey::new(&mut rng, SESSION_KEY_BITS)
        .map_err(|e| SecurityError::Generate(e.to_string()))?;

    tracing::info!("Creating PS256 private key...");
    let private = rsa_sk
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| SecurityError::Generate(e.to_string()))?
        .to_string()
        .into_bytes();

    tracing::info!("Creating PS256 public key...");
    let public = rsa_sk
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| SecurityError::Generate(e.to_string()))?
        .into_bytes();

    let private_path = dir.join(SESSION_PRIVATE);
    fs::write(&private_path, private.as_slice()).map_err(io_error(&private_path))?;
    let public_path = dir.join(SESSION_PUBLIC);
    fs::write(&public_path, public.as_slice()).map_err(io_error(&public_path))?;

    tracing::info!("Done generating session signing keys.");

    Ok(KeySet { public, private })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_keys_are_loaded_verbatim() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        fs::write(dir.path().join(SESSION_PUBLIC), b"public").expect("write public");
        fs::write(dir.path().join(SESSION_PRIVATE), b"private").expect("write private");

        let security = Security::load(dir.path()).expect("keys should load");
        assert_eq!(security.jwt_keys.public, b"public");
        assert_eq!(security.jwt_keys.private, b"private");
    }
}
