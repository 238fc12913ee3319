use crate::error::CliError;
use libchannel::crypto::keys::SecretKey;
use libchannel::crypto::{ChannelSigner, KeySigner};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// A named signing key. The secret is stored hex-encoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub name: String,
    secret: SecretKey,
}

impl LocalIdentity {
    pub fn random(name: Option<String>) -> Self {
        let signer = KeySigner::random();
        let name = name.unwrap_or_else(|| signer.public_identifier().to_string().chars().take(12).collect());
        LocalIdentity { name, secret: signer.secret().clone() }
    }

    pub fn signer(&self) -> KeySigner {
        KeySigner::new(self.secret.clone())
    }
}

impl Display for LocalIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let signer = self.signer();
        write!(f, "{}: {} (signing address {})", self.name, signer.public_identifier(), signer.address())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LocalIdentitySet {
    pub identities: BTreeMap<String, LocalIdentity>,
}

impl LocalIdentitySet {
    pub fn try_load<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_yml::from_reader(reader)?)
    }

    /// Loads the set at `path`, or an empty set if there is no file there yet.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        match Self::try_load(path) {
            Err(CliError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_yml::to_writer(writer, self)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&LocalIdentity> {
        self.identities.get(name)
    }

    pub fn insert(&mut self, identity: LocalIdentity) -> Option<LocalIdentity> {
        self.identities.insert(identity.name.clone(), identity)
    }

    pub fn remove<S: AsRef<str>>(&mut self, name: S) -> Option<LocalIdentity> {
        self.identities.remove(name.as_ref())
    }
}

pub fn default_identity_path() -> PathBuf {
    let mut home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.push(".channel");
    home.push("identities.yml");
    home
}
