use crate::error::ConfigurationError;
use crate::util;
use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn default_mongodb_uri() -> String {
    env::var("MONGODB_URI").unwrap_or("mongodb://localhost:27017".to_string())
}

fn default_mongodb_db() -> String {
    env::var("MONGODB_DB_NAME").unwrap_or("course_feedback".to_string())
}

fn default_public_content() -> PathBuf {
    PathBuf::from(env::var("PUBLIC_CONTENT_PATH").unwrap_or("./public".to_string()))
}

fn default_public_base_url() -> String {
    env::var("PUBLIC_BASE_URL").unwrap_or("http://localhost:8000".to_string())
}

fn true_bool() -> bool {
    true
}

/// External identity provider whose RS256 ID tokens are accepted by
/// `POST /auth/provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProvider {
    pub issuer: String,
    pub audience: String,
    /// PEM encoded RSA public key used to check token signatures.
    pub public_key: PathBuf,
    /// Email domains allowed to sign in. Empty allows any domain.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    file_path: PathBuf,

    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,

    #[serde(default = "default_public_content")]
    pub public_content: PathBuf,
    /// Prefix of shareable feedback links handed to students.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Email domains professors may register with. Empty allows any domain.
    #[serde(default)]
    pub registration_domains: Vec<String>,
    #[serde(default = "true_bool")]
    pub require_submitter_session: bool,

    #[serde(default)]
    pub identity_provider: Option<IdentityProvider>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_path: config_dir().join("settings.yml"),
            mongodb_uri: default_mongodb_uri(),
            mongodb_db: default_mongodb_db(),
            public_content: default_public_content(),
            public_base_url: default_public_base_url(),
            registration_domains: vec![],
            require_submitter_session: true,
            identity_provider: None,
        }
    }
}

#[inline]
fn config_dir() -> PathBuf {
    PathBuf::from(env::var("CONFIG_DIR").unwrap_or("./config".to_string()))
}

/// Returns `true` when `email` belongs to one of `domains`, or when `domains`
/// is empty.
pub fn domain_allowed(domains: &[String], email: &str) -> bool {
    if domains.is_empty() {
        return true;
    }
    match email.rsplit_once('@') {
        Some((_, domain)) => domains.iter().any(|d| d.eq_ignore_ascii_case(domain)),
        None => false,
    }
}

impl Config {
    pub fn load() -> Result<Config, ConfigurationError> {
        Config::load_from(config_dir())
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
        let config_file = util::find_first_subpath(
            dir.as_ref(),
            &["settings.yml", "settings.yaml"],
            Path::exists,
        )
        .ok_or_else(|| ConfigurationError::NotFound(dir.as_ref().to_path_buf()))?;

        let file = File::open(&config_file)?;
        let mut config: Config = serde_yaml::from_reader(BufReader::new(file))?;
        config.file_path = config_file;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigurationError> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.file_path)?;
        let mut out = BufWriter::new(file);
        serde_yaml::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    /// Shareable URL students open to leave feedback through `token`.
    pub fn shareable_link(&self, token: &str) -> String {
        format!(
            "{}/feedback/{}",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }

    #[cfg(test)]
    pub(crate) fn in_dir(dir: impl AsRef<Path>) -> Config {
        Config {
            file_path: dir.as_ref().join("settings.yml"),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        match Config::load_from(dir.path()) {
            Err(ConfigurationError::NotFound(path)) => assert_eq!(path, dir.path()),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        std::fs::write(
            dir.path().join("settings.yaml"),
            "mongodb_db: feedback_test\nregistration_domains: [\"university.edu\"]\n",
        )
        .expect("unable to write settings");

        let config = Config::load_from(dir.path()).expect("settings should parse");
        assert_eq!(config.mongodb_db, "feedback_test");
        assert_eq!(config.registration_domains, vec!["university.edu"]);
        assert!(config.require_submitter_session);
        assert!(config.identity_provider.is_none());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        let mut config = Config::in_dir(dir.path());
        config.require_submitter_session = false;
        config.identity_provider = Some(IdentityProvider {
            issuer: "https://accounts.example.com".to_string(),
            audience: "feedback".to_string(),
            public_key: PathBuf::from("provider.pem"),
            allowed_domains: vec!["university.edu".to_string()],
        });
        config.save().expect("unable to save settings");

        let loaded = Config::load_from(dir.path()).expect("saved settings should parse");
        assert!(!loaded.require_submitter_session);
        let provider = loaded.identity_provider.expect("provider should be kept");
        assert_eq!(provider.audience, "feedback");
        assert_eq!(provider.allowed_domains, vec!["university.edu"]);
    }

    #[test]
    fn domain_filter() {
        let domains = vec!["university.edu".to_string()];
        assert!(domain_allowed(&domains, "prof@university.edu"));
        assert!(domain_allowed(&domains, "prof@University.EDU"));
        assert!(!domain_allowed(&domains, "prof@gmail.com"));
        assert!(!domain_allowed(&domains, "university.edu"));
        assert!(domain_allowed(&[], "anyone@anywhere.org"));
    }

    #[test]
    fn shareable_link_joins_base_url() {
        let mut config = Config::default();
        config.public_base_url = "https://feedback.example.com/".to_string();
        assert_eq!(
            config.shareable_link("abc"),
            "https://feedback.example.com/feedback/abc"
        );
    }
}
