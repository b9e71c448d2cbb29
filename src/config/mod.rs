//! Pipeline configuration
//!
//! One small options struct shared by the save and load pipelines. Every
//! field has a safe default; the only environment coupling is the trusted
//! keys directory, which may come from `MODELSEAL_TRUSTED_KEYS_DIR`.

use std::path::PathBuf;

use crate::keyring::TRUSTED_KEYS_DIR_ENV;
use crate::manifest::FORMAT_VERSION;
use crate::stream::HmacAlgorithm;

/// Recognized pipeline options
#[derive(Debug, Clone)]
pub struct Config {
    /// Trusted keys directory; falls back to `MODELSEAL_TRUSTED_KEYS_DIR`
    pub trusted_keys_dir: Option<PathBuf>,

    /// Accept signatures from keys that were expired at verification time.
    /// Off by default; the explicit override is the only way to load such
    /// archives.
    pub allow_expired_signing_key: bool,

    /// Keyed-hash algorithm for entry tags on save
    pub hmac_algorithm: HmacAlgorithm,

    /// Container format version to write
    pub format_version: u32,

    /// Accept manifests carrying top-level fields this build does not know
    pub allow_unknown_manifest_fields: bool,

    /// Run the artifact's validation callback before save and after load.
    /// Disabling this is for debugging only and is loudly logged.
    pub run_validation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trusted_keys_dir: None,
            allow_expired_signing_key: false,
            hmac_algorithm: HmacAlgorithm::default(),
            format_version: FORMAT_VERSION,
            allow_unknown_manifest_fields: false,
            run_validation: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick up the trusted keys directory from the environment, if set
    pub fn from_env() -> Self {
        Self {
            trusted_keys_dir: std::env::var_os(TRUSTED_KEYS_DIR_ENV).map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn with_trusted_keys_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trusted_keys_dir = Some(dir.into());
        self
    }

    pub fn with_allow_expired_signing_key(mut self, allow: bool) -> Self {
        self.allow_expired_signing_key = allow;
        self
    }

    pub fn with_hmac_algorithm(mut self, algorithm: HmacAlgorithm) -> Self {
        self.hmac_algorithm = algorithm;
        self
    }

    pub fn with_allow_unknown_manifest_fields(mut self, allow: bool) -> Self {
        self.allow_unknown_manifest_fields = allow;
        self
    }

    pub fn with_run_validation(mut self, run: bool) -> Self {
        self.run_validation = run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.allow_expired_signing_key);
        assert!(!config.allow_unknown_manifest_fields);
        assert!(config.run_validation);
        assert_eq!(config.format_version, FORMAT_VERSION);
        assert_eq!(config.hmac_algorithm, HmacAlgorithm::HmacSha256);
    }

    #[test]
    fn test_builders() {
        let config = Config::new()
            .with_trusted_keys_dir("/tmp/keys")
            .with_allow_expired_signing_key(true)
            .with_hmac_algorithm(HmacAlgorithm::HmacSha512)
            .with_run_validation(false);
        assert_eq!(config.trusted_keys_dir, Some(PathBuf::from("/tmp/keys")));
        assert!(config.allow_expired_signing_key);
        assert_eq!(config.hmac_algorithm, HmacAlgorithm::HmacSha512);
        assert!(!config.run_validation);
    }
}
