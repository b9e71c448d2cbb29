//! Trust and key-expiry policy

mod fixtures;

use chrono::{Duration, Utc};
use fixtures::{env_with_trust, test_env, write_keyring, GreeterModel};
use modelseal::{
    load_from_reader, save_to_writer, CodecRegistry, Config, LoadError, SaveError, SignError,
    TrustLevel,
};
use tempfile::TempDir;

fn saved_archive(env: &fixtures::TestEnv) -> Vec<u8> {
    let registry = CodecRegistry::builtin();
    let mut model = GreeterModel::sample();
    save_to_writer(
        &mut model,
        Vec::new(),
        &registry,
        &env.signer,
        &env.key.fingerprint,
        None,
        &Config::default(),
    )
    .unwrap()
}

#[test]
fn test_untrusted_signer_rejected() {
    // Archive signed by env's key, verified against a keyring that only
    // trusts a different key
    let env = test_env();
    let bytes = saved_archive(&env);

    let other = test_env();
    let keyring_dir = TempDir::new().unwrap();
    let keyring = write_keyring(
        keyring_dir.path(),
        &[("someone-else", &other.key, TrustLevel::Ultimate, None)],
    );

    let err = load_from_reader::<GreeterModel, _>(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &keyring,
        &Config::default(),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Trust(_)));
}

#[test]
fn test_marginal_trust_rejected() {
    let env = env_with_trust(TrustLevel::Marginal, None);
    let bytes = saved_archive(&env);

    let err = load_from_reader::<GreeterModel, _>(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Trust(_)));
}

#[test]
fn test_never_trust_rejected() {
    let env = env_with_trust(TrustLevel::Never, None);
    let bytes = saved_archive(&env);

    let err = load_from_reader::<GreeterModel, _>(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Trust(_)));
}

#[test]
fn test_full_trust_accepted() {
    let env = env_with_trust(TrustLevel::Full, None);
    let bytes = saved_archive(&env);

    let loaded: GreeterModel = load_from_reader(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap();
    assert_eq!(loaded.predict("hello").unwrap(), "greeting");
}

#[test]
fn test_expired_key_rejected_by_default() {
    let expired_at = Utc::now() - Duration::days(3);
    let env = env_with_trust(TrustLevel::Ultimate, Some(expired_at));
    let bytes = saved_archive(&env);

    let err = load_from_reader::<GreeterModel, _>(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::ExpiredKey(_)));
}

#[test]
fn test_expired_key_accepted_with_explicit_override() {
    let expired_at = Utc::now() - Duration::days(3);
    let env = env_with_trust(TrustLevel::Ultimate, Some(expired_at));
    let bytes = saved_archive(&env);

    let config = Config::default().with_allow_expired_signing_key(true);
    let loaded: GreeterModel = load_from_reader(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &config,
    )
    .unwrap();
    assert_eq!(loaded.predict("hello").unwrap(), "greeting");
}

#[test]
fn test_key_expiring_later_still_accepted() {
    let expires_at = Utc::now() + Duration::days(5);
    let env = env_with_trust(TrustLevel::Ultimate, Some(expires_at));
    let bytes = saved_archive(&env);

    let loaded: GreeterModel = load_from_reader(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap();
    assert_eq!(loaded.predict("hello").unwrap(), "greeting");
}

#[test]
fn test_signing_with_passphrase_protected_key() {
    let env = test_env();
    let registry = CodecRegistry::builtin();

    let protected = env.signer.create_key(None, Some("open sesame")).unwrap();
    let keyring_dir = TempDir::new().unwrap();
    let keyring = write_keyring(
        keyring_dir.path(),
        &[("protected", &protected, TrustLevel::Ultimate, None)],
    );

    let mut model = GreeterModel::sample();
    let err = save_to_writer(
        &mut model,
        Vec::new(),
        &registry,
        &env.signer,
        &protected.fingerprint,
        Some("wrong"),
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SaveError::Sign(SignError::WrongPassphrase { .. })));

    let mut model = GreeterModel::sample();
    let bytes = save_to_writer(
        &mut model,
        Vec::new(),
        &registry,
        &env.signer,
        &protected.fingerprint,
        Some("open sesame"),
        &Config::default(),
    )
    .unwrap();

    let loaded: GreeterModel =
        load_from_reader(bytes.as_slice(), &registry, &keyring, &Config::default()).unwrap();
    assert_eq!(loaded.predict("hello").unwrap(), "greeting");
}
