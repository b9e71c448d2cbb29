//! Shared test fixtures
//!
//! Provides the `GreeterModel` composite artifact (a toy classifier whose
//! validation callback checks `predict("hello") == "greeting"`), plus
//! builders for signer homes and trusted keyrings.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;

use modelseal::keyring::write_index;
use modelseal::{
    AttributeBinding, AttributeValue, CompositeArtifact, GeneratedKey, ModelError, SignerHome,
    Tensor, TrustLevel, TrustedKeyring, ValidationError, CODEC_GENERIC_OBJECT, CODEC_TENSOR,
    CODEC_TEXT_STRUCTURED,
};

/// A toy text classifier: a preprocessing map, a weight vector over labels,
/// and an embedded ground-truth probe used by the validation callback.
#[derive(Debug, Clone, PartialEq)]
pub struct GreeterModel {
    /// Output labels, part of the skeleton state
    pub labels: Vec<String>,
    /// Input normalization map ("pre" attribute)
    pub pre: Option<serde_json::Value>,
    /// Label weights ("classifier" attribute)
    pub classifier: Option<Tensor>,
    /// Ground-truth probe ("probe" attribute)
    pub probe: Option<serde_json::Value>,
}

impl GreeterModel {
    pub fn sample() -> Self {
        Self {
            labels: vec!["farewell".to_string(), "greeting".to_string()],
            pre: Some(json!({"hello": "hello", "bye": "bye"})),
            classifier: Some(Tensor::vector(vec![0.2, 0.7])),
            probe: Some(json!({"input": "hello", "expected": "greeting"})),
        }
    }

    /// Classify an input: normalize it through `pre`, then pick the label
    /// with the largest weight (ties resolve to the lowest index).
    pub fn predict(&self, input: &str) -> Option<String> {
        let pre = self.pre.as_ref()?;
        let normalized = pre.get(input).and_then(|v| v.as_str());
        let Some(normalized) = normalized else {
            return Some("unknown".to_string());
        };
        if normalized.is_empty() {
            return Some("unknown".to_string());
        }

        let weights = self.classifier.as_ref()?.data();
        let mut best = 0usize;
        for (i, v) in weights.iter().enumerate() {
            if *v > weights[best] {
                best = i;
            }
        }
        self.labels.get(best).cloned()
    }
}

impl CompositeArtifact for GreeterModel {
    fn artifact_name(&self) -> &str {
        "greeter"
    }

    fn attribute_map(&self) -> Vec<AttributeBinding> {
        vec![
            AttributeBinding::new("pre", CODEC_GENERIC_OBJECT, "pre.bin"),
            AttributeBinding::new("classifier", CODEC_TENSOR, "clf.bin"),
            AttributeBinding::new("probe", CODEC_TEXT_STRUCTURED, "probe.json"),
        ]
    }

    fn export_state(&self) -> Result<serde_json::Value, ModelError> {
        Ok(json!({"labels": self.labels}))
    }

    fn from_state(state: &serde_json::Value) -> Result<Self, ModelError> {
        let labels = state
            .get("labels")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ModelError::State("missing labels".to_string()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ModelError::State("label is not a string".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            labels,
            pre: None,
            classifier: None,
            probe: None,
        })
    }

    fn take_attribute(&mut self, attribute: &str) -> Result<AttributeValue, ModelError> {
        let missing = || ModelError::MissingAttribute {
            attribute: attribute.to_string(),
        };
        match attribute {
            "pre" => self.pre.take().map(AttributeValue::Json).ok_or_else(missing),
            "classifier" => self
                .classifier
                .take()
                .map(AttributeValue::Tensor)
                .ok_or_else(missing),
            "probe" => self.probe.take().map(AttributeValue::Json).ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    fn put_attribute(
        &mut self,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<(), ModelError> {
        let mismatch = |expected: &'static str, actual: &'static str| ModelError::TypeMismatch {
            attribute: attribute.to_string(),
            expected,
            actual,
        };
        match (attribute, value) {
            ("pre", AttributeValue::Json(v)) => {
                self.pre = Some(v);
                Ok(())
            }
            ("classifier", AttributeValue::Tensor(t)) => {
                self.classifier = Some(t);
                Ok(())
            }
            ("probe", AttributeValue::Json(v)) => {
                self.probe = Some(v);
                Ok(())
            }
            (_, value) => Err(mismatch("a declared attribute type", value.kind())),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let probe = self
            .probe
            .as_ref()
            .ok_or_else(|| ValidationError::new("probe attribute is missing"))?;
        let input = probe
            .get("input")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ValidationError::new("probe has no input"))?;
        let expected = probe
            .get("expected")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ValidationError::new("probe has no expected output"))?;

        let actual = self
            .predict(input)
            .ok_or_else(|| ValidationError::new("model is not fully assembled"))?;
        if actual != expected {
            return Err(ValidationError::new(format!(
                "predict({input:?}) = {actual:?}, expected {expected:?}"
            )));
        }
        Ok(())
    }
}

/// A signer home, a generated key, and a keyring that trusts it.
/// The TempDirs are held so the directories outlive the test.
pub struct TestEnv {
    #[allow(dead_code)]
    pub signer_dir: TempDir,
    pub signer: SignerHome,
    pub key: GeneratedKey,
    #[allow(dead_code)]
    pub keyring_dir: TempDir,
    pub keyring: TrustedKeyring,
}

/// Write `<name>.pub` plus the index row for each key into `dir`
pub fn write_keyring(
    dir: &Path,
    keys: &[(&str, &GeneratedKey, TrustLevel, Option<DateTime<Utc>>)],
) -> TrustedKeyring {
    let mut rows = Vec::new();
    for (name, key, trust, expires_at) in keys {
        std::fs::write(dir.join(format!("{name}.pub")), &key.public_key).unwrap();
        rows.push((name.to_string(), key.fingerprint.clone(), *trust, *expires_at));
    }
    write_index(dir, &rows).unwrap();
    TrustedKeyring::load(dir).unwrap()
}

/// Environment whose keyring trusts the signing key at the given level
pub fn env_with_trust(trust: TrustLevel, expires_at: Option<DateTime<Utc>>) -> TestEnv {
    let signer_dir = TempDir::new().unwrap();
    let signer = SignerHome::open(signer_dir.path()).unwrap();
    let key = signer.create_key(None, None).unwrap();

    let keyring_dir = TempDir::new().unwrap();
    let keyring = write_keyring(keyring_dir.path(), &[("release", &key, trust, expires_at)]);

    TestEnv {
        signer_dir,
        signer,
        key,
        keyring_dir,
        keyring,
    }
}

/// Environment with an ultimately trusted, never-expiring signing key
pub fn test_env() -> TestEnv {
    env_with_trust(TrustLevel::Ultimate, None)
}
