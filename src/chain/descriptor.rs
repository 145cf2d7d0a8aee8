//! Chain descriptor and its header codec
//!
//! A chain travels as two headers: the function names joined with `|`, and a
//! JSON array holding one options object per position. Position `i` of the
//! array always belongs to step `i`; a step without options is encoded as an
//! empty object, never skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BtrfaasError, Result};

/// Header carrying the `|`-joined function names
pub const CHAIN_HEADER: &str = "X-Btrfaas-Chain";

/// Header carrying the positional JSON options array
pub const OPTIONS_HEADER: &str = "X-Btrfaas-Options";

/// Separator between function names in the chain header
pub const CHAIN_DELIMITER: char = '|';

/// One invocation within a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionStep {
    /// Identifier of a deployed function, resolved to a runner address later
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl FunctionStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    /// Add one option, returning self for chaining
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Check that a function name can travel in the chain header
/// Option keys travel as `key=value` entries, split at the first '='
pub fn validate_option_key(step: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(BtrfaasError::InvalidOptions(format!(
            "step {} has an option with an empty key",
            step
        )));
    }
    if key.contains('=') {
        return Err(BtrfaasError::InvalidOptions(format!(
            "step {} option key {:?} contains '='",
            step, key
        )));
    }
    Ok(())
}

fn validate_step(step: &FunctionStep) -> Result<()> {
    validate_name(&step.name)?;
    for key in step.options.keys() {
        validate_option_key(&step.name, key)?;
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BtrfaasError::invalid_identifier(name, "name is empty"));
    }
    if name.contains(CHAIN_DELIMITER) {
        return Err(BtrfaasError::invalid_identifier(
            name,
            format!("name contains the chain delimiter '{}'", CHAIN_DELIMITER),
        ));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(BtrfaasError::invalid_identifier(
            name,
            "name contains whitespace or control characters",
        ));
    }
    Ok(())
}

/// Non-empty ordered list of steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    steps: Vec<FunctionStep>,
}

impl ChainDescriptor {
    /// Build a descriptor, rejecting an empty chain and unusable names
    pub fn new(steps: Vec<FunctionStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(BtrfaasError::EmptyChain);
        }
        for step in &steps {
            validate_step(step)?;
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[FunctionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false, a descriptor holds at least one step
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<FunctionStep> {
        self.steps
    }

    /// Function names in execution order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Encode this descriptor into its two headers
    pub fn encode(&self) -> Result<EncodedChain> {
        encode(&self.steps)
    }
}

/// The two header values describing a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChain {
    /// Value of `X-Btrfaas-Chain`
    pub chain: String,
    /// Value of `X-Btrfaas-Options`
    pub options: String,
}

/// Encode steps into the chain and options headers
pub fn encode(steps: &[FunctionStep]) -> Result<EncodedChain> {
    if steps.is_empty() {
        return Err(BtrfaasError::EmptyChain);
    }

    let mut names = Vec::with_capacity(steps.len());
    for step in steps {
        validate_step(step)?;
        names.push(step.name.as_str());
    }

    let options: Vec<&BTreeMap<String, String>> = steps.iter().map(|s| &s.options).collect();

    Ok(EncodedChain {
        chain: names.join(&CHAIN_DELIMITER.to_string()),
        options: serde_json::to_string(&options)?,
    })
}

/// Decode the chain and options headers
///
/// Names are trimmed of surrounding spaces. A missing options header means no
/// step has options; a present one must hold exactly one object per step.
pub fn decode(chain_header: &str, options_header: Option<&str>) -> Result<ChainDescriptor> {
    if chain_header.trim().is_empty() {
        return Err(BtrfaasError::EmptyChain);
    }

    let names: Vec<&str> = chain_header.split(CHAIN_DELIMITER).map(str::trim).collect();

    let options: Vec<BTreeMap<String, String>> = match options_header.map(str::trim) {
        None | Some("") => vec![BTreeMap::new(); names.len()],
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            BtrfaasError::InvalidOptions(format!(
                "{} must be a JSON array of string maps: {}",
                OPTIONS_HEADER, e
            ))
        })?,
    };

    if options.len() != names.len() {
        return Err(BtrfaasError::ChainOptionsMismatch {
            chain: names.len(),
            options: options.len(),
        });
    }

    let steps = names
        .into_iter()
        .zip(options)
        .map(|(name, options)| FunctionStep {
            name: name.to_string(),
            options,
        })
        .collect();

    ChainDescriptor::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_joins_names_and_keeps_positions() {
        let steps = vec![
            FunctionStep::new("f1").with_option("x", "1"),
            FunctionStep::new("f2"),
        ];
        let encoded = encode(&steps).unwrap();
        assert_eq!(encoded.chain, "f1|f2");
        assert_eq!(encoded.options, r#"[{"x":"1"},{}]"#);
    }

    #[test]
    fn test_options_do_not_leak_between_steps() {
        let steps = vec![
            FunctionStep::new("f1").with_option("x", "1"),
            FunctionStep::new("f2"),
        ];
        let encoded = encode(&steps).unwrap();
        let decoded = decode(&encoded.chain, Some(&encoded.options)).unwrap();
        assert_eq!(decoded.steps()[0].options.get("x").map(String::as_str), Some("1"));
        assert!(decoded.steps()[1].options.is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let steps = vec![
            FunctionStep::new("echo"),
            FunctionStep::new("tr").with_option("from", "a-z").with_option("to", "A-Z"),
            FunctionStep::new("grpc://wc:2424"),
        ];
        let encoded = encode(&steps).unwrap();
        let decoded = decode(&encoded.chain, Some(&encoded.options)).unwrap();
        assert_eq!(decoded.into_steps(), steps);
    }

    #[test]
    fn test_delimiter_in_name_is_invalid_identifier() {
        let err = encode(&[FunctionStep::new("a|b")]).unwrap_err();
        assert!(matches!(err, BtrfaasError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_whitespace_in_name_is_invalid_identifier() {
        assert!(matches!(
            encode(&[FunctionStep::new("a b")]),
            Err(BtrfaasError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            decode("a||b", None),
            Err(BtrfaasError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_empty_chain() {
        assert!(matches!(encode(&[]), Err(BtrfaasError::EmptyChain)));
        assert!(matches!(decode("", None), Err(BtrfaasError::EmptyChain)));
        assert!(matches!(decode("   ", Some("[]")), Err(BtrfaasError::EmptyChain)));
        assert!(matches!(
            ChainDescriptor::new(Vec::new()),
            Err(BtrfaasError::EmptyChain)
        ));
    }

    #[test]
    fn test_count_mismatch() {
        let err = decode("a|b", Some(r#"[{}]"#)).unwrap_err();
        match err {
            BtrfaasError::ChainOptionsMismatch { chain, options } => {
                assert_eq!(chain, 2);
                assert_eq!(options, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(
            decode("a", Some(r#"[{},{}]"#)),
            Err(BtrfaasError::ChainOptionsMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_options_header_means_no_options() {
        let decoded = decode("a | b", None).unwrap();
        assert_eq!(decoded.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(decoded.steps().iter().all(|s| s.options.is_empty()));
    }

    #[test]
    fn test_malformed_options_json() {
        assert!(matches!(
            decode("a", Some("{}")),
            Err(BtrfaasError::InvalidOptions(_))
        ));
        assert!(matches!(
            decode("a", Some(r#"[{"x":1}]"#)),
            Err(BtrfaasError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_option_keys_must_survive_the_wire() {
        for options in [r#"[{"a=b":"c"}]"#, r#"[{"":"x"}]"#] {
            assert!(
                matches!(decode("a", Some(options)), Err(BtrfaasError::InvalidOptions(_))),
                "{}",
                options
            );
        }

        // '=' in a value is fine, only the first one splits
        let decoded = decode("a", Some(r#"[{"expr":"x=y"}]"#)).unwrap();
        assert_eq!(decoded.steps()[0].options["expr"], "x=y");

        let mut step = FunctionStep::new("a");
        step.options.insert("a=b".to_string(), "c".to_string());
        assert!(matches!(
            encode(&[step]),
            Err(BtrfaasError::InvalidOptions(_))
        ));
    }
}
