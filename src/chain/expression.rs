//! Command line chain expressions
//!
//! `btrfaasctl` accepts chains written as `fn1 key=value | fn2 | fn3 a=b c=d`.
//! Each `|`-separated part is split on whitespace: the first token names the
//! function and every following token must be a `key=value` option.

use crate::error::{BtrfaasError, Result};

use super::descriptor::{ChainDescriptor, FunctionStep, CHAIN_DELIMITER};

/// Parse a chain expression into a descriptor
pub fn parse_expression(expression: &str) -> Result<ChainDescriptor> {
    if expression.trim().is_empty() {
        return Err(BtrfaasError::EmptyChain);
    }

    let mut steps = Vec::new();
    for (index, part) in expression.split(CHAIN_DELIMITER).enumerate() {
        let mut tokens = part.split_whitespace();
        let name = tokens.next().ok_or_else(|| {
            BtrfaasError::InvalidExpression(format!(
                "malformed expression: step {} has no function name",
                index
            ))
        })?;

        let mut step = FunctionStep::new(name);
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    step.options.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(BtrfaasError::InvalidExpression(format!(
                        "malformed expression: option '{}' of '{}' is not key=value",
                        token, name
                    )))
                }
            }
        }
        steps.push(step);
    }

    ChainDescriptor::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_function() {
        let chain = parse_expression("echo").unwrap();
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["echo"]);
        assert!(chain.steps()[0].options.is_empty());
    }

    #[test]
    fn test_parse_chain_with_options() {
        let chain = parse_expression("echo | uppercase skip=1 | wc  mode=lines  x=").unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.steps()[0].name, "echo");
        assert!(chain.steps()[0].options.is_empty());
        assert_eq!(chain.steps()[1].options.get("skip").map(String::as_str), Some("1"));
        assert_eq!(chain.steps()[2].options.get("mode").map(String::as_str), Some("lines"));
        assert_eq!(chain.steps()[2].options.get("x").map(String::as_str), Some(""));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let chain = parse_expression("f expr=a=b").unwrap();
        assert_eq!(chain.steps()[0].options.get("expr").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn test_empty_part_is_malformed() {
        assert!(matches!(
            parse_expression("echo || echo"),
            Err(BtrfaasError::InvalidExpression(_))
        ));
        assert!(matches!(
            parse_expression("echo |"),
            Err(BtrfaasError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_bare_token_is_malformed() {
        let err = parse_expression("echo verbose").unwrap_err();
        assert!(err.to_string().contains("malformed expression"));
        assert!(matches!(
            parse_expression("echo =x"),
            Err(BtrfaasError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_blank_expression_is_empty_chain() {
        assert!(matches!(parse_expression("  "), Err(BtrfaasError::EmptyChain)));
    }
}
