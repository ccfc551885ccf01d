//! Definition file parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{ConfigError, DefinitionFile};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitutes `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns the names of every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String, Vec<String>> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            if !missing.iter().any(|name| name == &caps[1]) {
                missing.push(caps[1].to_string());
            }
            String::new()
        })
    });

    if missing.is_empty() {
        Ok(result.into_owned())
    } else {
        Err(missing)
    }
}

/// Parses definition text read from `path` (used for error messages).
pub fn parse_definition(yaml: &str, path: &Path) -> Result<DefinitionFile, ConfigError> {
    let substituted = substitute_env_vars(yaml).map_err(|names| ConfigError::MissingEnv {
        path: path.to_path_buf(),
        names,
    })?;
    serde_yaml::from_str(&substituted).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and parses one definition file.
pub fn parse_definition_file(path: &Path) -> Result<DefinitionFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_definition(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::IntervalSize;
    use crate::operation::OneOrMany;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("STOREFLOW_TEST_HOST", "db.internal");
        let out = substitute_env_vars("host: ${STOREFLOW_TEST_HOST}").unwrap();
        assert_eq!(out, "host: db.internal");
    }

    #[test]
    fn test_missing_env_vars_all_reported() {
        let err = substitute_env_vars("${STOREFLOW_UNSET_A} ${STOREFLOW_UNSET_B} ${STOREFLOW_UNSET_A}")
            .unwrap_err();
        assert_eq!(err, vec!["STOREFLOW_UNSET_A", "STOREFLOW_UNSET_B"]);
    }

    #[test]
    fn test_parse_keeps_declaration_order() {
        let yaml = r#"
name: nightly
debug: true
stores:
  zeta: { type: memory, name: z }
  alpha: { type: pg, name: warehouse, host: localhost }
operation:
  extract:
    zeta: stream
  load:
    alpha:
      - use: upsert
        with: { collection: users, key: id }
      - insert
  interval:
    100: { alpha: log }
    "1000": { zeta: log }
"#;
        let file = parse_definition(yaml, Path::new("nightly.yaml")).unwrap();
        assert_eq!(file.name.as_deref(), Some("nightly"));
        assert!(file.debug);

        let stores = file.stores.unwrap();
        let aliases: Vec<&str> = stores.iter().map(|(alias, _)| alias.as_str()).collect();
        assert_eq!(aliases, vec!["zeta", "alpha"]);

        let Some(OneOrMany::One(operation)) = file.operation else {
            panic!("expected one operation");
        };
        let load = operation.load.unwrap();
        let (alias, actions) = &load.0[0];
        assert_eq!(alias, "alpha");
        assert!(matches!(actions, OneOrMany::Many(list) if list.len() == 2));

        let sizes: Vec<IntervalSize> = operation
            .interval
            .unwrap()
            .iter()
            .map(|(size, _)| *size)
            .collect();
        assert_eq!(sizes, vec![IntervalSize(100), IntervalSize(1000)]);
    }

    #[test]
    fn test_operation_list() {
        let yaml = r#"
stores:
  src: { type: memory, name: a }
operations:
  - { name: first, extract: { src: stream }, load: { src: insert } }
  - { name: second, extract: { src: stream }, load: { src: insert } }
"#;
        let file = parse_definition(yaml, Path::new("pair.yaml")).unwrap();
        let Some(OneOrMany::Many(operations)) = file.operation else {
            panic!("expected a list of operations");
        };
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[1].name.as_deref(), Some("second"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_definition("stores: [", Path::new("broken.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse broken.yaml"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let err = parse_definition("stroes: {}", Path::new("typo.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
