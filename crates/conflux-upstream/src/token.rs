use secrecy::SecretString;

/// Resolve a configured credential
///
/// A value starting with `$` names an environment variable; anything else is
/// used verbatim. An unset or empty variable resolves to no token and is only
/// logged, so a backend with a missing credential is still reachable
/// anonymously.
pub fn resolve_token(token_or_env: Option<&str>) -> Option<SecretString> {
    let raw = token_or_env.filter(|t| !t.is_empty())?;

    let Some(var_name) = raw.strip_prefix('$') else {
        return Some(SecretString::from(raw.to_owned()));
    };

    match std::env::var(var_name) {
        Ok(value) if !value.is_empty() => Some(SecretString::from(value)),
        _ => {
            tracing::warn!(variable = var_name, "environment variable for upstream token not found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn resolved(input: Option<&str>) -> Option<String> {
        resolve_token(input).map(|t| t.expose_secret().to_owned())
    }

    #[test]
    fn literal_token_is_returned_verbatim() {
        assert_eq!(resolved(Some("sk-literal")).as_deref(), Some("sk-literal"));
    }

    #[test]
    fn env_reference_reads_variable() {
        temp_env::with_var("CONFLUX_UPSTREAM_TOKEN", Some("from-env"), || {
            assert_eq!(resolved(Some("$CONFLUX_UPSTREAM_TOKEN")).as_deref(), Some("from-env"));
        });
    }

    #[test]
    fn unset_env_reference_is_absent() {
        temp_env::with_var_unset("CONFLUX_UPSTREAM_TOKEN", || {
            assert_eq!(resolved(Some("$CONFLUX_UPSTREAM_TOKEN")), None);
        });
    }

    #[test]
    fn empty_env_value_is_absent() {
        temp_env::with_var("CONFLUX_UPSTREAM_TOKEN", Some(""), || {
            assert_eq!(resolved(Some("$CONFLUX_UPSTREAM_TOKEN")), None);
        });
    }

    #[test]
    fn empty_and_missing_input_are_absent() {
        assert_eq!(resolved(Some("")), None);
        assert_eq!(resolved(None), None);
    }

    #[test]
    fn dollar_only_in_the_middle_is_literal() {
        assert_eq!(resolved(Some("abc$DEF")).as_deref(), Some("abc$DEF"));
    }
}
