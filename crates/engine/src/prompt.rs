//! Prompt template loading and token substitution.
//!
//! Templates are UTF-8 files named `<stage>.txt` in the configured prompt
//! directory, loaded per stage invocation so edits apply without a
//! restart. Every `<<TOKEN>>` occurrence is replaced from the stage's
//! token map; any token left after substitution is a hard stage error.

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;

use cortex_domain::error::{Error, Result};

const TOKEN_PATTERN: &str = r"<<([A-Z0-9_]+)>>";

pub struct PromptRenderer {
    dir: PathBuf,
    token_re: Regex,
}

impl PromptRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            token_re: Regex::new(TOKEN_PATTERN).expect("token pattern is valid"),
        }
    }

    /// Load `<name>.txt` and substitute every token.
    pub fn render(&self, name: &str, tokens: &BTreeMap<String, String>) -> Result<String> {
        let path = self.dir.join(format!("{name}.txt"));
        let template = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("prompt template {}: {e}", path.display()))
        })?;
        self.render_str(name, &template, tokens)
    }

    /// Substitute tokens in an already-loaded template.
    pub fn render_str(
        &self,
        name: &str,
        template: &str,
        tokens: &BTreeMap<String, String>,
    ) -> Result<String> {
        let rendered = self
            .token_re
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let key = &caps[1];
                tokens
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            });

        let unresolved: Vec<String> = self
            .token_re
            .captures_iter(&rendered)
            .map(|c| c[1].to_string())
            .collect();

        if unresolved.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(Error::UnresolvedTokens {
                template: name.to_string(),
                tokens: unresolved,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn renderer() -> PromptRenderer {
        PromptRenderer::new("unused")
    }

    #[test]
    fn substitutes_all_tokens() {
        let out = renderer()
            .render_str(
                "router",
                "User said: <<USER_TEXT>> at <<NOW_ISO>>",
                &tokens(&[("USER_TEXT", "hi"), ("NOW_ISO", "2025-01-01T00:00:00Z")]),
            )
            .unwrap();
        assert_eq!(out, "User said: hi at 2025-01-01T00:00:00Z");
    }

    #[test]
    fn repeated_token_substituted_everywhere() {
        let out = renderer()
            .render_str("t", "<<A>> and <<A>>", &tokens(&[("A", "x")]))
            .unwrap();
        assert_eq!(out, "x and x");
    }

    #[test]
    fn unresolved_token_is_error_naming_it() {
        let err = renderer()
            .render_str("answer", "Hello <<WHO>> from <<WHERE>>", &tokens(&[("WHO", "you")]))
            .unwrap_err();
        match err {
            Error::UnresolvedTokens { template, tokens } => {
                assert_eq!(template, "answer");
                assert_eq!(tokens, vec!["WHERE".to_string()]);
            }
            other => panic!("expected UnresolvedTokens, got {other}"),
        }
    }

    #[test]
    fn lowercase_angle_text_is_not_a_token() {
        let out = renderer()
            .render_str("t", "keep <<this>> as is", &tokens(&[]))
            .unwrap();
        assert_eq!(out, "keep <<this>> as is");
    }

    #[test]
    fn substituted_value_containing_token_syntax_fails_loudly() {
        // One substitution pass, then a scan: a value carrying token
        // syntax is reported rather than silently leaking downstream.
        let err = renderer()
            .render_str("t", "<<A>>", &tokens(&[("A", "<<B>>")]))
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedTokens { .. }));
    }

    #[test]
    fn missing_template_file_is_config_error() {
        let r = PromptRenderer::new("/nonexistent-prompt-dir");
        let err = r.render("router", &tokens(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
