//! Anti-forgery token extraction from rendered login pages.
//!
//! The login form carries a hidden input such as
//! `<input type="hidden" name="csrf_token" value="..."/>`. Its value has to be
//! echoed back with the credentials, so it is pulled out of the page markup
//! with a case-insensitive pattern match.

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::debug;

/// Name of the hidden form field carrying the token.
pub const DEFAULT_TOKEN_FIELD: &str = "csrf_token";

lazy_static::lazy_static! {
    static ref DEFAULT_EXTRACTOR: TokenExtractor = TokenExtractor::build(DEFAULT_TOKEN_FIELD);
}

/// Errors that can occur while preparing an extractor.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Token field name cannot be empty")]
    EmptyFieldName,

    #[error("Regex compilation failed: {0}")]
    RegexError(#[from] regex::Error),
}

/// Compiled matcher for one hidden input field.
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    field: String,
    name_first: Regex,
    value_first: Regex,
}

impl TokenExtractor {
    /// Builds an extractor for the given input name.
    pub fn new(field: &str) -> Result<Self, ExtractionError> {
        let field = field.trim();
        if field.is_empty() {
            return Err(ExtractionError::EmptyFieldName);
        }

        let escaped = regex::escape(field);
        let name_first = RegexBuilder::new(&format!(
            r#"name="{}"[^>]*value="([^"]+)""#,
            escaped
        ))
        .case_insensitive(true)
        .build()?;
        let value_first = RegexBuilder::new(&format!(
            r#"value="([^"]+)"[^>]*name="{}""#,
            escaped
        ))
        .case_insensitive(true)
        .build()?;

        Ok(Self {
            field: field.to_string(),
            name_first,
            value_first,
        })
    }

    // The default field name is a plain identifier, so compilation cannot fail.
    fn build(field: &str) -> Self {
        Self::new(field).expect("default token pattern must compile")
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the value attribute of the matching input, if present.
    pub fn extract(&self, body: &str) -> Option<String> {
        if body.is_empty() {
            return None;
        }

        let token = self
            .name_first
            .captures(body)
            .or_else(|| self.value_first.captures(body))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        if token.is_none() {
            debug!(field = %self.field, "Token field not found in page body");
        }
        token
    }
}

impl Default for TokenExtractor {
    fn default() -> Self {
        DEFAULT_EXTRACTOR.clone()
    }
}

/// Extracts the `csrf_token` hidden input value from a login page.
///
/// # Example
/// ```
/// use login_loadtest::extractor::extract_token;
///
/// let html = r#"<input type="hidden" name="csrf_token" value="abc123"/>"#;
/// assert_eq!(extract_token(html), Some("abc123".to_string()));
/// assert_eq!(extract_token("<form></form>"), None);
/// ```
pub fn extract_token(body: &str) -> Option<String> {
    DEFAULT_EXTRACTOR.extract(body)
}
