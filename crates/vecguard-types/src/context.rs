//! Tenant identity and the per-request isolation context.
//!
//! `ProjectId` and `Language` can only be obtained by parsing, so holding one
//! means the value is well formed. `IsolationContext` pairs them and is never
//! mutated after construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IsolationError;

/// Maximum length of a tenant identifier.
pub const MAX_PROJECT_ID_LEN: usize = 64;

/// ISO 639-1 two-letter language codes, sorted for binary search.
pub const ISO_639_1_CODES: &[&str] = &[
    "aa", "ab", "ae", "af", "ak", "am", "an", "ar", "as", "av", "ay", "az", "ba", "be", "bg",
    "bh", "bi", "bm", "bn", "bo", "br", "bs", "ca", "ce", "ch", "co", "cr", "cs", "cu", "cv",
    "cy", "da", "de", "dv", "dz", "ee", "el", "en", "eo", "es", "et", "eu", "fa", "ff", "fi",
    "fj", "fo", "fr", "fy", "ga", "gd", "gl", "gn", "gu", "gv", "ha", "he", "hi", "ho", "hr",
    "ht", "hu", "hy", "hz", "ia", "id", "ie", "ig", "ii", "ik", "io", "is", "it", "iu", "ja",
    "jv", "ka", "kg", "ki", "kj", "kk", "kl", "km", "kn", "ko", "kr", "ks", "ku", "kv", "kw",
    "ky", "la", "lb", "lg", "li", "ln", "lo", "lt", "lu", "lv", "mg", "mh", "mi", "mk", "ml",
    "mn", "mr", "ms", "mt", "my", "na", "nb", "nd", "ne", "ng", "nl", "nn", "no", "nr", "nv",
    "ny", "oc", "oj", "om", "or", "os", "pa", "pi", "pl", "ps", "pt", "qu", "rm", "rn", "ro",
    "ru", "rw", "sa", "sc", "sd", "se", "sg", "si", "sk", "sl", "sm", "sn", "so", "sq", "sr",
    "ss", "st", "su", "sv", "sw", "ta", "te", "tg", "th", "ti", "tk", "tl", "tn", "to", "tr",
    "ts", "tt", "tw", "ty", "ug", "uk", "ur", "uz", "ve", "vi", "vo", "wa", "wo", "xh", "yi",
    "yo", "za", "zh", "zu",
];

/// A well-formed tenant identifier.
///
/// 1-64 ASCII characters from `[A-Za-z0-9._-]`, starting with an alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Parse a tenant identifier, reporting failures against `field`.
    pub fn parse_field(raw: &str, field: &str) -> Result<Self, IsolationError> {
        if raw.is_empty() {
            return Err(IsolationError::context(field, "must not be empty"));
        }
        if raw.len() > MAX_PROJECT_ID_LEN {
            return Err(IsolationError::context(
                field,
                format!("must be at most {MAX_PROJECT_ID_LEN} characters"),
            ));
        }
        if !raw.as_bytes()[0].is_ascii_alphanumeric() {
            return Err(IsolationError::context(
                field,
                "must start with an ASCII letter or digit",
            ));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(IsolationError::context(
                field,
                format!("contains invalid character {c:?}"),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn parse(raw: &str) -> Result<Self, IsolationError> {
        Self::parse_field(raw, "project_id")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectId {
    type Error = IsolationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProjectId> for String {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recognized ISO 639-1 language code, stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Parse a language code, reporting failures against `field`.
    ///
    /// Surrounding whitespace is ignored and the code is matched
    /// case-insensitively.
    pub fn parse_field(raw: &str, field: &str) -> Result<Self, IsolationError> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(IsolationError::context(field, "must not be empty"));
        }
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(IsolationError::context(
                field,
                "must be a two-letter ISO 639-1 code",
            ));
        }
        let code = code.to_ascii_lowercase();
        if ISO_639_1_CODES.binary_search(&code.as_str()).is_err() {
            return Err(IsolationError::context(
                field,
                format!("unrecognized language code {code:?}"),
            ));
        }
        Ok(Self(code))
    }

    pub fn parse(raw: &str) -> Result<Self, IsolationError> {
        Self::parse_field(raw, "language")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Language {
    type Error = IsolationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request-scoped tenant scope.
///
/// Built once per request from the caller's authenticated session and passed
/// by reference into every read and write. There are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsolationContext {
    project_id: ProjectId,
    language: Language,
}

impl IsolationContext {
    pub fn new(project_id: ProjectId, language: Language) -> Self {
        Self {
            project_id,
            language,
        }
    }

    /// Parse both halves of the context from raw session values.
    pub fn parse(project_id: &str, language: &str) -> Result<Self, IsolationError> {
        Ok(Self::new(ProjectId::parse(project_id)?, Language::parse(language)?))
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn language(&self) -> &Language {
        &self.language
    }
}

impl fmt::Display for IsolationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_codes_sorted() {
        let mut sorted = ISO_639_1_CODES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ISO_639_1_CODES);
    }

    #[test]
    fn test_project_id_accepts_uuid_and_slugs() {
        assert!(ProjectId::parse("3f2b8c1e-9d4a-4b6f-8e2a-1c5d7f9b0a11").is_ok());
        assert!(ProjectId::parse("acme_docs.v2").is_ok());
        assert!(ProjectId::parse("7").is_ok());
    }

    #[test]
    fn test_project_id_rejects_malformed() {
        for raw in ["", "-leading", "has space", "tenant/other", "x\u{0}y"] {
            let err = ProjectId::parse(raw).unwrap_err();
            assert_eq!(err.field(), Some("project_id"), "input {raw:?}");
        }
        let long = "a".repeat(MAX_PROJECT_ID_LEN + 1);
        assert!(ProjectId::parse(&long).is_err());
    }

    #[test]
    fn test_language_normalizes_case() {
        let lang = Language::parse(" EN ").unwrap();
        assert_eq!(lang.as_str(), "en");
    }

    #[test]
    fn test_language_rejects_unknown_codes() {
        assert!(Language::parse("").is_err());
        assert!(Language::parse("eng").is_err());
        assert!(Language::parse("xx").is_err());
        assert!(Language::parse("e1").is_err());
    }

    #[test]
    fn test_context_display() {
        let ctx = IsolationContext::parse("acme", "ru").unwrap();
        assert_eq!(ctx.to_string(), "acme/ru");
        assert_eq!(ctx.project_id().as_str(), "acme");
        assert_eq!(ctx.language().as_str(), "ru");
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let ok: Language = serde_json::from_str("\"de\"").unwrap();
        assert_eq!(ok.as_str(), "de");
        assert!(serde_json::from_str::<Language>("\"zz\"").is_err());
        assert!(serde_json::from_str::<ProjectId>("\"\"").is_err());
    }
}
