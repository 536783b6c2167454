//! Usage keys and path-component validation.
//!
//! Every component of a [`UsageKey`] becomes a directory name under the store's
//! base directory, so each one is checked before it can reach the filesystem:
//! no path delimiters, no characters that are illegal on common filesystems,
//! and never `.` or `..`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KeyError, Result};

/// Characters that may never appear in a key component.
pub const ILLEGAL_CHARS: &str = ":*?\"<>|/\\";

/// Checks a single path component.
///
/// `component` names the field in error messages (`app`, `env`, ...).
///
/// # Errors
///
/// Returns [`KeyError`] if the value is empty, contains any of
/// [`ILLEGAL_CHARS`], or equals `.` or `..`.
pub fn validate_component(component: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KeyError::Empty { component }.into());
    }
    if value.chars().any(|c| ILLEGAL_CHARS.contains(c)) {
        return Err(KeyError::IllegalCharacters {
            component,
            value: value.to_string(),
            illegal: ILLEGAL_CHARS,
        }
        .into());
    }
    if value == "." || value == ".." {
        return Err(KeyError::Navigational { component }.into());
    }
    Ok(())
}

/// Identifies a single counter series: `app/env/category/key`.
///
/// Only constructible through [`UsageKey::new`], so holding one means all
/// four components passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawUsageKey")]
pub struct UsageKey {
    app: String,
    env: String,
    category: String,
    key: String,
}

#[derive(Deserialize)]
struct RawUsageKey {
    app: String,
    env: String,
    category: String,
    key: String,
}

impl TryFrom<RawUsageKey> for UsageKey {
    type Error = crate::error::TallyError;

    fn try_from(raw: RawUsageKey) -> Result<Self> {
        Self::new(raw.app, raw.env, raw.category, raw.key)
    }
}

impl UsageKey {
    /// Validates and builds a key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] for the first component that fails
    /// [`validate_component`].
    pub fn new(
        app: impl Into<String>,
        env: impl Into<String>,
        category: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self> {
        let (app, env, category, key) = (app.into(), env.into(), category.into(), key.into());
        validate_component("app", &app)?;
        validate_component("env", &env)?;
        validate_component("category", &category)?;
        validate_component("key", &key)?;
        Ok(Self {
            app,
            env,
            category,
            key,
        })
    }

    /// The application component.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// The environment component.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// The category component.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The key component.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The four components in directory order.
    pub fn components(&self) -> [&str; 4] {
        [&self.app, &self.env, &self.category, &self.key]
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.app, self.env, self.category, self.key)
    }
}
