//! Keyword trigger deciding which forum content gets relayed.

use crate::error::ConfigError;

/// Default trigger keyword.
pub const DEFAULT_KEYWORD: &str = "discord";

/// Case-sensitive substring match on a configured keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFilter {
    keyword: String,
}

impl RelayFilter {
    pub fn new(keyword: impl Into<String>) -> Result<Self, ConfigError> {
        let keyword = keyword.into();
        if keyword.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_KEYWORD".into(),
                message: "keyword must not be empty".into(),
            });
        }
        Ok(Self { keyword })
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn matches(&self, text: &str) -> bool {
        text.contains(self.keyword.as_str())
    }
}

impl Default for RelayFilter {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_KEYWORD.to_string(),
        }
    }
}
