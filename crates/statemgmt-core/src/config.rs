#![forbid(unsafe_code)]

//! Runtime configuration for the property graph.

/// Environment variable read by [`StateConfig::from_env`].
pub const UPDATE_MODE_ENV: &str = "STATEMGMT_UPDATE_MODE";

/// How a view reacts to a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Properties record which element ids read them during render; a change
    /// marks exactly those elements dirty.
    #[default]
    Partial,
    /// No dependency recording; a change schedules a full re-render of every
    /// element the view owns.
    Full,
}

impl UpdateMode {
    /// Parse a mode name (`partial` / `full`, case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "partial" | "pu" => Some(Self::Partial),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    #[must_use]
    pub const fn records_dependencies(self) -> bool {
        matches!(self, Self::Partial)
    }
}

/// Configuration shared by every property and view built from one
/// [`StateContext`](crate::StateContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    /// Partial or full update.
    pub update_mode: UpdateMode,
    /// Compare the value a one-way prop is notified with against a fresh
    /// unmonitored read of its source (debug builds only).
    pub check_prop_consistency: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::Partial,
            check_prop_consistency: cfg!(debug_assertions),
        }
    }
}

impl StateConfig {
    /// Defaults overridden by `STATEMGMT_UPDATE_MODE` when set and valid.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(UPDATE_MODE_ENV) {
            match UpdateMode::parse(&raw) {
                Some(mode) => config.update_mode = mode,
                None => tracing::warn!(
                    value = %raw,
                    "{UPDATE_MODE_ENV}: unknown update mode, using default"
                ),
            }
        }
        config
    }

    /// Set the update mode.
    #[must_use]
    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// Toggle the one-way prop consistency check.
    #[must_use]
    pub fn with_prop_consistency_check(mut self, enabled: bool) -> Self {
        self.check_prop_consistency = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_names() {
        assert_eq!(UpdateMode::parse("Partial"), Some(UpdateMode::Partial));
        assert_eq!(UpdateMode::parse(" full "), Some(UpdateMode::Full));
        assert_eq!(UpdateMode::parse("incremental"), None);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = StateConfig::default()
            .with_update_mode(UpdateMode::Full)
            .with_prop_consistency_check(false);
        assert_eq!(config.update_mode, UpdateMode::Full);
        assert!(!config.check_prop_consistency);
        assert!(!config.update_mode.records_dependencies());
    }
}
