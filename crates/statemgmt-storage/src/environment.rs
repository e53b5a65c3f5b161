#![forbid(unsafe_code)]

//! Read-only device settings exposed through app storage.
//!
//! [`Environment::env_prop`] publishes one setting under an app storage key
//! through a one-way prop: views read it, the host updates it with
//! [`Environment::on_value_changed`].

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use statemgmt_core::{ObservedProperty, PropertyValue};

use crate::app_storage::AppStorage;
use crate::error::Result;

pub const ACCESSIBILITY_ENABLED: &str = "accessibilityEnabled";
pub const COLOR_MODE: &str = "colorMode";
pub const FONT_SCALE: &str = "fontScale";
pub const FONT_WEIGHT_SCALE: &str = "fontWeightScale";
pub const LAYOUT_DIRECTION: &str = "layoutDirection";
pub const LANGUAGE_CODE: &str = "languageCode";

/// A setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue for EnvValue {}

impl EnvValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for EnvValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Light,
    Dark,
}

impl ColorMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutDirection {
    #[default]
    Ltr,
    Rtl,
    Auto,
}

impl LayoutDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltr => "ltr",
            Self::Rtl => "rtl",
            Self::Auto => "auto",
        }
    }
}

/// Source of the well-known settings.
pub trait EnvironmentBackend {
    fn accessibility_enabled(&self) -> bool;
    fn color_mode(&self) -> ColorMode;
    fn font_scale(&self) -> f64;
    fn font_weight_scale(&self) -> f64;
    fn layout_direction(&self) -> LayoutDirection;
    fn language_code(&self) -> String;
}

/// Fixed settings, for headless hosts and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticEnvironment {
    pub accessibility_enabled: bool,
    pub color_mode: ColorMode,
    pub font_scale: f64,
    pub font_weight_scale: f64,
    pub layout_direction: LayoutDirection,
    pub language_code: String,
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            accessibility_enabled: false,
            color_mode: ColorMode::Light,
            font_scale: 1.0,
            font_weight_scale: 1.0,
            layout_direction: LayoutDirection::Ltr,
            language_code: "en".to_owned(),
        }
    }
}

impl EnvironmentBackend for StaticEnvironment {
    fn accessibility_enabled(&self) -> bool {
        self.accessibility_enabled
    }

    fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    fn font_scale(&self) -> f64 {
        self.font_scale
    }

    fn font_weight_scale(&self) -> f64 {
        self.font_weight_scale
    }

    fn layout_direction(&self) -> LayoutDirection {
        self.layout_direction
    }

    fn language_code(&self) -> String {
        self.language_code.clone()
    }
}

pub struct Environment {
    app: AppStorage,
    backend: Box<dyn EnvironmentBackend>,
    props: RefCell<Vec<(String, ObservedProperty<EnvValue>)>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

impl Environment {
    pub fn new(app: &AppStorage, backend: impl EnvironmentBackend + 'static) -> Self {
        Self {
            app: app.clone(),
            backend: Box::new(backend),
            props: RefCell::new(Vec::new()),
        }
    }

    /// Publish setting `key`. Well-known keys take their value from the
    /// backend, other keys use `default`. Returns `Ok(false)` if the app
    /// storage already has `key`.
    ///
    /// # Errors
    ///
    /// Propagates failures creating the prop.
    pub fn env_prop(&self, key: &str, default: impl Into<EnvValue>) -> Result<bool> {
        if self.app.has(key) {
            tracing::warn!(key, "Environment::env_prop: key already exists in app storage");
            return Ok(false);
        }
        let value = self.backend_value(key).unwrap_or_else(|| default.into());
        let prop = self.app.set_and_prop(key, value, None, Some(key))?;
        self.props.borrow_mut().push((key.to_owned(), prop));
        tracing::debug!(key, "Environment::env_prop");
        Ok(true)
    }

    /// Publish several settings; stops at the first failure.
    ///
    /// # Errors
    ///
    /// As [`env_prop`](Self::env_prop).
    pub fn env_props<K, V>(&self, props: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<EnvValue>,
    {
        for (key, default) in props {
            self.env_prop(key.as_ref(), default)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.props.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Current value of a published setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<EnvValue> {
        self.props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, prop)| prop.get_unmonitored())
    }

    /// The host reports a new value for `key`.
    pub fn on_value_changed(&self, key: &str, value: impl Into<EnvValue>) -> bool {
        let updated = self.app.set(key, value.into());
        if !updated {
            tracing::warn!(key, "Environment::on_value_changed: failed to update app storage");
        }
        updated
    }

    /// Drop every published prop and remove its app storage key.
    pub fn about_to_be_deleted(&self) {
        let props = std::mem::take(&mut *self.props.borrow_mut());
        for (key, prop) in props {
            prop.about_to_be_deleted();
            self.app.delete(&key);
        }
    }

    fn backend_value(&self, key: &str) -> Option<EnvValue> {
        let backend = &self.backend;
        let value = match key {
            ACCESSIBILITY_ENABLED => EnvValue::Bool(backend.accessibility_enabled()),
            COLOR_MODE => EnvValue::from(backend.color_mode().as_str()),
            FONT_SCALE => EnvValue::Number(backend.font_scale()),
            FONT_WEIGHT_SCALE => EnvValue::Number((backend.font_weight_scale() * 100.0).round() / 100.0),
            LAYOUT_DIRECTION => EnvValue::from(backend.layout_direction().as_str()),
            LANGUAGE_CODE => EnvValue::Text(backend.language_code()),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statemgmt_core::StateContext;

    fn setup(backend: StaticEnvironment) -> (AppStorage, Environment) {
        let app = AppStorage::new(&StateContext::default());
        let env = Environment::new(&app, backend);
        (app, env)
    }

    #[test]
    fn well_known_keys_come_from_backend() {
        let (app, env) = setup(StaticEnvironment {
            color_mode: ColorMode::Dark,
            font_weight_scale: 1.23456,
            ..StaticEnvironment::default()
        });
        env.env_props([(COLOR_MODE, "light"), (FONT_WEIGHT_SCALE, "ignored")]).unwrap();
        env.env_prop("custom", 3.0).unwrap();

        assert_eq!(app.get::<EnvValue>(COLOR_MODE), Some(EnvValue::from("dark")));
        assert_eq!(app.get::<EnvValue>(FONT_WEIGHT_SCALE), Some(EnvValue::Number(1.23)));
        assert_eq!(env.get("custom"), Some(EnvValue::Number(3.0)));
        assert_eq!(env.keys(), vec![COLOR_MODE, FONT_WEIGHT_SCALE, "custom"]);
    }

    #[tracing_test::traced_test]
    #[test]
    fn existing_key_is_refused() {
        let (app, env) = setup(StaticEnvironment::default());
        app.set_or_create(LANGUAGE_CODE, EnvValue::from("fr"));
        assert!(!env.env_prop(LANGUAGE_CODE, "de").unwrap());
        assert!(logs_contain("already exists"));
        assert!(env.keys().is_empty());
    }

    #[test]
    fn host_updates_flow_to_props() {
        let (app, env) = setup(StaticEnvironment::default());
        env.env_prop(ACCESSIBILITY_ENABLED, false).unwrap();

        assert!(env.on_value_changed(ACCESSIBILITY_ENABLED, true));
        assert_eq!(env.get(ACCESSIBILITY_ENABLED).and_then(|v| v.as_bool()), Some(true));
        assert!(!env.on_value_changed("unpublished", true));
        assert!(!app.has("unpublished"));
    }

    #[test]
    fn deletion_removes_app_keys() {
        let (app, env) = setup(StaticEnvironment::default());
        env.env_prop(FONT_SCALE, 1.0).unwrap();
        assert_eq!(app.number_of_subscribers_to(FONT_SCALE), Some(1));

        env.about_to_be_deleted();
        assert!(!app.has(FONT_SCALE));
        assert!(env.keys().is_empty());
    }
}
