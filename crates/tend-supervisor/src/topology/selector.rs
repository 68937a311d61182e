//! `app[:instance]` command-line selectors.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Addresses everything, one application, or one instance of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    app: Option<String>,
    instance: Option<String>,
}

/// Errors raised while parsing a [`Selector`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    /// The application part is empty.
    #[error("'{0}' does not name an application")]
    MissingApplication(String),
    /// The instance part after `:` is empty.
    #[error("'{0}' does not name an instance after ':'")]
    MissingInstance(String),
    /// More than one `:` separator.
    #[error("'{0}' has more than one ':' separator")]
    TooManySeparators(String),
}

impl Selector {
    /// Selects every application.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            app: None,
            instance: None,
        }
    }

    /// Parses an optional selector argument.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError`] for malformed selectors.
    pub fn from_argument(argument: Option<&str>) -> Result<Self, SelectorError> {
        argument.map_or_else(|| Ok(Self::all()), str::parse)
    }

    /// Selected application, if any.
    #[must_use]
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// Selected instance, if any.
    #[must_use]
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Whether the selector addresses every application.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        self.app.is_none()
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.split(':');
        let app = parts.next().unwrap_or_default();
        let instance = parts.next();
        if parts.next().is_some() {
            return Err(SelectorError::TooManySeparators(text.to_owned()));
        }
        if app.is_empty() {
            return Err(SelectorError::MissingApplication(text.to_owned()));
        }
        if instance.is_some_and(str::is_empty) {
            return Err(SelectorError::MissingInstance(text.to_owned()));
        }
        Ok(Self {
            app: Some(app.to_owned()),
            instance: instance.map(str::to_owned),
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.app, &self.instance) {
            (Some(app), Some(instance)) => write!(formatter, "{app}:{instance}"),
            (Some(app), None) => formatter.write_str(app),
            (None, _) => formatter.write_str("all instances"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::app("shop", Some("shop"), None)]
    #[case::instance("shop:router", Some("shop"), Some("router"))]
    fn parses_valid_selectors(
        #[case] text: &str,
        #[case] app: Option<&str>,
        #[case] instance: Option<&str>,
    ) {
        let selector: Selector = text.parse().expect("selector should parse");
        assert_eq!(selector.app(), app);
        assert_eq!(selector.instance(), instance);
        assert_eq!(selector.to_string(), text);
    }

    #[rstest]
    #[case::empty("", SelectorError::MissingApplication(String::new()))]
    #[case::no_app(":router", SelectorError::MissingApplication(String::from(":router")))]
    #[case::no_instance("shop:", SelectorError::MissingInstance(String::from("shop:")))]
    #[case::nested("a:b:c", SelectorError::TooManySeparators(String::from("a:b:c")))]
    fn rejects_malformed_selectors(#[case] text: &str, #[case] expected: SelectorError) {
        assert_eq!(text.parse::<Selector>(), Err(expected));
    }

    #[rstest]
    fn absent_argument_selects_everything() {
        let selector = Selector::from_argument(None).expect("absent selector is valid");
        assert!(selector.is_all());
        assert_eq!(selector.to_string(), "all instances");
    }
}
