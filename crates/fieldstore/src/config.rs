#![forbid(unsafe_code)]

//! Store configuration.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::scheduler::{Clock, SystemClock};

/// Construction-time settings for a [`Store`](crate::Store).
#[derive(Clone)]
pub struct StoreConfig {
    /// Name attached to every diagnostic event of the store.
    pub label: Cow<'static, str>,
    /// Time source for debounce timers.
    pub clock: Rc<dyn Clock>,
    /// Delay used by [`Timing::debounced`](crate::Timing::debounced).
    pub default_debounce: Duration,
    /// Treat interceptor panics as faults instead of letting them unwind
    /// through [`Store::set`](crate::Store::set).
    pub catch_middleware_panics: bool,
}

impl StoreConfig {
    /// Set the diagnostic label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Rc::new(clock);
        self
    }

    /// Set the default debounce delay.
    #[must_use]
    pub fn with_default_debounce(mut self, delay: Duration) -> Self {
        self.default_debounce = delay;
        self
    }

    /// Enable or disable panic capture in the middleware chain.
    #[must_use]
    pub fn with_middleware_panic_capture(mut self, enabled: bool) -> Self {
        self.catch_middleware_panics = enabled;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            label: Cow::Borrowed("store"),
            clock: Rc::new(SystemClock),
            default_debounce: Duration::ZERO,
            catch_middleware_panics: true,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("label", &self.label)
            .field("default_debounce", &self.default_debounce)
            .field("catch_middleware_panics", &self.catch_middleware_panics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.label, "store");
        assert_eq!(config.default_debounce, Duration::ZERO);
        assert!(config.catch_middleware_panics);
    }

    #[test]
    fn builder_methods_override() {
        let clock = ManualClock::new();
        let start = clock.now();
        let config = StoreConfig::default()
            .with_label("settings")
            .with_clock(clock.clone())
            .with_default_debounce(Duration::from_millis(250))
            .with_middleware_panic_capture(false);
        clock.advance(Duration::from_secs(1));
        assert_eq!(config.label, "settings");
        assert_eq!(config.clock.now(), start + Duration::from_secs(1));
        assert_eq!(config.default_debounce, Duration::from_millis(250));
        assert!(!config.catch_middleware_panics);
        assert!(format!("{config:?}").contains("settings"));
    }
}
