//! Sensitive data marker for automatic redaction
//!
//! Statement parameters routinely carry user data. Wrapping them in
//! `Sensitive<T>` keeps them out of Debug and Display output, so log events
//! can mention that parameters exist without ever printing them.

use std::fmt;

/// Wrapper for sensitive data that redacts itself in Debug and Display
///
/// # Example
///
/// ```
/// use livesql_core_types::Sensitive;
///
/// let params = Sensitive::new(vec!["alice@example.com"]);
/// assert_eq!(format!("{:?}", params), "***REDACTED***");
/// assert_eq!(params.expose().len(), 1);
/// ```
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    /// Wrap a sensitive value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the underlying sensitive value
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Consume the wrapper and return the inner value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}

impl<T: Clone> Clone for Sensitive<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_debug_redaction() {
        let secret = Sensitive::new("hunter2");
        let debug_str = format!("{:?}", secret);
        assert_eq!(debug_str, "***REDACTED***");
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_sensitive_display_redaction() {
        let secret = Sensitive::new(42);
        assert_eq!(format!("{}", secret), "***REDACTED***");
    }

    #[test]
    fn test_sensitive_into_inner() {
        let secret = Sensitive::new(String::from("x"));
        let cloned = secret.clone();
        assert_eq!(secret.into_inner(), "x");
        assert_eq!(cloned.expose(), "x");
    }
}
