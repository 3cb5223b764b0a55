use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Buyer fraud-trail data (client IP, user agent). Hidden from `Debug`/`Display` so it never
/// ends up in `tracing` output, but serialized as-is for storage and API responses.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Masked<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value() {
        let ip = Masked::new("203.0.113.9".to_string());
        assert_eq!(format!("{:?}", ip), "********");
        assert_eq!(format!("{}", ip), "********");
        assert_eq!(ip.expose(), "203.0.113.9");
    }

    #[test]
    fn test_serializes_inner_value() {
        let ua = Masked::new("Mozilla/5.0".to_string());
        assert_eq!(serde_json::to_string(&ua).unwrap(), "\"Mozilla/5.0\"");
    }
}
