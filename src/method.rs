//! HTTP verbs a controller route can be declared for.
//!
//! [`Verb::All`] is not a wire method: it marks a catch-all registration
//! that matches any method for its path.

use std::fmt;
use std::str::FromStr;

/// A verb a route is registered under.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Trace,
    All,
}

impl Verb {
    /// Every concrete wire verb, in the order used for `allow` headers.
    pub const WIRE: [Verb; 9] = [
        Verb::Head,
        Verb::Get,
        Verb::Post,
        Verb::Put,
        Verb::Patch,
        Verb::Delete,
        Verb::Options,
        Verb::Connect,
        Verb::Trace,
    ];

    /// Returns the uppercase representation (e.g. `"GET"`, `"ALL"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
            Self::All     => "ALL",
        }
    }

    /// Maps a wire method onto a verb. Extension methods have no verb.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        method.as_str().parse().ok().filter(|v| *v != Self::All)
    }
}

/// Parses an uppercase verb string. Case-sensitive per RFC 9110 §9.1.
impl FromStr for Verb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "TRACE"   => Ok(Self::Trace),
            "ALL"     => Ok(Self::All),
            _         => Err(()),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_methods_map_to_verbs() {
        assert_eq!(Verb::from_http(&http::Method::GET), Some(Verb::Get));
        assert_eq!(Verb::from_http(&http::Method::DELETE), Some(Verb::Delete));
    }

    #[test]
    fn extension_methods_and_all_have_no_wire_verb() {
        let purge = http::Method::from_bytes(b"PURGE").unwrap();
        assert_eq!(Verb::from_http(&purge), None);

        let all = http::Method::from_bytes(b"ALL").unwrap();
        assert_eq!(Verb::from_http(&all), None);
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert!("get".parse::<Verb>().is_err());
        assert_eq!("ALL".parse::<Verb>(), Ok(Verb::All));
    }
}
