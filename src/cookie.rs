//! Set-Cookie parsing and serialization.
//!
//! Response cookies are re-issued by the proxy, so upstream `Set-Cookie`
//! values have to survive a parse/serialize round trip without losing
//! attributes. Only the standard attribute set is carried (name, value,
//! Path, Domain, Expires, Max-Age, Secure, HttpOnly, SameSite); the
//! `Expires` date string is kept verbatim rather than re-formatted.

/// SameSite cookie policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("strict") {
            Some(SameSite::Strict)
        } else if value.eq_ignore_ascii_case("lax") {
            Some(SameSite::Lax)
        } else if value.eq_ignore_ascii_case("none") {
            Some(SameSite::None)
        } else {
            None
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A parsed `Set-Cookie` header value.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCookie {
    /// Cookie name.
    pub name: String,

    /// Cookie value.
    pub value: String,

    /// Path attribute.
    pub path: Option<String>,

    /// Domain attribute.
    pub domain: Option<String>,

    /// Expires attribute, kept as the verbatim date string.
    pub expires: Option<String>,

    /// Max-Age attribute in seconds.
    pub max_age: Option<i64>,

    /// Secure flag.
    pub secure: bool,

    /// HttpOnly flag.
    pub http_only: bool,

    /// SameSite policy.
    pub same_site: Option<SameSite>,
}

impl SetCookie {
    /// Parses a `Set-Cookie` header value. Returns `None` when the leading
    /// `name=value` pair is missing or the name is empty.
    pub fn parse(header_value: &str) -> Option<Self> {
        let mut parts = header_value.split(';');

        let (name, value) = parts.next()?.trim().split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = SetCookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            path: None,
            domain: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        };

        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((attr, attr_value)) => {
                    let attr = attr.trim();
                    let attr_value = attr_value.trim();
                    if attr.eq_ignore_ascii_case("path") {
                        cookie.path = Some(attr_value.to_string());
                    } else if attr.eq_ignore_ascii_case("domain") {
                        cookie.domain = Some(attr_value.to_string());
                    } else if attr.eq_ignore_ascii_case("expires") {
                        cookie.expires = Some(attr_value.to_string());
                    } else if attr.eq_ignore_ascii_case("max-age") {
                        cookie.max_age = attr_value.parse().ok();
                    } else if attr.eq_ignore_ascii_case("samesite") {
                        cookie.same_site = SameSite::parse(attr_value);
                    }
                    // Unknown attributes are dropped.
                }
                None => {
                    if part.eq_ignore_ascii_case("secure") {
                        cookie.secure = true;
                    } else if part.eq_ignore_ascii_case("httponly") {
                        cookie.http_only = true;
                    }
                }
            }
        }

        Some(cookie)
    }

    /// Serializes back into a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];

        if let Some(ref domain) = self.domain {
            parts.push(format!("Domain={}", domain));
        }
        if let Some(ref path) = self.path {
            parts.push(format!("Path={}", path));
        }
        if let Some(max_age) = self.max_age {
            parts.push(format!("Max-Age={}", max_age));
        }
        if let Some(ref expires) = self.expires {
            parts.push(format!("Expires={}", expires));
        }
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        if let Some(same_site) = self.same_site {
            parts.push(format!("SameSite={}", same_site.as_str()));
        }

        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_cookie() {
        let value = "ory_session=abc123; Path=/; Domain=slug.projects.oryapis.com; \
                     Expires=Wed, 21 Oct 2026 07:28:00 GMT; Max-Age=3600; Secure; \
                     HttpOnly; SameSite=Lax";
        let cookie = SetCookie::parse(value).unwrap();

        assert_eq!(cookie.name, "ory_session");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.domain.as_deref(), Some("slug.projects.oryapis.com"));
        assert_eq!(
            cookie.expires.as_deref(),
            Some("Wed, 21 Oct 2026 07:28:00 GMT")
        );
        assert_eq!(cookie.max_age, Some(3600));
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, Some(SameSite::Lax));
    }

    #[test]
    fn test_parse_minimal_cookie() {
        let cookie = SetCookie::parse("csrf_token=xyz").unwrap();
        assert_eq!(cookie.name, "csrf_token");
        assert_eq!(cookie.value, "xyz");
        assert!(cookie.path.is_none());
        assert!(cookie.domain.is_none());
        assert!(!cookie.secure);
        assert!(!cookie.http_only);
        assert!(cookie.same_site.is_none());
    }

    #[test]
    fn test_parse_rejects_bare_value() {
        assert!(SetCookie::parse("no-equals-sign").is_none());
        assert!(SetCookie::parse("=value-without-name").is_none());
        assert!(SetCookie::parse("").is_none());
    }

    #[test]
    fn test_round_trip_preserves_attributes() {
        let value = "ory_session=abc123; Domain=example.com; Path=/; Max-Age=3600; \
                     Expires=Wed, 21 Oct 2026 07:28:00 GMT; Secure; HttpOnly; SameSite=Strict";
        let cookie = SetCookie::parse(value).unwrap();
        let serialized = cookie.to_header_value();
        let reparsed = SetCookie::parse(&serialized).unwrap();
        assert_eq!(cookie, reparsed);
    }

    #[test]
    fn test_expires_kept_verbatim() {
        // The date string is not re-formatted, whatever its spelling.
        let cookie = SetCookie::parse("a=b; Expires=Thu, 01-Jan-1970 00:00:01 GMT").unwrap();
        assert_eq!(
            cookie.expires.as_deref(),
            Some("Thu, 01-Jan-1970 00:00:01 GMT")
        );
        assert!(cookie
            .to_header_value()
            .contains("Expires=Thu, 01-Jan-1970 00:00:01 GMT"));
    }

    #[test]
    fn test_attribute_names_case_insensitive() {
        let cookie = SetCookie::parse("a=b; PATH=/x; domain=e.com; SECURE; httponly").unwrap();
        assert_eq!(cookie.path.as_deref(), Some("/x"));
        assert_eq!(cookie.domain.as_deref(), Some("e.com"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[test]
    fn test_same_site_values() {
        for (raw, expected) in [
            ("strict", SameSite::Strict),
            ("Lax", SameSite::Lax),
            ("NONE", SameSite::None),
        ] {
            let cookie = SetCookie::parse(&format!("a=b; SameSite={}", raw)).unwrap();
            assert_eq!(cookie.same_site, Some(expected));
        }

        // Unrecognized policies are dropped rather than invented.
        let cookie = SetCookie::parse("a=b; SameSite=Sideways").unwrap();
        assert!(cookie.same_site.is_none());
    }

    #[test]
    fn test_unknown_attributes_dropped() {
        let cookie = SetCookie::parse("a=b; Partitioned; X-Custom=1; Path=/").unwrap();
        assert_eq!(cookie.to_header_value(), "a=b; Path=/");
    }

    #[test]
    fn test_value_with_equals_sign() {
        let cookie = SetCookie::parse("token=abc=def==; Path=/").unwrap();
        assert_eq!(cookie.value, "abc=def==");
    }
}
