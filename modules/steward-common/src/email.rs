use regex::Regex;
use std::sync::LazyLock;

use crate::types::is_valid_host;

/// Dot-atom local part (RFC 5322 without quoted strings or comments).
static LOCAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*$")
        .expect("valid regex")
});

/// Syntactic validity of an already lower-cased address.
pub fn is_valid_email(address: &str) -> bool {
    if address.len() > 254 {
        return false;
    }
    let Some((local, host)) = address.rsplit_once('@') else {
        return false;
    };
    !local.is_empty() && local.len() <= 64 && LOCAL_RE.is_match(local) && is_valid_host(host)
}

/// Clean up a raw address as found in tags or `mailto:` links: strips the
/// scheme and any query, trims punctuation, lower-cases. `None` if invalid.
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if s.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("mailto:")) {
        s = &s[7..];
    }
    let s = s.split('?').next().unwrap_or("");
    let s = s
        .trim_matches(|c: char| {
            c.is_whitespace() || matches!(c, '<' | '>' | '"' | '\'' | ',' | ';' | '.' | '(' | ')')
        })
        .to_lowercase();
    is_valid_email(&s).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        assert!(is_valid_email("facilities@law.ucla.edu"));
        assert!(is_valid_email("first.last+tag@city.gov"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email("no-at-sign.edu"));
        assert!(!is_valid_email("@ucla.edu"));
        assert!(!is_valid_email("a..b@ucla.edu"));
        assert!(!is_valid_email("info@localhost"));
        assert!(!is_valid_email("logo@2x.png1"));
        assert!(!is_valid_email("two@@ucla.edu"));
    }

    #[test]
    fn normalize_strips_mailto_and_query() {
        assert_eq!(
            normalize_email("mailto:Info@UCLA.edu?subject=Hello").as_deref(),
            Some("info@ucla.edu")
        );
        assert_eq!(normalize_email(" <help@city.gov>. ").as_deref(), Some("help@city.gov"));
        assert_eq!(normalize_email("nope"), None);
    }
}
