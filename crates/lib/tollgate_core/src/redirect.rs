//! Redirect target policy.
//!
//! A redirect target is acceptable when its host equals the service URL's
//! host, or when the whole URL matches one of the allow-list globs. Globs
//! treat `.` and `/` as separators: `*` stays within a segment, `**` crosses
//! segments, `?` is one non-separator character, `{a,b}` is an alternation
//! and `[...]` / `[!...]` are character classes.

use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("Invalid service URL {0:?}: {1}")]
    ServiceUrl(String, url::ParseError),

    #[error("Invalid allow-list pattern {0:?}: {1}")]
    Pattern(String, String),
}

/// Decides where the service may send a browser.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    service_url: Url,
    allow_list: Vec<Regex>,
}

impl RedirectPolicy {
    pub fn new(service_url: &str, patterns: &[String]) -> Result<Self, RedirectError> {
        let parsed = Url::parse(service_url)
            .map_err(|e| RedirectError::ServiceUrl(service_url.to_string(), e))?;
        let allow_list = patterns
            .iter()
            .map(|p| compile_glob(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            service_url: parsed,
            allow_list,
        })
    }

    pub fn service_url(&self) -> &str {
        self.service_url.as_str()
    }

    /// Whether `candidate` is an acceptable redirect target.
    pub fn is_allowed(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        if let Ok(url) = Url::parse(candidate)
            && url.host_str().is_some()
            && url.host_str() == self.service_url.host_str()
        {
            return true;
        }
        self.allow_list.iter().any(|re| re.is_match(candidate))
    }

    /// First acceptable candidate, else the service URL.
    pub fn resolve<'a>(&self, candidates: impl IntoIterator<Item = Option<&'a str>>) -> String {
        candidates
            .into_iter()
            .flatten()
            .find(|c| self.is_allowed(c))
            .map_or_else(|| self.service_url().to_string(), str::to_string)
    }
}

/// Translate a glob into an anchored regex.
fn compile_glob(pattern: &str) -> Result<Regex, RedirectError> {
    const SEGMENT: &str = "[^./]";
    let err = |msg: &str| RedirectError::Pattern(pattern.to_string(), msg.to_string());

    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut in_alternation = false;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str(SEGMENT);
                    re.push('*');
                }
            }
            '?' => re.push_str(SEGMENT),
            '{' if !in_alternation => {
                in_alternation = true;
                re.push_str("(?:");
            }
            ',' if in_alternation => re.push('|'),
            '}' if in_alternation => {
                in_alternation = false;
                re.push(')');
            }
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                let mut prev = None;
                while let Some(inner) = chars.next() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    // `&&`, `--` and `~~` are set operators in regex classes.
                    let doubled_dash =
                        inner == '-' && (prev == Some('-') || chars.peek() == Some(&'-'));
                    if matches!(inner, '\\' | '[' | '^' | '&' | '~') || doubled_dash {
                        re.push('\\');
                    }
                    re.push(inner);
                    prev = Some(inner);
                }
                if !closed {
                    return Err(err("unterminated character class"));
                }
                re.push(']');
            }
            '\\' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => return Err(err("trailing escape")),
            },
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    if in_alternation {
        return Err(err("unterminated alternation"));
    }
    re.push('$');
    Regex::new(&re).map_err(|e| err(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(patterns: &[&str]) -> RedirectPolicy {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        RedirectPolicy::new("https://auth.example.com", &patterns).unwrap()
    }

    #[test]
    fn same_host_is_allowed() {
        let p = policy(&[]);
        assert!(p.is_allowed("https://auth.example.com/welcome"));
        assert!(p.is_allowed("http://auth.example.com:8080/x"));
        assert!(!p.is_allowed("https://evil.example.org/"));
        assert!(!p.is_allowed(""));
    }

    #[test]
    fn single_star_stays_in_segment() {
        let p = policy(&["https://*.example.com/*"]);
        assert!(p.is_allowed("https://app.example.com/callback"));
        assert!(!p.is_allowed("https://a.b.example.com/callback"));
        assert!(!p.is_allowed("https://app.example.com/a/b"));
    }

    #[test]
    fn class_set_operators_are_literal() {
        let p = policy(&[
            "https://app.example.com/[a&&b]",
            "https://app.example.com/x[~~]",
            "https://app.example.com/y[--]",
        ]);
        assert!(p.is_allowed("https://app.example.com/&"));
        assert!(p.is_allowed("https://app.example.com/a"));
        assert!(!p.is_allowed("https://app.example.com/c"));
        assert!(p.is_allowed("https://app.example.com/x~"));
        assert!(p.is_allowed("https://app.example.com/y-"));
        assert!(!p.is_allowed("https://app.example.com/yz"));
    }

    #[test]
    fn class_ranges_still_work() {
        let p = policy(&["https://app.example.com/[a-c]"]);
        assert!(p.is_allowed("https://app.example.com/b"));
        assert!(!p.is_allowed("https://app.example.com/-"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let p = policy(&["https://**.example.com/**"]);
        assert!(p.is_allowed("https://a.b.example.com/x/y/z"));
        assert!(!p.is_allowed("https://example.org/x"));
    }

    #[test]
    fn alternation_and_classes() {
        let p = policy(&["http://localhost:{3000,5173}/**", "https://app[0-9].example.net/"]);
        assert!(p.is_allowed("http://localhost:5173/cb"));
        assert!(!p.is_allowed("http://localhost:8080/cb"));
        assert!(p.is_allowed("https://app7.example.net/"));
        assert!(!p.is_allowed("https://appx.example.net/"));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let p = policy(&["https://app.example.com/?x=1"]);
        assert!(!p.is_allowed("https://appXexample.com/a"));
    }

    #[test]
    fn resolve_takes_first_allowed_candidate() {
        let p = policy(&["https://app.example.com/**"]);
        assert_eq!(
            p.resolve([None, Some("https://evil.example.org/"), Some("https://app.example.com/done")]),
            "https://app.example.com/done"
        );
        assert_eq!(
            p.resolve([Some("https://evil.example.org/")]),
            "https://auth.example.com/"
        );
    }

    #[test]
    fn bad_patterns_are_rejected() {
        let patterns = vec!["https://{a,b".to_string()];
        assert!(RedirectPolicy::new("https://auth.example.com", &patterns).is_err());
        assert!(RedirectPolicy::new("not a url", &[]).is_err());
    }
}
