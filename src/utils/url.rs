//! URL helpers.

use url::Url;

const SCHEME_HTTP: &str = "http";
const SCHEME_HTTPS: &str = "https";

/// Check whether the given string is an absolute http(s) URL with a host.
pub fn is_valid(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(u) => {
            (u.scheme() == SCHEME_HTTP || u.scheme() == SCHEME_HTTPS) && u.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Trim surrounding whitespace, parse and re-serialize the URL.
///
/// Unparseable input is returned trimmed; validation is a separate concern.
pub fn normalize(raw: &str) -> String {
    let raw = raw.trim();

    match Url::parse(raw) {
        Ok(u) => u.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Prepend the https scheme to scheme-less input.
///
/// `instagram.com/p/x` becomes `https://instagram.com/p/x`; anything
/// already carrying http(s) is returned untouched.
pub fn fix_scheme(raw: &str) -> String {
    let trimmed = raw.trim();

    match Url::parse(trimmed) {
        Ok(u) if u.scheme() == SCHEME_HTTP || u.scheme() == SCHEME_HTTPS => trimmed.to_string(),
        // A bare "host/path" parses as a relative URL error, and
        // "host:port/..." parses with the host as scheme; both get the
        // default scheme bolted on.
        _ => format!("{SCHEME_HTTPS}://{trimmed}"),
    }
}
