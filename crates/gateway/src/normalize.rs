//! Canonical cache keys.
//!
//! The same resource reaches the gateway spelled many ways: `./beep.mp3`,
//! `beep.mp3`, `/app/beep.mp3`, `https://host/app/beep.mp3`, with spaces
//! escaped or not. Every spelling must land on one cache key, so both
//! population and lookup go through [`normalize`].

use url::Url;

const RELATIVE_ROOT: &str = "./";

/// Bytes whose escapes survive decoding. Decoding them would move the
/// key's path, query or fragment boundaries, or let a second pass decode
/// what the first one produced.
const RESERVED: &[u8] = b"%/?#&=";

/// Canonical key for `resource` under `scope`.
///
/// Same-origin resources become their decoded absolute path (plus `?query`);
/// anything else keeps its full URL minus the fragment. Escapes of reserved
/// characters stay encoded, so normalizing a key again returns it unchanged.
/// Never fails: input that can't be resolved is returned with the
/// relative-root prefix removed.
///
/// ```
/// use shelter_gateway::normalize;
/// use url::Url;
///
/// let scope = Url::parse("https://host/app/").unwrap();
/// assert_eq!(normalize("./a%20b.mp3", &scope), "/app/a b.mp3");
/// assert_eq!(normalize("https://cdn.example/x.js#top", &scope), "https://cdn.example/x.js");
/// assert_eq!(normalize("./a%2520b.mp3", &scope), "/app/a%2520b.mp3");
/// ```
pub fn normalize(resource: &str, scope: &Url) -> String {
    let stripped = resource.strip_prefix(RELATIVE_ROOT).unwrap_or(resource);
    match scope.join(stripped) {
        Ok(url) => canonical(&url, scope),
        Err(_) => stripped.to_string(),
    }
}

fn canonical(url: &Url, scope: &Url) -> String {
    if same_origin(url, scope) {
        let path = decode(url.path());
        match url.query() {
            Some(query) => format!("{path}?{}", decode(query)),
            None => path,
        }
    } else {
        let mut url = url.clone();
        url.set_fragment(None);
        decode(url.as_str())
    }
}

fn same_origin(url: &Url, scope: &Url) -> bool {
    url.scheme() == scope.scheme()
        && url.host_str() == scope.host_str()
        && url.port_or_known_default() == scope.port_or_known_default()
}

/// Percent-decode everything but [`RESERVED`] escapes, keeping the escaped
/// form of the whole string if the bytes aren't UTF-8.
fn decode(s: &str) -> String {
    let mut decoded = String::with_capacity(s.len());
    let mut rest = s;
    loop {
        let (plain, reserved) = match next_reserved(rest) {
            Some((at, byte)) => (&rest[..at], Some((at, byte))),
            None => (rest, None),
        };
        match urlencoding::decode(plain) {
            Ok(part) => decoded.push_str(&part),
            Err(_) => return s.to_string(),
        }
        let Some((at, byte)) = reserved else {
            return decoded;
        };
        decoded.push_str(&format!("%{byte:02X}"));
        rest = &rest[at + 3..];
    }
}

/// Position and value of the first escape of a [`RESERVED`] byte.
fn next_reserved(s: &str) -> Option<(usize, u8)> {
    s.match_indices('%').find_map(|(at, _)| {
        let hex = s.get(at + 1..at + 3).filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))?;
        let byte = u8::from_str_radix(hex, 16).ok()?;
        RESERVED.contains(&byte).then_some((at, byte))
    })
}

/// Resolves and normalizes resource identifiers against one base scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    scope: Url,
}

impl Normalizer {
    pub fn new(scope: Url) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn normalize(&self, resource: &str) -> String {
        normalize(resource, &self.scope)
    }

    /// Absolute URL to hand to the network, if `resource` resolves.
    pub fn resolve(&self, resource: &str) -> Option<Url> {
        let stripped = resource.strip_prefix(RELATIVE_ROOT).unwrap_or(resource);
        self.scope.join(stripped).ok()
    }

    /// Whether `resource` targets the scope's scheme, host and port.
    pub fn is_same_origin(&self, resource: &str) -> bool {
        self.resolve(resource).is_some_and(|url| same_origin(&url, &self.scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn normalizer() -> Normalizer {
        Normalizer::new(Url::parse("https://host/app/").unwrap())
    }

    #[rstest]
    #[case("./a.mp3")]
    #[case("a.mp3")]
    #[case("/app/a.mp3")]
    #[case("https://host/app/a.mp3")]
    #[case("https://host:443/app/a.mp3")]
    #[case("https://host/app/a.mp3#t=10")]
    fn test_spellings_share_a_key(#[case] resource: &str) {
        assert_eq!(normalizer().normalize(resource), "/app/a.mp3");
    }

    #[rstest]
    #[case("./pallet complete.mp3")]
    #[case("./pallet%20complete.mp3")]
    #[case("pallet%20complete.mp3")]
    #[case("/app/pallet complete.mp3")]
    fn test_space_and_escape_are_equal(#[case] resource: &str) {
        assert_eq!(normalizer().normalize(resource), "/app/pallet complete.mp3");
    }

    #[rstest]
    #[case::scope_root("./", "/app/")]
    #[case::query_kept("./MYINDEX.html?v=2", "/app/MYINDEX.html?v=2")]
    #[case::escaped_query("./a.mp3?name=a%20b", "/app/a.mp3?name=a b")]
    #[case::outside_scope("/other/x.png", "/other/x.png")]
    #[case::parent_segments("./sub/../a.mp3", "/app/a.mp3")]
    #[case::cross_origin("https://cdn.example/font.woff2", "https://cdn.example/font.woff2")]
    #[case::other_scheme("http://host/app/a.mp3", "http://host/app/a.mp3")]
    #[case::other_port("https://host:8443/app/a.mp3", "https://host:8443/app/a.mp3")]
    #[case::invalid_utf8_escape("./%FF.mp3", "/app/%FF.mp3")]
    #[case::unresolvable("http://[oops/x", "http://[oops/x")]
    #[case::unresolvable_relative_root("./http://[oops", "http://[oops")]
    fn test_normalize(#[case] resource: &str, #[case] expected: &str) {
        assert_eq!(normalizer().normalize(resource), expected);
    }

    #[rstest]
    #[case::escaped_percent("./a%2520b.mp3", "/app/a%2520b.mp3")]
    #[case::escaped_slash("./a%2fb.mp3", "/app/a%2Fb.mp3")]
    #[case::escaped_question_mark("./a%3Fb.mp3", "/app/a%3Fb.mp3")]
    #[case::escaped_ampersand_in_query("./a.mp3?q=x%26y", "/app/a.mp3?q=x%26y")]
    #[case::mixed("./pallet%20%23%20complete.mp3", "/app/pallet %23 complete.mp3")]
    fn test_reserved_escapes_stay_encoded(#[case] resource: &str, #[case] expected: &str) {
        assert_eq!(normalizer().normalize(resource), expected);
    }

    #[rstest]
    #[case("./a%2520b.mp3")]
    #[case("./a b.mp3")]
    #[case("./a%3Fb.mp3?v=1")]
    #[case("./%FF.mp3")]
    #[case("./caf%C3%A9.mp3")]
    #[case("./a.mp3?name=a%20b&x=%3D")]
    #[case("https://cdn.example/a%2520b.woff2?x=y%20z")]
    fn test_idempotent(#[case] resource: &str) {
        let normalizer = normalizer();
        let key = normalizer.normalize(resource);
        assert_eq!(normalizer.normalize(&key), key);
    }

    #[test]
    fn test_literal_percent_is_not_a_space() {
        let normalizer = normalizer();
        assert_ne!(normalizer.normalize("./a%2520b.mp3"), normalizer.normalize("./a b.mp3"));
    }

    #[test]
    fn test_pure() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("./beep.mp3"), normalizer.normalize("./beep.mp3"));
    }

    #[rstest]
    #[case("./a.mp3", true)]
    #[case("/elsewhere", true)]
    #[case("https://host/x", true)]
    #[case("https://cdn.example/x", false)]
    #[case("http://host/app/a.mp3", false)]
    #[case("http://[oops/x", false)]
    fn test_same_origin(#[case] resource: &str, #[case] expected: bool) {
        assert_eq!(normalizer().is_same_origin(resource), expected);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(normalizer().resolve("./beep.mp3").unwrap().as_str(), "https://host/app/beep.mp3");
        assert!(normalizer().resolve("http://[oops/x").is_none());
    }
}
