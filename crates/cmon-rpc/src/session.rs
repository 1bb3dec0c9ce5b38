//! Cookie and server identity state carried by one connection handle.

use std::collections::BTreeMap;

/// Session state learnt from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    cookies: BTreeMap<String, String>,
    server_version: Option<String>,
    authenticated: bool,
}

impl Session {
    /// Creates a session with no cookies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every `Set-Cookie` and the `Server` header found in `headers`.
    ///
    /// Header names match case-insensitively. A cookie value ends at `,`,
    /// `;`, or the end of the line; a repeated name overwrites the earlier
    /// value.
    pub fn parse_headers(&mut self, headers: &[u8]) {
        let text = String::from_utf8_lossy(headers);
        for line in text.split(['\r', '\n']) {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim_start();
            if name.trim().eq_ignore_ascii_case("set-cookie") {
                self.store_cookie(value);
            } else if name.trim().eq_ignore_ascii_case("server") {
                let version = value.trim_end();
                if !version.is_empty() {
                    self.server_version = Some(version.to_owned());
                }
            }
        }
    }

    fn store_cookie(&mut self, value: &str) {
        let pair = value.split([',', ';']).next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.cookies.insert(name.to_owned(), value.trim().to_owned());
    }

    /// Renders the stored cookies as one `Cookie` header line.
    ///
    /// Returns an empty string when no cookies are held; callers must then
    /// omit the header.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        if self.cookies.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("Cookie: {}\r\n", pairs.join("; "))
    }

    /// The stored value of cookie `name`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Version string advertised by the controller's `Server` header.
    #[must_use]
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Whether this handle has authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn cookies_round_trip_into_one_header() {
        let mut session = Session::new();
        session.parse_headers(b"HTTP/1.0 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2; secure\r\n\r\n");

        let header = session.cookie_header();

        assert!(header.starts_with("Cookie: "));
        assert!(header.ends_with("\r\n"));
        let names: Vec<&str> = header
            .trim_start_matches("Cookie: ")
            .trim_end()
            .split("; ")
            .collect();
        assert_eq!(names, ["a=1", "b=2"]);
    }

    #[test]
    fn empty_session_renders_no_header() {
        assert_eq!(Session::new().cookie_header(), "");
    }

    #[rstest]
    #[case("set-cookie: cmon-sid=abc,def\n")]
    #[case("SET-COOKIE: cmon-sid=abc; Path=/\n")]
    #[case("Set-Cookie:cmon-sid=abc\r\n")]
    fn cookie_value_stops_at_delimiters(#[case] headers: &str) {
        let mut session = Session::new();
        session.parse_headers(headers.as_bytes());
        assert_eq!(session.cookie("cmon-sid"), Some("abc"));
    }

    #[test]
    fn later_cookie_overwrites_earlier() {
        let mut session = Session::new();
        session.parse_headers(b"Set-Cookie: sid=old\r\n");
        session.parse_headers(b"Set-Cookie: sid=new\r\n");
        assert_eq!(session.cookie_header(), "Cookie: sid=new\r\n");
    }

    #[test]
    fn server_header_sets_version() {
        let mut session = Session::new();
        session.parse_headers(b"HTTP/1.0 200 OK\r\nServer: cmon/1.9.8\r\n");
        assert_eq!(session.server_version(), Some("cmon/1.9.8"));
    }
}
