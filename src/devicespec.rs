//! Devicespec normalization.
//!
//! The host names resources with strings like `N:HTTP://host/path` or, with
//! a working prefix set, bare remainders like `N:file.txt`. Before a URL
//! parser ever sees them they go through sentinel fixing, device-prefix
//! stripping, DOS COPY comma handling, directory-open wildcarding, prefix
//! application, and path canonicalization.

use tracing::debug;

use crate::frame::EOL;

/// Replace every end-of-line sentinel with NUL in place.
pub fn fix_sentinel(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        if *b == EOL {
            *b = 0;
        }
    }
}

/// Extract the devicespec string from a raw 256-byte host payload.
pub fn from_payload(buf: &[u8]) -> String {
    let mut fixed = buf.to_vec();
    fix_sentinel(&mut fixed);
    let end = fixed.iter().position(|&b| b == 0).unwrap_or(fixed.len());
    String::from_utf8_lossy(&fixed[..end]).into_owned()
}

/// Strip a leading `N:` or `Nx:` device prefix, if present.
pub fn strip_device_prefix(spec: &str) -> &str {
    let bytes = spec.as_bytes();
    if bytes.first().map(|b| b.to_ascii_uppercase()) != Some(b'N') {
        return spec;
    }
    match bytes.get(1) {
        Some(b':') => &spec[2..],
        Some(b'1'..=b'8') if bytes.get(2) == Some(&b':') => &spec[3..],
        _ => spec,
    }
}

/// Pick our token out of a DOS COPY argument like `N1:A.TXT,N2:B.TXT`.
///
/// The token whose unit number matches `device_id` wins; a bare `N:` token
/// counts as unit 1. Without a match the spec is passed through untouched.
fn select_comma_token(spec: &str, device_id: u8) -> String {
    let unit = device_id.wrapping_sub(0x70);
    for token in spec.split(',') {
        let bytes = token.as_bytes();
        if bytes.first().map(|b| b.to_ascii_uppercase()) != Some(b'N') {
            continue;
        }
        let token_unit = match bytes.get(1) {
            Some(b':') => 1,
            Some(d @ b'1'..=b'8') if bytes.get(2) == Some(&b':') => d - b'0',
            _ => continue,
        };
        if token_unit == unit {
            debug!(token, "selected devicespec from COPY argument");
            return token.to_string();
        }
    }
    spec.to_string()
}

/// Canonicalize a path or `scheme://host/path` string: collapse empty and
/// `.` segments, resolve `..`, and keep any trailing slash.
pub fn canonicalize(spec: &str) -> String {
    if let Some(pos) = spec.find("://") {
        let after = &spec[pos + 3..];
        let (host, path) = match after.find('/') {
            Some(slash) => after.split_at(slash),
            None => (after, ""),
        };
        if path.is_empty() {
            return spec.to_string();
        }
        return format!("{}{}{}", &spec[..pos + 3], host, canonical_segments(path));
    }
    if spec.is_empty() {
        return String::new();
    }
    canonical_segments(spec)
}

fn canonical_segments(path: &str) -> String {
    let trailing = path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    if trailing && out.len() > 1 {
        out.push('/');
    }
    out
}

/// Normalize a devicespec received from the host into a parseable URL.
///
/// `directory_mode` corresponds to the directory-open aux1 value; such
/// specs get a wildcard appended when the host supplied none.
pub fn normalize(raw: &str, device_id: u8, directory_mode: bool, prefix: &Prefix) -> String {
    let spec = if raw.contains(',') {
        select_comma_token(raw, device_id)
    } else {
        raw.to_string()
    };

    let mut rest = strip_device_prefix(&spec).to_string();

    if directory_mode && !rest.contains('*') && !rest.contains('?') {
        if rest.ends_with('/') {
            rest.push('*');
        } else {
            rest.push_str("/*");
        }
    }

    let full = if rest.contains("://") {
        rest
    } else {
        format!("{}{}", prefix.as_str(), rest)
    };

    canonicalize(&full)
}

/// The device's current working location, prepended to devicespecs that
/// omit a scheme. Kept canonical after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefix(String);

impl Prefix {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply a prefix-mutation payload as written by the host.
    ///
    /// The text after the first `:` selects the edit: empty clears, `..`
    /// and `<` devance one segment, `/` and `>` return to the host root,
    /// a leading `/` or embedded `:` replaces outright, and anything else
    /// appends.
    pub fn apply(&mut self, payload: &str) {
        let spec = match payload.find(':') {
            Some(pos) => &payload[pos + 1..],
            None => payload,
        };

        if spec.is_empty() {
            self.0.clear();
        } else if spec == ".." || spec == "<" {
            self.devance();
        } else if spec == "/" || spec == ">" {
            self.to_host_root();
        } else if spec.starts_with('/') || spec.contains(':') {
            self.0 = spec.to_string();
        } else {
            self.0.push_str(spec);
        }

        if !self.0.is_empty() {
            self.0 = canonicalize(&self.0);
        }
        debug!(prefix = %self.0, "prefix now");
    }

    fn devance(&mut self) {
        let mut slashes: Vec<usize> = self
            .0
            .char_indices()
            .filter(|&(_, c)| c == '/')
            .map(|(i, _)| i)
            .collect();
        if self.0.ends_with('/') {
            slashes.pop();
        }
        match slashes.last() {
            Some(&pos) => self.0.truncate(pos + 1),
            None => self.0.clear(),
        }
    }

    fn to_host_root(&mut self) {
        if let Some(pos) = self.0.find("://") {
            match self.0[pos + 3..].find('/') {
                Some(slash) => self.0.truncate(pos + 3 + slash + 1),
                None => self.0.push('/'),
            }
        } else if self.0.starts_with('/') {
            self.0 = "/".to_string();
        } else {
            self.0.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> Prefix {
        Prefix(s.to_string())
    }

    #[test]
    fn payload_extraction_stops_at_sentinel() {
        let mut buf = [0u8; 16];
        buf[..12].copy_from_slice(b"N:TEST://h/x");
        buf[12] = EOL;
        buf[13] = b'z';
        assert_eq!(from_payload(&buf), "N:TEST://h/x");
    }

    #[test]
    fn device_prefix_forms() {
        assert_eq!(strip_device_prefix("N:TCP://h/"), "TCP://h/");
        assert_eq!(strip_device_prefix("N4:TCP://h/"), "TCP://h/");
        assert_eq!(strip_device_prefix("n2:x"), "x");
        assert_eq!(strip_device_prefix("TNFS://h/"), "TNFS://h/");
        assert_eq!(strip_device_prefix("N9:x"), "N9:x");
    }

    #[test]
    fn comma_token_matches_unit() {
        assert_eq!(
            normalize("D1:FOO.TXT,N:TNFS://h/FOO.TXT", 0x71, false, &Prefix::default()),
            "TNFS://h/FOO.TXT"
        );
        assert_eq!(
            normalize("N1:TNFS://h/A,N2:TNFS://h/B", 0x72, false, &Prefix::default()),
            "TNFS://h/B"
        );
    }

    #[test]
    fn directory_mode_appends_wildcard() {
        let p = Prefix::default();
        assert_eq!(normalize("N:TNFS://h/games/", 0x71, true, &p), "TNFS://h/games/*");
        assert_eq!(normalize("N:TNFS://h/games", 0x71, true, &p), "TNFS://h/games/*");
        assert_eq!(normalize("N:TNFS://h/g?.bin", 0x71, true, &p), "TNFS://h/g?.bin");
    }

    #[test]
    fn prefix_prepended_without_scheme() {
        let p = prefix("TNFS://host/dir/");
        assert_eq!(normalize("N:file.txt", 0x71, false, &p), "TNFS://host/dir/file.txt");
        assert_eq!(normalize("N:TCP://other/", 0x71, false, &p), "TCP://other/");
    }

    #[test]
    fn canonical_resolves_dots() {
        assert_eq!(canonicalize("TNFS://h/a/b/../c/./d"), "TNFS://h/a/c/d");
        assert_eq!(canonicalize("/a//b/"), "/a/b/");
        assert_eq!(canonicalize("a/../.."), "/");
    }

    #[test]
    fn prefix_devance() {
        let mut p = prefix("TNFS://h/a/b/c/");
        p.apply("N:..");
        assert_eq!(p.as_str(), "TNFS://h/a/b/");
        p.apply("N:<");
        assert_eq!(p.as_str(), "TNFS://h/a/");
    }

    #[test]
    fn prefix_host_root() {
        let mut p = prefix("TNFS://h/a/b/");
        p.apply("N:/");
        assert_eq!(p.as_str(), "TNFS://h/");
    }

    #[test]
    fn prefix_replace_and_append() {
        let mut p = Prefix::default();
        p.apply("N:TNFS://host/base/");
        assert_eq!(p.as_str(), "TNFS://host/base/");
        p.apply("N:sub/");
        assert_eq!(p.as_str(), "TNFS://host/base/sub/");
        p.apply("N:");
        assert!(p.is_empty());
    }
}
