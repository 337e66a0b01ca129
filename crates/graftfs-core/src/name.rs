//! Name algebra: parsing, normalization and scoped resolution of file names.
//!
//! A [`Name`] is an immutable value made of a scheme, an optional authority
//! (`user:password@host:port`), a normalized absolute path and an optional
//! query. Paths are stored decoded: percent escapes are removed at parse time
//! and re-applied only when a URI string is rendered.

use crate::error::{Result, VfsError};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

pub const SEPARATOR: char = '/';
pub const ROOT_PATH: &str = "/";

const TRANS_SEPARATOR: char = '\\';

/// Characters escaped when a path is rendered inside a URI.
const URI_RESERVED: &[char] = &['#', ' ', '?', '\\'];

/// Characters escaped when a segment is rendered inside a relative name.
const SEGMENT_RESERVED: &[char] = &['\\', '#', '?'];

/// How far a relative name may reach from its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Exactly one segment below the base.
    Child,
    /// Strictly below the base.
    Descendent,
    /// The base itself or anything below it.
    DescendentOrSelf,
    /// Anywhere inside the base's filesystem.
    FileSystem,
}

impl fmt::Display for NameScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NameScope::Child => "child",
            NameScope::Descendent => "descendent",
            NameScope::DescendentOrSelf => "descendent-or-self",
            NameScope::FileSystem => "filesystem",
        };
        f.write_str(s)
    }
}

/// Network location of a name: `user:password@host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Authority {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Authority {
    fn render(&self, out: &mut String, with_password: bool) {
        if let Some(user) = &self.user {
            out.push_str(&encode(user, &[':', '@', '/']));
            if with_password {
                if let Some(password) = &self.password {
                    out.push(':');
                    out.push_str(&encode(password, &[':', '@', '/']));
                }
            }
            out.push('@');
        }
        out.push_str(&self.host);
        if let Some(port) = self.port {
            out.push(':');
            out.push_str(&port.to_string());
        }
    }
}

#[derive(Clone)]
pub struct Name {
    scheme: String,
    authority: Option<Authority>,
    path: String,
    query: Option<String>,
    key: String,
}

impl Name {
    fn from_parts(
        scheme: String,
        authority: Option<Authority>,
        path: String,
        query: Option<String>,
    ) -> Self {
        let mut key = String::with_capacity(scheme.len() + path.len() + 8);
        key.push_str(&scheme);
        key.push_str("://");
        if let Some(auth) = &authority {
            auth.render(&mut key, true);
        }
        key.push_str(&encode(&path, URI_RESERVED));
        if let Some(q) = &query {
            key.push('?');
            key.push_str(q);
        }
        Name {
            scheme,
            authority,
            path,
            query,
            key,
        }
    }

    /// Parses `scheme://[userinfo@]host[:port]/path[?query]` or `scheme:/path`.
    pub fn parse(uri: &str) -> Result<Name> {
        let (scheme, rest) = extract_scheme(uri)
            .ok_or_else(|| VfsError::name_resolution(uri, "missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();

        let (rest, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
            None => (rest, None),
        };

        let (authority, raw_path) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after
                    .find(|c| c == SEPARATOR || c == TRANS_SEPARATOR)
                    .unwrap_or(after.len());
                (parse_authority(&after[..end], uri)?, &after[end..])
            }
            None => (None, rest),
        };

        let segments = normalize_segments(decoded_segments(raw_path, uri)?, uri)?;
        Ok(Name::from_parts(
            scheme,
            authority,
            join_segments(&segments),
            query,
        ))
    }

    /// Parses an absolute local-style path (`/a/b`, `\a\b`, `C:\a`) into a
    /// `file` name. Local paths are taken literally; `%` is not an escape.
    pub fn parse_local(path: &str) -> Result<Name> {
        if !is_absolute_local(path) {
            return Err(VfsError::name_resolution(path, "not an absolute local path"));
        }
        let fixed = fix_separators(path);
        let segments: Vec<String> = fixed
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let segments = normalize_segments(segments, path)?;
        Ok(Name::from_parts(
            "file".to_string(),
            None,
            join_segments(&segments),
            None,
        ))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    /// Normalized, decoded absolute path. Always starts with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Full URI, with reserved path characters escaped.
    pub fn uri(&self) -> &str {
        &self.key
    }

    /// URI with the password left out.
    pub fn friendly_uri(&self) -> String {
        let mut out = self.root_prefix(false);
        out.push_str(&encode(&self.path, URI_RESERVED));
        if let Some(q) = &self.query {
            out.push('?');
            out.push_str(q);
        }
        out
    }

    /// URI of this name's root, ending with `/`.
    pub fn root_uri(&self) -> String {
        let mut out = self.root_prefix(true);
        out.push(SEPARATOR);
        out
    }

    fn root_prefix(&self, with_password: bool) -> String {
        let mut out = format!("{}://", self.scheme);
        if let Some(auth) = &self.authority {
            auth.render(&mut out, with_password);
        }
        out
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Last path segment; empty for the root.
    pub fn base_name(&self) -> &str {
        match self.path.rfind(SEPARATOR) {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// Extension of the base name. Leading-dot names such as `.bashrc` have
    /// no extension.
    pub fn extension(&self) -> &str {
        let base = self.base_name();
        match base.rfind('.') {
            Some(pos) if pos >= 1 && pos < base.len() - 1 => &base[pos + 1..],
            _ => "",
        }
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT_PATH
    }

    pub fn parent(&self) -> Option<Name> {
        if self.is_root() {
            return None;
        }
        let idx = self.path.rfind(SEPARATOR)?;
        let parent = if idx == 0 {
            ROOT_PATH.to_string()
        } else {
            self.path[..idx].to_string()
        };
        Some(self.with_path(parent))
    }

    pub fn root(&self) -> Name {
        self.with_path(ROOT_PATH.to_string())
    }

    fn with_path(&self, path: String) -> Name {
        Name::from_parts(self.scheme.clone(), self.authority.clone(), path, None)
    }

    /// Name of the direct child called `segment`. The segment is taken
    /// literally (no escape decoding) and must be a single plain segment.
    pub fn child(&self, segment: &str) -> Result<Name> {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains(SEPARATOR)
        {
            return Err(VfsError::name_resolution(
                segment,
                format!("not a valid child name of {}", self),
            ));
        }
        let path = if self.is_root() {
            format!("/{}", segment)
        } else {
            format!("{}/{}", self.path, segment)
        };
        Ok(self.with_path(path))
    }

    /// Resolves `rel` against this name within `scope`.
    ///
    /// Absolute strings resolve against the root, relative strings against
    /// this name; `.`, `..` and `%XX` escapes are honored. Under
    /// [`NameScope::Child`] the string must be one plain segment.
    pub fn resolve(&self, rel: &str, scope: NameScope) -> Result<Name> {
        if scope == NameScope::Child {
            check_child_segment(rel)?;
        }

        let absolute = rel.starts_with(SEPARATOR) || rel.starts_with(TRANS_SEPARATOR);
        let mut segments: Vec<String> = if absolute {
            Vec::new()
        } else {
            self.segments().map(String::from).collect()
        };
        segments.extend(decoded_segments(rel, rel)?);
        let segments = normalize_segments(segments, rel)?;
        let path = join_segments(&segments);

        if !check_name(&self.path, &path, scope) {
            return Err(VfsError::name_resolution(
                rel,
                format!("not within {} scope of {}", scope, self),
            ));
        }
        Ok(self.with_path(path))
    }

    /// Shortest relative string `r` such that
    /// `self.resolve(r, NameScope::FileSystem) == *other`.
    pub fn relative_name(&self, other: &Name) -> Result<String> {
        if self.root_uri() != other.root_uri() {
            return Err(VfsError::MismatchedFileSystem {
                name: other.clone(),
                root: self.root(),
            });
        }
        let base: Vec<&str> = self.segments().collect();
        let target: Vec<&str> = other.segments().collect();
        let common = base
            .iter()
            .zip(target.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut parts: Vec<String> = vec!["..".to_string(); base.len() - common];
        parts.extend(target[common..].iter().map(|s| encode(s, SEGMENT_RESERVED)));
        if parts.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(parts.join("/"))
        }
    }

    /// Whether `other` lies within `scope` of this name on the same root.
    pub fn is_descendent(&self, other: &Name, scope: NameScope) -> bool {
        self.scheme == other.scheme
            && self.authority == other.authority
            && check_name(&self.path, &other.path, scope)
    }

    pub fn is_ancestor_of(&self, other: &Name) -> bool {
        self.is_descendent(other, NameScope::Descendent)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.friendly_uri())
    }
}

/// Splits off the scheme of `uri`, returning `(scheme, rest)`.
///
/// Single-letter "schemes" are drive letters and yield `None`.
pub fn extract_scheme(uri: &str) -> Option<(&str, &str)> {
    for (pos, ch) in uri.char_indices() {
        if ch == ':' {
            if pos < 2 {
                return None;
            }
            return Some((&uri[..pos], &uri[pos + 1..]));
        }
        if ch.is_ascii_alphabetic() {
            continue;
        }
        if pos > 0 && (ch.is_ascii_digit() || ch == '+' || ch == '-' || ch == '.') {
            continue;
        }
        break;
    }
    None
}

pub fn is_absolute_local(path: &str) -> bool {
    if path.starts_with(SEPARATOR) || path.starts_with(TRANS_SEPARATOR) {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/' || bytes[2] == b'\\')
}

pub fn fix_separators(path: &str) -> String {
    path.replace(TRANS_SEPARATOR, "/")
}

/// Collapses `.`, empty segments and `..` in an absolute path. Escaping above
/// the root is an error.
pub fn normalize_path(path: &str) -> Result<String> {
    let segments: Vec<String> = fix_separators(path)
        .split(SEPARATOR)
        .map(String::from)
        .collect();
    Ok(join_segments(&normalize_segments(segments, path)?))
}

/// Decodes `%XX` escapes. Truncated or non-hex escapes are rejected.
pub fn decode(encoded: &str) -> Result<String> {
    if !encoded.contains('%') {
        return Ok(encoded.to_string());
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        if i + 3 > bytes.len() {
            return Err(VfsError::name_resolution(
                encoded,
                format!(
                    "invalid escape sequence {:?}",
                    String::from_utf8_lossy(&bytes[i..])
                ),
            ));
        }
        match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
            (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
            _ => {
                return Err(VfsError::name_resolution(
                    encoded,
                    format!(
                        "invalid escape sequence {:?}",
                        String::from_utf8_lossy(&bytes[i..i + 3])
                    ),
                ))
            }
        }
        i += 3;
    }
    String::from_utf8(out)
        .map_err(|_| VfsError::name_resolution(encoded, "escapes do not decode to UTF-8"))
}

/// Escapes `%` and every character in `reserved`.
pub fn encode(decoded: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(decoded.len());
    for ch in decoded.chars() {
        if ch == '%' || reserved.contains(&ch) {
            let mut buf = [0u8; 4];
            for b in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn check_encoding(uri: &str) -> Result<()> {
    decode(uri).map(|_| ())
}

/// Whether `path` lies within `scope` of `base`. Both are normalized paths.
pub fn check_name(base: &str, path: &str, scope: NameScope) -> bool {
    if scope == NameScope::FileSystem {
        return true;
    }
    let rest = if base == ROOT_PATH {
        match path.strip_prefix(SEPARATOR) {
            Some(rest) => rest,
            None => return false,
        }
    } else if path == base {
        ""
    } else {
        match path
            .strip_prefix(base)
            .and_then(|r| r.strip_prefix(SEPARATOR))
        {
            Some(rest) if !rest.is_empty() => rest,
            _ => return false,
        }
    };
    match scope {
        NameScope::Child => !rest.is_empty() && !rest.contains(SEPARATOR),
        NameScope::Descendent => !rest.is_empty(),
        NameScope::DescendentOrSelf => true,
        NameScope::FileSystem => true,
    }
}

fn check_child_segment(rel: &str) -> Result<()> {
    let reason = if rel.is_empty() {
        "empty child name"
    } else if rel.contains(SEPARATOR) || rel.contains(TRANS_SEPARATOR) {
        "child name must be a single segment"
    } else if rel == "." || rel == ".." {
        "child name must not be a relative step"
    } else {
        return Ok(());
    };
    Err(VfsError::name_resolution(rel, reason))
}

fn parse_authority(raw: &str, uri: &str) -> Result<Option<Authority>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let (user, password, host_port) = match raw.find('@') {
        Some(idx) => {
            let info = &raw[..idx];
            let (user, password) = match info.find(':') {
                Some(c) => (decode(&info[..c])?, Some(decode(&info[c + 1..])?)),
                None => (decode(info)?, None),
            };
            (Some(user), password, &raw[idx + 1..])
        }
        None => (None, None, raw),
    };

    let (host, port) = match host_port.find(':') {
        Some(idx) => (&host_port[..idx], Some(&host_port[idx + 1..])),
        None => (host_port, None),
    };
    if host.is_empty() {
        return Err(VfsError::name_resolution(uri, "missing host name"));
    }
    let port = match port {
        None => None,
        Some("") => return Err(VfsError::name_resolution(uri, "missing port")),
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| VfsError::name_resolution(uri, format!("invalid port {:?}", p)))?,
        ),
    };

    Ok(Some(Authority {
        user,
        password,
        host: host.to_ascii_lowercase(),
        port,
    }))
}

/// Splits a raw path into decoded segments. Decoding happens per segment so
/// an escaped separator can never introduce a new segment boundary.
fn decoded_segments(raw: &str, original: &str) -> Result<Vec<String>> {
    let fixed = fix_separators(raw);
    let mut out = Vec::new();
    for seg in fixed.split(SEPARATOR).filter(|s| !s.is_empty()) {
        let decoded = decode(seg)?;
        if decoded.contains(SEPARATOR) {
            return Err(VfsError::name_resolution(
                original,
                "escaped separator inside a path segment",
            ));
        }
        out.push(decoded);
    }
    Ok(out)
}

fn normalize_segments(segments: Vec<String>, original: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(segments.len());
    for seg in segments {
        match seg.as_str() {
            "" | "." => continue,
            ".." => {
                if out.pop().is_none() {
                    return Err(VfsError::name_resolution(
                        original,
                        "path escapes above the filesystem root",
                    ));
                }
            }
            _ => out.push(seg),
        }
    }
    Ok(out)
}

fn join_segments(segments: &[String]) -> String {
    if segments.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
