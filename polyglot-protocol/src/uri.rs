//! Kernel URI helpers.
//!
//! Kernel URIs look like `kernel://local/csharp`. Two URIs that differ
//! only by a trailing slash on an empty path are the same kernel, so
//! every URI is normalized to `scheme://authority/path` before it is
//! compared or stamped. The query string is kept only where it carries
//! meaning (the `tag=arrived` marker on command routing slips).

use crate::error::ProtocolError;
use url::Url;

/// Query tag marking the arrival stamp on a command routing slip.
pub const ARRIVED_TAG: &str = "arrived";

fn parse(uri: &str) -> Result<Url, ProtocolError> {
    Url::parse(uri).map_err(|e| ProtocolError::InvalidUri {
        uri: uri.to_owned(),
        reason: e.to_string(),
    })
}

fn authority(url: &Url) -> String {
    let mut out = format!("{}://", url.scheme());
    if let Some(host) = url.host_str() {
        out.push_str(host);
    }
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out
}

fn without_query(url: &Url) -> String {
    let mut out = authority(url);
    match url.path() {
        "" => out.push('/'),
        path => out.push_str(path),
    }
    out
}

/// Normalize a kernel URI, dropping any query string.
///
/// `kernel://a` and `kernel://a/` both normalize to `kernel://a/`.
pub fn normalize(uri: &str) -> Result<String, ProtocolError> {
    parse(uri).map(|url| without_query(&url))
}

/// Normalize a kernel URI, keeping its query string.
pub fn normalize_with_query(uri: &str) -> Result<String, ProtocolError> {
    let url = parse(uri)?;
    let mut out = without_query(&url);
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    Ok(out)
}

/// Append `?tag=<tag>` to the normalized URI.
pub fn with_tag(uri: &str, tag: &str) -> Result<String, ProtocolError> {
    Ok(format!("{}?tag={tag}", normalize(uri)?))
}

/// The `tag` query parameter of a URI, if any.
pub fn tag(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "tag")
        .map(|(_, v)| v.into_owned())
}

/// `scheme://authority` of a URI, used to identify the host that owns
/// a kernel.
pub fn host_of(uri: &str) -> Option<String> {
    Url::parse(uri).ok().map(|url| authority(&url))
}

/// Compare two URIs after normalization, ignoring query strings.
/// Unparseable input compares by raw string.
pub fn same_kernel(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// URI of a kernel named `local_name` living under `base`.
///
/// ```
/// # use polyglot_protocol::uri::child_uri;
/// assert_eq!(
///     child_uri("kernel://pid-42", "csharp").unwrap(),
///     "kernel://pid-42/csharp"
/// );
/// ```
pub fn child_uri(base: &str, local_name: &str) -> Result<String, ProtocolError> {
    let mut base = normalize(base)?;
    if !base.ends_with('/') {
        base.push('/');
    }
    normalize(&format!("{base}{local_name}"))
}
