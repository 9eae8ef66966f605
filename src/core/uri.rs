//! URI classification and joining.

use url::Url;

/// The kind of locator a string denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriType {
    /// `http://` or `https://`
    Http,
    /// `ipfs://<cid>`
    Ipfs,
    /// A 42-character `0x` contract address
    Ethereum,
    /// An ENS name ending in `.eth`
    Ens,
    /// Anything else
    Unknown,
}

/// Classify a locator before any backend is chosen for it.
pub fn type_of_uri(uri: &str) -> UriType {
    let lower = uri.to_ascii_lowercase();

    if lower.starts_with("http://") || lower.starts_with("https://") {
        UriType::Http
    } else if lower.starts_with("ipfs://") {
        UriType::Ipfs
    } else if lower.starts_with("0x") && lower.len() == 42 {
        UriType::Ethereum
    } else if lower.ends_with(".eth") {
        UriType::Ens
    } else {
        UriType::Unknown
    }
}

/// The part of `uri` after `<scheme>://`, matching the scheme in any case.
pub fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = uri.split_once("://")?;
    head.eq_ignore_ascii_case(scheme).then_some(rest)
}

/// Resolve `relative` against `base`, the way a browser resolves links.
pub fn join_url(base: &str, relative: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(base)?;
    Ok(base.join(relative)?.to_string())
}
