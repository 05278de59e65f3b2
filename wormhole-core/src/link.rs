//! Link resolution: turn scanned or pasted text into a transfer code and optional rendezvous endpoint.
//!
//! Four grammars are accepted, tried in order. Each grammar is an independent matcher; the first
//! one that yields a link wins. A text that starts with a scheme prefix is owned by that scheme's
//! matcher, so a malformed `wormhole://` link is rejected instead of being reinterpreted by a
//! broader rule.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// `wormhole-transfer:<percent-encoded-code>[?rendezvous=<percent-encoded-url>]`
pub const TRANSFER_SCHEME: &str = "wormhole-transfer:";
/// `wormhole://<host>?code=<code>`
pub const HOST_SCHEME: &str = "wormhole://";
/// `wormhole:<rendezvous-url>?code=<code>`
pub const RELAY_SCHEME: &str = "wormhole:";

/// Short human-readable code shared between sender and receiver (e.g. `5-souvenir-scallion`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransferCode(String);

impl TransferCode {
    /// Wrap a code verbatim.
    pub fn new(code: impl Into<String>) -> Self {
        TransferCode(code.into())
    }

    /// Normalize typed input: spaces become dashes, line breaks are dropped.
    pub fn normalize(input: &str) -> Self {
        let code = input
            .chars()
            .filter(|c| *c != '\n' && *c != '\r')
            .map(|c| if c == ' ' { '-' } else { c })
            .collect();
        TransferCode(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TransferCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TransferCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferCode {
    fn from(s: &str) -> Self {
        TransferCode::new(s)
    }
}

impl From<String> for TransferCode {
    fn from(s: String) -> Self {
        TransferCode(s)
    }
}

/// Result of resolving a link. `rendezvous: None` means "use the configured default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLink {
    pub code: TransferCode,
    pub rendezvous: Option<String>,
}

impl ParsedLink {
    fn new(code: impl Into<String>, rendezvous: Option<String>) -> Self {
        Self {
            code: TransferCode::new(code),
            rendezvous,
        }
    }
}

/// One grammar. Pure; `None` means the text is not a link of this form.
pub type Matcher = fn(&str) -> Option<ParsedLink>;

/// Matchers in resolution order.
pub const MATCHERS: [Matcher; 4] = [
    match_transfer_scheme,
    match_host_scheme,
    match_relay_scheme,
    match_bare_code,
];

/// Resolve free-form text into a link. Returns `None` when no grammar matches.
pub fn parse_link(text: &str) -> Option<ParsedLink> {
    MATCHERS.iter().find_map(|m| m(text))
}

/// `wormhole-transfer:` form. The code is percent-decoded and must not be empty.
pub fn match_transfer_scheme(text: &str) -> Option<ParsedLink> {
    let rest = text.strip_prefix(TRANSFER_SCHEME)?;
    let (raw_code, query) = match rest.split_once('?') {
        Some((c, q)) => (c, Some(q)),
        None => (rest, None),
    };
    let code = percent_decode(raw_code)?;
    if code.is_empty() {
        return None;
    }
    let mut rendezvous = None;
    if let Some(query) = query {
        if let Some(raw) = query_param(query, "rendezvous") {
            let url = percent_decode(raw)?;
            if !url.is_empty() {
                rendezvous = Some(url);
            }
        }
    }
    Some(ParsedLink::new(code, rendezvous))
}

/// `wormhole://host?code=...` form. A literal space anywhere rejects the link (malformed host).
pub fn match_host_scheme(text: &str) -> Option<ParsedLink> {
    let rest = text.strip_prefix(HOST_SCHEME)?;
    if text.contains(' ') {
        return None;
    }
    let (host, query) = rest.split_once('?')?;
    if host.is_empty() {
        return None;
    }
    let code = query_param(query, "code").filter(|c| !c.is_empty())?;
    Some(ParsedLink::new(code, Some(host.to_string())))
}

/// `wormhole:<endpoint>?code=...` form.
///
/// The code is taken from the *last* `?code=` / `&code=` occurrence. An endpoint URL that itself
/// carries a `code=` parameter is therefore ambiguous; the last occurrence is what scanners have
/// always produced, so it stays that way.
pub fn match_relay_scheme(text: &str) -> Option<ParsedLink> {
    let rest = text.strip_prefix(RELAY_SCHEME)?;
    if text.starts_with(HOST_SCHEME) {
        return None;
    }
    let captures = code_param_regex().captures_iter(text).last()?;
    let code = captures.get(1)?.as_str().trim();
    if code.is_empty() {
        return None;
    }
    let endpoint = rest.split('?').next().unwrap_or_default();
    let rendezvous = (!endpoint.is_empty()).then(|| endpoint.to_string());
    Some(ParsedLink::new(code, rendezvous))
}

/// Plain code such as `7-guitarist-revenge`: must contain a dash and must not look like a URL.
pub fn match_bare_code(text: &str) -> Option<ParsedLink> {
    if has_scheme_prefix(text) || !text.contains('-') || text.contains("://") {
        return None;
    }
    Some(ParsedLink::new(text.trim(), None))
}

/// Build a `wormhole-transfer:` link. Both parts are percent-encoded.
pub fn transfer_link(code: &TransferCode, rendezvous: Option<&str>) -> String {
    let mut out = format!("{}{}", TRANSFER_SCHEME, urlencoding::encode(code.as_str()));
    if let Some(url) = rendezvous.filter(|u| !u.is_empty()) {
        out.push_str("?rendezvous=");
        out.push_str(&urlencoding::encode(url));
    }
    out
}

/// Build the `wormhole:<rendezvous>?code=<code>` payload shown as a QR code by senders.
pub fn relay_link(rendezvous: &str, code: &TransferCode) -> String {
    format!("{}{}?code={}", RELAY_SCHEME, rendezvous, code)
}

/// Build a `wormhole://<host>?code=<code>` link.
pub fn host_link(host: &str, code: &TransferCode) -> String {
    format!("{}{}?code={}", HOST_SCHEME, host, code)
}

fn has_scheme_prefix(text: &str) -> bool {
    text.starts_with(TRANSFER_SCHEME) || text.starts_with(RELAY_SCHEME)
}

fn code_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]code=([^&]*)").expect("static regex"))
}

/// First `key=value` pair with the given key; splits on the first `=` only.
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// UTF-8 percent-decoding; invalid UTF-8 yields `None`, never partial output.
fn percent_decode(s: &str) -> Option<String> {
    urlencoding::decode(s).ok().map(|c| c.into_owned())
}
