//! User-agent parsing.
//!
//! The middleware hands the raw `user-agent` header to a [`UserAgentParser`].
//! When the parser recognises it, the structured value is logged. Otherwise
//! the raw header string is logged unchanged.

use serde_json::{json, Value};

/// Turns a raw `user-agent` header into a descriptive value.
pub trait UserAgentParser: Send + Sync + 'static {
    /// Returns `None` when the header is not recognised.
    fn parse(&self, raw: &str) -> Option<Value>;
}

impl<F> UserAgentParser for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
{
    fn parse(&self, raw: &str) -> Option<Value> {
        self(raw)
    }
}

/// Recognises the common desktop and mobile browsers.
///
/// Produces `{"family", "version", "os"}`. Tools, bots and libraries are
/// left unrecognised so their raw header is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserUserAgentParser;

// Order matters: Chromium-based browsers also advertise `Chrome/` and `Safari/`.
const FAMILIES: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("OPR/", "Opera"),
    ("Firefox/", "Firefox"),
    ("Chrome/", "Chrome"),
    ("CriOS/", "Chrome"),
];

const OPERATING_SYSTEMS: &[(&str, &str)] = &[
    ("Windows NT ", "Windows"),
    ("iPhone OS ", "iOS"),
    ("CPU OS ", "iOS"),
    ("Mac OS X ", "Mac OS X"),
    ("Android ", "Android"),
    ("CrOS ", "Chrome OS"),
    ("Linux", "Linux"),
];

impl UserAgentParser for BrowserUserAgentParser {
    fn parse(&self, raw: &str) -> Option<Value> {
        if !raw.starts_with("Mozilla/") {
            return None;
        }

        let (family, version) = FAMILIES
            .iter()
            .find_map(|(token, family)| version_after(raw, token).map(|v| (*family, v)))
            .or_else(|| {
                raw.contains("Safari/")
                    .then(|| version_after(raw, "Version/"))
                    .flatten()
                    .map(|v| ("Safari", v))
            })?;

        let os = OPERATING_SYSTEMS
            .iter()
            .find(|(token, _)| raw.contains(token))
            .map(|(token, name)| match version_after(raw, token) {
                Some(v) if !v.is_empty() => format!("{name} {}", v.replace('_', ".")),
                _ => (*name).to_owned(),
            })
            .unwrap_or_else(|| "Other".to_owned());

        Some(json!({
            "family": family,
            "version": version,
            "os": os,
        }))
    }
}

fn version_after(raw: &str, token: &str) -> Option<String> {
    let start = raw.find(token)? + token.len();
    let version: String = raw[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .collect();
    Some(version)
}
