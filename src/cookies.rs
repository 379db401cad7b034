//! Preview cookie codec.
//!
//! A single JSON cookie carries the preview state of every repository the
//! visitor previews on this site:
//!
//! ```text
//! { "repo.prismic.io": { "preview": "<ref>" }, "_url": "...", "_track": "..." }
//! ```
//!
//! Decoding is forgiving: anything that does not fit the shape is dropped
//! rather than reported. An empty document is never written; the cookie is
//! deleted instead.
//!
//! Read-modify-write through [`PreviewCookie`] is not atomic. The host page and
//! an embedded frame may both rewrite the cookie and the last write wins.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use axum_extra::extract::cookie::Cookie;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::host::CookieStore;

pub const PREVIEW_COOKIE: &str = "io.prismic.preview";
pub const EXPERIMENT_COOKIE: &str = "io.prismic.experiment";

const URL_KEY: &str = "_url";
const TRACK_KEY: &str = "_track";
const USER_KEY: &str = "_user";
const RESERVED_KEYS: [&str; 3] = [URL_KEY, TRACK_KEY, USER_KEY];

const PREVIEW_FIELD: &str = "preview";

static DOMAIN_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-zA-Z0-9]+\.[a-z]+\.[a-z]+$").expect("static regex"));

pub fn is_domain_key(key: &str) -> bool {
    DOMAIN_KEY.is_match(key)
}

// ============================================================================
// Document
// ============================================================================

/// Validated content of the preview cookie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewDocument {
    domains: BTreeMap<String, BTreeMap<String, String>>,
    /// `_url`, `_track`, `_user`, kept verbatim
    reserved: BTreeMap<String, Value>,
}

/// What to do with the cookie after encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieWrite {
    Set(String),
    Delete,
}

impl PreviewDocument {
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.reserved.is_empty()
    }

    pub fn domains(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.domains.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn preview(&self, domain: &str) -> Option<&str> {
        self.domains
            .get(domain)
            .and_then(|values| values.get(PREVIEW_FIELD))
            .map(String::as_str)
    }

    /// Set the preview ref for a domain, or remove it with `None`/`""`.
    /// Keys that are not valid domain-keys are ignored.
    pub fn set_preview(&mut self, domain: &str, value: Option<&str>) {
        if !is_domain_key(domain) {
            debug!(domain, "ignoring preview write for invalid domain-key");
            return;
        }
        match value.filter(|v| !v.is_empty()) {
            Some(v) => {
                self.domains
                    .entry(domain.to_string())
                    .or_default()
                    .insert(PREVIEW_FIELD.to_string(), v.to_string());
            }
            None => {
                if let Some(values) = self.domains.get_mut(domain) {
                    values.remove(PREVIEW_FIELD);
                    if values.is_empty() {
                        self.domains.remove(domain);
                    }
                }
            }
        }
    }

    /// Replace a domain entry with an untyped value. Only `{ "preview": "<non-empty>" }`
    /// is accepted; any other shape leaves the document untouched.
    pub fn set_domain(&mut self, domain: &str, value: &Value) {
        let preview = value
            .as_object()
            .and_then(|obj| obj.get(PREVIEW_FIELD))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        if let Some(preview) = preview {
            if is_domain_key(domain) {
                let mut values = BTreeMap::new();
                values.insert(PREVIEW_FIELD.to_string(), preview.to_string());
                self.domains.insert(domain.to_string(), values);
            }
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.reserved_str(URL_KEY)
    }

    pub fn set_url(&mut self, value: Option<&str>) {
        self.set_reserved(URL_KEY, value);
    }

    pub fn track(&self) -> Option<&str> {
        self.reserved_str(TRACK_KEY)
    }

    pub fn set_track(&mut self, value: Option<&str>) {
        self.set_reserved(TRACK_KEY, value);
    }

    fn reserved_str(&self, key: &str) -> Option<&str> {
        self.reserved
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn set_reserved(&mut self, key: &str, value: Option<&str>) {
        match value.filter(|v| !v.is_empty()) {
            Some(v) => {
                self.reserved.insert(key.to_string(), Value::String(v.to_string()));
            }
            None => {
                self.reserved.remove(key);
            }
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.reserved {
            map.insert(key.clone(), value.clone());
        }
        for (domain, values) in &self.domains {
            let inner: Map<String, Value> = values
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert(domain.clone(), Value::Object(inner));
        }
        Value::Object(map)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Decode a raw cookie string.
///
/// JSON is tried first. A value that is not JSON is treated as a legacy
/// single-ref cookie and filed under its own host name.
pub fn decode(raw: &str) -> Option<PreviewDocument> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => decode_value(value),
        Err(_) => decode_legacy(raw),
    }
}

/// Decode an already parsed value. Strings are decoded as raw cookies.
pub fn decode_value(value: Value) -> Option<PreviewDocument> {
    match value {
        Value::Object(map) => compliant(map),
        Value::String(raw) => decode(&raw),
        _ => None,
    }
}

fn decode_legacy(raw: &str) -> Option<PreviewDocument> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_string();
    let mut map = Map::new();
    let mut inner = Map::new();
    inner.insert(PREVIEW_FIELD.to_string(), Value::String(raw.to_string()));
    map.insert(host, Value::Object(inner));
    compliant(map)
}

fn compliant(map: Map<String, Value>) -> Option<PreviewDocument> {
    let mut doc = PreviewDocument::default();

    for (key, value) in map {
        if RESERVED_KEYS.contains(&key.as_str()) {
            if !value.is_null() {
                doc.reserved.insert(key, value);
            }
            continue;
        }
        if !is_domain_key(&key) {
            debug!(key = %key, "dropping cookie entry with invalid domain-key");
            continue;
        }
        let Value::Object(entries) = value else {
            debug!(key = %key, "dropping cookie entry that is not a mapping");
            continue;
        };
        let values: BTreeMap<String, String> = entries
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) if !s.is_empty() => Some((k, s)),
                _ => None,
            })
            .collect();
        if !values.is_empty() {
            doc.domains.insert(key, values);
        }
    }

    if doc.is_empty() {
        None
    } else {
        Some(doc)
    }
}

/// Encode a document for writing. Documents that validate to nothing
/// produce [`CookieWrite::Delete`].
pub fn encode(doc: &PreviewDocument) -> CookieWrite {
    let Value::Object(map) = doc.to_value() else {
        return CookieWrite::Delete;
    };
    match compliant(map) {
        Some(valid) => CookieWrite::Set(valid.to_value().to_string()),
        None => CookieWrite::Delete,
    }
}

// ============================================================================
// Store-backed accessors
// ============================================================================

fn write_root(store: &dyn CookieStore, name: &'static str, value: String) {
    store.write(Cookie::build((name, value)).path("/").build());
}

/// Preview cookie bound to one repository's domain-key.
#[derive(Clone)]
pub struct PreviewCookie {
    store: Arc<dyn CookieStore>,
    domain: String,
}

impl PreviewCookie {
    pub fn new(store: Arc<dyn CookieStore>, domain: impl Into<String>) -> Self {
        Self {
            store,
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The compliant document, or an empty one when the cookie is absent/invalid
    pub fn document(&self) -> PreviewDocument {
        self.store
            .read(PREVIEW_COOKIE)
            .and_then(|raw| decode(&raw))
            .unwrap_or_default()
    }

    pub fn save(&self, doc: &PreviewDocument) {
        match encode(doc) {
            CookieWrite::Set(value) => write_root(self.store.as_ref(), PREVIEW_COOKIE, value),
            CookieWrite::Delete => self.store.demolish(PREVIEW_COOKIE),
        }
    }

    pub fn preview(&self) -> Option<String> {
        self.document().preview(&self.domain).map(str::to_string)
    }

    pub fn set_preview(&self, value: Option<&str>) {
        let mut doc = self.document();
        doc.set_preview(&self.domain, value);
        self.save(&doc);
    }

    /// Drop this repository's preview, leaving other repositories alone
    pub fn close(&self) {
        self.set_preview(None);
    }

    pub fn url(&self) -> Option<String> {
        self.document().url().map(str::to_string)
    }

    pub fn set_url(&self, value: Option<&str>) {
        let mut doc = self.document();
        doc.set_url(value);
        self.save(&doc);
    }

    pub fn track(&self) -> Option<String> {
        self.document().track().map(str::to_string)
    }

    pub fn set_track(&self, value: Option<&str>) {
        let mut doc = self.document();
        doc.set_track(value);
        self.save(&doc);
    }

    /// Make sure the only preview cookie left is the one at path `/`.
    pub fn fix_path(&self) {
        fix_cookie_path(self.store.as_ref(), PREVIEW_COOKIE);
    }
}

pub fn fix_cookie_path(store: &dyn CookieStore, name: &'static str) {
    let value = store.read(name);
    store.demolish(name);
    if let Some(value) = value {
        write_root(store, name, value);
    }
}

/// A/B experiment cookie, stored as `"<expId> <variation>"`.
#[derive(Clone)]
pub struct ExperimentCookie {
    store: Arc<dyn CookieStore>,
}

impl ExperimentCookie {
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Option<String> {
        self.store.read(EXPERIMENT_COOKIE)
    }

    pub fn set(&self, exp_id: &str, variation: &str) {
        write_root(
            self.store.as_ref(),
            EXPERIMENT_COOKIE,
            format!("{} {}", exp_id, variation),
        );
    }

    pub fn delete(&self) {
        self.store.demolish(EXPERIMENT_COOKIE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxCookies;
    use serde_json::json;

    #[test]
    fn test_domain_key_pattern() {
        assert!(is_domain_key("repo.prismic.io"));
        assert!(is_domain_key("foyer-demo.wroom.test"));
        assert!(!is_domain_key("bad_key"));
        assert!(!is_domain_key("prismic.io"));
        assert!(!is_domain_key("a.b.c.d"));
    }

    #[test]
    fn test_round_trip() {
        let mut doc = PreviewDocument::default();
        doc.set_preview("repo.prismic.io", Some("ref-1"));
        doc.set_preview("other.prismic.io", Some("ref-2"));
        doc.set_url(Some("https://site.test/page"));
        doc.set_track(Some("track-9"));

        let CookieWrite::Set(raw) = encode(&doc) else {
            panic!("non-empty document must be written");
        };
        assert_eq!(decode(&raw), Some(doc));
    }

    #[test]
    fn test_discards_invalid_entries() {
        let raw = json!({
            "bad_key": { "preview": "x" },
            "flat.prismic.io": "not-a-mapping",
            "repo.prismic.io": { "preview": "ref", "empty": "", "num": 3, "nil": null },
            "gone.prismic.io": { "preview": "" },
        })
        .to_string();

        let doc = decode(&raw).unwrap();
        let domains: Vec<_> = doc.domains().map(|(k, _)| k.to_string()).collect();
        assert_eq!(domains, vec!["repo.prismic.io".to_string()]);
        let (_, values) = doc.domains().next().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(doc.preview("repo.prismic.io"), Some("ref"));
    }

    #[test]
    fn test_empty_document_deletes() {
        assert_eq!(encode(&PreviewDocument::default()), CookieWrite::Delete);
        assert_eq!(decode(r#"{"bad_key":{"preview":"x"}}"#), None);
        assert_eq!(decode("{}"), None);
    }

    #[test]
    fn test_non_object_json_is_absent() {
        assert_eq!(decode("42"), None);
        assert_eq!(decode("[1,2]"), None);
        assert_eq!(decode("\"plain\""), None);
    }

    #[test]
    fn test_pre_parsed_value() {
        let doc = decode_value(json!({ "repo.prismic.io": { "preview": "abc" } })).unwrap();
        assert_eq!(doc.preview("repo.prismic.io"), Some("abc"));
    }

    #[test]
    fn test_legacy_ref_cookie() {
        let raw = "https://repo.prismic.io/previews/session/abc?websitePreviewId=1";
        let doc = decode(raw).unwrap();
        assert_eq!(doc.preview("repo.prismic.io"), Some(raw));
    }

    #[test]
    fn test_garbage_is_absent() {
        assert_eq!(decode("not json, not a url"), None);
    }

    #[test]
    fn test_reserved_keys_pass_through() {
        let doc = decode(r#"{"_url":"https://x.test","_track":"t","_user":{"id":1}}"#).unwrap();
        assert_eq!(doc.url(), Some("https://x.test"));
        assert_eq!(doc.track(), Some("t"));
        assert!(doc.domains().next().is_none());
        let CookieWrite::Set(raw) = encode(&doc) else {
            panic!("reserved keys keep the cookie alive");
        };
        assert!(raw.contains("\"_user\""));
    }

    #[test]
    fn test_set_domain_only_accepts_preview_shape() {
        let mut doc = PreviewDocument::default();
        doc.set_domain("repo.prismic.io", &json!("raw-string"));
        doc.set_domain("repo.prismic.io", &json!({ "experiment": "x" }));
        doc.set_domain("repo.prismic.io", &json!({ "preview": "" }));
        assert!(doc.is_empty());

        doc.set_domain("repo.prismic.io", &json!({ "preview": "ref", "extra": "dropped" }));
        assert_eq!(doc.preview("repo.prismic.io"), Some("ref"));
        assert_eq!(doc.domains().next().unwrap().1.len(), 1);
    }

    #[test]
    fn test_clearing_last_preview_removes_domain() {
        let mut doc = PreviewDocument::default();
        doc.set_preview("repo.prismic.io", Some("ref"));
        doc.set_preview("repo.prismic.io", None);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_preview_cookie_facade() {
        let store = Arc::new(SandboxCookies::default());
        let cookie = PreviewCookie::new(store.clone(), "repo.prismic.io");
        assert_eq!(cookie.preview(), None);

        cookie.set_preview(Some("ref-a"));
        assert_eq!(cookie.preview().as_deref(), Some("ref-a"));
        assert_eq!(store.path_of(PREVIEW_COOKIE).as_deref(), Some("/"));

        let other = PreviewCookie::new(store.clone(), "other.prismic.io");
        other.set_preview(Some("ref-b"));
        cookie.close();
        assert_eq!(cookie.preview(), None);
        assert_eq!(other.preview().as_deref(), Some("ref-b"));

        other.close();
        assert_eq!(store.read(PREVIEW_COOKIE), None);
    }

    #[test]
    fn test_fix_path_moves_cookie_to_root() {
        let store = Arc::new(SandboxCookies::default());
        store.write(
            Cookie::build((PREVIEW_COOKIE, r#"{"repo.prismic.io":{"preview":"r"}}"#))
                .path("/blog")
                .build(),
        );
        let cookie = PreviewCookie::new(store.clone(), "repo.prismic.io");
        cookie.fix_path();
        assert_eq!(store.path_of(PREVIEW_COOKIE).as_deref(), Some("/"));
        assert_eq!(cookie.preview().as_deref(), Some("r"));
    }

    #[test]
    fn test_experiment_cookie() {
        let store = Arc::new(SandboxCookies::default());
        let exp = ExperimentCookie::new(store);
        exp.set("exp42", "1");
        assert_eq!(exp.get().as_deref(), Some("exp42 1"));
        exp.delete();
        assert_eq!(exp.get(), None);
    }
}
