//! Cookie capability handed to middleware and resolvers.
//!
//! [`RequestCookies`] is a request-scoped view over the incoming `Cookie`
//! header.  Writes are rendered as `Set-Cookie` header values and
//! collected so the transport can attach them to its response.

use std::collections::HashMap;
use std::fmt::Write as _;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes for [`CookieJar::set`].  Unset fields take the defaults
/// `path=/`, `secure`, `httpOnly` and `SameSite=Lax`.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub expires: Option<DateTime<Utc>>,
    /// Seconds.
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub same_site: Option<SameSite>,
}

/// Cookie accessor.  Implementations decide where reads come from and
/// where writes go.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn get_all(&self) -> HashMap<String, String>;
    fn set(&self, name: &str, value: &str, options: CookieOptions);
    fn delete(&self, name: &str);
}

/// Cookies of one inbound request.
#[derive(Debug, Default)]
pub struct RequestCookies {
    current: Mutex<HashMap<String, String>>,
    outgoing: Mutex<Vec<String>>,
}

impl RequestCookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut current = HashMap::new();
        for raw in headers.get_all(header::COOKIE) {
            let Ok(raw) = raw.to_str() else { continue };
            for pair in raw.split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim().trim_matches('"');
                current.insert(name.to_string(), percent_decode(value));
            }
        }
        Self {
            current: Mutex::new(current),
            outgoing: Mutex::new(Vec::new()),
        }
    }

    /// Drain the `Set-Cookie` values recorded so far.
    pub fn take_set_cookie_headers(&self) -> Vec<String> {
        std::mem::take(&mut *self.outgoing.lock())
    }
}

impl CookieJar for RequestCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.current.lock().get(name).cloned()
    }

    fn get_all(&self) -> HashMap<String, String> {
        self.current.lock().clone()
    }

    fn set(&self, name: &str, value: &str, options: CookieOptions) {
        let rendered = render_set_cookie(name, value, &options);
        self.current.lock().insert(name.to_string(), value.to_string());
        self.outgoing.lock().push(rendered);
    }

    fn delete(&self, name: &str) {
        let rendered = render_set_cookie(
            name,
            "",
            &CookieOptions {
                max_age: Some(0),
                ..Default::default()
            },
        );
        self.current.lock().remove(name);
        self.outgoing.lock().push(rendered);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn render_set_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut out = format!("{name}={}", percent_encode(value));
    if let Some(max_age) = options.max_age {
        let _ = write!(out, "; Max-Age={max_age}");
    }
    if let Some(domain) = &options.domain {
        let _ = write!(out, "; Domain={domain}");
    }
    let _ = write!(out, "; Path={}", options.path.as_deref().unwrap_or("/"));
    if let Some(expires) = options.expires {
        let _ = write!(out, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"));
    }
    if options.http_only.unwrap_or(true) {
        out.push_str("; HttpOnly");
    }
    if options.secure.unwrap_or(true) {
        out.push_str("; Secure");
    }
    let _ = write!(
        out,
        "; SameSite={}",
        options.same_site.unwrap_or_default().as_str()
    );
    out
}

// Same unreserved set as JavaScript's encodeURIComponent.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&b)
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
