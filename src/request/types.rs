//! Small value types carried by a [`Request`](super::Request).

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// How a transfer may use locally cached responses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Follow the caching rules of the protocol.
    #[default]
    UseProtocolCachePolicy,
    /// Always load from the origin.
    ReloadIgnoringLocalCacheData,
    /// Use cached data of any age, loading from the origin only if nothing is cached.
    ReturnCacheDataElseLoad,
    /// Use cached data of any age, never loading from the origin.
    ReturnCacheDataDontLoad,
}

/// The kind of traffic a request carries, used by transports to prioritise it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// Standard traffic.
    #[default]
    Default,
    /// Voice over IP control traffic.
    Voip,
    /// Video traffic.
    Video,
    /// Background traffic.
    Background,
    /// Voice traffic.
    Voice,
    /// Call signaling traffic.
    CallSignaling,
}

/// Media types used for the `Content-Type` and `Accept` headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `application/octet-stream`
    Binary,
    /// `application/json`
    Json,
    /// `application/x-plist`
    PropertyList,
    /// `application/x-www-form-urlencoded`
    FormUrlEncoded,
    /// `application/xml`
    Xml,
    /// `text/plain`
    Text,
    /// `text/html`
    Html,
    /// `text/csv`
    Csv,
    /// `image/png`
    Png,
    /// `image/jpeg`
    Jpeg,
    /// `application/pdf`
    Pdf,
    /// Any other media type, written verbatim.
    Custom(String),
}

impl ContentType {
    /// The media type as it appears in a header.
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Binary => "application/octet-stream",
            ContentType::Json => "application/json",
            ContentType::PropertyList => "application/x-plist",
            ContentType::FormUrlEncoded => "application/x-www-form-urlencoded",
            ContentType::Xml => "application/xml",
            ContentType::Text => "text/plain",
            ContentType::Html => "text/html",
            ContentType::Csv => "text/csv",
            ContentType::Png => "image/png",
            ContentType::Jpeg => "image/jpeg",
            ContentType::Pdf => "application/pdf",
            ContentType::Custom(value) => value,
        }
    }

    /// Interpret a header value, falling back to [`ContentType::Custom`].
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "application/octet-stream" => ContentType::Binary,
            "application/json" => ContentType::Json,
            "application/x-plist" => ContentType::PropertyList,
            "application/x-www-form-urlencoded" => ContentType::FormUrlEncoded,
            "application/xml" => ContentType::Xml,
            "text/plain" => ContentType::Text,
            "text/html" => ContentType::Html,
            "text/csv" => ContentType::Csv,
            "image/png" => ContentType::Png,
            "image/jpeg" => ContentType::Jpeg,
            "application/pdf" => ContentType::Pdf,
            other => ContentType::Custom(other.to_owned()),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values of the `Accept-Encoding` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    /// `gzip`
    Gzip,
    /// `compress`
    Compress,
    /// `deflate`
    Deflate,
    /// `identity`
    Identity,
    /// `br`
    Brotli,
}

impl ContentEncoding {
    /// The encoding token as it appears in a header.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Compress => "compress",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Identity => "identity",
            ContentEncoding::Brotli => "br",
        }
    }

    /// Interpret an encoding token. Unknown tokens yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "gzip" => Some(ContentEncoding::Gzip),
            "compress" => Some(ContentEncoding::Compress),
            "deflate" => Some(ContentEncoding::Deflate),
            "identity" => Some(ContentEncoding::Identity),
            "br" => Some(ContentEncoding::Brotli),
            _ => None,
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directives of the `Cache-Control` request header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheControl {
    /// `no-cache`
    NoCache,
    /// `no-store`
    NoStore,
    /// `no-transform`
    NoTransform,
    /// `only-if-cached`
    OnlyIfCached,
    /// `max-age=<seconds>`
    MaxAge(u64),
    /// `max-stale` with an optional limit in seconds.
    MaxStale(Option<u64>),
    /// `min-fresh=<seconds>`
    MinFresh(u64),
    /// Any other directive, written verbatim.
    Custom(String),
}

impl CacheControl {
    /// Interpret a single directive.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let (name, argument) = match value.split_once('=') {
            Some((name, argument)) => (name, Some(argument)),
            None => (value, None),
        };
        let seconds = argument.and_then(|a| a.parse::<u64>().ok());

        match (name, argument, seconds) {
            ("no-cache", None, _) => CacheControl::NoCache,
            ("no-store", None, _) => CacheControl::NoStore,
            ("no-transform", None, _) => CacheControl::NoTransform,
            ("only-if-cached", None, _) => CacheControl::OnlyIfCached,
            ("max-age", Some(_), Some(s)) => CacheControl::MaxAge(s),
            ("max-stale", None, _) => CacheControl::MaxStale(None),
            ("max-stale", Some(_), Some(s)) => CacheControl::MaxStale(Some(s)),
            ("min-fresh", Some(_), Some(s)) => CacheControl::MinFresh(s),
            _ => CacheControl::Custom(value.to_owned()),
        }
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheControl::NoCache => f.write_str("no-cache"),
            CacheControl::NoStore => f.write_str("no-store"),
            CacheControl::NoTransform => f.write_str("no-transform"),
            CacheControl::OnlyIfCached => f.write_str("only-if-cached"),
            CacheControl::MaxAge(seconds) => write!(f, "max-age={seconds}"),
            CacheControl::MaxStale(None) => f.write_str("max-stale"),
            CacheControl::MaxStale(Some(seconds)) => write!(f, "max-stale={seconds}"),
            CacheControl::MinFresh(seconds) => write!(f, "min-fresh={seconds}"),
            CacheControl::Custom(value) => f.write_str(value),
        }
    }
}

/// Credentials sent in the `Authorization` header.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum Authorization {
    /// No `Authorization` header.
    #[default]
    None,
    /// HTTP basic authentication.
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// Bearer token authentication.
    Bearer {
        /// The token.
        token: String,
    },
    /// Any other scheme, written verbatim.
    Custom(String),
}

impl Authorization {
    /// The header value, or `None` for [`Authorization::None`].
    pub fn header_value(&self) -> Option<String> {
        match self {
            Authorization::None => None,
            Authorization::Basic { user, password } => {
                Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
            }
            Authorization::Bearer { token } => Some(format!("Bearer {token}")),
            Authorization::Custom(value) => Some(value.clone()),
        }
    }

    /// Interpret an `Authorization` header value.
    ///
    /// Basic credentials which do not decode are kept as [`Authorization::Custom`].
    pub fn parse(value: &str) -> Self {
        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = STANDARD
                .decode(encoded.trim())
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok());
            if let Some((user, password)) = decoded.as_deref().and_then(|d| d.split_once(':')) {
                return Authorization::Basic {
                    user: user.to_owned(),
                    password: password.to_owned(),
                };
            }
        } else if let Some(token) = value.strip_prefix("Bearer ") {
            return Authorization::Bearer {
                token: token.trim().to_owned(),
            };
        }
        Authorization::Custom(value.to_owned())
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::None => f.write_str("None"),
            Authorization::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"..")
                .finish(),
            Authorization::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
            Authorization::Custom(_) => f.debug_tuple("Custom").finish_non_exhaustive(),
        }
    }
}
