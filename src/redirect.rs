use url::Url;

/// Default allow-list: the first-party banglade.sh applications plus local
/// development ports.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "posts.banglade.sh",
    "files.banglade.sh",
    "comments.banglade.sh",
    "media.banglade.sh",
    "localhost:3000",
    "localhost:3001",
    "localhost:8080",
];

/// Default in-app landing destination when no valid redirect target exists.
pub const DEFAULT_DESTINATION: &str = "/dashboard";

/// Where to send the user after authentication.
///
/// Navigation itself is the embedder's job; once it navigates to an
/// `External` target the handoff is one-way, with no rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Allow-listed cross-application target, credentials appended.
    External(Url),
    /// In-app fallback path.
    Default(String),
}

/// Validates requested cross-application redirect targets against a static
/// host allow-list and constructs the outbound URL carrying credentials.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    allowed_domains: Vec<String>,
    default_destination: String,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|&d| d.to_owned()).collect(),
            default_destination: DEFAULT_DESTINATION.to_owned(),
        }
    }
}

impl RedirectPolicy {
    /// Create a policy with an explicit allow-list and fallback destination.
    #[must_use]
    pub fn new(allowed_domains: Vec<String>, default_destination: impl Into<String>) -> Self {
        Self {
            allowed_domains,
            default_destination: default_destination.into(),
        }
    }

    /// The configured allow-list entries.
    #[must_use]
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// The in-app fallback destination.
    #[must_use]
    pub fn default_destination(&self) -> &str {
        &self.default_destination
    }

    /// Whether `raw` is an acceptable redirect target.
    ///
    /// True iff it parses as an absolute URL whose `host[:port]` equals an
    /// allow-list entry exactly or is a strict subdomain of one. The suffix
    /// match is dot-bounded: `evilposts.banglade.sh` does not match the
    /// entry `posts.banglade.sh`, and neither does
    /// `posts.banglade.sh.evil.com`. Unparseable input is invalid, never an
    /// error.
    #[must_use]
    pub fn is_valid(&self, raw: &str) -> bool {
        self.validated(raw).is_some()
    }

    fn validated(&self, raw: &str) -> Option<Url> {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        self.allowed_domains
            .iter()
            .any(|entry| authority == *entry || authority.ends_with(&format!(".{entry}")))
            .then_some(url)
    }

    /// The requested redirect target from the current page's query string:
    /// `redirect_url` takes precedence over `redirect`.
    #[must_use]
    pub fn redirect_url_from_query(page_url: &Url) -> Option<String> {
        let mut secondary = None;
        for (key, value) in page_url.query_pairs() {
            match &*key {
                "redirect_url" => return Some(value.into_owned()),
                "redirect" if secondary.is_none() => secondary = Some(value.into_owned()),
                _ => {}
            }
        }
        secondary
    }

    /// Resolve the post-authentication destination for the current page.
    ///
    /// A valid target gets `token` (and `refresh_token`, when one is held)
    /// appended as query parameters; any credential parameters already on
    /// the target are replaced, and a stale `refresh_token` parameter is
    /// removed when no refresh token is available. An invalid or absent
    /// target falls back to the default in-app destination.
    #[must_use]
    pub fn resolve(
        &self,
        page_url: &Url,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Destination {
        let fallback = || Destination::Default(self.default_destination.clone());

        let Some(raw) = Self::redirect_url_from_query(page_url) else {
            return fallback();
        };
        let Some(mut target) = self.validated(&raw) else {
            tracing::warn!(url = %raw, "redirect target not in allow-list");
            return fallback();
        };

        let retained: Vec<(String, String)> = target
            .query_pairs()
            .filter(|(key, _)| key != "token" && key != "refresh_token")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = target.query_pairs_mut();
            pairs.clear();
            for (key, value) in &retained {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("token", access_token);
            if let Some(refresh) = refresh_token {
                pairs.append_pair("refresh_token", refresh);
            }
        }

        Destination::External(target)
    }
}

/// The opaque one-time `token` query parameter consumed by the
/// password-reset and email-verification flows. This is a server-issued
/// single-use credential, not the session access token.
#[must_use]
pub fn one_time_token_from_query(page_url: &Url) -> Option<String> {
    page_url
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}
