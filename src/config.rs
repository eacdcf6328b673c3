use url::Url;

use crate::redirect::RedirectPolicy;

/// Client configuration for the Bangladesh Digital Auth API.
///
/// The required field (`base_url`) is a constructor parameter — no runtime
/// "missing field" errors. Everything else has defaults and is overridden
/// with `with_*` methods.
///
/// ```rust,ignore
/// use banglade_auth_client::AuthConfig;
///
/// let config = AuthConfig::new("https://api.banglade.sh".parse()?)
///     .with_redirect_policy(my_policy);
/// ```
#[derive(Debug, Clone)]
pub struct AuthConfig {
    base_url: Url,
    redirect: RedirectPolicy,
}

impl AuthConfig {
    /// Create a configuration pointing at the given API origin.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            redirect: RedirectPolicy::default(),
        }
    }

    /// Override the redirect allow-list and fallback destination.
    #[must_use]
    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect = policy;
        self
    }

    /// The API origin.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The redirect authorizer configuration.
    #[must_use]
    pub fn redirect_policy(&self) -> &RedirectPolicy {
        &self.redirect
    }

    /// Absolute URL for an API path.
    pub(crate) fn endpoint(&self, path: &str) -> Url {
        self.base_url.join(path).expect("valid endpoint path")
    }
}
