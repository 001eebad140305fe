use serde::{Deserialize, Serialize};
use url::Url;

/// Origins the embedded booking pages are served from.
pub const TRUSTED_ORIGINS: [&str; 4] = [
    "https://cal.meetergo.com",
    "https://meetergo.com",
    "https://www.meetergo.com",
    "https://app.meetergo.com",
];

/// How strictly a message origin is matched against [`TRUSTED_ORIGINS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginPolicy {
    /// Exact match or any origin starting with a trusted one, plus anything
    /// mentioning `localhost`/`127.0.0.1`. Admits look-alikes such as
    /// `https://meetergo.comevil.com`.
    #[default]
    Prefix,
    /// Exact match only, plus origins whose host is `localhost`/`127.0.0.1`.
    Exact,
}

impl OriginPolicy {
    pub fn is_trusted(self, origin: &str) -> bool {
        match self {
            OriginPolicy::Prefix => {
                is_local_development(origin)
                    || TRUSTED_ORIGINS
                        .iter()
                        .any(|allowed| origin == *allowed || origin.starts_with(allowed))
            }
            OriginPolicy::Exact => {
                TRUSTED_ORIGINS.contains(&origin) || has_local_host(origin)
            }
        }
    }
}

/// Whether a message origin is trusted under the default policy.
pub fn is_valid_origin(origin: &str) -> bool {
    OriginPolicy::Prefix.is_trusted(origin)
}

fn is_local_development(origin: &str) -> bool {
    origin.contains("localhost") || origin.contains("127.0.0.1")
}

fn has_local_host(origin: &str) -> bool {
    Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .is_some_and(|host| host == "localhost" || host == "127.0.0.1")
}
