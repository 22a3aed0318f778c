use serde::{Deserialize, Serialize};

/// Known webhook providers. Unknown slugs resolve to `Generic`, which accepts
/// unsigned payloads and forwards them as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Salesforce,
    Shopify,
    Generic,
}

impl Provider {
    pub fn from_slug(slug: &str) -> Provider {
        match slug.trim().to_lowercase().as_str() {
            "stripe" => Provider::Stripe,
            "salesforce" => Provider::Salesforce,
            "shopify" => Provider::Shopify,
            _ => Provider::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Salesforce => "salesforce",
            Provider::Shopify => "shopify",
            Provider::Generic => "generic",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_slug_falls_back_to_generic() {
        assert_eq!(Provider::from_slug("stripe"), Provider::Stripe);
        assert_eq!(Provider::from_slug("STRIPE"), Provider::Stripe);
        assert_eq!(Provider::from_slug("acme-internal"), Provider::Generic);
        assert_eq!(Provider::from_slug(""), Provider::Generic);
    }
}
