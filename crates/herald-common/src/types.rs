use std::fmt;

use serde::{Deserialize, Serialize};

/// A specific document of an installed application: the page URL together
/// with the manifest URL of the app it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageAddress {
    pub page_url: String,
    pub manifest_url: String,
}

impl PageAddress {
    pub fn new(page_url: impl Into<String>, manifest_url: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            manifest_url: manifest_url.into(),
        }
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.page_url, self.manifest_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_both_urls() {
        let page = PageAddress::new("/app.html", "https://x/manifest.json");
        let s = page.to_string();
        assert!(s.contains("/app.html"));
        assert!(s.contains("https://x/manifest.json"));
    }

    #[test]
    fn equality_is_by_both_urls() {
        let a = PageAddress::new("/a", "https://x/m.json");
        let b = PageAddress::new("/a", "https://x/m.json");
        let c = PageAddress::new("/a", "https://y/m.json");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
