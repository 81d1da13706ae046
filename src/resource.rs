use url::Url;

/// Just a wrapper around a URL and credentials
#[derive(Clone)]
pub struct Resource {
    url: Url,
    username: String,
    password: String,
}

impl Resource {
    pub fn new(url: Url, username: String, password: String) -> Self {
        Self { url, username, password }
    }

    pub fn url(&self) -> &Url { &self.url }
    pub fn username(&self) -> &String { &self.username }
    pub fn password(&self) -> &String { &self.password }

    /// Build a new Resource with the same credentials but another URL
    pub fn with_url(&self, url: Url) -> Resource {
        let mut built = (*self).clone();
        built.url = url;
        built
    }

    /// Resolve an href from a DAV response into an absolute URL.
    ///
    /// Servers are inconsistent here: some reply with absolute URLs, most with
    /// path-absolute hrefs, a few with hrefs relative to the collection.
    pub fn resolve_href(&self, href: &str) -> Result<Url, url::ParseError> {
        match Url::parse(href) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.url.join(href),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> Resource {
        let url = Url::parse("https://dav.example.com/addressbooks/jo/default/").unwrap();
        Resource::new(url, "jo".to_string(), "secret".to_string())
    }

    #[test]
    fn hrefs_resolve_to_absolute_urls() {
        let res = resource();

        assert_eq!(res.resolve_href("https://other.example.com/x.vcf").unwrap().as_str(),
                   "https://other.example.com/x.vcf");
        assert_eq!(res.resolve_href("/addressbooks/jo/default/x.vcf").unwrap().as_str(),
                   "https://dav.example.com/addressbooks/jo/default/x.vcf");
        assert_eq!(res.resolve_href("x.vcf").unwrap().as_str(),
                   "https://dav.example.com/addressbooks/jo/default/x.vcf");
    }
}
