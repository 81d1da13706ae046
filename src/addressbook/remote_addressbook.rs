use async_trait::async_trait;
use minidom::Element;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use url::Url;

use crate::addressbook::{PutOutcome, RemoteVcard, SupportedVcardVersions};
use crate::client::sub_request_and_extract_elems;
use crate::error::RemoteError;
use crate::mapping::VersionTag;
use crate::resource::Resource;
use crate::retry::{with_retry, RetryOptions};
use crate::traits::DavAddressBook;
use crate::utils::find_elem;

static VCARDS_BODY: &str = r#"
    <c:addressbook-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:carddav">
        <d:prop>
            <d:getetag />
            <c:address-data />
        </d:prop>
    </c:addressbook-query>
"#;

static ETAG_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:">
        <d:prop>
            <d:getetag />
        </d:prop>
    </d:propfind>
"#;


/// A CardDAV address book created by a [`Client`](crate::client::Client).
#[derive(Clone)]
pub struct RemoteAddressBook {
    name: String,
    resource: Resource,
    supported_versions: SupportedVcardVersions,
    http: reqwest::Client,
    retry: RetryOptions,
}

impl RemoteAddressBook {
    /// `http` is the connection-wide client that discovery already used
    pub fn new(name: String, resource: Resource, supported_versions: SupportedVcardVersions, http: reqwest::Client) -> Self {
        Self {
            name,
            resource,
            supported_versions,
            http,
            retry: RetryOptions::default(),
        }
    }

    /// Use custom retry settings for every request this address book makes
    pub fn with_retry_options(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// The URL a new resource with this filename will live at
    fn vcard_url(&self, filename: &str) -> Result<Url, RemoteError> {
        let mut url = self.resource.url().clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Dav(format!("cannot append a path to {}", self.resource.url())))?
            .pop_if_empty()
            .push(filename);
        Ok(url)
    }

    /// The current ETag of a single resource, through a `PROPFIND getetag`
    async fn fetch_etag(&self, url: &Url) -> Result<Option<VersionTag>, RemoteError> {
        let resource = self.resource.with_url(url.clone());
        let etags = with_retry(&self.retry, || {
            sub_request_and_extract_elems(&self.http, &resource, "PROPFIND", ETAG_BODY.to_string(), "getetag")
        }).await?;

        let etag = etags.iter()
            .map(|elem| elem.text())
            .find(|text| text.trim().is_empty() == false)
            .map(VersionTag::from);
        Ok(etag)
    }

    /// Turn a successful PUT response into a [`PutOutcome`].
    ///
    /// Not every server hands back an ETag on PUT (some rewrite the data they
    /// are given and consider the stored copy a different entity). We then ask
    /// for it explicitly; if that fails too, the outcome keeps `None` and the
    /// next pull reconciles.
    async fn complete_put_outcome(&self, requested: &Url, response: reqwest::Response) -> Result<PutOutcome, RemoteError> {
        let headers = response.headers();
        let mut etag = headers.get("ETag")
            .and_then(|value| value.to_str().ok())
            .map(|text| VersionTag::from(String::from(text)));

        // Some servers store the card somewhere else than asked; the Location
        // header is the only direct hint we get about that
        let url = match headers.get("Location").and_then(|value| value.to_str().ok()) {
            Some(href) => self.resource.resolve_href(href)?,
            None => requested.clone(),
        };

        if etag.is_none() {
            match self.fetch_etag(&url).await {
                Ok(fetched) => etag = fetched,
                Err(err) => log::debug!("Could not fetch the ETag of {} after a PUT: {}", url, err),
            }
        }

        Ok(PutOutcome { url, etag })
    }
}

#[async_trait]
impl DavAddressBook for RemoteAddressBook {
    fn url(&self) -> &Url { self.resource.url() }
    fn name(&self) -> &str { &self.name }
    fn supported_versions(&self) -> SupportedVcardVersions {
        self.supported_versions
    }

    async fn list_vcards(&self) -> Result<Vec<RemoteVcard>, RemoteError> {
        let responses = with_retry(&self.retry, || {
            sub_request_and_extract_elems(&self.http, &self.resource, "REPORT", VCARDS_BODY.to_string(), "response")
        }).await?;

        Ok(parse_vcard_listing(&self.resource, &responses))
    }

    async fn create_vcard(&self, filename: &str, content: &str) -> Result<PutOutcome, RemoteError> {
        let url = self.vcard_url(filename)?;

        let response = with_retry(&self.retry, || async {
            let response = self.http
                .put(url.clone())
                .header("If-None-Match", "*")
                .header(CONTENT_TYPE, "text/vcard")
                .header(CONTENT_LENGTH, content.len())
                .basic_auth(self.resource.username(), Some(self.resource.password()))
                .body(content.to_string())
                .send()
                .await?;

            if response.status().is_success() == false {
                return Err(RemoteError::Http { status: response.status(), url: url.clone() });
            }
            Ok(response)
        }).await?;

        self.complete_put_outcome(&url, response).await
    }

    async fn update_vcard(&self, url: &Url, etag: Option<&VersionTag>, content: &str) -> Result<PutOutcome, RemoteError> {
        let response = with_retry(&self.retry, || async {
            let mut request = self.http
                .put(url.clone())
                .header(CONTENT_TYPE, "text/vcard")
                .header(CONTENT_LENGTH, content.len());
            if let Some(etag) = etag {
                request = request.header("If-Match", etag.as_str());
            }
            let response = request
                .basic_auth(self.resource.username(), Some(self.resource.password()))
                .body(content.to_string())
                .send()
                .await?;

            if response.status().is_success() == false {
                return Err(RemoteError::Http { status: response.status(), url: url.clone() });
            }
            Ok(response)
        }).await?;

        self.complete_put_outcome(url, response).await
    }

    async fn delete_vcard(&self, url: &Url) -> Result<(), RemoteError> {
        with_retry(&self.retry, || async {
            let response = self.http
                .delete(url.clone())
                .basic_auth(self.resource.username(), Some(self.resource.password()))
                .send()
                .await?;

            if response.status().is_success() == false {
                return Err(RemoteError::Http { status: response.status(), url: url.clone() });
            }
            Ok(())
        }).await
    }
}

/// Extract the vCards (URL, ETag and raw text) out of a REPORT multistatus
/// answer. Responses missing any of the three are skipped with a warning.
fn parse_vcard_listing(resource: &Resource, responses: &[Element]) -> Vec<RemoteVcard> {
    let mut vcards = Vec::new();
    for response in responses {
        let href = match find_elem(response, "href") {
            None => {
                log::warn!("Unable to extract HREF from a listing entry, ignoring it");
                continue;
            },
            Some(elem) => elem.text(),
        };
        let url = match resource.resolve_href(&href) {
            Err(err) => {
                log::warn!("Invalid HREF {} in a listing entry ({}), ignoring it", href, err);
                continue;
            },
            Ok(url) => url,
        };

        let etag = match find_elem(response, "getetag") {
            None => {
                log::warn!("Unable to extract the ETag of {}, ignoring it", url);
                continue;
            },
            Some(elem) => VersionTag::from(elem.text()),
        };

        let data = match find_elem(response, "address-data") {
            None => {
                log::warn!("No address data for {}, ignoring it", url);
                continue;
            },
            Some(elem) => elem.text(),
        };
        if data.trim().is_empty() {
            log::warn!("Empty address data for {}, ignoring it", url);
            continue;
        }

        vcards.push(RemoteVcard { url, etag, data });
    }
    vcards
}
