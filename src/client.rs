//! This module provides a client to connect to a CardDAV server

use std::convert::TryFrom;
use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;
use minidom::Element;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use url::Url;

use crate::addressbook::remote_addressbook::RemoteAddressBook;
use crate::addressbook::SupportedVcardVersions;
use crate::connection::Connection;
use crate::error::RemoteError;
use crate::resource::Resource;
use crate::retry::{with_retry, RetryOptions};
use crate::traits::{CardDavSource, DavAddressBook};
use crate::utils::{find_elem, find_elems};


static DAVCLIENT_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:">
       <d:prop>
           <d:current-user-principal />
       </d:prop>
    </d:propfind>
"#;

static HOMESET_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:carddav" >
      <d:self/>
      <d:prop>
        <c:addressbook-home-set />
      </d:prop>
    </d:propfind>
"#;

static BOOKS_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:carddav" >
       <d:prop>
         <d:displayname />
         <d:resourcetype />
         <c:supported-address-data />
       </d:prop>
    </d:propfind>
"#;


/// Perform a WebDAV request (PROPFIND, REPORT...) and return the raw response body
pub async fn sub_request(http: &reqwest::Client, resource: &Resource, method: &str, body: String, depth: u32) -> Result<String, RemoteError> {
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|err| RemoteError::Other(format!("invalid HTTP method {}: {}", method, err)))?;

    let res = http
        .request(method, resource.url().clone())
        .header("Depth", depth)
        .header(CONTENT_TYPE, "application/xml")
        .basic_auth(resource.username(), Some(resource.password()))
        .body(body)
        .send()
        .await?;

    if res.status().is_success() == false {
        return Err(RemoteError::Http { status: res.status(), url: resource.url().clone() });
    }

    let text = res.text().await?;
    Ok(text)
}

/// Perform a `Depth: 0` PROPFIND and extract the text of the element at the given path
pub async fn sub_request_and_extract_elem(http: &reqwest::Client, resource: &Resource, body: String, items: &[&str]) -> Result<String, RemoteError> {
    let text = sub_request(http, resource, "PROPFIND", body, 0).await?;

    let root: Element = text.parse()?;
    let mut current_element = &root;
    for item in items {
        current_element = match find_elem(current_element, item) {
            None => return Err(RemoteError::Dav(format!("missing element {} in response", item))),
            Some(elem) => elem,
        };
    }
    Ok(current_element.text())
}

/// Perform a request and extract every element with the given name from the answer
pub async fn sub_request_and_extract_elems(http: &reqwest::Client, resource: &Resource, method: &str, body: String, item: &str) -> Result<Vec<Element>, RemoteError> {
    let text = sub_request(http, resource, method, body, 1).await?;

    let element: Element = text.parse()?;
    Ok(find_elems(&element, item).iter().map(|elem| (*elem).clone()).collect())
}


/// A CardDAV source that discovers its address books on a CardDAV server
pub struct Client {
    resource: Resource,
    http: reqwest::Client,
    retry: RetryOptions,

    principal: Mutex<Option<Resource>>,
    home_set: Mutex<Option<Resource>>,
    address_books: Mutex<Option<Vec<RemoteAddressBook>>>,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new<S: AsRef<str>, T: ToString, U: ToString>(url: S, username: T, password: U) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let url = Url::parse(url.as_ref())?;

        Ok(Self {
            resource: Resource::new(url, username.to_string(), password.to_string()),
            http: reqwest::Client::new(),
            retry: RetryOptions::default(),
            principal: Mutex::new(None),
            home_set: Mutex::new(None),
            address_books: Mutex::new(None),
        })
    }

    /// Create a client for an already configured connection
    pub fn from_connection(connection: &Connection) -> Self {
        Self {
            resource: Resource::new(connection.server_url.clone(),
                                    connection.username.clone(),
                                    connection.password.clone()),
            http: reqwest::Client::new(),
            retry: RetryOptions::default(),
            principal: Mutex::new(None),
            home_set: Mutex::new(None),
            address_books: Mutex::new(None),
        }
    }

    /// Use custom retry settings for every request this client (and the address
    /// books it discovers) makes
    pub fn with_retry_options(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Return the principal resource, or fetch it from the server if not known yet
    async fn get_principal(&self) -> Result<Resource, RemoteError> {
        if let Some(principal) = &*self.principal.lock().unwrap() {
            return Ok(principal.clone());
        }

        let href = with_retry(&self.retry, || {
            sub_request_and_extract_elem(&self.http, &self.resource, DAVCLIENT_BODY.to_string(),
                                         &["current-user-principal", "href"])
        }).await?;
        let principal = self.resource.with_url(self.resource.resolve_href(&href)?);
        log::debug!("Principal URL is {}", href);

        *self.principal.lock().unwrap() = Some(principal.clone());
        Ok(principal)
    }

    /// Return the addressbook home set resource, or fetch it from the server if not known yet
    async fn get_home_set(&self) -> Result<Resource, RemoteError> {
        if let Some(home_set) = &*self.home_set.lock().unwrap() {
            return Ok(home_set.clone());
        }
        let principal = self.get_principal().await?;

        let href = with_retry(&self.retry, || {
            sub_request_and_extract_elem(&self.http, &principal, HOMESET_BODY.to_string(),
                                         &["addressbook-home-set", "href"])
        }).await?;
        let home_set = self.resource.with_url(self.resource.resolve_href(&href)?);
        log::debug!("Addressbook home set URL is {:?}", home_set.url().path());

        *self.home_set.lock().unwrap() = Some(home_set.clone());
        Ok(home_set)
    }
}

#[async_trait]
impl CardDavSource for Client {
    type AddressBook = RemoteAddressBook;

    /// Return the list of address books, or fetch it from the server if not known yet
    async fn discover_address_books(&self) -> Result<Vec<RemoteAddressBook>, RemoteError> {
        if let Some(books) = &*self.address_books.lock().unwrap() {
            return Ok(books.clone());
        }
        let home_set = self.get_home_set().await?;

        let text = with_retry(&self.retry, || {
            sub_request(&self.http, &home_set, "PROPFIND", BOOKS_BODY.to_string(), 1)
        }).await?;

        let root: Element = text.parse()?;
        let books: Vec<RemoteAddressBook> = parse_address_book_listing(&self.resource, &root, &self.http)
            .into_iter()
            .map(|book| book.with_retry_options(self.retry.clone()))
            .collect();

        *self.address_books.lock().unwrap() = Some(books.clone());
        Ok(books)
    }
}

/// Extract the address book collections from a PROPFIND multistatus answer.
///
/// The home set lists itself and possibly other plain collections; anything
/// whose `resourcetype` is not an addressbook is skipped.
fn parse_address_book_listing(base: &Resource, root: &Element, http: &reqwest::Client) -> Vec<RemoteAddressBook> {
    let mut books = Vec::new();
    for response in find_elems(root, "response") {
        let display_name = find_elem(response, "displayname")
            .map(|elem| elem.text())
            .unwrap_or("<no name>".to_string());
        log::debug!("Considering address book {}", display_name);

        // We filter out non-addressbook resources
        let resource_types = match find_elem(response, "resourcetype") {
            None => continue,
            Some(rt) => rt,
        };
        let mut found_addressbook_type = false;
        for resource_type in resource_types.children() {
            if resource_type.name() == "addressbook" {
                found_addressbook_type = true;
                break;
            }
        }
        if found_addressbook_type == false {
            continue;
        }

        let href = match find_elem(response, "href") {
            None => {
                log::warn!("Address book {} has no URL! Ignoring it.", display_name);
                continue;
            },
            Some(elem) => elem.text(),
        };
        let url = match base.resolve_href(&href) {
            Err(err) => {
                log::warn!("Address book {} has an invalid URL ({})! Ignoring it.", display_name, err);
                continue;
            },
            Ok(url) => url,
        };

        // Servers do not have to advertise their vCard versions
        let supported_versions = match find_elem(response, "supported-address-data") {
            None => SupportedVcardVersions::default(),
            Some(elem) => match SupportedVcardVersions::try_from(elem.clone()) {
                Err(err) => {
                    log::warn!("Address book {} advertises unusable address data ({}), assuming the default", display_name, err);
                    SupportedVcardVersions::default()
                },
                Ok(versions) if versions.is_empty() => SupportedVcardVersions::default(),
                Ok(versions) => versions,
            },
        };

        let book = RemoteAddressBook::new(display_name, base.with_url(url), supported_versions, http.clone());
        log::info!("Found address book {}", book.name());
        books.push(book);
    }
    books
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcard::VcardVersion;

    const BOOKS_MULTISTATUS: &str = r#"
        <d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
            <d:response>
                <d:href>/addressbooks/jo/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:resourcetype><d:collection/></d:resourcetype>
                        <d:displayname>Home collection</d:displayname>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/addressbooks/jo/contacts/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:resourcetype><d:collection/><card:addressbook/></d:resourcetype>
                        <d:displayname>Contacts</d:displayname>
                        <card:supported-address-data>
                            <card:address-data-type content-type="text/vcard" version="3.0"/>
                            <card:address-data-type content-type="text/vcard" version="4.0"/>
                        </card:supported-address-data>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/addressbooks/jo/spartan/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:resourcetype><d:collection/><card:addressbook/></d:resourcetype>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>
    "#;

    fn base() -> Resource {
        let url = Url::parse("https://dav.example.com/").unwrap();
        Resource::new(url, "jo".to_string(), "secret".to_string())
    }

    #[test]
    fn only_addressbook_collections_are_kept() {
        let root: Element = BOOKS_MULTISTATUS.parse().unwrap();
        let books = parse_address_book_listing(&base(), &root, &reqwest::Client::new());

        assert_eq!(books.len(), 2);
        assert_eq!(books[0].name(), "Contacts");
        assert_eq!(books[0].url().as_str(), "https://dav.example.com/addressbooks/jo/contacts/");
        assert_eq!(books[0].supported_versions().preferred(), VcardVersion::V3);
    }

    #[test]
    fn missing_names_and_versions_get_defaults() {
        let root: Element = BOOKS_MULTISTATUS.parse().unwrap();
        let books = parse_address_book_listing(&base(), &root, &reqwest::Client::new());

        assert_eq!(books[1].name(), "<no name>");
        assert_eq!(books[1].supported_versions(), SupportedVcardVersions::default());
    }

    #[test]
    fn absolute_hrefs_pass_through_unchanged() {
        let xml = r#"
            <d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
                <d:response>
                    <d:href>https://shard7.example.com/jo/contacts/</d:href>
                    <d:propstat>
                        <d:prop>
                            <d:resourcetype><card:addressbook/></d:resourcetype>
                            <d:displayname>Contacts</d:displayname>
                        </d:prop>
                        <d:status>HTTP/1.1 200 OK</d:status>
                    </d:propstat>
                </d:response>
            </d:multistatus>
        "#;
        let root: Element = xml.parse().unwrap();
        let books = parse_address_book_listing(&base(), &root, &reqwest::Client::new());

        assert_eq!(books.len(), 1);
        assert_eq!(books[0].url().as_str(), "https://shard7.example.com/jo/contacts/");
    }
}
