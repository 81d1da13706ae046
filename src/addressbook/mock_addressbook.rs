//! Mock address books, so that tests do not require a real CardDAV server

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::addressbook::{PutOutcome, RemoteVcard, SupportedVcardVersions};
use crate::error::RemoteError;
use crate::mapping::VersionTag;
use crate::mock_behaviour::MockBehaviour;
use crate::traits::{CardDavSource, DavAddressBook};

/// An in-memory address book that behaves like a CardDAV collection:
/// it mints ETags, honours `If-None-Match`/`If-Match` semantics, and can
/// imitate the less pleasant servers.
///
/// Clones share their state, so a test can keep a handle on the same
/// collection the engine is talking to.
#[derive(Clone)]
pub struct MockAddressBook {
    name: String,
    url: Url,
    supported_versions: SupportedVcardVersions,
    state: Arc<Mutex<MockState>>,
    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

#[derive(Default)]
struct MockState {
    cards: HashMap<Url, (VersionTag, String)>,
    rewrite_creates: bool,
    on_create: Option<Box<dyn FnMut() + Send>>,
}

impl MockAddressBook {
    pub fn new(name: String, url: Url) -> Self {
        Self {
            name,
            url,
            supported_versions: SupportedVcardVersions::default(),
            state: Arc::new(Mutex::new(MockState::default())),
            mock_behaviour: None,
        }
    }

    pub fn with_supported_versions(mut self, versions: SupportedVcardVersions) -> Self {
        self.supported_versions = versions;
        self
    }

    pub fn with_mock_behaviour(mut self, behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        self.mock_behaviour = Some(behaviour);
        self
    }

    /// Behave like servers that rename what they are given: the card lands at
    /// a server-chosen URL with a rewritten UID, while the reported outcome
    /// still points at the requested URL and carries no ETag
    pub fn rewriting_creates(self) -> Self {
        self.state.lock().unwrap().rewrite_creates = true;
        self
    }

    /// Run `hook` once, in the middle of the next `create_vcard`
    pub fn on_create(&self, hook: Box<dyn FnMut() + Send>) {
        self.state.lock().unwrap().on_create = Some(hook);
    }

    /// Server-side PUT, as if another device had stored this card
    pub fn put_card(&self, filename: &str, content: &str) -> (Url, VersionTag) {
        let url = self.file_url(filename);
        let etag = VersionTag::random();
        self.state.lock().unwrap().cards.insert(url.clone(), (etag.clone(), content.to_string()));
        (url, etag)
    }

    /// Server-side edit of an existing card
    pub fn overwrite_card(&self, url: &Url, content: &str) -> VersionTag {
        let etag = VersionTag::random();
        self.state.lock().unwrap().cards.insert(url.clone(), (etag.clone(), content.to_string()));
        etag
    }

    /// New ETag, same content (servers do that, e.g. after an export/import)
    pub fn bump_etag(&self, url: &Url) -> Option<VersionTag> {
        let mut state = self.state.lock().unwrap();
        let card = state.cards.get_mut(url)?;
        card.0 = VersionTag::random();
        Some(card.0.clone())
    }

    /// Server-side DELETE
    pub fn remove_card(&self, url: &Url) -> bool {
        self.state.lock().unwrap().cards.remove(url).is_some()
    }

    pub fn card_count(&self) -> usize {
        self.state.lock().unwrap().cards.len()
    }

    pub fn card_content(&self, url: &Url) -> Option<String> {
        self.state.lock().unwrap().cards.get(url).map(|card| card.1.clone())
    }

    pub fn card_etag(&self, url: &Url) -> Option<VersionTag> {
        self.state.lock().unwrap().cards.get(url).map(|card| card.0.clone())
    }

    /// Every URL currently stored, in a stable order
    pub fn card_urls(&self) -> Vec<Url> {
        let mut urls: Vec<Url> = self.state.lock().unwrap().cards.keys().cloned().collect();
        urls.sort();
        urls
    }

    fn file_url(&self, filename: &str) -> Url {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .expect("mock address book URLs can always be a base")
            .pop_if_empty()
            .push(filename);
        url
    }
}

#[async_trait]
impl DavAddressBook for MockAddressBook {
    fn url(&self) -> &Url { &self.url }
    fn name(&self) -> &str { &self.name }
    fn supported_versions(&self) -> SupportedVcardVersions {
        self.supported_versions
    }

    async fn list_vcards(&self) -> Result<Vec<RemoteVcard>, RemoteError> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_list_vcards()?;
        }

        let state = self.state.lock().unwrap();
        let mut vcards: Vec<RemoteVcard> = state.cards.iter()
            .map(|(url, (etag, data))| RemoteVcard {
                url: url.clone(),
                etag: etag.clone(),
                data: data.clone(),
            })
            .collect();
        vcards.sort_by(|left, right| left.url.cmp(&right.url));
        Ok(vcards)
    }

    async fn create_vcard(&self, filename: &str, content: &str) -> Result<PutOutcome, RemoteError> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_create_vcard()?;
        }

        let requested = self.file_url(filename);
        let mut state = self.state.lock().unwrap();
        if state.cards.contains_key(&requested) {
            return Err(RemoteError::Http { status: StatusCode::PRECONDITION_FAILED, url: requested });
        }

        let etag = VersionTag::random();
        let outcome = if state.rewrite_creates {
            let server_uid = uuid::Uuid::new_v4().to_hyphenated().to_string();
            let actual = self.file_url(&format!("{}.vcf", server_uid));
            state.cards.insert(actual, (etag, rewrite_uid(content, &server_uid)));
            PutOutcome { url: requested, etag: None }
        } else {
            state.cards.insert(requested.clone(), (etag.clone(), content.to_string()));
            PutOutcome { url: requested, etag: Some(etag) }
        };

        if let Some(mut hook) = state.on_create.take() {
            drop(state);
            hook();
        }

        Ok(outcome)
    }

    async fn update_vcard(&self, url: &Url, etag: Option<&VersionTag>, content: &str) -> Result<PutOutcome, RemoteError> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_update_vcard()?;
        }

        let mut state = self.state.lock().unwrap();
        let current = match state.cards.get_mut(url) {
            None => return Err(RemoteError::Http { status: StatusCode::NOT_FOUND, url: url.clone() }),
            Some(current) => current,
        };
        if let Some(expected) = etag {
            if &current.0 != expected {
                return Err(RemoteError::Http { status: StatusCode::PRECONDITION_FAILED, url: url.clone() });
            }
        }

        let new_etag = VersionTag::random();
        *current = (new_etag.clone(), content.to_string());
        Ok(PutOutcome { url: url.clone(), etag: Some(new_etag) })
    }

    async fn delete_vcard(&self, url: &Url) -> Result<(), RemoteError> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_delete_vcard()?;
        }

        match self.state.lock().unwrap().cards.remove(url) {
            None => Err(RemoteError::Http { status: StatusCode::NOT_FOUND, url: url.clone() }),
            Some(_) => Ok(()),
        }
    }
}

/// Replace the UID line of a vCard, like servers that assign their own UIDs do
fn rewrite_uid(content: &str, new_uid: &str) -> String {
    let mut lines: Vec<String> = content.lines()
        .map(|line| {
            if line.starts_with("UID:") {
                format!("UID:{}", new_uid)
            } else {
                line.to_string()
            }
        })
        .collect();
    lines.push(String::new());
    lines.join("\r\n")
}


/// A [`CardDavSource`] serving in-memory address books
#[derive(Clone)]
pub struct MockSource {
    address_books: Vec<MockAddressBook>,
    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

impl MockSource {
    pub fn new(address_books: Vec<MockAddressBook>) -> Self {
        Self { address_books, mock_behaviour: None }
    }

    /// Apply `behaviour` to this source and to every address book it serves
    pub fn with_mock_behaviour(mut self, behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        self.address_books = self.address_books.into_iter()
            .map(|book| book.with_mock_behaviour(behaviour.clone()))
            .collect();
        self.mock_behaviour = Some(behaviour);
        self
    }
}

#[async_trait]
impl CardDavSource for MockSource {
    type AddressBook = MockAddressBook;

    async fn discover_address_books(&self) -> Result<Vec<MockAddressBook>, RemoteError> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_discover_address_books()?;
        }
        Ok(self.address_books.clone())
    }
}
