pub mod remote_addressbook;
pub mod mock_addressbook;

use std::convert::TryFrom;
use std::error::Error;

use serde::{Deserialize, Serialize};
use url::Url;

use bitflags::bitflags;

use crate::mapping::VersionTag;
use crate::vcard::VcardVersion;

bitflags! {
    #[derive(Serialize, Deserialize)]
    pub struct SupportedVcardVersions: u8 {
        /// vCard 3.0 (RFC 2426)
        const V3 = 1;
        /// vCard 4.0 (RFC 6350)
        const V4 = 2;
    }
}

impl SupportedVcardVersions {
    /// The version to encode with for such a collection: 3.0 for maximum
    /// compatibility, unless the server only takes 4.0
    pub fn preferred(self) -> VcardVersion {
        if self.contains(Self::V4) && !self.contains(Self::V3) {
            VcardVersion::V4
        } else {
            VcardVersion::V3
        }
    }
}

impl Default for SupportedVcardVersions {
    /// What to assume when the server does not advertise anything
    fn default() -> Self {
        Self::V3 | Self::V4
    }
}

impl TryFrom<minidom::Element> for SupportedVcardVersions {
    type Error = Box<dyn Error + Send + Sync>;

    /// Create an instance from an XML <supported-address-data> element
    fn try_from(element: minidom::Element) -> Result<Self, Self::Error> {
        if element.name() != "supported-address-data" {
            return Err("Element must be a <supported-address-data>".into());
        }

        let mut flags = Self::empty();
        for child in element.children() {
            match child.attr("version") {
                None => continue,
                Some("3.0") => flags.insert(Self::V3),
                Some("4.0") => flags.insert(Self::V4),
                Some(other) => {
                    log::warn!("Unimplemented vCard version: {:?}. Ignoring it", other);
                    continue;
                }
            };
        }

        Ok(flags)
    }
}

pub type AddressBookId = url::Url;

/// One entry of an address book listing: the resource URL, its current ETag,
/// and the vCard text itself
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteVcard {
    pub url: Url,
    pub etag: VersionTag,
    pub data: String,
}

/// What a PUT (create or update) reports back.
///
/// `etag` can legitimately be `None`: some servers rewrite what they are given
/// and answer without an ETag. The sync engine reconciles on the next pull.
#[derive(Clone, Debug, PartialEq)]
pub struct PutOutcome {
    /// The resource URL. Usually the requested one, but servers may move it
    pub url: Url,
    pub etag: Option<VersionTag>,
}
