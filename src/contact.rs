//! This module implements the contact model that vCards are decoded into and encoded from

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The store-assigned identifier of a contact
pub type ContactId = i64;

/// A contact, as the local store sees it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// The local id, that will never change
    pub id: ContactId,
    /// The vCard UID. This is the key remote servers know this contact by
    pub uid: String,
    /// Set when the contact has been soft-deleted locally
    pub deleted_at: Option<DateTime<Utc>>,
    pub fields: ContactFields,
}

impl Contact {
    pub fn new(id: ContactId, uid: String, fields: ContactFields) -> Self {
        Self { id, uid, deleted_at: None, fields }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// The content payload of a contact.
///
/// This is what the vCard codec produces and consumes, what conflict snapshots
/// capture, and what the content hash is computed over. Child ids are assigned
/// by the store and stay `None` on freshly decoded payloads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactFields {
    pub prefix: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    /// Second surname, common in e.g. Spanish-speaking countries. vCard has no
    /// standard slot for it, so it travels as an X- property.
    pub second_last_name: Option<String>,
    pub suffix: Option<String>,
    pub nickname: Option<String>,
    pub organization: Option<String>,
    pub notes: Option<String>,
    pub gender: Option<Gender>,
    /// Either an opaque reference into the photo store, or a `data:` URI
    pub photo: Option<String>,
    /// Lead time, in days, for birthday/anniversary reminders about this contact
    pub reminder_days: Option<u32>,

    pub phones: Vec<Phone>,
    pub emails: Vec<Email>,
    pub addresses: Vec<Address>,
    pub urls: Vec<Website>,
    pub im_handles: Vec<ImHandle>,
    pub geo_locations: Vec<GeoLocation>,
    pub dates: Vec<ImportantDate>,
    pub custom_fields: Vec<CustomField>,
    /// Names of the contact groups this contact belongs to
    pub groups: Vec<String>,
    pub relations: Vec<Relation>,
}

impl ContactFields {
    /// The name to display (and to use as the vCard FN), built from the name
    /// parts, falling back to the nickname
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [
            self.prefix.as_deref(),
            self.first_name.as_deref(),
            self.middle_name.as_deref(),
            self.last_name.as_deref(),
            self.second_last_name.as_deref(),
            self.suffix.as_deref(),
        ]
        .iter()
        .filter_map(|p| *p)
        .filter(|p| !p.trim().is_empty())
        .collect();

        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
        self.nickname.clone().filter(|n| !n.trim().is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
    NotApplicable,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phone {
    pub id: Option<i64>,
    pub number: String,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Email {
    pub id: Option<i64>,
    pub address: String,
    pub label: Option<String>,
}

/// A postal address, one field per vCard ADR component
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub id: Option<i64>,
    pub po_box: Option<String>,
    pub extended: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Website {
    pub id: Option<i64>,
    pub url: String,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImHandle {
    pub id: Option<i64>,
    /// The messaging service, e.g. `skype` or `xmpp`
    pub protocol: String,
    pub handle: String,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoLocation {
    pub id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub label: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateKind {
    Birthday,
    Anniversary,
    Custom,
}

/// A date attached to a contact (birthday, anniversary, or anything labelled).
///
/// Dates whose year is unknown use [`crate::vcard::UNKNOWN_YEAR`] as a sentinel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportantDate {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub kind: DateKind,
    pub label: Option<String>,
}

/// A free-form key/value the user attached to a contact. Also the bucket
/// unrecognized X- properties of incoming vCards land in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomField {
    pub id: Option<i64>,
    pub key: String,
    pub value: String,
}

/// A directed relationship edge towards another contact, by vCard UID
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relation {
    pub id: Option<i64>,
    /// The kind of relationship, e.g. `spouse`, `child`, `colleague`
    pub kind: String,
    pub related_uid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_joins_the_name_parts() {
        let mut fields = ContactFields::default();
        fields.first_name = Some("Ana".to_string());
        fields.last_name = Some("García".to_string());
        fields.second_last_name = Some("López".to_string());
        assert_eq!(fields.display_name().as_deref(), Some("Ana García López"));
    }

    #[test]
    fn display_name_falls_back_to_the_nickname() {
        let mut fields = ContactFields::default();
        fields.nickname = Some("Nacho".to_string());
        assert_eq!(fields.display_name().as_deref(), Some("Nacho"));

        assert_eq!(ContactFields::default().display_name(), None);
    }
}
