//! A module to build vCard files

use chrono::Datelike;
use itertools::Itertools;

use crate::contact::{ContactFields, DateKind, Gender};
use super::{
    default_prod_id, VcardVersion, UNKNOWN_YEAR, XPROP_RELATION, XPROP_REMINDER,
    XPROP_SECOND_SURNAME,
};

/// Maximum length of a physical line, in octets, line break excluded
const FOLD_WIDTH: usize = 75;

/// Labels with a standard TYPE value. Anything else travels as an Apple item group
const STANDARD_TYPES: [&str; 7] = ["home", "work", "cell", "main", "fax", "pager", "other"];

/// Create a vCard file from contact fields.
///
/// `uid` should be the stable UID of the contact; a random one is generated if
/// it is empty. `photo` is the photo content resolved to a URI (`data:` or
/// remote), since the fields themselves may only hold an opaque reference.
pub fn build(uid: &str, fields: &ContactFields, version: VcardVersion, photo: Option<&str>) -> String {
    let mut card = CardBuilder::new(version);

    card.push("BEGIN:VCARD".to_string());
    card.push(format!("VERSION:{}", version.as_str()));
    card.push(format!("PRODID:{}", default_prod_id()));

    let uid = if uid.trim().is_empty() {
        uuid::Uuid::new_v4().to_hyphenated().to_string()
    } else {
        uid.to_string()
    };
    card.push(format!("UID:{}", uid));

    let full_name = fields
        .display_name()
        .unwrap_or_else(|| "Unknown".to_string());
    card.push(format!("FN:{}", escape_text(&full_name)));
    card.push(format!(
        "N:{};{};{};{};{}",
        escape_text(fields.last_name.as_deref().unwrap_or("")),
        escape_text(fields.first_name.as_deref().unwrap_or("")),
        escape_text(fields.middle_name.as_deref().unwrap_or("")),
        escape_text(fields.prefix.as_deref().unwrap_or("")),
        escape_text(fields.suffix.as_deref().unwrap_or("")),
    ));

    if let Some(nickname) = &fields.nickname {
        card.push(format!("NICKNAME:{}", escape_text(nickname)));
    }
    if let Some(organization) = &fields.organization {
        card.push(format!("ORG:{}", escape_text(organization)));
    }
    if let Some(gender) = fields.gender {
        let letter = match gender {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Other => "O",
            Gender::NotApplicable => "N",
            Gender::Unknown => "U",
        };
        card.push(format!("GENDER:{}", letter));
    }

    for phone in &fields.phones {
        card.push_labelled("TEL", &phone.number, phone.label.as_deref());
    }
    for email in &fields.emails {
        card.push_labelled("EMAIL", &email.address, email.label.as_deref());
    }
    for address in &fields.addresses {
        let value = format!(
            "{};{};{};{};{};{};{}",
            escape_text(address.po_box.as_deref().unwrap_or("")),
            escape_text(address.extended.as_deref().unwrap_or("")),
            escape_text(address.street.as_deref().unwrap_or("")),
            escape_text(address.city.as_deref().unwrap_or("")),
            escape_text(address.region.as_deref().unwrap_or("")),
            escape_text(address.postal_code.as_deref().unwrap_or("")),
            escape_text(address.country.as_deref().unwrap_or("")),
        );
        card.push_labelled("ADR", &value, address.label.as_deref());
    }
    for website in &fields.urls {
        card.push_labelled("URL", &website.url, website.label.as_deref());
    }
    for im in &fields.im_handles {
        let value = format!("{}:{}", im.protocol.to_ascii_lowercase(), im.handle);
        card.push_labelled("IMPP", &value, im.label.as_deref());
    }
    for geo in &fields.geo_locations {
        let value = match version {
            VcardVersion::V4 => format!("geo:{},{}", geo.latitude, geo.longitude),
            VcardVersion::V3 => format!("{};{}", geo.latitude, geo.longitude),
        };
        card.push_labelled("GEO", &value, geo.label.as_deref());
    }

    let mut bday_done = false;
    let mut anniversary_done = false;
    for date in &fields.dates {
        let value = format_date(&date.date, version);
        match date.kind {
            DateKind::Birthday if !bday_done => {
                card.push(format!("BDAY:{}", value));
                bday_done = true;
            }
            DateKind::Anniversary if !anniversary_done => {
                let name = match version {
                    VcardVersion::V4 => "ANNIVERSARY",
                    // vCard 3.0 has no ANNIVERSARY property
                    VcardVersion::V3 => "X-ANNIVERSARY",
                };
                card.push(format!("{}:{}", name, value));
                anniversary_done = true;
            }
            _ => card.push_item_group("X-ABDATE", &value, date.label.as_deref()),
        }
    }

    if !fields.groups.is_empty() {
        let value = fields.groups.iter().map(|g| escape_text(g)).join(",");
        card.push(format!("CATEGORIES:{}", value));
    }

    for relation in &fields.relations {
        let kind = card.type_param(&relation.kind);
        if version == VcardVersion::V4 {
            card.push(format!("RELATED{}:urn:uuid:{}", kind, relation.related_uid));
        }
        card.push(format!("{}{}:{}", XPROP_RELATION, kind, relation.related_uid));
    }

    if let Some(photo) = photo {
        card.push_photo(photo);
    }
    if let Some(second_surname) = &fields.second_last_name {
        card.push(format!("{}:{}", XPROP_SECOND_SURNAME, escape_text(second_surname)));
    }
    if let Some(days) = fields.reminder_days {
        card.push(format!("{}:{}", XPROP_REMINDER, days));
    }
    for custom in &fields.custom_fields {
        if let Some(key) = xprop_key(&custom.key) {
            card.push(format!("{}:{}", key, escape_text(&custom.value)));
        }
    }
    if let Some(notes) = &fields.notes {
        card.push(format!("NOTE:{}", escape_text(notes)));
    }

    card.push("END:VCARD".to_string());
    card.finish()
}

struct CardBuilder {
    version: VcardVersion,
    lines: Vec<String>,
    next_item: u32,
}

impl CardBuilder {
    fn new(version: VcardVersion) -> Self {
        Self { version, lines: Vec::new(), next_item: 0 }
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Emit `name:value`, placing the label either as a TYPE parameter (for
    /// standard labels) or as an Apple item group (for free-form ones)
    fn push_labelled(&mut self, name: &str, value: &str, label: Option<&str>) {
        match label {
            None => self.push(format!("{}:{}", name, value)),
            Some(label) if STANDARD_TYPES.contains(&label.to_ascii_lowercase().as_str()) => {
                let type_param = self.type_param(label);
                self.push(format!("{}{}:{}", name, type_param, value));
            }
            Some(label) => self.push_item_group(name, value, Some(label)),
        }
    }

    fn push_item_group(&mut self, name: &str, value: &str, label: Option<&str>) {
        self.next_item += 1;
        let item = self.next_item;
        self.push(format!("item{}.{}:{}", item, name, value));
        if let Some(label) = label {
            self.push(format!("item{}.X-ABLabel:_$!<{}>!$_", item, escape_text(label)));
        }
    }

    /// `;TYPE=...` in the convention of the target version: uppercase unquoted
    /// for 3.0, lowercase (quoted when needed) for 4.0
    fn type_param(&self, value: &str) -> String {
        match self.version {
            VcardVersion::V3 => format!(";TYPE={}", value.to_ascii_uppercase()),
            VcardVersion::V4 => {
                let value = value.to_ascii_lowercase();
                if value.contains(',') || value.contains(';') || value.contains(':') {
                    format!(";TYPE=\"{}\"", value)
                } else {
                    format!(";TYPE={}", value)
                }
            }
        }
    }

    fn push_photo(&mut self, photo: &str) {
        match self.version {
            VcardVersion::V4 => self.push(format!("PHOTO:{}", photo)),
            VcardVersion::V3 => match split_data_uri(photo) {
                Some((mime, payload)) => {
                    self.push(format!("PHOTO;ENCODING=b;TYPE={}:{}", mime.to_ascii_uppercase(), payload));
                }
                None => self.push(format!("PHOTO;VALUE=uri:{}", photo)),
            },
        }
    }

    fn finish(self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            fold_line(line, &mut out);
        }
        out
    }
}

/// `data:image/jpeg;base64,...` → `("jpeg", "...")`
fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:image/")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    Some((mime, payload))
}

/// Apply the text-value escaping of RFC 6350 §3.4
fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// `favorite color` → `X-FAVORITE-COLOR`: the property name of a custom field.
/// Blank keys have no usable name and yield `None`
fn xprop_key(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let key = key.to_ascii_uppercase().replace(' ', "-");
    if key.starts_with("X-") {
        Some(key)
    } else {
        Some(format!("X-{}", key))
    }
}

fn format_date(date: &chrono::NaiveDate, version: VcardVersion) -> String {
    if date.year() == UNKNOWN_YEAR {
        match version {
            VcardVersion::V4 => format!("--{:02}-{:02}", date.month(), date.day()),
            VcardVersion::V3 => format!("--{:02}{:02}", date.month(), date.day()),
        }
    } else {
        match version {
            VcardVersion::V4 => date.format("%Y-%m-%d").to_string(),
            VcardVersion::V3 => date.format("%Y%m%d").to_string(),
        }
    }
}

/// Fold one logical line to physical lines of at most [`FOLD_WIDTH`] octets,
/// splitting only at character boundaries, and append them (CRLF-terminated)
/// to `out`
fn fold_line(line: &str, out: &mut String) {
    let mut pos = 0;
    let mut first = true;
    loop {
        let width = if first { FOLD_WIDTH } else { FOLD_WIDTH - 1 };
        let remaining = line.len() - pos;
        if !first {
            out.push(' ');
        }
        if remaining <= width {
            out.push_str(&line[pos..]);
            out.push_str("\r\n");
            return;
        }
        let mut end = pos + width;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        out.push_str(&line[pos..end]);
        out.push_str("\r\n");
        pos = end;
        first = false;
    }
}
