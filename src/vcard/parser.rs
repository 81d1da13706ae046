//! A module to parse vCard files
//!
//! Parsing is deliberately lenient: unparseable lines are skipped with a
//! warning, never failing the whole card. Real-world exporters (phones,
//! webmail, CardDAV servers) disagree on almost every detail.

use std::collections::HashMap;

use itertools::Itertools;

use crate::contact::{
    Address, ContactFields, CustomField, DateKind, Email, Gender, GeoLocation, ImHandle,
    ImportantDate, Phone, Relation, Website,
};
use super::{VcardVersion, UNKNOWN_YEAR, XPROP_RELATION, XPROP_REMINDER, XPROP_SECOND_SURNAME};

/// What [`parse`] extracts from a vCard
#[derive(Clone, Debug)]
pub struct ParsedVcard {
    /// `None` when the card carries no UID. Such a card cannot be mapped
    pub uid: Option<String>,
    pub version: VcardVersion,
    /// The FN property, verbatim
    pub full_name: Option<String>,
    pub fields: ContactFields,
}

impl ParsedVcard {
    /// Best-effort name for lists and logs
    pub fn display_name(&self) -> String {
        if let Some(full_name) = &self.full_name {
            if !full_name.trim().is_empty() {
                return full_name.clone();
            }
        }
        if let Some(name) = self.fields.display_name() {
            return name;
        }
        match &self.uid {
            Some(uid) => uid.clone(),
            None => "Unknown".to_string(),
        }
    }
}

/// Parse vCard text into the internal representation.
///
/// This never fails: whatever could be understood ends up in the result. A
/// resource holding several vCards yields the first one.
pub fn parse(content: &str) -> ParsedVcard {
    let unfolded = unfold(content);

    let mut lines = Vec::new();
    let mut in_card = false;
    for raw_line in unfolded.lines() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let line = match parse_content_line(raw_line) {
            Some(line) => line,
            None => {
                log::warn!("Skipping unparseable vCard line {:?}", raw_line);
                continue;
            }
        };
        match line.name.as_str() {
            "BEGIN" => {
                if in_card {
                    log::warn!("Multiple vCards in a single resource, keeping the first one");
                    break;
                }
                in_card = true;
            }
            "END" => {
                if in_card {
                    break;
                }
            }
            _ => lines.push(line),
        }
    }

    let version = lines
        .iter()
        .find(|line| line.name == "VERSION")
        .map(|line| match line.value.trim() {
            "4.0" => VcardVersion::V4,
            _ => VcardVersion::V3,
        })
        .unwrap_or(VcardVersion::V3);

    // Apple exporters attach labels to sibling properties through groups:
    //   item1.TEL:+33612345678
    //   item1.X-ABLABEL:_$!<Main>!$_
    let mut group_labels: HashMap<String, String> = HashMap::new();
    for line in &lines {
        if line.name == "X-ABLABEL" {
            if let Some(group) = &line.group {
                group_labels.insert(group.clone(), unwrap_apple_label(&line.value).to_string());
            }
        }
    }

    let mut parsed = ParsedVcard {
        uid: None,
        version,
        full_name: None,
        fields: ContactFields::default(),
    };
    let mut unknown_lines: Vec<String> = Vec::new();
    let mut notes: Vec<String> = Vec::new();

    for line in &lines {
        let label = label_for(line, &group_labels);
        let fields = &mut parsed.fields;
        match line.name.as_str() {
            "VERSION" | "X-ABLABEL" => { /* already consumed */ }
            // regenerated on every export, keeping them would only create noise
            "PRODID" | "REV" | "X-ABADR" | "X-ABUID" => {}
            "UID" => parsed.uid = non_empty(line.value.trim().to_string()),
            "FN" => parsed.full_name = non_empty(unescape_text(&line.value)),
            "N" => {
                let mut parts = split_escaped(&line.value, ';')
                    .into_iter()
                    .map(|part| non_empty(unescape_text(&part)));
                fields.last_name = parts.next().flatten();
                fields.first_name = parts.next().flatten();
                fields.middle_name = parts.next().flatten();
                fields.prefix = parts.next().flatten();
                fields.suffix = parts.next().flatten();
            }
            "NICKNAME" => {
                fields.nickname = split_escaped(&line.value, ',')
                    .first()
                    .and_then(|first| non_empty(unescape_text(first)));
            }
            "ORG" => {
                fields.organization = split_escaped(&line.value, ';')
                    .first()
                    .and_then(|first| non_empty(unescape_text(first)));
            }
            "NOTE" => {
                if let Some(note) = non_empty(unescape_text(&line.value)) {
                    notes.push(note);
                }
            }
            "GENDER" => {
                fields.gender = split_escaped(&line.value, ';')
                    .first()
                    .and_then(|sex| parse_gender(sex));
            }
            "TEL" => {
                let mut number = unescape_text(&line.value).trim().to_string();
                // `get` rather than a length check: byte 4 may fall inside a
                // multibyte character
                if number.get(..4).map_or(false, |prefix| prefix.eq_ignore_ascii_case("tel:")) {
                    number = number[4..].to_string();
                }
                if let Some(number) = non_empty(number) {
                    fields.phones.push(Phone { id: None, number, label });
                }
            }
            "EMAIL" => {
                if let Some(address) = non_empty(unescape_text(&line.value).trim().to_string()) {
                    fields.emails.push(Email { id: None, address, label });
                }
            }
            "ADR" => {
                let mut parts = split_escaped(&line.value, ';')
                    .into_iter()
                    .map(|part| non_empty(unescape_text(&part)));
                let address = Address {
                    id: None,
                    po_box: parts.next().flatten(),
                    extended: parts.next().flatten(),
                    street: parts.next().flatten(),
                    city: parts.next().flatten(),
                    region: parts.next().flatten(),
                    postal_code: parts.next().flatten(),
                    country: parts.next().flatten(),
                    label,
                };
                let has_content = [
                    &address.po_box, &address.extended, &address.street, &address.city,
                    &address.region, &address.postal_code, &address.country,
                ]
                .iter()
                .any(|part| part.is_some());
                if has_content {
                    fields.addresses.push(address);
                } else {
                    log::warn!("Skipping an ADR with no content");
                }
            }
            "URL" => {
                if let Some(url) = non_empty(unescape_text(&line.value).trim().to_string()) {
                    fields.urls.push(Website { id: None, url, label });
                }
            }
            "IMPP" => {
                if let Some(handle) = parse_impp(line, label) {
                    fields.im_handles.push(handle);
                }
            }
            "GEO" => match parse_geo(&line.value, label) {
                Some(geo) => fields.geo_locations.push(geo),
                None => log::warn!("Skipping unparseable GEO value {:?}", line.value),
            },
            "BDAY" => push_date(fields, line, DateKind::Birthday, label),
            "ANNIVERSARY" | "X-ANNIVERSARY" => push_date(fields, line, DateKind::Anniversary, label),
            "X-ABDATE" => push_date(fields, line, DateKind::Custom, label),
            "PHOTO" => match parse_photo(line) {
                Some(photo) => fields.photo = Some(photo),
                None => log::warn!("Skipping a PHOTO in an unsupported form"),
            },
            "CATEGORIES" => {
                for group in split_escaped(&line.value, ',') {
                    if let Some(group) = non_empty(unescape_text(&group)) {
                        fields.groups.push(group);
                    }
                }
            }
            "RELATED" | XPROP_RELATION => {
                if let Some(relation) = parse_relation(line) {
                    fields.relations.push(relation);
                }
            }
            XPROP_SECOND_SURNAME => {
                fields.second_last_name = non_empty(unescape_text(&line.value));
            }
            XPROP_REMINDER => match line.value.trim().parse::<u32>() {
                Ok(days) => fields.reminder_days = Some(days),
                Err(_) => log::warn!("Skipping non-numeric reminder value {:?}", line.value),
            },
            name if name.starts_with("X-") => {
                fields.custom_fields.push(CustomField {
                    id: None,
                    key: name.to_string(),
                    value: unescape_text(&line.value),
                });
            }
            name => {
                unknown_lines.push(format!("{}: {}", name, unescape_text(&line.value)));
            }
        }
    }

    if !notes.is_empty() {
        parsed.fields.notes = Some(notes.join("\n"));
    }
    // Whatever we do not model is still kept, in human-readable form, so that
    // importing never silently drops data
    if !unknown_lines.is_empty() {
        let block = format!("Additional vCard properties:\n{}", unknown_lines.join("\n"));
        parsed.fields.notes = Some(match parsed.fields.notes.take() {
            Some(existing) => format!("{}\n\n{}", existing, block),
            None => block,
        });
    }

    // A card with FN but no N still deserves a usable name
    if parsed.fields.last_name.is_none() && parsed.fields.first_name.is_none() {
        if let Some(full_name) = &parsed.full_name {
            let (first, last) = split_full_name(full_name);
            parsed.fields.first_name = first;
            parsed.fields.last_name = last;
        }
    }

    parsed.fields.relations = parsed
        .fields
        .relations
        .drain(..)
        .unique_by(|relation| (relation.kind.clone(), relation.related_uid.clone()))
        .collect();

    parsed
}

/// One logical (unfolded) line of a vCard
#[derive(Clone, Debug, PartialEq)]
struct ContentLine {
    group: Option<String>,
    /// Uppercased property name
    name: String,
    /// Uppercased keys; values unquoted
    params: Vec<(String, Vec<String>)>,
    value: String,
}

/// Remove the line folding: a line break followed by a space or a tab joins
/// two physical lines into one logical line
fn unfold(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            if matches!(chars.peek(), Some(' ') | Some('\t')) {
                chars.next();
            } else {
                out.push('\n');
            }
        } else if c == '\n' {
            if matches!(chars.peek(), Some(' ') | Some('\t')) {
                chars.next();
            } else {
                out.push('\n');
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    let colon = find_unquoted(line, ':')?;
    let head = &line[..colon];
    let value = line[colon + 1..].to_string();

    let mut head_parts = split_unquoted(head, ';').into_iter();
    let name_token = head_parts.next()?;

    let (group, name) = match name_token.split_once('.') {
        Some((group, name)) => (Some(group.to_ascii_uppercase()), name),
        None => (None, name_token),
    };
    if !is_valid_name(name) {
        return None;
    }
    if let Some(group) = &group {
        if !is_valid_name(group) {
            return None;
        }
    }

    let mut params = Vec::new();
    for param in head_parts {
        if param.is_empty() {
            continue;
        }
        match find_unquoted(param, '=') {
            Some(eq) => {
                let key = param[..eq].trim().to_ascii_uppercase();
                let values = split_unquoted(&param[eq + 1..], ',')
                    .into_iter()
                    .map(|v| decode_param_value(unquote(v)))
                    .collect();
                params.push((key, values));
            }
            // vCard 2.1 leftovers write `TEL;HOME:...` instead of `TEL;TYPE=HOME:...`
            None => params.push(("TYPE".to_string(), vec![param.trim().to_string()])),
        }
    }

    Some(ContentLine {
        group,
        name: name.to_ascii_uppercase(),
        params,
        value,
    })
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Position of the first `target` that is not inside a double-quoted section
fn find_unquoted(text: &str, target: char) -> Option<usize> {
    let mut in_quotes = false;
    for (pos, c) in text.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == target && !in_quotes {
            return Some(pos);
        }
    }
    None
}

fn split_unquoted(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (pos, c) in text.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            parts.push(&text[start..pos]);
            start = pos + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// RFC 6868 parameter value escapes
fn decode_param_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\'') => out.push('"'),
                Some('^') => out.push('^'),
                Some(other) => {
                    out.push('^');
                    out.push(other);
                }
                None => out.push('^'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Undo the text-value escaping of RFC 6350 §3.4
pub(super) fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') | Some('N') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on `sep`, honoring backslash escapes. The parts keep their escapes
fn split_escaped(raw: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push('\\');
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `_$!<Home>!$_` → `Home`
fn unwrap_apple_label(raw: &str) -> &str {
    raw.strip_prefix("_$!<")
        .and_then(|s| s.strip_suffix(">!$_"))
        .unwrap_or(raw)
}

/// TYPE values carried by a line, lowercased, whether written as
/// `TYPE=home,voice`, as repeated `TYPE=` parameters, or as the quoted
/// `TYPE="cell,voice"` some producers emit. TYPE values are tokens, so a
/// comma always separates even inside quotes
fn collect_types(line: &ContentLine) -> Vec<String> {
    line.params
        .iter()
        .filter(|(key, _)| key == "TYPE")
        .flat_map(|(_, values)| values.iter())
        .flat_map(|value| value.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

/// TYPE values that qualify how to reach something rather than naming it
const NON_LABEL_TYPES: [&str; 3] = ["pref", "voice", "internet"];

/// The user-facing label of a line: its Apple group label when there is one,
/// else its first meaningful TYPE value
fn label_for(line: &ContentLine, group_labels: &HashMap<String, String>) -> Option<String> {
    if let Some(group) = &line.group {
        if let Some(label) = group_labels.get(group) {
            return Some(label.clone());
        }
    }
    collect_types(line)
        .into_iter()
        .find(|t| !NON_LABEL_TYPES.contains(&t.as_str()))
}

fn parse_gender(sex: &str) -> Option<Gender> {
    match sex.trim().to_ascii_uppercase().as_str() {
        "M" => Some(Gender::Male),
        "F" => Some(Gender::Female),
        "O" => Some(Gender::Other),
        "N" => Some(Gender::NotApplicable),
        "U" => Some(Gender::Unknown),
        _ => None,
    }
}

fn parse_impp(line: &ContentLine, label: Option<String>) -> Option<ImHandle> {
    let value = unescape_text(&line.value);
    let value = value.trim();
    let (scheme, handle) = match value.split_once(':') {
        Some((scheme, handle)) => (Some(scheme), handle),
        None => (None, value),
    };
    let service_type = line
        .params
        .iter()
        .find(|(key, _)| key == "X-SERVICE-TYPE")
        .and_then(|(_, values)| values.first())
        .map(|v| v.to_ascii_lowercase());

    let protocol = service_type
        .or_else(|| scheme.map(|s| s.to_ascii_lowercase()))
        .unwrap_or_else(|| "im".to_string());
    let handle = non_empty(handle.to_string())?;
    Some(ImHandle { id: None, protocol, handle, label })
}

fn parse_geo(raw: &str, label: Option<String>) -> Option<GeoLocation> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("geo:").unwrap_or(raw);
    let mut coords = if raw.contains(';') { raw.split(';') } else { raw.split(',') };
    let latitude: f64 = coords.next()?.trim().parse().ok()?;
    let longitude: f64 = coords.next()?.trim().parse().ok()?;
    Some(GeoLocation { id: None, latitude, longitude, label })
}

fn push_date(fields: &mut ContactFields, line: &ContentLine, kind: DateKind, label: Option<String>) {
    match parse_vcard_date(&line.value) {
        Some(date) => fields.dates.push(ImportantDate { id: None, date, kind, label }),
        None => log::warn!("Skipping unparseable date value {:?}", line.value),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYYMMDD`, and the year-omitted forms `--MM-DD` and
/// `--MMDD`, the latter two yielding the sentinel year
pub(super) fn parse_vcard_date(raw: &str) -> Option<chrono::NaiveDate> {
    let raw = raw.trim();
    let raw = raw.split('T').next()?;
    if let Some(rest) = raw.strip_prefix("--") {
        let (month, day) = match rest.split_once('-') {
            Some((month, day)) => (month, day),
            None if rest.len() == 4 => rest.split_at(2),
            None => return None,
        };
        let month: u32 = month.parse().ok()?;
        let day: u32 = day.parse().ok()?;
        return chrono::NaiveDate::from_ymd_opt(UNKNOWN_YEAR, month, day);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

fn parse_photo(line: &ContentLine) -> Option<String> {
    let value = line.value.trim();
    let base64_encoded = line.params.iter().any(|(key, values)| {
        key == "ENCODING"
            && values
                .iter()
                .any(|v| v.eq_ignore_ascii_case("b") || v.eq_ignore_ascii_case("base64"))
    });
    if base64_encoded {
        let mime = collect_types(line)
            .first()
            .cloned()
            .unwrap_or_else(|| "jpeg".to_string());
        return Some(format!("data:image/{};base64,{}", mime, value));
    }
    if value.contains(':') {
        // already a URI (data:, https:, ...)
        return Some(value.to_string());
    }
    None
}

fn parse_relation(line: &ContentLine) -> Option<Relation> {
    let kind = collect_types(line)
        .into_iter()
        .next()
        .unwrap_or_else(|| "related".to_string());
    let value = unescape_text(&line.value);
    let value = value.trim();
    let related_uid = value.strip_prefix("urn:uuid:").unwrap_or(value);
    let related_uid = non_empty(related_uid.to_string())?;
    Some(Relation { id: None, kind, related_uid })
}

fn split_full_name(full_name: &str) -> (Option<String>, Option<String>) {
    let full_name = full_name.trim();
    match full_name.rsplit_once(' ') {
        Some((first, last)) => (
            non_empty(first.trim().to_string()),
            non_empty(last.to_string()),
        ),
        None => (non_empty(full_name.to_string()), None),
    }
}

#[cfg(test)]
mod test {
    const EXAMPLE_VCARD3: &str = r#"BEGIN:VCARD
VERSION:3.0
PRODID:-//Apple Inc.//iOS 14.2//EN
UID:a7c9e66a-2b58-4b2a-a52c-d9e43b4a85cd
N:García;Ana;María;Dr.;
FN:Dr. Ana María García
NICKNAME:Anita
ORG:Observatorio Nacional;Astrometría
TEL;TYPE=HOME,VOICE:+34 600 111 222
item1.TEL:+34 600 333 444
item1.X-ABLabel:_$!<Despacho>!$_
EMAIL;TYPE=INTERNET;TYPE=WORK:ana.garcia@example.org
ADR;TYPE=HOME:;;Calle Mayor 1;Madrid;;28013;España
BDAY:1978-06-02
NOTE:Prefers early meetings\, never on Fridays.\nSpeaks French.
CATEGORIES:Colleagues,Astronomy Club
GEO:40.4168;-3.7038
X-NAMETAG-SECOND-SURNAME:López
X-NAMETAG-REMINDER:14
X-NAMETAG-RELATION;TYPE=spouse:0e8ff2ab-1111-2222-3333-444455556666
X-PET:Cat
TZ:Europe/Madrid
END:VCARD
"#;

    const EXAMPLE_VCARD4: &str = "BEGIN:VCARD\r\n\
VERSION:4.0\r\n\
UID:urn-less-uid-0042\r\n\
N:Durand;Luc;;;\r\n\
FN:Luc Durand\r\n\
GENDER:M\r\n\
TEL;TYPE=\"cell,voice\";VALUE=uri:tel:+33-6-12-34-56-78\r\n\
EMAIL;TYPE=work:luc@example.fr\r\n\
IMPP;X-SERVICE-TYPE=Skype:skype:luc.durand\r\n\
GEO:geo:48.8566,2.3522\r\n\
BDAY:--03-15\r\n\
RELATED;TYPE=child:urn:uuid:9f0c7a2e-aaaa-bbbb-cccc-ddddeeee0001\r\n\
NOTE:A note that is long enough to be folded by the producer of this vCar\r\n d, across two physical lines.\r\n\
END:VCARD\r\n";

    use super::*;

    #[test]
    fn parses_a_vcard3_with_folding_groups_and_x_properties() {
        let parsed = parse(EXAMPLE_VCARD3);

        assert_eq!(parsed.version, VcardVersion::V3);
        assert_eq!(parsed.uid.as_deref(), Some("a7c9e66a-2b58-4b2a-a52c-d9e43b4a85cd"));
        assert_eq!(parsed.full_name.as_deref(), Some("Dr. Ana María García"));

        let fields = &parsed.fields;
        assert_eq!(fields.first_name.as_deref(), Some("Ana"));
        assert_eq!(fields.middle_name.as_deref(), Some("María"));
        assert_eq!(fields.last_name.as_deref(), Some("García"));
        assert_eq!(fields.second_last_name.as_deref(), Some("López"));
        assert_eq!(fields.prefix.as_deref(), Some("Dr."));
        assert_eq!(fields.nickname.as_deref(), Some("Anita"));
        assert_eq!(fields.organization.as_deref(), Some("Observatorio Nacional"));

        assert_eq!(fields.phones.len(), 2);
        assert_eq!(fields.phones[0].number, "+34 600 111 222");
        assert_eq!(fields.phones[0].label.as_deref(), Some("home"));
        assert_eq!(fields.phones[1].number, "+34 600 333 444");
        assert_eq!(fields.phones[1].label.as_deref(), Some("Despacho"));

        assert_eq!(fields.emails.len(), 1);
        assert_eq!(fields.emails[0].address, "ana.garcia@example.org");
        assert_eq!(fields.emails[0].label.as_deref(), Some("work"));

        assert_eq!(fields.addresses.len(), 1);
        assert_eq!(fields.addresses[0].street.as_deref(), Some("Calle Mayor 1"));
        assert_eq!(fields.addresses[0].city.as_deref(), Some("Madrid"));
        assert_eq!(fields.addresses[0].postal_code.as_deref(), Some("28013"));
        assert_eq!(fields.addresses[0].country.as_deref(), Some("España"));
        assert_eq!(fields.addresses[0].label.as_deref(), Some("home"));

        assert_eq!(fields.dates.len(), 1);
        assert_eq!(fields.dates[0].kind, DateKind::Birthday);
        assert_eq!(fields.dates[0].date, chrono::NaiveDate::from_ymd(1978, 6, 2));

        assert_eq!(fields.groups, vec!["Colleagues", "Astronomy Club"]);
        assert_eq!(fields.reminder_days, Some(14));

        assert_eq!(fields.relations.len(), 1);
        assert_eq!(fields.relations[0].kind, "spouse");
        assert_eq!(fields.relations[0].related_uid, "0e8ff2ab-1111-2222-3333-444455556666");

        assert_eq!(fields.geo_locations.len(), 1);
        assert!((fields.geo_locations[0].latitude - 40.4168).abs() < 1e-9);

        assert_eq!(fields.custom_fields.len(), 1);
        assert_eq!(fields.custom_fields[0].key, "X-PET");
        assert_eq!(fields.custom_fields[0].value, "Cat");

        // the note keeps its escapes decoded, and the unmodelled TZ is preserved
        let notes = fields.notes.as_deref().unwrap();
        assert!(notes.starts_with("Prefers early meetings, never on Fridays.\nSpeaks French."));
        assert!(notes.contains("Additional vCard properties:"));
        assert!(notes.contains("TZ: Europe/Madrid"));
    }

    #[test]
    fn parses_a_vcard4_with_uris_and_year_omitted_dates() {
        let parsed = parse(EXAMPLE_VCARD4);

        assert_eq!(parsed.version, VcardVersion::V4);
        assert_eq!(parsed.uid.as_deref(), Some("urn-less-uid-0042"));

        let fields = &parsed.fields;
        assert_eq!(fields.gender, Some(Gender::Male));

        // quoted TYPE list, tel: URI stripped
        assert_eq!(fields.phones.len(), 1);
        assert_eq!(fields.phones[0].number, "+33-6-12-34-56-78");
        assert_eq!(fields.phones[0].label.as_deref(), Some("cell"));

        assert_eq!(fields.im_handles.len(), 1);
        assert_eq!(fields.im_handles[0].protocol, "skype");
        assert_eq!(fields.im_handles[0].handle, "luc.durand");

        assert_eq!(fields.geo_locations.len(), 1);
        assert!((fields.geo_locations[0].longitude - 2.3522).abs() < 1e-9);

        assert_eq!(fields.dates.len(), 1);
        assert_eq!(fields.dates[0].date, chrono::NaiveDate::from_ymd(UNKNOWN_YEAR, 3, 15));

        assert_eq!(fields.relations.len(), 1);
        assert_eq!(fields.relations[0].kind, "child");
        assert_eq!(fields.relations[0].related_uid, "9f0c7a2e-aaaa-bbbb-cccc-ddddeeee0001");

        // folded NOTE was reassembled
        assert_eq!(
            fields.notes.as_deref(),
            Some("A note that is long enough to be folded by the producer of this vCard, across two physical lines.")
        );
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let vcard = "BEGIN:VCARD\r\n\
VERSION:3.0\r\n\
THIS IS GARBAGE\r\n\
UID:still-parsed\r\n\
FN:Still Parsed\r\n\
END:VCARD\r\n";
        let parsed = parse(vcard);
        assert_eq!(parsed.uid.as_deref(), Some("still-parsed"));
        assert_eq!(parsed.full_name.as_deref(), Some("Still Parsed"));
    }

    #[test]
    fn a_card_without_uid_yields_none() {
        let parsed = parse("BEGIN:VCARD\r\nVERSION:3.0\r\nFN:No Uid\r\nEND:VCARD\r\n");
        assert_eq!(parsed.uid, None);
        assert_eq!(parsed.display_name(), "No Uid");
    }

    #[test]
    fn fn_is_split_when_n_is_missing() {
        let parsed = parse("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:x\r\nFN:Marie Skłodowska Curie\r\nEND:VCARD\r\n");
        assert_eq!(parsed.fields.first_name.as_deref(), Some("Marie Skłodowska"));
        assert_eq!(parsed.fields.last_name.as_deref(), Some("Curie"));
    }

    #[test]
    fn escaped_commas_stay_inside_one_category() {
        let parsed = parse("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:x\r\nCATEGORIES:Family\\, Close,Work\r\nEND:VCARD\r\n");
        assert_eq!(parsed.fields.groups, vec!["Family, Close", "Work"]);
    }

    #[test]
    fn repeated_type_parameters_merge_with_comma_lists() {
        let parsed = parse("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:x\r\nTEL;TYPE=pref;TYPE=work,voice:+1 555\r\nEND:VCARD\r\n");
        assert_eq!(parsed.fields.phones[0].label.as_deref(), Some("work"));
    }

    #[test]
    fn duplicated_relations_collapse() {
        let vcard = "BEGIN:VCARD\r\nVERSION:4.0\r\nUID:x\r\n\
RELATED;TYPE=spouse:urn:uuid:abc\r\n\
X-NAMETAG-RELATION;TYPE=spouse:abc\r\n\
END:VCARD\r\n";
        let parsed = parse(vcard);
        assert_eq!(parsed.fields.relations.len(), 1);
    }

    #[test]
    fn inline_v3_photos_become_data_uris() {
        let parsed = parse("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:x\r\nPHOTO;ENCODING=b;TYPE=JPEG:AAECAw==\r\nEND:VCARD\r\n");
        assert_eq!(parsed.fields.photo.as_deref(), Some("data:image/jpeg;base64,AAECAw=="));
    }

    #[test]
    fn old_style_bare_type_parameters_are_understood() {
        let parsed = parse("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:x\r\nTEL;HOME:+1 555\r\nEND:VCARD\r\n");
        assert_eq!(parsed.fields.phones[0].label.as_deref(), Some("home"));
    }

    #[test]
    fn multibyte_tel_values_are_kept_verbatim() {
        // the é straddles byte 4, where a tel: prefix would end
        let vcard = "BEGIN:VCARD\r\nVERSION:4.0\r\nUID:x\r\n\
TEL:abcé999\r\n\
TEL:Tel:+33 1 23 45 67 89\r\n\
END:VCARD\r\n";
        let parsed = parse(vcard);
        assert_eq!(parsed.fields.phones.len(), 2);
        assert_eq!(parsed.fields.phones[0].number, "abcé999");
        assert_eq!(parsed.fields.phones[1].number, "+33 1 23 45 67 89");
    }

    #[test]
    fn only_the_first_vcard_of_a_resource_is_kept() {
        let vcard = "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:first\r\nFN:First\r\nEND:VCARD\r\n\
BEGIN:VCARD\r\nVERSION:3.0\r\nUID:second\r\nFN:Second\r\nEND:VCARD\r\n";
        let parsed = parse(vcard);
        assert_eq!(parsed.uid.as_deref(), Some("first"));
    }
}
