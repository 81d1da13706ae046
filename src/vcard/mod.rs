//! This module handles conversion between vCard files and internal representations
//!
//! Both vCard 3.0 (RFC 2426) and vCard 4.0 (RFC 6350) are supported, in both
//! directions. Parsing is lenient (servers and phones produce remarkably
//! creative vCards); building is strict.

mod parser;
pub use parser::{parse, ParsedVcard};
mod builder;
pub use builder::build;

use crate::settings::{ORG_NAME, PRODUCT_NAME};

/// Placeholder year for dates whose actual year is unknown (vCard 3.0 cannot
/// omit the year; 1604 is the conventional sentinel, and a leap year, so
/// February 29th stays representable)
pub const UNKNOWN_YEAR: i32 = 1604;

/// Second surname, which has no standard vCard slot
pub const XPROP_SECOND_SURNAME: &str = "X-NAMETAG-SECOND-SURNAME";
/// A relationship edge: `X-NAMETAG-RELATION;TYPE=kind:related-uid`
pub const XPROP_RELATION: &str = "X-NAMETAG-RELATION";
/// Contact-level reminder lead time, in days
pub const XPROP_REMINDER: &str = "X-NAMETAG-REMINDER";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VcardVersion {
    V3,
    V4,
}

impl VcardVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            VcardVersion::V3 => "3.0",
            VcardVersion::V4 => "4.0",
        }
    }
}

pub fn default_prod_id() -> String {
    let org = ORG_NAME.lock().unwrap(/* this cannot be poisoned: nothing panics while holding it */);
    let product = PRODUCT_NAME.lock().unwrap(/* ditto */);
    format!("-//{}//{}//EN", org, product)
}
