//! This module provides ways to tweak mocked address books, so that they can return errors on some tests

use crate::error::RemoteError;

/// This stores some behaviour tweaks, that describe how a mocked instance will behave during a given test
///
/// So that a function fails _n_ times after _m_ initial successes, set `(m, n)` for the suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,

    // From the CardDavSource trait
    pub discover_address_books_behaviour: (u32, u32),

    // From the DavAddressBook trait
    pub list_vcards_behaviour: (u32, u32),
    pub create_vcard_behaviour: (u32, u32),
    pub update_vcard_behaviour: (u32, u32),
    pub delete_vcard_behaviour: (u32, u32),
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// All operations will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            is_suspended: false,
            discover_address_books_behaviour: (0, n_fails),
            list_vcards_behaviour: (0, n_fails),
            create_vcard_behaviour: (0, n_fails),
            update_vcard_behaviour: (0, n_fails),
            delete_vcard_behaviour: (0, n_fails),
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    pub fn can_discover_address_books(&mut self) -> Result<(), RemoteError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.discover_address_books_behaviour, "discover_address_books")
    }
    pub fn can_list_vcards(&mut self) -> Result<(), RemoteError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.list_vcards_behaviour, "list_vcards")
    }
    pub fn can_create_vcard(&mut self) -> Result<(), RemoteError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.create_vcard_behaviour, "create_vcard")
    }
    pub fn can_update_vcard(&mut self) -> Result<(), RemoteError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.update_vcard_behaviour, "update_vcard")
    }
    pub fn can_delete_vcard(&mut self) -> Result<(), RemoteError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.delete_vcard_behaviour, "delete_vcard")
    }
}


/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), RemoteError> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 = value.0 - 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else {
        if remaining_failures > 0 {
            value.1 = value.1 - 1;
            log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
            Err(RemoteError::Other(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value)))
        } else {
            log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
            Ok(())
        }
    }
}
