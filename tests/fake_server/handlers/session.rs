//! `Connect` and `Disconnect` handlers.

use crate::fake_server::store::{PASSWORD, Store};
use mapi_rop_client::status;
use mapi_rop_client::wire::{Reader, Writer};
use std::sync::Mutex;

/// `[user_dn\0][username\0][password\0]`. Any user is accepted with the
/// shared test password.
pub fn handle_connect(
    store: &Mutex<Store>,
    payload: &[u8],
    cxh: &mut Option<u32>,
) -> (u32, Vec<u8>) {
    let mut reader = Reader::new(payload);
    let (Ok(_user_dn), Ok(_username), Ok(password)) = (
        reader.ascii_z("UserDn"),
        reader.ascii_z("Username"),
        reader.ascii_z("Password"),
    ) else {
        return (status::RPC_FORMAT, Vec::new());
    };
    if password != PASSWORD {
        return (status::LOGIN_FAILURE, Vec::new());
    }

    let handle = store.lock().unwrap().open_context();
    *cxh = Some(handle);
    let mut w = Writer::new();
    w.u32(handle);
    (status::SUCCESS, w.into_inner())
}

/// `[cxh:4]`.
pub fn handle_disconnect(
    store: &Mutex<Store>,
    payload: &[u8],
    cxh: &mut Option<u32>,
) -> (u32, Vec<u8>) {
    let Ok(handle) = Reader::new(payload).u32() else {
        return (status::RPC_FORMAT, Vec::new());
    };
    if store.lock().unwrap().close_context(handle) {
        *cxh = None;
        (status::SUCCESS, Vec::new())
    } else {
        (status::INVALID_BINDING, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_server::store::StoreBuilder;

    fn connect_payload(password: &str) -> Vec<u8> {
        let mut w = Writer::new();
        w.ascii_z("/o=Test/cn=user");
        w.ascii_z("user");
        w.ascii_z(password);
        w.into_inner()
    }

    #[test]
    fn wrong_password_is_login_failure() {
        let store = Mutex::new(StoreBuilder::new().build());
        let mut cxh = None;
        let (status, _) = handle_connect(&store, &connect_payload("nope"), &mut cxh);
        assert_eq!(status, status::LOGIN_FAILURE);
        assert!(cxh.is_none());
    }

    #[test]
    fn connect_then_disconnect() {
        let store = Mutex::new(StoreBuilder::new().build());
        let mut cxh = None;
        let (status, reply) = handle_connect(&store, &connect_payload(PASSWORD), &mut cxh);
        assert_eq!(status, status::SUCCESS);
        let handle = Reader::new(&reply).u32().unwrap();
        assert_eq!(cxh, Some(handle));

        let (status, _) = handle_disconnect(&store, &handle.to_le_bytes(), &mut cxh);
        assert_eq!(status, status::SUCCESS);
        assert!(cxh.is_none());
        let (status, _) = handle_disconnect(&store, &handle.to_le_bytes(), &mut cxh);
        assert_eq!(status, status::INVALID_BINDING);
    }
}
