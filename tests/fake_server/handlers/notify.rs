//! `AsyncConnect`, `AsyncWait` and `RegisterPush` handlers.

use crate::fake_server::store::{PushTarget, Store};
use mapi_rop_client::wire::{Reader, Writer};
use mapi_rop_client::{NOTIFICATION_PENDING, WireError, status};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;

fn reply_u32(value: u32) -> (u32, Vec<u8>) {
    let mut w = Writer::new();
    w.u32(value);
    (status::SUCCESS, w.into_inner())
}

/// `[cxh:4]` -> `[acxh:4]`.
pub fn handle_async_connect(store: &Mutex<Store>, payload: &[u8]) -> (u32, Vec<u8>) {
    let Ok(cxh) = Reader::new(payload).u32() else {
        return (status::RPC_FORMAT, Vec::new());
    };
    let mut store = store.lock().unwrap();
    if !store.contexts.contains_key(&cxh) {
        return (status::INVALID_BINDING, Vec::new());
    }
    let acxh = store.allocate_handle();
    store.async_contexts.insert(acxh, cxh);
    reply_u32(acxh)
}

/// `[acxh:4]` -> `[flags:4]`. Answers as soon as an event is queued, or
/// with no flags after the server's maximum wait.
pub async fn handle_async_wait(store: &Mutex<Store>, payload: &[u8]) -> (u32, Vec<u8>) {
    let Ok(acxh) = Reader::new(payload).u32() else {
        return (status::RPC_FORMAT, Vec::new());
    };
    let max_wait = store.lock().unwrap().options.async_max_wait;
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        let wake = {
            let store = store.lock().unwrap();
            let Some(context) = store
                .async_contexts
                .get(&acxh)
                .and_then(|cxh| store.contexts.get(cxh))
            else {
                return (status::INVALID_BINDING, Vec::new());
            };
            if !context.queue.is_empty() {
                return reply_u32(NOTIFICATION_PENDING);
            }
            Arc::clone(&context.wake)
        };
        // A wake-up left over from an already drained event finds the
        // queue empty and waits again.
        if tokio::time::timeout_at(deadline, wake.notified()).await.is_err() {
            return reply_u32(0);
        }
    }
}

fn parse_register_push(payload: &[u8]) -> Result<(u32, u16, Vec<u8>), WireError> {
    let mut reader = Reader::new(payload);
    let cxh = reader.u32()?;
    let _family = reader.u16()?;
    let port = reader.u16()?;
    let len = reader.u16()?;
    let opaque = reader.take(usize::from(len))?.to_vec();
    Ok((cxh, port, opaque))
}

/// `[cxh:4][family:2][port:2][len:2][opaque]` -> `[handle:4]`.
///
/// Datagrams go to the caller's address. A background task repeats the
/// opaque token every push interval while the session has queued events.
pub fn handle_register_push(
    store: &Arc<Mutex<Store>>,
    payload: &[u8],
    peer: Option<SocketAddr>,
) -> (u32, Vec<u8>) {
    let (Ok((cxh, port, opaque)), Some(peer)) = (parse_register_push(payload), peer) else {
        return (status::RPC_FORMAT, Vec::new());
    };

    let target = PushTarget {
        addr: SocketAddr::new(peer.ip(), port),
        opaque,
    };
    let (handle, interval) = {
        let mut guard = store.lock().unwrap();
        let handle = guard.allocate_handle();
        let Some(context) = guard.contexts.get_mut(&cxh) else {
            return (status::INVALID_BINDING, Vec::new());
        };
        context.push = Some(target.clone());
        (handle, guard.options.push_interval)
    };

    let store = Arc::clone(store);
    tokio::spawn(async move {
        let Ok(socket) = UdpSocket::bind("0.0.0.0:0").await else {
            return;
        };
        loop {
            tokio::time::sleep(interval).await;
            let queued = {
                let store = store.lock().unwrap();
                match store.contexts.get(&cxh) {
                    Some(context) => !context.queue.is_empty(),
                    None => break,
                }
            };
            if queued {
                let _ = socket.send_to(&target.opaque, target.addr).await;
            }
        }
    });

    reply_u32(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_server::store::StoreBuilder;

    #[tokio::test]
    async fn unknown_async_handle_is_invalid_binding() {
        let store = Mutex::new(StoreBuilder::new().build());
        let (status, _) = handle_async_wait(&store, &0xDEAD_u32.to_le_bytes()).await;
        assert_eq!(status, status::INVALID_BINDING);
    }

    #[tokio::test]
    async fn queued_event_answers_immediately() {
        let store = Mutex::new(StoreBuilder::new().build());
        let acxh = {
            let mut guard = store.lock().unwrap();
            let cxh = guard.open_context();
            let context = guard.contexts.get_mut(&cxh).unwrap();
            context.queue.push_back((
                1,
                mapi_rop_client::wire::NotificationData::folder_created(2, 3),
            ));
            let acxh = guard.allocate_handle();
            guard.async_contexts.insert(acxh, cxh);
            acxh
        };
        let (status, reply) = handle_async_wait(&store, &acxh.to_le_bytes()).await;
        assert_eq!(status, status::SUCCESS);
        assert_eq!(Reader::new(&reply).u32().unwrap(), NOTIFICATION_PENDING);
    }
}
