//! `Execute` handler: decode the ROP batch, apply it, pack the replies.
//!
//! Replies that do not fit the client's response size are kept and sent
//! on the next empty request, behind a `Pending` marker. Empty requests
//! also carry queued notifications, again ending in `Pending` when the
//! buffer fills.

use crate::fake_server::store::{Change, Object, Store};
use mapi_rop_client::status;
use mapi_rop_client::wire::{
    Chunk, CreatedFolder, FolderInfo, HEADER_SIZE, LogonBody, LogonResponse, LogonTime, Reader,
    RopId, RopRequest, RopResponse, SavedMessage, decode_chunks, decode_requests, encode_buffer,
    encode_responses,
};
use mapi_rop_client::{LogonFlags, TableFlags};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Encoded size of a `Pending` response.
const PENDING_SIZE: usize = 3;

/// Largest reply chunk the server builds.
const MAX_CHUNK: usize = 0x8000;

/// Handle an `Execute` payload: `[cxh:4][max_response_size:4][request]`.
pub fn handle_execute(store: &Mutex<Store>, payload: &[u8]) -> (u32, Vec<u8>) {
    let mut reader = Reader::new(payload);
    let (Ok(cxh), Ok(max)) = (reader.u32(), reader.u32()) else {
        return (status::RPC_FORMAT, Vec::new());
    };
    let request = reader.rest();

    let mut store = store.lock().unwrap();
    if !store.contexts.contains_key(&cxh) {
        return (status::INVALID_BINDING, Vec::new());
    }
    store.execute_calls += 1;

    let Ok(chunks) = decode_chunks(request) else {
        return (status::RPC_FORMAT, Vec::new());
    };
    let mut rops = Vec::new();
    let mut handles = Vec::new();
    for chunk in chunks {
        rops.extend(chunk.rops);
        handles.extend(chunk.handles);
    }
    let Ok(requests) = decode_requests(&rops) else {
        return (status::RPC_FORMAT, Vec::new());
    };
    for request in &requests {
        *store.rop_calls.entry(request.rop_id()).or_default() += 1;
    }
    if let Some(rop) = store.options.format_error_on
        && requests.iter().any(|r| r.rop_id() == rop)
    {
        return (status::RPC_FORMAT, Vec::new());
    }

    let max = usize::try_from(max).unwrap_or(usize::MAX).min(MAX_CHUNK);
    let reply = if requests.is_empty() {
        drain(&mut store, cxh, max)
    } else {
        let mut responses = VecDeque::new();
        for request in &requests {
            if let Some(response) = apply(&mut store, cxh, request, &mut handles) {
                responses.push_back(response);
            }
        }
        let context = store.contexts.get_mut(&cxh).unwrap();
        context.deferred.clear();
        pack(&mut store, cxh, responses, handles, max, Some(&rops))
    };
    (status::SUCCESS, reply)
}

fn drain(store: &mut Store, cxh: u32, max: usize) -> Vec<u8> {
    let context = store.contexts.get_mut(&cxh).unwrap();
    let deferred = std::mem::take(&mut context.deferred);
    let handles = std::mem::take(&mut context.deferred_handles);
    pack(store, cxh, deferred, handles, max, None)
}

fn encoded_len(response: &RopResponse) -> usize {
    encode_responses(std::slice::from_ref(response)).unwrap().len()
}

/// Fit positional responses, then (on drains) notifications, into `max`
/// bytes. `request` is the original ROP bytes of a non-empty call.
fn pack(
    store: &mut Store,
    cxh: u32,
    mut positional: VecDeque<RopResponse>,
    handles: Vec<u32>,
    max: usize,
    request: Option<&[u8]>,
) -> Vec<u8> {
    let budget = max.saturating_sub(HEADER_SIZE + 2 + handles.len() * 4);
    let mut out = Vec::new();
    let mut used = 0;

    while let Some(response) = positional.front() {
        let len = encoded_len(response);
        if used + len + PENDING_SIZE > budget {
            break;
        }
        used += len;
        out.extend(positional.pop_front());
    }

    let context = store.contexts.get_mut(&cxh).unwrap();
    let mut more = false;
    if let Some(first) = positional.front() {
        if out.is_empty()
            && let Some(request) = request
        {
            let needed = encoded_len(first) + HEADER_SIZE + 2 + handles.len() * 4;
            out.push(RopResponse::BufferTooSmall {
                size_needed: u16::try_from(needed).unwrap_or(u16::MAX),
                request_buffers: request.to_vec(),
            });
            return finish(out, handles);
        }
        context.deferred = positional;
        context.deferred_handles = handles.clone();
        more = true;
    }

    if request.is_none() && !more {
        while let Some((handle, data)) = context.queue.front() {
            let notify = RopResponse::Notify {
                notification_handle: *handle,
                logon_id: 0,
                data: Box::new(data.clone()),
            };
            let len = encoded_len(&notify);
            if used + len + PENDING_SIZE > budget {
                more = true;
                break;
            }
            used += len;
            out.push(notify);
            context.queue.pop_front();
        }
    }

    if more {
        out.push(RopResponse::Pending { session_index: 0 });
    }

    let positional_sent = out
        .iter()
        .any(|r| r.rop_id() != RopId::Notify && !r.rop_id().is_terminal());
    let handles = if request.is_some() || positional_sent {
        handles
    } else {
        Vec::new()
    };
    finish(out, handles)
}

fn finish(responses: Vec<RopResponse>, handles: Vec<u32>) -> Vec<u8> {
    let chunk = Chunk {
        rops: encode_responses(&responses).unwrap(),
        handles,
    };
    encode_buffer(&chunk, false).unwrap()
}

fn logon_response(store: &Store) -> LogonResponse {
    LogonResponse {
        logon_flags: LogonFlags::PRIVATE,
        folder_ids: store.special,
        response_flags: 0x01,
        mailbox_guid: [0x11; 16],
        replica_id: 1,
        replica_guid: [0x22; 16],
        logon_time: LogonTime {
            seconds: 0,
            minutes: 30,
            hour: 9,
            day_of_week: 1,
            day: 19,
            month: 10,
            year: 2026,
        },
        gwart_time: 0,
        store_state: 0,
    }
}

fn failure(id: RopId, handle_index: u8, return_value: u32) -> Option<RopResponse> {
    Some(RopResponse::failure(id, handle_index, return_value).expect("failure shape"))
}

/// Resolve the object at `index` of the request handle list.
fn input(store: &Store, cxh: u32, handles: &[u32], index: u8) -> Option<Object> {
    let handle = *handles.get(usize::from(index))?;
    store.object(cxh, handle).cloned()
}

/// Folder id an object lets new children or tables hang off.
const fn container(object: &Object) -> Option<u64> {
    match object {
        Object::Folder(id) => Some(*id),
        _ => None,
    }
}

fn set_output(handles: &mut [u32], index: u8, handle: u32) {
    if let Some(slot) = handles.get_mut(usize::from(index)) {
        *slot = handle;
    }
}

#[allow(clippy::too_many_lines)]
fn apply(
    store: &mut Store,
    cxh: u32,
    request: &RopRequest,
    handles: &mut [u32],
) -> Option<RopResponse> {
    let id = request.rop_id();
    if let Some(index) = request.input_handle_index()
        && input(store, cxh, handles, index).is_none()
    {
        if id == RopId::Release {
            return None;
        }
        let index = request.output_handle_index().unwrap_or(index);
        return failure(id, index, status::NULL_OBJECT);
    }

    match request {
        RopRequest::Logon {
            output_handle_index,
            ..
        } => {
            let handle = store.insert_object(cxh, Object::Logon)?;
            set_output(handles, *output_handle_index, handle);
            Some(RopResponse::Logon {
                handle_index: *output_handle_index,
                return_value: status::SUCCESS,
                body: LogonBody::Mailbox(Box::new(logon_response(store))),
            })
        }
        RopRequest::Release {
            input_handle_index, ..
        } => {
            let handle = handles[usize::from(*input_handle_index)];
            store.remove_object(cxh, handle);
            None
        }
        RopRequest::OpenFolder {
            input_handle_index,
            output_handle_index,
            folder_id,
            ..
        } => {
            let parent = input(store, cxh, handles, *input_handle_index)?;
            if !matches!(parent, Object::Logon | Object::Folder(_))
                || !store.folders.contains_key(folder_id)
            {
                return failure(id, *output_handle_index, status::NOT_FOUND);
            }
            let handle = store.insert_object(cxh, Object::Folder(*folder_id))?;
            set_output(handles, *output_handle_index, handle);
            Some(RopResponse::OpenFolder {
                handle_index: *output_handle_index,
                return_value: status::SUCCESS,
                folder: Some(FolderInfo {
                    has_rules: false,
                    ghost: None,
                }),
            })
        }
        RopRequest::GetHierarchyTable {
            input_handle_index,
            output_handle_index,
            table_flags,
            ..
        }
        | RopRequest::GetContentsTable {
            input_handle_index,
            output_handle_index,
            table_flags,
            ..
        } => {
            let contents = id == RopId::GetContentsTable;
            let Some(folder_id) = container(&input(store, cxh, handles, *input_handle_index)?)
            else {
                return failure(id, *output_handle_index, status::NOT_FOUND);
            };
            if contents && store.options.table_locked > 0 {
                store.options.table_locked -= 1;
                return failure(id, *output_handle_index, status::TABLE_LOCKED);
            }
            let row_count = if contents {
                store.message_count(folder_id)
            } else {
                store.child_count(folder_id)
            };
            let handle = store.insert_object(
                cxh,
                Object::Table {
                    folder_id,
                    contents,
                    muted: table_flags.contains(TableFlags::NO_NOTIFICATIONS),
                },
            )?;
            set_output(handles, *output_handle_index, handle);
            let row_count = Some(u32::try_from(row_count).unwrap_or(u32::MAX));
            Some(if contents {
                RopResponse::GetContentsTable {
                    handle_index: *output_handle_index,
                    return_value: status::SUCCESS,
                    row_count,
                }
            } else {
                RopResponse::GetHierarchyTable {
                    handle_index: *output_handle_index,
                    return_value: status::SUCCESS,
                    row_count,
                }
            })
        }
        RopRequest::CreateMessage {
            output_handle_index,
            folder_id,
            ..
        } => {
            if !store.folders.contains_key(folder_id) {
                return failure(id, *output_handle_index, status::NOT_FOUND);
            }
            let handle = store.insert_object(
                cxh,
                Object::Message {
                    folder_id: *folder_id,
                    message_id: None,
                },
            )?;
            set_output(handles, *output_handle_index, handle);
            Some(RopResponse::CreateMessage {
                handle_index: *output_handle_index,
                return_value: status::SUCCESS,
                message_id: None,
            })
        }
        RopRequest::SaveChangesMessage {
            response_handle_index,
            input_handle_index,
            ..
        } => {
            let handle = handles[usize::from(*input_handle_index)];
            let Some(Object::Message { folder_id, .. }) = store.object(cxh, handle).cloned() else {
                return failure(id, *response_handle_index, status::NULL_OBJECT);
            };
            let Some(message_id) = store.add_message(folder_id) else {
                return failure(id, *response_handle_index, status::NOT_FOUND);
            };
            if let Some(Object::Message { message_id: slot, .. }) = store.object_mut(cxh, handle) {
                *slot = Some(message_id);
            }
            store.raise(Change::MessageSaved {
                folder: folder_id,
                message: message_id,
            });
            Some(RopResponse::SaveChangesMessage {
                handle_index: *response_handle_index,
                return_value: status::SUCCESS,
                saved: Some(SavedMessage {
                    input_handle_index: *input_handle_index,
                    message_id,
                }),
            })
        }
        RopRequest::SetColumns {
            input_handle_index, ..
        } => Some(RopResponse::SetColumns {
            handle_index: *input_handle_index,
            return_value: status::SUCCESS,
            table_status: Some(0),
        }),
        RopRequest::GetStatus {
            input_handle_index, ..
        } => Some(RopResponse::GetStatus {
            handle_index: *input_handle_index,
            return_value: status::SUCCESS,
            table_status: Some(0),
        }),
        RopRequest::CreateFolder {
            input_handle_index,
            output_handle_index,
            open_existing,
            display_name,
            ..
        } => {
            let Some(parent) = container(&input(store, cxh, handles, *input_handle_index)?) else {
                return failure(id, *output_handle_index, status::NOT_FOUND);
            };
            let existing = store.find_child(parent, display_name);
            let (folder_id, existing) = match existing {
                Some(folder_id) if *open_existing => (
                    folder_id,
                    Some(FolderInfo {
                        has_rules: false,
                        ghost: None,
                    }),
                ),
                Some(_) => return failure(id, *output_handle_index, status::DUPLICATE_NAME),
                None => {
                    let folder_id = store.add_folder(parent, display_name);
                    store.raise(Change::FolderCreated {
                        folder: folder_id,
                        parent,
                    });
                    (folder_id, None)
                }
            };
            let handle = store.insert_object(cxh, Object::Folder(folder_id))?;
            set_output(handles, *output_handle_index, handle);
            Some(RopResponse::CreateFolder {
                handle_index: *output_handle_index,
                return_value: status::SUCCESS,
                folder: Some(CreatedFolder {
                    folder_id,
                    existing,
                }),
            })
        }
        RopRequest::DeleteFolder {
            input_handle_index,
            folder_id,
            ..
        } => {
            let parent = container(&input(store, cxh, handles, *input_handle_index)?);
            let removed = parent.is_some_and(|parent| store.remove_folder(parent, *folder_id));
            if let (true, Some(parent)) = (removed, parent) {
                store.raise(Change::FolderDeleted {
                    folder: *folder_id,
                    parent,
                });
            }
            Some(RopResponse::DeleteFolder {
                handle_index: *input_handle_index,
                return_value: if removed {
                    status::SUCCESS
                } else {
                    status::NOT_FOUND
                },
                partial_completion: false,
            })
        }
        RopRequest::RegisterNotification {
            output_handle_index,
            types,
            target,
            ..
        } => {
            let handle = store.insert_object(
                cxh,
                Object::Subscription {
                    types: *types,
                    target: *target,
                },
            )?;
            set_output(handles, *output_handle_index, handle);
            Some(RopResponse::RegisterNotification {
                handle_index: *output_handle_index,
                return_value: status::SUCCESS,
            })
        }
        RopRequest::SetSearchCriteria {
            input_handle_index, ..
        } => {
            let return_value = if store.options.search_not_ready > 0 {
                store.options.search_not_ready -= 1;
                status::SEARCH_NOT_READY
            } else {
                status::SUCCESS
            };
            Some(RopResponse::SetSearchCriteria {
                handle_index: *input_handle_index,
                return_value,
            })
        }
        RopRequest::GetRulesTable {
            output_handle_index,
            ..
        } => {
            let handle = store.insert_object(cxh, Object::Rules)?;
            set_output(handles, *output_handle_index, handle);
            Some(RopResponse::GetRulesTable {
                handle_index: *output_handle_index,
                return_value: status::SUCCESS,
            })
        }
    }
}
