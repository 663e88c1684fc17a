//! Test data model for the fake ROP server
//!
//! Holds the mailbox (folders and saved messages), one [`Context`] per
//! connected session with its server objects and event queue, and the
//! knobs tests use to provoke transient failures:
//!
//! ```ignore
//! let store = StoreBuilder::new()
//!     .folder(SpecialFolder::Inbox, "Projects")
//!     .table_locked(2)
//!     .push_interval(Duration::from_millis(100))
//!     .build();
//! ```
//!
//! Every connected session sees the same mailbox, so one session's
//! changes raise events in every other session that subscribed to them.

use mapi_rop_client::wire::{NotificationData, RopId, RopResponse, SPECIAL_FOLDER_COUNT, TableEvent};
use mapi_rop_client::{NotificationTypes, SpecialFolder};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Password every test session logs on with.
pub const PASSWORD: &str = "secret";

/// Behaviour switches for a fake server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// `RopSetSearchCriteria` answers `ecSearchFolderNotReady` this many
    /// times before succeeding.
    pub search_not_ready: usize,
    /// `RopGetContentsTable` answers `ecTableLocked` this many times.
    pub table_locked: usize,
    /// Any `Execute` containing this ROP fails with `ecRpcFormat`.
    pub format_error_on: Option<RopId>,
    /// Longest the server holds an `AsyncWait` before answering "nothing".
    pub async_max_wait: Duration,
    /// Pause between repeated push datagrams.
    pub push_interval: Duration,
    /// Send table events even for tables opened with `NO_NOTIFICATIONS`.
    pub leak_muted_table_events: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            search_not_ready: 0,
            table_locked: 0,
            format_error_on: None,
            async_max_wait: Duration::from_secs(2),
            push_interval: Duration::from_millis(100),
            leak_muted_table_events: false,
        }
    }
}

/// A server object a handle can point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Logon,
    Folder(u64),
    Table {
        folder_id: u64,
        contents: bool,
        muted: bool,
    },
    Message {
        folder_id: u64,
        message_id: Option<u64>,
    },
    Subscription {
        types: NotificationTypes,
        target: Option<(u64, u64)>,
    },
    Rules,
}

#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub parent: u64,
    pub name: String,
    pub messages: Vec<u64>,
}

/// Where and what to send as a push hint.
#[derive(Debug, Clone)]
pub struct PushTarget {
    pub addr: SocketAddr,
    pub opaque: Vec<u8>,
}

/// Per-session server state.
#[derive(Debug, Default)]
pub struct Context {
    pub objects: HashMap<u32, Object>,
    /// Events waiting for a drain: `(notification handle, record)`.
    pub queue: VecDeque<(u32, NotificationData)>,
    /// Responses that did not fit the last reply.
    pub deferred: VecDeque<RopResponse>,
    pub deferred_handles: Vec<u32>,
    /// Woken whenever an event is queued.
    pub wake: Arc<Notify>,
    pub push: Option<PushTarget>,
}

/// A change to the mailbox that may interest subscribers.
#[derive(Debug, Clone, Copy)]
pub enum Change {
    FolderCreated { folder: u64, parent: u64 },
    FolderDeleted { folder: u64, parent: u64 },
    MessageSaved { folder: u64, message: u64 },
}

#[derive(Debug)]
pub struct Store {
    pub special: [u64; SPECIAL_FOLDER_COUNT],
    pub folders: BTreeMap<u64, FolderRecord>,
    pub contexts: HashMap<u32, Context>,
    /// `AsyncWait` handle to session context handle.
    pub async_contexts: HashMap<u32, u32>,
    pub options: ServerOptions,
    /// Requests seen per ROP id.
    pub rop_calls: HashMap<RopId, usize>,
    pub execute_calls: usize,
    next_id: u64,
    next_handle: u32,
}

impl Store {
    pub fn folder_id(&self, folder: SpecialFolder) -> u64 {
        self.special[folder.index()]
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        (self.next_id << 16) | 0x0001
    }

    pub fn allocate_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Open a new session context and return its handle.
    pub fn open_context(&mut self) -> u32 {
        let cxh = self.allocate_handle();
        self.contexts.insert(cxh, Context::default());
        cxh
    }

    pub fn close_context(&mut self, cxh: u32) -> bool {
        self.async_contexts.retain(|_, owner| *owner != cxh);
        self.contexts.remove(&cxh).is_some()
    }

    pub fn object(&self, cxh: u32, handle: u32) -> Option<&Object> {
        self.contexts.get(&cxh)?.objects.get(&handle)
    }

    pub fn insert_object(&mut self, cxh: u32, object: Object) -> Option<u32> {
        let handle = self.allocate_handle();
        self.contexts.get_mut(&cxh)?.objects.insert(handle, object);
        Some(handle)
    }

    pub fn object_mut(&mut self, cxh: u32, handle: u32) -> Option<&mut Object> {
        self.contexts.get_mut(&cxh)?.objects.get_mut(&handle)
    }

    pub fn remove_object(&mut self, cxh: u32, handle: u32) {
        if let Some(context) = self.contexts.get_mut(&cxh) {
            context.objects.remove(&handle);
        }
    }

    pub fn add_folder(&mut self, parent: u64, name: &str) -> u64 {
        let id = self.allocate_id();
        self.folders.insert(
            id,
            FolderRecord {
                parent,
                name: name.to_string(),
                messages: Vec::new(),
            },
        );
        id
    }

    /// Remove `folder` if it is a child of `parent`.
    pub fn remove_folder(&mut self, parent: u64, folder: u64) -> bool {
        if self.folders.get(&folder).is_some_and(|f| f.parent == parent) {
            self.folders.remove(&folder);
            true
        } else {
            false
        }
    }

    pub fn add_message(&mut self, folder: u64) -> Option<u64> {
        let id = self.allocate_id();
        self.folders.get_mut(&folder)?.messages.push(id);
        Some(id)
    }

    pub fn child_count(&self, folder: u64) -> usize {
        self.folders.values().filter(|f| f.parent == folder).count()
    }

    pub fn message_count(&self, folder: u64) -> usize {
        self.folders.get(&folder).map_or(0, |f| f.messages.len())
    }

    /// Find a child of `parent` by display name.
    pub fn find_child(&self, parent: u64, name: &str) -> Option<u64> {
        self.folders
            .iter()
            .find(|(_, f)| f.parent == parent && f.name == name)
            .map(|(id, _)| *id)
    }

    /// Queue events for every object in every session that watches
    /// `change`.
    pub fn raise(&mut self, change: Change) {
        let leak = self.options.leak_muted_table_events;
        for context in self.contexts.values_mut() {
            let mut queued = false;
            for (&handle, object) in &context.objects {
                for data in events_for(object, change, leak) {
                    context.queue.push_back((handle, data));
                    queued = true;
                }
            }
            if queued {
                context.wake.notify_one();
            }
        }
    }
}

/// Whole-store subscriptions and folder subscriptions on `folder`.
fn folder_scope(target: Option<(u64, u64)>, folder: u64) -> bool {
    match target {
        None => true,
        Some((f, 0)) => f == folder,
        Some(_) => false,
    }
}

fn subscribed_events(
    types: NotificationTypes,
    target: Option<(u64, u64)>,
    change: Change,
) -> Vec<NotificationData> {
    let mut events = Vec::new();
    match change {
        Change::FolderCreated { folder, parent } => {
            if folder_scope(target, parent) && types.contains(NotificationTypes::OBJECT_CREATED) {
                events.push(NotificationData::folder_created(folder, parent));
            }
        }
        Change::FolderDeleted { folder, parent } => {
            if folder_scope(target, parent) && types.contains(NotificationTypes::OBJECT_DELETED) {
                events.push(NotificationData::folder_deleted(folder, parent));
            }
        }
        Change::MessageSaved { folder, message } => {
            let in_scope = match target {
                None => true,
                Some((f, 0)) => f == folder,
                Some((_, m)) => m == message,
            };
            if in_scope && types.contains(NotificationTypes::OBJECT_CREATED) {
                events.push(NotificationData::message_created(folder, message));
            }
            if in_scope && types.contains(NotificationTypes::NEW_MAIL) {
                events.push(NotificationData::new_mail(folder, message, "IPM.Note"));
            }
        }
    }
    events
}

fn events_for(object: &Object, change: Change, leak: bool) -> Vec<NotificationData> {
    match *object {
        Object::Subscription { types, target } => subscribed_events(types, target, change),
        Object::Table {
            folder_id,
            contents,
            muted,
        } => {
            if muted && !leak {
                return Vec::new();
            }
            let hit = match change {
                Change::FolderCreated { parent, .. } | Change::FolderDeleted { parent, .. } => {
                    !contents && parent == folder_id
                }
                Change::MessageSaved { folder, .. } => contents && folder == folder_id,
            };
            if hit {
                vec![NotificationData::table(TableEvent::Changed)]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// Builder for a `Store` with the special folders in place.
pub struct StoreBuilder {
    store: Store,
}

impl StoreBuilder {
    pub fn new() -> Self {
        let mut store = Store {
            special: [0; SPECIAL_FOLDER_COUNT],
            folders: BTreeMap::new(),
            contexts: HashMap::new(),
            async_contexts: HashMap::new(),
            options: ServerOptions::default(),
            rop_calls: HashMap::new(),
            execute_calls: 0,
            next_id: 0,
            next_handle: 0x100,
        };
        for folder in SpecialFolder::ALL {
            let parent = match folder {
                SpecialFolder::Root => 0,
                SpecialFolder::Inbox
                | SpecialFolder::Outbox
                | SpecialFolder::SentItems
                | SpecialFolder::DeletedItems => store.folder_id(SpecialFolder::IpmSubtree),
                _ => store.folder_id(SpecialFolder::Root),
            };
            store.special[folder.index()] = store.add_folder(parent, folder.as_str());
        }
        Self { store }
    }

    /// Add a folder under a special folder.
    pub fn folder(mut self, parent: SpecialFolder, name: &str) -> Self {
        let parent = self.store.folder_id(parent);
        self.store.add_folder(parent, name);
        self
    }

    pub fn search_not_ready(mut self, times: usize) -> Self {
        self.store.options.search_not_ready = times;
        self
    }

    pub fn table_locked(mut self, times: usize) -> Self {
        self.store.options.table_locked = times;
        self
    }

    pub fn format_error_on(mut self, rop: RopId) -> Self {
        self.store.options.format_error_on = Some(rop);
        self
    }

    pub fn async_max_wait(mut self, wait: Duration) -> Self {
        self.store.options.async_max_wait = wait;
        self
    }

    pub fn push_interval(mut self, interval: Duration) -> Self {
        self.store.options.push_interval = interval;
        self
    }

    pub fn leak_muted_table_events(mut self) -> Self {
        self.store.options.leak_muted_table_events = true;
        self
    }

    pub fn build(self) -> Store {
        self.store
    }
}
