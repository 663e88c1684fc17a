//! Session context and call dispatcher
//!
//! A [`Session`] owns one transport, the handle table filled by its round
//! trips, and its notification bookkeeping. Every operation takes
//! `&mut self`, so one session never has two calls in flight.

use crate::config::{ConnectionConfig, EngineConfig};
use crate::error::{Error, Result, WireError};
use crate::flag::{
    DeleteFolderFlags, LogonFlags, NotificationTypes, OpenFlags, OpenModeFlags, SaveFlags,
    SearchFlags, TableFlags,
};
use crate::handle::{HandleRef, HandleTable};
use crate::notify::{Notification, Notifications, Scope, Subscription};
use crate::retry::{RetryPolicy, SEARCH_TRANSIENT, TABLE_TRANSIENT};
use crate::status::{self, UNSET_HANDLE};
use crate::transport::{RoundTrip, Transport};
use crate::wire::{
    Chunk, FOLDER_GENERIC, FolderInfo, LogonBody, LogonResponse, RopId, RopRequest, RopResponse,
    decode_chunks, decode_responses, encode_buffer, encode_requests,
};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// `CodePageId` of `RopCreateMessage`: use the logon's code page.
const DEFAULT_CODE_PAGE: u16 = 0x0FFF;

/// Everything one round trip produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallOutcome {
    /// `Execute` status. When non-zero nothing was decoded.
    pub status: u32,
    /// Responses in issuance order, `Notify` records interleaved.
    pub responses: Vec<RopResponse>,
    /// Handle table rows appended by this call.
    pub rows: Vec<usize>,
    /// Row of the chunk that carried each positional response, in the
    /// order of [`CallOutcome::positional`].
    pub positional_rows: Vec<usize>,
}

impl CallOutcome {
    const fn failed(status: u32) -> Self {
        Self {
            status,
            responses: Vec::new(),
            rows: Vec::new(),
            positional_rows: Vec::new(),
        }
    }

    /// The list ended because the response buffer filled up.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.responses.last().is_some_and(RopResponse::is_pending)
    }

    /// Responses that answer a request, skipping `Notify` and terminal
    /// markers.
    pub fn positional(&self) -> impl Iterator<Item = &RopResponse> {
        self.responses.iter().filter(|r| is_positional(r))
    }

    /// Notifications carried by this outcome.
    pub fn notifications(&self) -> impl Iterator<Item = Notification> + '_ {
        self.responses.iter().filter_map(Notification::from_response)
    }
}

fn is_positional(response: &RopResponse) -> bool {
    let id = response.rop_id();
    id != RopId::Notify && !id.is_terminal()
}

/// Typed result of a single-ROP convenience operation.
///
/// `value` is present exactly when `return_value` is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply<T> {
    pub rop: RopId,
    pub return_value: u32,
    pub value: Option<T>,
}

impl<T> Reply<T> {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.return_value == status::SUCCESS
    }

    /// Whether the return value is one of `codes`.
    #[must_use]
    pub fn is_one_of(&self, codes: &[u32]) -> bool {
        codes.contains(&self.return_value)
    }

    /// # Errors
    ///
    /// Returns `Error::Rop` for a non-zero return value.
    pub fn into_result(self) -> Result<T> {
        match self.value {
            Some(value) if self.return_value == status::SUCCESS => Ok(value),
            _ => Err(Error::Rop {
                rop: self.rop,
                return_value: self.return_value,
            }),
        }
    }
}

/// A successful logon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Logon {
    pub handle: HandleRef,
    pub mailbox: LogonResponse,
}

/// An opened folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub handle: HandleRef,
    pub folder_id: u64,
    pub info: Option<FolderInfo>,
}

/// An opened hierarchy or contents table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Table {
    pub handle: HandleRef,
    pub row_count: u32,
}

/// One session context.
#[derive(Debug)]
pub struct Session<T: Transport> {
    pub(crate) transport: T,
    pub(crate) config: EngineConfig,
    pub(crate) handles: HandleTable,
    pub(crate) notifications: Notifications,
    logon_id: u8,
    logon: Option<HandleRef>,
    /// ROP ids whose responses a `Pending` marker deferred to the next
    /// drain.
    owed: VecDeque<RopId>,
}

impl<T: Transport> Session<T> {
    #[must_use]
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self {
            transport,
            config,
            handles: HandleTable::new(),
            notifications: Notifications::default(),
            logon_id: 0,
            logon: None,
            owed: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tuning for later calls, e.g. a smaller response size once logged on.
    pub const fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    #[must_use]
    pub const fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Logon id reused by every request of this session.
    #[must_use]
    pub const fn logon_id(&self) -> u8 {
        self.logon_id
    }

    /// Handle of the mailbox logon, once [`Session::logon`] succeeded.
    #[must_use]
    pub const fn logon_handle(&self) -> Option<HandleRef> {
        self.logon
    }

    /// Responses still owed by an interrupted call.
    #[must_use]
    pub fn owed(&self) -> usize {
        self.owed.len()
    }

    /// Resolve a handle reference against this session's table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` for missing slots.
    pub fn handle(&self, at: HandleRef) -> Result<u32> {
        self.handles.get(at)
    }

    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn connect(&mut self, config: &ConnectionConfig) -> Result<bool> {
        self.transport.connect(config).await
    }

    /// Release the server context and forget everything tied to it.
    ///
    /// # Errors
    ///
    /// Propagates transport failures; local state is reset either way.
    pub async fn disconnect(&mut self) -> Result<bool> {
        let result = self.transport.disconnect().await;
        self.handles.clear();
        self.owed.clear();
        self.logon = None;
        self.notifications.reset();
        info!("Session disconnected");
        result
    }

    /// Send `requests` with `handles` as the server object handle list in
    /// one round trip.
    ///
    /// An empty request list is a drain call.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` when the server reports `ecRpcFormat`,
    /// `Error::Wire` when the handle list is too short for the referenced
    /// indices or the response does not decode, and transport errors.
    pub async fn call(
        &mut self,
        requests: &[RopRequest],
        mut handles: Vec<u32>,
    ) -> Result<CallOutcome> {
        if requests.is_empty() {
            return self.drain().await;
        }
        if !self.owed.is_empty() {
            warn!(
                "Abandoning {} responses owed by the previous call",
                self.owed.len()
            );
            self.owed.clear();
        }

        if let [request] = requests
            && let Some(output) = request.output_handle_index()
        {
            let needed = usize::from(output) + 1;
            if handles.len() < needed {
                handles.resize(needed, UNSET_HANDLE);
            }
        }

        let required = requests
            .iter()
            .flat_map(RopRequest::handle_indices)
            .map(|index| usize::from(index) + 1)
            .max()
            .unwrap_or(0);
        if handles.len() < required {
            return Err(WireError::CountMismatch {
                field: "ServerObjectHandleTable",
                declared: required,
                actual: handles.len(),
            }
            .into());
        }

        let expected: Vec<RopId> = requests
            .iter()
            .filter(|r| r.expects_response())
            .map(RopRequest::rop_id)
            .collect();
        let chunk = Chunk {
            rops: encode_requests(requests)?,
            handles,
        };
        debug!(
            "Calling {} ROPs with {} handles",
            requests.len(),
            chunk.handles.len()
        );
        self.execute(&chunk, self.config.max_response_size, expected, false)
            .await
    }

    /// Issue an empty request to collect deferred responses and queued
    /// notifications.
    ///
    /// # Errors
    ///
    /// Same as [`Session::call`].
    pub async fn drain(&mut self) -> Result<CallOutcome> {
        let expected: Vec<RopId> = self.owed.drain(..).collect();
        let result = self
            .execute(
                &Chunk::default(),
                self.config.drain_response_size,
                expected.clone(),
                true,
            )
            .await;
        if result.is_err() {
            // Nothing was continued; the next drain asks again.
            self.owed = expected.into();
        }
        result
    }

    /// [`Session::call`] followed by drains until the response list no
    /// longer ends in `Pending`, at most `MaxDrainRounds` of them.
    ///
    /// Intermediate `Pending` markers are dropped. If the bound is reached
    /// the final marker stays in place.
    ///
    /// # Errors
    ///
    /// Same as [`Session::call`].
    pub async fn call_and_drain(
        &mut self,
        requests: &[RopRequest],
        handles: Vec<u32>,
    ) -> Result<CallOutcome> {
        let mut outcome = self.call(requests, handles).await?;
        let mut rounds = 0;
        while outcome.status == status::SUCCESS && outcome.is_pending() {
            if rounds >= self.config.max_drain_rounds {
                warn!("Response still pending after {} drains", rounds);
                break;
            }
            outcome.responses.pop();
            let next = self.drain().await?;
            rounds += 1;
            outcome.status = next.status;
            outcome.responses.extend(next.responses);
            outcome.rows.extend(next.rows);
            outcome.positional_rows.extend(next.positional_rows);
        }
        Ok(outcome)
    }

    async fn execute(
        &mut self,
        chunk: &Chunk,
        max_response_size: u32,
        expected: Vec<RopId>,
        drain: bool,
    ) -> Result<CallOutcome> {
        let request = encode_buffer(chunk, self.config.obfuscate)?;
        let RoundTrip { status, response } = self
            .transport
            .round_trip(&request, max_response_size)
            .await?;

        if status == status::RPC_FORMAT {
            return Err(Error::Format(status));
        }
        if status != status::SUCCESS {
            warn!("Execute failed with status {:#010x}", status);
            if drain {
                self.owed = expected.into();
            }
            return Ok(CallOutcome::failed(status));
        }

        let chunks = decode_chunks(&response)?;
        let mut decoded = Vec::with_capacity(chunks.len());
        let mut matched = 0;
        for chunk in chunks {
            let responses = decode_responses(&chunk.rops, &expected[matched..])?;
            matched += responses.iter().filter(|r| is_positional(r)).count();
            decoded.push((chunk.handles, responses));
        }

        for (i, (_, responses)) in decoded.iter().enumerate() {
            if i + 1 < decoded.len()
                && let Some(last) = responses.last()
                && last.rop_id().is_terminal()
            {
                return Err(WireError::MisplacedTerminal(last.rop_id()).into());
            }
            if responses
                .iter()
                .any(|r| r.return_value() == Some(status::RPC_FORMAT))
            {
                return Err(Error::Format(status::RPC_FORMAT));
            }
        }

        let mut rows = Vec::new();
        let mut positional_rows = Vec::new();
        let mut responses = Vec::new();
        for (handles, chunk_responses) in decoded {
            let answered = chunk_responses.iter().filter(|r| is_positional(r)).count();
            let terminal_only = answered == 0
                && chunk_responses.iter().any(|r| r.rop_id().is_terminal());
            // A drain that continues nothing leaves the table untouched, and
            // a chunk holding only a terminal marker names no new objects.
            if answered > 0 || !(drain || terminal_only) {
                let row = self.handles.append(handles);
                rows.push(row);
                positional_rows.extend(std::iter::repeat_n(row, answered));
            }
            responses.extend(chunk_responses);
        }

        let remaining = &expected[matched..];
        match responses.last().map(RopResponse::rop_id) {
            Some(RopId::Pending) => {
                debug!("Response pending, {} still owed", remaining.len());
                self.owed = remaining.iter().copied().collect();
            }
            Some(RopId::BufferTooSmall) => {
                warn!(
                    "Server could not fit the response; {} requests must be resent",
                    remaining.len()
                );
            }
            _ if !remaining.is_empty() => {
                return Err(Error::MissingResponses {
                    missing: remaining.len(),
                });
            }
            _ => {}
        }

        self.notifications.screen(&mut responses);
        Ok(CallOutcome {
            status,
            responses,
            rows,
            positional_rows,
        })
    }

    /// Call a single ROP, drain anything it deferred, and return its
    /// response with the row its handles landed in.
    async fn call_single(
        &mut self,
        request: RopRequest,
        handles: Vec<u32>,
    ) -> Result<(RopResponse, usize)> {
        let outcome = self
            .call_and_drain(std::slice::from_ref(&request), handles)
            .await?;
        if outcome.status != status::SUCCESS {
            return Err(Error::Rpc {
                call: "Execute",
                status: outcome.status,
            });
        }
        self.notifications
            .inbox
            .extend(outcome.notifications());
        let row = outcome
            .positional_rows
            .first()
            .copied()
            .ok_or(Error::MissingResponses { missing: 1 })?;
        let response = outcome
            .responses
            .into_iter()
            .find(is_positional)
            .ok_or(Error::MissingResponses { missing: 1 })?;
        Ok((response, row))
    }

    fn logon_ref(&self) -> Result<HandleRef> {
        self.logon.ok_or(Error::NotConnected)
    }

    /// Log on to the private mailbox named by `essdn`.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors. A refused or redirected logon is a
    /// reply with no value.
    pub async fn logon(&mut self, essdn: &str) -> Result<Reply<Logon>> {
        let request = RopRequest::Logon {
            logon_id: self.logon_id,
            output_handle_index: 0,
            logon_flags: LogonFlags::PRIVATE,
            open_flags: OpenFlags::USE_PER_MDB_REPLID_MAPPING,
            store_state: 0,
            essdn: essdn.to_string(),
        };
        let (response, row) = self.call_single(request, Vec::new()).await?;
        let RopResponse::Logon {
            return_value, body, ..
        } = response
        else {
            return Err(unexpected(RopId::Logon, &response));
        };

        let value = match body {
            LogonBody::Mailbox(mailbox) if return_value == status::SUCCESS => {
                let handle = HandleRef::new(row, 0);
                self.logon = Some(handle);
                info!("Logged on as {}", essdn);
                Some(Logon {
                    handle,
                    mailbox: *mailbox,
                })
            }
            LogonBody::Redirect { server_name, .. } => {
                warn!("Logon redirected to {}", server_name);
                None
            }
            _ => None,
        };
        Ok(Reply {
            rop: RopId::Logon,
            return_value,
            value,
        })
    }

    /// Open `folder_id` relative to `parent` (usually the logon).
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad parent.
    pub async fn open_folder(
        &mut self,
        parent: HandleRef,
        folder_id: u64,
    ) -> Result<Reply<Folder>> {
        let request = RopRequest::OpenFolder {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            folder_id,
            open_mode: OpenModeFlags::empty(),
        };
        let input = self.handles.get_set(parent)?;
        let (response, row) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::OpenFolder {
                return_value,
                folder,
                ..
            } => Ok(Reply {
                rop: RopId::OpenFolder,
                return_value,
                value: folder.map(|info| Folder {
                    handle: HandleRef::new(row, 1),
                    folder_id,
                    info: Some(info),
                }),
            }),
            other => Err(unexpected(RopId::OpenFolder, &other)),
        }
    }

    /// Create a folder named `name` under `parent`. `folder_type` is
    /// [`FOLDER_GENERIC`] or [`FOLDER_SEARCH`](crate::wire::FOLDER_SEARCH).
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad parent.
    pub async fn create_folder(
        &mut self,
        parent: HandleRef,
        name: &str,
        folder_type: u8,
    ) -> Result<Reply<Folder>> {
        let request = RopRequest::CreateFolder {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            folder_type,
            unicode: true,
            open_existing: false,
            display_name: name.to_string(),
            comment: String::new(),
        };
        let input = self.handles.get_set(parent)?;
        let (response, row) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::CreateFolder {
                return_value,
                folder,
                ..
            } => Ok(Reply {
                rop: RopId::CreateFolder,
                return_value,
                value: folder.map(|created| Folder {
                    handle: HandleRef::new(row, 1),
                    folder_id: created.folder_id,
                    info: created.existing,
                }),
            }),
            other => Err(unexpected(RopId::CreateFolder, &other)),
        }
    }

    /// Create an ordinary folder.
    ///
    /// # Errors
    ///
    /// See [`Session::create_folder`].
    pub async fn create_generic_folder(
        &mut self,
        parent: HandleRef,
        name: &str,
    ) -> Result<Reply<Folder>> {
        self.create_folder(parent, name, FOLDER_GENERIC).await
    }

    /// Hard-delete `folder_id`, a child of `parent`, with its contents.
    /// The value is the `PartialCompletion` flag.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad parent.
    pub async fn delete_folder(
        &mut self,
        parent: HandleRef,
        folder_id: u64,
    ) -> Result<Reply<bool>> {
        let request = RopRequest::DeleteFolder {
            logon_id: self.logon_id,
            input_handle_index: 0,
            flags: DeleteFolderFlags::DEL_MESSAGES
                | DeleteFolderFlags::DEL_FOLDERS
                | DeleteFolderFlags::HARD_DELETE,
            folder_id,
        };
        let input = self.handles.get_set(parent)?;
        let (response, _) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::DeleteFolder {
                return_value,
                partial_completion,
                ..
            } => Ok(Reply {
                rop: RopId::DeleteFolder,
                return_value,
                value: (return_value == status::SUCCESS).then_some(partial_completion),
            }),
            other => Err(unexpected(RopId::DeleteFolder, &other)),
        }
    }

    /// Open the hierarchy table of `folder`.
    ///
    /// Unless `flags` has `NO_NOTIFICATIONS` the table becomes an implicit
    /// `TableModified` subscription.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad folder.
    pub async fn hierarchy_table(
        &mut self,
        folder: HandleRef,
        flags: TableFlags,
    ) -> Result<Reply<Table>> {
        let request = RopRequest::GetHierarchyTable {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            table_flags: flags,
        };
        self.open_table(request, folder, flags).await
    }

    /// Open the contents table of `folder`. See
    /// [`Session::hierarchy_table`] for the notification behaviour.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad folder.
    pub async fn contents_table(
        &mut self,
        folder: HandleRef,
        flags: TableFlags,
    ) -> Result<Reply<Table>> {
        let request = RopRequest::GetContentsTable {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            table_flags: flags,
        };
        self.open_table(request, folder, flags).await
    }

    /// [`Session::contents_table`], retried while the table is locked.
    ///
    /// # Errors
    ///
    /// Same as [`Session::contents_table`]; exhaustion is not an error.
    pub async fn contents_table_with_retry(
        &mut self,
        folder: HandleRef,
        flags: TableFlags,
    ) -> Result<Reply<Table>> {
        let policy = RetryPolicy::from_config(&self.config);
        policy
            .run(
                async || self.contents_table(folder, flags).await,
                |reply| reply.is_one_of(TABLE_TRANSIENT),
            )
            .await
    }

    async fn open_table(
        &mut self,
        request: RopRequest,
        folder: HandleRef,
        flags: TableFlags,
    ) -> Result<Reply<Table>> {
        let rop = request.rop_id();
        let input = self.handles.get_set(folder)?;
        let (response, row) = self.call_single(request, vec![input]).await?;
        let (RopResponse::GetContentsTable {
            return_value,
            row_count,
            ..
        }
        | RopResponse::GetHierarchyTable {
            return_value,
            row_count,
            ..
        }) = response
        else {
            return Err(unexpected(rop, &response));
        };

        let value = match row_count {
            Some(row_count) if return_value == status::SUCCESS => {
                let handle = HandleRef::new(row, 1);
                let server_handle = self.handles.get(handle)?;
                if flags.contains(TableFlags::NO_NOTIFICATIONS) {
                    self.notifications.mute(server_handle);
                } else {
                    self.notifications.add(Subscription {
                        handle: server_handle,
                        at: handle,
                        types: NotificationTypes::TABLE_MODIFIED,
                        scope: Scope::Table,
                    });
                }
                Some(Table { handle, row_count })
            }
            _ => None,
        };
        Ok(Reply {
            rop,
            return_value,
            value,
        })
    }

    /// Create a message in `folder_id`; `parent` is the folder (or logon)
    /// handle the request acts on.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad parent.
    pub async fn create_message(
        &mut self,
        parent: HandleRef,
        folder_id: u64,
    ) -> Result<Reply<HandleRef>> {
        let request = RopRequest::CreateMessage {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            code_page: DEFAULT_CODE_PAGE,
            folder_id,
            associated: false,
        };
        let input = self.handles.get_set(parent)?;
        let (response, row) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::CreateMessage { return_value, .. } => Ok(Reply {
                rop: RopId::CreateMessage,
                return_value,
                value: (return_value == status::SUCCESS).then_some(HandleRef::new(row, 1)),
            }),
            other => Err(unexpected(RopId::CreateMessage, &other)),
        }
    }

    /// Commit a message; the value is its message id.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad message.
    pub async fn save_message(&mut self, message: HandleRef) -> Result<Reply<u64>> {
        let request = RopRequest::SaveChangesMessage {
            logon_id: self.logon_id,
            response_handle_index: 0,
            input_handle_index: 0,
            save_flags: SaveFlags::KEEP_OPEN_READ_WRITE,
        };
        let input = self.handles.get_set(message)?;
        let (response, _) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::SaveChangesMessage {
                return_value,
                saved,
                ..
            } => Ok(Reply {
                rop: RopId::SaveChangesMessage,
                return_value,
                value: saved.map(|saved| saved.message_id),
            }),
            other => Err(unexpected(RopId::SaveChangesMessage, &other)),
        }
    }

    /// Choose the columns of `table`; the value is the table status.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad table.
    pub async fn set_columns(&mut self, table: HandleRef, tags: &[u32]) -> Result<Reply<u8>> {
        let request = RopRequest::SetColumns {
            logon_id: self.logon_id,
            input_handle_index: 0,
            flags: 0,
            tags: tags.to_vec(),
        };
        self.table_status_request(request, table).await
    }

    /// Current status of `table`.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad table.
    pub async fn table_status(&mut self, table: HandleRef) -> Result<Reply<u8>> {
        let request = RopRequest::GetStatus {
            logon_id: self.logon_id,
            input_handle_index: 0,
        };
        self.table_status_request(request, table).await
    }

    async fn table_status_request(
        &mut self,
        request: RopRequest,
        table: HandleRef,
    ) -> Result<Reply<u8>> {
        let rop = request.rop_id();
        let input = self.handles.get_set(table)?;
        let (response, _) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::SetColumns {
                return_value,
                table_status,
                ..
            }
            | RopResponse::GetStatus {
                return_value,
                table_status,
                ..
            } => Ok(Reply {
                rop,
                return_value,
                value: table_status,
            }),
            other => Err(unexpected(rop, &other)),
        }
    }

    /// Set the restriction and scope of the search folder `folder`.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad folder.
    pub async fn set_search_criteria(
        &mut self,
        folder: HandleRef,
        restriction: &[u8],
        folder_ids: &[u64],
        flags: SearchFlags,
    ) -> Result<Reply<()>> {
        let request = RopRequest::SetSearchCriteria {
            logon_id: self.logon_id,
            input_handle_index: 0,
            restriction: restriction.to_vec(),
            folder_ids: folder_ids.to_vec(),
            search_flags: flags,
        };
        let input = self.handles.get_set(folder)?;
        let (response, _) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::SetSearchCriteria { return_value, .. } => Ok(Reply {
                rop: RopId::SetSearchCriteria,
                return_value,
                value: (return_value == status::SUCCESS).then_some(()),
            }),
            other => Err(unexpected(RopId::SetSearchCriteria, &other)),
        }
    }

    /// [`Session::set_search_criteria`], retried while the store is not
    /// ready to search.
    ///
    /// # Errors
    ///
    /// Same as [`Session::set_search_criteria`]; exhaustion is not an
    /// error.
    pub async fn set_search_criteria_with_retry(
        &mut self,
        folder: HandleRef,
        restriction: &[u8],
        folder_ids: &[u64],
        flags: SearchFlags,
    ) -> Result<Reply<()>> {
        let policy = RetryPolicy::from_config(&self.config);
        policy
            .run(
                async || {
                    self.set_search_criteria(folder, restriction, folder_ids, flags)
                        .await
                },
                |reply| reply.is_one_of(SEARCH_TRANSIENT),
            )
            .await
    }

    /// Open the rules table of `folder`.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad folder.
    pub async fn rules_table(&mut self, folder: HandleRef) -> Result<Reply<HandleRef>> {
        let request = RopRequest::GetRulesTable {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            table_flags: TableFlags::empty(),
        };
        let input = self.handles.get_set(folder)?;
        let (response, row) = self.call_single(request, vec![input]).await?;
        match response {
            RopResponse::GetRulesTable { return_value, .. } => Ok(Reply {
                rop: RopId::GetRulesTable,
                return_value,
                value: (return_value == status::SUCCESS).then_some(HandleRef::new(row, 1)),
            }),
            other => Err(unexpected(RopId::GetRulesTable, &other)),
        }
    }

    /// Release the server object behind `at`. Subscriptions tied to it
    /// are forgotten.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors and `InvalidHandle` for a bad handle.
    pub async fn release(&mut self, at: HandleRef) -> Result<()> {
        let handle = self.handles.get_set(at)?;
        let request = RopRequest::Release {
            logon_id: self.logon_id,
            input_handle_index: 0,
        };
        let outcome = self.call(&[request], vec![handle]).await?;
        self.notifications.forget(handle);
        if outcome.status != status::SUCCESS {
            return Err(Error::Rpc {
                call: "Execute",
                status: outcome.status,
            });
        }
        if self.logon == Some(at) {
            self.logon = None;
        }
        Ok(())
    }

    /// Register for `types` events in `scope`, through the logon object.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` before a successful logon, plus dispatcher
    /// errors.
    pub async fn subscribe(
        &mut self,
        types: NotificationTypes,
        scope: Scope,
    ) -> Result<Reply<Subscription>> {
        let logon = self.logon_ref()?;
        let target = match scope {
            Scope::WholeStore | Scope::Table => None,
            Scope::Folder(folder_id) => Some((folder_id, 0)),
            Scope::Message(folder_id, message_id) => Some((folder_id, message_id)),
        };
        let request = RopRequest::RegisterNotification {
            logon_id: self.logon_id,
            input_handle_index: 0,
            output_handle_index: 1,
            types,
            target,
        };
        let input = self.handles.get_set(logon)?;
        let (response, row) = self.call_single(request, vec![input]).await?;
        let RopResponse::RegisterNotification { return_value, .. } = response else {
            return Err(unexpected(RopId::RegisterNotification, &response));
        };
        let value = if return_value == status::SUCCESS {
            let at = HandleRef::new(row, 1);
            let subscription = Subscription {
                handle: self.handles.get(at)?,
                at,
                types,
                scope,
            };
            info!(
                "Subscribed to {:?} in {:?} as {:#010x}",
                types, scope, subscription.handle
            );
            self.notifications.add(subscription.clone());
            Some(subscription)
        } else {
            None
        };
        Ok(Reply {
            rop: RopId::RegisterNotification,
            return_value,
            value,
        })
    }
}

fn unexpected(expected: RopId, actual: &RopResponse) -> Error {
    Error::UnexpectedResponse {
        expected: Some(expected),
        actual: actual.rop_id(),
    }
}

/// Which half of a linked pair is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// The session that subscribes and receives events.
    Register,
    /// The session that performs the operations raising them.
    Trigger,
}

/// Two sessions on one mailbox: one watches, the other acts.
#[derive(Debug)]
pub struct LinkedSessions<T: Transport> {
    register: Session<T>,
    trigger: Session<T>,
    active: Role,
}

impl<T: Transport> LinkedSessions<T> {
    #[must_use]
    pub const fn new(register: Session<T>, trigger: Session<T>) -> Self {
        Self {
            register,
            trigger,
            active: Role::Register,
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.active
    }

    /// Make the other session the active one and return its role.
    pub fn switch_session_context(&mut self) -> Role {
        self.active = match self.active {
            Role::Register => Role::Trigger,
            Role::Trigger => Role::Register,
        };
        debug!("Active session is now {:?}", self.active);
        self.active
    }

    pub const fn active(&mut self) -> &mut Session<T> {
        match self.active {
            Role::Register => &mut self.register,
            Role::Trigger => &mut self.trigger,
        }
    }

    pub const fn register(&mut self) -> &mut Session<T> {
        &mut self.register
    }

    pub const fn trigger(&mut self) -> &mut Session<T> {
        &mut self.trigger
    }

    #[must_use]
    pub fn into_inner(self) -> (Session<T>, Session<T>) {
        (self.register, self.trigger)
    }
}
