//! ROP requests and responses
//!
//! Requests and responses are closed sum types keyed by ROP id. A
//! request list is self-describing; a response list is decoded
//! positionally against the ids of the requests that produced it, with
//! `Notify` records interleaved anywhere and `Pending` / `BufferTooSmall`
//! allowed only as the final element.

use super::{NotificationData, Reader, Writer, to_u16};
use crate::error::{Error, WireError};
use crate::flag::{
    DeleteFolderFlags, LogonFlags, NotificationTypes, OpenFlags, OpenModeFlags, SaveFlags,
    SearchFlags, TableFlags,
};
use crate::folder::SpecialFolder;
use crate::status;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;

/// Number of folder ids in a private-mailbox logon response.
pub const SPECIAL_FOLDER_COUNT: usize = 13;

/// `FolderType` of `RopCreateFolder`: an ordinary folder.
pub const FOLDER_GENERIC: u8 = 0x01;
/// `FolderType` of `RopCreateFolder`: a search folder.
pub const FOLDER_SEARCH: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum RopId {
    Release = 0x01,
    OpenFolder = 0x02,
    GetHierarchyTable = 0x04,
    GetContentsTable = 0x05,
    CreateMessage = 0x06,
    SaveChangesMessage = 0x0C,
    SetColumns = 0x12,
    GetStatus = 0x16,
    CreateFolder = 0x1C,
    DeleteFolder = 0x1D,
    RegisterNotification = 0x29,
    Notify = 0x2A,
    SetSearchCriteria = 0x30,
    GetRulesTable = 0x3F,
    Pending = 0x6E,
    Logon = 0xFE,
    BufferTooSmall = 0xFF,
}

impl RopId {
    /// `Pending` and `BufferTooSmall` end a response list.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Pending | Self::BufferTooSmall)
    }
}

impl TryFrom<u8> for RopId {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::Release,
            0x02 => Self::OpenFolder,
            0x04 => Self::GetHierarchyTable,
            0x05 => Self::GetContentsTable,
            0x06 => Self::CreateMessage,
            0x0C => Self::SaveChangesMessage,
            0x12 => Self::SetColumns,
            0x16 => Self::GetStatus,
            0x1C => Self::CreateFolder,
            0x1D => Self::DeleteFolder,
            0x29 => Self::RegisterNotification,
            0x2A => Self::Notify,
            0x30 => Self::SetSearchCriteria,
            0x3F => Self::GetRulesTable,
            0x6E => Self::Pending,
            0xFE => Self::Logon,
            0xFF => Self::BufferTooSmall,
            other => return Err(WireError::UnknownRop(other)),
        })
    }
}

/// A single ROP request.
///
/// Handle indices point into the handle list sent alongside the request
/// buffer, not into the session's handle table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rop")]
pub enum RopRequest {
    Release {
        logon_id: u8,
        input_handle_index: u8,
    },
    OpenFolder {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        folder_id: u64,
        open_mode: OpenModeFlags,
    },
    GetHierarchyTable {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        table_flags: TableFlags,
    },
    GetContentsTable {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        table_flags: TableFlags,
    },
    CreateMessage {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        code_page: u16,
        folder_id: u64,
        associated: bool,
    },
    SaveChangesMessage {
        logon_id: u8,
        response_handle_index: u8,
        input_handle_index: u8,
        save_flags: SaveFlags,
    },
    SetColumns {
        logon_id: u8,
        input_handle_index: u8,
        flags: u8,
        tags: Vec<u32>,
    },
    GetStatus {
        logon_id: u8,
        input_handle_index: u8,
    },
    CreateFolder {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        folder_type: u8,
        unicode: bool,
        open_existing: bool,
        display_name: String,
        comment: String,
    },
    DeleteFolder {
        logon_id: u8,
        input_handle_index: u8,
        flags: DeleteFolderFlags,
        folder_id: u64,
    },
    /// `target` is `None` for whole-store subscriptions, otherwise
    /// `(folder_id, message_id)`.
    RegisterNotification {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        types: NotificationTypes,
        target: Option<(u64, u64)>,
    },
    SetSearchCriteria {
        logon_id: u8,
        input_handle_index: u8,
        restriction: Vec<u8>,
        folder_ids: Vec<u64>,
        search_flags: SearchFlags,
    },
    GetRulesTable {
        logon_id: u8,
        input_handle_index: u8,
        output_handle_index: u8,
        table_flags: TableFlags,
    },
    Logon {
        logon_id: u8,
        output_handle_index: u8,
        logon_flags: LogonFlags,
        open_flags: OpenFlags,
        store_state: u32,
        essdn: String,
    },
}

impl RopRequest {
    #[must_use]
    pub const fn rop_id(&self) -> RopId {
        match self {
            Self::Release { .. } => RopId::Release,
            Self::OpenFolder { .. } => RopId::OpenFolder,
            Self::GetHierarchyTable { .. } => RopId::GetHierarchyTable,
            Self::GetContentsTable { .. } => RopId::GetContentsTable,
            Self::CreateMessage { .. } => RopId::CreateMessage,
            Self::SaveChangesMessage { .. } => RopId::SaveChangesMessage,
            Self::SetColumns { .. } => RopId::SetColumns,
            Self::GetStatus { .. } => RopId::GetStatus,
            Self::CreateFolder { .. } => RopId::CreateFolder,
            Self::DeleteFolder { .. } => RopId::DeleteFolder,
            Self::RegisterNotification { .. } => RopId::RegisterNotification,
            Self::SetSearchCriteria { .. } => RopId::SetSearchCriteria,
            Self::GetRulesTable { .. } => RopId::GetRulesTable,
            Self::Logon { .. } => RopId::Logon,
        }
    }

    #[must_use]
    pub const fn logon_id(&self) -> u8 {
        match self {
            Self::Release { logon_id, .. }
            | Self::OpenFolder { logon_id, .. }
            | Self::GetHierarchyTable { logon_id, .. }
            | Self::GetContentsTable { logon_id, .. }
            | Self::CreateMessage { logon_id, .. }
            | Self::SaveChangesMessage { logon_id, .. }
            | Self::SetColumns { logon_id, .. }
            | Self::GetStatus { logon_id, .. }
            | Self::CreateFolder { logon_id, .. }
            | Self::DeleteFolder { logon_id, .. }
            | Self::RegisterNotification { logon_id, .. }
            | Self::SetSearchCriteria { logon_id, .. }
            | Self::GetRulesTable { logon_id, .. }
            | Self::Logon { logon_id, .. } => *logon_id,
        }
    }

    /// Slot of the object the request acts on. `Logon` has none.
    #[must_use]
    pub const fn input_handle_index(&self) -> Option<u8> {
        match self {
            Self::Release {
                input_handle_index, ..
            }
            | Self::OpenFolder {
                input_handle_index, ..
            }
            | Self::GetHierarchyTable {
                input_handle_index, ..
            }
            | Self::GetContentsTable {
                input_handle_index, ..
            }
            | Self::CreateMessage {
                input_handle_index, ..
            }
            | Self::SaveChangesMessage {
                input_handle_index, ..
            }
            | Self::SetColumns {
                input_handle_index, ..
            }
            | Self::GetStatus {
                input_handle_index, ..
            }
            | Self::CreateFolder {
                input_handle_index, ..
            }
            | Self::DeleteFolder {
                input_handle_index, ..
            }
            | Self::RegisterNotification {
                input_handle_index, ..
            }
            | Self::SetSearchCriteria {
                input_handle_index, ..
            }
            | Self::GetRulesTable {
                input_handle_index, ..
            } => Some(*input_handle_index),
            Self::Logon { .. } => None,
        }
    }

    /// Slot the server fills with a newly created object handle.
    #[must_use]
    pub const fn output_handle_index(&self) -> Option<u8> {
        match self {
            Self::OpenFolder {
                output_handle_index,
                ..
            }
            | Self::GetHierarchyTable {
                output_handle_index,
                ..
            }
            | Self::GetContentsTable {
                output_handle_index,
                ..
            }
            | Self::CreateMessage {
                output_handle_index,
                ..
            }
            | Self::CreateFolder {
                output_handle_index,
                ..
            }
            | Self::RegisterNotification {
                output_handle_index,
                ..
            }
            | Self::GetRulesTable {
                output_handle_index,
                ..
            }
            | Self::Logon {
                output_handle_index,
                ..
            } => Some(*output_handle_index),
            _ => None,
        }
    }

    /// Every handle-list index the request references.
    pub fn handle_indices(&self) -> impl Iterator<Item = u8> {
        let response = match self {
            Self::SaveChangesMessage {
                response_handle_index,
                ..
            } => Some(*response_handle_index),
            _ => None,
        };
        [
            self.input_handle_index(),
            self.output_handle_index(),
            response,
        ]
        .into_iter()
        .flatten()
    }

    /// `RopRelease` is the only request the server never answers.
    #[must_use]
    pub const fn expects_response(&self) -> bool {
        !matches!(self, Self::Release { .. })
    }

    /// # Errors
    ///
    /// Returns `TooLarge` when a count-prefixed field overflows its prefix.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.u8(self.rop_id() as u8);
        w.u8(self.logon_id());
        match self {
            Self::Release {
                input_handle_index, ..
            }
            | Self::GetStatus {
                input_handle_index, ..
            } => w.u8(*input_handle_index),
            Self::OpenFolder {
                input_handle_index,
                output_handle_index,
                folder_id,
                open_mode,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u8(*output_handle_index);
                w.u64(*folder_id);
                w.u8(open_mode.bits());
            }
            Self::GetHierarchyTable {
                input_handle_index,
                output_handle_index,
                table_flags,
                ..
            }
            | Self::GetContentsTable {
                input_handle_index,
                output_handle_index,
                table_flags,
                ..
            }
            | Self::GetRulesTable {
                input_handle_index,
                output_handle_index,
                table_flags,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u8(*output_handle_index);
                w.u8(table_flags.bits());
            }
            Self::CreateMessage {
                input_handle_index,
                output_handle_index,
                code_page,
                folder_id,
                associated,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u8(*output_handle_index);
                w.u16(*code_page);
                w.u64(*folder_id);
                w.u8(u8::from(*associated));
            }
            Self::SaveChangesMessage {
                response_handle_index,
                input_handle_index,
                save_flags,
                ..
            } => {
                w.u8(*response_handle_index);
                w.u8(*input_handle_index);
                w.u8(save_flags.bits());
            }
            Self::SetColumns {
                input_handle_index,
                flags,
                tags,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u8(*flags);
                w.u16(to_u16(tags.len(), "PropertyTagCount")?);
                for tag in tags {
                    w.u32(*tag);
                }
            }
            Self::CreateFolder {
                input_handle_index,
                output_handle_index,
                folder_type,
                unicode,
                open_existing,
                display_name,
                comment,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u8(*output_handle_index);
                w.u8(*folder_type);
                w.u8(u8::from(*unicode));
                w.u8(u8::from(*open_existing));
                w.u8(0);
                for text in [display_name, comment] {
                    if *unicode {
                        w.utf16_z(text);
                    } else {
                        w.ascii_z(text);
                    }
                }
            }
            Self::DeleteFolder {
                input_handle_index,
                flags,
                folder_id,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u8(flags.bits());
                w.u64(*folder_id);
            }
            Self::RegisterNotification {
                input_handle_index,
                output_handle_index,
                types,
                target,
                ..
            } => {
                let wire_types =
                    u8::try_from(types.bits()).map_err(|_| WireError::TooLarge {
                        field: "NotificationTypes",
                        size: usize::from(types.bits()),
                    })?;
                w.u8(*input_handle_index);
                w.u8(*output_handle_index);
                w.u8(wire_types);
                w.u8(0);
                w.u8(u8::from(target.is_none()));
                if let Some((folder_id, message_id)) = target {
                    w.u64(*folder_id);
                    w.u64(*message_id);
                }
            }
            Self::SetSearchCriteria {
                input_handle_index,
                restriction,
                folder_ids,
                search_flags,
                ..
            } => {
                w.u8(*input_handle_index);
                w.u16(to_u16(restriction.len(), "RestrictionDataSize")?);
                w.bytes(restriction);
                w.u16(to_u16(folder_ids.len(), "FolderIdCount")?);
                for id in folder_ids {
                    w.u64(*id);
                }
                w.u32(search_flags.bits());
            }
            Self::Logon {
                output_handle_index,
                logon_flags,
                open_flags,
                store_state,
                essdn,
                ..
            } => {
                w.u8(*output_handle_index);
                w.u8(logon_flags.bits());
                w.u32(open_flags.bits());
                w.u32(*store_state);
                if essdn.is_empty() {
                    w.u16(0);
                } else {
                    w.u16(to_u16(essdn.len() + 1, "EssdnSize")?);
                    w.ascii_z(essdn);
                }
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on unknown or response-only ROP ids and on truncated input.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let raw = r.u8()?;
        let id = RopId::try_from(raw)?;
        let logon_id = r.u8()?;
        Ok(match id {
            RopId::Release => Self::Release {
                logon_id,
                input_handle_index: r.u8()?,
            },
            RopId::GetStatus => Self::GetStatus {
                logon_id,
                input_handle_index: r.u8()?,
            },
            RopId::OpenFolder => Self::OpenFolder {
                logon_id,
                input_handle_index: r.u8()?,
                output_handle_index: r.u8()?,
                folder_id: r.u64()?,
                open_mode: OpenModeFlags::from_bits_retain(r.u8()?),
            },
            RopId::GetHierarchyTable => Self::GetHierarchyTable {
                logon_id,
                input_handle_index: r.u8()?,
                output_handle_index: r.u8()?,
                table_flags: TableFlags::from_bits_retain(r.u8()?),
            },
            RopId::GetContentsTable => Self::GetContentsTable {
                logon_id,
                input_handle_index: r.u8()?,
                output_handle_index: r.u8()?,
                table_flags: TableFlags::from_bits_retain(r.u8()?),
            },
            RopId::GetRulesTable => Self::GetRulesTable {
                logon_id,
                input_handle_index: r.u8()?,
                output_handle_index: r.u8()?,
                table_flags: TableFlags::from_bits_retain(r.u8()?),
            },
            RopId::CreateMessage => Self::CreateMessage {
                logon_id,
                input_handle_index: r.u8()?,
                output_handle_index: r.u8()?,
                code_page: r.u16()?,
                folder_id: r.u64()?,
                associated: r.u8()? != 0,
            },
            RopId::SaveChangesMessage => Self::SaveChangesMessage {
                logon_id,
                response_handle_index: r.u8()?,
                input_handle_index: r.u8()?,
                save_flags: SaveFlags::from_bits_retain(r.u8()?),
            },
            RopId::SetColumns => {
                let input_handle_index = r.u8()?;
                let flags = r.u8()?;
                let count = r.u16()?;
                let mut tags = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    tags.push(r.u32()?);
                }
                Self::SetColumns {
                    logon_id,
                    input_handle_index,
                    flags,
                    tags,
                }
            }
            RopId::CreateFolder => {
                let input_handle_index = r.u8()?;
                let output_handle_index = r.u8()?;
                let folder_type = r.u8()?;
                let unicode = r.u8()? != 0;
                let open_existing = r.u8()? != 0;
                let _reserved = r.u8()?;
                let (display_name, comment) = if unicode {
                    (r.utf16_z("DisplayName")?, r.utf16_z("Comment")?)
                } else {
                    (r.ascii_z("DisplayName")?, r.ascii_z("Comment")?)
                };
                Self::CreateFolder {
                    logon_id,
                    input_handle_index,
                    output_handle_index,
                    folder_type,
                    unicode,
                    open_existing,
                    display_name,
                    comment,
                }
            }
            RopId::DeleteFolder => Self::DeleteFolder {
                logon_id,
                input_handle_index: r.u8()?,
                flags: DeleteFolderFlags::from_bits_retain(r.u8()?),
                folder_id: r.u64()?,
            },
            RopId::RegisterNotification => {
                let input_handle_index = r.u8()?;
                let output_handle_index = r.u8()?;
                let types = NotificationTypes::from_bits_retain(u16::from(r.u8()?));
                let _reserved = r.u8()?;
                let whole_store = r.u8()? != 0;
                let target = if whole_store {
                    None
                } else {
                    Some((r.u64()?, r.u64()?))
                };
                Self::RegisterNotification {
                    logon_id,
                    input_handle_index,
                    output_handle_index,
                    types,
                    target,
                }
            }
            RopId::SetSearchCriteria => {
                let input_handle_index = r.u8()?;
                let size = usize::from(r.u16()?);
                let restriction = r.take(size)?.to_vec();
                let count = r.u16()?;
                let mut folder_ids = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    folder_ids.push(r.u64()?);
                }
                Self::SetSearchCriteria {
                    logon_id,
                    input_handle_index,
                    restriction,
                    folder_ids,
                    search_flags: SearchFlags::from_bits_retain(r.u32()?),
                }
            }
            RopId::Logon => {
                let output_handle_index = r.u8()?;
                let logon_flags = LogonFlags::from_bits_retain(r.u8()?);
                let open_flags = OpenFlags::from_bits_retain(r.u32()?);
                let store_state = r.u32()?;
                let size = usize::from(r.u16()?);
                let essdn = if size == 0 {
                    String::new()
                } else {
                    sized_ascii(r.take(size)?, "Essdn")?
                };
                Self::Logon {
                    logon_id,
                    output_handle_index,
                    logon_flags,
                    open_flags,
                    store_state,
                    essdn,
                }
            }
            RopId::Notify | RopId::Pending | RopId::BufferTooSmall => {
                return Err(WireError::UnknownRop(raw));
            }
        })
    }
}

/// Ghosted-folder replica servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GhostInfo {
    pub cheap_server_count: u16,
    pub servers: Vec<String>,
}

impl GhostInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let server_count = r.u16()?;
        let cheap_server_count = r.u16()?;
        if cheap_server_count > server_count {
            return Err(WireError::CountMismatch {
                field: "CheapServerCount",
                declared: usize::from(cheap_server_count),
                actual: usize::from(server_count),
            });
        }
        let mut servers = Vec::with_capacity(usize::from(server_count));
        for _ in 0..server_count {
            servers.push(r.ascii_z("Servers")?);
        }
        Ok(Self {
            cheap_server_count,
            servers,
        })
    }

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        let server_count = to_u16(self.servers.len(), "ServerCount")?;
        if self.cheap_server_count > server_count {
            return Err(WireError::CountMismatch {
                field: "CheapServerCount",
                declared: usize::from(self.cheap_server_count),
                actual: self.servers.len(),
            });
        }
        w.u16(server_count);
        w.u16(self.cheap_server_count);
        for server in &self.servers {
            w.ascii_z(server);
        }
        Ok(())
    }
}

/// Folder attributes returned when a folder is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderInfo {
    pub has_rules: bool,
    /// Present when the folder is ghosted.
    pub ghost: Option<GhostInfo>,
}

impl FolderInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let has_rules = r.u8()? != 0;
        let ghosted = r.u8()? != 0;
        let ghost = if ghosted {
            Some(GhostInfo::decode(r)?)
        } else {
            None
        };
        Ok(Self { has_rules, ghost })
    }

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.u8(u8::from(self.has_rules));
        w.u8(u8::from(self.ghost.is_some()));
        if let Some(ghost) = &self.ghost {
            ghost.encode(w)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedFolder {
    pub folder_id: u64,
    /// Present when `open_existing` matched a folder that already existed.
    pub existing: Option<FolderInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SavedMessage {
    pub input_handle_index: u8,
    pub message_id: u64,
}

/// Logon timestamp as broken-down fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogonTime {
    pub seconds: u8,
    pub minutes: u8,
    pub hour: u8,
    pub day_of_week: u8,
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

impl LogonTime {
    /// `None` if the fields don't form a valid calendar date.
    #[must_use]
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minutes),
            u32::from(self.seconds),
        )
    }

    /// `None` for years outside `0..=65535`.
    #[must_use]
    pub fn from_naive(time: NaiveDateTime) -> Option<Self> {
        let narrow = |v: u32| u8::try_from(v).ok();
        Some(Self {
            seconds: narrow(time.second())?,
            minutes: narrow(time.minute())?,
            hour: narrow(time.hour())?,
            day_of_week: narrow(time.weekday().num_days_from_sunday())?,
            day: narrow(time.day())?,
            month: narrow(time.month())?,
            year: u16::try_from(time.year()).ok()?,
        })
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            seconds: r.u8()?,
            minutes: r.u8()?,
            hour: r.u8()?,
            day_of_week: r.u8()?,
            day: r.u8()?,
            month: r.u8()?,
            year: r.u16()?,
        })
    }

    fn encode(self, w: &mut Writer) {
        w.u8(self.seconds);
        w.u8(self.minutes);
        w.u8(self.hour);
        w.u8(self.day_of_week);
        w.u8(self.day);
        w.u8(self.month);
        w.u16(self.year);
    }
}

/// Successful private-mailbox logon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogonResponse {
    pub logon_flags: LogonFlags,
    pub folder_ids: [u64; SPECIAL_FOLDER_COUNT],
    pub response_flags: u8,
    pub mailbox_guid: [u8; 16],
    pub replica_id: u16,
    pub replica_guid: [u8; 16],
    pub logon_time: LogonTime,
    pub gwart_time: u64,
    pub store_state: u32,
}

impl LogonResponse {
    #[must_use]
    pub const fn folder_id(&self, folder: SpecialFolder) -> u64 {
        self.folder_ids[folder.index()]
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let logon_flags = LogonFlags::from_bits_retain(r.u8()?);
        let mut folder_ids = [0u64; SPECIAL_FOLDER_COUNT];
        for id in &mut folder_ids {
            *id = r.u64()?;
        }
        Ok(Self {
            logon_flags,
            folder_ids,
            response_flags: r.u8()?,
            mailbox_guid: r.array()?,
            replica_id: r.u16()?,
            replica_guid: r.array()?,
            logon_time: LogonTime::decode(r)?,
            gwart_time: r.u64()?,
            store_state: r.u32()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.u8(self.logon_flags.bits());
        for id in self.folder_ids {
            w.u64(id);
        }
        w.u8(self.response_flags);
        w.bytes(&self.mailbox_guid);
        w.u16(self.replica_id);
        w.bytes(&self.replica_guid);
        self.logon_time.encode(w);
        w.u64(self.gwart_time);
        w.u32(self.store_state);
    }
}

/// Body of a `RopLogon` response, shaped by its return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LogonBody {
    Mailbox(Box<LogonResponse>),
    /// `ecWrongServer`: retry against `server_name`.
    Redirect {
        logon_flags: LogonFlags,
        server_name: String,
    },
    Failed,
}

/// A single ROP response.
///
/// Bodies wrapped in `Option` are present exactly when `return_value` is
/// zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rop")]
pub enum RopResponse {
    OpenFolder {
        handle_index: u8,
        return_value: u32,
        folder: Option<FolderInfo>,
    },
    GetHierarchyTable {
        handle_index: u8,
        return_value: u32,
        row_count: Option<u32>,
    },
    GetContentsTable {
        handle_index: u8,
        return_value: u32,
        row_count: Option<u32>,
    },
    /// On success `message_id` mirrors `HasMessageId`.
    CreateMessage {
        handle_index: u8,
        return_value: u32,
        message_id: Option<u64>,
    },
    SaveChangesMessage {
        handle_index: u8,
        return_value: u32,
        saved: Option<SavedMessage>,
    },
    SetColumns {
        handle_index: u8,
        return_value: u32,
        table_status: Option<u8>,
    },
    GetStatus {
        handle_index: u8,
        return_value: u32,
        table_status: Option<u8>,
    },
    CreateFolder {
        handle_index: u8,
        return_value: u32,
        folder: Option<CreatedFolder>,
    },
    /// `partial_completion` is sent whatever the return value.
    DeleteFolder {
        handle_index: u8,
        return_value: u32,
        partial_completion: bool,
    },
    RegisterNotification {
        handle_index: u8,
        return_value: u32,
    },
    Notify {
        notification_handle: u32,
        logon_id: u8,
        data: Box<NotificationData>,
    },
    SetSearchCriteria {
        handle_index: u8,
        return_value: u32,
    },
    GetRulesTable {
        handle_index: u8,
        return_value: u32,
    },
    Pending {
        session_index: u16,
    },
    Logon {
        handle_index: u8,
        return_value: u32,
        body: LogonBody,
    },
    BufferTooSmall {
        size_needed: u16,
        request_buffers: Vec<u8>,
    },
}

impl RopResponse {
    #[must_use]
    pub const fn rop_id(&self) -> RopId {
        match self {
            Self::OpenFolder { .. } => RopId::OpenFolder,
            Self::GetHierarchyTable { .. } => RopId::GetHierarchyTable,
            Self::GetContentsTable { .. } => RopId::GetContentsTable,
            Self::CreateMessage { .. } => RopId::CreateMessage,
            Self::SaveChangesMessage { .. } => RopId::SaveChangesMessage,
            Self::SetColumns { .. } => RopId::SetColumns,
            Self::GetStatus { .. } => RopId::GetStatus,
            Self::CreateFolder { .. } => RopId::CreateFolder,
            Self::DeleteFolder { .. } => RopId::DeleteFolder,
            Self::RegisterNotification { .. } => RopId::RegisterNotification,
            Self::Notify { .. } => RopId::Notify,
            Self::SetSearchCriteria { .. } => RopId::SetSearchCriteria,
            Self::GetRulesTable { .. } => RopId::GetRulesTable,
            Self::Pending { .. } => RopId::Pending,
            Self::Logon { .. } => RopId::Logon,
            Self::BufferTooSmall { .. } => RopId::BufferTooSmall,
        }
    }

    /// Handle index and return value; `None` for `Notify` and the
    /// terminal markers.
    #[must_use]
    pub const fn header(&self) -> Option<(u8, u32)> {
        match self {
            Self::OpenFolder {
                handle_index,
                return_value,
                ..
            }
            | Self::GetHierarchyTable {
                handle_index,
                return_value,
                ..
            }
            | Self::GetContentsTable {
                handle_index,
                return_value,
                ..
            }
            | Self::CreateMessage {
                handle_index,
                return_value,
                ..
            }
            | Self::SaveChangesMessage {
                handle_index,
                return_value,
                ..
            }
            | Self::SetColumns {
                handle_index,
                return_value,
                ..
            }
            | Self::GetStatus {
                handle_index,
                return_value,
                ..
            }
            | Self::CreateFolder {
                handle_index,
                return_value,
                ..
            }
            | Self::DeleteFolder {
                handle_index,
                return_value,
                ..
            }
            | Self::RegisterNotification {
                handle_index,
                return_value,
            }
            | Self::SetSearchCriteria {
                handle_index,
                return_value,
            }
            | Self::GetRulesTable {
                handle_index,
                return_value,
            }
            | Self::Logon {
                handle_index,
                return_value,
                ..
            } => Some((*handle_index, *return_value)),
            Self::Notify { .. } | Self::Pending { .. } | Self::BufferTooSmall { .. } => None,
        }
    }

    #[must_use]
    pub const fn return_value(&self) -> Option<u32> {
        match self.header() {
            Some((_, value)) => Some(value),
            None => None,
        }
    }

    #[must_use]
    pub const fn handle_index(&self) -> Option<u8> {
        match self.header() {
            Some((index, _)) => Some(index),
            None => None,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Build an error response carrying no body for a failed request.
    ///
    /// Returns `None` for ROPs that have no response.
    #[must_use]
    pub const fn failure(id: RopId, handle_index: u8, return_value: u32) -> Option<Self> {
        Some(match id {
            RopId::OpenFolder => Self::OpenFolder {
                handle_index,
                return_value,
                folder: None,
            },
            RopId::GetHierarchyTable => Self::GetHierarchyTable {
                handle_index,
                return_value,
                row_count: None,
            },
            RopId::GetContentsTable => Self::GetContentsTable {
                handle_index,
                return_value,
                row_count: None,
            },
            RopId::CreateMessage => Self::CreateMessage {
                handle_index,
                return_value,
                message_id: None,
            },
            RopId::SaveChangesMessage => Self::SaveChangesMessage {
                handle_index,
                return_value,
                saved: None,
            },
            RopId::SetColumns => Self::SetColumns {
                handle_index,
                return_value,
                table_status: None,
            },
            RopId::GetStatus => Self::GetStatus {
                handle_index,
                return_value,
                table_status: None,
            },
            RopId::CreateFolder => Self::CreateFolder {
                handle_index,
                return_value,
                folder: None,
            },
            RopId::DeleteFolder => Self::DeleteFolder {
                handle_index,
                return_value,
                partial_completion: false,
            },
            RopId::RegisterNotification => Self::RegisterNotification {
                handle_index,
                return_value,
            },
            RopId::SetSearchCriteria => Self::SetSearchCriteria {
                handle_index,
                return_value,
            },
            RopId::GetRulesTable => Self::GetRulesTable {
                handle_index,
                return_value,
            },
            RopId::Logon => Self::Logon {
                handle_index,
                return_value,
                body: LogonBody::Failed,
            },
            RopId::Release | RopId::Notify | RopId::Pending | RopId::BufferTooSmall => {
                return None;
            }
        })
    }

    /// # Errors
    ///
    /// Refuses bodies that disagree with the return value and fields that
    /// overflow their count prefixes.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.u8(self.rop_id() as u8);
        if let Some((handle_index, return_value)) = self.header() {
            w.u8(handle_index);
            w.u32(return_value);
        }
        let ok = self.return_value() == Some(status::SUCCESS);
        match self {
            Self::OpenFolder { folder, .. } => {
                if let Some(folder) = success_body(ok, folder.as_ref(), "OpenFolder")? {
                    folder.encode(w)?;
                }
            }
            Self::GetHierarchyTable { row_count, .. }
            | Self::GetContentsTable { row_count, .. } => {
                if let Some(count) = success_body(ok, row_count.as_ref(), "RowCount")? {
                    w.u32(*count);
                }
            }
            Self::CreateMessage { message_id, .. } => {
                if ok {
                    w.u8(u8::from(message_id.is_some()));
                    if let Some(id) = message_id {
                        w.u64(*id);
                    }
                } else if message_id.is_some() {
                    return Err(WireError::FieldPresence(
                        "CreateMessage failure carries a message id".into(),
                    ));
                }
            }
            Self::SaveChangesMessage { saved, .. } => {
                if let Some(saved) = success_body(ok, saved.as_ref(), "SaveChangesMessage")? {
                    w.u8(saved.input_handle_index);
                    w.u64(saved.message_id);
                }
            }
            Self::SetColumns { table_status, .. } | Self::GetStatus { table_status, .. } => {
                if let Some(value) = success_body(ok, table_status.as_ref(), "TableStatus")? {
                    w.u8(*value);
                }
            }
            Self::CreateFolder { folder, .. } => {
                if let Some(created) = success_body(ok, folder.as_ref(), "CreateFolder")? {
                    w.u64(created.folder_id);
                    w.u8(u8::from(created.existing.is_some()));
                    if let Some(existing) = &created.existing {
                        existing.encode(w)?;
                    }
                }
            }
            Self::DeleteFolder {
                partial_completion,
                ..
            } => w.u8(u8::from(*partial_completion)),
            Self::RegisterNotification { .. }
            | Self::SetSearchCriteria { .. }
            | Self::GetRulesTable { .. } => {}
            Self::Notify {
                notification_handle,
                logon_id,
                data,
            } => {
                w.u32(*notification_handle);
                w.u8(*logon_id);
                data.encode(w)?;
            }
            Self::Pending { session_index } => w.u16(*session_index),
            Self::Logon {
                return_value, body, ..
            } => match (body, *return_value) {
                (LogonBody::Mailbox(logon), status::SUCCESS) => logon.encode(w),
                (
                    LogonBody::Redirect {
                        logon_flags,
                        server_name,
                    },
                    status::WRONG_SERVER,
                ) => {
                    let size =
                        u8::try_from(server_name.len() + 1).map_err(|_| WireError::TooLarge {
                            field: "ServerNameSize",
                            size: server_name.len() + 1,
                        })?;
                    w.u8(logon_flags.bits());
                    w.u8(size);
                    w.ascii_z(server_name);
                }
                (LogonBody::Failed, value)
                    if value != status::SUCCESS && value != status::WRONG_SERVER => {}
                (_, value) => {
                    return Err(WireError::FieldPresence(format!(
                        "Logon body does not match return value {value:#010x}"
                    )));
                }
            },
            Self::BufferTooSmall {
                size_needed,
                request_buffers,
            } => {
                w.u16(*size_needed);
                w.bytes(request_buffers);
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on unknown ROP ids, request-only ids and truncated input.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let raw = r.u8()?;
        let id = RopId::try_from(raw)?;
        match id {
            RopId::Notify => {
                return Ok(Self::Notify {
                    notification_handle: r.u32()?,
                    logon_id: r.u8()?,
                    data: Box::new(NotificationData::decode(r)?),
                });
            }
            RopId::Pending => {
                return Ok(Self::Pending {
                    session_index: r.u16()?,
                });
            }
            RopId::BufferTooSmall => {
                return Ok(Self::BufferTooSmall {
                    size_needed: r.u16()?,
                    request_buffers: r.rest().to_vec(),
                });
            }
            RopId::Release => return Err(WireError::UnknownRop(raw)),
            _ => {}
        }

        let handle_index = r.u8()?;
        let return_value = r.u32()?;
        let ok = return_value == status::SUCCESS;
        Ok(match id {
            RopId::OpenFolder => Self::OpenFolder {
                handle_index,
                return_value,
                folder: if ok { Some(FolderInfo::decode(r)?) } else { None },
            },
            RopId::GetHierarchyTable => Self::GetHierarchyTable {
                handle_index,
                return_value,
                row_count: if ok { Some(r.u32()?) } else { None },
            },
            RopId::GetContentsTable => Self::GetContentsTable {
                handle_index,
                return_value,
                row_count: if ok { Some(r.u32()?) } else { None },
            },
            RopId::CreateMessage => Self::CreateMessage {
                handle_index,
                return_value,
                message_id: if ok && r.u8()? != 0 {
                    Some(r.u64()?)
                } else {
                    None
                },
            },
            RopId::SaveChangesMessage => Self::SaveChangesMessage {
                handle_index,
                return_value,
                saved: if ok {
                    Some(SavedMessage {
                        input_handle_index: r.u8()?,
                        message_id: r.u64()?,
                    })
                } else {
                    None
                },
            },
            RopId::SetColumns => Self::SetColumns {
                handle_index,
                return_value,
                table_status: if ok { Some(r.u8()?) } else { None },
            },
            RopId::GetStatus => Self::GetStatus {
                handle_index,
                return_value,
                table_status: if ok { Some(r.u8()?) } else { None },
            },
            RopId::CreateFolder => Self::CreateFolder {
                handle_index,
                return_value,
                folder: if ok {
                    let folder_id = r.u64()?;
                    let existing = if r.u8()? != 0 {
                        Some(FolderInfo::decode(r)?)
                    } else {
                        None
                    };
                    Some(CreatedFolder {
                        folder_id,
                        existing,
                    })
                } else {
                    None
                },
            },
            RopId::DeleteFolder => Self::DeleteFolder {
                handle_index,
                return_value,
                partial_completion: r.u8()? != 0,
            },
            RopId::RegisterNotification => Self::RegisterNotification {
                handle_index,
                return_value,
            },
            RopId::SetSearchCriteria => Self::SetSearchCriteria {
                handle_index,
                return_value,
            },
            RopId::GetRulesTable => Self::GetRulesTable {
                handle_index,
                return_value,
            },
            RopId::Logon => Self::Logon {
                handle_index,
                return_value,
                body: match return_value {
                    status::SUCCESS => LogonBody::Mailbox(Box::new(LogonResponse::decode(r)?)),
                    status::WRONG_SERVER => {
                        let logon_flags = LogonFlags::from_bits_retain(r.u8()?);
                        let size = usize::from(r.u8()?);
                        LogonBody::Redirect {
                            logon_flags,
                            server_name: sized_ascii(r.take(size)?, "ServerName")?,
                        }
                    }
                    _ => LogonBody::Failed,
                },
            },
            RopId::Release | RopId::Notify | RopId::Pending | RopId::BufferTooSmall => {
                return Err(WireError::UnknownRop(raw));
            }
        })
    }
}

fn success_body<'a, T>(
    ok: bool,
    body: Option<&'a T>,
    rop: &str,
) -> Result<Option<&'a T>, WireError> {
    match (ok, body) {
        (true, Some(body)) => Ok(Some(body)),
        (false, None) => Ok(None),
        (true, None) => Err(WireError::FieldPresence(format!(
            "{rop} success response without a body"
        ))),
        (false, Some(_)) => Err(WireError::FieldPresence(format!(
            "{rop} failure response with a body"
        ))),
    }
}

/// A size-prefixed ASCII string whose size counts the trailing NUL.
fn sized_ascii(bytes: &[u8], field: &'static str) -> Result<String, WireError> {
    match bytes.split_last() {
        Some((0, text)) => Ok(String::from_utf8_lossy(text).into_owned()),
        _ => Err(WireError::UnterminatedString(field)),
    }
}

/// Serialize a request list into ROP bytes.
///
/// # Errors
///
/// Returns `TooLarge` when a count-prefixed field overflows its prefix.
pub fn encode_requests(requests: &[RopRequest]) -> Result<Vec<u8>, WireError> {
    let mut w = Writer::new();
    for request in requests {
        request.encode(&mut w)?;
    }
    Ok(w.into_inner())
}

/// Parse ROP bytes into a request list.
///
/// # Errors
///
/// Fails on unknown ids and truncated input.
pub fn decode_requests(rops: &[u8]) -> Result<Vec<RopRequest>, WireError> {
    let mut reader = Reader::new(rops);
    let mut requests = Vec::new();
    while !reader.is_empty() {
        requests.push(RopRequest::decode(&mut reader)?);
    }
    Ok(requests)
}

/// Serialize a response list into ROP bytes.
///
/// # Errors
///
/// See [`RopResponse::encode`].
pub fn encode_responses(responses: &[RopResponse]) -> Result<Vec<u8>, WireError> {
    let mut w = Writer::new();
    for response in responses {
        response.encode(&mut w)?;
    }
    Ok(w.into_inner())
}

/// Parse ROP bytes into a response list, checking each positional response
/// against `expected` in order.
///
/// `Notify` records may appear anywhere and are not matched. `Pending`
/// and `BufferTooSmall` must be the final record. Fewer positional
/// responses than `expected` is not an error here; the caller decides
/// whether the remainder is owed.
///
/// # Errors
///
/// Returns `Error::Wire` on malformed input or a misplaced terminal
/// marker, and `Error::UnexpectedResponse` when a response id does not
/// match its request.
pub fn decode_responses(rops: &[u8], expected: &[RopId]) -> Result<Vec<RopResponse>, Error> {
    let mut reader = Reader::new(rops);
    let mut expected = expected.iter().copied();
    let mut responses = Vec::new();
    while !reader.is_empty() {
        let response = RopResponse::decode(&mut reader)?;
        let id = response.rop_id();
        if id.is_terminal() {
            if !reader.is_empty() {
                return Err(WireError::MisplacedTerminal(id).into());
            }
        } else if id != RopId::Notify {
            match expected.next() {
                Some(want) if want == id => {}
                want => {
                    return Err(Error::UnexpectedResponse {
                        expected: want,
                        actual: id,
                    });
                }
            }
        }
        responses.push(response);
    }
    Ok(responses)
}
