//! `NotificationData` records carried by `RopNotify`
//!
//! Which sub-fields a record carries is decided entirely by its
//! `NotificationFlags` (and, for table events, the table event type).
//! [`PresentFields::expected`] is the single source of truth for that
//! decision; both the decoder and the encoder consult it, and a record
//! whose populated fields disagree with it is rejected.

use super::{Reader, Writer, to_u16};
use crate::error::WireError;
use bitflags::bitflags;
use serde::Serialize;

/// Mask selecting the notification type from `NotificationFlags`.
const TYPE_MASK: u16 = 0x0FFF;

/// `TagCount` value meaning "properties not enumerated".
pub const TAGS_UNSPECIFIED: u16 = 0xFFFF;

bitflags! {
    /// Raw `NotificationFlags` word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
    pub struct NotificationFlags: u16 {
        const NEW_MAIL = 0x0002;
        const OBJECT_CREATED = 0x0004;
        const OBJECT_DELETED = 0x0008;
        const OBJECT_MODIFIED = 0x0010;
        const OBJECT_MOVED = 0x0020;
        const OBJECT_COPIED = 0x0040;
        const SEARCH_COMPLETED = 0x0080;
        const TABLE_MODIFIED = 0x0100;
        const STATUS_OBJECT_MODIFIED = 0x0200;
        /// `TotalMessageCount` follows.
        const TOTAL_COUNT = 0x1000;
        /// `UnreadMessageCount` follows.
        const UNREAD_COUNT = 0x2000;
        /// Event concerns a search folder.
        const SEARCH = 0x4000;
        /// Event concerns a message rather than a folder.
        const MESSAGE = 0x8000;
    }
}

impl NotificationFlags {
    /// Flags for a given event type with no modifier bits.
    #[must_use]
    pub const fn of(ty: NotificationType) -> Self {
        Self::from_bits_retain(ty as u16)
    }
}

/// Notification category, the low twelve bits of `NotificationFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum NotificationType {
    NewMail = 0x0002,
    ObjectCreated = 0x0004,
    ObjectDeleted = 0x0008,
    ObjectModified = 0x0010,
    ObjectMoved = 0x0020,
    ObjectCopied = 0x0040,
    SearchCompleted = 0x0080,
    TableModified = 0x0100,
    StatusObjectModified = 0x0200,
    /// Server-specific event with no body fields.
    Extended = 0x0400,
}

impl NotificationType {
    /// # Errors
    ///
    /// Returns `UnknownNotificationType` unless exactly one known type bit
    /// is set in the low twelve bits.
    pub const fn from_flags(flags: NotificationFlags) -> Result<Self, WireError> {
        Ok(match flags.bits() & TYPE_MASK {
            0x0002 => Self::NewMail,
            0x0004 => Self::ObjectCreated,
            0x0008 => Self::ObjectDeleted,
            0x0010 => Self::ObjectModified,
            0x0020 => Self::ObjectMoved,
            0x0040 => Self::ObjectCopied,
            0x0080 => Self::SearchCompleted,
            0x0100 => Self::TableModified,
            0x0200 => Self::StatusObjectModified,
            0x0400 => Self::Extended,
            other => return Err(WireError::UnknownNotificationType(other)),
        })
    }

    const fn has_parent_candidate(self) -> bool {
        matches!(
            self,
            Self::ObjectCreated | Self::ObjectDeleted | Self::ObjectMoved | Self::ObjectCopied
        )
    }
}

/// Secondary tag of a `TableModified` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum TableEventType {
    Changed = 0x0001,
    RowAdded = 0x0003,
    RowDeleted = 0x0004,
    RowModified = 0x0005,
    RestrictionChanged = 0x0007,
}

impl TryFrom<u16> for TableEventType {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0001 => Self::Changed,
            0x0003 => Self::RowAdded,
            0x0004 => Self::RowDeleted,
            0x0005 => Self::RowModified,
            0x0007 => Self::RestrictionChanged,
            other => return Err(WireError::UnknownTableEvent(other)),
        })
    }
}

bitflags! {
    /// Optional sub-fields of a notification record.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
    pub struct PresentFields: u16 {
        const TABLE_EVENT = 1 << 0;
        const HIERARCHY = 1 << 1;
        const FOLDER_ID = 1 << 2;
        const MESSAGE_ID = 1 << 3;
        const PARENT_FOLDER_ID = 1 << 4;
        const OLD_FOLDER_ID = 1 << 5;
        const OLD_MESSAGE_ID = 1 << 6;
        const OLD_PARENT_FOLDER_ID = 1 << 7;
        const TAG_COUNT = 1 << 8;
        const TOTAL_COUNT = 1 << 9;
        const UNREAD_COUNT = 1 << 10;
        const NEW_MAIL = 1 << 11;
    }
}

impl PresentFields {
    /// The field-presence table: which sub-fields a record with these
    /// flags carries.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNotificationType` for an unrecognised type.
    pub fn expected(flags: NotificationFlags) -> Result<Self, WireError> {
        let ty = NotificationType::from_flags(flags)?;
        if ty == NotificationType::Extended {
            return Ok(Self::empty());
        }
        let message = flags.contains(NotificationFlags::MESSAGE);
        let search = flags.contains(NotificationFlags::SEARCH);
        let mut fields = Self::empty();

        match ty {
            NotificationType::TableModified => fields |= Self::TABLE_EVENT,
            NotificationType::StatusObjectModified => fields |= Self::HIERARCHY,
            _ => {
                fields |= Self::FOLDER_ID;
                fields.set(Self::MESSAGE_ID, message);
            }
        }

        if ty.has_parent_candidate() && search == message {
            fields |= Self::PARENT_FOLDER_ID;
        }

        if matches!(
            ty,
            NotificationType::ObjectMoved | NotificationType::ObjectCopied
        ) {
            fields |= Self::OLD_FOLDER_ID;
            if message {
                fields |= Self::OLD_MESSAGE_ID;
            } else {
                fields |= Self::OLD_PARENT_FOLDER_ID;
            }
        }

        if matches!(
            ty,
            NotificationType::ObjectCreated | NotificationType::ObjectModified
        ) {
            fields |= Self::TAG_COUNT;
        }

        fields.set(
            Self::TOTAL_COUNT,
            flags.contains(NotificationFlags::TOTAL_COUNT),
        );
        fields.set(
            Self::UNREAD_COUNT,
            flags.contains(NotificationFlags::UNREAD_COUNT),
        );
        fields.set(Self::NEW_MAIL, ty == NotificationType::NewMail);
        Ok(fields)
    }
}

/// 22-byte global identifier (database GUID + 6-byte counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GlobalId {
    pub database_guid: [u8; 16],
    pub global_counter: [u8; 6],
}

/// Identity of a table row. `message` is present exactly when the
/// record's `MESSAGE` flag is set: `(message_id, instance)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowId {
    pub folder_id: u64,
    pub message: Option<(u64, u32)>,
}

/// A row added to or modified in a table, positioned after
/// `insert_after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowChange {
    pub row: RowId,
    pub insert_after: RowId,
    pub data: Vec<u8>,
}

/// Payload of a `TableModified` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TableEvent {
    Changed,
    RowAdded(RowChange),
    RowDeleted(RowId),
    RowModified(RowChange),
    RestrictionChanged,
}

impl TableEvent {
    #[must_use]
    pub const fn event_type(&self) -> TableEventType {
        match self {
            Self::Changed => TableEventType::Changed,
            Self::RowAdded(_) => TableEventType::RowAdded,
            Self::RowDeleted(_) => TableEventType::RowDeleted,
            Self::RowModified(_) => TableEventType::RowModified,
            Self::RestrictionChanged => TableEventType::RestrictionChanged,
        }
    }

    fn rows(&self) -> impl Iterator<Item = &RowId> {
        let (first, second) = match self {
            Self::RowAdded(change) | Self::RowModified(change) => {
                (Some(&change.row), Some(&change.insert_after))
            }
            Self::RowDeleted(row) => (Some(row), None),
            Self::Changed | Self::RestrictionChanged => (None, None),
        };
        first.into_iter().chain(second)
    }
}

/// Folder hierarchy change reported by `StatusObjectModified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyChange {
    pub hierarchy_changed: u8,
    pub folder_ids: Vec<GlobalId>,
    pub change_numbers: Vec<u32>,
}

/// `NewMail` specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMail {
    pub message_flags: u32,
    pub unicode: bool,
    pub message_class: String,
}

/// One decoded notification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub flags: NotificationFlags,
    pub table: Option<TableEvent>,
    pub hierarchy: Option<HierarchyChange>,
    pub folder_id: Option<u64>,
    pub message_id: Option<u64>,
    pub parent_folder_id: Option<u64>,
    pub old_folder_id: Option<u64>,
    pub old_message_id: Option<u64>,
    pub old_parent_folder_id: Option<u64>,
    pub tag_count: Option<u16>,
    pub tags: Vec<u32>,
    pub total_message_count: Option<u32>,
    pub unread_message_count: Option<u32>,
    pub new_mail: Option<NewMail>,
}

impl NotificationData {
    /// An empty record carrying only `flags`. Callers fill in the fields
    /// the presence table demands.
    #[must_use]
    pub const fn with_flags(flags: NotificationFlags) -> Self {
        Self {
            flags,
            table: None,
            hierarchy: None,
            folder_id: None,
            message_id: None,
            parent_folder_id: None,
            old_folder_id: None,
            old_message_id: None,
            old_parent_folder_id: None,
            tag_count: None,
            tags: Vec::new(),
            total_message_count: None,
            unread_message_count: None,
            new_mail: None,
        }
    }

    /// `NewMail` for a message delivered into `folder_id`.
    #[must_use]
    pub fn new_mail(folder_id: u64, message_id: u64, message_class: &str) -> Self {
        let mut data = Self::with_flags(
            NotificationFlags::of(NotificationType::NewMail) | NotificationFlags::MESSAGE,
        );
        data.folder_id = Some(folder_id);
        data.message_id = Some(message_id);
        data.new_mail = Some(NewMail {
            message_flags: 0,
            unicode: false,
            message_class: message_class.to_string(),
        });
        data
    }

    /// `ObjectCreated` for a message saved into `folder_id`.
    #[must_use]
    pub const fn message_created(folder_id: u64, message_id: u64) -> Self {
        let mut data = Self::with_flags(NotificationFlags::from_bits_retain(
            NotificationType::ObjectCreated as u16 | NotificationFlags::MESSAGE.bits(),
        ));
        data.folder_id = Some(folder_id);
        data.message_id = Some(message_id);
        data.tag_count = Some(TAGS_UNSPECIFIED);
        data
    }

    /// `ObjectCreated` for a folder created under `parent_folder_id`.
    #[must_use]
    pub const fn folder_created(folder_id: u64, parent_folder_id: u64) -> Self {
        let mut data = Self::with_flags(NotificationFlags::of(NotificationType::ObjectCreated));
        data.folder_id = Some(folder_id);
        data.parent_folder_id = Some(parent_folder_id);
        data.tag_count = Some(TAGS_UNSPECIFIED);
        data
    }

    /// `ObjectDeleted` for a folder removed from `parent_folder_id`.
    #[must_use]
    pub const fn folder_deleted(folder_id: u64, parent_folder_id: u64) -> Self {
        let mut data = Self::with_flags(NotificationFlags::of(NotificationType::ObjectDeleted));
        data.folder_id = Some(folder_id);
        data.parent_folder_id = Some(parent_folder_id);
        data
    }

    /// `TableModified` carrying `event`. The `MESSAGE` flag follows the
    /// row identities inside the event.
    #[must_use]
    pub fn table(event: TableEvent) -> Self {
        let message = event.rows().any(|row| row.message.is_some());
        let mut flags = NotificationFlags::of(NotificationType::TableModified);
        flags.set(NotificationFlags::MESSAGE, message);
        let mut data = Self::with_flags(flags);
        data.table = Some(event);
        data
    }

    /// # Errors
    ///
    /// Returns `UnknownNotificationType` for an unrecognised type.
    pub const fn notification_type(&self) -> Result<NotificationType, WireError> {
        NotificationType::from_flags(self.flags)
    }

    /// Fields actually populated on this record.
    #[must_use]
    pub fn present(&self) -> PresentFields {
        let mut fields = PresentFields::empty();
        fields.set(PresentFields::TABLE_EVENT, self.table.is_some());
        fields.set(PresentFields::HIERARCHY, self.hierarchy.is_some());
        fields.set(PresentFields::FOLDER_ID, self.folder_id.is_some());
        fields.set(PresentFields::MESSAGE_ID, self.message_id.is_some());
        fields.set(
            PresentFields::PARENT_FOLDER_ID,
            self.parent_folder_id.is_some(),
        );
        fields.set(PresentFields::OLD_FOLDER_ID, self.old_folder_id.is_some());
        fields.set(PresentFields::OLD_MESSAGE_ID, self.old_message_id.is_some());
        fields.set(
            PresentFields::OLD_PARENT_FOLDER_ID,
            self.old_parent_folder_id.is_some(),
        );
        fields.set(PresentFields::TAG_COUNT, self.tag_count.is_some());
        fields.set(
            PresentFields::TOTAL_COUNT,
            self.total_message_count.is_some(),
        );
        fields.set(
            PresentFields::UNREAD_COUNT,
            self.unread_message_count.is_some(),
        );
        fields.set(PresentFields::NEW_MAIL, self.new_mail.is_some());
        fields
    }

    /// Check the record against the presence table and its own counts.
    ///
    /// # Errors
    ///
    /// Returns `FieldPresence` or `CountMismatch` describing the first
    /// inconsistency.
    pub fn validate(&self) -> Result<(), WireError> {
        let expected = PresentFields::expected(self.flags)?;
        let present = self.present();
        if expected != present {
            return Err(WireError::FieldPresence(format!(
                "flags {:#06x} require {expected:?}, record has {present:?}",
                self.flags.bits()
            )));
        }

        let message = self.flags.contains(NotificationFlags::MESSAGE);
        if let Some(table) = &self.table {
            if table.rows().any(|row| row.message.is_some() != message) {
                return Err(WireError::FieldPresence(
                    "table row message identity disagrees with MESSAGE flag".into(),
                ));
            }
        }

        if let Some(hierarchy) = &self.hierarchy {
            if hierarchy.folder_ids.len() != hierarchy.change_numbers.len() {
                return Err(WireError::CountMismatch {
                    field: "ICSChangeNumbers",
                    declared: hierarchy.folder_ids.len(),
                    actual: hierarchy.change_numbers.len(),
                });
            }
        }

        let declared = match self.tag_count {
            Some(0 | TAGS_UNSPECIFIED) | None => 0,
            Some(count) => usize::from(count),
        };
        if declared != self.tags.len() {
            return Err(WireError::CountMismatch {
                field: "TagCount",
                declared,
                actual: self.tags.len(),
            });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on truncated input, unknown type tags, or unterminated
    /// message class strings.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let flags = NotificationFlags::from_bits_retain(reader.u16()?);
        let fields = PresentFields::expected(flags)?;
        let message = flags.contains(NotificationFlags::MESSAGE);
        let mut data = Self::with_flags(flags);

        if fields.contains(PresentFields::TABLE_EVENT) {
            let event_type = TableEventType::try_from(reader.u16()?)?;
            data.table = Some(decode_table_event(reader, event_type, message)?);
        }

        if fields.contains(PresentFields::HIERARCHY) {
            let hierarchy_changed = reader.u8()?;
            let count = reader.u32()? as usize;
            // Each entry costs 22 + 4 bytes; refuse counts the input can't back.
            if count.saturating_mul(26) > reader.remaining() {
                return Err(WireError::InsufficientData {
                    needed: count.saturating_mul(26),
                    have: reader.remaining(),
                });
            }
            let mut folder_ids = Vec::with_capacity(count);
            for _ in 0..count {
                folder_ids.push(GlobalId {
                    database_guid: reader.array()?,
                    global_counter: reader.array()?,
                });
            }
            let mut change_numbers = Vec::with_capacity(count);
            for _ in 0..count {
                change_numbers.push(reader.u32()?);
            }
            data.hierarchy = Some(HierarchyChange {
                hierarchy_changed,
                folder_ids,
                change_numbers,
            });
        }

        if fields.contains(PresentFields::FOLDER_ID) {
            data.folder_id = Some(reader.u64()?);
        }
        if fields.contains(PresentFields::MESSAGE_ID) {
            data.message_id = Some(reader.u64()?);
        }
        if fields.contains(PresentFields::PARENT_FOLDER_ID) {
            data.parent_folder_id = Some(reader.u64()?);
        }
        if fields.contains(PresentFields::OLD_FOLDER_ID) {
            data.old_folder_id = Some(reader.u64()?);
        }
        if fields.contains(PresentFields::OLD_MESSAGE_ID) {
            data.old_message_id = Some(reader.u64()?);
        }
        if fields.contains(PresentFields::OLD_PARENT_FOLDER_ID) {
            data.old_parent_folder_id = Some(reader.u64()?);
        }
        if fields.contains(PresentFields::TAG_COUNT) {
            let count = reader.u16()?;
            data.tag_count = Some(count);
            if count != 0 && count != TAGS_UNSPECIFIED {
                for _ in 0..count {
                    data.tags.push(reader.u32()?);
                }
            }
        }
        if fields.contains(PresentFields::TOTAL_COUNT) {
            data.total_message_count = Some(reader.u32()?);
        }
        if fields.contains(PresentFields::UNREAD_COUNT) {
            data.unread_message_count = Some(reader.u32()?);
        }
        if fields.contains(PresentFields::NEW_MAIL) {
            let message_flags = reader.u32()?;
            let unicode = reader.u8()? != 0;
            let message_class = if unicode {
                reader.utf16_z("MessageClass")?
            } else {
                reader.ascii_z("MessageClass")?
            };
            data.new_mail = Some(NewMail {
                message_flags,
                unicode,
                message_class,
            });
        }
        Ok(data)
    }

    /// # Errors
    ///
    /// Refuses records that fail [`NotificationData::validate`] or whose
    /// variable fields overflow their count prefixes.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        self.validate()?;
        w.u16(self.flags.bits());

        if let Some(table) = &self.table {
            w.u16(table.event_type() as u16);
            match table {
                TableEvent::Changed | TableEvent::RestrictionChanged => {}
                TableEvent::RowDeleted(row) => encode_row(w, row),
                TableEvent::RowAdded(change) | TableEvent::RowModified(change) => {
                    encode_row(w, &change.row);
                    encode_row(w, &change.insert_after);
                    w.u16(to_u16(change.data.len(), "TableRowDataSize")?);
                    w.bytes(&change.data);
                }
            }
        }

        if let Some(hierarchy) = &self.hierarchy {
            w.u8(hierarchy.hierarchy_changed);
            let count = u32::try_from(hierarchy.folder_ids.len()).map_err(|_| {
                WireError::TooLarge {
                    field: "FolderIDNumber",
                    size: hierarchy.folder_ids.len(),
                }
            })?;
            w.u32(count);
            for id in &hierarchy.folder_ids {
                w.bytes(&id.database_guid);
                w.bytes(&id.global_counter);
            }
            for cn in &hierarchy.change_numbers {
                w.u32(*cn);
            }
        }

        for value in [
            self.folder_id,
            self.message_id,
            self.parent_folder_id,
            self.old_folder_id,
            self.old_message_id,
            self.old_parent_folder_id,
        ]
        .into_iter()
        .flatten()
        {
            w.u64(value);
        }

        if let Some(count) = self.tag_count {
            w.u16(count);
            for tag in &self.tags {
                w.u32(*tag);
            }
        }
        if let Some(total) = self.total_message_count {
            w.u32(total);
        }
        if let Some(unread) = self.unread_message_count {
            w.u32(unread);
        }
        if let Some(new_mail) = &self.new_mail {
            w.u32(new_mail.message_flags);
            w.u8(u8::from(new_mail.unicode));
            if new_mail.unicode {
                w.utf16_z(&new_mail.message_class);
            } else {
                w.ascii_z(&new_mail.message_class);
            }
        }
        Ok(())
    }
}

fn decode_row(reader: &mut Reader<'_>, message: bool) -> Result<RowId, WireError> {
    let folder_id = reader.u64()?;
    let message = if message {
        Some((reader.u64()?, reader.u32()?))
    } else {
        None
    };
    Ok(RowId { folder_id, message })
}

fn encode_row(w: &mut Writer, row: &RowId) {
    w.u64(row.folder_id);
    if let Some((message_id, instance)) = row.message {
        w.u64(message_id);
        w.u32(instance);
    }
}

fn decode_table_event(
    reader: &mut Reader<'_>,
    event_type: TableEventType,
    message: bool,
) -> Result<TableEvent, WireError> {
    Ok(match event_type {
        TableEventType::Changed => TableEvent::Changed,
        TableEventType::RestrictionChanged => TableEvent::RestrictionChanged,
        TableEventType::RowDeleted => TableEvent::RowDeleted(decode_row(reader, message)?),
        TableEventType::RowAdded | TableEventType::RowModified => {
            let row = decode_row(reader, message)?;
            let insert_after = decode_row(reader, message)?;
            let size = usize::from(reader.u16()?);
            let change = RowChange {
                row,
                insert_after,
                data: reader.take(size)?.to_vec(),
            };
            if event_type == TableEventType::RowAdded {
                TableEvent::RowAdded(change)
            } else {
                TableEvent::RowModified(change)
            }
        }
    })
}
