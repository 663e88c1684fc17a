//! Flag words carried by ROP requests
//!
//! Typed bit sets for the option bytes and words that ROP requests carry,
//! instead of raw integers at call sites.

use crate::wire::NotificationType;
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// `TableFlags` of `RopGetContentsTable` / `RopGetHierarchyTable` /
    /// `RopGetRulesTable`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct TableFlags: u8 {
        const ASSOCIATED = 0x02;
        const DEPTH = 0x04;
        const DEFER_ERRORS = 0x08;
        /// The table is never a source of `TableModified` events.
        const NO_NOTIFICATIONS = 0x10;
        const SOFT_DELETES = 0x20;
        const USE_UNICODE = 0x40;
        const SUPPRESSES_RECEIPTS = 0x80;
    }
}

bitflags! {
    /// Event categories a subscription asks for.
    ///
    /// Bit values line up with the type bits of
    /// [`NotificationFlags`](crate::wire::NotificationFlags). Only the low
    /// byte can be sent in `RopRegisterNotification`; `TABLE_MODIFIED`
    /// subscriptions are made implicitly by opening a table.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct NotificationTypes: u16 {
        const NEW_MAIL = 0x0002;
        const OBJECT_CREATED = 0x0004;
        const OBJECT_DELETED = 0x0008;
        const OBJECT_MODIFIED = 0x0010;
        const OBJECT_MOVED = 0x0020;
        const OBJECT_COPIED = 0x0040;
        const SEARCH_COMPLETED = 0x0080;
        const TABLE_MODIFIED = 0x0100;
        const STATUS_OBJECT_MODIFIED = 0x0200;
    }
}

impl NotificationTypes {
    /// Whether events of type `ty` fall under this mask.
    #[must_use]
    pub const fn matches(self, ty: NotificationType) -> bool {
        self.bits() & ty as u16 != 0
    }

    /// Parse a comma separated list such as `new-mail,created`.
    ///
    /// # Errors
    ///
    /// Returns the first name that is not a known category.
    pub fn parse_list(list: &str) -> Result<Self, String> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Self::empty(), |acc, name| {
                let flag = match name.to_ascii_lowercase().as_str() {
                    "new-mail" | "newmail" => Self::NEW_MAIL,
                    "created" => Self::OBJECT_CREATED,
                    "deleted" => Self::OBJECT_DELETED,
                    "modified" => Self::OBJECT_MODIFIED,
                    "moved" => Self::OBJECT_MOVED,
                    "copied" => Self::OBJECT_COPIED,
                    "search" => Self::SEARCH_COMPLETED,
                    "table" => Self::TABLE_MODIFIED,
                    "status" => Self::STATUS_OBJECT_MODIFIED,
                    _ => return Err(name.to_string()),
                };
                Ok(acc | flag)
            })
    }
}

bitflags! {
    /// `OpenModeFlags` of `RopOpenFolder`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct OpenModeFlags: u8 {
        const OPEN_SOFT_DELETED = 0x04;
    }
}

bitflags! {
    /// `SaveFlags` of `RopSaveChangesMessage`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct SaveFlags: u8 {
        const KEEP_OPEN_READ_ONLY = 0x01;
        const KEEP_OPEN_READ_WRITE = 0x02;
        const FORCE_SAVE = 0x04;
    }
}

bitflags! {
    /// `DeleteFolderFlags` of `RopDeleteFolder`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct DeleteFolderFlags: u8 {
        const DEL_MESSAGES = 0x01;
        const DEL_FOLDERS = 0x04;
        const HARD_DELETE = 0x10;
    }
}

bitflags! {
    /// `LogonFlags` of `RopLogon`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct LogonFlags: u8 {
        const PRIVATE = 0x01;
        const UNDERCOVER = 0x02;
        const GHOSTED = 0x04;
    }
}

bitflags! {
    /// `OpenFlags` of `RopLogon`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct OpenFlags: u32 {
        const USE_ADMIN_PRIVILEGE = 0x0000_0001;
        const PUBLIC = 0x0000_0002;
        const HOME_LOGON = 0x0000_0004;
        const TAKE_OWNERSHIP = 0x0000_0008;
        const ALTERNATE_SERVER = 0x0000_0100;
        const IGNORE_HOME_MDB = 0x0000_0200;
        const NO_MAIL = 0x0000_0400;
        const USE_PER_MDB_REPLID_MAPPING = 0x0100_0000;
    }
}

bitflags! {
    /// `SearchFlags` of `RopSetSearchCriteria`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct SearchFlags: u32 {
        const STOP_SEARCH = 0x0000_0001;
        const RESTART_SEARCH = 0x0000_0002;
        const RECURSIVE_SEARCH = 0x0000_0004;
        const SHALLOW_SEARCH = 0x0000_0008;
        const CONTENT_INDEXED_SEARCH = 0x0001_0000;
        const NON_CONTENT_INDEXED_SEARCH = 0x0002_0000;
        const STATIC_SEARCH = 0x0004_0000;
    }
}
