//! Special folders of a private mailbox
//!
//! A private-mailbox logon returns thirteen folder ids in a fixed order.
//! [`SpecialFolder`] names those positions so callers don't index the
//! array by hand.

use serde::Serialize;
use std::fmt;

/// A well-known folder returned by `RopLogon`.
///
/// # Examples
///
/// ```
/// use mapi_rop_client::SpecialFolder;
///
/// assert_eq!(SpecialFolder::Inbox.index(), 4);
/// assert_eq!(SpecialFolder::from_name("inbox"), Some(SpecialFolder::Inbox));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpecialFolder {
    /// Mailbox root.
    Root,
    DeferredAction,
    SpoolerQueue,
    /// Top of the user-visible folder tree.
    IpmSubtree,
    Inbox,
    Outbox,
    SentItems,
    DeletedItems,
    CommonViews,
    Schedule,
    /// Parent of search folders.
    Search,
    Views,
    Shortcuts,
}

impl SpecialFolder {
    /// Every special folder in logon order.
    pub const ALL: [Self; 13] = [
        Self::Root,
        Self::DeferredAction,
        Self::SpoolerQueue,
        Self::IpmSubtree,
        Self::Inbox,
        Self::Outbox,
        Self::SentItems,
        Self::DeletedItems,
        Self::CommonViews,
        Self::Schedule,
        Self::Search,
        Self::Views,
        Self::Shortcuts,
    ];

    /// Position in the logon response's folder id array.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "Root",
            Self::DeferredAction => "Deferred Action",
            Self::SpoolerQueue => "Spooler Queue",
            Self::IpmSubtree => "IPM Subtree",
            Self::Inbox => "Inbox",
            Self::Outbox => "Outbox",
            Self::SentItems => "Sent Items",
            Self::DeletedItems => "Deleted Items",
            Self::CommonViews => "Common Views",
            Self::Schedule => "Schedule",
            Self::Search => "Search",
            Self::Views => "Views",
            Self::Shortcuts => "Shortcuts",
        }
    }

    /// Look a folder up by display name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|folder| folder.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for SpecialFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
