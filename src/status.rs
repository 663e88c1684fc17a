//! Well-known return values and RPC status codes

/// Operation succeeded.
pub const SUCCESS: u32 = 0x0000_0000;

/// `ecRpcFormat`: the request buffer was malformed. Fatal.
pub const RPC_FORMAT: u32 = 0x0000_04B6;

/// `ecWrongServer`: the mailbox lives on another server; logon redirects.
pub const WRONG_SERVER: u32 = 0x0000_0478;

/// `ecNullObject`: an input handle index pointed at an unset slot.
pub const NULL_OBJECT: u32 = 0x0000_04B9;

/// The store is not ready to start a search yet.
pub const SEARCH_NOT_READY: u32 = 0x0000_0499;

/// `RPC_S_INVALID_BINDING`: the context handle is stale or unknown.
pub const INVALID_BINDING: u32 = 0x0000_06A6;

/// `ecNotFound`.
pub const NOT_FOUND: u32 = 0x8004_010F;

/// `ecDuplicateName`: a sibling folder already has that display name.
pub const DUPLICATE_NAME: u32 = 0x8004_0604;

/// `ecLoginFailure`: the server rejected the credentials.
pub const LOGIN_FAILURE: u32 = 0x8004_0111;

/// `JET_errTableLocked`: the table is locked by another operation.
pub const TABLE_LOCKED: u32 = 0xFFFF_FAEA;

/// Server object handle slot the server did not fill.
pub const UNSET_HANDLE: u32 = 0xFFFF_FFFF;
