//! Error types and C-ABI error codes for mctree

use std::cell::RefCell;
use std::os::raw::c_char;
use thiserror::Error;

/// Usage errors returned to callers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("key has {got} words, tree expects {want}")]
    WrongKeyLength { got: usize, want: usize },
    #[error("pair {index} has value bits outside its mask")]
    InvalidPair { index: usize },
    #[error("key was never added")]
    KeyNotFound,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("restore requires a tree with no keys")]
    RestoreNotEmpty,
    #[error("malformed topology: {0}")]
    TopologyFormat(String),
    #[error("invalid prefix")]
    InvalidPrefix,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Internal corruption found by `validate`.  Never recoverable.
#[derive(Error, Debug, PartialEq)]
pub enum InvariantViolation {
    #[error("node {index} reached with key {got}, expected {want}")]
    NodeKey { index: u32, got: String, want: String },
    #[error("node {index} is free or stale but reachable")]
    DeadNode { index: u32 },
    #[error("split node {index} repeats bit {bit} already fixed by an ancestor")]
    RepeatedSplitBit { index: u32, bit: u32 },
    #[error("node {index} reachable more than once")]
    SharedNode { index: u32 },
    #[error("wrong number of active nodes: pool {pool} != reachable {reachable}")]
    NodeLeak { pool: usize, reachable: usize },
    #[error("leaf {node} holds key handle {handle} that is not live")]
    DeadKey { node: u32, handle: u32 },
    #[error("leaf {node} holds key handle {handle} more than once")]
    DuplicateMember { node: u32, handle: u32 },
    #[error("leaf {node} holds key handle {handle} that does not route to it")]
    WrongLeaf { node: u32, handle: u32 },
    #[error("key handle {handle} missing from leaf {node}")]
    MissingMember { node: u32, handle: u32 },
    #[error("{what} mismatch: tracked {tracked} != recomputed {actual}")]
    Cost { what: &'static str, tracked: f64, actual: f64 },
    #[error("member set {index} refcount {stored} != {referenced} referencing leaves")]
    RefCount { index: u32, stored: u32, referenced: u32 },
    #[error("member set {index} is free or stale but referenced")]
    DeadSet { index: u32 },
    #[error("member-set leak: pool {pool} live != {referenced} referenced")]
    SetLeak { pool: usize, referenced: usize },
    #[error("key store corrupt: {0}")]
    KeyStore(String),
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    WrongKeyLength = 1,
    InvalidPair = 2,
    KeyNotFound = 3,
    InvalidConfig = 4,
    RestoreNotEmpty = 5,
    TopologyFormat = 6,
    InvalidPrefix = 7,
    Io = 8,
    InvalidHandle = 9,
    Utf8Error = 10,
    InvariantViolation = 11,
    Unknown = 255,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        self.as_cstr().split('\0').next().unwrap_or("")
    }

    fn as_cstr(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success\0",
            ErrorCode::WrongKeyLength => "Wrong key length\0",
            ErrorCode::InvalidPair => "Value bits outside mask\0",
            ErrorCode::KeyNotFound => "Key not found\0",
            ErrorCode::InvalidConfig => "Invalid config\0",
            ErrorCode::RestoreNotEmpty => "Restore into non-empty tree\0",
            ErrorCode::TopologyFormat => "Malformed topology\0",
            ErrorCode::InvalidPrefix => "Invalid prefix\0",
            ErrorCode::Io => "I/O error\0",
            ErrorCode::InvalidHandle => "Invalid handle\0",
            ErrorCode::Utf8Error => "UTF-8 conversion error\0",
            ErrorCode::InvariantViolation => "Invariant violation\0",
            ErrorCode::Unknown => "Unknown error\0",
        }
    }
}

// Thread-local last error for C-ABI
thread_local! {
    static LAST_ERROR: RefCell<ErrorCode> = const { RefCell::new(ErrorCode::Success) };
}

pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = code);
}

pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(|cell| *cell.borrow())
}

#[no_mangle]
pub extern "C" fn mctree_last_error() -> ErrorCode {
    get_last_error()
}

#[no_mangle]
pub extern "C" fn mctree_strerror(code: ErrorCode) -> *const c_char {
    code.as_cstr().as_ptr() as *const c_char
}

// Map internal Error to ErrorCode
pub fn map_error(e: &Error) -> ErrorCode {
    match e {
        Error::WrongKeyLength { .. } => ErrorCode::WrongKeyLength,
        Error::InvalidPair { .. } => ErrorCode::InvalidPair,
        Error::KeyNotFound => ErrorCode::KeyNotFound,
        Error::InvalidConfig(_) => ErrorCode::InvalidConfig,
        Error::RestoreNotEmpty => ErrorCode::RestoreNotEmpty,
        Error::TopologyFormat(_) => ErrorCode::TopologyFormat,
        Error::InvalidPrefix => ErrorCode::InvalidPrefix,
        Error::Io(_) => ErrorCode::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strerror_is_nul_terminated() {
        let p = mctree_strerror(ErrorCode::KeyNotFound);
        let s = unsafe { std::ffi::CStr::from_ptr(p) };
        assert_eq!(s.to_str().unwrap(), "Key not found");
        assert_eq!(ErrorCode::KeyNotFound.as_str(), "Key not found");
    }

    #[test]
    fn last_error_is_per_thread() {
        set_last_error(ErrorCode::Io);
        assert_eq!(get_last_error(), ErrorCode::Io);
        std::thread::spawn(|| assert_eq!(get_last_error(), ErrorCode::Success))
            .join()
            .unwrap();
    }
}
