//! The mongodb crate does not provide error code constants or convenient
//! classification helpers; this module fills in the gaps.

use mongodb::error::{
    Error as DbError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};

pub const DUPLICATE_KEY: i32 = 11000;

/// Is the given error a unique-index violation?
///
/// Covers single writes, bulk writes (`insert_many`), and violations that
/// only surface in the command response at commit time.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .map_or(false, |errors| errors.iter().any(|e| e.code == DUPLICATE_KEY)),
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Is the given error a transient transaction error, i.e. one where the
/// server asks us to retry the whole transaction (write conflicts and the
/// like)?
pub fn is_transient_error(err: &DbError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

/// Did a commit fail in a way where its outcome is unknown (e.g. timeout)?
pub fn is_unknown_commit_error(err: &DbError) -> bool {
    err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
}
