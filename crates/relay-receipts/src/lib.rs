//! Per-message delivery/read receipts.
//!
//! Every transition is monotonic and idempotent; a read implies a
//! delivered for the same user. Receipts from users without conversation
//! access are silent no-ops.

mod service;

pub use service::{ReceiptError, ReceiptService, ReceiptUpdate, Result};
