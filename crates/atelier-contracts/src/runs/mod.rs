pub mod receipts;
pub mod summary;

pub use receipts::{
    build_receipt, sanitize_payload, write_receipt, HistoryPosition, ReceiptInput, ResultInfo,
    RECEIPT_SCHEMA_VERSION,
};
pub use summary::{write_summary, SessionSummary};
