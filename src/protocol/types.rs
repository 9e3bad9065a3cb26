//! Shared wire protocol types.

/// PostgreSQL object identifier.
pub type Oid = u32;

/// Data format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FormatCode {
    /// Text (what `psql` shows)
    #[default]
    Text = 0,
    /// Type-specific binary
    Binary = 1,
}

/// Transaction status reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not in a transaction block
    #[default]
    Idle = b'I',
    /// In a transaction block
    InTransaction = b'T',
    /// In a failed transaction block
    Failed = b'E',
}

impl TransactionStatus {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}
