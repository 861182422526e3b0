//! CSV replay source.
//!
//! Feeds recorded book operations straight into the book stage, bypassing
//! packet decoding. One row per operation:
//!
//! ```text
//! timestamp,symbol,action,side,level,price,quantity,orders
//! 2024-11-04T14:30:00.000000001Z,0,add,bid,0,1.00000,500,3
//! ```

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ReplayError;
use crate::types::{BookOpCode, BookOperation, Side};

/// Fixed-point units per currency unit.
const PRICE_MULTIPLIER: i64 = 100_000;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRow {
    pub timestamp: DateTime<Utc>,
    /// Symbol index, already resolved
    pub symbol: u8,
    pub action: String,
    pub side: String,
    /// Book level, -1 when unspecified
    pub level: i8,
    pub price: Decimal,
    pub quantity: u32,
    pub orders: u32,
}

impl ReplayRow {
    /// Convert to a book operation. `row` is only used in errors.
    pub fn to_operation(&self, row: usize) -> Result<BookOperation, ReplayError> {
        let op_code = match self.action.to_ascii_lowercase().as_str() {
            "add" | "new" => BookOpCode::Add,
            "modify" | "change" => BookOpCode::Modify,
            "delete" | "remove" => BookOpCode::Delete,
            "trade" => BookOpCode::TransactVisible,
            "hidden_trade" => BookOpCode::TransactHidden,
            "halt" => BookOpCode::Halt,
            _ => {
                return Err(ReplayError::Action {
                    row,
                    value: self.action.clone(),
                })
            }
        };
        let direction = match self.side.to_ascii_lowercase().as_str() {
            "bid" | "buy" => Side::Bid,
            "ask" | "sell" => Side::Ask,
            _ => {
                return Err(ReplayError::Side {
                    row,
                    value: self.side.clone(),
                })
            }
        };
        let price = self
            .price
            .checked_mul(Decimal::from(PRICE_MULTIPLIER))
            .and_then(|scaled| scaled.trunc().to_i32())
            .ok_or(ReplayError::Price {
                row,
                value: self.price,
            })?;

        Ok(BookOperation {
            timestamp: self.timestamp.timestamp_nanos_opt().unwrap_or(0) as u64,
            op_code,
            symbol_index: self.symbol,
            order_id: 0,
            order_count: self.orders,
            quantity: self.quantity,
            price,
            direction,
            level: self.level,
        })
    }
}

/// Stream operations from any CSV source with a header row.
pub fn read_operations<R: io::Read>(
    reader: R,
) -> impl Iterator<Item = Result<BookOperation, ReplayError>> {
    csv::Reader::from_reader(reader)
        .into_deserialize::<ReplayRow>()
        .enumerate()
        .map(|(index, row)| {
            let row_number = index + 1;
            row.map_err(ReplayError::from)
                .and_then(|r| r.to_operation(row_number))
        })
}

/// Load a whole replay file.
pub fn load_operations(path: &Path) -> Result<Vec<BookOperation>, ReplayError> {
    let reader = csv::Reader::from_path(path)?;
    let mut operations = Vec::new();
    for (index, row) in reader.into_deserialize::<ReplayRow>().enumerate() {
        operations.push(row?.to_operation(index + 1)?);
    }
    tracing::info!(path = %path.display(), operations = operations.len(), "replay loaded");
    Ok(operations)
}
