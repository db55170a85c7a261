//! Stock transfer domain module (warehouse to warehouse).

pub mod transfer;

pub use transfer::{
    NewStockTransfer, NewStockTransferItem, StockTransfer, StockTransferItem, TransferStatus,
};
