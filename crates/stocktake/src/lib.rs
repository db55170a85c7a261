//! Stocktake (physical count) domain module.
//!
//! Counts are captured against a snapshot of system quantity; finalizing
//! reconciles on-hand to the counted figures.

pub mod count;

pub use count::{NewStocktake, NewStocktakeItem, Stocktake, StocktakeItem, StocktakeStatus};
