#![deny(
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_must_use
)]

pub mod error;
pub mod exchange_id;
pub mod market_data;
pub mod order;
pub mod order_book;
pub mod symbol;

pub use rust_decimal::Decimal;

use chrono::Utc;
pub type DateTime = chrono::DateTime<Utc>;
