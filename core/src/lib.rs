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

pub mod clock_sync;
pub mod config;
pub mod driver;
pub mod limiter;
pub mod order_book_assembler;
pub mod rest_pipeline;
pub mod signer;
pub mod subscription_registry;
pub mod supervisor;
pub mod ws_client;
