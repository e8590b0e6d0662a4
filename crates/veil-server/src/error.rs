//! Shard error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("cuckoo table: {0}")]
    Table(#[from] veil_cuckoo::TableError),

    #[error("PIR kernel: {0}")]
    Pir(#[from] veil_pir::PirError),
}
