use thiserror::Error;

/// Conditions after which the tracker can no longer vouch for its own
/// bookkeeping. The non-`try_` entry points abort on these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    #[error("allocation ledger is full ({capacity} entries); raise `max_alloc_list`")]
    LedgerFull { capacity: usize },

    #[error("underlying allocator could not provide {requested} bytes")]
    OutOfMemory { requested: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`max_alloc_list` must be at least 1")]
    ZeroCapacity,

    #[error("`free_history_len` must be at least 1")]
    ZeroFreeHistory,

    #[error("could not parse {var}={value:?}")]
    BadEnv { var: &'static str, value: String },
}
