pub mod serde_usize;
