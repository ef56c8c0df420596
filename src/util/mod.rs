pub mod hexdump;
pub mod hint;
