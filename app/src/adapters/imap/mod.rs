pub mod connection;
pub mod source;
pub mod unseen;

pub use source::MessageSource;
