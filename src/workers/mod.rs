pub mod handler;
pub mod transcoder;
