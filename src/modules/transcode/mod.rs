pub mod derivatives;
pub mod error;
pub mod events;
pub mod ffmpeg;
pub mod layout;
pub mod locks;
pub mod metadata;
pub mod service;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;
