//! Media recovery and ingestion: decryption, type detection, durable
//! upload, and the low-durability side stores.

pub mod decrypt;
pub mod mimetype;
pub mod processor;
pub mod profile_pic;
pub mod thumbnail;

pub use decrypt::{decrypt_media, DecryptRequest, DecryptedMedia};
pub use processor::{
    BatchOptions, BatchResult, MediaProcessor, ProcessOptions, ProcessingResult,
};
