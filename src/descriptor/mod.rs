//! Descriptor model
//!
//! Torrent descriptors, their canonical bencode form and the magnet
//! locator form.

pub mod bencode;
pub mod magnet;
pub mod metainfo;

pub use metainfo::{
    compute_info_hash, validate_file_name, ChunkLayout, ContentHash, Descriptor, HashAlgorithm,
    Sha1Hash,
};

use crate::error::Result;

/// Encode a descriptor as canonical bencode
pub fn encode_descriptor(descriptor: &Descriptor) -> Vec<u8> {
    descriptor.encode()
}

/// Decode a bencoded descriptor
pub fn decode_descriptor(data: &[u8]) -> Result<Descriptor> {
    Descriptor::decode(data)
}

/// Encode a descriptor as a magnet locator
pub fn encode_locator(descriptor: &Descriptor) -> String {
    magnet::encode(descriptor)
}

/// Decode a magnet locator
pub fn decode_locator(uri: &str) -> Result<Descriptor> {
    magnet::decode(uri)
}
