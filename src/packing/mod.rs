//! Content encoders, keyed by the small integer packing tag.
//!
//! A [`Packer`] turns block cleartext into the bytes handed to a store
//! and back. The built-in packers store bytes as written; the integrity
//! packer additionally carries a per-block SHA-256 checksum in the
//! block's packdata. Encrypting packers plug in behind the same trait.

use ring::digest;

use crate::entry::{Block, DirEntry, Packing};
use crate::errors::{Error, Kind, Result};

const OP_PACK: &str = "packing.pack";
const OP_UNPACK: &str = "packing.unpack";

/// A content encoder for one packing tag.
pub trait Packer: Send + Sync {
    /// The tag this packer serves.
    fn packing(&self) -> Packing;

    /// Encodes one block of cleartext, returning the bytes to store and
    /// the block packdata.
    fn pack(&self, entry: &DirEntry, cleartext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Decodes one stored block back to cleartext, verifying whatever
    /// the packdata carries.
    fn unpack(&self, entry: &DirEntry, block: &Block, stored: &[u8]) -> Result<Vec<u8>>;
}

/// Bytes stored as written, no integrity data.
pub struct PlainPacker;

impl Packer for PlainPacker {
    fn packing(&self) -> Packing {
        Packing::Plain
    }

    fn pack(&self, _entry: &DirEntry, cleartext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((cleartext.to_vec(), Vec::new()))
    }

    fn unpack(&self, _entry: &DirEntry, _block: &Block, stored: &[u8]) -> Result<Vec<u8>> {
        Ok(stored.to_vec())
    }
}

/// Bytes stored as written with a SHA-256 checksum per block. The
/// packing required for Access and Group files.
pub struct IntegrityPacker;

impl Packer for IntegrityPacker {
    fn packing(&self) -> Packing {
        Packing::Integrity
    }

    fn pack(&self, _entry: &DirEntry, cleartext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let sum = digest::digest(&digest::SHA256, cleartext);
        Ok((cleartext.to_vec(), sum.as_ref().to_vec()))
    }

    fn unpack(&self, entry: &DirEntry, block: &Block, stored: &[u8]) -> Result<Vec<u8>> {
        let sum = digest::digest(&digest::SHA256, stored);
        if sum.as_ref() != block.packdata.as_slice() {
            return Err(Error::new(OP_UNPACK, Kind::IO)
                .path(&entry.name)
                .detail("block checksum mismatch"));
        }
        Ok(stored.to_vec())
    }
}

static PLAIN: PlainPacker = PlainPacker;
static INTEGRITY: IntegrityPacker = IntegrityPacker;

/// Looks up the packer registered for `packing`.
pub fn lookup(packing: Packing) -> Result<&'static dyn Packer> {
    match packing {
        Packing::Plain => Ok(&PLAIN),
        Packing::Integrity => Ok(&INTEGRITY),
        Packing::Cipher => {
            Err(Error::new(OP_PACK, Kind::Invalid).detail("no cipher packer registered"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Location;
    use crate::entry::{Attr, Time, SEQ_BASE};

    fn entry() -> DirEntry {
        DirEntry {
            name: "ann@example.com/f".to_string(),
            signed_name: "ann@example.com/f".to_string(),
            attr: Attr::None,
            packing: Packing::Integrity,
            sequence: SEQ_BASE,
            time: Time(0),
            writer: "ann@example.com".to_string(),
            blocks: Vec::new(),
            packdata: Vec::new(),
            link: None,
        }
    }

    #[test]
    fn test_integrity_round_trip() {
        let packer = lookup(Packing::Integrity).unwrap();
        let e = entry();
        let (stored, packdata) = packer.pack(&e, b"hello").unwrap();
        let block =
            Block { offset: 0, size: 5, location: Location::unassigned(), packdata };
        assert_eq!(packer.unpack(&e, &block, &stored).unwrap(), b"hello");
    }

    #[test]
    fn test_integrity_detects_corruption() {
        let packer = lookup(Packing::Integrity).unwrap();
        let e = entry();
        let (_, packdata) = packer.pack(&e, b"hello").unwrap();
        let block =
            Block { offset: 0, size: 5, location: Location::unassigned(), packdata };
        let err = packer.unpack(&e, &block, b"hellO").unwrap_err();
        assert_eq!(err.kind, Kind::IO);
    }

    #[test]
    fn test_no_cipher_packer() {
        assert!(lookup(Packing::Cipher).is_err());
    }
}
