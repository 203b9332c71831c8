// clna: Clonotype assembly and indexed clone storage.
//
// Copyright 2025 The clna authors.
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//

//! Read to clone assignments.
//!
//! ## Record format
//!
//! A [ReadToCloneMapping] is always encoded as 21 big endian bytes:
//!
//! | field       | type |
//! |-------------|------|
//! | alignmentId | u64  |
//! | readId      | u64  |
//! | cloneIndex  | i32  |
//! | mappingType | u8   |
//!
//! The mapping type is a set of flags, see [MappingType] for the
//! combinations that can appear in a valid record.

pub mod index;

use crate::error::Error;
use crate::error::Result;

use std::cmp::Ordering;
use std::io::Read;
use std::io::Write;

use bincode::{Decode, Encode};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const CLUSTERED: u8 = 1;
pub const ADDITIONAL_MAPPING: u8 = 2;
pub const DROPPED_WITH_CLONE: u8 = 4;
pub const PRE_CLUSTERED: u8 = 8;
pub const DROPPED: u8 = 16;

/// Encoded size of a [ReadToCloneMapping].
pub const RECORD_SIZE: usize = 21;

/// How a read ended up in its clone, or why it has none.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum MappingType {
    /// Read was used to build the clone.
    Core,
    /// Read belongs to a clonotype that was clustered into this clone.
    Clustered,
    /// Low quality read mapped onto the clone.
    Mapped,
    /// Read belongs to a clonotype that was merged into this clone during pre-clustering.
    PreClustered,
    /// Read was not assigned to any clonotype.
    #[default]
    Dropped,
    /// Read was assigned to a clonotype that was later filtered out.
    DroppedWithClone,
}

impl MappingType {
    pub fn flags(self) -> u8 {
        match self {
            MappingType::Core => 0,
            MappingType::Clustered => CLUSTERED,
            MappingType::Mapped => ADDITIONAL_MAPPING,
            MappingType::PreClustered => PRE_CLUSTERED,
            MappingType::Dropped => DROPPED,
            MappingType::DroppedWithClone => DROPPED_WITH_CLONE | DROPPED,
        }
    }

    /// None for flag combinations that never appear in a valid record.
    pub fn from_flags(flags: u8) -> Option<Self> {
        match flags {
            0 => Some(MappingType::Core),
            CLUSTERED => Some(MappingType::Clustered),
            ADDITIONAL_MAPPING => Some(MappingType::Mapped),
            PRE_CLUSTERED => Some(MappingType::PreClustered),
            DROPPED => Some(MappingType::Dropped),
            x if x == DROPPED_WITH_CLONE | DROPPED => Some(MappingType::DroppedWithClone),
            _ => None,
        }
    }

    pub fn is_dropped(self) -> bool {
        self.flags() & DROPPED != 0
    }
}

impl Encode for MappingType {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> std::result::Result<(), bincode::error::EncodeError> {
        self.flags().encode(encoder)
    }
}

impl<Context> Decode<Context> for MappingType {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> std::result::Result<Self, bincode::error::DecodeError> {
        let flags = u8::decode(decoder)?;
        MappingType::from_flags(flags).ok_or_else(|| {
            bincode::error::DecodeError::OtherString(format!("'{}' is not a valid MappingType", flags))
        })
    }
}
bincode::impl_borrow_decode!(MappingType);

/// Final assignment of one alignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub struct ReadToCloneMapping {
    pub alignments_id: u64,
    pub read_id: u64,
    pub clone_index: i32,
    pub mapping_type: MappingType,
}

impl ReadToCloneMapping {
    /// Fails unless the mapping type is a dropped one exactly when `clone_index` is negative.
    pub fn new(alignments_id: u64, read_id: u64, clone_index: i32, mapping_type: MappingType) -> Result<Self> {
        if (clone_index < 0) != mapping_type.is_dropped() {
            return Err(Error::InvalidMapping { clone_index: clone_index as i64, flags: mapping_type.flags() });
        }
        Ok(ReadToCloneMapping { alignments_id, read_id, clone_index, mapping_type })
    }

    pub fn is_dropped(&self) -> bool {
        self.mapping_type.is_dropped()
    }

    pub fn write_to<W: Write>(&self, conn: &mut W) -> Result<()> {
        conn.write_u64::<BigEndian>(self.alignments_id)?;
        conn.write_u64::<BigEndian>(self.read_id)?;
        conn.write_i32::<BigEndian>(self.clone_index)?;
        conn.write_u8(self.mapping_type.flags())?;
        Ok(())
    }

    pub fn read_from<R: Read>(conn: &mut R) -> Result<Self> {
        let alignments_id = conn.read_u64::<BigEndian>()?;
        let read_id = conn.read_u64::<BigEndian>()?;
        let clone_index = conn.read_i32::<BigEndian>()?;
        let flags = conn.read_u8()?;
        let mapping_type = MappingType::from_flags(flags)
            .ok_or(Error::InvalidMapping { clone_index: clone_index as i64, flags })?;
        ReadToCloneMapping::new(alignments_id, read_id, clone_index, mapping_type)
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0_u8; RECORD_SIZE];
        bytes[0..8].copy_from_slice(&self.alignments_id.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.read_id.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.clone_index.to_be_bytes());
        bytes[20] = self.mapping_type.flags();
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_SIZE {
            return Err(Error::corrupted(format!("mapping record needs {} bytes, got {}", RECORD_SIZE, bytes.len())));
        }
        let mut conn = &bytes[0..RECORD_SIZE];
        ReadToCloneMapping::read_from(&mut conn)
    }

    pub fn by_clone(a: &ReadToCloneMapping, b: &ReadToCloneMapping) -> Ordering {
        a.clone_index.cmp(&b.clone_index).then(a.alignments_id.cmp(&b.alignments_id))
    }

    pub fn by_alignment(a: &ReadToCloneMapping, b: &ReadToCloneMapping) -> Ordering {
        a.alignments_id.cmp(&b.alignments_id)
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn flags_are_closed() {
        use super::MappingType;

        let valid: Vec<u8> = (0..=u8::MAX).filter(|x| MappingType::from_flags(*x).is_some()).collect();
        assert_eq!(valid, vec![0, 1, 2, 8, 16, 20]);
        assert!(MappingType::DroppedWithClone.is_dropped());
        assert!(!MappingType::PreClustered.is_dropped());
    }

    #[test]
    fn record_is_21_bytes_big_endian() {
        use super::{MappingType, ReadToCloneMapping};

        let record = ReadToCloneMapping::new(0x0102, 7, 3, MappingType::Mapped).unwrap();
        let mut bytes: Vec<u8> = Vec::new();
        record.write_to(&mut bytes).unwrap();

        assert_eq!(bytes.len(), 21);
        assert_eq!(bytes.to_vec(), record.to_bytes().to_vec());
        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&bytes[16..21], &[0, 0, 0, 3, 2]);
        assert_eq!(ReadToCloneMapping::from_bytes(&bytes).unwrap(), record);

        let dropped = ReadToCloneMapping::new(9, 9, -1, MappingType::DroppedWithClone).unwrap();
        assert_eq!(ReadToCloneMapping::from_bytes(&dropped.to_bytes()).unwrap(), dropped);
    }

    #[test]
    fn dropped_iff_negative_clone() {
        use super::{MappingType, ReadToCloneMapping};
        use crate::error::Error;

        assert!(matches!(ReadToCloneMapping::new(0, 0, -1, MappingType::Core), Err(Error::InvalidMapping { .. })));
        assert!(matches!(ReadToCloneMapping::new(0, 0, 4, MappingType::Dropped), Err(Error::InvalidMapping { .. })));

        let mut bytes = ReadToCloneMapping::new(0, 0, 1, MappingType::Core).unwrap().to_bytes();
        bytes[20] = 3;
        assert!(ReadToCloneMapping::from_bytes(&bytes).is_err());
    }
}
