//! Thread Operational Dataset and its MeshCoP TLV wire form.

use std::convert::TryFrom;
use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, ErrorKind, Result};

/// Maximum encoded dataset length accepted by the stack.
pub const MAX_DATASET_TLVS_LENGTH: usize = 254;

// MeshCoP TLV types carried in an operational dataset.
const TLV_CHANNEL: u8 = 0;
const TLV_PAN_ID: u8 = 1;
const TLV_EXT_PAN_ID: u8 = 2;
const TLV_NETWORK_NAME: u8 = 3;
const TLV_PSKC: u8 = 4;
const TLV_NETWORK_KEY: u8 = 5;
const TLV_MESH_LOCAL_PREFIX: u8 = 7;
const TLV_SECURITY_POLICY: u8 = 12;
const TLV_ACTIVE_TIMESTAMP: u8 = 14;
const TLV_PENDING_TIMESTAMP: u8 = 51;
const TLV_DELAY_TIMER: u8 = 52;
const TLV_CHANNEL_MASK: u8 = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub rotation_time: u16,
    pub flags: u8,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        // 672 hours rotation with all of O/N/R/C/B set is the stack default.
        SecurityPolicy {
            rotation_time: 672,
            flags: 0xf8,
        }
    }
}

/// A Thread Operational Dataset with optional components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationalDataset {
    pub active_timestamp: Option<u64>,
    pub pending_timestamp: Option<u64>,
    pub network_key: Option<[u8; 16]>,
    pub network_name: Option<String>,
    pub ext_pan_id: Option<[u8; 8]>,
    pub mesh_local_prefix: Option<[u8; 8]>,
    pub delay_ms: Option<u32>,
    pub pan_id: Option<u16>,
    pub channel: Option<u16>,
    pub channel_mask: Option<u32>,
    pub pskc: Option<[u8; 16]>,
    pub security_policy: Option<SecurityPolicy>,
}

impl OperationalDataset {
    /// Encodes every present component into dataset TLVs.
    pub fn to_tlvs(&self) -> Result<DatasetTlvs> {
        let mut data = Vec::new();

        if let Some(timestamp) = self.active_timestamp {
            push_tlv(&mut data, TLV_ACTIVE_TIMESTAMP, &timestamp.to_be_bytes());
        }
        if let Some(timestamp) = self.pending_timestamp {
            push_tlv(&mut data, TLV_PENDING_TIMESTAMP, &timestamp.to_be_bytes());
        }
        if let Some(delay) = self.delay_ms {
            push_tlv(&mut data, TLV_DELAY_TIMER, &delay.to_be_bytes());
        }
        if let Some(channel) = self.channel {
            // Channel TLV carries the channel page followed by the channel.
            let mut body = vec![0u8];
            body.extend_from_slice(&channel.to_be_bytes());
            push_tlv(&mut data, TLV_CHANNEL, &body);
        }
        if let Some(mask) = self.channel_mask {
            // One mask entry for channel page 0.
            let mut body = vec![0u8, 4u8];
            body.extend_from_slice(&mask.to_be_bytes());
            push_tlv(&mut data, TLV_CHANNEL_MASK, &body);
        }
        if let Some(pan_id) = self.pan_id {
            push_tlv(&mut data, TLV_PAN_ID, &pan_id.to_be_bytes());
        }
        if let Some(ext_pan_id) = &self.ext_pan_id {
            push_tlv(&mut data, TLV_EXT_PAN_ID, ext_pan_id);
        }
        if let Some(name) = &self.network_name {
            if name.is_empty() || name.len() > 16 {
                return Err(Error::new(ErrorKind::InvalidArgs, "Bad network name"));
            }
            push_tlv(&mut data, TLV_NETWORK_NAME, name.as_bytes());
        }
        if let Some(key) = &self.network_key {
            push_tlv(&mut data, TLV_NETWORK_KEY, key);
        }
        if let Some(pskc) = &self.pskc {
            push_tlv(&mut data, TLV_PSKC, pskc);
        }
        if let Some(prefix) = &self.mesh_local_prefix {
            push_tlv(&mut data, TLV_MESH_LOCAL_PREFIX, prefix);
        }
        if let Some(policy) = &self.security_policy {
            let mut body = Vec::with_capacity(3);
            body.extend_from_slice(&policy.rotation_time.to_be_bytes());
            body.push(policy.flags);
            push_tlv(&mut data, TLV_SECURITY_POLICY, &body);
        }

        DatasetTlvs::try_from(data.as_slice())
    }

    /// Parses dataset TLVs, ignoring TLV types this model does not track.
    pub fn from_tlvs(tlvs: &DatasetTlvs) -> Result<Self> {
        let mut dataset = OperationalDataset::default();
        let data = tlvs.as_slice();
        let mut cursor = Cursor::new(data);

        while (cursor.position() as usize) < data.len() {
            let tlv_type = cursor
                .read_u8()
                .map_err(|_| Error::new(ErrorKind::Parse, "Truncated TLV header"))?;
            let length = cursor
                .read_u8()
                .map_err(|_| Error::new(ErrorKind::Parse, "Truncated TLV header"))? as usize;

            let mut value = vec![0u8; length];
            cursor
                .read_exact(&mut value)
                .map_err(|_| Error::new(ErrorKind::Parse, "Truncated TLV value"))?;

            let mut body = Cursor::new(value.as_slice());
            match tlv_type {
                TLV_ACTIVE_TIMESTAMP => {
                    dataset.active_timestamp = Some(read_u64(&mut body, length, 8)?)
                }
                TLV_PENDING_TIMESTAMP => {
                    dataset.pending_timestamp = Some(read_u64(&mut body, length, 8)?)
                }
                TLV_DELAY_TIMER => {
                    expect_len(length, 4)?;
                    dataset.delay_ms = Some(
                        body.read_u32::<BigEndian>()
                            .map_err(|_| parse_err())?,
                    );
                }
                TLV_CHANNEL => {
                    expect_len(length, 3)?;
                    let _page = body.read_u8().map_err(|_| parse_err())?;
                    dataset.channel =
                        Some(body.read_u16::<BigEndian>().map_err(|_| parse_err())?);
                }
                TLV_CHANNEL_MASK => {
                    expect_len(length, 6)?;
                    let _page = body.read_u8().map_err(|_| parse_err())?;
                    let entry_len = body.read_u8().map_err(|_| parse_err())?;
                    expect_len(entry_len as usize, 4)?;
                    dataset.channel_mask =
                        Some(body.read_u32::<BigEndian>().map_err(|_| parse_err())?);
                }
                TLV_PAN_ID => {
                    expect_len(length, 2)?;
                    dataset.pan_id =
                        Some(body.read_u16::<BigEndian>().map_err(|_| parse_err())?);
                }
                TLV_EXT_PAN_ID => {
                    expect_len(length, 8)?;
                    let mut ext_pan_id = [0u8; 8];
                    ext_pan_id.copy_from_slice(&value);
                    dataset.ext_pan_id = Some(ext_pan_id);
                }
                TLV_NETWORK_NAME => {
                    let name = String::from_utf8(value.clone())
                        .map_err(|_| Error::new(ErrorKind::Parse, "Network name is not UTF-8"))?;
                    dataset.network_name = Some(name);
                }
                TLV_NETWORK_KEY => {
                    expect_len(length, 16)?;
                    let mut key = [0u8; 16];
                    key.copy_from_slice(&value);
                    dataset.network_key = Some(key);
                }
                TLV_PSKC => {
                    expect_len(length, 16)?;
                    let mut pskc = [0u8; 16];
                    pskc.copy_from_slice(&value);
                    dataset.pskc = Some(pskc);
                }
                TLV_MESH_LOCAL_PREFIX => {
                    expect_len(length, 8)?;
                    let mut prefix = [0u8; 8];
                    prefix.copy_from_slice(&value);
                    dataset.mesh_local_prefix = Some(prefix);
                }
                TLV_SECURITY_POLICY => {
                    if length < 3 {
                        return Err(parse_err());
                    }
                    let rotation_time = body.read_u16::<BigEndian>().map_err(|_| parse_err())?;
                    let flags = body.read_u8().map_err(|_| parse_err())?;
                    dataset.security_policy = Some(SecurityPolicy {
                        rotation_time,
                        flags,
                    });
                }
                _ => {}
            }
        }

        Ok(dataset)
    }

    /// Whether `other` identifies the same network: channel, network key and
    /// extended PAN ID all match.
    pub fn is_same_network(&self, other: &OperationalDataset) -> bool {
        self.channel == other.channel
            && self.network_key == other.network_key
            && self.ext_pan_id == other.ext_pan_id
    }
}

fn parse_err() -> Error {
    Error::new(ErrorKind::Parse, "Malformed dataset TLV")
}

fn expect_len(actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(parse_err())
    }
}

fn read_u64(body: &mut Cursor<&[u8]>, actual: usize, expected: usize) -> Result<u64> {
    expect_len(actual, expected)?;
    body.read_u64::<BigEndian>().map_err(|_| parse_err())
}

fn push_tlv(data: &mut Vec<u8>, tlv_type: u8, value: &[u8]) {
    data.push(tlv_type);
    data.push(value.len() as u8);
    data.extend_from_slice(value);
}

/// Length-checked encoded operational dataset.
#[derive(Clone, PartialEq, Eq)]
pub struct DatasetTlvs {
    data: Vec<u8>,
}

impl DatasetTlvs {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl TryFrom<&[u8]> for DatasetTlvs {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_DATASET_TLVS_LENGTH {
            return Err(Error::new(ErrorKind::InvalidArgs, "Dataset TLVs too long"));
        }
        Ok(DatasetTlvs {
            data: data.to_vec(),
        })
    }
}

impl fmt::Debug for DatasetTlvs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetTlvs({})", hex::encode(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> OperationalDataset {
        OperationalDataset {
            active_timestamp: Some(1),
            pending_timestamp: None,
            network_key: Some([0x11; 16]),
            network_name: Some("OpenThread-c64e".to_owned()),
            ext_pan_id: Some([0xde, 0xad, 0x00, 0xbe, 0xef, 0x00, 0xca, 0xfe]),
            mesh_local_prefix: Some([0xfd, 0x00, 0xdb, 0x08, 0x00, 0x00, 0x00, 0x00]),
            delay_ms: None,
            pan_id: Some(0xc64e),
            channel: Some(15),
            channel_mask: Some(0x07fff800),
            pskc: Some([0x22; 16]),
            security_policy: Some(SecurityPolicy::default()),
        }
    }

    #[test]
    fn test_dataset_tlv_round_trip() {
        let dataset = sample_dataset();
        let tlvs = dataset.to_tlvs().unwrap();
        let parsed = OperationalDataset::from_tlvs(&tlvs).unwrap();
        assert_eq!(parsed, dataset);
    }

    #[test]
    fn test_pending_components_round_trip() {
        let dataset = OperationalDataset {
            pending_timestamp: Some(2),
            delay_ms: Some(300_000),
            ..sample_dataset()
        };
        let tlvs = dataset.to_tlvs().unwrap();
        let parsed = OperationalDataset::from_tlvs(&tlvs).unwrap();
        assert_eq!(parsed.pending_timestamp, Some(2));
        assert_eq!(parsed.delay_ms, Some(300_000));
    }

    #[test]
    fn test_unknown_tlvs_are_skipped() {
        let mut data = sample_dataset().to_tlvs().unwrap().to_vec();
        // Steering data TLV, not tracked by this model.
        data.extend_from_slice(&[8, 2, 0xff, 0xff]);
        let tlvs = DatasetTlvs::try_from(data.as_slice()).unwrap();
        let parsed = OperationalDataset::from_tlvs(&tlvs).unwrap();
        assert_eq!(parsed, sample_dataset());
    }

    #[test]
    fn test_oversized_tlvs_rejected() {
        let data = vec![0u8; MAX_DATASET_TLVS_LENGTH + 1];
        assert_eq!(
            DatasetTlvs::try_from(data.as_slice()).unwrap_err().kind(),
            ErrorKind::InvalidArgs
        );
    }

    #[test]
    fn test_same_network_comparison() {
        let dataset = sample_dataset();
        let mut other = dataset.clone();
        assert!(dataset.is_same_network(&other));
        other.channel = Some(16);
        assert!(!dataset.is_same_network(&other));
    }

    #[test]
    fn test_truncated_tlvs_rejected() {
        let tlvs = DatasetTlvs::try_from(&[TLV_PAN_ID, 2, 0x12][..]).unwrap();
        assert_eq!(
            OperationalDataset::from_tlvs(&tlvs).unwrap_err().kind(),
            ErrorKind::Parse
        );
    }
}
