//! Little-endian datagram codec used on the middleware connection
//!
//! On the wire every datagram is preceded by a 16-bit length. Strings and
//! blobs inside a datagram carry their own 16-bit length prefix.

use crate::channel::ChannelId;
use crate::error::DatagramError;

/// Maximum payload carried by one length-prefixed frame.
pub const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// Growable outbound datagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datagram {
    data: Vec<u8>,
}

impl Datagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Starts an internal datagram addressed to `recipients` from `sender`.
    ///
    /// The recipient count is a single byte on the wire.
    pub fn server_header(
        recipients: &[ChannelId],
        sender: ChannelId,
        msg_type: u16,
    ) -> Result<Self, DatagramError> {
        let count = u8::try_from(recipients.len()).map_err(|_| DatagramError::TooManyEntries {
            count: recipients.len(),
            max: u8::MAX as usize,
        })?;

        let mut dg = Self::new();
        dg.add_u8(count);
        for channel in recipients {
            dg.add_u64(*channel);
        }
        dg.add_u64(sender);
        dg.add_u16(msg_type);
        Ok(dg)
    }

    /// Writes a 16-bit element count.
    pub fn add_count(&mut self, count: usize) -> Result<(), DatagramError> {
        let value = u16::try_from(count).map_err(|_| DatagramError::TooManyEntries {
            count,
            max: u16::MAX as usize,
        })?;
        self.add_u16(value);
        Ok(())
    }

    /// Starts a control datagram for the Message Director itself.
    pub fn control_header(msg_type: u16) -> Self {
        let mut dg = Self::new();
        dg.add_u8(1);
        dg.add_u64(crate::constants::CONTROL_CHANNEL);
        dg.add_u16(msg_type);
        dg
    }

    pub fn add_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn add_bool(&mut self, value: bool) {
        self.add_u8(value as u8);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_string(&mut self, value: &str) -> Result<(), DatagramError> {
        self.add_blob(value.as_bytes())
    }

    pub fn add_blob(&mut self, value: &[u8]) -> Result<(), DatagramError> {
        if value.len() > MAX_DATAGRAM_SIZE {
            return Err(DatagramError::TooLong(value.len()));
        }
        self.add_u16(value.len() as u16);
        self.data.extend_from_slice(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Frame for the wire: 16-bit length followed by the payload.
    pub fn to_frame(&self) -> Result<Vec<u8>, DatagramError> {
        if self.data.len() > MAX_DATAGRAM_SIZE {
            return Err(DatagramError::TooLong(self.data.len()));
        }
        let mut frame = Vec::with_capacity(self.data.len() + 2);
        frame.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        frame.extend_from_slice(&self.data);
        Ok(frame)
    }

    pub fn iter(&self) -> DatagramIterator<'_> {
        DatagramIterator::new(&self.data)
    }
}

/// Sequential reader over a received datagram.
#[derive(Debug)]
pub struct DatagramIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DatagramIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DatagramError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(DatagramError::Truncated {
                needed,
                offset: self.offset,
                remaining,
            });
        }
        let slice = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DatagramError> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(self.take(N)?);
        Ok(bytes)
    }

    pub fn get_u8(&mut self) -> Result<u8, DatagramError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, DatagramError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, DatagramError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, DatagramError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, DatagramError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn get_blob(&mut self) -> Result<Vec<u8>, DatagramError> {
        let len = self.get_u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_string(&mut self) -> Result<String, DatagramError> {
        String::from_utf8(self.get_blob()?).map_err(|_| DatagramError::InvalidUtf8)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Fails when unread bytes are left over.
    pub fn finish(&self) -> Result<(), DatagramError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DatagramError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_little_endian() {
        let mut dg = Datagram::new();
        dg.add_u16(0x0102);
        dg.add_u32(0x03040506);
        assert_eq!(dg.as_bytes(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_string_is_length_prefixed() {
        let mut dg = Datagram::new();
        dg.add_string("abc").unwrap();
        assert_eq!(dg.as_bytes(), &[3, 0, b'a', b'b', b'c']);

        let mut it = dg.iter();
        assert_eq!(it.get_string().unwrap(), "abc");
        assert!(it.finish().is_ok());
    }

    #[test]
    fn test_truncated_read() {
        let dg = Datagram::from_bytes(vec![1, 2, 3]);
        let mut it = dg.iter();
        match it.get_u32() {
            Err(DatagramError::Truncated {
                needed, remaining, ..
            }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 3);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let dg = Datagram::from_bytes(vec![2, 0, 0xFF, 0xFE]);
        assert!(matches!(
            dg.iter().get_string(),
            Err(DatagramError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_server_header_layout() {
        let dg = Datagram::server_header(&[10, 20], 99, 2020).unwrap();
        let mut it = dg.iter();
        assert_eq!(it.get_u8().unwrap(), 2);
        assert_eq!(it.get_u64().unwrap(), 10);
        assert_eq!(it.get_u64().unwrap(), 20);
        assert_eq!(it.get_u64().unwrap(), 99);
        assert_eq!(it.get_u16().unwrap(), 2020);
        assert!(it.finish().is_ok());
    }

    #[test]
    fn test_server_header_rejects_too_many_recipients() {
        let recipients: Vec<ChannelId> = (0..256).collect();
        assert!(matches!(
            Datagram::server_header(&recipients, 99, 2020),
            Err(DatagramError::TooManyEntries { count: 256, max: 255 })
        ));
        assert!(Datagram::server_header(&recipients[..255], 99, 2020).is_ok());
    }

    #[test]
    fn test_count_over_u16_is_rejected() {
        let mut dg = Datagram::new();
        assert!(matches!(
            dg.add_count(70_000),
            Err(DatagramError::TooManyEntries { count: 70_000, .. })
        ));
        assert!(dg.is_empty());
    }

    #[test]
    fn test_frame_prefix() {
        let mut dg = Datagram::new();
        dg.add_u8(7);
        assert_eq!(dg.to_frame().unwrap(), vec![1, 0, 7]);
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let dg = Datagram::from_bytes(vec![1, 0, 9]);
        let mut it = dg.iter();
        it.get_u16().unwrap();
        assert!(matches!(it.finish(), Err(DatagramError::TrailingBytes(1))));
    }
}
