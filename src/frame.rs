/*!
    on-wire frame model: building and parsing of frames and the datagrams they carry.

    A frame is a 2-byte [FrameHeader] followed by one or more datagrams, each
    being a 10-byte [DatagramHeader], a payload of `len` bytes, and a 2-byte
    working counter incremented by every device that executed the command.
*/

use bilge::prelude::*;
use crate::{
    data::{self, Cursor, WireData},
    error::{Error, Result},
    };

/// maximum frame size, limited by the size its header can encode (11 bits)
pub const MAX_FRAME: usize = 2050;

/// frame kind carried in the header, only process-data frames exist on this segment
const KIND_PDU: u8 = 0x1;

/// frame header common to all mediums
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
struct FrameHeader {
    /// length of the frame content (the header excluded)
    len: u11,
    reserved: u1,
    /// frame kind, see [KIND_PDU]
    kind: u4,
}
data::bilge_wiredata!(FrameHeader, u16);

/// header of one datagram inside a frame
#[bitsize(80)]
#[derive(FromBits, DebugBits, Clone, Default)]
pub struct DatagramHeader {
    /// command, specifying the addressed memory and the read/write operation
    pub command: u8,
    /// request identifier, echoed untouched by the devices
    pub token: u8,
    /// device address, its meaning depends on the command
    pub slave: u16,
    /// memory address of the data to access
    pub offset: u16,
    /// payload length following the header, excluding the working counter
    pub len: u11,
    reserved: u3,
    pub circulating: bool,
    /// true if an other datagram follows in the same frame
    pub next: bool,
    pub irq: u16,
}
data::bilge_wiredata!(DatagramHeader, u80);

/// the possible datagram commands
#[bitsize(8)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Command {
    /// no operation
    #[fallback]
    #[default]
    NOP = 0x0,

    /// auto-incremented (positional) read
    APRD = 0x01,
    /// auto-incremented (positional) write
    APWR = 0x02,
    /// auto-incremented (positional) read & write
    APRW = 0x03,

    /// configured-address read
    FPRD = 0x04,
    /// configured-address write
    FPWR = 0x05,
    /// configured-address read & write
    FPRW = 0x06,

    /// broadcast read
    BRD = 0x07,
    /// broadcast write
    BWR = 0x08,
    /// broadcast read & write
    BRW = 0x09,

    /// logical memory read
    LRD = 0x0A,
    /// logical memory write
    LWR = 0x0B,
    /// logical memory read & write
    LRW = 0x0C,
}

/**
    incremental frame builder

    Datagrams are appended with [Self::push], which chains the `next` flags;
    [Self::finish] stamps the frame header and yields the wire bytes.
*/
pub struct FrameBuf {
    buffer: [u8; MAX_FRAME],
    end: usize,
    /// offset of the last pushed datagram header, to flip its `next` flag
    last: Option<usize>,
}
impl FrameBuf {
    pub fn new() -> Self {
        Self {
            buffer: [0; MAX_FRAME],
            end: FrameHeader::packed_size(),
            last: None,
        }
    }

    /// true if no datagram was pushed yet
    pub fn is_empty(&self) -> bool {self.last.is_none()}

    /// append one datagram, the working counter is 0 on master-built frames
    pub fn push(&mut self, command: Command, token: u8, slave: u16, offset: u16, data: &[u8], working_count: u16) -> Result<()> {
        let needed = DatagramHeader::packed_size() + data.len() + u16::packed_size();
        if self.end + needed > MAX_FRAME {
            return Err(Error::Master("frame capacity exceeded"));
        }
        // chain the previous datagram to this one
        if let Some(last) = self.last {
            let place = &mut self.buffer[last .. last + DatagramHeader::packed_size()];
            let mut header = DatagramHeader::unpack(place)?;
            header.set_next(true);
            header.pack(place)?;
        }
        self.last = Some(self.end);

        let mut cursor = Cursor::new(&mut self.buffer[self.end ..]);
        cursor.pack(&DatagramHeader::new(
            u8::from(command),
            token,
            slave,
            offset,
            u11::new(data.len() as u16),
            false,
            false,
            0,
            ))?;
        cursor.write(data)?;
        cursor.pack(&working_count)?;
        self.end += cursor.position();
        Ok(())
    }

    /// stamp the frame header and return the bytes to send
    pub fn finish(&mut self) -> &[u8] {
        FrameHeader::new(
            u11::new((self.end - FrameHeader::packed_size()) as u16),
            u4::new(KIND_PDU),
            ).pack(&mut self.buffer)
            .expect("frame header always fits");
        &self.buffer[.. self.end]
    }
}

/// one datagram extracted from a received frame
pub struct Datagram<'a> {
    pub header: DatagramHeader,
    pub data: &'a [u8],
    pub working_count: u16,
}

/**
    check the frame header of received bytes and iterate over the datagrams inside

    Fails with [Error::MalformedFrame] when the declared lengths disagree with
    the received byte count or the frame kind is unknown.
*/
pub fn parse(frame: &[u8]) -> Result<Datagrams<'_>> {
    let header = FrameHeader::unpack(frame)?;
    if u8::from(header.kind()) != KIND_PDU {
        return Err(Error::MalformedFrame("unknown frame kind"));
    }
    let declared = usize::from(u16::from(header.len()));
    let content = frame.get(FrameHeader::packed_size() ..)
        .ok_or(Error::MalformedFrame("frame shorter than its header"))?;
    if declared > content.len() {
        return Err(Error::MalformedFrame("declared length exceeds received bytes"));
    }
    let content = &content[.. declared];
    Ok(Datagrams {
        cursor: Cursor::new(content),
        more: ! content.is_empty(),
    })
}

/// iterator over the datagrams of a received frame, see [parse]
pub struct Datagrams<'a> {
    cursor: Cursor<&'a [u8]>,
    more: bool,
}
impl<'a> Iterator for Datagrams<'a> {
    type Item = Result<Datagram<'a>>;
    fn next(&mut self) -> Option<Self::Item> {
        if ! self.more {return None}
        Some(self.extract())
    }
}
impl<'a> Datagrams<'a> {
    fn extract(&mut self) -> Result<Datagram<'a>> {
        self.more = false;
        let header = self.cursor.unpack::<DatagramHeader>()
            .map_err(|_| Error::MalformedFrame("truncated datagram header"))?;
        let data = self.cursor.read(usize::from(u16::from(header.len())))
            .map_err(|_| Error::MalformedFrame("truncated datagram payload"))?;
        let working_count = self.cursor.unpack::<u16>()
            .map_err(|_| Error::MalformedFrame("missing working counter"))?;
        if header.next() {
            self.more = true;
        }
        else if ! self.cursor.remain().is_empty() {
            return Err(Error::MalformedFrame("frame length disagrees with its datagrams"));
        }
        Ok(Datagram {header, data, working_count})
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn collect(frame: &[u8]) -> Result<Vec<(Command, u8, Vec<u8>, u16)>> {
        parse(frame)?
            .map(|item| item.map(|dg| (
                Command::from(dg.header.command()),
                dg.header.token(),
                dg.data.to_vec(),
                dg.working_count,
                )))
            .collect()
    }

    #[test]
    fn single_datagram_roundtrip() {
        let mut frame = FrameBuf::new();
        frame.push(Command::APRD, 7, 0xfffe, 0x0130, &[0, 0], 0).unwrap();
        let parsed = collect(frame.finish()).unwrap();
        assert_eq!(parsed, vec![(Command::APRD, 7, vec![0, 0], 0)]);
    }

    #[test]
    fn datagrams_chain_with_next() {
        let mut frame = FrameBuf::new();
        frame.push(Command::FPRD, 1, 0x1000, 0x0e00, &[0; 16], 0).unwrap();
        frame.push(Command::FPRD, 2, 0x1000, 0x0012, &[0; 2], 0).unwrap();
        frame.push(Command::FPRD, 3, 0x1000, 0x0e10, &[0; 32], 0).unwrap();
        let parsed = collect(frame.finish()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].1, 2);
        assert_eq!(parsed[2].2.len(), 32);
    }

    #[test]
    fn oversized_push_is_refused() {
        let mut frame = FrameBuf::new();
        assert!(frame.push(Command::LWR, 0, 0, 0, &[0; MAX_FRAME], 0).is_err());
        // the frame stays usable
        frame.push(Command::BRD, 0, 0, 0, &[0], 0).unwrap();
        assert_eq!(collect(frame.finish()).unwrap().len(), 1);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut frame = FrameBuf::new();
        frame.push(Command::BWR, 0, 0, 0x0010, &[0, 0], 0).unwrap();
        let bytes = frame.finish().to_vec();
        assert!(matches!(
            collect(&bytes[.. bytes.len() - 3]),
            Err(Error::MalformedFrame(_)),
            ));
    }

    #[test]
    fn dangling_next_is_rejected() {
        let mut frame = FrameBuf::new();
        frame.push(Command::BRD, 0, 0, 0x0130, &[0], 0).unwrap();
        frame.push(Command::BRD, 1, 0, 0x0130, &[0], 0).unwrap();
        let mut bytes = frame.finish().to_vec();
        // keep only the first datagram but leave its `next` flag raised
        bytes.truncate(FrameHeader::packed_size() + DatagramHeader::packed_size() + 1 + 2);
        bytes[0] = (bytes.len() - FrameHeader::packed_size()) as u8;
        assert!(matches!(
            collect(&bytes),
            Err(Error::MalformedFrame(_)),
            ));
    }

    #[test]
    fn padding_after_declared_length_is_ignored() {
        let mut frame = FrameBuf::new();
        frame.push(Command::BRD, 0, 0, 0x0130, &[0], 0).unwrap();
        let mut bytes = frame.finish().to_vec();
        // ethernet minimum-size padding lands after the declared content
        bytes.extend_from_slice(&[0; 30]);
        assert_eq!(collect(&bytes).unwrap().len(), 1);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut frame = FrameBuf::new();
        frame.push(Command::BRD, 0, 0, 0, &[0], 0).unwrap();
        let mut bytes = frame.finish().to_vec();
        bytes[1] |= 0xf0;
        assert!(matches!(parse(&bytes), Err(Error::MalformedFrame(_))));
    }
}
