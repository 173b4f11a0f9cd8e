//! Parsing and serialization for the TCP header described in RFC 793 p15
//! s3.1, including the maximum segment size option. Other options are
//! tolerated and skipped. The checksum covers the header, the text, and the
//! IPv4 pseudo-header.

use crate::utility::{Checksum, Ipv4Address};
use thiserror::Error as ThisError;

/// The length in bytes of a TCP header with no options.
const BASE_OCTETS: u8 = 20;

/// End of option list.
const OPTION_END: u8 = 0;
/// No-operation, used to pad between options.
const OPTION_NOP: u8 = 1;
/// Maximum segment size, the only option this implementation acts on.
const OPTION_MSS: u8 = 2;

/// A parsed TCP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// The sequence number of the first text octet, or the initial sequence
    /// number when SYN is set
    pub seq: u32,
    /// The next sequence number the sender expects to receive, significant
    /// only when the ACK control bit is set
    pub ack: u32,
    pub ctl: Control,
    pub wnd: u16,
    pub checksum: u16,
    /// Parsed but never acted on; the urgent mechanism is deprecated
    pub urgent: u16,
    /// The maximum segment size option, legal only on SYN segments
    pub mss: Option<u16>,
    /// The length of the header in bytes, options included
    pub offset: u8,
}

impl TcpHeader {
    /// Parses a header from a byte iterator. The iterator must yield the
    /// entire TCP segment since the trailing text participates in the
    /// checksum; the caller separately slices the text off at
    /// [`offset`](Self::offset) bytes.
    pub fn from_bytes(
        mut bytes: impl Iterator<Item = u8>,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
    ) -> Result<Self, ParseError> {
        let mut next = || -> Result<u8, ParseError> { bytes.next().ok_or(ParseError::HeaderTooShort) };
        let mut checksum = Checksum::new();

        let src_port = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(src_port);

        let dst_port = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(dst_port);

        let seq_bytes = [next()?, next()?, next()?, next()?];
        let seq = u32::from_be_bytes(seq_bytes);
        checksum.add_u32(seq_bytes);

        let ack_bytes = [next()?, next()?, next()?, next()?];
        let ack = u32::from_be_bytes(ack_bytes);
        checksum.add_u32(ack_bytes);

        let offset_reserved_control = [next()?, next()?];
        checksum.add_u16(u16::from_be_bytes(offset_reserved_control));
        let offset_words = offset_reserved_control[0] >> 4;
        if !(5..=15).contains(&offset_words) {
            Err(ParseError::InvalidDataOffset(offset_words))?
        }
        let offset = offset_words * 4;
        let ctl = Control::from(offset_reserved_control[1] & 0b11_1111);

        let wnd = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(wnd);

        let expected_checksum = u16::from_be_bytes([next()?, next()?]);

        let urgent = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(urgent);

        let mut options = Vec::with_capacity(offset as usize - BASE_OCTETS as usize);
        for _ in 0..offset - BASE_OCTETS {
            options.push(next()?);
        }
        // The options region is a multiple of four bytes, so pairing for the
        // checksum stays aligned with the rest of the segment
        for pair in options.chunks(2) {
            checksum.add_u8(pair[0], pair.get(1).copied().unwrap_or(0));
        }
        let mss = parse_options(&options)?;

        let text_length = checksum.accumulate_remainder(&mut bytes);

        // Pseudo-header
        checksum.add_u32(src_address.to_bytes());
        checksum.add_u32(dst_address.to_bytes());
        // zero, TCP protocol number
        checksum.add_u8(0, 6);
        checksum.add_u16((text_length + offset as u32) as u16);

        let checksum = checksum.as_u16();
        if expected_checksum == checksum {
            Ok(TcpHeader {
                src_port,
                dst_port,
                seq,
                ack,
                ctl,
                wnd,
                checksum,
                urgent,
                mss,
                offset,
            })
        } else {
            Err(ParseError::InvalidChecksum {
                actual: checksum,
                expected: expected_checksum,
            })
        }
    }

    /// Serializes the header, options included, to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.offset as usize);
        out.extend(self.src_port.to_be_bytes());
        out.extend(self.dst_port.to_be_bytes());
        out.extend(self.seq.to_be_bytes());
        out.extend(self.ack.to_be_bytes());
        out.push((self.offset / 4) << 4);
        out.push(self.ctl.into());
        out.extend(self.wnd.to_be_bytes());
        out.extend(self.checksum.to_be_bytes());
        out.extend(self.urgent.to_be_bytes());
        if let Some(mss) = self.mss {
            out.push(OPTION_MSS);
            out.push(4);
            out.extend(mss.to_be_bytes());
        }
        out
    }
}

/// Walks the options region. The maximum segment size is extracted; NOP and
/// unknown options are skipped by their length octet; END terminates.
fn parse_options(mut options: &[u8]) -> Result<Option<u16>, ParseError> {
    let mut mss = None;
    while let Some(&kind) = options.first() {
        match kind {
            OPTION_END => break,
            OPTION_NOP => options = &options[1..],
            kind => {
                let length = options.get(1).copied().ok_or(ParseError::BadOptionLength)?;
                if length < 2 || options.len() < length as usize {
                    Err(ParseError::BadOptionLength)?
                }
                if kind == OPTION_MSS {
                    if length != 4 {
                        Err(ParseError::BadOptionLength)?
                    }
                    mss = Some(u16::from_be_bytes([options[2], options[3]]));
                }
                options = &options[length as usize..];
            }
        }
    }
    Ok(mss)
}

/// Constructs a [`TcpHeader`] with the checksum computed over the given
/// text and pseudo-header.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeaderBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: Option<u32>,
    psh: bool,
    rst: bool,
    syn: bool,
    fin: bool,
    wnd: u16,
    mss: Option<u16>,
}

impl TcpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack: None,
            psh: false,
            rst: false,
            syn: false,
            fin: false,
            wnd: 0,
            mss: None,
        }
    }

    /// Sets the acknowledgment number and the ACK control bit.
    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn psh(mut self) -> Self {
        self.psh = true;
        self
    }

    pub fn rst(mut self) -> Self {
        self.rst = true;
        self
    }

    pub fn syn(mut self) -> Self {
        self.syn = true;
        self
    }

    pub fn fin(mut self) -> Self {
        self.fin = true;
        self
    }

    pub fn wnd(mut self, wnd: u16) -> Self {
        self.wnd = wnd;
        self
    }

    /// Attaches the maximum segment size option.
    pub fn mss(mut self, mss: u16) -> Self {
        self.mss = Some(mss);
        self
    }

    pub fn build(
        self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        mut text: impl Iterator<Item = u8>,
    ) -> Result<TcpHeader, BuildHeaderError> {
        let offset = if self.mss.is_some() {
            BASE_OCTETS + 4
        } else {
            BASE_OCTETS
        };
        let ctl = Control::new(false, self.ack.is_some(), self.psh, self.rst, self.syn, self.fin);
        let ack = self.ack.unwrap_or(0);

        let mut checksum = Checksum::new();
        checksum.add_u16(self.src_port);
        checksum.add_u16(self.dst_port);
        checksum.add_u32(self.seq.to_be_bytes());
        checksum.add_u32(ack.to_be_bytes());
        checksum.add_u8((offset / 4) << 4, ctl.into());
        checksum.add_u16(self.wnd);
        // The checksum field itself counts as zero
        checksum.add_u16(0);
        if let Some(mss) = self.mss {
            checksum.add_u8(OPTION_MSS, 4);
            checksum.add_u16(mss);
        }
        let text_length = checksum.accumulate_remainder(&mut text);
        let tcp_length = text_length + offset as u32;
        if tcp_length > u16::MAX as u32 {
            return Err(BuildHeaderError::OverlongText);
        }

        // Pseudo-header
        checksum.add_u32(src_address.to_bytes());
        checksum.add_u32(dst_address.to_bytes());
        checksum.add_u8(0, 6);
        checksum.add_u16(tcp_length as u16);

        Ok(TcpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq: self.seq,
            ack,
            ctl,
            wnd: self.wnd,
            checksum: checksum.as_u16(),
            urgent: 0,
            mss: self.mss,
            offset,
        })
    }
}

/// The control bits of a TCP header.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Control(u8);

impl Control {
    pub fn new(urg: bool, ack: bool, psh: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(
            urg as u8
                | (ack as u8) << 1
                | (psh as u8) << 2
                | (rst as u8) << 3
                | (syn as u8) << 4
                | (fin as u8) << 5,
        )
    }

    /// Urgent pointer field significant
    pub fn urg(&self) -> bool {
        self.0 & 0b1 == 1
    }

    /// Acknowledgment field significant
    pub fn ack(&self) -> bool {
        (self.0 >> 1) & 0b1 == 1
    }

    /// Push function
    pub fn psh(&self) -> bool {
        (self.0 >> 2) & 0b1 == 1
    }

    /// Reset the connection
    pub fn rst(&self) -> bool {
        (self.0 >> 3) & 0b1 == 1
    }

    /// Synchronize sequence numbers
    pub fn syn(&self) -> bool {
        (self.0 >> 4) & 0b1 == 1
    }

    /// No more data from sender
    pub fn fin(&self) -> bool {
        (self.0 >> 5) & 0b1 == 1
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("too few bytes to constitute a TCP header")]
    HeaderTooShort,
    #[error("data offset of {0} words is outside the legal range")]
    InvalidDataOffset(u8),
    #[error("an option length disagrees with the options region")]
    BadOptionLength,
    #[error("the checksum {actual:#06x} does not match the expected value {expected:#06x}")]
    InvalidChecksum { expected: u16, actual: u16 },
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum BuildHeaderError {
    #[error("the segment text does not fit the TCP length field")]
    OverlongText,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_ADDRESS: Ipv4Address = Ipv4Address::LOCALHOST;
    const DST_ADDRESS: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);

    fn etherparse_packet(
        expected: &mut etherparse::TcpHeader,
        payload: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let ip_header = etherparse::Ipv4Header::new(
            (expected.header_len() as usize + payload.len()).try_into()?,
            30,
            etherparse::IpNumber::Tcp as u8,
            SRC_ADDRESS.into(),
            DST_ADDRESS.into(),
        );
        expected.checksum = expected.calc_checksum_ipv4(&ip_header, payload)?;
        let mut serial = vec![];
        expected.write(&mut serial)?;
        serial.extend(payload);
        Ok(serial)
    }

    #[test]
    fn parses_packet() -> anyhow::Result<()> {
        let payload = b"Hello, world!";
        let mut expected = etherparse::TcpHeader::new(0xcafe, 0xbabe, 123456789, 1024);
        expected.acknowledgment_number = 10;
        expected.ack = true;
        expected.psh = true;
        let serial = etherparse_packet(&mut expected, payload)?;

        let actual = TcpHeader::from_bytes(serial.iter().cloned(), SRC_ADDRESS, DST_ADDRESS)?;
        assert_eq!(actual.src_port, 0xcafe);
        assert_eq!(actual.dst_port, 0xbabe);
        assert_eq!(actual.seq, 123456789);
        assert_eq!(actual.ack, 10);
        assert_eq!(actual.ctl, Control::new(false, true, true, false, false, false));
        assert_eq!(actual.wnd, 1024);
        assert_eq!(actual.checksum, expected.checksum);
        assert_eq!(actual.urgent, 0);
        assert_eq!(actual.mss, None);
        assert_eq!(actual.offset, 20);
        Ok(())
    }

    #[test]
    fn parses_mss_and_skips_unknown_options() -> anyhow::Result<()> {
        let mut expected = etherparse::TcpHeader::new(0xcafe, 0xbabe, 100, 4096);
        expected.syn = true;
        expected.set_options(&[
            etherparse::TcpOptionElement::WindowScale(7),
            etherparse::TcpOptionElement::MaximumSegmentSize(1460),
        ])?;
        let serial = etherparse_packet(&mut expected, &[])?;

        let actual = TcpHeader::from_bytes(serial.iter().cloned(), SRC_ADDRESS, DST_ADDRESS)?;
        assert!(actual.ctl.syn());
        assert_eq!(actual.mss, Some(1460));
        Ok(())
    }

    #[test]
    fn build_serialize_parse_round_trip() -> anyhow::Result<()> {
        let text = b"state machines all the way down";
        let header = TcpHeaderBuilder::new(4321, 80, 3_000_000_000)
            .ack(77)
            .psh()
            .wnd(8192)
            .mss(1460)
            .build(SRC_ADDRESS, DST_ADDRESS, text.iter().copied())?;
        assert_eq!(header.offset, 24);

        let mut serial = header.serialize();
        serial.extend(text);
        let reparsed = TcpHeader::from_bytes(serial.iter().cloned(), SRC_ADDRESS, DST_ADDRESS)?;
        assert_eq!(reparsed, header);
        Ok(())
    }

    #[test]
    fn rejects_corrupted_text() -> anyhow::Result<()> {
        let header = TcpHeaderBuilder::new(4321, 80, 1).build(
            SRC_ADDRESS,
            DST_ADDRESS,
            b"payload".iter().copied(),
        )?;
        let mut serial = header.serialize();
        serial.extend(b"paYload");
        let result = TcpHeader::from_bytes(serial.iter().cloned(), SRC_ADDRESS, DST_ADDRESS);
        assert!(matches!(result, Err(ParseError::InvalidChecksum { .. })));
        Ok(())
    }
}
