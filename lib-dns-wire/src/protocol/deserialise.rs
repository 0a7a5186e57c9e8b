//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.
//!
//! The datagram is attacker-controlled: every length is checked,
//! compression pointers may only go backwards, and a bounded number of
//! them may be chased per name.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::cursor::BitCursor;
use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        let mut cursor = BitCursor::new(octets).ok_or(Error::DatagramTooLong(octets.len()))?;
        Self::deserialise(&mut cursor)
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(cursor: &mut BitCursor) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(cursor)?;
        let id = wire_header.header.id;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(id, cursor)?);
        }
        for index in 0..wire_header.ancount {
            answers.push(
                ResourceRecord::deserialise(id, cursor)
                    .map_err(|error| error.in_section(Section::Answer, index))?,
            );
        }
        for index in 0..wire_header.nscount {
            authority.push(
                ResourceRecord::deserialise(id, cursor)
                    .map_err(|error| error.in_section(Section::Authority, index))?,
            );
        }
        for index in 0..wire_header.arcount {
            additional.push(
                ResourceRecord::deserialise(id, cursor)
                    .map_err(|error| error.in_section(Section::Additional, index))?,
            );
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    /// Decode the fixed 12-octet header, field by field in wire order.
    /// The flag fields are narrower than a byte, so this is the one
    /// place the cursor's bit-granular reads carry their weight.
    ///
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(cursor: &mut BitCursor) -> Result<Self, Error> {
        // without an ID there is nothing to even report an error
        // against
        let id = cursor.read_u32_be(2).ok_or(Error::CompletelyBusted)? as u16;

        let too_short = |cursor: &BitCursor| Error::HeaderTooShort {
            id,
            at: cursor.position().0,
        };

        let is_response = cursor.read_bits(1).ok_or_else(|| too_short(cursor))? == 1;
        let opcode = Opcode::from(cursor.read_bits(4).ok_or_else(|| too_short(cursor))? as u8);
        let is_authoritative = cursor.read_bits(1).ok_or_else(|| too_short(cursor))? == 1;
        let is_truncated = cursor.read_bits(1).ok_or_else(|| too_short(cursor))? == 1;
        let recursion_desired = cursor.read_bits(1).ok_or_else(|| too_short(cursor))? == 1;
        let recursion_available = cursor.read_bits(1).ok_or_else(|| too_short(cursor))? == 1;
        let z = cursor.read_bits(3).ok_or_else(|| too_short(cursor))? as u8;
        let rcode = Rcode::from(cursor.read_bits(4).ok_or_else(|| too_short(cursor))? as u8);

        let qdcount = cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16;
        let ancount = cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16;
        let nscount = cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16;
        let arcount = cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16;

        Ok(Self {
            header: Header {
                id,
                is_response,
                opcode,
                is_authoritative,
                is_truncated,
                recursion_desired,
                recursion_available,
                z,
                rcode,
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, cursor: &mut BitCursor) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, cursor)?;

        let too_short = |cursor: &BitCursor| Error::QuestionTooShort {
            id,
            at: cursor.position().0,
        };

        let qtype = QueryType::from(cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16);
        let qclass =
            QueryClass::from(cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16);

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, cursor: &mut BitCursor) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, cursor)?;

        let too_short = |cursor: &BitCursor| Error::ResourceRecordTooShort {
            id,
            at: cursor.position().0,
        };

        let rtype = RecordType::from(cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16);
        let rclass =
            RecordClass::from(cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16);
        let ttl = cursor.read_u32_be(4).ok_or_else(|| too_short(cursor))?;
        let rdlength = cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16;

        // For the record types which carry domain names, the name is
        // decoded (expanding pointers) rather than sliced out by
        // RDLENGTH; RDLENGTH is kept but not used as a bound.
        let rtype_with_data = match rtype {
            RecordType::A => {
                let octets = cursor.read_bytes(4).ok_or_else(|| too_short(cursor))?;
                RecordTypeWithData::A {
                    address: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                }
            }
            RecordType::AAAA => RecordTypeWithData::AAAA {
                address: Ipv6Addr::new(
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                    cursor.read_u32_be(2).ok_or_else(|| too_short(cursor))? as u16,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, cursor)?.flatten_labels(),
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, cursor)?.flatten_labels(),
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, cursor)?.flatten_labels(),
            },
            RecordType::NULL => RecordTypeWithData::NULL,
            RecordType::MD
            | RecordType::MF
            | RecordType::SOA
            | RecordType::MB
            | RecordType::MG
            | RecordType::MR
            | RecordType::WKS
            | RecordType::HINFO
            | RecordType::MINFO
            | RecordType::MX => {
                return Err(Error::RecordTypeUnimplemented {
                    id,
                    rtype: rtype.into(),
                })
            }
            RecordType::Unknown(tag) => return Err(Error::RecordTypeUnknown { id, rtype: tag }),
        };

        Ok(Self {
            name,
            rtype_with_data,
            rclass,
            ttl,
            rdlength,
        })
    }
}

impl DomainName {
    /// Decode a name starting at the current cursor position,
    /// advancing the cursor past it: past the terminating zero octet,
    /// or past the first compression pointer if there is one.
    ///
    /// Compression pointers are chased iteratively.  The position to
    /// come back to is noted at the first pointer and restored once
    /// the name is assembled, so from the caller's point of view a
    /// pointer is just two more octets of name.
    ///
    /// # Errors
    ///
    /// If the name cannot be parsed.
    pub fn deserialise(id: u16, cursor: &mut BitCursor) -> Result<Self, Error> {
        let mut resume_at = None;
        let result = Self::deserialise_labels(id, cursor, &mut resume_at);
        if let Some(byte_offset) = resume_at {
            cursor.set_position(byte_offset, 0);
        }
        result
    }

    fn deserialise_labels(
        id: u16,
        cursor: &mut BitCursor,
        resume_at: &mut Option<usize>,
    ) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);
        let mut jumps = 0;

        loop {
            let at = cursor.position().0;
            let size = cursor
                .read_u32_be(1)
                .ok_or(Error::DomainTooShort { id, at })? as u8;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    break;
                }

                let os = cursor
                    .read_bytes(size as usize)
                    .ok_or(Error::DomainTooShort { id, at })?;
                octets.extend_from_slice(os);
                labels.push(os.to_vec());

                if octets.len() > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong { id, at });
                }
            } else if size & LABEL_POINTER_MASK == LABEL_POINTER_MASK {
                let hi = size & !LABEL_POINTER_MASK;
                let lo = cursor
                    .read_u32_be(1)
                    .ok_or(Error::DomainTooShort { id, at })? as u8;
                let target = usize::from(u16::from_be_bytes([hi, lo]));

                // a pointer must target an offset strictly before its
                // own: that alone guarantees termination (RFC 1035
                // section 4.1.4), the jump counter just caps the work
                if target >= at {
                    return Err(Error::DomainPointerInvalid { id, at });
                }
                jumps += 1;
                if jumps > POINTER_MAX_DEPTH {
                    return Err(Error::DomainPointerLimit { id, at });
                }

                if resume_at.is_none() {
                    *resume_at = Some(cursor.position().0);
                }
                cursor.set_position(target, 0);
            } else {
                // top bits 01 or 10: reserved
                return Err(Error::DomainLabelInvalid { id, at });
            }
        }

        Ok(DomainName { octets, labels })
    }

    /// The labels of this name concatenated with nothing between them.
    /// This is the shape name-valued RDATA is exposed in.
    pub fn flatten_labels(&self) -> Vec<u8> {
        self.labels.concat()
    }
}

/// Which section of a message a failing record was in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Section::Answer => write!(f, "answer"),
            Section::Authority => write!(f, "authority"),
            Section::Additional => write!(f, "additional"),
        }
    }
}

/// Errors encountered when parsing a datagram.  Except for the first
/// two, every error carries the ID from the header, so the failure can
/// be reported against the right transaction, and the byte offset at
/// which decoding stopped.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is bigger than a DNS UDP payload is allowed to be.
    DatagramTooLong(usize),

    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.  An error cannot even be reported against a
    /// transaction in this case as, without an ID, it cannot be linked
    /// with the correct query.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort { id: u16, at: usize },

    /// A question ends with an incomplete field.
    QuestionTooShort { id: u16, at: usize },

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort { id: u16, at: usize },

    /// A domain is incomplete.
    DomainTooShort { id: u16, at: usize },

    /// A domain is over 255 octets in size.
    DomainTooLong { id: u16, at: usize },

    /// A domain pointer points at or after its own position.
    DomainPointerInvalid { id: u16, at: usize },

    /// A domain chased more pointers than the decoder allows.
    DomainPointerLimit { id: u16, at: usize },

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid { id: u16, at: usize },

    /// A resource record has a type this decoder knows of but does not
    /// decode.
    RecordTypeUnimplemented { id: u16, rtype: u16 },

    /// A resource record has a type this decoder has never heard of.
    RecordTypeUnknown { id: u16, rtype: u16 },

    /// A record failed to parse, and this is where it was.
    Record {
        section: Section,
        index: u16,
        error: Box<Error>,
    },
}

impl Error {
    fn in_section(self, section: Section, index: u16) -> Self {
        Error::Record {
            section,
            index,
            error: Box::new(self),
        }
    }

    /// The header ID the failing datagram carried, if decoding got far
    /// enough to read one.
    pub fn id(&self) -> Option<u16> {
        match self {
            Error::DatagramTooLong(_) | Error::CompletelyBusted => None,
            Error::HeaderTooShort { id, .. }
            | Error::QuestionTooShort { id, .. }
            | Error::ResourceRecordTooShort { id, .. }
            | Error::DomainTooShort { id, .. }
            | Error::DomainTooLong { id, .. }
            | Error::DomainPointerInvalid { id, .. }
            | Error::DomainPointerLimit { id, .. }
            | Error::DomainLabelInvalid { id, .. }
            | Error::RecordTypeUnimplemented { id, .. }
            | Error::RecordTypeUnknown { id, .. } => Some(*id),
            Error::Record { error, .. } => error.id(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::DatagramTooLong(len) => {
                write!(f, "datagram is {len} octets, more than the UDP limit of 512")
            }
            Error::CompletelyBusted => write!(f, "datagram too short to contain an ID"),
            Error::HeaderTooShort { at, .. } => write!(f, "header incomplete at octet {at}"),
            Error::QuestionTooShort { at, .. } => write!(f, "question incomplete at octet {at}"),
            Error::ResourceRecordTooShort { at, .. } => {
                write!(f, "resource record incomplete at octet {at}")
            }
            Error::DomainTooShort { at, .. } => write!(f, "domain incomplete at octet {at}"),
            Error::DomainTooLong { at, .. } => {
                write!(f, "domain over 255 octets at octet {at}")
            }
            Error::DomainPointerInvalid { at, .. } => {
                write!(f, "domain pointer at octet {at} does not point backwards")
            }
            Error::DomainPointerLimit { at, .. } => {
                write!(f, "too many domain pointers chased at octet {at}")
            }
            Error::DomainLabelInvalid { at, .. } => {
                write!(f, "invalid domain label length octet at octet {at}")
            }
            Error::RecordTypeUnimplemented { rtype, .. } => {
                write!(f, "unimplemented type {rtype}")
            }
            Error::RecordTypeUnknown { rtype, .. } => write!(f, "unknown type {rtype}"),
            Error::Record {
                section,
                index,
                error,
            } => write!(f, "record {index} ({section} section): {error}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Record { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        assert!(s.len() % 2 == 0, "odd hex string");
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn labels(names: &[&str]) -> Vec<Vec<u8>> {
        names.iter().map(|name| name.as_bytes().to_vec()).collect()
    }

    #[test]
    fn deserialise_query() {
        // (datagram, expected id, expected qname labels)
        let cases: &[(&str, u16, &[&str])] = &[
            (
                "7e4e01000001000000000000076e69636b6c6173077365646c6f636b0378797a0000010001",
                32334,
                &["nicklas", "sedlock", "xyz"],
            ),
            (
                "45dc010000010000000000000377777707796f757475626503636f6d0000010001",
                17884,
                &["www", "youtube", "com"],
            ),
        ];

        for (datagram, id, qname) in cases {
            let octets = unhex(datagram);
            let message = Message::from_octets(&octets).unwrap();

            assert_eq!(*id, message.header.id);
            assert!(!message.header.is_response);
            assert_eq!(Opcode::Standard, message.header.opcode);
            assert!(!message.header.is_authoritative);
            assert!(!message.header.is_truncated);
            assert!(message.header.recursion_desired);
            assert!(!message.header.recursion_available);
            assert_eq!(0, message.header.z);
            assert_eq!(Rcode::NoError, message.header.rcode);

            assert_eq!(1, message.questions.len());
            assert!(message.answers.is_empty());
            assert!(message.authority.is_empty());
            assert!(message.additional.is_empty());

            let question = &message.questions[0];
            assert_eq!(labels(qname), question.name.labels);
            assert_eq!(QueryType::Record(RecordType::A), question.qtype);
            assert_eq!(QueryClass::Record(RecordClass::IN), question.qclass);
        }
    }

    #[test]
    fn deserialise_response_with_compressed_answer() {
        let octets = unhex(
            "deb1818000010001000000000377777706676f6f676c6503636f6d0000010001c00c000100010000001300048efabaa4",
        );
        let message = Message::from_octets(&octets).unwrap();

        assert_eq!(57009, message.header.id);
        assert!(message.header.is_response);
        assert!(message.header.recursion_desired);
        assert!(message.header.recursion_available);
        assert_eq!(Rcode::NoError, message.header.rcode);

        assert_eq!(1, message.questions.len());
        assert_eq!(
            labels(&["www", "google", "com"]),
            message.questions[0].name.labels
        );

        assert_eq!(1, message.answers.len());
        let answer = &message.answers[0];
        assert_eq!(labels(&["www", "google", "com"]), answer.name.labels);
        assert_eq!(RecordClass::IN, answer.rclass);
        assert_eq!(19, answer.ttl);
        assert_eq!(4, answer.rdlength);
        assert_eq!(
            RecordTypeWithData::A {
                address: Ipv4Addr::new(0x8e, 0xfa, 0xba, 0xa4)
            },
            answer.rtype_with_data
        );
    }

    #[test]
    fn deserialise_answer_with_cname_chain() {
        // a real response: kristina.pianykh.xyz CNAME
        // kristina-pianykh.github.io, then four A records for the
        // CNAME target, all names after the question compressed
        let octets = unhex(concat!(
            "948181800001000500000000",
            "086b72697374696e61077069616e796b680378797a0000010001",
            "c00c0005000100000635001c106b72697374696e612d7069616e796b680667697468756202696f00",
            "c0320001000100000c9b0004b9c76f99",
            "c0320001000100000c9b0004b9c76d99",
            "c0320001000100000c9b0004b9c76c99",
            "c0320001000100000c9b0004b9c76e99",
        ));
        let message = Message::from_octets(&octets).unwrap();

        assert_eq!(0x9481, message.header.id);
        assert_eq!(5, message.answers.len());

        let cname = &message.answers[0];
        assert_eq!(
            labels(&["kristina", "pianykh", "xyz"]),
            cname.name.labels
        );
        assert_eq!(1589, cname.ttl);
        assert_eq!(28, cname.rdlength);
        // label boundaries are not preserved in name-valued RDATA
        assert_eq!(
            RecordTypeWithData::CNAME {
                cname: b"kristina-pianykhgithubio".to_vec()
            },
            cname.rtype_with_data
        );

        let addresses = [
            Ipv4Addr::new(185, 199, 111, 153),
            Ipv4Addr::new(185, 199, 109, 153),
            Ipv4Addr::new(185, 199, 108, 153),
            Ipv4Addr::new(185, 199, 110, 153),
        ];
        for (answer, address) in message.answers[1..].iter().zip(addresses) {
            assert_eq!(
                labels(&["kristina-pianykh", "github", "io"]),
                answer.name.labels
            );
            assert_eq!(3227, answer.ttl);
            assert_eq!(RecordTypeWithData::A { address }, answer.rtype_with_data);
        }
    }

    #[test]
    fn deserialise_name_rfc1035_compression_figure() {
        // the example from RFC 1035 section 4.1.4: F.ISI.ARPA at
        // offset 0, FOO.F.ISI.ARPA at offset 12 (via a pointer), and a
        // lone pointer to ARPA at offset 18
        let octets = unhex("01460349534904415250410003464f4fc000c00600");

        let cases: &[(usize, &[&str])] = &[
            (0, &["F", "ISI", "ARPA"]),
            (12, &["FOO", "F", "ISI", "ARPA"]),
            (18, &["ARPA"]),
            (20, &[]),
        ];

        for (offset, expected) in cases {
            let mut cursor = BitCursor::new(&octets).unwrap();
            cursor.set_position(*offset, 0);
            let name = DomainName::deserialise(0, &mut cursor).unwrap();
            assert_eq!(labels(expected), name.labels, "name at offset {offset}");
        }
    }

    #[test]
    fn deserialise_name_restores_position_after_pointer() {
        let octets = unhex("01460349534904415250410003464f4fc000c00600");
        let mut cursor = BitCursor::new(&octets).unwrap();
        cursor.set_position(12, 0);

        DomainName::deserialise(0, &mut cursor).unwrap();

        // FOO + pointer: the cursor continues right after the pointer
        assert_eq!((18, 0), cursor.position());
    }

    #[test]
    fn deserialise_multi_section_response() {
        // ID 0x0406, QR=1, QDCOUNT=1, ANCOUNT=0, NSCOUNT=4, ARCOUNT=8
        let mut octets = unhex("040680000001000000040008");
        // question at offset 12: example.com NS IN
        octets.extend_from_slice(b"\x07example\x03com\x00");
        octets.extend_from_slice(&unhex("00020001"));
        // 4 authority NS records: name = pointer to 12, rdata =
        // nsN. + pointer to "com" at offset 20
        for ns in [b"ns1", b"ns2", b"ns3", b"ns4"] {
            octets.extend_from_slice(&unhex("c00c0002000100000e100006"));
            octets.push(3);
            octets.extend_from_slice(ns);
            octets.extend_from_slice(&unhex("c014"));
        }
        // 8 additional records for the nameservers: 4 A, 4 AAAA
        for host in 1..=4u8 {
            octets.extend_from_slice(&unhex("c00c0001000100000e100004"));
            octets.extend_from_slice(&[192, 0, 2, host]);
        }
        for host in 1..=4u8 {
            octets.extend_from_slice(&unhex("c00c001c000100000e100010"));
            octets.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, host]);
        }

        let message = Message::from_octets(&octets).unwrap();

        assert_eq!(0x0406, message.header.id);
        assert!(message.header.is_response);
        assert!(message.answers.is_empty());
        assert_eq!(4, message.authority.len());
        assert_eq!(8, message.additional.len());

        for (index, record) in message.authority.iter().enumerate() {
            assert_eq!(labels(&["example", "com"]), record.name.labels);
            assert_eq!(3600, record.ttl);
            assert_eq!(RecordType::NS, record.rtype_with_data.rtype());
            let nsdname = format!("ns{}com", index + 1).into_bytes();
            assert_eq!(
                RecordTypeWithData::NS { nsdname },
                record.rtype_with_data
            );
        }

        for (index, record) in message.additional[..4].iter().enumerate() {
            assert_eq!(
                RecordTypeWithData::A {
                    address: Ipv4Addr::new(192, 0, 2, index as u8 + 1)
                },
                record.rtype_with_data
            );
        }
        for (index, record) in message.additional[4..].iter().enumerate() {
            assert_eq!(
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, index as u16 + 1)
                },
                record.rtype_with_data
            );
        }
    }

    #[test]
    fn deserialise_consumes_the_whole_datagram() {
        let datagrams = [
            unhex("7e4e01000001000000000000076e69636b6c6173077365646c6f636b0378797a0000010001"),
            unhex("45dc010000010000000000000377777707796f757475626503636f6d0000010001"),
        ];

        for octets in datagrams {
            let mut cursor = BitCursor::new(&octets).unwrap();
            Message::deserialise(&mut cursor).unwrap();
            assert_eq!((octets.len(), 0), cursor.position());
            assert_eq!(0, cursor.remaining_bits());
        }
    }

    #[test]
    fn deserialise_header_z_bits_are_carried_not_rejected() {
        // flags2 = 0b0111_0000: RA clear, Z = 7, RCODE = 0
        let octets = unhex("abcd00700000000000000000");
        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(7, message.header.z);
        assert_eq!(Rcode::NoError, message.header.rcode);
    }

    #[test]
    fn deserialise_rejects_oversized_datagram() {
        let octets = vec![0u8; 513];
        assert_eq!(
            Err(Error::DatagramTooLong(513)),
            Message::from_octets(&octets)
        );
    }

    #[test]
    fn deserialise_rejects_truncated_datagrams() {
        assert_eq!(Err(Error::CompletelyBusted), Message::from_octets(&[0x7e]));

        assert_eq!(
            Err(Error::HeaderTooShort { id: 0x7e4e, at: 4 }),
            Message::from_octets(&unhex("7e4e0100"))
        );

        // header promises a question which is not there
        assert_eq!(
            Err(Error::DomainTooShort { id: 0x7e4e, at: 12 }),
            Message::from_octets(&unhex("7e4e01000001000000000000"))
        );
    }

    #[test]
    fn deserialise_label_of_63_parses_64_fails() {
        let mut ok = vec![63u8];
        ok.extend_from_slice(&[b'a'; 63]);
        ok.push(0);
        let mut cursor = BitCursor::new(&ok).unwrap();
        let name = DomainName::deserialise(0, &mut cursor).unwrap();
        assert_eq!(1, name.labels.len());
        assert_eq!(63, name.labels[0].len());

        // 64 has top bits 01: reserved, not a length, not a pointer
        let mut bad = vec![64u8];
        bad.extend_from_slice(&[b'a'; 64]);
        bad.push(0);
        let mut cursor = BitCursor::new(&bad).unwrap();
        assert_eq!(
            Err(Error::DomainLabelInvalid { id: 0, at: 0 }),
            DomainName::deserialise(0, &mut cursor)
        );

        // 10 top-bit pattern is reserved too
        let bad = [0b1000_0001u8, b'a', 0];
        let mut cursor = BitCursor::new(&bad).unwrap();
        assert_eq!(
            Err(Error::DomainLabelInvalid { id: 0, at: 0 }),
            DomainName::deserialise(0, &mut cursor)
        );
    }

    #[test]
    fn deserialise_rejects_forward_and_self_pointers() {
        // pointer at offset 0 to offset 0
        let mut cursor = BitCursor::new(&[0xc0, 0x00]).unwrap();
        assert_eq!(
            Err(Error::DomainPointerInvalid { id: 0, at: 0 }),
            DomainName::deserialise(0, &mut cursor)
        );

        // pointer at offset 2 to offset 4: forwards
        let octets = [0x00, 0x00, 0xc0, 0x04, 0x01, b'a', 0x00];
        let mut cursor = BitCursor::new(&octets).unwrap();
        cursor.set_position(2, 0);
        assert_eq!(
            Err(Error::DomainPointerInvalid { id: 0, at: 2 }),
            DomainName::deserialise(0, &mut cursor)
        );
    }

    #[test]
    fn deserialise_rejects_pointer_chains_past_the_limit() {
        // "a" at offset 0, then pointers at even offsets from 4, each
        // targeting the one before it
        let mut octets = vec![0x01, b'a', 0x00, 0x00];
        octets.extend_from_slice(&[0xc0, 0x00]);
        for _ in 1..POINTER_MAX_DEPTH + 1 {
            let previous = octets.len() - 2;
            octets.extend_from_slice(&[0xc0, previous as u8]);
        }

        // starting from the second-to-last pointer chases exactly the
        // maximum depth
        let start = octets.len() - 4;
        let mut cursor = BitCursor::new(&octets).unwrap();
        cursor.set_position(start, 0);
        let name = DomainName::deserialise(0, &mut cursor).unwrap();
        assert_eq!(labels(&["a"]), name.labels);

        // the last one goes one jump further
        let start = octets.len() - 2;
        let mut cursor = BitCursor::new(&octets).unwrap();
        cursor.set_position(start, 0);
        assert!(matches!(
            DomainName::deserialise(0, &mut cursor),
            Err(Error::DomainPointerLimit { .. })
        ));
    }

    #[test]
    fn deserialise_rejects_name_over_255_octets() {
        // four 63-octet labels encode to 257 octets with the
        // terminator: over the limit
        let mut octets = Vec::new();
        for _ in 0..4 {
            octets.push(63);
            octets.extend_from_slice(&[b'x'; 63]);
        }
        octets.push(0);

        let mut cursor = BitCursor::new(&octets).unwrap();
        assert!(matches!(
            DomainName::deserialise(0, &mut cursor),
            Err(Error::DomainTooLong { .. })
        ));
    }

    #[test]
    fn deserialise_unimplemented_and_unknown_record_types() {
        // an answer of type MX (unimplemented)
        let mut octets = unhex("040600000001000100000000");
        octets.extend_from_slice(b"\x03foo\x00");
        octets.extend_from_slice(&unhex("000f0001"));
        octets.extend_from_slice(&unhex("c00c000f000100000e100004abcdabcd"));
        assert_eq!(
            Err(Error::Record {
                section: Section::Answer,
                index: 0,
                error: Box::new(Error::RecordTypeUnimplemented {
                    id: 0x0406,
                    rtype: 15
                }),
            }),
            Message::from_octets(&octets)
        );

        // an answer of type 16 (TXT: not decoded here at all)
        let mut octets = unhex("040600000001000100000000");
        octets.extend_from_slice(b"\x03foo\x00");
        octets.extend_from_slice(&unhex("00100001"));
        octets.extend_from_slice(&unhex("c00c0010000100000e10000461626364"));
        let error = Message::from_octets(&octets).unwrap_err();
        assert_eq!(
            Error::Record {
                section: Section::Answer,
                index: 0,
                error: Box::new(Error::RecordTypeUnknown {
                    id: 0x0406,
                    rtype: 16
                }),
            },
            error
        );
        assert_eq!(Some(0x0406), error.id());
    }

    #[test]
    fn deserialise_multiple_questions() {
        // QDCOUNT=2 is unusual but decodes; the forwarder relays it
        // regardless
        let mut octets = unhex("999900000002000000000000");
        octets.extend_from_slice(b"\x03foo\x00");
        octets.extend_from_slice(&unhex("00010001"));
        octets.extend_from_slice(b"\x03bar\x00");
        octets.extend_from_slice(&unhex("00010001"));

        let message = Message::from_octets(&octets).unwrap();
        assert_eq!(2, message.questions.len());
        assert_eq!(labels(&["foo"]), message.questions[0].name.labels);
        assert_eq!(labels(&["bar"]), message.questions[1].name.labels);
    }
}
