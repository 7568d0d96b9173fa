const HANDSHAKE_RECORD: u8 = 0x16;
const CLIENT_HELLO: u8 = 0x01;
const SERVER_NAME_EXTENSION: u16 = 0x0000;
const HOST_NAME_TYPE: u8 = 0x00;

/// Bytes needed for the record header that announces the ClientHello length.
pub const RECORD_HEADER_LEN: usize = 5;

/// Total length of the first TLS record, if `data` starts with a handshake
/// record header.
pub fn client_hello_record_len(data: &[u8]) -> Option<usize> {
    if data.len() < RECORD_HEADER_LEN || data[0] != HANDSHAKE_RECORD {
        return None;
    }
    let length = u16::from_be_bytes([data[3], data[4]]) as usize;
    Some(RECORD_HEADER_LEN + length)
}

/// Host name from the server_name extension of a ClientHello.
///
/// Returns `None` when `data` is not a complete ClientHello record or the
/// client sent no host name.
pub fn server_name_from_client_hello(data: &[u8]) -> Option<String> {
    let record_len = client_hello_record_len(data)?;
    let handshake = data.get(RECORD_HEADER_LEN..record_len)?;

    let mut reader = Reader::new(handshake);
    if reader.u8()? != CLIENT_HELLO {
        return None;
    }
    let hello_len = reader.u24()?;
    let mut hello = Reader::new(reader.take(hello_len)?);

    // legacy_version and random
    hello.skip(2 + 32)?;
    let session_id_len = hello.u8()? as usize;
    hello.skip(session_id_len)?;
    let cipher_suites_len = hello.u16()? as usize;
    hello.skip(cipher_suites_len)?;
    let compression_len = hello.u8()? as usize;
    hello.skip(compression_len)?;

    let extensions_len = hello.u16()? as usize;
    let mut extensions = Reader::new(hello.take(extensions_len)?);
    while !extensions.is_empty() {
        let kind = extensions.u16()?;
        let len = extensions.u16()? as usize;
        let body = extensions.take(len)?;
        if kind == SERVER_NAME_EXTENSION {
            return host_name(body);
        }
    }

    None
}

fn host_name(extension: &[u8]) -> Option<String> {
    let mut reader = Reader::new(extension);
    let list_len = reader.u16()? as usize;
    let mut list = Reader::new(reader.take(list_len)?);
    while !list.is_empty() {
        let name_type = list.u8()?;
        let len = list.u16()? as usize;
        let name = list.take(len)?;
        if name_type == HOST_NAME_TYPE {
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
    }
    None
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.data.len() < len {
            return None;
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Some(head)
    }

    fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|bytes| bytes[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|bytes| u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
    }
}

#[cfg(test)]
pub(crate) fn client_hello_with_server_name(name: &str) -> Vec<u8> {
    let name = name.as_bytes();

    let mut server_name = Vec::new();
    server_name.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    server_name.push(HOST_NAME_TYPE);
    server_name.extend_from_slice(&(name.len() as u16).to_be_bytes());
    server_name.extend_from_slice(name);

    let mut extensions = Vec::new();
    // an unrelated extension first (supported_versions)
    extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);
    extensions.extend_from_slice(&SERVER_NAME_EXTENSION.to_be_bytes());
    extensions.extend_from_slice(&(server_name.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&server_name);

    let mut hello = Vec::new();
    hello.extend_from_slice(&[0x03, 0x03]);
    hello.extend_from_slice(&[0xab; 32]);
    hello.push(0);
    hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
    hello.extend_from_slice(&[0x01, 0x00]);
    hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    hello.extend_from_slice(&extensions);

    let mut handshake = vec![CLIENT_HELLO];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![HANDSHAKE_RECORD, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
