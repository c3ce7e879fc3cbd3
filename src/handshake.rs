//! TLS ClientHello classification and structural parsing
//!
//! The classifier is a cheap prefix test used to decide whether a preread
//! buffer is worth handing to the parser at all. The parser walks the first
//! TLS record and pulls out every field the fingerprint algorithms need.
//! Both operate on raw bytes; no TLS library is involved and the connection
//! is never terminated.

use thiserror::Error;

// Extension types relevant to fingerprinting
const EXT_SERVER_NAME: u16 = 0;
const EXT_SUPPORTED_GROUPS: u16 = 10;
const EXT_EC_POINT_FORMATS: u16 = 11;
const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
const EXT_ALPN: u16 = 16;
const EXT_SUPPORTED_VERSIONS: u16 = 43;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// Structural failure while parsing a ClientHello
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("buffer shorter than the TLS record it claims to hold")]
    Truncated,
    #[error("not a TLS handshake record")]
    NotHandshake,
    #[error("handshake message is not a ClientHello")]
    NotClientHello,
    #[error("malformed ClientHello: {0}")]
    Malformed(&'static str),
}

/// Returns true iff the buffer begins like a TLS handshake record.
///
/// This is a gate, not a guarantee: a true result only means the buffer is
/// worth handing to [`ClientHello::parse`], which still validates structure.
pub fn is_tls_client_hello(data: &[u8]) -> bool {
    data.len() >= 5 && data[0] == CONTENT_TYPE_HANDSHAKE && data[1] == 0x03
}

/// Fields extracted from a ClientHello, GREASE values already removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Legacy handshake version (e.g. 0x0303); TLS 1.3 clients advertise the
    /// real version via the supported_versions extension instead
    pub legacy_version: u16,
    /// Offered cipher suites in wire order
    pub cipher_suites: Vec<u16>,
    /// Extension types in wire order
    pub extensions: Vec<u16>,
    /// Supported groups (extension 10) in wire order
    pub supported_groups: Vec<u16>,
    /// EC point formats (extension 11) in wire order
    pub ec_point_formats: Vec<u8>,
    /// Signature algorithms (extension 13) in wire order
    pub signature_algorithms: Vec<u16>,
    /// Versions offered via supported_versions (extension 43)
    pub supported_versions: Vec<u16>,
    /// Server Name Indication, if present
    pub sni: Option<String>,
    /// ALPN protocol names in preference order
    pub alpn: Vec<String>,
}

/// GREASE values follow the 0x?a?a pattern (RFC 8701)
fn is_grease(value: u16) -> bool {
    let hi = (value >> 8) as u8;
    let lo = value as u8;
    hi == lo && (hi & 0x0f) == 0x0a
}

/// Bounds-checked byte reader over a ClientHello body
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, HandshakeError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(HandshakeError::Malformed(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, HandshakeError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], HandshakeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(HandshakeError::Malformed(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize, what: &'static str) -> Result<(), HandshakeError> {
        self.take(n, what).map(|_| ())
    }

    fn collect_u16(&mut self, what: &'static str) -> Result<Vec<u16>, HandshakeError> {
        let mut out = Vec::with_capacity(self.remaining() / 2);
        while self.remaining() >= 2 {
            out.push(self.u16(what)?);
        }
        Ok(out)
    }
}

impl ClientHello {
    /// Parses the first TLS record of a preread buffer into its fingerprint
    /// inputs.
    ///
    /// The record must be complete: a ClientHello cut off by the preread
    /// limit is a structural failure, not a partial success. Trailing bytes
    /// after the first record are ignored.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        if data.len() < 5 {
            return Err(HandshakeError::Truncated);
        }
        if data[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(HandshakeError::NotHandshake);
        }
        let record_len = u16::from_be_bytes([data[3], data[4]]) as usize;
        let record = data
            .get(5..5 + record_len)
            .ok_or(HandshakeError::Truncated)?;

        if record.len() < 4 {
            return Err(HandshakeError::Malformed("handshake header"));
        }
        if record[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(HandshakeError::NotClientHello);
        }
        let hello_len =
            ((record[1] as usize) << 16) | ((record[2] as usize) << 8) | record[3] as usize;
        let body = record
            .get(4..4 + hello_len)
            .ok_or(HandshakeError::Malformed("handshake length"))?;

        let mut r = Reader::new(body);

        let legacy_version = r.u16("legacy version")?;
        r.skip(32, "random")?;

        let session_id_len = r.u8("session id length")? as usize;
        r.skip(session_id_len, "session id")?;

        let cipher_suites_len = r.u16("cipher suites length")? as usize;
        if cipher_suites_len % 2 != 0 {
            return Err(HandshakeError::Malformed("odd cipher suites length"));
        }
        let mut cipher_suites = Vec::with_capacity(cipher_suites_len / 2);
        let suites = Reader::new(r.take(cipher_suites_len, "cipher suites")?)
            .collect_u16("cipher suite")?;
        for suite in suites {
            if !is_grease(suite) {
                cipher_suites.push(suite);
            }
        }

        let compression_len = r.u8("compression methods length")? as usize;
        r.skip(compression_len, "compression methods")?;

        let mut hello = Self {
            legacy_version,
            cipher_suites,
            extensions: Vec::new(),
            supported_groups: Vec::new(),
            ec_point_formats: Vec::new(),
            signature_algorithms: Vec::new(),
            supported_versions: Vec::new(),
            sni: None,
            alpn: Vec::new(),
        };

        // Extensions are optional; a hello that ends here is still valid.
        if r.remaining() == 0 {
            return Ok(hello);
        }

        let extensions_len = r.u16("extensions length")? as usize;
        let mut exts = Reader::new(r.take(extensions_len, "extensions")?);
        while exts.remaining() >= 4 {
            let ext_type = exts.u16("extension type")?;
            let ext_len = exts.u16("extension length")? as usize;
            let ext_data = exts.take(ext_len, "extension data")?;

            if is_grease(ext_type) {
                continue;
            }
            hello.extensions.push(ext_type);

            match ext_type {
                EXT_SERVER_NAME => hello.sni = parse_sni(ext_data),
                EXT_SUPPORTED_GROUPS => {
                    hello.supported_groups = parse_u16_list(ext_data)
                        .into_iter()
                        .filter(|&g| !is_grease(g))
                        .collect();
                }
                EXT_EC_POINT_FORMATS => hello.ec_point_formats = parse_u8_list(ext_data),
                EXT_SIGNATURE_ALGORITHMS => hello.signature_algorithms = parse_u16_list(ext_data),
                EXT_ALPN => hello.alpn = parse_alpn(ext_data),
                EXT_SUPPORTED_VERSIONS => {
                    hello.supported_versions = parse_supported_versions(ext_data)
                        .into_iter()
                        .filter(|&v| !is_grease(v))
                        .collect();
                }
                _ => {}
            }
        }

        Ok(hello)
    }
}

/// SNI extension: 2-byte list length, then (type, 2-byte length, name) entries.
/// Only the first host_name entry matters.
fn parse_sni(data: &[u8]) -> Option<String> {
    if data.len() < 5 {
        return None;
    }
    let mut offset = 2;
    while offset + 3 <= data.len() {
        let name_type = data[offset];
        let name_len = u16::from_be_bytes([data[offset + 1], data[offset + 2]]) as usize;
        offset += 3;
        if offset + name_len > data.len() {
            return None;
        }
        if name_type == 0x00 {
            return std::str::from_utf8(&data[offset..offset + name_len])
                .ok()
                .map(str::to_owned);
        }
        offset += name_len;
    }
    None
}

/// 2-byte list length followed by 2-byte entries (supported groups,
/// signature algorithms)
fn parse_u16_list(data: &[u8]) -> Vec<u16> {
    if data.len() < 2 {
        return Vec::new();
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut out = Vec::new();
    let end = (2 + list_len).min(data.len());
    let mut i = 2;
    while i + 2 <= end {
        out.push(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    out
}

/// 1-byte list length followed by 1-byte entries (EC point formats)
fn parse_u8_list(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let list_len = data[0] as usize;
    data[1..].iter().take(list_len).copied().collect()
}

/// supported_versions: 1-byte list length followed by 2-byte versions
fn parse_supported_versions(data: &[u8]) -> Vec<u16> {
    if data.is_empty() {
        return Vec::new();
    }
    let list_len = data[0] as usize;
    let end = (1 + list_len).min(data.len());
    let mut out = Vec::new();
    let mut i = 1;
    while i + 2 <= end {
        out.push(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    out
}

/// ALPN: 2-byte list length, then (1-byte length, name) entries
fn parse_alpn(data: &[u8]) -> Vec<String> {
    if data.len() < 2 {
        return Vec::new();
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let end = (2 + list_len).min(data.len());
    let mut protocols = Vec::new();
    let mut offset = 2;
    while offset < end {
        let proto_len = data[offset] as usize;
        offset += 1;
        if offset + proto_len > end {
            break;
        }
        if let Ok(proto) = std::str::from_utf8(&data[offset..offset + proto_len]) {
            protocols.push(proto.to_string());
        }
        offset += proto_len;
    }
    protocols
}

#[cfg(test)]
pub(crate) mod testutil {
    /// Builds a syntactically valid ClientHello record from its parts.
    /// Lengths are computed, so tests only describe content.
    pub struct HelloBuilder {
        pub legacy_version: u16,
        pub cipher_suites: Vec<u16>,
        pub session_id: Vec<u8>,
        pub extensions: Vec<(u16, Vec<u8>)>,
    }

    impl Default for HelloBuilder {
        fn default() -> Self {
            Self {
                legacy_version: 0x0303,
                cipher_suites: vec![0x1301, 0xc02f],
                session_id: Vec::new(),
                extensions: Vec::new(),
            }
        }
    }

    impl HelloBuilder {
        pub fn sni(mut self, host: &str) -> Self {
            let mut data = Vec::new();
            data.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
            data.push(0x00);
            data.extend_from_slice(&(host.len() as u16).to_be_bytes());
            data.extend_from_slice(host.as_bytes());
            self.extensions.push((0, data));
            self
        }

        pub fn alpn(mut self, protocols: &[&str]) -> Self {
            let mut list = Vec::new();
            for proto in protocols {
                list.push(proto.len() as u8);
                list.extend_from_slice(proto.as_bytes());
            }
            let mut data = Vec::new();
            data.extend_from_slice(&(list.len() as u16).to_be_bytes());
            data.extend_from_slice(&list);
            self.extensions.push((16, data));
            self
        }

        pub fn supported_groups(mut self, groups: &[u16]) -> Self {
            let mut data = Vec::new();
            data.extend_from_slice(&((groups.len() * 2) as u16).to_be_bytes());
            for g in groups {
                data.extend_from_slice(&g.to_be_bytes());
            }
            self.extensions.push((10, data));
            self
        }

        pub fn ec_point_formats(mut self, formats: &[u8]) -> Self {
            let mut data = vec![formats.len() as u8];
            data.extend_from_slice(formats);
            self.extensions.push((11, data));
            self
        }

        pub fn signature_algorithms(mut self, algs: &[u16]) -> Self {
            let mut data = Vec::new();
            data.extend_from_slice(&((algs.len() * 2) as u16).to_be_bytes());
            for a in algs {
                data.extend_from_slice(&a.to_be_bytes());
            }
            self.extensions.push((13, data));
            self
        }

        pub fn supported_versions(mut self, versions: &[u16]) -> Self {
            let mut data = vec![(versions.len() * 2) as u8];
            for v in versions {
                data.extend_from_slice(&v.to_be_bytes());
            }
            self.extensions.push((43, data));
            self
        }

        pub fn raw_extension(mut self, ext_type: u16, data: Vec<u8>) -> Self {
            self.extensions.push((ext_type, data));
            self
        }

        pub fn build(self) -> Vec<u8> {
            let mut body = Vec::new();
            body.extend_from_slice(&self.legacy_version.to_be_bytes());
            body.extend_from_slice(&[0u8; 32]);
            body.push(self.session_id.len() as u8);
            body.extend_from_slice(&self.session_id);
            body.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
            for cs in &self.cipher_suites {
                body.extend_from_slice(&cs.to_be_bytes());
            }
            body.extend_from_slice(&[0x01, 0x00]); // null compression

            let mut ext_block = Vec::new();
            for (ext_type, data) in &self.extensions {
                ext_block.extend_from_slice(&ext_type.to_be_bytes());
                ext_block.extend_from_slice(&(data.len() as u16).to_be_bytes());
                ext_block.extend_from_slice(data);
            }
            body.extend_from_slice(&(ext_block.len() as u16).to_be_bytes());
            body.extend_from_slice(&ext_block);

            let mut record = vec![0x16, 0x03, 0x01];
            record.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
            record.push(0x01);
            record.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
            record.extend_from_slice(&body);
            record
        }
    }
}
