//! TLS fingerprint computation: JA3, JA3N, and JA4
//!
//! All three fingerprints are pure functions of a parsed [`ClientHello`]:
//! - JA3 is the MD5 of the classic comma-separated 5-tuple
//!   `version,ciphers,extensions,groups,formats` (decimal, `-`-joined)
//! - JA3N re-sorts only the extensions field of the JA3 string before
//!   hashing, making it stable against extension-order randomization
//! - JA4 is the printable `t{ver}{sni}{counts}{alpn}_{hash}_{hash}` form
//!   with truncated SHA-256 digests over the sorted cipher and extension
//!   lists
//!
//! GREASE values never reach this module; the handshake parser strips them.

use md5::{Digest, Md5};
use sha2::Sha256;

use crate::handshake::ClientHello;

/// The fingerprint families computed for every inspected connection.
///
/// Order matters: policy evaluation walks [`FingerprintKind::ALL`] in this
/// order and the first blocking kind wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintKind {
    Ja3,
    Ja3n,
    Ja4,
}

impl FingerprintKind {
    /// Evaluation order: JA3 before JA3N before JA4
    pub const ALL: [FingerprintKind; 3] = [
        FingerprintKind::Ja3,
        FingerprintKind::Ja3n,
        FingerprintKind::Ja4,
    ];

    /// Key prefix used by the store schema (`ja3:count`, `ja4:blacklist`, ...)
    pub fn key_prefix(self) -> &'static str {
        match self {
            FingerprintKind::Ja3 => "ja3",
            FingerprintKind::Ja3n => "ja3n",
            FingerprintKind::Ja4 => "ja4",
        }
    }

    /// Stable index into per-kind arrays (flags, lists, telemetry tables)
    pub fn index(self) -> usize {
        match self {
            FingerprintKind::Ja3 => 0,
            FingerprintKind::Ja3n => 1,
            FingerprintKind::Ja4 => 2,
        }
    }
}

impl std::fmt::Display for FingerprintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_prefix())
    }
}

/// One fingerprint of each kind for a single ClientHello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSet {
    /// Lowercase hex MD5 of the JA3 string
    pub ja3: String,
    /// Lowercase hex MD5 of the extension-sorted JA3 string
    pub ja3n: String,
    /// Printable JA4 form
    pub ja4: String,
}

impl FingerprintSet {
    pub fn get(&self, kind: FingerprintKind) -> &str {
        match kind {
            FingerprintKind::Ja3 => &self.ja3,
            FingerprintKind::Ja3n => &self.ja3n,
            FingerprintKind::Ja4 => &self.ja4,
        }
    }
}

/// Computes all three fingerprints for a parsed ClientHello.
pub fn fingerprint(hello: &ClientHello) -> FingerprintSet {
    let ja3_str = ja3_string(hello);
    let ja3n_str = ja3n_string(&ja3_str);
    FingerprintSet {
        ja3: md5_hex(&ja3_str),
        ja3n: md5_hex(&ja3n_str),
        ja4: ja4_string(hello),
    }
}

/// The canonical JA3 5-tuple:
/// `TLSVersion,CipherSuites,Extensions,SupportedGroups,ECPointFormats`,
/// every list decimal and `-`-joined.
pub fn ja3_string(hello: &ClientHello) -> String {
    format!(
        "{},{},{},{},{}",
        hello.legacy_version,
        join_decimal(&hello.cipher_suites),
        join_decimal(&hello.extensions),
        join_decimal(&hello.supported_groups),
        hello
            .ec_point_formats
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("-"),
    )
}

/// Derives the JA3N string from a JA3 string by sorting the third field.
///
/// The sort is lexicographic over the decimal tokens ("10" < "5"), not
/// numeric; changing that would silently change every JA3N hash.
pub fn ja3n_string(ja3: &str) -> String {
    let mut parts: Vec<&str> = ja3.split(',').collect();
    if parts.len() != 5 {
        return ja3.to_string();
    }
    let mut tokens: Vec<&str> = if parts[2].is_empty() {
        Vec::new()
    } else {
        parts[2].split('-').collect()
    };
    tokens.sort_unstable();
    let sorted = tokens.join("-");
    parts[2] = &sorted;
    parts.join(",")
}

/// Computes the printable JA4 form, e.g. `t13d1516h2_8daaf6152771_e5627efa2ab1`.
///
/// Layout per the JA4 specification:
/// - `t` (TCP) + TLS version + `d`/`i` (SNI present or not)
/// - two-digit cipher and extension counts (capped at 99)
/// - first and last character of the first ALPN protocol (`00` if none)
/// - truncated SHA-256 of the sorted cipher list (4-hex, comma-joined)
/// - truncated SHA-256 of the sorted extension list excluding SNI and ALPN,
///   with the unsorted signature algorithms appended after an underscore
pub fn ja4_string(hello: &ClientHello) -> String {
    let version = ja4_version(hello);
    let sni_marker = if hello.sni.is_some() { 'd' } else { 'i' };
    let nr_ciphers = 99.min(hello.cipher_suites.len());
    let nr_exts = 99.min(hello.extensions.len());
    let (alpn_first, alpn_last) = alpn_markers(hello.alpn.first().map(String::as_str));

    let mut ciphers: Vec<String> = hello
        .cipher_suites
        .iter()
        .map(|c| format!("{c:04x}"))
        .collect();
    ciphers.sort_unstable();

    // SNI and ALPN are counted above but excluded from the hashed list.
    let mut exts: Vec<u16> = hello
        .extensions
        .iter()
        .copied()
        .filter(|&e| e != 0 && e != 16)
        .collect();
    exts.sort_unstable();
    let mut exts_sigs = exts
        .iter()
        .map(|e| format!("{e:04x}"))
        .collect::<Vec<_>>()
        .join(",");
    if !hello.signature_algorithms.is_empty() {
        let sigs = hello
            .signature_algorithms
            .iter()
            .map(|s| format!("{s:04x}"))
            .collect::<Vec<_>>()
            .join(",");
        exts_sigs = format!("{exts_sigs}_{sigs}");
    }

    format!(
        "t{version}{sni_marker}{nr_ciphers:02}{nr_exts:02}{alpn_first}{alpn_last}_{}_{}",
        hash12(&ciphers.join(",")),
        hash12(&exts_sigs),
    )
}

/// TLS version indicator: the highest offered supported_versions entry wins
/// over the legacy handshake version (TLS 1.3 clients keep the legacy field
/// at 1.2).
fn ja4_version(hello: &ClientHello) -> &'static str {
    let version = hello
        .supported_versions
        .iter()
        .copied()
        .max()
        .unwrap_or(hello.legacy_version);
    match version {
        0x0304 => "13",
        0x0303 => "12",
        0x0302 => "11",
        0x0301 => "10",
        0x0300 => "s3",
        0x0002 => "s2",
        _ => "00",
    }
}

/// First and last character of the first ALPN value, `('0', '0')` when the
/// client offered none. Non-ASCII bytes map to `9` per the JA4 spec.
fn alpn_markers(alpn: Option<&str>) -> (char, char) {
    let Some(proto) = alpn else {
        return ('0', '0');
    };
    let ascii_or_9 = |c: char| if c.is_ascii() { c } else { '9' };
    let mut chars = proto.chars();
    let first = chars.next().map(ascii_or_9).unwrap_or('0');
    let last = chars.next_back().map(ascii_or_9).unwrap_or('0');
    (first, last)
}

fn join_decimal(values: &[u16]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn md5_hex(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncated SHA-256 used by JA4; the empty list hashes to twelve zeros.
fn hash12(s: &str) -> String {
    if s.is_empty() {
        return "000000000000".to_string();
    }
    let digest = hex::encode(Sha256::digest(s.as_bytes()));
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::testutil::HelloBuilder;

    fn sample_hello() -> ClientHello {
        let bytes = HelloBuilder {
            legacy_version: 0x0303,
            cipher_suites: vec![0x1301, 0x1302, 0xc02f],
            ..Default::default()
        }
        .sni("example.com")
        .supported_groups(&[29, 23, 24])
        .ec_point_formats(&[0])
        .signature_algorithms(&[0x0403])
        .alpn(&["h2"])
        .supported_versions(&[0x0304, 0x0303])
        .build();
        ClientHello::parse(&bytes).unwrap()
    }

    // ========================================================================
    // JA3 / JA3N
    // ========================================================================

    #[test]
    fn test_ja3_string_layout() {
        let hello = sample_hello();
        // extensions in wire order: sni(0), groups(10), formats(11),
        // sigalgs(13), alpn(16), versions(43)
        assert_eq!(
            ja3_string(&hello),
            "771,4865-4866-49199,0-10-11-13-16-43,29-23-24,0"
        );
    }

    #[test]
    fn test_ja3_hash_is_md5_of_string() {
        let hello = sample_hello();
        let set = fingerprint(&hello);
        assert_eq!(set.ja3, md5_hex(&ja3_string(&hello)));
        assert_eq!(set.ja3.len(), 32);
        assert!(set.ja3.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ja3n_sorts_only_extensions_field() {
        let ja3 = "771,4865-49199,16-0-43-11,29-23,0";
        // lexicographic: "0" < "11" < "16" < "43"
        assert_eq!(ja3n_string(ja3), "771,4865-49199,0-11-16-43,29-23,0");
    }

    #[test]
    fn test_ja3n_sort_is_lexicographic_not_numeric() {
        // numerically 5 < 10 < 13, lexicographically "10" < "13" < "5"
        let ja3 = "771,1,5-10-13,2,3";
        assert_eq!(ja3n_string(ja3), "771,1,10-13-5,2,3");
    }

    #[test]
    fn test_ja3n_handles_empty_extensions_field() {
        let ja3 = "771,4865,,29,0";
        assert_eq!(ja3n_string(ja3), ja3);
    }

    #[test]
    fn test_ja3n_differs_only_under_reordering() {
        let a = "771,1-2,10-5,3,4";
        let b = "771,1-2,5-10,3,4";
        assert_eq!(ja3n_string(a), ja3n_string(b));
        assert_ne!(md5_hex(a), md5_hex(b));
    }

    // ========================================================================
    // JA4
    // ========================================================================

    /// Reference vector from the JA4 specification's example ClientHello.
    #[test]
    fn test_ja4_reference_vector() {
        let hello = ClientHello {
            legacy_version: 0x0303,
            cipher_suites: vec![
                0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013,
                0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
            ],
            extensions: vec![
                0x001b, 0x0000, 0x0033, 0x0010, 0x4469, 0x0017, 0x002d, 0x000d, 0x0005, 0x0023,
                0x0012, 0x002b, 0xff01, 0x000b, 0x000a, 0x0015,
            ],
            supported_groups: vec![29, 23, 24],
            ec_point_formats: vec![0],
            signature_algorithms: vec![
                0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
            ],
            supported_versions: vec![0x0304, 0x0303],
            sni: Some("example.com".to_string()),
            alpn: vec!["h2".to_string()],
        };
        assert_eq!(ja4_string(&hello), "t13d1516h2_8daaf6152771_e5627efa2ab1");
    }

    #[test]
    fn test_ja4_no_sni_no_alpn() {
        let bytes = HelloBuilder {
            cipher_suites: vec![0xc02f],
            ..Default::default()
        }
        .build();
        let hello = ClientHello::parse(&bytes).unwrap();
        let ja4 = ja4_string(&hello);
        assert!(ja4.starts_with("t12i0100"), "got {ja4}");
        // no extensions at all: the extension hash is the empty-list sentinel
        assert!(ja4.ends_with("_000000000000"), "got {ja4}");
    }

    #[test]
    fn test_ja4_version_prefers_supported_versions() {
        let mut hello = sample_hello();
        assert!(ja4_string(&hello).starts_with("t13"));
        hello.supported_versions.clear();
        assert!(ja4_string(&hello).starts_with("t12"));
    }

    #[test]
    fn test_ja4_counts_are_capped_and_zero_padded() {
        let bytes = HelloBuilder {
            cipher_suites: vec![0x1301],
            ..Default::default()
        }
        .alpn(&["http/1.1"])
        .build();
        let hello = ClientHello::parse(&bytes).unwrap();
        // 1 cipher, 1 extension (alpn), alpn markers 'h' and '1'
        assert!(ja4_string(&hello).starts_with("t12i0101h1"));
    }

    // ========================================================================
    // Purity
    // ========================================================================

    #[test]
    fn test_fingerprint_is_pure() {
        let hello = sample_hello();
        assert_eq!(fingerprint(&hello), fingerprint(&hello));
    }

    #[test]
    fn test_fingerprint_set_accessor_matches_fields() {
        let set = fingerprint(&sample_hello());
        assert_eq!(set.get(FingerprintKind::Ja3), set.ja3);
        assert_eq!(set.get(FingerprintKind::Ja3n), set.ja3n);
        assert_eq!(set.get(FingerprintKind::Ja4), set.ja4);
    }

    #[test]
    fn test_kind_prefixes_match_store_schema() {
        assert_eq!(FingerprintKind::Ja3.key_prefix(), "ja3");
        assert_eq!(FingerprintKind::Ja3n.key_prefix(), "ja3n");
        assert_eq!(FingerprintKind::Ja4.key_prefix(), "ja4");
    }
}
