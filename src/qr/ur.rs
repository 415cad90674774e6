//! UR String Framing
//!
//! Wraps binary fragment bodies in `ur:<type>/<seq>-<seqlen>/<payload>`
//! strings for QR display. The payload is bytewords-encoded (two
//! characters per byte, unique first/last letters per word) with a CRC32
//! trailer so a corrupted scan is caught before the fragment reaches the
//! fountain decoder.

use super::{QrError, QrResult};

/// Reserved prefix identifying a multi-part transmission fragment.
pub const UR_PREFIX: &str = "ur:";

/// Returns true when a scanned string claims to be a UR fragment.
pub fn is_ur(text: &str) -> bool {
    text.len() >= UR_PREFIX.len() && text[..UR_PREFIX.len()].eq_ignore_ascii_case(UR_PREFIX)
}

/// Payload type tags carried in the UR prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrType {
    /// Partially signed transaction
    Psbt,
    /// Signature result
    Signature,
    /// Untyped bytes
    Bytes,
}

impl UrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrType::Psbt => "psbt",
            UrType::Signature => "signature",
            UrType::Bytes => "bytes",
        }
    }

    pub fn parse(s: &str) -> QrResult<Self> {
        match s {
            "psbt" => Ok(UrType::Psbt),
            "signature" => Ok(UrType::Signature),
            "bytes" => Ok(UrType::Bytes),
            other => Err(QrError::UnsupportedUrType(other.to_string())),
        }
    }
}

/// One parsed UR fragment string.
#[derive(Debug, Clone)]
pub struct UrFragment {
    pub ur_type: UrType,
    /// 1-based display sequence number (may exceed `seq_len` while the
    /// sender cycles extra fountain parts)
    pub seq: u32,
    /// Fragment count of the underlying payload
    pub seq_len: u32,
    /// Decoded binary body
    pub body: Vec<u8>,
}

/// Render a fragment body as a UR string.
pub fn format_fragment(ur_type: UrType, seq: u32, seq_len: u32, body: &[u8]) -> String {
    format!(
        "ur:{}/{}-{}/{}",
        ur_type.as_str(),
        seq,
        seq_len,
        bytewords_encode(body)
    )
}

/// Parse and checksum-verify a UR fragment string.
pub fn parse_fragment(text: &str) -> QrResult<UrFragment> {
    let text = text.trim();
    if !is_ur(text) {
        return Err(QrError::InvalidUrFormat("missing 'ur:' prefix".into()));
    }
    let content = text[UR_PREFIX.len()..].to_ascii_lowercase();
    let mut parts = content.split('/');

    let type_tag = parts
        .next()
        .ok_or_else(|| QrError::InvalidUrFormat("missing type".into()))?;
    let sequence = parts
        .next()
        .ok_or_else(|| QrError::InvalidUrFormat("missing sequence".into()))?;
    let payload = parts
        .next()
        .ok_or_else(|| QrError::InvalidUrFormat("missing payload".into()))?;
    if parts.next().is_some() {
        return Err(QrError::InvalidUrFormat("too many path segments".into()));
    }

    let ur_type = UrType::parse(type_tag)?;
    let (seq, seq_len) = sequence
        .split_once('-')
        .and_then(|(a, b)| Some((a.parse().ok()?, b.parse().ok()?)))
        .ok_or_else(|| QrError::InvalidUrFormat("bad seq-count".into()))?;
    if seq_len == 0 {
        return Err(QrError::InvalidUrFormat("zero fragment count".into()));
    }

    Ok(UrFragment {
        ur_type,
        seq,
        seq_len,
        body: bytewords_decode(payload)?,
    })
}

/// Bytewords minimal encoding: each byte becomes the first and last
/// letter of its word; a CRC32 of the data is appended before encoding.
pub fn bytewords_encode(data: &[u8]) -> String {
    let checksum = crc32fast::hash(data).to_be_bytes();
    let mut out = String::with_capacity((data.len() + 4) * 2);
    for byte in data.iter().chain(checksum.iter()) {
        let word = BYTEWORDS[*byte as usize].as_bytes();
        out.push(word[0] as char);
        out.push(word[3] as char);
    }
    out
}

/// Inverse of [`bytewords_encode`], verifying the CRC32 trailer.
pub fn bytewords_decode(encoded: &str) -> QrResult<Vec<u8>> {
    let chars = encoded.as_bytes();
    if chars.len() % 2 != 0 {
        return Err(QrError::InvalidData("odd bytewords length".into()));
    }
    let mut bytes = Vec::with_capacity(chars.len() / 2);
    for pair in chars.chunks_exact(2) {
        let byte = lookup_pair(pair[0], pair[1]).ok_or_else(|| {
            QrError::InvalidData(format!(
                "unknown byteword '{}{}'",
                pair[0] as char, pair[1] as char
            ))
        })?;
        bytes.push(byte);
    }
    if bytes.len() < 4 {
        return Err(QrError::InvalidData("bytewords body too short".into()));
    }

    let data_len = bytes.len() - 4;
    let expected = u32::from_be_bytes([
        bytes[data_len],
        bytes[data_len + 1],
        bytes[data_len + 2],
        bytes[data_len + 3],
    ]);
    bytes.truncate(data_len);
    if crc32fast::hash(&bytes) != expected {
        return Err(QrError::ChecksumMismatch);
    }
    Ok(bytes)
}

fn lookup_pair(first: u8, last: u8) -> Option<u8> {
    BYTEWORDS.iter().position(|w| {
        let w = w.as_bytes();
        w[0] == first && w[3] == last
    })
    .map(|i| i as u8)
}

/// Official BC-UR bytewords wordlist (256 words, 4 chars each).
/// Each word has unique first and last characters for error detection.
const BYTEWORDS: [&str; 256] = [
    // 0x00-0x07
    "able", "acid", "also", "apex", "aqua", "arch", "atom", "aunt",
    // 0x08-0x0f
    "away", "axis", "back", "bald", "barn", "belt", "beta", "bias",
    // 0x10-0x17
    "blue", "body", "brag", "brew", "bulb", "buzz", "calm", "cash",
    // 0x18-0x1f
    "cats", "chef", "city", "claw", "code", "cola", "cook", "cost",
    // 0x20-0x27
    "crux", "curl", "cusp", "cyan", "dark", "data", "days", "deli",
    // 0x28-0x2f
    "dice", "diet", "door", "down", "draw", "drop", "drum", "dull",
    // 0x30-0x37
    "duty", "each", "easy", "echo", "edge", "epic", "even", "exam",
    // 0x38-0x3f
    "exit", "eyes", "fact", "fair", "fern", "figs", "film", "fish",
    // 0x40-0x47
    "fizz", "flap", "flew", "flux", "foxy", "free", "frog", "fuel",
    // 0x48-0x4f
    "fund", "gala", "game", "gear", "gems", "gift", "girl", "glow",
    // 0x50-0x57
    "good", "gray", "grim", "guru", "gush", "gyro", "half", "hang",
    // 0x58-0x5f
    "hard", "hawk", "heat", "help", "high", "hill", "holy", "hope",
    // 0x60-0x67
    "horn", "huts", "iced", "idea", "idle", "inch", "inky", "into",
    // 0x68-0x6f
    "iris", "iron", "item", "jade", "jazz", "join", "jolt", "jowl",
    // 0x70-0x77
    "judo", "jugs", "jump", "junk", "jury", "keep", "keno", "kept",
    // 0x78-0x7f
    "keys", "kick", "kiln", "king", "kite", "kiwi", "knob", "lamb",
    // 0x80-0x87
    "lava", "lazy", "leaf", "legs", "liar", "limp", "lion", "list",
    // 0x88-0x8f
    "logo", "loud", "love", "luau", "luck", "lung", "main", "many",
    // 0x90-0x97
    "math", "maze", "memo", "menu", "meow", "mild", "mint", "miss",
    // 0x98-0x9f
    "monk", "nail", "navy", "need", "news", "next", "noon", "note",
    // 0xa0-0xa7
    "numb", "obey", "oboe", "omit", "onyx", "open", "oval", "owls",
    // 0xa8-0xaf
    "paid", "part", "peck", "play", "plus", "poem", "pool", "pose",
    // 0xb0-0xb7
    "puff", "puma", "purr", "quad", "quiz", "race", "ramp", "real",
    // 0xb8-0xbf
    "redo", "rich", "road", "rock", "roof", "ruby", "ruin", "runs",
    // 0xc0-0xc7
    "rust", "safe", "saga", "scar", "sets", "silk", "skew", "slot",
    // 0xc8-0xcf
    "soap", "solo", "song", "stub", "surf", "swan", "taco", "task",
    // 0xd0-0xd7
    "taxi", "tent", "tied", "time", "tiny", "toil", "tomb", "toys",
    // 0xd8-0xdf
    "trip", "tuna", "twin", "ugly", "undo", "unit", "urge", "user",
    // 0xe0-0xe7
    "vast", "very", "veto", "vial", "vibe", "view", "visa", "void",
    // 0xe8-0xef
    "vows", "wall", "wand", "warm", "wasp", "wave", "waxy", "webs",
    // 0xf0-0xf7
    "what", "when", "whiz", "wolf", "work", "yank", "yawn", "yell",
    // 0xf8-0xff
    "yoga", "yurt", "zaps", "zero", "zest", "zinc", "zone", "zoom",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytewords_roundtrip() {
        let data: Vec<u8> = (0..=255).collect();
        let encoded = bytewords_encode(&data);
        assert_eq!(bytewords_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn wordlist_pairs_are_unambiguous() {
        // The minimal encoding keeps only the first and last letter of
        // each word, so every (first, last) pair must map back to
        // exactly one byte.
        let mut seen = std::collections::HashSet::new();
        for word in BYTEWORDS {
            assert_eq!(word.len(), 4);
            let w = word.as_bytes();
            assert!(seen.insert((w[0], w[3])), "ambiguous pair in {word}");
        }
        assert_eq!(lookup_pair(b'a', b'e'), Some(0x00));
        assert_eq!(lookup_pair(b'z', b'm'), Some(0xff));
    }

    #[test]
    fn bytewords_detects_corruption() {
        let encoded = bytewords_encode(b"payload bytes");
        // Swap one character pair for a different valid word
        let mut corrupted: Vec<u8> = encoded.into_bytes();
        let replacement = if &corrupted[..2] == b"ae" { b"zm" } else { b"ae" };
        corrupted[..2].copy_from_slice(replacement);
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(matches!(
            bytewords_decode(&corrupted),
            Err(QrError::ChecksumMismatch)
        ));
    }

    #[test]
    fn fragment_roundtrip() {
        let body = vec![7u8; 40];
        let s = format_fragment(UrType::Psbt, 3, 12, &body);
        assert!(s.starts_with("ur:psbt/3-12/"));

        let parsed = parse_fragment(&s).unwrap();
        assert_eq!(parsed.ur_type, UrType::Psbt);
        assert_eq!((parsed.seq, parsed.seq_len), (3, 12));
        assert_eq!(parsed.body, body);
    }

    #[test]
    fn prefix_is_case_insensitive() {
        let s = format_fragment(UrType::Bytes, 1, 1, b"x").to_uppercase();
        assert!(is_ur(&s));
        let parsed = parse_fragment(&s).unwrap();
        assert_eq!(parsed.body, b"x".to_vec());
    }

    #[test]
    fn rejects_malformed_fragments() {
        assert!(parse_fragment("not a fragment").is_err());
        assert!(parse_fragment("ur:psbt").is_err());
        assert!(parse_fragment("ur:psbt/oops/aeae").is_err());
        assert!(parse_fragment("ur:psbt/1-0/aeae").is_err());
        assert!(parse_fragment("ur:mystery/1-2/aeae").is_err());
        assert!(parse_fragment("ur:psbt/1-2/aeae/extra").is_err());
    }
}
