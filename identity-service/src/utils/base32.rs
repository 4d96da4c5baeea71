//! RFC 4648 base32 (upper-case alphabet, no padding), as used in TOTP provisioning URIs.

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            let index = (buffer >> (bits - 5)) & 0x1f;
            out.push(ALPHABET[index as usize] as char);
            bits -= 5;
        }
    }

    if bits > 0 {
        let index = (buffer << (5 - bits)) & 0x1f;
        out.push(ALPHABET[index as usize] as char);
    }

    out
}

/// Decodes base32, ignoring case, spaces and trailing `=` padding.
pub fn decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for c in input.trim_end_matches('=').chars() {
        if c == ' ' {
            continue;
        }
        let upper = c.to_ascii_uppercase() as u8;
        let value = ALPHABET.iter().position(|&a| a == upper)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            out.push(((buffer >> (bits - 8)) & 0xff) as u8);
            bits -= 8;
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc4648_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"f"), "MY");
        assert_eq!(encode(b"fo"), "MZXQ");
        assert_eq!(encode(b"foo"), "MZXW6");
        assert_eq!(encode(b"foob"), "MZXW6YQ");
        assert_eq!(encode(b"fooba"), "MZXW6YTB");
        assert_eq!(encode(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn decodes_padded_and_lowercase_input() {
        assert_eq!(decode("MZXW6YTBOI======"), Some(b"foobar".to_vec()));
        assert_eq!(decode("mzxw 6ytb"), Some(b"fooba".to_vec()));
    }

    #[test]
    fn rejects_characters_outside_alphabet() {
        assert_eq!(decode("MZXW1"), None);
    }
}
