use std::fmt::Write;

/// Formats bytes as space-separated upper-case hex pairs, `"48 65 79"`.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

#[cfg(test)]
mod test {
    use super::hex_dump;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(b""), "");
        assert_eq!(hex_dump(&[0x48, 0x65, 0x0A, 0xFF]), "48 65 0A FF");
    }
}
