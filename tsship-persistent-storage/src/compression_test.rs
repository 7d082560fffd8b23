#[cfg(test)]
mod tests {
    use crate::compression::{
        compress, decompress, ensure_compressed, ensure_decompressed, is_compressed,
    };

    #[test]
    fn test_magic_sniff() {
        let raw = br#"[{"metric":"a","timestamp":1,"value":1,"tags":{}}]"#.to_vec();
        assert!(!is_compressed(&raw));
        assert!(!is_compressed(&[]));
        assert!(!is_compressed(&[0x1f]));

        let gz = compress(&raw).unwrap();
        assert!(is_compressed(&gz));
        assert_eq!(decompress(&gz).unwrap(), raw);
    }

    /// Test: ensure_* helpers are idempotent
    ///
    /// Expected
    /// - Compressing twice never double-wraps; decompressing raw bytes is a pass-through
    #[test]
    fn test_ensure_helpers_idempotent() {
        let raw = b"[1,2,3]".to_vec();
        let once = ensure_compressed(raw.clone()).unwrap();
        let twice = ensure_compressed(once.clone()).unwrap();
        assert_eq!(once, twice);

        assert_eq!(ensure_decompressed(twice).unwrap(), raw);
        assert_eq!(ensure_decompressed(raw.clone()).unwrap(), raw);
    }
}
