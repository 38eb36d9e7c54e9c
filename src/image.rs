//! Memory image loader
//!
//! The input is a UTF-8 text stream of whitespace-separated tokens.
//! A token of the form `@HHHH...` (hex, no 0x prefix) sets the
//! current load address; any other token must be a two-hex-digit
//! byte, which is placed at the current address before it advances
//! by one. Bytes addressed outside the memory window are dropped by
//! the sink. Malformed tokens are fatal.

use std::fs;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("could not read image file {path}: {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid address directive '@{0}'")]
    InvalidAddress(String),
    #[error("invalid byte token '{0}'")]
    InvalidByte(String),
}

/// Destination of loaded image bytes
///
/// Implemented by the platform; also handy for assembling test
/// programs byte by byte.
pub trait ImageSink {
    /// Accept one byte at the given physical address. Addresses
    /// outside the implementor's memory window are silently dropped.
    fn load_byte(&mut self, addr: u32, value: u8);
}

/// Parse image text and feed the bytes into the sink
pub fn parse_image<S: ImageSink>(
    sink: &mut S,
    text: &str,
) -> Result<(), ImageError> {
    let mut addr: u32 = 0;
    for token in text.split_whitespace() {
        if let Some(hex) = token.strip_prefix('@') {
            addr = u32::from_str_radix(hex, 16)
                .map_err(|_| ImageError::InvalidAddress(hex.to_string()))?;
        } else {
            if token.len() > 2 {
                return Err(ImageError::InvalidByte(token.to_string()));
            }
            let byte = u8::from_str_radix(token, 16)
                .map_err(|_| ImageError::InvalidByte(token.to_string()))?;
            sink.load_byte(addr, byte);
            addr = addr.wrapping_add(1);
        }
    }
    Ok(())
}

/// Read an image file and feed it into the sink
pub fn load_image<S: ImageSink>(
    sink: &mut S,
    path: &str,
) -> Result<(), ImageError> {
    let text = fs::read_to_string(path).map_err(|source| {
        ImageError::ReadFailed {
            path: path.to_string(),
            source,
        }
    })?;
    parse_image(sink, &text)
}

#[cfg(test)]
mod tests {

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        bytes: Vec<(u32, u8)>,
    }

    impl ImageSink for RecordingSink {
        fn load_byte(&mut self, addr: u32, value: u8) {
            self.bytes.push((addr, value));
        }
    }

    #[test]
    fn check_bytes_fill_sequentially() {
        let mut sink = RecordingSink::default();
        parse_image(&mut sink, "@80000000 13 05 50 00").unwrap();
        assert_eq!(
            sink.bytes,
            vec![
                (0x8000_0000, 0x13),
                (0x8000_0001, 0x05),
                (0x8000_0002, 0x50),
                (0x8000_0003, 0x00),
            ]
        );
    }

    #[test]
    fn check_address_directive_resets_cursor() {
        let mut sink = RecordingSink::default();
        parse_image(&mut sink, "@80000000 aa\n@80000100\nbb cc").unwrap();
        assert_eq!(
            sink.bytes,
            vec![
                (0x8000_0000, 0xaa),
                (0x8000_0100, 0xbb),
                (0x8000_0101, 0xcc),
            ]
        );
    }

    #[test]
    fn check_blank_lines_and_whitespace_ignored() {
        let mut sink = RecordingSink::default();
        parse_image(&mut sink, "\n\n  @80000000   \n\n 12  \n").unwrap();
        assert_eq!(sink.bytes, vec![(0x8000_0000, 0x12)]);
    }

    #[test]
    fn check_malformed_byte_is_fatal() {
        let mut sink = RecordingSink::default();
        let result = parse_image(&mut sink, "@80000000 zz");
        assert!(matches!(result, Err(ImageError::InvalidByte(_))));

        let result = parse_image(&mut sink, "@80000000 123");
        assert!(matches!(result, Err(ImageError::InvalidByte(_))));
    }

    #[test]
    fn check_malformed_address_is_fatal() {
        let mut sink = RecordingSink::default();
        let result = parse_image(&mut sink, "@80zz0000 12");
        assert!(matches!(result, Err(ImageError::InvalidAddress(_))));
    }
}
