//! crates/podcast_core/src/aggregator.rs
//!
//! Concatenation of ordered audio chunks into one contiguous buffer.

use bytes::{Bytes, BytesMut};

/// Joins `chunks` in iteration order. The result length is the sum of the inputs.
pub fn concat_chunks<I, B>(chunks: I) -> Bytes
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for chunk in chunks {
        out.extend_from_slice(chunk.as_ref());
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order_and_length() {
        let chunks = vec![
            Bytes::from_static(&[0x01, 0x02]),
            Bytes::new(),
            Bytes::from_static(&[0x03]),
            Bytes::from_static(&[0x04, 0x05, 0x06]),
        ];
        let joined = concat_chunks(&chunks);
        assert_eq!(joined.as_ref(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(joined.len(), chunks.iter().map(Bytes::len).sum::<usize>());
    }

    #[test]
    fn empty_input_yields_empty_buffer() {
        assert!(concat_chunks(Vec::<Bytes>::new()).is_empty());
    }
}
