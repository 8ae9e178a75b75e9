//! Queue image codec.
//!
//! The whole queue is persisted as one image after every mutation.
//!
//! ## Layout
//!
//! ```text
//! ┌───────┬─────────┬──────────┬───────────────┬──────────────┐
//! │ magic │ version │ body_len │ body (CBOR)   │ SHA-256(body)│
//! │ 4 B   │ u16 LE  │ u32 LE   │ body_len B    │ 32 B         │
//! └───────┴─────────┴──────────┴───────────────┴──────────────┘
//! ```
//!
//! The body is the CBOR encoding of the ordered operation list.

use crate::error::{CodecError, CodecResult};
use crate::operation::PendingOperation;
use sha2::{Digest, Sha256};

/// Magic bytes at the start of every queue image.
pub const IMAGE_MAGIC: [u8; 4] = *b"CSQ1";

/// Current image format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 4;
const DIGEST_LEN: usize = 32;

/// Encodes an ordered operation list into a queue image.
pub fn encode_image(operations: &[PendingOperation]) -> CodecResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(operations, &mut body)
        .map_err(|e| CodecError::Encode(e.to_string()))?;

    let body_len = u32::try_from(body.len())
        .map_err(|_| CodecError::Encode(format!("image body too large: {} bytes", body.len())))?;

    let mut image = Vec::with_capacity(HEADER_LEN + body.len() + DIGEST_LEN);
    image.extend_from_slice(&IMAGE_MAGIC);
    image.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    image.extend_from_slice(&body_len.to_le_bytes());
    image.extend_from_slice(&body);
    image.extend_from_slice(&Sha256::digest(&body));
    Ok(image)
}

/// Decodes a queue image, verifying magic, version, length and checksum.
pub fn decode_image(image: &[u8]) -> CodecResult<Vec<PendingOperation>> {
    if image.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            actual: image.len(),
        });
    }

    let magic = [image[0], image[1], image[2], image[3]];
    if magic != IMAGE_MAGIC {
        return Err(CodecError::InvalidMagic(magic));
    }

    let version = u16::from_le_bytes([image[4], image[5]]);
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let body_len = u32::from_le_bytes([image[6], image[7], image[8], image[9]]) as usize;
    let expected = HEADER_LEN + body_len + DIGEST_LEN;
    if image.len() != expected {
        return Err(CodecError::Truncated {
            expected,
            actual: image.len(),
        });
    }

    let body = &image[HEADER_LEN..HEADER_LEN + body_len];
    let digest = &image[HEADER_LEN + body_len..];
    if Sha256::digest(body).as_slice() != digest {
        return Err(CodecError::ChecksumMismatch);
    }

    ciborium::de::from_reader(body).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{FailureClass, LastError};
    use crate::id::OperationId;
    use crate::operation::{OperationKind, OperationStatus};
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Vec<PendingOperation> {
        let first = PendingOperation::new(
            OperationId::new(),
            OperationKind::PatientRegister,
            json!({"name": "Ana Ruiz", "phone": "+34 600 000 000"}),
            1_700_000_000_000,
            0,
        );
        let mut second = PendingOperation::new(
            OperationId::new(),
            OperationKind::SaleCreate,
            json!({"items": [{"sku": "A-1", "qty": 2}], "total": 19.5}),
            1_700_000_000_000,
            1,
        )
        .with_depends_on(first.id);
        second.attempt = 2;
        second.status = OperationStatus::FailedTransient;
        second.last_error = Some(LastError::new(FailureClass::Transient, "timeout", 1_700_000_000_500));
        vec![first, second]
    }

    #[test]
    fn encode_decode_preserves_order_and_fields() {
        let ops = sample();
        let image = encode_image(&ops).unwrap();
        assert_eq!(&image[..4], b"CSQ1");

        let decoded = decode_image(&image).unwrap();
        assert_eq!(decoded, ops);
    }

    #[test]
    fn empty_queue_image() {
        let image = encode_image(&[]).unwrap();
        assert!(decode_image(&image).unwrap().is_empty());
    }

    #[test]
    fn flipped_body_bit_is_detected() {
        let mut image = encode_image(&sample()).unwrap();
        image[HEADER_LEN + 3] ^= 0x01;
        assert!(matches!(
            decode_image(&image),
            Err(CodecError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_image_is_detected() {
        let image = encode_image(&sample()).unwrap();
        let result = decode_image(&image[..image.len() - 1]);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));

        assert!(matches!(
            decode_image(b"CSQ"),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn wrong_magic_and_version() {
        let mut image = encode_image(&sample()).unwrap();
        image[0] = b'X';
        assert!(matches!(decode_image(&image), Err(CodecError::InvalidMagic(_))));

        let mut image = encode_image(&sample()).unwrap();
        image[4] = 9;
        assert!(matches!(
            decode_image(&image),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    proptest! {
        #[test]
        fn decoding_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_image(&bytes);
        }
    }
}
