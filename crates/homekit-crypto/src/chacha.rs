//! ChaCha20-Poly1305 AEAD for pairing sub-messages and the session channel.

use homekit_core::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::ZeroizeOnDrop;

/// Largest plaintext carried by a single session frame.
pub const MAX_FRAME_PLAINTEXT: usize = 1024;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Length prefix size of a session frame.
pub const FRAME_HEADER_LEN: usize = 2;

/// Session cipher with one nonce counter per direction.
///
/// Frames are `[u16 LE length][ciphertext][16-byte tag]`, the length bytes
/// serving as AAD. Nonces are four zero bytes followed by the counter in
/// little-endian.
#[derive(ZeroizeOnDrop)]
pub struct ControlCipher {
    write_key: [u8; 32],
    read_key: [u8; 32],
    #[zeroize(skip)]
    write_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    read_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    encrypt_counter: u64,
    #[zeroize(skip)]
    decrypt_counter: u64,
}

impl ControlCipher {
    /// Create cipher with separate write/read keys.
    pub fn new(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        Self {
            write_cipher: ChaCha20Poly1305::new(&write_key.into()),
            read_cipher: ChaCha20Poly1305::new(&read_key.into()),
            write_key,
            read_key,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    /// Encrypt a payload into one or more frames.
    ///
    /// An empty payload still produces a single zero-length frame.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let frames = plaintext.len().div_ceil(MAX_FRAME_PLAINTEXT).max(1);
        let mut out = Vec::with_capacity(plaintext.len() + frames * (FRAME_HEADER_LEN + TAG_LEN));

        if plaintext.is_empty() {
            self.encrypt_frame_into(&[], &mut out)?;
            return Ok(out);
        }

        for block in plaintext.chunks(MAX_FRAME_PLAINTEXT) {
            self.encrypt_frame_into(block, &mut out)?;
        }
        Ok(out)
    }

    fn encrypt_frame_into(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        if self.encrypt_counter == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }

        let aad = (block.len() as u16).to_le_bytes();
        let nonce = build_nonce_from_counter(self.encrypt_counter);
        let ciphertext_with_tag = self
            .write_cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: block, aad: &aad })
            .map_err(|e| CryptoError::Encryption(format!("frame encryption failed: {}", e)))?;

        out.extend_from_slice(&aad);
        out.extend_from_slice(&ciphertext_with_tag);
        self.encrypt_counter += 1;
        Ok(())
    }

    /// Decrypt a single frame body (ciphertext plus tag) announced with `block_len`.
    pub fn decrypt_block(
        &mut self,
        ciphertext_with_tag: &[u8],
        block_len: u16,
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_with_tag.len() != block_len as usize + TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "frame body is {} bytes, header announced {}",
                ciphertext_with_tag.len(),
                block_len as usize + TAG_LEN
            )));
        }
        if self.decrypt_counter == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }

        let aad = block_len.to_le_bytes();
        let nonce = build_nonce_from_counter(self.decrypt_counter);
        let plaintext = self
            .read_cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext_with_tag,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::AuthTagMismatch)?;

        self.decrypt_counter += 1;
        Ok(plaintext)
    }

    /// Decrypt a buffer holding zero or more complete frames.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::with_capacity(data.len());
        let mut offset = 0;

        while offset < data.len() {
            if offset + FRAME_HEADER_LEN > data.len() {
                return Err(CryptoError::Decryption(
                    "incomplete frame length prefix".to_string(),
                ));
            }

            let block_len = u16::from_le_bytes([data[offset], data[offset + 1]]);
            offset += FRAME_HEADER_LEN;

            let block_end = offset + block_len as usize + TAG_LEN;
            if block_end > data.len() {
                return Err(CryptoError::Decryption("incomplete frame body".to_string()));
            }

            let plaintext = self.decrypt_block(&data[offset..block_end], block_len)?;
            out.extend_from_slice(&plaintext);
            offset = block_end;
        }

        Ok(out)
    }

    /// Get current encryption nonce counter.
    pub fn encrypt_counter(&self) -> u64 {
        self.encrypt_counter
    }

    /// Get current decryption nonce counter.
    pub fn decrypt_counter(&self) -> u64 {
        self.decrypt_counter
    }

    #[cfg(test)]
    fn set_counters(&mut self, encrypt: u64, decrypt: u64) {
        self.encrypt_counter = encrypt;
        self.decrypt_counter = decrypt;
    }
}

/// Number of bytes following a frame header: ciphertext plus tag.
pub fn frame_length(header: [u8; 2]) -> usize {
    u16::from_le_bytes(header) as usize + TAG_LEN
}

fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt with explicit 12-byte nonce (pairing sub-TLVs).
///
/// Returns ciphertext with 16-byte auth tag appended.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(key.into())
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("encryption failed: {}", e)))
}

/// Decrypt with explicit 12-byte nonce (pairing sub-TLVs).
///
/// Expects ciphertext with 16-byte auth tag appended.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "ciphertext too short (missing tag)".to_string(),
        ));
    }

    ChaCha20Poly1305::new(key.into())
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Right-align an ASCII label in a 12-byte nonce.
///
/// `b"PV-Msg02"` becomes `\x00\x00\x00\x00PV-Msg02`.
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ControlCipher, ControlCipher) {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        (ControlCipher::new(a, b), ControlCipher::new(b, a))
    }

    fn frame_count(mut data: &[u8]) -> usize {
        let mut count = 0;
        while !data.is_empty() {
            let body = frame_length([data[0], data[1]]);
            data = &data[FRAME_HEADER_LEN + body..];
            count += 1;
        }
        count
    }

    mod framing {
        use super::*;

        #[test]
        fn payload_sizes_roundtrip_with_expected_frame_counts() {
            for (size, frames) in [(0, 1), (1, 1), (1024, 1), (1025, 2), (10000, 10)] {
                let (mut controller, mut accessory) = pair();
                let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

                let wire = controller.encrypt(&payload).unwrap();
                assert_eq!(frame_count(&wire), frames, "size {}", size);
                assert_eq!(wire.len(), size + frames * (FRAME_HEADER_LEN + TAG_LEN));
                assert_eq!(controller.encrypt_counter(), frames as u64);

                assert_eq!(accessory.decrypt(&wire).unwrap(), payload);
                assert_eq!(accessory.decrypt_counter(), frames as u64);
            }
        }

        #[test]
        fn empty_payload_is_one_zero_length_frame() {
            let (mut controller, _) = pair();
            let wire = controller.encrypt(&[]).unwrap();
            assert_eq!(wire.len(), FRAME_HEADER_LEN + TAG_LEN);
            assert_eq!(&wire[..2], &[0, 0]);
        }

        #[test]
        fn header_is_little_endian_length() {
            let (mut controller, _) = pair();
            let wire = controller.encrypt(&[0xAB; 300]).unwrap();
            assert_eq!(&wire[..2], &300u16.to_le_bytes());
        }

        #[test]
        fn decrypt_of_nothing_is_nothing() {
            let (_, mut accessory) = pair();
            assert!(accessory.decrypt(&[]).unwrap().is_empty());
            assert_eq!(accessory.decrypt_counter(), 0);
        }

        #[test]
        fn truncated_frame_is_rejected() {
            let (mut controller, mut accessory) = pair();
            let wire = controller.encrypt(b"hello").unwrap();
            let result = accessory.decrypt(&wire[..wire.len() - 1]);
            assert!(matches!(result, Err(CryptoError::Decryption(_))));
        }

        #[test]
        fn frame_length_includes_tag() {
            assert_eq!(frame_length([0x25, 0x00]), 37 + TAG_LEN);
            assert_eq!(frame_length([0x00, 0x04]), 1024 + TAG_LEN);
        }
    }

    mod authentication {
        use super::*;

        #[test]
        fn any_single_bit_flip_fails() {
            let (mut controller, _) = pair();
            let wire = controller.encrypt(b"secret session data").unwrap();

            for byte in FRAME_HEADER_LEN..wire.len() {
                let mut tampered = wire.clone();
                tampered[byte] ^= 0x01;
                let (_, mut accessory) = pair();
                assert!(
                    matches!(accessory.decrypt(&tampered), Err(CryptoError::AuthTagMismatch)),
                    "flip at byte {}",
                    byte
                );
            }
        }

        #[test]
        fn wrong_key_fails() {
            let (mut controller, _) = pair();
            let wire = controller.encrypt(b"hello").unwrap();
            let mut stranger = ControlCipher::new([0x33; 32], [0x44; 32]);
            assert!(matches!(stranger.decrypt(&wire), Err(CryptoError::AuthTagMismatch)));
        }

        #[test]
        fn replayed_frame_fails_on_second_read() {
            let (mut controller, mut accessory) = pair();
            let wire = controller.encrypt(b"once").unwrap();
            accessory.decrypt(&wire).unwrap();
            assert!(accessory.decrypt(&wire).is_err());
        }
    }

    mod counters {
        use super::*;

        #[test]
        fn first_frames_use_counters_zero_then_one() {
            let key = [0x11u8; 32];
            let mut cipher = ControlCipher::new(key, [0x22; 32]);
            let first = cipher.encrypt(b"a").unwrap();
            let second = cipher.encrypt(b"a").unwrap();

            let nonce0 = build_nonce_from_counter(0);
            let nonce1 = build_nonce_from_counter(1);
            let raw = ChaCha20Poly1305::new(&key.into());
            let aad = 1u16.to_le_bytes();
            let expect0 = raw
                .encrypt(Nonce::from_slice(&nonce0), Payload { msg: b"a", aad: &aad })
                .unwrap();
            let expect1 = raw
                .encrypt(Nonce::from_slice(&nonce1), Payload { msg: b"a", aad: &aad })
                .unwrap();

            assert_eq!(&first[2..], expect0.as_slice());
            assert_eq!(&second[2..], expect1.as_slice());
        }

        #[test]
        fn exhausted_write_counter_fails() {
            let (mut controller, _) = pair();
            controller.set_counters(u64::MAX, 0);
            assert!(matches!(controller.encrypt(b"x"), Err(CryptoError::NonceExhausted)));
        }

        #[test]
        fn exhausted_read_counter_fails() {
            let (mut controller, mut accessory) = pair();
            let wire = controller.encrypt(b"x").unwrap();
            accessory.set_counters(0, u64::MAX);
            assert!(matches!(accessory.decrypt(&wire), Err(CryptoError::NonceExhausted)));
        }
    }

    mod nonce_construction {
        use super::*;

        #[test]
        fn counter_nonce_is_zero_prefix_then_le_counter() {
            let nonce = build_nonce_from_counter(0x0102030405060708);
            assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
            assert_eq!(&nonce[4..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        }

        #[test]
        fn labels_are_right_aligned() {
            assert_eq!(&nonce_from_string(b"PS-Msg05"), b"\x00\x00\x00\x00PS-Msg05");
            assert_eq!(&nonce_from_string(b"PV-Msg03"), b"\x00\x00\x00\x00PV-Msg03");
        }

        #[test]
        fn full_width_label_fills_nonce() {
            assert_eq!(&nonce_from_string(b"0123456789AB"), b"0123456789AB");
        }
    }

    mod explicit_nonce {
        use super::*;

        #[test]
        fn roundtrip() {
            let key = [0x42u8; 32];
            let nonce = nonce_from_string(b"PS-Msg05");
            let ct = encrypt_with_nonce(&key, &nonce, b"sub-tlv").unwrap();
            assert_eq!(ct.len(), 7 + TAG_LEN);
            assert_eq!(decrypt_with_nonce(&key, &nonce, &ct).unwrap(), b"sub-tlv");
        }

        #[test]
        fn wrong_nonce_is_tag_mismatch() {
            let key = [0x42u8; 32];
            let ct = encrypt_with_nonce(&key, &nonce_from_string(b"PS-Msg05"), b"x").unwrap();
            let result = decrypt_with_nonce(&key, &nonce_from_string(b"PS-Msg06"), &ct);
            assert!(matches!(result, Err(CryptoError::AuthTagMismatch)));
        }

        #[test]
        fn short_input_is_rejected() {
            let result = decrypt_with_nonce(&[0u8; 32], &[0u8; 12], &[0u8; 15]);
            assert!(matches!(result, Err(CryptoError::Decryption(_))));
        }
    }

    mod known_vectors {
        use super::*;

        #[test]
        fn rfc8439_aead_test_vector() {
            // RFC 8439 section 2.8.2
            let key: [u8; 32] =
                hex::decode("808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f")
                    .unwrap()
                    .try_into()
                    .unwrap();
            let nonce = hex::decode("070000004041424344454647").unwrap();
            let aad = hex::decode("50515253c0c1c2c3c4c5c6c7").unwrap();
            let plaintext = b"Ladies and Gentlemen of the class of '99: \
                If I could offer you only one tip for the future, sunscreen would be it.";

            let expected = hex::decode(concat!(
                "d31a8d34648e60db7b86afbc53ef7ec2a4aded51296e08fea9e2b5a736ee62d6",
                "3dbea45e8ca9671282fafb69da92728b1a71de0a9e060b2905d6a5b67ecd3b36",
                "92ddbd7f2d778b8c9803aee328091b58fab324e4fad675945585808b4831d7bc",
                "3ff4def08e4b7a9de576d26586cec64b6116",
                "1ae10b594f09e26a7e902ecbd0600691"
            ))
            .unwrap();

            let cipher = ChaCha20Poly1305::new(&key.into());
            let sealed = cipher
                .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
                .unwrap();
            assert_eq!(sealed, expected);

            let opened = cipher
                .decrypt(Nonce::from_slice(&nonce), Payload { msg: &sealed, aad: &aad })
                .unwrap();
            assert_eq!(opened, plaintext);
        }
    }
}
