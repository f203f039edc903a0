//! Encryption schemes supported by Discord's secure RTP negotiation.
use super::connection::error::{Error, Result};
use byteorder::{NetworkEndian, WriteBytesExt};
use crypto_secretbox::{
    AeadInPlace,
    Error as CryptoError,
    KeyInit,
    Nonce,
    SecretBox,
    Tag,
    XSalsa20Poly1305 as Cipher,
};
use rand::RngCore;

use crate::constants::RTP_HEADER_LEN;

/// Size of the authentication tag placed before each sealed payload.
pub const TAG_SIZE: usize = SecretBox::<()>::TAG_SIZE;
/// Size of the full nonce used by XSalsa20Poly1305.
pub const NONCE_SIZE: usize = SecretBox::<()>::NONCE_SIZE;
/// Size of a secret key handed out in `SessionDescription`.
pub const KEY_SIZE: usize = SecretBox::<()>::KEY_SIZE;

/// Number of nonce bytes transmitted after the payload in lite mode.
const LITE_NONCE_SIZE: usize = 4;

/// Variants of the XSalsa20Poly1305 encryption scheme.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoMode {
    /// The RTP header is used as the source of nonce bytes for the packet.
    ///
    /// No extra bytes are transmitted: the receiver rebuilds the nonce from the header.
    Normal,
    /// An additional random 24B suffix is used as the source of nonce bytes for the packet.
    /// This is regenerated randomly for each packet.
    ///
    /// Full nonce width of 24B (192b), at an extra 24B per packet (~1.2 kB/s).
    Suffix,
    /// An incrementing 32-bit counter is written (big-endian) into the first 4B of
    /// an otherwise zeroed nonce. Only these 4B are transmitted.
    ///
    /// Nonce width of 4B (32b), at an extra 4B per packet (~0.2 kB/s).
    Lite,
}

impl CryptoMode {
    /// Supported modes, most preferred first.
    pub const PRIORITY: [CryptoMode; 3] = [CryptoMode::Lite, CryptoMode::Suffix, CryptoMode::Normal];

    /// Returns the name of a mode as it will appear during negotiation.
    #[must_use]
    pub fn to_request_str(self) -> &'static str {
        use CryptoMode::*;
        match self {
            Normal => "xsalsa20_poly1305",
            Suffix => "xsalsa20_poly1305_suffix",
            Lite => "xsalsa20_poly1305_lite",
        }
    }

    /// Parses a mode from its negotiation name.
    #[must_use]
    pub fn from_request_str(name: &str) -> Option<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|mode| mode.to_request_str() == name)
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall before the payload.
    #[must_use]
    pub fn payload_prefix_len(self) -> usize {
        TAG_SIZE
    }

    /// Returns the number of nonce bytes transmitted after the payload.
    #[must_use]
    pub fn payload_suffix_len(self) -> usize {
        use CryptoMode::*;
        match self {
            Normal => 0,
            Suffix => NONCE_SIZE,
            Lite => LITE_NONCE_SIZE,
        }
    }

    /// Calculates the number of additional bytes required compared
    /// to an unencrypted payload.
    #[must_use]
    pub fn payload_overhead(self) -> usize {
        self.payload_prefix_len() + self.payload_suffix_len()
    }

    /// Builds the nonce for the next outbound packet.
    ///
    /// `counter` is only read in lite mode, and must already have been advanced
    /// by the caller. The bytes to transmit after the payload are always
    /// `&nonce[..self.payload_suffix_len()]`.
    #[must_use]
    pub fn packet_nonce(self, header: &[u8], counter: u32) -> Nonce {
        let mut nonce = Nonce::default();

        use CryptoMode::*;
        match self {
            Normal => {
                let len = header.len().min(RTP_HEADER_LEN);
                nonce[..len].copy_from_slice(&header[..len]);
            },
            Suffix => nonce.copy_from_slice(&random_nonce(NONCE_SIZE)),
            Lite => (&mut nonce[..LITE_NONCE_SIZE])
                .write_u32::<NetworkEndian>(counter)
                .expect("FATAL: Nonce size is guaranteed to be sufficient to write u32 for lite tagging."),
        }

        nonce
    }

    /// Recovers the nonce used for a received packet, splitting the sealed body
    /// away from any trailing nonce bytes.
    fn received_nonce<'a>(self, packet: &'a [u8]) -> Option<(Nonce, &'a [u8])> {
        if packet.len() < RTP_HEADER_LEN + self.payload_overhead() {
            return None;
        }

        let (header, rest) = packet.split_at(RTP_HEADER_LEN);
        let (sealed, suffix) = rest.split_at(rest.len() - self.payload_suffix_len());

        let mut nonce = Nonce::default();
        match self {
            CryptoMode::Normal => nonce[..RTP_HEADER_LEN].copy_from_slice(header),
            _ => nonce[..suffix.len()].copy_from_slice(suffix),
        }

        Some((nonce, sealed))
    }

    /// Seals `payload` behind `header`, returning the complete datagram:
    /// header, tag, ciphertext and any transmitted nonce bytes.
    pub fn encrypt_packet(
        self,
        header: &[u8],
        payload: &[u8],
        counter: u32,
        cipher: &Cipher,
    ) -> std::result::Result<Vec<u8>, CryptoError> {
        let nonce = self.packet_nonce(header, counter);
        let sealed = seal(payload, &nonce, cipher)?;

        let mut packet = Vec::with_capacity(header.len() + sealed.len() + self.payload_suffix_len());
        packet.extend_from_slice(header);
        packet.extend_from_slice(&sealed);
        packet.extend_from_slice(&nonce[..self.payload_suffix_len()]);

        Ok(packet)
    }

    /// Opens a complete datagram produced with this mode, returning its plaintext payload.
    #[must_use]
    pub fn decrypt_packet(self, packet: &[u8], cipher: &Cipher) -> Option<Vec<u8>> {
        let (nonce, sealed) = self.received_nonce(packet)?;
        open(sealed, &nonce, cipher)
    }
}

/// Picks the first mode of [`CryptoMode::PRIORITY`] which the server offered.
///
/// Fails with [`Error::CryptoModeUnavailable`] if the lists share no mode.
///
/// [`CryptoMode::PRIORITY`]: CryptoMode::PRIORITY
pub fn choose_mode<S: AsRef<str>>(offered: &[S]) -> Result<CryptoMode> {
    CryptoMode::PRIORITY
        .into_iter()
        .find(|mode| offered.iter().any(|s| s.as_ref() == mode.to_request_str()))
        .ok_or(Error::CryptoModeUnavailable)
}

/// Builds a cipher from the secret key sent in `SessionDescription`.
pub fn cipher_from_key(key: &[u8]) -> Result<Cipher> {
    Cipher::new_from_slice(key).map_err(Error::from)
}

/// Encrypts `plaintext`, returning the tag followed by the ciphertext.
pub fn seal(
    plaintext: &[u8],
    nonce: &Nonce,
    cipher: &Cipher,
) -> std::result::Result<Vec<u8>, CryptoError> {
    let mut out = vec![0u8; TAG_SIZE + plaintext.len()];
    let (tag_bytes, body) = out.split_at_mut(TAG_SIZE);
    body.copy_from_slice(plaintext);

    let tag = cipher.encrypt_in_place_detached(nonce, b"", body)?;
    tag_bytes.copy_from_slice(&tag[..]);

    Ok(out)
}

/// Decrypts the output of [`seal`], or returns `None` if it is truncated or forged.
#[must_use]
pub fn open(sealed: &[u8], nonce: &Nonce, cipher: &Cipher) -> Option<Vec<u8>> {
    if sealed.len() < TAG_SIZE {
        return None;
    }

    let (tag_bytes, body) = sealed.split_at(TAG_SIZE);
    let mut body = body.to_vec();

    cipher
        .decrypt_in_place_detached(nonce, b"", &mut body, Tag::from_slice(tag_bytes))
        .ok()
        .map(|()| body)
}

/// Generates `size` bytes of nonce material from the thread-local CSPRNG.
#[must_use]
pub fn random_nonce(size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: [u8; RTP_HEADER_LEN] = [0x80, 0x78, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3];

    fn cipher(byte: u8) -> Cipher {
        Cipher::new_from_slice(&[byte; KEY_SIZE]).unwrap()
    }

    #[test]
    fn mode_selection_prefers_lite_in_any_order() {
        let names = ["xsalsa20_poly1305", "xsalsa20_poly1305_suffix", "xsalsa20_poly1305_lite"];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for order in orders {
            let offered: Vec<&str> = order.iter().map(|i| names[*i]).collect();
            assert_eq!(choose_mode(offered.as_slice()).unwrap(), CryptoMode::Lite);
        }

        assert_eq!(
            choose_mode(&["aead_aes256_gcm", "xsalsa20_poly1305"]).unwrap(),
            CryptoMode::Normal
        );
        assert_eq!(
            choose_mode(&["xsalsa20_poly1305", "xsalsa20_poly1305_suffix"]).unwrap(),
            CryptoMode::Suffix
        );
    }

    #[test]
    fn mode_selection_fails_without_overlap() {
        assert!(matches!(
            choose_mode(&["aead_aes256_gcm_rtpsize"]),
            Err(Error::CryptoModeUnavailable)
        ));
        assert!(matches!(
            choose_mode::<&str>(&[]),
            Err(Error::CryptoModeUnavailable)
        ));
    }

    #[test]
    fn seal_open_symmetric() {
        let cipher = cipher(7);
        let nonce = Nonce::clone_from_slice(&random_nonce(NONCE_SIZE));
        let payload = random_nonce(200);

        let sealed = seal(&payload, &nonce, &cipher).unwrap();
        assert_eq!(sealed.len(), payload.len() + TAG_SIZE);
        assert_eq!(open(&sealed, &nonce, &cipher).unwrap(), payload);
    }

    #[test]
    fn open_rejects_tampering() {
        let cipher = cipher(1);
        let nonce = Nonce::default();
        let mut sealed = seal(&[1, 2, 3, 4], &nonce, &cipher).unwrap();
        sealed[TAG_SIZE] ^= 0xff;

        assert!(open(&sealed, &nonce, &cipher).is_none());
        assert!(open(&sealed[..TAG_SIZE - 1], &nonce, &cipher).is_none());
    }

    #[test]
    fn small_packet_decrypts_none() {
        let cipher = cipher(1);

        for mode in CryptoMode::PRIORITY {
            // AIM: should error, and not panic.
            assert!(mode.decrypt_packet(&HEADER, &cipher).is_none());
        }
    }

    #[test]
    fn packet_round_trip_all_modes() {
        let cipher = cipher(9);
        let payload = [0xf8, 0xff, 0xfe, 1, 2, 3];

        for mode in CryptoMode::PRIORITY {
            let packet = mode.encrypt_packet(&HEADER, &payload, 77, &cipher).unwrap();
            assert_eq!(
                packet.len(),
                RTP_HEADER_LEN + payload.len() + mode.payload_overhead()
            );
            assert_eq!(&packet[..RTP_HEADER_LEN], &HEADER[..]);
            assert_eq!(mode.decrypt_packet(&packet, &cipher).unwrap(), payload);
        }
    }

    #[test]
    fn lite_nonce_framing() {
        let cipher = cipher(3);
        let nonce = CryptoMode::Lite.packet_nonce(&HEADER, 0x0102_0304);

        assert_eq!(&nonce[..4], &[1, 2, 3, 4]);
        assert!(nonce[4..].iter().all(|b| *b == 0));

        let packet = CryptoMode::Lite
            .encrypt_packet(&HEADER, b"abc", 0x0102_0304, &cipher)
            .unwrap();
        assert_eq!(&packet[packet.len() - 4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn suffix_nonce_framing() {
        let cipher = cipher(3);
        let packet = CryptoMode::Suffix
            .encrypt_packet(&HEADER, b"abc", 0, &cipher)
            .unwrap();
        let suffix = &packet[packet.len() - NONCE_SIZE..];
        let sealed = &packet[RTP_HEADER_LEN..packet.len() - NONCE_SIZE];

        assert_eq!(
            open(sealed, Nonce::from_slice(suffix), &cipher).unwrap(),
            b"abc"
        );

        let other = CryptoMode::Suffix
            .encrypt_packet(&HEADER, b"abc", 0, &cipher)
            .unwrap();
        assert_ne!(&other[other.len() - NONCE_SIZE..], suffix);
    }

    #[test]
    fn normal_nonce_framing() {
        let cipher = cipher(3);
        let nonce = CryptoMode::Normal.packet_nonce(&HEADER, 99);

        assert_eq!(&nonce[..RTP_HEADER_LEN], &HEADER[..]);
        assert!(nonce[RTP_HEADER_LEN..].iter().all(|b| *b == 0));

        let packet = CryptoMode::Normal
            .encrypt_packet(&HEADER, b"abc", 99, &cipher)
            .unwrap();
        assert_eq!(packet.len(), RTP_HEADER_LEN + TAG_SIZE + 3);
        assert_eq!(
            open(&packet[RTP_HEADER_LEN..], &nonce, &cipher).unwrap(),
            b"abc"
        );
    }

    #[test]
    fn request_names_parse() {
        for mode in CryptoMode::PRIORITY {
            assert_eq!(CryptoMode::from_request_str(mode.to_request_str()), Some(mode));
        }
        assert_eq!(CryptoMode::from_request_str("plain"), None);
    }
}
