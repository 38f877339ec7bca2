//! SRP-6a implementation for HomeKit pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512, username
//! `Pair-Setup` and the accessory setup code (with dashes) as password.

use homekit_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// SRP username used by every HomeKit accessory.
pub const USERNAME: &[u8] = b"Pair-Setup";

/// Salt length sent by accessories in M2.
pub const SALT_LEN: usize = 16;

/// Private exponent size in bits.
const PRIVATE_KEY_BITS: u64 = 256;

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// N decoded at compile time.
const N_3072: [u8; N_BYTES] = decode_hex(RFC5054_N_3072.as_bytes());

const fn decode_hex<const L: usize>(hex: &[u8]) -> [u8; L] {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'A'..=b'F' => c - b'A' + 10,
            b'a'..=b'f' => c - b'a' + 10,
            _ => panic!("invalid hex digit in SRP prime"),
        }
    }

    assert!(hex.len() == L * 2);
    let mut out = [0u8; L];
    let mut i = 0;
    while i < L {
        out[i] = (nibble(hex[2 * i]) << 4) | nibble(hex[2 * i + 1]);
        i += 1;
    }
    out
}

/// SRP-6a parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        Self {
            n: BigUint::from_bytes_be(&N_3072),
            g: BigUint::from(5u32),
        }
    }
}

/// Check that a setup code has the canonical `NNN-NN-NNN` shape.
pub fn validate_setup_code(code: &str) -> Result<(), CryptoError> {
    let bytes = code.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, &c)| match i {
            3 | 6 => c == b'-',
            _ => c.is_ascii_digit(),
        });

    if well_formed {
        Ok(())
    } else {
        Err(CryptoError::InvalidSetupCode(
            "setup code must have the form NNN-NN-NNN".to_string(),
        ))
    }
}

/// Values derived once the accessory's salt and B are known.
#[derive(Zeroize, ZeroizeOnDrop)]
struct ClientSession {
    session_key: Vec<u8>,
    client_proof: Vec<u8>,
    expected_server_proof: Vec<u8>,
}

/// Client side of one pair-setup SRP exchange.
///
/// Secrets (password, private exponent, session key, proofs) are wiped
/// when the client is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
    session: Option<ClientSession>,
}

impl SrpClient {
    /// Start an exchange for `setup_code`, drawing the private value from the OS RNG.
    pub fn start(setup_code: &str) -> Result<Self, CryptoError> {
        Self::start_with_rng(setup_code, &mut OsRng)
    }

    /// Start an exchange with an explicit randomness source.
    pub fn start_with_rng<R: RngCore + CryptoRng>(
        setup_code: &str,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        validate_setup_code(setup_code)?;
        let a = rng.gen_biguint(PRIVATE_KEY_BITS);
        Ok(Self::from_parts(setup_code.as_bytes(), a))
    }

    /// Create SRP client with a specific private key (for testing).
    #[cfg(test)]
    pub fn with_private_key(password: &[u8], private_key: &[u8]) -> Self {
        Self::from_parts(password, BigUint::from_bytes_be(private_key))
    }

    fn from_parts(password: &[u8], a: BigUint) -> Self {
        let params = SrpParams::default();
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            password: password.to_vec(),
            private_key: a.to_bytes_be(),
            public_key,
            session: None,
        }
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Derive the session key K from the accessory's salt and public value B.
    pub fn compute_session_key(
        &mut self,
        salt: &[u8],
        server_public_key: &[u8],
    ) -> Result<&[u8], CryptoError> {
        let b = BigUint::from_bytes_be(server_public_key);

        // B mod N == 0 would force S to a known value
        if &b % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("B mod N = 0"));
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        // u = H(PAD(A) || PAD(B))
        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("u = 0"));
        }

        // x = H(salt || H(I || ":" || P))
        let x = compute_x(salt, USERNAME, &self.password);
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };
        let exponent = &a + &u * &x;
        let s = base.modpow(&exponent, &self.params.n);

        let session_key = hash_secret(&s);
        let client_proof = compute_m1(
            &self.params,
            USERNAME,
            salt,
            &self.public_key,
            &b,
            &session_key,
        );
        let expected_server_proof = compute_m2(&self.public_key, &client_proof, &session_key);

        let session = self.session.insert(ClientSession {
            session_key,
            client_proof,
            expected_server_proof,
        });
        Ok(&session.session_key)
    }

    /// Session key K, once [`compute_session_key`](Self::compute_session_key) succeeded.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session.as_ref().map(|s| s.session_key.as_slice())
    }

    /// Client proof M1.
    pub fn client_proof(&self) -> Result<&[u8], CryptoError> {
        self.session
            .as_ref()
            .map(|s| s.client_proof.as_slice())
            .ok_or_else(|| CryptoError::KeyDerivation("session key not computed".to_string()))
    }

    /// Check the accessory's proof M2 in constant time.
    pub fn verify_server_proof(&self, proof: &[u8]) -> Result<(), CryptoError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CryptoError::KeyDerivation("session key not computed".to_string()))?;

        if bool::from(proof.ct_eq(&session.expected_server_proof)) {
            Ok(())
        } else {
            Err(CryptoError::ProofMismatch)
        }
    }
}

/// Verifier side of the exchange, as run by an accessory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpServer {
    #[zeroize(skip)]
    params: SrpParams,
    salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    verifier: BigUint,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
    session_key: Option<Vec<u8>>,
}

impl SrpServer {
    /// Create a verifier for `setup_code` with a random salt and private value.
    pub fn new(setup_code: &str) -> Result<Self, CryptoError> {
        Self::with_rng(setup_code, &mut OsRng)
    }

    pub fn with_rng<R: RngCore + CryptoRng>(
        setup_code: &str,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        validate_setup_code(setup_code)?;
        let params = SrpParams::default();

        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt);

        // v = g^x mod N
        let x = compute_x(&salt, USERNAME, setup_code.as_bytes());
        let verifier = params.g.modpow(&x, &params.n);

        // B = (k*v + g^b) mod N
        let b = rng.gen_biguint(PRIVATE_KEY_BITS);
        let k = compute_k(&params);
        let g_b = params.g.modpow(&b, &params.n);
        let public_key = ((&k * &verifier) + g_b) % &params.n;

        Ok(Self {
            params,
            salt,
            verifier,
            private_key: b.to_bytes_be(),
            public_key,
            session_key: None,
        })
    }

    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }

    /// Server public value B, padded to N.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Check the client's M1 and return the server proof M2.
    pub fn verify_client(
        &mut self,
        client_public_key: &[u8],
        client_proof: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let a = BigUint::from_bytes_be(client_public_key);
        if &a % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("A mod N = 0"));
        }

        let u = compute_u(&a, &self.public_key);

        // S = (A * v^u)^b mod N
        let v_u = self.verifier.modpow(&u, &self.params.n);
        let base = (&a * &v_u) % &self.params.n;
        let s = base.modpow(&BigUint::from_bytes_be(&self.private_key), &self.params.n);

        let session_key = hash_secret(&s);
        let expected = compute_m1(
            &self.params,
            USERNAME,
            &self.salt,
            &a,
            &self.public_key,
            &session_key,
        );

        if !bool::from(client_proof.ct_eq(&expected)) {
            return Err(CryptoError::ProofMismatch);
        }

        let server_proof = compute_m2(&a, client_proof, &session_key);
        self.session_key = Some(session_key);
        Ok(server_proof)
    }

    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));

    // H(g) is over the raw generator byte, unlike k which pads g
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Compute M2 = H(PAD(A) || M1 || K)
fn compute_m2(a: &BigUint, client_proof: &[u8], session_key: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(client_proof);
    hasher.update(session_key);
    hasher.finalize().to_vec()
}

/// K = H(PAD(S))
fn hash_secret(s: &BigUint) -> Vec<u8> {
    let mut s_padded = pad_to_n(s);
    let key = Sha512::digest(&s_padded).to_vec();
    s_padded.zeroize();
    key
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
