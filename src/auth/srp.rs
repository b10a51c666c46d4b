//! SRP-6a client for the Srp and Srp256 authentication plugins
//!
//! Both plugins share the group, the multiplier and the session key
//! derivation (SHA-1 of the shared secret). They differ only in the digest
//! used for the client proof `M`.

use num_bigint::BigUint;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Size of the group modulus in bytes
const SRP_KEY_SIZE: usize = 128;

/// Size of the random private exponent in bytes
const PRIVATE_KEY_SIZE: usize = SRP_KEY_SIZE / 8;

const PRIME_HEX: &str = "E67D2E994B2F900C3F41F08F5BB2627ED0D49EE1FE767A52EFCD565CD6E768812C3E1E9CE8F0A8BEA6CB13CD29DDEBF7A96D4A93B55D488DF099A15C89DCB0640738EB2CBDD9A8F7BAB561AB1B0DC1C6CDABF303264A08D1BCA932D1F1EE428B619D970F342ABA9A65793B8B2F041AE5364350C16F735F56ECBCA87BD57B29E7";

const GENERATOR: u32 = 2;

const MULTIPLIER_DEC: &[u8] = b"1277432915985975349439481660349303019122249719989";

/// Digest used for the client proof
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpDigest {
    /// Legacy `Srp` plugin
    Sha1,
    /// `Srp256` plugin
    Sha256,
}

impl SrpDigest {
    /// Plugin name as sent on the wire
    pub fn plugin_name(&self) -> &'static str {
        match self {
            SrpDigest::Sha1 => "Srp",
            SrpDigest::Sha256 => "Srp256",
        }
    }

    /// Resolve a plugin name announced by the server
    pub fn from_plugin_name(name: &str) -> Option<Self> {
        match name {
            "Srp" => Some(SrpDigest::Sha1),
            "Srp256" => Some(SrpDigest::Sha256),
            _ => None,
        }
    }

    fn hash(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            SrpDigest::Sha1 => {
                let mut h = Sha1::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
            SrpDigest::Sha256 => {
                let mut h = Sha256::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
        }
    }
}

struct Group {
    n: BigUint,
    g: BigUint,
    k: BigUint,
}

fn group() -> Group {
    // Both literals are compile-time constants that always parse
    let n = BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16).unwrap_or_default();
    let k = BigUint::parse_bytes(MULTIPLIER_DEC, 10).unwrap_or_default();
    Group {
        n,
        g: BigUint::from(GENERATOR),
        k,
    }
}

/// One client-side SRP exchange
///
/// A fresh private key is drawn per instance; the public key is sent with
/// the connect or attach request and the proof is computed once the server
/// returns its salt and public key.
pub struct SrpClient {
    digest: SrpDigest,
    group: Group,
    private_key: BigUint,
    public_key: BigUint,
    session_key: Option<Vec<u8>>,
}

impl SrpClient {
    /// Create a client with a random private key
    pub fn new(digest: SrpDigest) -> Self {
        use rand::RngCore;
        let mut secret = [0u8; PRIVATE_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_private_key(digest, &secret)
    }

    /// Create a client with a fixed private key
    pub fn with_private_key(digest: SrpDigest, private_key: &[u8]) -> Self {
        let group = group();
        let private_key = BigUint::from_bytes_be(private_key);
        let public_key = group.g.modpow(&private_key, &group.n);
        Self {
            digest,
            group,
            private_key,
            public_key,
            session_key: None,
        }
    }

    /// Which proof digest this client uses
    pub fn digest(&self) -> SrpDigest {
        self.digest
    }

    /// Public key `A` as the hex text sent to the server
    pub fn public_key_hex(&self) -> String {
        hex::encode_upper(pad(&self.public_key))
    }

    /// Session key `K`, available after [`SrpClient::client_proof`]
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    /// Compute the proof `M` from the server's auth data
    ///
    /// The data is `[salt_len u16 LE][salt][u16][hex B]`.
    pub fn client_proof(&mut self, user: &str, password: &str, server_data: &[u8]) -> Result<Vec<u8>> {
        let (salt, server_key) = parse_server_data(server_data)?;
        Ok(self.client_proof_with(user, password, salt, &server_key))
    }

    fn client_proof_with(
        &mut self,
        user: &str,
        password: &str,
        salt: &[u8],
        server_key: &BigUint,
    ) -> Vec<u8> {
        let key = self.client_session_key(user, password, salt, server_key);

        let n = &self.group.n;
        let n1 = BigUint::from_bytes_be(&sha1(&[&to_bytes(n)]));
        let n2 = BigUint::from_bytes_be(&sha1(&[&to_bytes(&self.group.g)]));
        let n1 = n1.modpow(&n2, n);
        let n2 = BigUint::from_bytes_be(&sha1(&[user.as_bytes()]));

        let proof = self.digest.hash(&[
            &to_bytes(&n1),
            &to_bytes(&n2),
            salt,
            &to_bytes(&self.public_key),
            &to_bytes(server_key),
            &key,
        ]);

        self.session_key = Some(key);
        proof
    }

    fn client_session_key(
        &self,
        user: &str,
        password: &str,
        salt: &[u8],
        server_key: &BigUint,
    ) -> Vec<u8> {
        let Group { n, g, k } = &self.group;
        let u = scramble(&self.public_key, server_key);
        let x = user_hash(user, password, salt);
        let kgx = (k * g.modpow(&x, n)) % n;

        let diff = if *server_key >= kgx {
            (server_key - &kgx) % n
        } else {
            (server_key + n - &kgx) % n
        };
        let ux = (&u * &x) % n;
        let aux = (&self.private_key + ux) % n;
        let secret = diff.modpow(&aux, n);
        sha1(&[&to_bytes(&secret)])
    }
}

impl std::fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpClient")
            .field("digest", &self.digest)
            .field("has_session_key", &self.session_key.is_some())
            .finish()
    }
}

/// Split server auth data into salt and public key `B`
fn parse_server_data(data: &[u8]) -> Result<(&[u8], BigUint)> {
    if data.len() < 2 {
        return Err(Error::AuthenticationFailed(
            "server auth data too short".to_string(),
        ));
    }
    let salt_len = data[0] as usize + data[1] as usize * 256;
    let key_start = salt_len + 4;
    if data.len() < key_start {
        return Err(Error::AuthenticationFailed(format!(
            "server auth data of {} bytes cannot hold a {}-byte salt",
            data.len(),
            salt_len
        )));
    }
    let salt = &data[2..2 + salt_len];
    let key = BigUint::parse_bytes(&data[key_start..], 16).ok_or_else(|| {
        Error::AuthenticationFailed("server public key is not hex".to_string())
    })?;
    Ok((salt, key))
}

/// Normalize a login the way the server stores user names
///
/// Unquoted names are uppercased. Quoted names keep their case, lose the
/// surrounding quotes and have `""` collapsed to `"`; an unescaped quote
/// inside ends the name.
pub fn normalize_login(login: &str) -> String {
    let chars: Vec<char> = login.chars().collect();
    if chars.len() > 2 && chars[0] == '"' && chars[chars.len() - 1] == '"' {
        let inner = &chars[1..chars.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut i = 0;
        while i < inner.len() {
            if inner[i] == '"' {
                if inner.get(i + 1) == Some(&'"') {
                    out.push('"');
                    i += 2;
                    continue;
                }
                return out;
            }
            out.push(inner[i]);
            i += 1;
        }
        return out;
    }
    login.to_uppercase()
}

fn sha1(parts: &[&[u8]]) -> Vec<u8> {
    SrpDigest::Sha1.hash(parts)
}

fn user_hash(user: &str, password: &str, salt: &[u8]) -> BigUint {
    let inner = sha1(&[user.as_bytes(), b":", password.as_bytes()]);
    BigUint::from_bytes_be(&sha1(&[salt, &inner]))
}

fn scramble(a: &BigUint, b: &BigUint) -> BigUint {
    BigUint::from_bytes_be(&sha1(&[&pad(a), &pad(b)]))
}

/// Big-endian bytes without leading zeros
fn to_bytes(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    if bytes == [0] {
        Vec::new()
    } else {
        bytes
    }
}

/// Keep at most the low `SRP_KEY_SIZE` bytes
fn pad(n: &BigUint) -> Vec<u8> {
    let bytes = to_bytes(n);
    let skip = bytes.len().saturating_sub(SRP_KEY_SIZE);
    bytes[skip..].to_vec()
}
