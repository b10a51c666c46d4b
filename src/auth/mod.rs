//! Authentication negotiation
//!
//! [`AuthNegotiator`] holds the client side of the plugin handshake:
//!
//! 1. **Start**: the connect request carries the preferred plugin name and
//!    its public data (SRP public key `A`).
//! 2. **ContinueAuth**: each time the server answers with continuation data
//!    (`op_cond_accept`, `op_accept_data` or `op_cont_auth`) the negotiator
//!    recomputes its client data for the accepted plugin and the session
//!    sends it back with `op_cont_auth`.
//! 3. **Complete**: a plain response ends the exchange. Its data, when not
//!    empty, lists the server's wire-crypt keys.
//!
//! The negotiator performs no I/O; the session drives the exchange and
//! consults it for payloads and decisions.

mod srp;

pub use srp::{normalize_login, SrpClient, SrpDigest};

use crate::config::WireCrypt;
use crate::constants::{cnct, dpb, protocol};
use crate::error::{Error, Result};
use crate::params::ParameterBuffer;

/// Name of the only wire encryption plugin supported
pub const WIRE_CRYPT_PLUGIN: &str = "Arc4";

/// Key type requested for wire encryption
pub const SESSION_KEY_TYPE: &str = "Symmetric";

/// Longest chunk of a multi-part CNCT item, leaving one byte for the part index
const MULTIPART_CHUNK: usize = 254;

/// Negotiation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// Public data offered, no server reply yet
    Start,
    /// Server asked for more client data
    ContinueAuth,
    /// Server accepted the credentials
    Complete,
}

/// Client-side state of the authentication handshake
#[derive(Debug)]
pub struct AuthNegotiator {
    user: String,
    password: String,
    wire_crypt: WireCrypt,
    plugins: Vec<SrpDigest>,
    clients: Vec<SrpClient>,
    phase: AuthPhase,
    accepted_plugin: Option<SrpDigest>,
    public_data: Vec<u8>,
    client_data: Option<Vec<u8>>,
    server_keys: Vec<u8>,
    session_key: Option<Vec<u8>>,
    wire_crypt_initialized: bool,
}

impl AuthNegotiator {
    /// Create a negotiator for a comma separated plugin list such as `"Srp256,Srp"`
    pub fn new(user: &str, password: &str, wire_crypt: WireCrypt, plugin_list: &str) -> Result<Self> {
        let mut plugins = Vec::new();
        for name in plugin_list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let digest = SrpDigest::from_plugin_name(name)
                .ok_or_else(|| Error::UnsupportedAuthPlugin(name.to_string()))?;
            if !plugins.contains(&digest) {
                plugins.push(digest);
            }
        }
        if plugins.is_empty() {
            return Err(Error::UnsupportedAuthPlugin(plugin_list.to_string()));
        }
        let clients = plugins.iter().map(|d| SrpClient::new(*d)).collect();
        Ok(Self::with_clients(user, password, wire_crypt, plugins, clients))
    }

    fn with_clients(
        user: &str,
        password: &str,
        wire_crypt: WireCrypt,
        plugins: Vec<SrpDigest>,
        clients: Vec<SrpClient>,
    ) -> Self {
        let public_data = clients
            .first()
            .map(|c| c.public_key_hex().into_bytes())
            .unwrap_or_default();
        Self {
            user: user.to_string(),
            password: password.to_string(),
            wire_crypt,
            accepted_plugin: plugins.first().copied(),
            plugins,
            clients,
            phase: AuthPhase::Start,
            public_data,
            client_data: None,
            server_keys: Vec::new(),
            session_key: None,
            wire_crypt_initialized: false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    /// Whether the server accepted the credentials
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Complete
    }

    /// Plugin the server is currently talking to
    pub fn accepted_plugin(&self) -> Option<&'static str> {
        self.accepted_plugin.map(|d| d.plugin_name())
    }

    /// Wire-crypt option requested by the caller
    pub fn wire_crypt(&self) -> WireCrypt {
        self.wire_crypt
    }

    /// Public data of the accepted plugin
    pub fn public_data(&self) -> &[u8] {
        &self.public_data
    }

    /// Proof computed from the last server data, if any
    pub fn client_data(&self) -> Option<&[u8]> {
        self.client_data.as_deref()
    }

    /// Keys announced with the last server reply
    pub fn server_keys(&self) -> &[u8] {
        &self.server_keys
    }

    /// SRP session key, once a proof has been computed
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    /// Whether wire encryption has been switched on
    pub fn wire_crypt_initialized(&self) -> bool {
        self.wire_crypt_initialized
    }

    /// Build the CNCT user identification block for `op_connect`
    pub fn user_identification(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        let os_user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());

        write_cnct(&mut out, cnct::USER, os_user.as_bytes());
        write_cnct(&mut out, cnct::HOST, host.as_bytes());
        out.extend_from_slice(&[cnct::USER_VERIFICATION, 0]);

        write_cnct(&mut out, cnct::LOGIN, self.user.as_bytes());
        if let Some(plugin) = self.accepted_plugin() {
            write_cnct(&mut out, cnct::PLUGIN_NAME, plugin.as_bytes());
        }
        write_multipart(&mut out, cnct::SPECIFIC_DATA, &self.public_data);

        let list = self
            .plugins
            .iter()
            .map(|d| d.plugin_name())
            .collect::<Vec<_>>()
            .join(",");
        write_cnct(&mut out, cnct::PLUGIN_LIST, list.as_bytes());

        out.push(cnct::CLIENT_CRYPT);
        out.push(4);
        out.extend_from_slice(&self.wire_crypt.wire_value().to_le_bytes());
        out
    }

    /// Take in server auth data and advance the handshake
    ///
    /// Selects the named plugin, exposes its public data and, when the
    /// server sent a salt and key, computes the proof and session key.
    pub fn start(
        &mut self,
        server_data: &[u8],
        plugin_name: &str,
        authenticated: bool,
        server_keys: &[u8],
    ) -> Result<()> {
        let digest = SrpDigest::from_plugin_name(plugin_name)
            .ok_or_else(|| Error::UnsupportedAuthPlugin(plugin_name.to_string()))?;
        let client = self
            .plugins
            .iter()
            .position(|d| *d == digest)
            .and_then(|idx| self.clients.get_mut(idx))
            .ok_or_else(|| Error::UnsupportedAuthPlugin(plugin_name.to_string()))?;

        let user = normalize_login(&self.user);
        self.public_data = client.public_key_hex().into_bytes();
        if !server_data.is_empty() {
            let proof = client.client_proof(&user, &self.password, server_data)?;
            self.client_data = Some(hex::encode_upper(proof).into_bytes());
            self.session_key = client.session_key().map(<[u8]>::to_vec);
        }

        self.accepted_plugin = Some(digest);
        self.server_keys = server_keys.to_vec();
        self.phase = if authenticated {
            AuthPhase::Complete
        } else {
            AuthPhase::ContinueAuth
        };
        tracing::debug!(plugin = plugin_name, phase = ?self.phase, "auth data received");
        Ok(())
    }

    /// Mark the handshake finished with the keys from the final response
    pub fn complete(&mut self, server_keys: &[u8]) {
        self.server_keys = server_keys.to_vec();
        self.phase = AuthPhase::Complete;
        self.clients.clear();
        tracing::debug!(keys = server_keys.len(), "authentication complete");
    }

    /// Data for the next `op_cont_auth`
    pub fn cont_auth_data(&self) -> &[u8] {
        self.client_data.as_deref().unwrap_or(&self.public_data)
    }

    /// Add the auth items of an attach or create request
    ///
    /// Before a proof exists the plugin name and public data go out; after
    /// that only the proof. Protocols before 13 have no plugin exchange and
    /// need the password itself.
    pub fn append_dpb_items(&self, buffer: &mut ParameterBuffer, protocol_version: i32) -> Result<()> {
        if protocol_version < protocol::VERSION13 {
            return buffer.append_str(dpb::PASSWORD, &self.password);
        }
        match &self.client_data {
            Some(data) => buffer.append_bytes(dpb::SPECIFIC_AUTH_DATA, data),
            None => {
                if let Some(plugin) = self.accepted_plugin() {
                    buffer.append_str(dpb::AUTH_PLUGIN_NAME, plugin)?;
                }
                buffer.append_bytes(dpb::SPECIFIC_AUTH_DATA, &self.public_data)
            }
        }
    }

    /// Whether the session should send `op_crypt` now
    pub fn should_start_wire_crypt(&self) -> bool {
        self.wire_crypt != WireCrypt::Disabled
            && !self.server_keys.is_empty()
            && self.session_key.is_some()
    }

    /// Record that both directions are now encrypted
    pub fn mark_wire_crypt_initialized(&mut self) {
        self.wire_crypt_initialized = true;
    }

    /// Fail when encryption was required but never switched on
    pub fn validate_wire_crypt(&self, protocol_version: i32) -> Result<()> {
        if protocol_version >= protocol::VERSION13
            && self.wire_crypt == WireCrypt::Required
            && self.is_authenticated()
            && !self.wire_crypt_initialized
        {
            return Err(Error::WireCryptIncompatible);
        }
        Ok(())
    }
}

fn write_cnct(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    let len = value.len().min(u8::MAX as usize);
    out.push(tag);
    out.push(len as u8);
    out.extend_from_slice(&value[..len]);
}

/// Split data into `[tag][len+1][part][chunk]` pieces
fn write_multipart(out: &mut Vec<u8>, tag: u8, data: &[u8]) {
    for (part, chunk) in data.chunks(MULTIPART_CHUNK).enumerate() {
        out.push(tag);
        out.push(chunk.len() as u8 + 1);
        out.push(part as u8);
        out.extend_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator(wire_crypt: WireCrypt) -> AuthNegotiator {
        AuthNegotiator::new("sysdba", "masterkey", wire_crypt, "Srp256,Srp").unwrap()
    }

    /// `[salt_len][salt][len][hex B]` with an arbitrary key
    fn server_data() -> Vec<u8> {
        let mut data = vec![4, 0];
        data.extend_from_slice(b"SALT");
        let b = "1F".repeat(64);
        data.extend_from_slice(&[(b.len() & 0xFF) as u8, (b.len() >> 8) as u8]);
        data.extend_from_slice(b.as_bytes());
        data
    }

    fn items(block: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < block.len() {
            let tag = block[i];
            let len = block[i + 1] as usize;
            out.push((tag, block[i + 2..i + 2 + len].to_vec()));
            i += 2 + len;
        }
        out
    }

    #[test]
    fn test_rejects_unknown_plugins() {
        let err = AuthNegotiator::new("a", "b", WireCrypt::Enabled, "Legacy_Auth").unwrap_err();
        assert!(matches!(err, Error::UnsupportedAuthPlugin(_)));
        assert!(AuthNegotiator::new("a", "b", WireCrypt::Enabled, "").is_err());
    }

    #[test]
    fn test_user_identification_layout() {
        let auth = negotiator(WireCrypt::Required);
        let block = auth.user_identification();
        let parsed = items(&block);

        let tags: Vec<u8> = parsed.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags[0], cnct::USER);
        assert_eq!(tags[1], cnct::HOST);
        assert_eq!(tags[2], cnct::USER_VERIFICATION);
        assert!(parsed.contains(&(cnct::LOGIN, b"sysdba".to_vec())));
        assert!(parsed.contains(&(cnct::PLUGIN_NAME, b"Srp256".to_vec())));
        assert!(parsed.contains(&(cnct::PLUGIN_LIST, b"Srp256,Srp".to_vec())));
        assert_eq!(parsed.last().unwrap(), &(cnct::CLIENT_CRYPT, vec![2, 0, 0, 0]));

        let specific: Vec<u8> = parsed
            .iter()
            .filter(|(t, _)| *t == cnct::SPECIFIC_DATA)
            .flat_map(|(_, v)| v[1..].to_vec())
            .collect();
        assert_eq!(specific, auth.public_data());
    }

    #[test]
    fn test_multipart_chunks_are_indexed() {
        let mut out = Vec::new();
        write_multipart(&mut out, cnct::SPECIFIC_DATA, &[b'x'; 300]);
        let parsed = items(&out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].1.len(), 255);
        assert_eq!(parsed[0].1[0], 0);
        assert_eq!(parsed[1].1.len(), 47);
        assert_eq!(parsed[1].1[0], 1);
    }

    #[test]
    fn test_start_computes_proof_and_session_key() {
        let mut auth = negotiator(WireCrypt::Enabled);
        auth.start(&server_data(), "Srp", false, b"").unwrap();
        assert_eq!(auth.phase(), AuthPhase::ContinueAuth);
        assert_eq!(auth.accepted_plugin(), Some("Srp"));
        // Sha1 proof, hex encoded
        assert_eq!(auth.client_data().unwrap().len(), 40);
        assert_eq!(auth.session_key().unwrap().len(), 20);
        assert_eq!(auth.cont_auth_data(), auth.client_data().unwrap());
    }

    #[test]
    fn test_start_without_server_data_keeps_public_data() {
        let mut auth = negotiator(WireCrypt::Enabled);
        auth.start(&[], "Srp256", false, b"").unwrap();
        assert!(auth.client_data().is_none());
        assert_eq!(auth.cont_auth_data(), auth.public_data());
    }

    #[test]
    fn test_start_rejects_unoffered_plugin() {
        let mut auth = AuthNegotiator::new("a", "b", WireCrypt::Enabled, "Srp256").unwrap();
        assert!(auth.start(&server_data(), "Srp", false, b"").is_err());
    }

    #[test]
    fn test_dpb_items_by_protocol() {
        let auth = negotiator(WireCrypt::Enabled);
        let mut old = ParameterBuffer::dpb();
        auth.append_dpb_items(&mut old, protocol::VERSION12).unwrap();
        let first = old.iter().next().unwrap().unwrap();
        assert_eq!(first.tag, dpb::PASSWORD);
        assert_eq!(first.as_str(), "masterkey");

        let mut auth = negotiator(WireCrypt::Enabled);
        let mut before = ParameterBuffer::new(crate::params::BufferKind::DatabaseWide);
        auth.append_dpb_items(&mut before, protocol::VERSION13).unwrap();
        let tags: Vec<u8> = before.iter().map(|c| c.unwrap().tag).collect();
        assert_eq!(tags, vec![dpb::AUTH_PLUGIN_NAME, dpb::SPECIFIC_AUTH_DATA]);

        auth.start(&server_data(), "Srp256", false, b"").unwrap();
        let mut after = ParameterBuffer::new(crate::params::BufferKind::DatabaseWide);
        auth.append_dpb_items(&mut after, protocol::VERSION13).unwrap();
        let tags: Vec<u8> = after.iter().map(|c| c.unwrap().tag).collect();
        assert_eq!(tags, vec![dpb::SPECIFIC_AUTH_DATA]);
    }

    #[test]
    fn test_wire_crypt_only_with_server_keys() {
        let mut auth = negotiator(WireCrypt::Enabled);
        auth.start(&server_data(), "Srp256", false, b"").unwrap();
        auth.complete(b"");
        assert!(!auth.should_start_wire_crypt());
        auth.complete(b"\x01\x07Symmetric");
        assert!(auth.should_start_wire_crypt());

        let mut disabled = negotiator(WireCrypt::Disabled);
        disabled.start(&server_data(), "Srp256", false, b"").unwrap();
        disabled.complete(b"keys");
        assert!(!disabled.should_start_wire_crypt());
    }

    #[test]
    fn test_required_wire_crypt_validation() {
        let mut auth = negotiator(WireCrypt::Required);
        auth.complete(b"");
        assert!(matches!(
            auth.validate_wire_crypt(protocol::VERSION13),
            Err(Error::WireCryptIncompatible)
        ));
        assert!(auth.validate_wire_crypt(protocol::VERSION12).is_ok());
        auth.mark_wire_crypt_initialized();
        assert!(auth.validate_wire_crypt(protocol::VERSION13).is_ok());

        let mut enabled = negotiator(WireCrypt::Enabled);
        enabled.complete(b"");
        assert!(enabled.validate_wire_crypt(protocol::VERSION13).is_ok());
    }
}
