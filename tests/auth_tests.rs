//! Integration tests for login normalization and the SRP client
//!
//! The exchange with a live server is covered in `connection_tests.rs`;
//! these check the client computations on their own.

use firebird_rs::auth::{normalize_login, AuthNegotiator, AuthPhase, SrpClient, SrpDigest};
use firebird_rs::WireCrypt;

/// `[salt_len][salt][len][hex B]`
fn server_data(salt: &[u8], key_hex: &str) -> Vec<u8> {
    let mut data = (salt.len() as u16).to_le_bytes().to_vec();
    data.extend_from_slice(salt);
    data.extend_from_slice(&(key_hex.len() as u16).to_le_bytes());
    data.extend_from_slice(key_hex.as_bytes());
    data
}

mod login_tests {
    use super::*;

    #[test]
    fn test_unquoted_names_are_uppercased() {
        assert_eq!(normalize_login("sysdba"), "SYSDBA");
        assert_eq!(normalize_login("Alice_1"), "ALICE_1");
    }

    #[test]
    fn test_quoted_names_keep_case() {
        assert_eq!(normalize_login("\"Alice\""), "Alice");
        assert_eq!(normalize_login("\"a\"\"b\""), "a\"b");
        // an unescaped quote ends the name
        assert_eq!(normalize_login("\"ab\"cd\""), "ab");
    }

    #[test]
    fn test_short_quoted_input_is_uppercased() {
        assert_eq!(normalize_login("\"\""), "\"\"");
        assert_eq!(normalize_login(""), "");
    }
}

mod srp_client_tests {
    use super::*;

    #[test]
    fn test_plugin_names() {
        assert_eq!(SrpDigest::Sha1.plugin_name(), "Srp");
        assert_eq!(SrpDigest::Sha256.plugin_name(), "Srp256");
        assert_eq!(SrpDigest::from_plugin_name("Srp256"), Some(SrpDigest::Sha256));
        assert_eq!(SrpDigest::from_plugin_name("Legacy_Auth"), None);
    }

    #[test]
    fn test_fixed_private_key_is_deterministic() {
        let a = SrpClient::with_private_key(SrpDigest::Sha256, &[0x42; 16]);
        let b = SrpClient::with_private_key(SrpDigest::Sha1, &[0x42; 16]);
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert!(a.public_key_hex().len() <= 256);
        assert!(a.session_key().is_none());
    }

    #[test]
    fn test_digests_share_session_key() {
        let data = server_data(&[0x5a; 32], &"2B".repeat(128));
        let mut sha1 = SrpClient::with_private_key(SrpDigest::Sha1, &[0x42; 16]);
        let mut sha256 = SrpClient::with_private_key(SrpDigest::Sha256, &[0x42; 16]);

        let m1 = sha1.client_proof("SYSDBA", "masterkey", &data).unwrap();
        let m256 = sha256.client_proof("SYSDBA", "masterkey", &data).unwrap();
        assert_eq!(m1.len(), 20);
        assert_eq!(m256.len(), 32);
        assert_eq!(sha1.session_key(), sha256.session_key());
        assert_eq!(sha1.session_key().unwrap().len(), 20);
    }

    #[test]
    fn test_password_changes_proof() {
        let data = server_data(b"salt", &"7F".repeat(64));
        let mut client = SrpClient::with_private_key(SrpDigest::Sha256, &[1; 16]);
        let first = client.client_proof("SYSDBA", "masterkey", &data).unwrap();
        let second = client.client_proof("SYSDBA", "masterKey", &data).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_server_data() {
        let mut client = SrpClient::new(SrpDigest::Sha256);
        assert!(client.client_proof("A", "B", &[1]).is_err());
        // declares a 40-byte salt but carries four
        assert!(client.client_proof("A", "B", &[40, 0, 1, 2, 3, 4]).is_err());
        assert!(client
            .client_proof("A", "B", &server_data(b"salt", "not hex"))
            .is_err());
    }
}

mod negotiator_tests {
    use super::*;

    #[test]
    fn test_two_round_exchange() {
        let mut auth =
            AuthNegotiator::new("sysdba", "masterkey", WireCrypt::Enabled, "Srp256,Srp").unwrap();
        assert_eq!(auth.phase(), AuthPhase::Start);
        assert_eq!(auth.accepted_plugin(), Some("Srp256"));

        // first round: the server only names the plugin
        auth.start(&[], "Srp256", false, b"").unwrap();
        assert_eq!(auth.phase(), AuthPhase::ContinueAuth);
        assert_eq!(auth.cont_auth_data(), auth.public_data());

        // second round: salt and key arrive
        let data = server_data(&[9; 32], &"5C".repeat(128));
        auth.start(&data, "Srp256", false, b"").unwrap();
        assert_eq!(auth.client_data().unwrap().len(), 64);
        assert!(auth.session_key().is_some());

        auth.complete(b"\x00\x04Arc4");
        assert!(auth.is_authenticated());
        assert!(auth.should_start_wire_crypt());
    }

    #[test]
    fn test_server_may_switch_to_offered_plugin() {
        let mut auth =
            AuthNegotiator::new("sysdba", "masterkey", WireCrypt::Enabled, "Srp256, Srp").unwrap();
        let data = server_data(b"salt", &"11".repeat(64));
        auth.start(&data, "Srp", false, b"").unwrap();
        assert_eq!(auth.accepted_plugin(), Some("Srp"));
        assert_eq!(auth.client_data().unwrap().len(), 40);
    }
}
