//! Attach and create requests

use crate::auth::AuthNegotiator;
use crate::capabilities::DRIVER_NAME;
use crate::config::Config;
use crate::constants::{dpb, op, protocol};
use crate::error::Result;
use crate::params::{BufferKind, ParameterBuffer};
use crate::xdr::XdrStream;

/// Keep-alive interval requested from the server, in seconds
const DUMMY_PACKET_INTERVAL: i32 = 120;

/// Build the DPB for an attach (`create == false`) or a create
///
/// Protocol 13 uses the wide DPB format so the SRP key and proof fit in a
/// single item.
pub fn build_dpb(
    config: &Config,
    auth: &AuthNegotiator,
    protocol_version: i32,
    create: bool,
) -> Result<ParameterBuffer> {
    let kind = if protocol_version >= protocol::VERSION13 {
        BufferKind::DatabaseWide
    } else {
        BufferKind::Database
    };
    let mut buffer = ParameterBuffer::new(kind);

    buffer.append_u8(dpb::UTF8_FILENAME, 0);
    buffer.append_i32(dpb::DUMMY_PACKET_INTERVAL, DUMMY_PACKET_INTERVAL);
    buffer.append_i32(dpb::SQL_DIALECT, config.dialect as i32);
    buffer.append_str(dpb::LC_CTYPE, &config.charset)?;
    if !config.username.is_empty() {
        buffer.append_str(dpb::USER_NAME, &config.username)?;
    }
    if let Some(role) = &config.role {
        buffer.append_str(dpb::SQL_ROLE_NAME, role)?;
    }
    buffer.append_i32(
        dpb::CONNECT_TIMEOUT,
        config.connect_timeout.as_secs().min(i32::MAX as u64) as i32,
    );
    buffer.append_i32(
        dpb::PROCESS_ID,
        config.process_id.unwrap_or_else(std::process::id) as i32,
    );
    if let Some(name) = &config.process_name {
        buffer.append_str(dpb::PROCESS_NAME, name)?;
    }
    buffer.append_str(dpb::CLIENT_VERSION, DRIVER_NAME)?;
    if let Some(zone) = &config.session_time_zone {
        buffer.append_str(dpb::SESSION_TIME_ZONE, zone)?;
    }

    if create {
        buffer.append_str(dpb::SET_DB_CHARSET, &config.charset)?;
        if let Some(force) = config.force_write {
            buffer.append_i16(dpb::FORCE_WRITE, force as i16);
        }
        if config.overwrite {
            buffer.append_u8(dpb::OVERWRITE, 1);
        }
        if let Some(size) = config.page_size {
            buffer.append_i32(dpb::PAGE_SIZE, size as i32);
        }
    }

    auth.append_dpb_items(&mut buffer, protocol_version)?;
    Ok(buffer)
}

/// Queue `op_attach` or `op_create`
pub fn write_attach(xdr: &mut XdrStream, database: &str, dpb: &ParameterBuffer, create: bool) -> Result<()> {
    xdr.write_op(if create { op::CREATE } else { op::ATTACH })?;
    xdr.write_i32(0)?;
    xdr.write_string(database)?;
    xdr.write_buffer(dpb.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireCrypt;

    fn tags(buffer: &ParameterBuffer) -> Vec<u8> {
        buffer.iter().map(|c| c.unwrap().tag).collect()
    }

    #[test]
    fn test_attach_dpb_v13() {
        let config = Config::new("h", 3050, "db", "SYSDBA", "pw").role("R");
        let auth = AuthNegotiator::new("SYSDBA", "pw", WireCrypt::Enabled, "Srp256").unwrap();
        let buffer = build_dpb(&config, &auth, protocol::VERSION13, false).unwrap();
        assert_eq!(buffer.as_bytes()[0], 2);

        let tags = tags(&buffer);
        assert!(tags.contains(&dpb::LC_CTYPE));
        assert!(tags.contains(&dpb::SQL_ROLE_NAME));
        assert!(tags.contains(&dpb::AUTH_PLUGIN_NAME));
        assert!(tags.contains(&dpb::SPECIFIC_AUTH_DATA));
        assert!(!tags.contains(&dpb::PASSWORD));
        assert!(!tags.contains(&dpb::PAGE_SIZE));

        let dialect = buffer.iter().map(|c| c.unwrap()).find(|c| c.tag == dpb::SQL_DIALECT).unwrap();
        assert_eq!(dialect.as_int(), 3);
    }

    #[test]
    fn test_attach_dpb_v10_sends_password() {
        let config = Config::new("h", 3050, "db", "SYSDBA", "pw");
        let auth = AuthNegotiator::new("SYSDBA", "pw", WireCrypt::Disabled, "Srp").unwrap();
        let buffer = build_dpb(&config, &auth, protocol::VERSION10, false).unwrap();
        assert_eq!(buffer.as_bytes()[0], dpb::VERSION1);
        let password = buffer.iter().map(|c| c.unwrap()).find(|c| c.tag == dpb::PASSWORD).unwrap();
        assert_eq!(password.as_str(), "pw");
    }

    #[test]
    fn test_create_dpb_items() {
        let config = Config::new("h", 3050, "db", "SYSDBA", "pw")
            .page_size(16384)
            .force_write(true)
            .overwrite(true);
        let auth = AuthNegotiator::new("SYSDBA", "pw", WireCrypt::Enabled, "Srp256").unwrap();
        let buffer = build_dpb(&config, &auth, protocol::VERSION13, true).unwrap();
        let items: Vec<_> = buffer.iter().map(|c| c.unwrap()).collect();
        let page = items.iter().find(|c| c.tag == dpb::PAGE_SIZE).unwrap();
        assert_eq!(page.as_int(), 16384);
        let force = items.iter().find(|c| c.tag == dpb::FORCE_WRITE).unwrap();
        assert_eq!(force.value, &[1, 0]);
        assert!(items.iter().any(|c| c.tag == dpb::OVERWRITE));
        assert!(items.iter().any(|c| c.tag == dpb::SET_DB_CHARSET));
    }
}
