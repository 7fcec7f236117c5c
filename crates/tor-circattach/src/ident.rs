//! Identifiers for the things we correlate: clients, circuits, streams and relays.

use std::fmt::{self, Display};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

/// The identity of one expected client stream.
///
/// A client connection is known only by the address and port it connects
/// from, so that is all we use.  Both parts must match exactly.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ClientIdentity {
    /// Source address of the client connection.
    addr: IpAddr,
    /// Source port of the client connection.
    port: u16,
}

impl ClientIdentity {
    /// Construct a new `ClientIdentity`.
    pub fn new(addr: IpAddr, port: u16) -> Self {
        ClientIdentity { addr, port }
    }

    /// Return the source address of this client.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Return the source port of this client.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for ClientIdentity {
    fn from(addr: SocketAddr) -> Self {
        ClientIdentity::new(addr.ip(), addr.port())
    }
}

impl Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&SocketAddr::new(self.addr, self.port), f)
    }
}

/// An error from parsing one of the identifiers in this module.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum IdParseError {
    /// A circuit or stream ID was empty, too long, or not alphanumeric.
    #[error("Invalid control-port identifier {0:?}")]
    BadId(String),
    /// A relay selector was neither a fingerprint nor a nickname.
    #[error("Invalid relay selector {0:?}")]
    BadRelay(String),
}

/// Longest identifier the control protocol allows for circuits and streams.
const MAX_ID_LEN: usize = 16;

/// Check that `s` is a valid control-port circuit or stream identifier.
fn check_id(s: &str) -> Result<(), IdParseError> {
    if s.is_empty() || s.len() > MAX_ID_LEN || !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(IdParseError::BadId(s.to_string()));
    }
    Ok(())
}

/// Declare an opaque control-port identifier type.
macro_rules! declare_id {
    { $(#[$meta:meta])* $name:ident } => {
        $(#[$meta])*
        #[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(String);

        impl $name {
            /// Return this identifier as a string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                check_id(s)?;
                Ok($name(s.to_string()))
            }
        }

        impl From<u32> for $name {
            fn from(n: u32) -> Self {
                $name(n.to_string())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    }
}

declare_id! {
    /// Identifier that Tor assigns to a circuit when it starts building it.
    CircId
}

declare_id! {
    /// Identifier that Tor assigns to a stream.
    StreamId
}

/// Length of an RSA identity fingerprint, in bytes.
const FINGERPRINT_LEN: usize = 20;

/// Longest nickname a relay may have.
const MAX_NICKNAME_LEN: usize = 19;

/// One hop of a requested path.
///
/// Displayed the way the control protocol expects it in `EXTENDCIRCUIT`:
/// a fingerprint is written as `$` followed by upper-case hex.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum RelaySelector {
    /// A relay named by its RSA identity fingerprint.
    Fingerprint([u8; FINGERPRINT_LEN]),
    /// A relay named by its nickname.
    Nickname(String),
}

impl FromStr for RelaySelector {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || IdParseError::BadRelay(s.to_string());
        // "$FP~nick" and "$FP=nick" are accepted; the nickname part is advisory.
        let hex_part = s.strip_prefix('$').map(|rest| {
            rest.split(['~', '='])
                .next()
                .unwrap_or(rest)
        });
        match hex_part {
            Some(h) => {
                let mut fp = [0_u8; FINGERPRINT_LEN];
                hex::decode_to_slice(h, &mut fp).map_err(|_| bad())?;
                Ok(RelaySelector::Fingerprint(fp))
            }
            None if s.len() == FINGERPRINT_LEN * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()) => {
                let mut fp = [0_u8; FINGERPRINT_LEN];
                hex::decode_to_slice(s, &mut fp).map_err(|_| bad())?;
                Ok(RelaySelector::Fingerprint(fp))
            }
            None if !s.is_empty()
                && s.len() <= MAX_NICKNAME_LEN
                && s.bytes().all(|b| b.is_ascii_alphanumeric()) =>
            {
                Ok(RelaySelector::Nickname(s.to_string()))
            }
            None => Err(bad()),
        }
    }
}

impl Display for RelaySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelaySelector::Fingerprint(fp) => write!(f, "${}", hex::encode_upper(fp)),
            RelaySelector::Nickname(n) => f.write_str(n),
        }
    }
}

/// What we learn about a stream from the control session.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct StreamInfo {
    /// Tor's identifier for the stream.
    pub id: StreamId,
    /// Where the client connected from, if Tor told us.
    ///
    /// Streams that Tor opens for itself have no source address.
    pub source: Option<SocketAddr>,
}

impl StreamInfo {
    /// Construct a new `StreamInfo`.
    pub fn new(id: StreamId, source: Option<SocketAddr>) -> Self {
        StreamInfo { id, source }
    }

    /// Return the identity of the client that opened this stream, if known.
    pub fn client_identity(&self) -> Option<ClientIdentity> {
        self.source.map(ClientIdentity::from)
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn identity() {
        let a: ClientIdentity = "10.0.0.5:51413".parse::<SocketAddr>().unwrap().into();
        let b = ClientIdentity::new("10.0.0.5".parse().unwrap(), 51413);
        let c = ClientIdentity::new("10.0.0.5".parse().unwrap(), 51414);
        let d = ClientIdentity::new("10.0.0.6".parse().unwrap(), 51413);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.to_string(), "10.0.0.5:51413");

        let v6 = ClientIdentity::new("::1".parse().unwrap(), 80);
        assert_eq!(v6.to_string(), "[::1]:80");
    }

    #[test]
    fn ids() {
        let c: CircId = "42".parse().unwrap();
        assert_eq!(c, CircId::from(42_u32));
        assert_eq!(c.as_str(), "42");
        assert!("".parse::<CircId>().is_err());
        assert!("12345678901234567".parse::<CircId>().is_err());
        assert!("4-2".parse::<StreamId>().is_err());
        assert_eq!("Ab9".parse::<StreamId>().unwrap().to_string(), "Ab9");
    }

    #[test]
    fn relays() {
        let fp = "$0123456789ABCDEF0123456789ABCDEF01234567";
        let r: RelaySelector = fp.parse().unwrap();
        assert!(matches!(r, RelaySelector::Fingerprint(_)));
        assert_eq!(r.to_string(), fp);

        let r2: RelaySelector = "0123456789abcdef0123456789abcdef01234567".parse().unwrap();
        assert_eq!(r, r2);
        let r3: RelaySelector = "$0123456789ABCDEF0123456789ABCDEF01234567~moria1"
            .parse()
            .unwrap();
        assert_eq!(r, r3);

        let n: RelaySelector = "moria1".parse().unwrap();
        assert_eq!(n, RelaySelector::Nickname("moria1".into()));
        assert_eq!(n.to_string(), "moria1");

        assert!("$0123".parse::<RelaySelector>().is_err());
        assert!("".parse::<RelaySelector>().is_err());
        assert!("not a relay".parse::<RelaySelector>().is_err());
        assert!("waytoolongnicknameforatorrelay".parse::<RelaySelector>().is_err());
    }

    #[test]
    fn stream_identity() {
        let s = StreamInfo::new(
            StreamId::from(3_u32),
            Some("127.0.0.1:9999".parse().unwrap()),
        );
        assert_eq!(
            s.client_identity(),
            Some(ClientIdentity::new("127.0.0.1".parse().unwrap(), 9999))
        );
        let internal = StreamInfo::new(StreamId::from(4_u32), None);
        assert_eq!(internal.client_identity(), None);
    }
}
