//! Circuits, as seen through a control session.

use std::fmt::{self, Debug, Display};

use crate::ident::CircId;

/// Declare an enum of control-protocol keywords that keeps unknown ones.
///
/// Tor adds new purposes and reasons from time to time; we must not
/// refuse an event just because we don't recognize a keyword in it.
macro_rules! keyword_enum {
    {
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $kw:literal, )*
        }
    } => {
        $(#[$meta])*
        #[derive(Debug, Clone, Eq, PartialEq, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
            /// A keyword that we don't recognize.
            Other(String),
        }

        impl $name {
            /// Return the control-protocol keyword for this value.
            pub fn as_str(&self) -> &str {
                match self {
                    $( $name::$variant => $kw, )*
                    $name::Other(s) => s.as_str(),
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $kw => $name::$variant, )*
                    other => $name::Other(other.to_string()),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    }
}

keyword_enum! {
    /// The purpose Tor gives for a circuit.
    ///
    /// Only [`CircPurpose::General`] circuits are ever handed to callers;
    /// the others belong to Tor's own machinery.
    pub enum CircPurpose {
        /// An ordinary circuit for client traffic.
        General = "GENERAL",
        /// Client-side introduction circuit for an onion service.
        HsClientIntro = "HS_CLIENT_INTRO",
        /// Client-side rendezvous circuit for an onion service.
        HsClientRend = "HS_CLIENT_REND",
        /// Service-side introduction circuit.
        HsServiceIntro = "HS_SERVICE_INTRO",
        /// Service-side rendezvous circuit.
        HsServiceRend = "HS_SERVICE_REND",
        /// Circuit for testing reachability.
        Testing = "TESTING",
        /// Circuit built by a controller and left for it to manage.
        Controller = "CONTROLLER",
        /// Circuit built only to learn circuit build times.
        MeasureTimeout = "MEASURE_TIMEOUT",
        /// Prebuilt vanguard circuit for onion services.
        HsVanguards = "HS_VANGUARDS",
        /// Circuit used to probe for path bias.
        PathBiasTesting = "PATH_BIAS_TESTING",
        /// Circuit kept open only to carry padding.
        CircuitPadding = "CIRCUIT_PADDING",
    }
}

keyword_enum! {
    /// The reason Tor gives when a circuit fails or closes.
    pub enum CircFailReason {
        /// No reason given.
        None = "NONE",
        /// Violation of the Tor protocol.
        TorProtocol = "TORPROTOCOL",
        /// Internal error.
        Internal = "INTERNAL",
        /// A client asked for the circuit to close.
        Requested = "REQUESTED",
        /// A relay is hibernating.
        Hibernating = "HIBERNATING",
        /// A relay is out of resources.
        ResourceLimit = "RESOURCELIMIT",
        /// We couldn't connect to the next relay.
        ConnectFailed = "CONNECTFAILED",
        /// A relay had the wrong identity.
        OrIdentity = "OR_IDENTITY",
        /// The channel carrying the circuit closed.
        ChannelClosed = "CHANNEL_CLOSED",
        /// The circuit finished normally.
        Finished = "FINISHED",
        /// The circuit took too long to build.
        Timeout = "TIMEOUT",
        /// The circuit was destroyed without further explanation.
        Destroyed = "DESTROYED",
        /// Not enough relays to build the circuit.
        NoPath = "NOPATH",
        /// The requested onion service does not exist.
        NoSuchService = "NOSUCHSERVICE",
        /// A measurement circuit expired.
        MeasurementExpired = "MEASUREMENT_EXPIRED",
        /// An introduction point became redundant.
        IpNowRedundant = "IP_NOW_REDUNDANT",
    }
}

/// A circuit handle provided by the control session.
///
/// Cloning a handle must not create a new circuit: all clones refer to the
/// same circuit inside Tor.
pub trait ControlledCircuit: Clone + Debug + Send + Sync + 'static {
    /// Return the identifier Tor assigned to this circuit.
    fn id(&self) -> &CircId;

    /// Return the purpose Tor reports for this circuit.
    fn purpose(&self) -> &CircPurpose;

    /// Ask Tor to close this circuit.
    ///
    /// If `if_unused` is true, Tor closes the circuit only when no streams
    /// are using it.  This does not wait for Tor to answer.
    fn close(&self, if_unused: bool);
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
    fn keywords() {
        assert_eq!(CircPurpose::from("GENERAL"), CircPurpose::General);
        assert_eq!(CircPurpose::General.to_string(), "GENERAL");
        assert_eq!(
            CircPurpose::from("HS_CLIENT_REND"),
            CircPurpose::HsClientRend
        );
        assert_eq!(
            CircPurpose::from("CONFLUX_LINKED"),
            CircPurpose::Other("CONFLUX_LINKED".into())
        );
        assert_eq!(
            CircPurpose::Other("CONFLUX_LINKED".into()).as_str(),
            "CONFLUX_LINKED"
        );

        assert_eq!(CircFailReason::from("TIMEOUT"), CircFailReason::Timeout);
        assert_eq!(CircFailReason::Timeout.to_string(), "TIMEOUT");
        // Keywords are case-sensitive on the control port.
        assert_eq!(
            CircFailReason::from("timeout"),
            CircFailReason::Other("timeout".into())
        );
    }
}
