//! Configuration that Tor needs before we can pin paths.
//!
//! A scanner that chooses every hop itself needs Tor to stop second-guessing
//! it: no adaptive build timeouts, no entry guards, and full descriptors for
//! every relay, not just the ones Tor would use on its own.

use std::collections::BTreeMap;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::err::ConfigBuildError;

/// Tor options for a process whose circuits are chosen by the controller.
///
/// This type is immutable once constructed.  To build one, use
/// [`ScannerTorConfigBuilder`], or deserialize it.  Deserializing goes
/// through the builder, so both ways are validated the same.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError", validate = "Self::validate"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[builder_struct_attr(serde(deny_unknown_fields))]
#[serde(try_from = "ScannerTorConfigBuilder")]
pub struct ScannerTorConfig {
    /// How long Tor may spend building a circuit before giving up.
    ///
    /// Sent as `CircuitBuildTimeout`, which Tor only takes in whole
    /// seconds; any other value is rejected.
    #[builder(default = "default_circuit_build_timeout()")]
    #[builder_field_attr(serde(default, with = "humantime_serde::option"))]
    #[serde(with = "humantime_serde")]
    circuit_build_timeout: Duration,

    /// Whether Tor should adapt its circuit build timeout from observation.
    #[builder(default)]
    #[builder_field_attr(serde(default))]
    learn_circuit_build_timeout: bool,

    /// Whether Tor should use entry guards.
    ///
    /// Off by default: we pick the first hop ourselves, and guards would
    /// only produce path-bias warnings.
    #[builder(default)]
    #[builder_field_attr(serde(default))]
    use_entry_guards: bool,

    /// Whether Tor should fetch microdescriptors rather than full ones.
    #[builder(default)]
    #[builder_field_attr(serde(default))]
    use_microdescriptors: bool,

    /// Whether Tor should fetch descriptors for relays it would not use.
    #[builder(default = "true")]
    #[builder_field_attr(serde(default))]
    fetch_useless_descriptors: bool,

    /// Whether Tor should fetch directory information early.
    #[builder(default = "true")]
    #[builder_field_attr(serde(default))]
    fetch_dir_info_early: bool,

    /// Whether Tor should fetch directory information even earlier.
    #[builder(default = "true")]
    #[builder_field_attr(serde(default))]
    fetch_dir_info_extra_early: bool,

    /// Whether Tor should leave every new stream for us to attach.
    ///
    /// Without this, Tor attaches streams by itself as soon as it can, and
    /// a requested circuit may never get its stream.
    #[builder(default = "true")]
    #[builder_field_attr(serde(default))]
    leave_streams_unattached: bool,

    /// Extra options, sent after all the others.
    ///
    /// An override with the same name as one of the options above replaces it.
    #[builder(default)]
    #[builder_field_attr(serde(default))]
    overrides: BTreeMap<String, String>,
}

/// Default value for `circuit_build_timeout`.
fn default_circuit_build_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Render a boolean the way torrc expects it.
fn flag(b: bool) -> String {
    let s = if b { "1" } else { "0" };
    s.to_string()
}

impl ScannerTorConfigBuilder {
    /// Check that the options make sense together.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if let Some(t) = self.circuit_build_timeout {
            if t.as_secs() == 0 {
                return Err(ConfigBuildError::Invalid {
                    field: "circuit_build_timeout".into(),
                    problem: "must be at least one second".into(),
                });
            }
            if t.subsec_nanos() != 0 {
                return Err(ConfigBuildError::Invalid {
                    field: "circuit_build_timeout".into(),
                    problem: "must be a whole number of seconds".into(),
                });
            }
        }
        Ok(())
    }
}

impl ScannerTorConfig {
    /// Return a new [`ScannerTorConfigBuilder`].
    pub fn builder() -> ScannerTorConfigBuilder {
        ScannerTorConfigBuilder::default()
    }

    /// Return the configured circuit build timeout.
    pub fn circuit_build_timeout(&self) -> Duration {
        self.circuit_build_timeout
    }

    /// Return the options to send to Tor, as `(name, value)` pairs.
    ///
    /// Names are unique: overrides replace the built-in value in place.
    pub fn tor_options(&self) -> Vec<(String, String)> {
        let mut options = vec![
            (
                "LearnCircuitBuildTimeout",
                flag(self.learn_circuit_build_timeout),
            ),
            (
                "CircuitBuildTimeout",
                self.circuit_build_timeout.as_secs().to_string(),
            ),
            ("UseEntryGuards", flag(self.use_entry_guards)),
            ("UseMicroDescriptors", flag(self.use_microdescriptors)),
            (
                "FetchUselessDescriptors",
                flag(self.fetch_useless_descriptors),
            ),
            ("FetchDirInfoEarly", flag(self.fetch_dir_info_early)),
            (
                "FetchDirInfoExtraEarly",
                flag(self.fetch_dir_info_extra_early),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect::<Vec<_>>();
        if self.leave_streams_unattached {
            options.push(("__LeaveStreamsUnattached".into(), "1".into()));
        }

        for (key, value) in &self.overrides {
            match options.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1.clone_from(value),
                None => options.push((key.clone(), value.clone())),
            }
        }
        options
    }
}

impl TryFrom<ScannerTorConfigBuilder> for ScannerTorConfig {
    type Error = ConfigBuildError;

    fn try_from(builder: ScannerTorConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl Default for ScannerTorConfig {
    fn default() -> Self {
        ScannerTorConfigBuilder::default()
            .build()
            .expect("unusable hardwired defaults")
    }
}
