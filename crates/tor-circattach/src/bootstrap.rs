//! Apply a [`ScannerTorConfig`] to a running Tor.
//!
//! Some options only take effect once Tor has fetched a fresh consensus.
//! We notice when we are changing one of those, and wait for the next
//! consensus before declaring Tor ready.

use tracing::{debug, info};

use crate::Result;
use crate::config::ScannerTorConfig;
use crate::session::TorConfigSession;

/// Option that changes which kind of directory documents Tor downloads.
const USE_MICRODESCRIPTORS: &str = "UseMicroDescriptors";

/// Value Tor reports for an option that was never set.
const UNSET: &str = "auto";

/// Return true if sending `new_options` to Tor means we must wait for a new
/// consensus before the options are in effect.
///
/// `current_use_microdescriptors` is Tor's present value of
/// `UseMicroDescriptors`, if it has one.
pub fn options_need_new_consensus(
    current_use_microdescriptors: Option<&str>,
    new_options: &[(String, String)],
) -> bool {
    let Some((_, new)) = new_options.iter().find(|(k, _)| k == USE_MICRODESCRIPTORS) else {
        return false;
    };
    let current = current_use_microdescriptors.unwrap_or(UNSET);
    if current.trim().eq_ignore_ascii_case(new.trim()) {
        return false;
    }
    debug!(
        "Changing {} from {} to {}",
        USE_MICRODESCRIPTORS, current, new
    );
    true
}

/// Configure Tor through `session` with the options in `config`.
///
/// All options are sent in a single command.  If they change which
/// directory documents Tor uses, this waits for Tor to announce a new
/// consensus before returning.
pub async fn configure_tor<S>(session: &S, config: &ScannerTorConfig) -> Result<()>
where
    S: TorConfigSession + ?Sized,
{
    let options = config.tor_options();
    let current = session.get_conf(USE_MICRODESCRIPTORS).await?;
    // Subscribe before sending, so that we can't miss the consensus.
    let consensus = options_need_new_consensus(current.as_deref(), &options)
        .then(|| session.next_consensus());

    session.set_conf(&options).await?;
    debug!("Sent {} options to Tor", options.len());

    if let Some(consensus) = consensus {
        info!("Waiting for Tor to fetch a new consensus.");
        consensus.await?;
        debug!("Got new consensus.");
    }
    Ok(())
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
    use crate::Error;
    use crate::err::SessionError;
    use async_trait::async_trait;
    use futures::FutureExt as _;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A pretend Tor that announces a consensus whenever
    /// `UseMicroDescriptors` changes.
    #[derive(Default)]
    struct MockTor {
        conf: Mutex<HashMap<String, String>>,
        log: Mutex<Vec<String>>,
        waiters: Mutex<Vec<oneshot::Sender<()>>>,
        broken: bool,
    }

    impl MockTor {
        fn with(key: &str, value: &str) -> Self {
            let tor = MockTor::default();
            tor.conf
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            tor
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TorConfigSession for MockTor {
        async fn get_conf(&self, key: &str) -> std::result::Result<Option<String>, SessionError> {
            if self.broken {
                return Err(SessionError::Closed);
            }
            self.log.lock().unwrap().push(format!("get {}", key));
            Ok(self.conf.lock().unwrap().get(key).cloned())
        }

        async fn set_conf(
            &self,
            options: &[(String, String)],
        ) -> std::result::Result<(), SessionError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("set {}", options.len()));
            let mut conf = self.conf.lock().unwrap();
            let mut new_consensus = false;
            for (k, v) in options {
                let old = conf.insert(k.clone(), v.clone());
                if k == USE_MICRODESCRIPTORS && old.as_deref() != Some(v.as_str()) {
                    new_consensus = true;
                }
            }
            if new_consensus {
                for w in self.waiters.lock().unwrap().drain(..) {
                    let _ = w.send(());
                }
            }
            Ok(())
        }

        fn next_consensus(&self) -> BoxFuture<'static, std::result::Result<(), SessionError>> {
            self.log.lock().unwrap().push("subscribe".to_string());
            let (tx, rx) = oneshot::channel();
            self.waiters.lock().unwrap().push(tx);
            rx.map(|r| r.map_err(|_| SessionError::Closed)).boxed()
        }
    }

    fn opts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn need_consensus() {
        let new = opts(&[("UseMicroDescriptors", "0"), ("UseEntryGuards", "0")]);
        assert!(options_need_new_consensus(None, &new));
        assert!(options_need_new_consensus(Some("auto"), &new));
        assert!(options_need_new_consensus(Some("1"), &new));
        assert!(!options_need_new_consensus(Some("0"), &new));

        let unrelated = opts(&[("UseEntryGuards", "0")]);
        assert!(!options_need_new_consensus(Some("1"), &unrelated));
        assert!(!options_need_new_consensus(None, &[]));
    }

    #[test]
    fn waits_for_consensus() {
        let tor = MockTor::with("UseMicroDescriptors", "auto");
        block_on(configure_tor(&tor, &ScannerTorConfig::default())).unwrap();
        assert_eq!(tor.log(), vec!["get UseMicroDescriptors", "subscribe", "set 8"]);
        assert_eq!(
            tor.conf.lock().unwrap().get("CircuitBuildTimeout").unwrap(),
            "60"
        );
    }

    #[test]
    fn no_wait_when_unchanged() {
        let tor = MockTor::with("UseMicroDescriptors", "0");
        block_on(configure_tor(&tor, &ScannerTorConfig::default())).unwrap();
        assert_eq!(tor.log(), vec!["get UseMicroDescriptors", "set 8"]);
        assert!(tor.waiters.lock().unwrap().is_empty());
    }

    #[test]
    fn session_failure() {
        let tor = MockTor {
            broken: true,
            ..Default::default()
        };
        let r = block_on(configure_tor(&tor, &ScannerTorConfig::default()));
        assert!(matches!(r, Err(Error::Session(SessionError::Closed))));
        assert!(tor.log().is_empty());
    }
}
