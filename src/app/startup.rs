use crate::app::ports::RemoteSession;
use crate::common::constants::{CATEGORIES_SUBSCRIPTION, EVENTS_SUBSCRIPTION, JOBS_SUBSCRIPTION};
use crate::common::error::{HarvesterError, Result};
use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// Readiness of the remote session. Workers may only start at `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartupPhase {
    Connecting,
    Connected,
    Authenticated,
    Subscribed,
    Running,
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StartupPhase::Connecting => "connecting",
            StartupPhase::Connected => "connected",
            StartupPhase::Authenticated => "authenticated",
            StartupPhase::Subscribed => "subscribed",
            StartupPhase::Running => "running",
        };
        f.write_str(s)
    }
}

/// Walks the session through its phases, publishing each one.
pub struct Startup {
    phase: watch::Sender<StartupPhase>,
}

impl Default for Startup {
    fn default() -> Self {
        Self::new()
    }
}

impl Startup {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(StartupPhase::Connecting);
        Self { phase }
    }

    pub fn phase(&self) -> StartupPhase {
        *self.phase.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<StartupPhase> {
        self.phase.subscribe()
    }

    /// Connect, authenticate and subscribe in order. On error the phase stays
    /// at the last one reached and the error names the step that failed.
    pub async fn run(&self, session: &dyn RemoteSession) -> Result<()> {
        session
            .connect()
            .await
            .map_err(|e| self.failed("connect", e))?;
        self.advance(StartupPhase::Connected);

        session
            .authenticate()
            .await
            .map_err(|e| self.failed("authenticate", e))?;
        self.advance(StartupPhase::Authenticated);

        for name in [JOBS_SUBSCRIPTION, EVENTS_SUBSCRIPTION, CATEGORIES_SUBSCRIPTION] {
            session
                .subscribe(name)
                .await
                .map_err(|e| self.failed(&format!("subscribe to '{}'", name), e))?;
        }
        self.advance(StartupPhase::Subscribed);

        self.advance(StartupPhase::Running);
        Ok(())
    }

    fn advance(&self, next: StartupPhase) {
        self.phase.send_replace(next);
        info!("Startup phase: {}", next);
    }

    fn failed(&self, step: &str, error: HarvesterError) -> HarvesterError {
        HarvesterError::store(format!(
            "startup failed to {} (reached {}): {}",
            step,
            self.phase(),
            error
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSession {
        fail_on: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSession {
        fn step(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.fail_on == Some(name) {
                return Err(HarvesterError::Auth(format!("{} refused", name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteSession for ScriptedSession {
        async fn connect(&self) -> Result<()> {
            self.step("connect")
        }
        async fn authenticate(&self) -> Result<()> {
            self.step("authenticate")
        }
        async fn subscribe(&self, name: &str) -> Result<()> {
            self.step(name)
        }
    }

    #[tokio::test]
    async fn walks_every_phase_in_order() {
        let session = ScriptedSession::default();
        let startup = Startup::new();
        let mut rx = startup.watch();
        startup.run(&session).await.unwrap();

        assert_eq!(startup.phase(), StartupPhase::Running);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), StartupPhase::Running);
        assert_eq!(
            *session.calls.lock().unwrap(),
            vec!["connect", "authenticate", "allJobs", "allEvents", "categories"]
        );
    }

    #[tokio::test]
    async fn failure_stops_at_the_last_reached_phase() {
        let session = ScriptedSession { fail_on: Some("authenticate"), ..Default::default() };
        let startup = Startup::new();
        let err = startup.run(&session).await.unwrap_err();

        assert_eq!(startup.phase(), StartupPhase::Connected);
        assert!(err.to_string().contains("authenticate"));
        assert_eq!(session.calls.lock().unwrap().len(), 2);
    }
}
