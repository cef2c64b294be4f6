pub mod recovery_tests;
pub mod session_tests;

use crate::utils::{MockConnector, MockSignaling, RecordingObserver, settle};
use std::sync::Arc;
use std::time::Duration;
use tandem_client::{
    ClientConfig, LocalStream, PeerSessionDeps, PeerSessionManager, TurnConfigCache,
    default_ice_servers,
};
use tandem_core::{Envelope, Role};
use tracing::Level;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// One peer session manager wired to mocks.
pub struct Harness {
    pub manager: PeerSessionManager,
    pub connector: Arc<MockConnector>,
    pub signaling: Arc<MockSignaling>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub async fn start(role: Role) -> Self {
        Self::start_with(role, MockConnector::new(), None).await
    }

    pub async fn start_with(
        role: Role,
        connector: Arc<MockConnector>,
        turn: Option<Arc<TurnConfigCache>>,
    ) -> Self {
        init_tracing();
        let signaling = Arc::new(MockSignaling::new(true));
        let observer = Arc::new(RecordingObserver::default());

        let manager = PeerSessionManager::spawn(
            &ClientConfig::default(),
            PeerSessionDeps {
                role,
                connector: connector.clone(),
                signaling: signaling.clone(),
                turn,
                observer: Some(observer.clone()),
            },
        );
        manager
            .initialize(LocalStream::default(), default_ice_servers())
            .await
            .unwrap();
        settle().await;

        Self {
            manager,
            connector,
            signaling,
            observer,
        }
    }

    pub async fn signal(&self, envelope: Envelope) {
        self.manager.process_signal(&envelope).unwrap();
        settle().await;
    }

    /// Host only: sends the first offer and applies the guest's answer.
    pub async fn negotiate(&self) {
        assert!(self.manager.initiate_call().await);
        self.signal(answer("answer-1")).await;
    }
}

pub fn offer(sdp: &str) -> Envelope {
    Envelope::new(
        tandem_core::MessageType::Offer,
        &tandem_core::SessionDescription::offer(sdp),
    )
    .unwrap()
}

pub fn answer(sdp: &str) -> Envelope {
    Envelope::new(
        tandem_core::MessageType::Answer,
        &tandem_core::SessionDescription::answer(sdp),
    )
    .unwrap()
}

pub fn candidate(text: &str) -> Envelope {
    Envelope::new(
        tandem_core::MessageType::IceCandidate,
        &tandem_core::IceCandidate::new(text),
    )
    .unwrap()
}

pub fn presence(kind: tandem_core::MessageType) -> Envelope {
    Envelope::new(
        kind,
        &tandem_core::PresencePayload {
            peer_id: tandem_core::PeerId::guest(1),
            is_reconnect: kind == tandem_core::MessageType::PeerReconnected,
        },
    )
    .unwrap()
}

pub const SECOND: Duration = Duration::from_secs(1);
