use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use meshim_channel::{Acceptor, Agent, ChannelError, Conn, MessageListener, StateListener};
use meshim_packet::{Flag, LogicPkt, Session, Status, COMMAND_LOGIN_SIGN_IN};
use meshim_transport::InnerAcceptor;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::RouterError;
use crate::router::Router;
use crate::storage::SessionStorage;

/// Acceptor and listeners of a service's local server.
///
/// Connections are other mesh processes (gateways) identified by the inner
/// handshake. Each packet they send is routed with the sender's stored
/// session; login requests carry none yet.
pub struct ServHandler {
    router: Arc<Router>,
    dispatcher: Arc<dyn Dispatcher>,
    storage: Arc<dyn SessionStorage>,
}

impl ServHandler {
    pub fn new(
        router: Arc<Router>,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            router,
            dispatcher,
            storage,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Answer `request` back through the gateway it came from.
    async fn resp_err(&self, gateway: &str, request: &LogicPkt, status: Status) {
        let mut packet = LogicPkt::new_from(&request.header);
        packet.header.status = status;
        packet.header.flag = Flag::Response;
        let channels = [request.header.channel_id.clone()];
        if let Err(err) = self.dispatcher.push(gateway, &channels, packet).await {
            warn!(gateway = %gateway, error = %err, "error response failed");
        }
    }
}

#[async_trait]
impl Acceptor for ServHandler {
    async fn accept(
        &self,
        conn: &mut Conn,
        login_wait: Duration,
    ) -> std::result::Result<String, ChannelError> {
        InnerAcceptor.accept(conn, login_wait).await
    }
}

#[async_trait]
impl MessageListener for ServHandler {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let packet = match LogicPkt::decode(&payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(agent = %agent.id(), error = %err, "undecodable packet");
                return;
            }
        };

        let session: Option<Session> = if packet.header.command == COMMAND_LOGIN_SIGN_IN {
            None
        } else {
            match self.storage.get(&packet.header.channel_id).await {
                Ok(session) => Some(session),
                Err(RouterError::SessionNotFound) => {
                    self.resp_err(agent.id(), &packet, Status::SessionNotFound)
                        .await;
                    return;
                }
                Err(err) => {
                    error!(channel = %packet.header.channel_id, error = %err, "load session failed");
                    self.resp_err(agent.id(), &packet, Status::SystemException)
                        .await;
                    return;
                }
            }
        };

        self.router
            .serve(
                packet,
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.storage),
                session,
            )
            .await;
    }
}

#[async_trait]
impl StateListener for ServHandler {
    async fn disconnect(&self, id: &str) {
        info!(id = %id, "gateway disconnected");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use meshim_frame::Frame;
    use meshim_packet::{InnerHandshakeReq, META_DEST_SERVER};

    use super::*;
    use crate::context::tests::RecordingDispatcher;
    use crate::context::{Context, Handler, HandlerFunc};
    use crate::storage::MemoryStorage;

    #[derive(Default)]
    struct GatewayAgent {
        pushed: Mutex<Vec<Bytes>>,
    }

    impl Agent for GatewayAgent {
        fn id(&self) -> &str {
            "gate-1"
        }

        fn push(&self, payload: Bytes) -> meshim_channel::Result<()> {
            self.pushed.lock().expect("agent lock").push(payload);
            Ok(())
        }
    }

    /// Records the session each request was served with.
    struct SeenSession(Arc<Mutex<Vec<Session>>>);

    #[async_trait]
    impl Handler for SeenSession {
        async fn handle(&self, ctx: &mut Context) {
            let session = ctx.session().clone();
            self.0.lock().expect("seen lock").push(session);
        }
    }

    fn handler(
        seen: &Arc<Mutex<Vec<Session>>>,
    ) -> (ServHandler, Arc<MemoryStorage>, Arc<RecordingDispatcher>) {
        let mut router = Router::new();
        router.handle(
            COMMAND_LOGIN_SIGN_IN,
            [Arc::new(SeenSession(Arc::clone(seen))) as HandlerFunc],
        );
        router.handle(
            "chat.user.talk",
            [Arc::new(SeenSession(Arc::clone(seen))) as HandlerFunc],
        );
        let storage = Arc::new(MemoryStorage::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let serv = ServHandler::new(Arc::new(router), dispatcher.clone(), storage.clone());
        (serv, storage, dispatcher)
    }

    fn from_gateway(command: &str, channel: &str) -> Bytes {
        let mut packet = LogicPkt::new(command).with_channel(channel);
        packet.add_meta(META_DEST_SERVER, "gate-1");
        packet.marshal().expect("packet should marshal")
    }

    #[tokio::test]
    async fn login_is_routed_without_stored_session() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (serv, _, dispatcher) = handler(&seen);
        let agent = Arc::new(GatewayAgent::default());

        serv.receive(agent.clone(), from_gateway(COMMAND_LOGIN_SIGN_IN, "gate-1_alice_1"))
            .await;

        let seen = seen.lock().expect("seen lock").clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].gate_id, "gate-1");
        assert!(dispatcher.pushes().is_empty());
    }

    #[tokio::test]
    async fn stored_session_is_loaded_for_other_commands() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (serv, storage, _) = handler(&seen);
        storage
            .add(&Session {
                channel_id: "gate-1_alice_1".to_string(),
                gate_id: "gate-1".to_string(),
                account: "alice".to_string(),
                ..Session::default()
            })
            .await
            .expect("add should succeed");

        serv.receive(
            Arc::new(GatewayAgent::default()),
            from_gateway("chat.user.talk", "gate-1_alice_1"),
        )
        .await;

        let seen = seen.lock().expect("seen lock").clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].account, "alice");
    }

    #[tokio::test]
    async fn missing_session_is_answered_through_sending_gateway() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (serv, _, dispatcher) = handler(&seen);
        let agent = Arc::new(GatewayAgent::default());

        serv.receive(agent.clone(), from_gateway("chat.user.talk", "gate-1_ghost_9"))
            .await;

        assert!(seen.lock().expect("seen lock").is_empty());
        assert!(agent.pushed.lock().expect("agent lock").is_empty());
        let pushes = dispatcher.pushes();
        assert_eq!(pushes.len(), 1);
        let (gateway, channels, resp) = &pushes[0];
        assert_eq!(gateway, "gate-1");
        assert_eq!(channels, &vec!["gate-1_ghost_9".to_string()]);
        assert_eq!(resp.header.status, Status::SessionNotFound);
        assert_eq!(resp.header.flag, Flag::Response);
        assert_eq!(resp.header.channel_id, "gate-1_ghost_9");
    }

    #[tokio::test]
    async fn accept_uses_inner_handshake() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (serv, _, _) = handler(&seen);
        let (left, right) = tokio::io::duplex(1024);
        let mut client = Conn::new(left);
        let mut server = Conn::new(right);

        let req = serde_json::to_vec(&InnerHandshakeReq {
            service_id: "gate-1".to_string(),
        })
        .expect("handshake should serialize");
        client
            .write_frame(Frame::binary(req))
            .await
            .expect("handshake should send");

        let id = serv
            .accept(&mut server, Duration::from_secs(1))
            .await
            .expect("handshake should be accepted");
        assert_eq!(id, "gate-1");
    }
}
