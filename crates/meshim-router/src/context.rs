use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshim_packet::{
    ErrorResp, Flag, Header, Location, LogicPkt, Session, Status, META_DEST_SERVER,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::storage::SessionStorage;

/// Tag on sessions the context made up from the request itself.
pub const TAG_AUTO_GENERATED: &str = "AutoGenerated";

/// One step of a command's handler chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut Context);
}

pub type HandlerFunc = Arc<dyn Handler>;

/// Per-request state handed to handlers.
///
/// Contexts are pooled by the [`Router`](crate::Router) and reset between
/// requests, so handlers must not keep anything borrowed from them.
pub struct Context {
    dispatcher: Arc<dyn Dispatcher>,
    storage: Arc<dyn SessionStorage>,
    handlers: Arc<Vec<HandlerFunc>>,
    index: usize,
    request: LogicPkt,
    session: Option<Session>,
}

impl Context {
    pub(crate) fn new(dispatcher: Arc<dyn Dispatcher>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            dispatcher,
            storage,
            handlers: Arc::new(Vec::new()),
            index: 0,
            request: LogicPkt::default(),
            session: None,
        }
    }

    /// Clear the request, handler chain position and session.
    pub(crate) fn reset(&mut self) {
        self.request = LogicPkt::default();
        self.handlers = Arc::new(Vec::new());
        self.index = 0;
        self.session = None;
    }

    pub(crate) fn prepare(
        &mut self,
        request: LogicPkt,
        handlers: Arc<Vec<HandlerFunc>>,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
        session: Option<Session>,
    ) {
        self.reset();
        self.request = request;
        self.handlers = handlers;
        self.dispatcher = dispatcher;
        self.storage = storage;
        self.session = session;
    }

    /// Run the rest of the handler chain.
    ///
    /// A handler that calls `next` runs the handlers after it before it
    /// resumes; each handler runs at most once per request.
    pub async fn next(&mut self) {
        while let Some(handler) = self.handlers.get(self.index).cloned() {
            self.index += 1;
            handler.handle(self).await;
        }
    }

    pub fn header(&self) -> &Header {
        &self.request.header
    }

    pub fn request(&self) -> &LogicPkt {
        &self.request
    }

    pub fn read_body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(self.request.read_body()?)
    }

    pub fn storage(&self) -> &dyn SessionStorage {
        self.storage.as_ref()
    }

    pub fn dispatcher(&self) -> &dyn Dispatcher {
        self.dispatcher.as_ref()
    }

    /// The sender's session, made up from the request when none was loaded.
    pub fn session(&mut self) -> &Session {
        let request = &self.request;
        self.session.get_or_insert_with(|| Session {
            channel_id: request.header.channel_id.clone(),
            gate_id: request
                .get_meta(META_DEST_SERVER)
                .unwrap_or_default()
                .to_string(),
            tags: vec![TAG_AUTO_GENERATED.to_string()],
            ..Session::default()
        })
    }

    /// Answer the sender with `status` and `body`.
    pub async fn resp<T: Serialize>(&mut self, status: Status, body: &T) -> Result<()> {
        let mut packet = self.response(status);
        packet.write_body(body)?;
        self.push_to_sender(packet).await
    }

    /// Answer the sender with `status` and no body.
    pub async fn resp_status(&mut self, status: Status) -> Result<()> {
        let packet = self.response(status);
        self.push_to_sender(packet).await
    }

    pub async fn resp_with_error(&mut self, status: Status, err: impl fmt::Display) -> Result<()> {
        let body = ErrorResp {
            message: err.to_string(),
        };
        self.resp(status, &body).await
    }

    /// Push `body` to every recipient except the sender's own channel, one
    /// message per gateway.
    ///
    /// Every gateway is attempted; the first failure is returned.
    pub async fn dispatch<T: Serialize>(
        &mut self,
        body: &T,
        recipients: &[Location],
    ) -> Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }
        let mut packet = LogicPkt::new_from(&self.request.header);
        packet.header.flag = Flag::Push;
        packet.write_body(body)?;

        let own = self.session().channel_id.clone();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for recipient in recipients {
            if recipient.channel_id == own {
                continue;
            }
            groups
                .entry(recipient.gate_id.clone())
                .or_default()
                .push(recipient.channel_id.clone());
        }
        debug!(
            recipients = recipients.len(),
            gateways = groups.len(),
            header = %self.request.header,
            "dispatch"
        );

        let mut first_err = None;
        for (gateway, channels) in groups {
            if let Err(err) = self
                .dispatcher
                .push(&gateway, &channels, packet.clone())
                .await
            {
                error!(gateway = %gateway, error = %err, "dispatch failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn response(&self, status: Status) -> LogicPkt {
        let mut packet = LogicPkt::new_from(&self.request.header);
        packet.header.status = status;
        packet.header.flag = Flag::Response;
        packet
    }

    async fn push_to_sender(&mut self, packet: LogicPkt) -> Result<()> {
        let session = self.session().clone();
        debug!(
            account = %session.account,
            header = %packet.header,
            status = ?packet.header.status,
            "response"
        );
        let result = self
            .dispatcher
            .push(&session.gate_id, &[session.channel_id], packet)
            .await;
        if let Err(err) = &result {
            error!(error = %err, "response failed");
        }
        result
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("header", &self.request.header)
            .field("index", &self.index)
            .field("handlers", &self.handlers.len())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
