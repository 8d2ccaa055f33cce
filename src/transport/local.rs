//! An in-process cluster. Every member runs a task draining its inbox in order,
//! applying commands to its own [`DataContainer`] and replying through the
//! origin's [`ReplyRouter`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Address, Transport};
use crate::cache::{self, DataContainer};
use crate::command::{Marshaller, Response};
use crate::error::TransportError;
use crate::rpc::{InvocationRequest, ReplyRouter};
use crate::MAX_COMMAND_SIZE;

struct Inbound {
    origin: Address,
    request_id: u64,
    payload: Arc<Vec<u8>>,
    reply: bool,
}

struct Member {
    inbox: mpsc::UnboundedSender<Inbound>,
    container: DataContainer,
    reply_delay_ms: Arc<AtomicU64>,
    duplicate_replies: Arc<AtomicBool>,
}

/// Shared state of an in-process cluster.
#[derive(Clone, Default)]
pub struct LocalCluster {
    view: Arc<RwLock<Vec<Address>>>,
    members: Arc<DashMap<Address, Member>>,
    routers: Arc<DashMap<Address, ReplyRouter>>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member named `name` and return its transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join(&self, name: &str) -> LocalTransport {
        let address = Address::new(name);
        let (tx, rx) = mpsc::unbounded_channel();
        let member = Member {
            inbox: tx,
            container: DataContainer::default(),
            reply_delay_ms: Arc::new(AtomicU64::new(0)),
            duplicate_replies: Arc::new(AtomicBool::new(false)),
        };
        tokio::spawn(run_member(
            address.clone(),
            rx,
            member.container.clone(),
            member.reply_delay_ms.clone(),
            member.duplicate_replies.clone(),
            self.routers.clone(),
        ));
        self.members.insert(address.clone(), member);
        self.view.write().unwrap().push(address.clone());
        info!(%address, "Member joined");

        LocalTransport {
            address,
            cluster: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Remove `address` from the view. Its inbox is closed and every attached
    /// router is told about the departure.
    pub fn leave(&self, address: &Address) {
        self.view.write().unwrap().retain(|a| a != address);
        self.members.remove(address);
        self.routers.remove(address);
        info!(%address, "Member left");

        let routers: Vec<ReplyRouter> = self.routers.iter().map(|r| r.value().clone()).collect();
        for router in routers {
            router.member_left(address);
        }
    }

    pub fn members(&self) -> Vec<Address> {
        self.view.read().unwrap().clone()
    }

    /// Data held by `address`, if it is a member.
    pub fn container(&self, address: &Address) -> Option<DataContainer> {
        self.members.get(address).map(|m| m.container.clone())
    }

    /// Delay every reply sent by `address`. Commands behind it queue up, in order.
    pub fn set_reply_delay(&self, address: &Address, delay: Duration) {
        if let Some(member) = self.members.get(address) {
            member
                .reply_delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }
    }

    /// Make `address` send each reply twice.
    pub fn set_duplicate_replies(&self, address: &Address, enabled: bool) {
        if let Some(member) = self.members.get(address) {
            member.duplicate_replies.store(enabled, Ordering::SeqCst);
        }
    }
}

/// A member's handle on a [`LocalCluster`].
#[derive(Clone)]
pub struct LocalTransport {
    address: Address,
    cluster: LocalCluster,
    closed: Arc<AtomicBool>,
}

impl LocalTransport {
    pub fn cluster(&self) -> &LocalCluster {
        &self.cluster
    }

    /// The data held by this member.
    pub fn container(&self) -> DataContainer {
        self.cluster
            .container(&self.address)
            .unwrap_or_default()
    }

    /// Refuse any further sends from this member.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for LocalTransport {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn members(&self) -> Vec<Address> {
        self.cluster.members()
    }

    fn attach(&self, router: ReplyRouter) {
        self.cluster.routers.insert(self.address.clone(), router);
    }

    async fn invoke_remotely(
        &self,
        request: InvocationRequest,
    ) -> std::result::Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }

        let mut unreachable = Vec::new();
        for target in &request.targets {
            let sent = match self.cluster.members.get(target) {
                Some(member) => member
                    .inbox
                    .send(Inbound {
                        origin: request.origin.clone(),
                        request_id: request.id,
                        payload: request.payload.clone(),
                        reply: request.mode.is_synchronous(),
                    })
                    .is_ok(),
                None => false,
            };
            if !sent {
                debug!(request_id = request.id, %target, "Target unreachable");
                unreachable.push(target.clone());
            }
        }

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Suspected(unreachable))
        }
    }
}

async fn run_member(
    address: Address,
    mut inbox: mpsc::UnboundedReceiver<Inbound>,
    container: DataContainer,
    reply_delay_ms: Arc<AtomicU64>,
    duplicate_replies: Arc<AtomicBool>,
    routers: Arc<DashMap<Address, ReplyRouter>>,
) {
    let marshaller = Marshaller::new(MAX_COMMAND_SIZE);
    while let Some(msg) = inbox.recv().await {
        let delay = reply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let response = match marshaller.unmarshall(&msg.payload) {
            Ok(envelope) => cache::apply(&container, envelope.command),
            Err(e) => Response::Exception(e.to_string()),
        };
        debug!(%address, request_id = msg.request_id, ?response, "Applied remote command");

        if !msg.reply {
            continue;
        }
        let router = routers.get(&msg.origin).map(|r| r.value().clone());
        if let Some(router) = router {
            if duplicate_replies.load(Ordering::SeqCst) {
                router.deliver(msg.request_id, address.clone(), response.clone());
            }
            router.deliver(msg.request_id, address.clone(), response);
        }
    }
    debug!(%address, "Member stopped");
}
