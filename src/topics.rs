//! Closed topic catalog for the key lifecycle bus.
//!
//! A topic is identified by its exchange and topic name. On the wire the pair
//! becomes the routing key `exchange.topic`, which is also the Kafka topic name.

use std::fmt;

/// Exchanges this service publishes to or consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// Commands addressed to this service
    ApiE2EC,
    /// Query-side fan-out of key state
    ApiE2EQ,
    /// Replies to the user service
    ApiUserC,
    /// Replies to the chat service
    ApiChatC,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::ApiE2EC => "apiE2EC",
            Exchange::ApiE2EQ => "apiE2EQ",
            Exchange::ApiUserC => "apiUserC",
            Exchange::ApiChatC => "apiChatC",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const NEW_USER_E2E_KEYS: &str = "newUserE2EKeys";
pub const REREGISTER_USER_E2E_KEYS: &str = "reregisterUserE2EKeys";
pub const USER_C_E2E_KEYS: &str = "userCE2EKeys";
pub const DELETE_KEYS_BY_UUID_CHAT: &str = "deleteOneTimePublicKeysByUUIDChat";
pub const DELETE_KEYS_BY_UUID: &str = "deleteOneTimePublicKeysByUUID";
pub const DELETE_KEYS_BY_UUID_C: &str = "deleteOneTimePublicKeysByUUIDC";

/// (exchange, topic) pair. Routing is by exact equality of both parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicIdentity {
    pub exchange: Exchange,
    pub topic: &'static str,
}

impl TopicIdentity {
    pub const fn new(exchange: Exchange, topic: &'static str) -> Self {
        Self { exchange, topic }
    }

    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.exchange.as_str(), self.topic)
    }
}

impl fmt::Display for TopicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.exchange.as_str(), self.topic)
    }
}

/// Topics this service subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundTopic {
    /// `apiE2EC.newUserE2EKeys`: registration batch from the user service
    NewUserE2EKeys,
    /// `apiE2EC.deleteOneTimePublicKeysByUUIDChat`: consumed pair from the chat service
    DeleteOneTimePublicKeysByUuidChat,
}

impl InboundTopic {
    pub const ALL: [InboundTopic; 2] = [
        InboundTopic::NewUserE2EKeys,
        InboundTopic::DeleteOneTimePublicKeysByUuidChat,
    ];

    pub fn identity(&self) -> TopicIdentity {
        match self {
            InboundTopic::NewUserE2EKeys => TopicIdentity::new(Exchange::ApiE2EC, NEW_USER_E2E_KEYS),
            InboundTopic::DeleteOneTimePublicKeysByUuidChat => {
                TopicIdentity::new(Exchange::ApiE2EC, DELETE_KEYS_BY_UUID_CHAT)
            }
        }
    }

    /// Resolve a delivered routing key. Anything but an exact match is unknown.
    pub fn from_routing_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.identity().routing_key() == key)
    }
}

/// Topics this service publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundTopic {
    NewUserE2EKeys,
    ReregisterUserE2EKeys,
    UserCE2EKeys,
    DeleteOneTimePublicKeysByUuid,
    DeleteOneTimePublicKeysByUuidC,
}

impl OutboundTopic {
    pub fn identity(&self) -> TopicIdentity {
        match self {
            OutboundTopic::NewUserE2EKeys => TopicIdentity::new(Exchange::ApiE2EQ, NEW_USER_E2E_KEYS),
            OutboundTopic::ReregisterUserE2EKeys => {
                TopicIdentity::new(Exchange::ApiE2EQ, REREGISTER_USER_E2E_KEYS)
            }
            OutboundTopic::UserCE2EKeys => TopicIdentity::new(Exchange::ApiUserC, USER_C_E2E_KEYS),
            OutboundTopic::DeleteOneTimePublicKeysByUuid => {
                TopicIdentity::new(Exchange::ApiE2EQ, DELETE_KEYS_BY_UUID)
            }
            OutboundTopic::DeleteOneTimePublicKeysByUuidC => {
                TopicIdentity::new(Exchange::ApiChatC, DELETE_KEYS_BY_UUID_C)
            }
        }
    }
}
