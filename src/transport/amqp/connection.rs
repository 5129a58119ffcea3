//! Pure helpers for the AMQP client: URI construction and property flattening

use crate::transport::{BrokerEndpoint, CONTENT_TYPE};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::BasicProperties;
use std::collections::BTreeMap;

/// Reply code sent with channel/connection close
pub const REPLY_SUCCESS: u16 = 200;

/// Build the AMQP URI for an authenticated connection
pub fn build_amqp_uri(endpoint: &BrokerEndpoint, username: &str, password: &str) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: username.to_string(),
                password: password.to_string(),
            },
            host: endpoint.host.clone(),
            port: endpoint.port,
        },
        vhost: endpoint.virtual_host.clone(),
        ..Default::default()
    }
}

/// Flatten the properties a publisher set into the string map the normalizer matches on.
///
/// Unset properties are omitted, so a message published with only a content
/// type yields a single-entry map.
pub fn flatten_properties(properties: &BasicProperties) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();

    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            flat.insert(key.to_string(), value);
        }
    };

    put(
        CONTENT_TYPE,
        properties.content_type().as_ref().map(|v| v.as_str().to_string()),
    );
    put(
        "content-encoding",
        properties.content_encoding().as_ref().map(|v| v.as_str().to_string()),
    );
    put("type", properties.kind().as_ref().map(|v| v.as_str().to_string()));
    put("app-id", properties.app_id().as_ref().map(|v| v.as_str().to_string()));
    put(
        "message-id",
        properties.message_id().as_ref().map(|v| v.as_str().to_string()),
    );
    put(
        "correlation-id",
        properties.correlation_id().as_ref().map(|v| v.as_str().to_string()),
    );
    put("user-id", properties.user_id().as_ref().map(|v| v.as_str().to_string()));
    put("reply-to", properties.reply_to().as_ref().map(|v| v.as_str().to_string()));
    put(
        "delivery-mode",
        properties.delivery_mode().as_ref().map(|v| v.to_string()),
    );
    put("priority", properties.priority().as_ref().map(|v| v.to_string()));
    put(
        "headers",
        properties
            .headers()
            .as_ref()
            .filter(|h| !h.inner().is_empty())
            .map(|h| h.inner().len().to_string()),
    );

    flat
}
