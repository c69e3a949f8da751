//! Typed wrappers over the routes the client itself needs

use pylon_core::{Snowflake, User};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatcher::RequestDispatcher;
use crate::error::RestResult;
use crate::route::Route;

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

impl RequestDispatcher {
    /// Fetch the gateway URL, shard recommendation and identify limits
    pub async fn get_gateway_bot(&self) -> RestResult<GatewayBot> {
        let value = self.request(&Route::get("/gateway/bot"), None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_current_user(&self) -> RestResult<User> {
        let value = self.request(&Route::get("/users/@me"), None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Post a plain text message
    pub async fn create_message(&self, channel_id: Snowflake, content: &str) -> RestResult<Value> {
        let route = Route::post("/channels/{channel_id}/messages").param("channel_id", channel_id);
        self.request(&route, Some(json!({ "content": content }))).await
    }

    pub async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        reason: Option<&str>,
    ) -> RestResult<()> {
        let mut route = Route::delete("/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", channel_id)
            .param("message_id", message_id);
        if let Some(reason) = reason {
            route = route.with_reason(reason);
        }
        self.request(&route, None).await.map(drop)
    }

    /// Open (or fetch) the DM channel with a user
    pub async fn create_dm(&self, recipient_id: Snowflake) -> RestResult<Value> {
        self.request(
            &Route::post("/users/@me/channels"),
            Some(json!({ "recipient_id": recipient_id })),
        )
        .await
    }
}
