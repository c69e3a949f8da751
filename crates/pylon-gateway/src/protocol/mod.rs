//! Gateway protocol definitions
//!
//! Op codes, the message envelope, handshake payloads and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseClass, CloseCode, CloseCodeTable, FatalReason};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    RequestGuildMembersPayload, ResumePayload,
};

/// Gateway protocol version
pub const API_VERSION: u8 = 10;

/// Append the version, encoding and compression query to a gateway URL
pub fn connect_url(base: &str, compress: bool) -> String {
    let mut url = format!(
        "{}/?v={API_VERSION}&encoding=json",
        base.trim_end_matches('/')
    );
    if compress {
        url.push_str("&compress=zlib-stream");
    }
    url
}
