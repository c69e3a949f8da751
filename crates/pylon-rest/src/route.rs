//! REST routes and their rate limit keys

use std::fmt;

use reqwest::Method;

/// Path parameters that split a route into separate buckets
const MAJOR_PARAMETERS: [&str; 4] = ["guild_id", "channel_id", "webhook_id", "webhook_token"];

/// A REST call target: method, path template and parameter values
///
/// ```
/// use pylon_rest::{Method, Route};
///
/// let route = Route::new(Method::POST, "/channels/{channel_id}/messages")
///     .param("channel_id", 42u64);
/// assert_eq!(route.path(), "/channels/42/messages");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: &'static str,
    params: Vec<(&'static str, String)>,
    reason: Option<String>,
}

impl Route {
    pub fn new(method: Method, template: &'static str) -> Self {
        Self {
            method,
            template,
            params: Vec::new(),
            reason: None,
        }
    }

    pub fn get(template: &'static str) -> Self {
        Self::new(Method::GET, template)
    }

    pub fn post(template: &'static str) -> Self {
        Self::new(Method::POST, template)
    }

    pub fn patch(template: &'static str) -> Self {
        Self::new(Method::PATCH, template)
    }

    pub fn delete(template: &'static str) -> Self {
        Self::new(Method::DELETE, template)
    }

    /// Bind a path parameter
    pub fn param(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Attach an audit log reason, sent as `X-Audit-Log-Reason`
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn template(&self) -> &'static str {
        self.template
    }

    #[inline]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concrete path with every bound parameter substituted
    pub fn path(&self) -> String {
        let mut path = self.template.to_string();
        for (name, value) in &self.params {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        path
    }

    /// Rate limit bucket key
    ///
    /// Method and template identify the route; only major parameters are
    /// part of the key, so `/channels/1/messages/5` and
    /// `/channels/1/messages/6` share a bucket while channel 2 does not.
    pub fn bucket_key(&self) -> String {
        let mut key = format!("{} {}", self.method, self.template);
        for major in MAJOR_PARAMETERS {
            if let Some(value) = self.param_value(major) {
                key.push(' ');
                key.push_str(major);
                key.push('=');
                key.push_str(value);
            }
        }
        key
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path())
    }
}
