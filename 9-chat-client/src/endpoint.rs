use std::fmt;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "7007";
pub const DEFAULT_TRANSPORT: &str = "tcp";

/// Where the chat server lives.
///
/// None of the fields is ever empty: [`Endpoint::resolve`] substitutes the
/// defaults for blank inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: String,
    transport: String,
}

impl Endpoint {
    pub fn resolve(host: &str, port: &str, transport: &str) -> Self {
        Self {
            host: or_default(host, DEFAULT_HOST),
            port: or_default(port, DEFAULT_PORT),
            transport: or_default(transport, DEFAULT_TRANSPORT),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Canonical `host:port` form used for dialing and diagnostics.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::resolve("", "", "")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn or_default(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_inputs_take_defaults() {
        let endpoint = Endpoint::resolve("", "  ", "");
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), "7007");
        assert_eq!(endpoint.transport(), "tcp");
        assert_eq!(endpoint, Endpoint::default());
    }

    #[test]
    fn explicit_inputs_are_kept() {
        let endpoint = Endpoint::resolve("chat.example.org", "9000", "tcp");
        assert_eq!(endpoint.render(), "chat.example.org:9000");
    }

    #[test]
    fn partial_inputs_mix_with_defaults() {
        let endpoint = Endpoint::resolve("10.0.0.7", "", "");
        assert_eq!(endpoint.to_string(), "10.0.0.7:7007");
        assert_eq!(endpoint.transport(), "tcp");
    }
}
