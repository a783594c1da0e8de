//! Usage: Connection settings for the Notion OAuth flow (client id, proxy, ports, deadline).

use std::time::Duration;

/// Public client id registered with Notion for the tray widget.
pub const NOTION_CLIENT_ID: &str = "313d872b-594c-8104-bb76-0037ec478973";
/// Trusted exchange proxy. Holds the real client secret so it never ships on-device.
pub const OAUTH_PROXY_URL: &str = "https://notion-whisper-widget.vercel.app";
pub const OAUTH_AUTHORIZE_URL: &str = "https://api.notion.com/v1/oauth/authorize";
/// Pre-registered redirect ports, tried in order. These exact `localhost`
/// redirect URIs are allow-listed on the Notion integration; changing them
/// requires re-registering the integration.
pub const OAUTH_PORTS: [u16; 3] = [19872, 19873, 19874];
pub const FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub authorize_url: String,
    pub proxy_base_url: String,
    pub callback_ports: Vec<u16>,
    pub flow_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: NOTION_CLIENT_ID.to_string(),
            authorize_url: OAUTH_AUTHORIZE_URL.to_string(),
            proxy_base_url: OAUTH_PROXY_URL.to_string(),
            callback_ports: OAUTH_PORTS.to_vec(),
            flow_timeout: FLOW_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_registered_ports_in_order() {
        let cfg = AuthConfig::default();
        assert_eq!(cfg.callback_ports, vec![19872, 19873, 19874]);
        assert_eq!(cfg.flow_timeout, Duration::from_secs(300));
    }
}
