//! WebSocket live-update channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Path of the live-update WebSocket endpoint.
pub const WS_PATH: &str = "/__kiln/ws";

/// Path the client script is served from.
pub const CLIENT_PATH: &str = "/__kiln/client.js";

/// Messages pushed to connected pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrMessage {
    /// Connection established
    Connected,

    /// Replacement factories for self-accepting script modules
    Update {
        /// Module ids being replaced
        modules: Vec<String>,
        /// Script applying the replacement
        code: String,
    },

    /// Only stylesheets changed
    CssUpdate {
        /// Stylesheet file names to refetch
        stylesheets: Vec<String>,
    },

    /// Full page reload
    Reload,

    /// The last rebuild failed; the page keeps running the previous build
    Error { message: String },
}

/// Hub for broadcasting live-update messages to all connected clients.
#[derive(Debug, Clone)]
pub struct HmrHub {
    sender: broadcast::Sender<HmrMessage>,
}

impl HmrHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: HmrMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HmrMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HmrHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the browser client for the live-update channel.
///
/// `update` messages carry script produced by the bundler from the
/// project's own sources and are executed by appending a script element.
pub fn hmr_client_script(ws_path: &str) -> String {
    format!(
        r#"(function () {{
  'use strict';

  var url = (location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '{ws_path}';
  var overlayId = '__kiln_error_overlay';
  var attempts = 0;

  function clearOverlay() {{
    var overlay = document.getElementById(overlayId);
    if (overlay) overlay.remove();
  }}

  function showOverlay(message) {{
    clearOverlay();
    var overlay = document.createElement('pre');
    overlay.id = overlayId;
    overlay.style.cssText = 'position:fixed;inset:0;margin:0;padding:2rem;z-index:2147483647;' +
      'background:rgba(20,20,20,0.92);color:#ff6b6b;font:14px/1.5 monospace;white-space:pre-wrap;overflow:auto';
    overlay.textContent = message;
    document.body.appendChild(overlay);
  }}

  function refreshStyles(names) {{
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    Array.prototype.forEach.call(links, function (link) {{
      var href = link.getAttribute('href') || '';
      var path = href.split('?')[0];
      var matches = names.some(function (name) {{
        return path === name || path.slice(-(name.length + 1)) === '/' + name;
      }});
      if (matches) link.setAttribute('href', path + '?t=' + Date.now());
    }});
  }}

  function connect() {{
    var ws = new WebSocket(url);

    ws.onopen = function () {{
      attempts = 0;
    }};

    ws.onmessage = function (event) {{
      var msg = JSON.parse(event.data);

      switch (msg.type) {{
        case 'connected':
          console.log('[kiln] connected');
          break;

        case 'update':
          clearOverlay();
          console.log('[kiln] updating ' + msg.modules.join(', '));
          try {{
            var script = document.createElement('script');
            script.textContent = msg.code;
            document.head.appendChild(script);
            script.remove();
          }} catch (e) {{
            console.error('[kiln] update failed', e);
            location.reload();
          }}
          break;

        case 'css-update':
          clearOverlay();
          refreshStyles(msg.stylesheets);
          break;

        case 'reload':
          location.reload();
          break;

        case 'error':
          console.error('[kiln] build failed\n' + msg.message);
          showOverlay(msg.message);
          break;
      }}
    }};

    ws.onclose = function () {{
      if (attempts < 10) {{
        attempts++;
        setTimeout(connect, 1000 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hub_broadcasts_messages() {
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();

        hub.send(HmrMessage::Reload);

        match rx.try_recv() {
            Ok(HmrMessage::Reload) => {}
            other => panic!("Expected Reload message, got {other:?}"),
        }
    }

    #[test]
    fn serializes_message_types() {
        let json = serde_json::to_string(&HmrMessage::CssUpdate {
            stylesheets: vec!["main.bundle.css".to_string()],
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"css-update","stylesheets":["main.bundle.css"]}"#);

        let json = serde_json::to_string(&HmrMessage::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"error","message":"boom"}"#);
    }

    #[test]
    fn client_targets_endpoint() {
        let script = hmr_client_script(WS_PATH);
        assert!(script.contains("location.host + '/__kiln/ws'"));
        assert!(script.contains("case 'css-update':"));
    }
}
