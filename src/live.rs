//! Live reload over a websocket.
//!
//! The server runs two threads: one accepts incoming browser connections, the
//! other broadcasts [`Signal`]s to every connected client. Browsers load the
//! snippet from [`LiveReload::script`], which either swaps a stylesheet in
//! place or reloads the whole page.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;
use serde_json::Value;
use tungstenite::WebSocket;

use crate::config::LiveConfig;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Message sent to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Reload the whole page.
    Reload,
    /// Swap the stylesheet at `path`, relative to the project root.
    Inject { path: String },
}

/// Handle to a running live reload server.
#[derive(Debug, Clone)]
pub struct LiveReload {
    tx: Sender<Signal>,
    port: u16,
    site: Option<String>,
}

impl LiveReload {
    pub fn start(config: &LiveConfig) -> std::io::Result<Self> {
        let (tcp, port) = reserve_port(config.port)?;
        let clients = Clients::default();

        let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
        let (tx, _thread_o) = new_thread_ws_broadcast(clients);

        tracing::info!("live reload listening on ws://localhost:{port}");
        if let Some(site) = &config.site {
            tracing::info!("live reload limited to pages served from {site}");
        }

        Ok(Self {
            tx,
            port,
            site: config.site.clone(),
        })
    }

    pub fn reload(&self) {
        self.send(Signal::Reload);
    }

    pub fn inject(&self, path: impl Into<String>) {
        self.send(Signal::Inject { path: path.into() });
    }

    fn send(&self, signal: Signal) {
        if self.tx.send(signal).is_err() {
            tracing::debug!("live reload server is gone, signal dropped");
        }
    }

    /// Browser side of the connection. With a configured site, pages served
    /// from any other host stay disconnected.
    pub fn script(&self) -> String {
        let guard = match &self.site {
            Some(site) => {
                format!("  if (location.host !== {}) return;\n", Value::from(site.as_str()))
            }
            None => String::new(),
        };

        format!(
            r#"(() => {{
{guard}  const socket = new WebSocket("ws://" + location.hostname + ":{port}");
  socket.addEventListener("message", (event) => {{
    const signal = JSON.parse(event.data);
    if (signal.type !== "inject") {{
      location.reload();
      return;
    }}
    for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
      const url = new URL(link.href);
      if (url.pathname.endsWith("/" + signal.path)) {{
        url.searchParams.set("wpbuild", Date.now());
        link.href = url.toString();
      }}
    }}
  }});
}})();
"#,
            port = self.port
        )
    }
}

/// Binds the configured port, falling back to any free one.
fn reserve_port(port: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(sock) => sock,
        Err(e) => {
            tracing::warn!("port {port} is unavailable ({e}), picking another one");
            TcpListener::bind("127.0.0.1:0")?
        }
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream.map_err(|e| e.to_string()).and_then(|stream| {
                tungstenite::accept(stream).map_err(|e| e.to_string())
            }) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!("rejected live reload connection: {e}");
                    continue;
                }
            };

            clients
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(socket);
        }
    })
}

fn new_thread_ws_broadcast(clients: Clients) -> (Sender<Signal>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let thread = std::thread::spawn(move || broadcast(rx, clients));
    (tx, thread)
}

fn broadcast(rx: Receiver<Signal>, clients: Clients) {
    while let Ok(signal) = rx.recv() {
        let message = match serde_json::to_string(&signal) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("couldn't encode live reload signal: {e}");
                continue;
            }
        };

        let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
        let mut broken = vec![];

        for (i, socket) in clients.iter_mut().enumerate() {
            match socket.send(message.as_str().into()) {
                Ok(_) => {}
                Err(tungstenite::error::Error::Io(e))
                    if e.kind() == std::io::ErrorKind::BrokenPipe =>
                {
                    broken.push(i);
                }
                Err(tungstenite::error::Error::ConnectionClosed)
                | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                Err(e) => tracing::error!("live reload error: {e}"),
            }
        }

        for i in broken.into_iter().rev() {
            clients.remove(i);
        }

        // Close all but the last 10 connections
        let len = clients.len();
        if len > 10 {
            for mut socket in clients.drain(0..len - 10) {
                socket.close(None).ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_json() {
        assert_eq!(serde_json::to_string(&Signal::Reload).unwrap(), r#"{"type":"reload"}"#);
        assert_eq!(
            serde_json::to_string(&Signal::Inject {
                path: "assets/css/admin.css".into()
            })
            .unwrap(),
            r#"{"type":"inject","path":"assets/css/admin.css"}"#
        );
    }

    #[test]
    fn test_script_uses_port() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let live = LiveReload {
            tx,
            port: 4242,
            site: None,
        };
        let script = live.script();
        assert!(script.contains(r#"location.hostname + ":4242""#));
        assert!(!script.contains("location.host !=="));
    }

    #[test]
    fn test_script_is_limited_to_site() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let live = LiveReload {
            tx,
            port: 4242,
            site: Some("plugin.test".into()),
        };
        let script = live.script();
        assert!(script.starts_with("(() => {\n  if (location.host !== \"plugin.test\") return;\n"));
    }

    #[test]
    fn test_send_after_shutdown_is_silent() {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        let live = LiveReload {
            tx,
            port: 0,
            site: None,
        };
        live.reload();
        live.inject("assets/css/admin.css");
    }

    #[test]
    fn test_reserve_port_falls_back() {
        let (_taken, port) = reserve_port(0).unwrap();
        let (_other, fallback) = reserve_port(port).unwrap();
        assert_ne!(port, fallback);
    }
}
