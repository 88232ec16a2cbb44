//! JSON-RPC connection to the Playwright driver

use crate::error::{Error, Result};
use crate::server::transport::{TransportReceiver, TransportSender};
use parking_lot::Mutex as ParkingLotMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_CAPACITY: usize = 256;
const OBJECT_POLL: Duration = Duration::from_millis(10);

/// Metadata attached to every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "wallTime")]
    pub wall_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
}

impl Metadata {
    pub fn now() -> Self {
        Self {
            wall_time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            internal: Some(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u32,
    pub guid: String,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorWrapper>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Notification from the driver about an object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub guid: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Event(Event),
}

/// A driver-side object announced by `__create__`
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub type_name: String,
    pub parent: String,
    pub initializer: Value,
}

type Callbacks = HashMap<u32, oneshot::Sender<Result<Value>>>;

/// JSON-RPC connection to the Playwright driver
pub struct Connection {
    last_id: AtomicU32,
    callbacks: Arc<TokioMutex<Callbacks>>,
    sender: TokioMutex<Box<dyn TransportSender>>,
    message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
    transport_receiver: TokioMutex<Option<Box<dyn TransportReceiver>>>,
    objects: ParkingLotMutex<HashMap<String, RemoteObject>>,
    events: broadcast::Sender<Event>,
}

impl Connection {
    pub fn new(
        sender: impl TransportSender + 'static,
        receiver: impl TransportReceiver + 'static,
        message_rx: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            last_id: AtomicU32::new(0),
            callbacks: Arc::new(TokioMutex::new(HashMap::new())),
            sender: TokioMutex::new(Box::new(sender)),
            message_rx: TokioMutex::new(Some(message_rx)),
            transport_receiver: TokioMutex::new(Some(Box::new(receiver))),
            objects: ParkingLotMutex::new(HashMap::new()),
            events,
        }
    }

    /// Sends a request and waits for its response
    pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Sending message: id={}, guid='{}', method='{}'", id, guid, method);

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().await.insert(id, tx);

        let request = Request {
            id,
            guid: guid.to_string(),
            method: method.to_string(),
            params,
            metadata: Metadata::now(),
        };
        let request_value = serde_json::to_value(&request)?;

        if let Err(e) = self.sender.lock().await.send(request_value).await {
            tracing::error!("Failed to send message: {:?}", e);
            self.callbacks.lock().await.remove(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::ChannelClosed)
            .and_then(|result| result)
    }

    /// Subscribes to driver events other than object lifecycle
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn object(&self, guid: &str) -> Option<RemoteObject> {
        self.objects.lock().get(guid).cloned()
    }

    /// Waits until the driver has announced `guid`
    pub async fn wait_for_object(&self, guid: &str, timeout: Duration) -> Result<RemoteObject> {
        let wait = async {
            loop {
                if let Some(object) = self.object(guid) {
                    return object;
                }
                tokio::time::sleep(OBJECT_POLL).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::timeout(format!("waiting for driver object {}", guid), timeout))
    }

    /// Performs the `initialize` handshake; returns the Playwright object's guid
    pub async fn initialize(&self, timeout: Duration) -> Result<String> {
        let response = tokio::time::timeout(
            timeout,
            self.send_message("", "initialize", serde_json::json!({ "sdkLanguage": "javascript" })),
        )
        .await
        .map_err(|_| Error::timeout("initializing Playwright driver", timeout))??;

        let guid = response["playwright"]["guid"]
            .as_str()
            .ok_or_else(|| {
                Error::Protocol("Initialize response missing 'playwright.guid' field".to_string())
            })?
            .to_string();
        self.wait_for_object(&guid, timeout).await?;
        tracing::debug!("Initialized Playwright with GUID: {}", guid);
        Ok(guid)
    }

    /// Pumps incoming messages until the transport closes; callable once
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let mut transport_receiver = self
            .transport_receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Protocol("connection is already running".to_string()))?;
        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Protocol("connection is already running".to_string()))?;

        let transport_handle = tokio::spawn(async move {
            if let Err(e) = transport_receiver.run().await {
                tracing::error!("Transport error: {}", e);
            }
        });

        while let Some(value) = message_rx.recv().await {
            match serde_json::from_value::<Message>(value) {
                Ok(message) => {
                    if let Err(e) = self.dispatch(message).await {
                        tracing::error!("Error dispatching message: {}", e);
                    }
                }
                Err(e) => tracing::error!("Failed to parse message: {}", e),
            }
        }

        tracing::debug!("Message loop ended (transport closed)");
        // dropping the senders fails every pending request with ChannelClosed
        self.callbacks.lock().await.clear();
        let _ = transport_handle.await;
        Ok(())
    }

    pub(crate) async fn dispatch(&self, message: Message) -> Result<()> {
        match message {
            Message::Response(response) => {
                let callback = self
                    .callbacks
                    .lock()
                    .await
                    .remove(&response.id)
                    .ok_or_else(|| {
                        Error::Protocol(format!("Cannot find request to respond: id={}", response.id))
                    })?;
                let result = match response.error {
                    Some(wrapper) => Err(parse_protocol_error(wrapper.error)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = callback.send(result);
                Ok(())
            }
            Message::Event(event) => match event.method.as_str() {
                "__create__" => self.handle_create(&event),
                "__dispose__" => {
                    if self.objects.lock().remove(&event.guid).is_none() {
                        tracing::debug!("Ignoring __dispose__ for unknown object: guid={}", event.guid);
                    }
                    Ok(())
                }
                "__adopt__" => self.handle_adopt(&event),
                _ => {
                    // nobody listening is fine
                    let _ = self.events.send(event);
                    Ok(())
                }
            },
        }
    }

    fn handle_create(&self, event: &Event) -> Result<()> {
        let type_name = event.params["type"]
            .as_str()
            .ok_or_else(|| Error::Protocol("__create__ missing 'type'".to_string()))?;
        let guid = event.params["guid"]
            .as_str()
            .ok_or_else(|| Error::Protocol("__create__ missing 'guid'".to_string()))?;

        tracing::trace!("__create__: type={}, guid={}, parent={}", type_name, guid, event.guid);
        self.objects.lock().insert(
            guid.to_string(),
            RemoteObject {
                type_name: type_name.to_string(),
                parent: event.guid.clone(),
                initializer: event.params["initializer"].clone(),
            },
        );
        Ok(())
    }

    fn handle_adopt(&self, event: &Event) -> Result<()> {
        let child = event.params["guid"]
            .as_str()
            .ok_or_else(|| Error::Protocol("__adopt__ missing 'guid'".to_string()))?;
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(child)
            .ok_or_else(|| Error::Protocol(format!("Child object not found during adopt: {}", child)))?;
        object.parent = event.guid.clone();
        Ok(())
    }
}

fn is_browser_installation_error(message: &str) -> bool {
    message.contains("Looks like Playwright")
        || message.contains("Executable doesn't exist")
        || message.contains("not installed")
        || message.contains("Please run")
}

fn parse_protocol_error(payload: ErrorPayload) -> Error {
    if is_browser_installation_error(&payload.message) {
        return Error::LaunchFailed(format!(
            "browser is not installed; run `npx playwright install`\n{}",
            payload.message
        ));
    }
    Error::Protocol(payload.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::transport::PipeReceiver;
    use serde_json::json;

    fn connection() -> Arc<Connection> {
        let (client, server) = tokio::io::duplex(1024);
        let (receiver, rx) = PipeReceiver::new(server);
        Arc::new(Connection::new(client, receiver, rx))
    }

    fn event(guid: &str, method: &str, params: Value) -> Message {
        Message::Event(Event {
            guid: guid.to_string(),
            method: method.to_string(),
            params,
        })
    }

    #[test]
    fn test_message_shapes() {
        let msg: Message = serde_json::from_value(json!({
            "id": 3,
            "error": {"error": {"message": "boom", "name": "Error"}}
        }))
        .unwrap();
        assert!(matches!(msg, Message::Response(Response { id: 3, .. })));

        let msg: Message =
            serde_json::from_value(json!({"guid": "frame@1", "method": "navigated", "params": {"url": "x"}}))
                .unwrap();
        assert!(matches!(msg, Message::Event(_)));

        let request = serde_json::to_value(Request {
            id: 0,
            guid: "".into(),
            method: "initialize".into(),
            params: Value::Null,
            metadata: Metadata::now(),
        })
        .unwrap();
        assert!(request.get("params").is_none());
        assert!(request["metadata"]["wallTime"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_object_lifecycle() {
        let conn = connection();
        conn.dispatch(event(
            "",
            "__create__",
            json!({"type": "Playwright", "guid": "playwright", "initializer": {"chromium": {"guid": "bt@1"}}}),
        ))
        .await
        .unwrap();
        let object = conn
            .wait_for_object("playwright", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(object.type_name, "Playwright");
        assert_eq!(object.initializer["chromium"]["guid"], "bt@1");

        conn.dispatch(event("ctx@2", "__adopt__", json!({"guid": "playwright"})))
            .await
            .unwrap();
        assert_eq!(conn.object("playwright").unwrap().parent, "ctx@2");

        conn.dispatch(event("playwright", "__dispose__", json!({})))
            .await
            .unwrap();
        assert!(conn.object("playwright").is_none());
        let err = conn
            .wait_for_object("playwright", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_response_resolves_pending_request() {
        let conn = connection();
        let sender = Arc::clone(&conn);
        let pending = tokio::spawn(async move { sender.send_message("page@1", "title", json!({})).await });
        // wait until the request is registered
        while conn.callbacks.lock().await.is_empty() {
            tokio::task::yield_now().await;
        }
        conn.dispatch(Message::Response(Response {
            id: 0,
            result: Some(json!({"value": "Home"})),
            error: None,
        }))
        .await
        .unwrap();
        assert_eq!(pending.await.unwrap().unwrap()["value"], "Home");
    }

    #[tokio::test]
    async fn test_other_events_are_broadcast() {
        let conn = connection();
        let mut rx = conn.subscribe();
        conn.dispatch(event("frame@1", "navigated", json!({"url": "https://a.test/"})))
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.method, "navigated");
        assert_eq!(received.params["url"], "https://a.test/");
    }

    #[test]
    fn test_installation_errors_become_launch_failures() {
        let err = parse_protocol_error(ErrorPayload {
            message: "browserType.launch: Executable doesn't exist at /x/chromium".into(),
            name: None,
            stack: None,
        });
        assert!(matches!(err, Error::LaunchFailed(_)));

        let err = parse_protocol_error(ErrorPayload {
            message: "strict mode violation".into(),
            name: Some("Error".into()),
            stack: None,
        });
        assert!(matches!(err, Error::Protocol(m) if m == "strict mode violation"));
    }
}
