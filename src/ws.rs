use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::notifier::{
    project_room, user_room, Connect, Disconnect, JoinRoom, JoinUser, Notifier, Outbound, Publish,
    Typing,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Incoming frame: `{ "event": "...", "data": { ... } }`.
#[derive(Debug, Deserialize)]
struct ClientEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

pub struct WsSession {
    conn_id: Uuid,
    hb: Instant,
    notifier: Addr<Notifier>,
}

impl WsSession {
    pub fn new(notifier: Addr<Notifier>) -> Self {
        WsSession {
            conn_id: Uuid::new_v4(),
            hb: Instant::now(),
            notifier,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket client heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// `join-user`/`join-project` accept either a bare id string or an
    /// object payload, matching what clients historically sent.
    fn id_from(data: &Value, key: &str) -> Option<String> {
        data.as_str()
            .map(String::from)
            .or_else(|| data.get(key).and_then(Value::as_str).map(String::from))
    }

    fn dispatch(&self, msg: ClientEvent) {
        match msg.event.as_str() {
            "join-user" => {
                if let Some(user_id) = Self::id_from(&msg.data, "userId") {
                    self.notifier.do_send(JoinUser {
                        conn_id: self.conn_id,
                        user_id,
                    });
                }
            }
            "join-project" => {
                if let Some(project_id) = Self::id_from(&msg.data, "projectId") {
                    self.notifier.do_send(JoinRoom {
                        conn_id: self.conn_id,
                        room: project_room(&project_id),
                    });
                }
            }
            "task-updated" | "task-created" | "task-deleted" | "comment-added" => {
                if let Some(project_id) = msg.data.get("projectId").and_then(Value::as_str) {
                    self.notifier.do_send(Publish {
                        room: project_room(project_id),
                        event: msg.event,
                        data: msg.data,
                        exclude: Some(self.conn_id),
                    });
                }
            }
            "send-notification" => {
                if let Some(user_id) = msg.data.get("userId").and_then(Value::as_str) {
                    self.notifier.do_send(Publish {
                        room: user_room(user_id),
                        event: "notification".to_string(),
                        data: msg.data,
                        exclude: Some(self.conn_id),
                    });
                }
            }
            "typing" => {
                let project_id = msg.data.get("projectId").and_then(Value::as_str);
                let task_id = msg.data.get("taskId").and_then(Value::as_str);
                let is_typing = msg.data.get("isTyping").and_then(Value::as_bool);
                if let (Some(project_id), Some(task_id), Some(is_typing)) =
                    (project_id, task_id, is_typing)
                {
                    self.notifier.do_send(Typing {
                        conn_id: self.conn_id,
                        project_id: project_id.to_string(),
                        task_id: task_id.to_string(),
                        is_typing,
                    });
                }
            }
            other => {
                debug!("Ignoring unknown client event: {}", other);
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.notifier.do_send(Connect {
            conn_id: self.conn_id,
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.notifier.do_send(Disconnect {
            conn_id: self.conn_id,
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => self.dispatch(event),
                Err(e) => debug!("Failed to parse client event: {}", e),
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.0);
    }
}

/// GET /ws
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::start(WsSession::new(data.notifier.clone()), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_payload_accepts_bare_string_or_object() {
        let bare = serde_json::json!("u1");
        assert_eq!(WsSession::id_from(&bare, "userId").as_deref(), Some("u1"));
        let object = serde_json::json!({ "userId": "u2" });
        assert_eq!(WsSession::id_from(&object, "userId").as_deref(), Some("u2"));
        assert_eq!(WsSession::id_from(&serde_json::json!(42), "userId"), None);
    }

    #[test]
    fn client_event_parses_with_and_without_data() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"join-project","data":"p1"}"#).unwrap();
        assert_eq!(event.event, "join-project");
        assert_eq!(event.data.as_str(), Some("p1"));

        let bare: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(bare.data.is_null());
    }
}
