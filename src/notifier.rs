use actix::prelude::*;
use log::info;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Dead-recipient sweep cadence. Disconnects normally clean up eagerly; the
/// sweep reclaims entries whose disconnect was never observed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn project_room(project_id: &str) -> String {
    format!("project-{}", project_id)
}

pub fn user_room(user_id: &str) -> String {
    format!("user-{}", user_id)
}

/// A serialized event frame pushed down one WebSocket session.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Outbound(pub String);

pub fn envelope(event: &str, data: &Value) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub conn_id: Uuid,
    pub addr: Recipient<Outbound>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub conn_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinUser {
    pub conn_id: Uuid,
    pub user_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinRoom {
    pub conn_id: Uuid,
    pub room: String,
}

/// Fan an event out to a room, optionally excluding the originating
/// connection. Delivery is at-most-once, best-effort.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Publish {
    pub room: String,
    pub event: String,
    pub data: Value,
    pub exclude: Option<Uuid>,
}

/// Ephemeral typing indicator; no state is retained beyond the current
/// connection set.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Typing {
    pub conn_id: Uuid,
    pub project_id: String,
    pub task_id: String,
    pub is_typing: bool,
}

/// Central fan-out actor. Rooms are named `project-{id}` and `user-{id}`;
/// clients join explicitly after authenticating. All state lives for the
/// server process lifetime and is rebuilt from scratch on restart.
pub struct Notifier {
    sessions: HashMap<Uuid, Recipient<Outbound>>,
    rooms: HashMap<String, HashSet<Uuid>>,
    /// Active-connection map: connection id -> authenticated user id.
    users: HashMap<Uuid, String>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            users: HashMap::new(),
        }
    }

    fn send_to_room(&self, room: &str, frame: &str, exclude: Option<Uuid>) {
        if let Some(members) = self.rooms.get(room) {
            for conn_id in members {
                if Some(*conn_id) == exclude {
                    continue;
                }
                if let Some(addr) = self.sessions.get(conn_id) {
                    addr.do_send(Outbound(frame.to_string()));
                }
            }
        }
    }

    fn send_to_all(&self, frame: &str, exclude: Option<Uuid>) {
        for (conn_id, addr) in &self.sessions {
            if Some(*conn_id) == exclude {
                continue;
            }
            addr.do_send(Outbound(frame.to_string()));
        }
    }

    fn drop_connection(&mut self, conn_id: Uuid) {
        self.sessions.remove(&conn_id);
        self.users.remove(&conn_id);
        for members in self.rooms.values_mut() {
            members.remove(&conn_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
    }

    /// Reconciliation sweep: drop sessions whose recipient is gone without a
    /// Disconnect ever arriving, so room membership cannot grow unbounded.
    fn sweep(&mut self) {
        let dead: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, addr)| !addr.connected())
            .map(|(id, _)| *id)
            .collect();
        for conn_id in dead {
            info!("Sweeping dead connection {}", conn_id);
            self.drop_connection(conn_id);
        }
    }
}

impl Actor for Notifier {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        ctx.run_interval(SWEEP_INTERVAL, |act, _| act.sweep());
    }
}

impl Handler<Connect> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("Connection {} opened", msg.conn_id);
        self.sessions.insert(msg.conn_id, msg.addr);
    }
}

impl Handler<Disconnect> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("Connection {} closed", msg.conn_id);
        if let Some(user_id) = self.users.get(&msg.conn_id).cloned() {
            let frame = envelope("user-offline", &Value::String(user_id));
            self.send_to_all(&frame, Some(msg.conn_id));
        }
        self.drop_connection(msg.conn_id);
    }
}

impl Handler<JoinUser> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: JoinUser, _: &mut Context<Self>) {
        self.users.insert(msg.conn_id, msg.user_id.clone());
        self.rooms
            .entry(user_room(&msg.user_id))
            .or_default()
            .insert(msg.conn_id);

        let frame = envelope("user-online", &Value::String(msg.user_id));
        self.send_to_all(&frame, Some(msg.conn_id));
    }
}

impl Handler<JoinRoom> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: JoinRoom, _: &mut Context<Self>) {
        self.rooms.entry(msg.room).or_default().insert(msg.conn_id);
    }
}

impl Handler<Publish> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) {
        let frame = envelope(&msg.event, &msg.data);
        self.send_to_room(&msg.room, &frame, msg.exclude);
    }
}

impl Handler<Typing> for Notifier {
    type Result = ();

    fn handle(&mut self, msg: Typing, _: &mut Context<Self>) {
        let user_id = self.users.get(&msg.conn_id).cloned().unwrap_or_default();
        let data = serde_json::json!({
            "userId": user_id,
            "taskId": msg.task_id,
            "isTyping": msg.is_typing,
        });
        let frame = envelope("user-typing", &data);
        self.send_to_room(&project_room(&msg.project_id), &frame, Some(msg.conn_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_naming_convention() {
        assert_eq!(project_room("p-42"), "project-p-42");
        assert_eq!(user_room("u-7"), "user-u-7");
    }

    #[test]
    fn envelope_carries_event_and_data() {
        let frame = envelope("task-updated", &serde_json::json!({ "taskId": "t1" }));
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "task-updated");
        assert_eq!(parsed["data"]["taskId"], "t1");
    }
}
