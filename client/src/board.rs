//! The client side whiteboard: local gestures, remote strokes and history
//! over one [`Surface`].

use std::collections::{BTreeSet, HashMap};

use sketchroom_shared::{
    normalize_session_id, sanitize_color, sanitize_size, ClientId, ClientMessage, DrawEvent,
    DrawRequest, DrawSample, Point, ServerMessage,
};
use tracing::{debug, warn};

use crate::capture::StrokeCapture;
use crate::history::History;
use crate::surface::{Brush, Raster, Surface};

/// What applying a server message did to the board.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    Connected(ClientId),
    Joined { members: Vec<ClientId> },
    Left,
    PeerJoined(ClientId),
    PeerLeft(ClientId),
    Rendered,
    Ignored,
    Rejected(String),
}

pub struct Whiteboard<S: Surface> {
    surface: S,
    capture: StrokeCapture,
    history: History,
    client_id: Option<ClientId>,
    session_id: Option<String>,
    next_sequence: u64,
    peers: BTreeSet<ClientId>,
    local_last: Option<Point>,
    remote_last: HashMap<ClientId, Point>,
}

impl<S: Surface> Whiteboard<S> {
    pub fn new(surface: S) -> Self {
        Self::with_parts(surface, StrokeCapture::default(), History::default())
    }

    pub fn with_parts(surface: S, capture: StrokeCapture, history: History) -> Self {
        Self {
            surface,
            capture,
            history,
            client_id: None,
            session_id: None,
            next_sequence: 1,
            peers: BTreeSet::new(),
            local_last: None,
            remote_last: HashMap::new(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn capture(&self) -> &StrokeCapture {
        &self.capture
    }

    /// Tool, color, brush size and viewport live on the capture.
    pub fn capture_mut(&mut self) -> &mut StrokeCapture {
        &mut self.capture
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn peers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.peers.iter().copied()
    }

    /// Starts a local gesture. The pre-gesture canvas becomes an undo
    /// checkpoint. Returns the message to send while joined to a session.
    pub fn pointer_down(&mut self, screen: Point) -> Option<ClientMessage> {
        let sample = self.capture.begin(screen)?;
        self.history.snapshot_before_gesture(self.surface.capture());
        self.render_local(None, &sample);
        self.outgoing(sample)
    }

    pub fn pointer_move(&mut self, screen: Point) -> Option<ClientMessage> {
        let sample = self.capture.extend(screen)?;
        self.render_local(self.local_last, &sample);
        self.outgoing(sample)
    }

    pub fn pointer_up(&mut self) {
        self.capture.end();
        self.local_last = None;
    }

    /// Switches to `session_id`. Sequence numbering restarts at 1 on every
    /// join, the current session included, matching the relay's per-join
    /// tracking. Peer state from the previous session is forgotten.
    pub fn join(&mut self, session_id: &str) -> Option<ClientMessage> {
        let session_id = normalize_session_id(session_id)?;
        self.reset_session_state();
        self.session_id = Some(session_id.clone());
        Some(ClientMessage::Join { session_id })
    }

    pub fn leave(&mut self) -> Option<ClientMessage> {
        let session_id = self.session_id.take()?;
        self.reset_session_state();
        Some(ClientMessage::Leave { session_id })
    }

    pub fn apply(&mut self, message: ServerMessage) -> Update {
        match message {
            ServerMessage::Connected { client_id } => {
                self.client_id = Some(client_id);
                Update::Connected(client_id)
            }
            ServerMessage::Joined {
                session_id,
                members,
            } => {
                if self.session_id.as_deref() != Some(session_id.as_str()) {
                    self.reset_session_state();
                    self.session_id = Some(session_id);
                }
                self.peers = members
                    .iter()
                    .copied()
                    .filter(|id| Some(*id) != self.client_id)
                    .collect();
                Update::Joined { members }
            }
            ServerMessage::Left { session_id } => {
                if self.session_id.as_deref() == Some(session_id.as_str()) {
                    self.session_id = None;
                    self.reset_session_state();
                }
                Update::Left
            }
            ServerMessage::PeerJoined {
                session_id,
                client_id,
            } if self.in_session(&session_id) => {
                self.peers.insert(client_id);
                Update::PeerJoined(client_id)
            }
            ServerMessage::PeerLeft {
                session_id,
                client_id,
            } if self.in_session(&session_id) => {
                self.peers.remove(&client_id);
                self.remote_last.remove(&client_id);
                Update::PeerLeft(client_id)
            }
            ServerMessage::PeerJoined { .. } | ServerMessage::PeerLeft { .. } => Update::Ignored,
            ServerMessage::Draw(event) => self.apply_remote(event),
            ServerMessage::Error { message } => {
                warn!(%message, "server rejected a message");
                Update::Rejected(message)
            }
        }
    }

    /// Restores the last checkpoint. Remote strokes drawn since are rolled
    /// back with it.
    pub fn undo(&mut self) -> bool {
        match self.history.undo(self.surface.capture()) {
            Some(raster) => {
                self.surface.restore(&raster);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(self.surface.capture()) {
            Some(raster) => {
                self.surface.restore(&raster);
                true
            }
            None => false,
        }
    }

    /// Wipes the local canvas and both history stacks.
    pub fn clear(&mut self) {
        self.surface.clear();
        self.history.clear();
        self.remote_last.clear();
    }

    pub fn raster(&self) -> Raster {
        self.surface.capture()
    }

    /// Replaces the canvas with a loaded snapshot as an undoable local
    /// gesture.
    pub fn load(&mut self, raster: &Raster) {
        self.history.snapshot_before_gesture(self.surface.capture());
        self.surface.restore(raster);
        self.remote_last.clear();
    }

    fn in_session(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    fn reset_session_state(&mut self) {
        self.next_sequence = 1;
        self.peers.clear();
        self.remote_last.clear();
    }

    fn render_local(&mut self, from: Option<Point>, sample: &DrawSample) {
        let to = sample.point();
        self.surface.draw(
            from,
            to,
            Brush {
                color: &sample.color,
                size: sample.brush_size,
                tool: sample.tool,
            },
        );
        self.local_last = Some(to);
    }

    fn outgoing(&mut self, sample: DrawSample) -> Option<ClientMessage> {
        let session_id = self.session_id.clone()?;
        let sequence_no = self.next_sequence;
        self.next_sequence += 1;
        Some(ClientMessage::Draw(DrawRequest::from_sample(
            session_id,
            sequence_no,
            sample,
        )))
    }

    fn apply_remote(&mut self, event: DrawEvent) -> Update {
        if Some(event.origin_client_id) == self.client_id {
            return Update::Ignored;
        }
        if !self.in_session(&event.session_id) {
            debug!(session_id = %event.session_id, "ignoring draw for another session");
            return Update::Ignored;
        }
        let to = event.point();
        if !to.is_finite() {
            return Update::Ignored;
        }
        let from = if event.stroke_start {
            None
        } else {
            self.remote_last.get(&event.origin_client_id).copied()
        };
        let color = sanitize_color(&event.color);
        self.surface.draw(
            from,
            to,
            Brush {
                color: &color,
                size: sanitize_size(event.brush_size),
                tool: event.tool,
            },
        );
        self.remote_last.insert(event.origin_client_id, to);
        Update::Rendered
    }
}
